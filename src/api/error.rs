use snafu::prelude::*;

/// API Error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(variant), context(suffix(false)))]
pub enum Error {
    /// base url is not a valid url
    #[snafu(display("api base url {url} is invalid: {source}"))]
    InvalidBaseURL {
        /// input url
        url: String,
        /// source error
        source: url::ParseError,
    },

    /// base url schema is not http(s)
    #[snafu(display("api base url {url} has invalid schema {schema}, only http or https is ok"))]
    InvalidSchema {
        /// input url
        url: String,
        /// invalid schema
        schema: String,
    },

    /// create HTTP client failed
    #[snafu(display("create api client failed: {source}"))]
    ClientCreateFailed {
        /// source error
        source: reqwest::Error,
    },

    /// send api request failed
    #[snafu(display("{} url {url} failed: {source}", method.as_str()))]
    RequestFailed {
        /// http method
        method: reqwest::Method,
        /// target url
        url: String,
        /// source http error
        source: reqwest::Error,
    },

    /// http response of api request is not OK(200)
    #[snafu(display("{} url {url} got http status code {status_code}", method.as_str()))]
    HTTPStatusNotOK {
        /// http method
        method: reqwest::Method,
        /// request url
        url: String,
        /// received http status code
        status_code: reqwest::StatusCode,
    },

    /// parse response body of api request as target json type failed
    #[snafu(display("parse response body {body:?} failed: {source}"))]
    ParseBodyFailed {
        /// http response body
        body: bytes::Bytes,
        /// source parse error
        source: serde_json::Error,
    },

    /// api response success flag is false
    #[snafu(display("api {url} reported failure: {message}"))]
    NotSuccess {
        /// request url
        url: String,
        /// received error message, may be empty
        message: String,
    },
}
