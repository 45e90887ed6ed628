//! Push channel frame codec.

mod stream;
mod types;

pub use stream::{EnvelopeStreamSink, EnvelopeStreamSinkError};
pub use types::Envelope;

use bytes::Bytes;
use miniz_oxide::inflate::{self, TINFLStatus};
use serde_json::Value;
use snafu::prelude::*;

/// Error when parse frame data as envelope
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)), module(error), context(suffix(false)))]
pub enum ParseEnvelopeError {
    /// Decompress data failed
    #[snafu(display("decompress frame failed: {status:?}"))]
    DecompressFailed {
        /// data for decode
        data: Bytes,
        /// decompress error status code
        status: TINFLStatus,
    },

    /// data is invalid json
    #[snafu(display("parse json failed: {source:?}"))]
    ParseJSONFailed {
        /// data for decode
        data: Bytes,
        /// source error
        source: serde_json::Error,
    },

    /// data json is not an object
    #[snafu(display("parsed frame is not object: {json}"))]
    EnvelopeNotObject {
        /// json string
        json: String,
    },

    /// data json has no event field
    #[snafu(display("frame has no event field: {json}"))]
    NoEventName {
        /// json string
        json: String,
    },

    /// data json event field is not string type
    #[snafu(display("frame has non-string event field: {json}"))]
    EventNameNotString {
        /// json string
        json: String,
    },
}

static EVENT_FIELD: &str = "event";
static DATA_FIELD: &str = "data";

impl Envelope {
    /// Decode frame data to an envelope
    pub fn decode(mut buff: Bytes, compressed: bool) -> Result<Self, ParseEnvelopeError> {
        if compressed {
            buff = inflate::decompress_to_vec_zlib(&buff)
                .map_err(|e| ParseEnvelopeError::DecompressFailed {
                    data: buff.clone(),
                    status: e,
                })?
                .into();
        }

        let mut value: Value =
            serde_json::from_slice(&buff).context(error::ParseJSONFailed { data: buff.clone() })?;

        let obj = value
            .as_object_mut()
            .with_context(|| error::EnvelopeNotObject {
                json: String::from_utf8_lossy(&buff),
            })?;

        let event = match obj.remove(EVENT_FIELD) {
            Some(Value::String(name)) => name,
            Some(_) => {
                return error::EventNameNotString {
                    json: String::from_utf8_lossy(&buff),
                }
                .fail()
            }
            None => {
                return error::NoEventName {
                    json: String::from_utf8_lossy(&buff),
                }
                .fail()
            }
        };

        let data = obj.remove(DATA_FIELD).unwrap_or(Value::Null);

        Ok(Self { event, data })
    }

    /// encode to text frame data (without compress)
    pub fn encode(&self) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert(EVENT_FIELD.to_string(), Value::String(self.event.clone()));
        obj.insert(DATA_FIELD.to_string(), self.data.clone());
        Value::Object(obj).to_string()
    }
}
