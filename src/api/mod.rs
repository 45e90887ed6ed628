//! dashboard http api, used when push channel is not available

mod client;
mod error;
pub mod types;

pub use client::{Client, DEFAULT_REQUEST_TIMEOUT};
pub use error::Error;

use serde_json::Value;

use crate::event::UpdateKind;

/// Result type for api module
pub type Result<T> = std::result::Result<T, Error>;

/// Source of one-shot update data
#[async_trait::async_trait]
pub trait UpdateFetcher: Send + Sync {
    /// force server refresh a data set and return it
    async fn refresh(&self, kind: UpdateKind) -> Result<Value>;
}

#[async_trait::async_trait]
impl UpdateFetcher for Client {
    async fn refresh(&self, kind: UpdateKind) -> Result<Value> {
        Client::refresh(self, kind).await
    }
}
