//! Websocket push channel implement

mod channel;
pub mod message;

pub use channel::WsChannel;
