use serde_json::Value;

/// One named event on the wire, `{"event": name, "data": payload}`
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// event name
    pub event: String,
    /// event payload, null when absent
    pub data: Value,
}

impl Envelope {
    /// Create an envelope
    pub fn new<S: Into<String>>(event: S, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}
