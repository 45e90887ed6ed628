//! Dashboard update events and the kinds of data that can be refreshed.

use std::{fmt::Display, str::FromStr};

use enum_as_inner::EnumAsInner;
use serde_json::Value;
use snafu::prelude::*;

/// channel event name of a full threat feed update
pub const FEED_UPDATE: &str = "feed_update";
/// channel event name of a full threat report update
pub const REPORT_UPDATE: &str = "report_update";
/// channel event name of a single new indicator
pub const NEW_INDICATOR: &str = "new_indicator";

/// Received channel message has a name no update event is mapped to
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), display("unknown update event {name}"))]
pub struct UnknownEvent {
    /// received event name
    pub name: String,
}

/// Error when parse string as update kind
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), display("{s} is not an update kind, expect feed or report"))]
pub struct ParseUpdateKindError {
    /// string be parsed
    pub s: String,
}

/// Data set that can be requested from server
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    /// threat feeds
    Feed,
    /// threat reports
    Report,
}

impl UpdateKind {
    /// HTTP endpoint path to force refresh this data set
    pub fn refresh_path(&self) -> &'static str {
        match self {
            Self::Feed => "/api/feeds/refresh",
            Self::Report => "/api/reports/refresh",
        }
    }

    /// channel event name asking server to push this data set
    pub fn request_event(&self) -> &'static str {
        match self {
            Self::Feed => "request_feed_update",
            Self::Report => "request_report_update",
        }
    }

    /// short name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Report => "report",
        }
    }
}

impl Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateKind {
    type Err = ParseUpdateKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "feed" | "feeds" => Ok(Self::Feed),
            "report" | "reports" => Ok(Self::Report),
            _ => ParseUpdateKindSnafu { s }.fail(),
        }
    }
}

/// Decoded update, payloads are passed through untouched
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum UpdateEvent {
    /// whole feed data set
    FeedUpdate(Value),
    /// whole report data set
    ReportUpdate(Value),
    /// one new indicator and the server timestamp it was seen at
    NewIndicator(Value, Option<String>),
}

impl UpdateEvent {
    /// Map a channel message to an update event.
    ///
    /// `feed_update` and `report_update` envelopes carry the data set in their `data` member,
    /// the whole payload is used when it has none.
    pub fn decode(name: &str, payload: Value) -> Result<Self, UnknownEvent> {
        match name {
            FEED_UPDATE => Ok(Self::FeedUpdate(take_member(payload, "data"))),
            REPORT_UPDATE => Ok(Self::ReportUpdate(take_member(payload, "data"))),
            NEW_INDICATOR => {
                let timestamp = payload
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let indicator = payload.get("indicator").cloned().unwrap_or(Value::Null);
                Ok(Self::NewIndicator(indicator, timestamp))
            }
            _ => UnknownEventSnafu { name }.fail(),
        }
    }

    /// Event a successful HTTP refresh of `kind` is delivered as
    pub fn from_refresh(kind: UpdateKind, data: Value) -> Self {
        match kind {
            UpdateKind::Feed => Self::FeedUpdate(data),
            UpdateKind::Report => Self::ReportUpdate(data),
        }
    }

    /// wire name of this event
    pub fn tag(&self) -> &'static str {
        match self {
            Self::FeedUpdate(_) => FEED_UPDATE,
            Self::ReportUpdate(_) => REPORT_UPDATE,
            Self::NewIndicator(..) => NEW_INDICATOR,
        }
    }
}

fn take_member(mut payload: Value, key: &str) -> Value {
    match payload.as_object_mut().and_then(|obj| obj.remove(key)) {
        Some(member) => member,
        None => payload,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_feed_update_takes_data_member() {
        let event = UpdateEvent::decode(
            FEED_UPDATE,
            json!({
                "timestamp": "2024-05-01T10:00:00",
                "data": { "recent_indicators": [], "sources": [] },
            }),
        )
        .unwrap();

        assert_eq!(
            event.into_feed_update().unwrap(),
            json!({ "recent_indicators": [], "sources": [] })
        );
    }

    #[test]
    fn test_decode_report_update_without_envelope() {
        let event = UpdateEvent::decode(REPORT_UPDATE, json!([1, 2, 3])).unwrap();

        assert_eq!(event, UpdateEvent::ReportUpdate(json!([1, 2, 3])));
    }

    #[test]
    fn test_decode_new_indicator() {
        let event = UpdateEvent::decode(
            NEW_INDICATOR,
            json!({
                "timestamp": "2024-05-01T10:00:00",
                "indicator": { "type": "ip", "value": "10.0.0.1", "source": "urlhaus" },
            }),
        )
        .unwrap();

        let (indicator, timestamp) = event.into_new_indicator().unwrap();
        assert_eq!(indicator["value"], "10.0.0.1");
        assert_eq!(timestamp.as_deref(), Some("2024-05-01T10:00:00"));
    }

    #[test]
    fn test_decode_unknown_event() {
        let err = UpdateEvent::decode("chat_message", json!({})).unwrap_err();
        assert_eq!(err.name, "chat_message");
    }

    #[test]
    fn test_update_kind_parse() {
        assert_eq!("feed".parse::<UpdateKind>().unwrap(), UpdateKind::Feed);
        assert_eq!(" reports".parse::<UpdateKind>().unwrap(), UpdateKind::Report);
        assert!("indicator".parse::<UpdateKind>().is_err());
    }

    #[test]
    fn test_refresh_event_matches_kind() {
        assert_eq!(
            UpdateEvent::from_refresh(UpdateKind::Report, json!({})).tag(),
            REPORT_UPDATE
        );
        assert_eq!(UpdateKind::Feed.refresh_path(), "/api/feeds/refresh");
    }
}
