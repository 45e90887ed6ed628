//! Update sinks: where decoded updates, status changes and errors end up.

use std::{
    any::Any,
    fmt::{Debug, Display},
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use serde_json::Value;
use snafu::prelude::*;

use crate::{error::Error, event::UpdateEvent};

/// Boxed error a handler can return
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by a sink when handling an update
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(sink_error), context(suffix(false)))]
pub enum SinkError {
    /// no handler registered for this event
    #[snafu(display("no handler registered for {tag} event"))]
    Unhandled {
        /// event tag
        tag: &'static str,
    },

    /// registered handler failed
    #[snafu(display("handler for {tag} event failed: {source}"))]
    Failed {
        /// event tag
        tag: &'static str,
        /// error returned by handler
        source: BoxError,
    },
}

/// Connection status reported to sinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// push channel connected
    Connected,
    /// push channel lost
    Disconnected,
    /// push channel transport reported an error
    ConnectionError(String),
    /// gave up push channel, fetching data periodically
    Polling,
}

impl Status {
    /// Label shown to user
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::ConnectionError(_) => "Connection Error",
            Self::Polling => "Polling",
        }
    }

    /// Severity level of this status, in bootstrap palette names
    pub fn severity(&self) -> &'static str {
        match self {
            Self::Connected => "success",
            Self::Disconnected => "warning",
            Self::ConnectionError(_) => "danger",
            Self::Polling => "info",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionError(reason) => write!(f, "{}: {}", self.label(), reason),
            _ => f.write_str(self.label()),
        }
    }
}

/// Consumer of decoded updates.
///
/// Implementations should not panic, but a panicking sink will not break the client either.
pub trait UpdateSink: Send + Sync {
    /// handle an update
    fn on_update(&self, update: &UpdateEvent) -> Result<(), SinkError>;

    /// connection status changed
    fn on_status(&self, _status: &Status) {}

    /// a non-fatal error happened inside the client
    fn on_error(&self, _error: &Error) {}
}

impl<F> UpdateSink for F
where
    F: Fn(&UpdateEvent) + Send + Sync,
{
    fn on_update(&self, update: &UpdateEvent) -> Result<(), SinkError> {
        self(update);
        Ok(())
    }
}

type DataHandler = Arc<dyn Fn(&Value) -> Result<(), BoxError> + Send + Sync>;
type IndicatorHandler = Arc<dyn Fn(&Value, Option<&str>) -> Result<(), BoxError> + Send + Sync>;
type StatusHandler = Arc<dyn Fn(&Status) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Sink built from one optional callback per event tag.
///
/// ```
/// use cti_live::Handlers;
///
/// let handlers = Handlers::new()
///     .on_feed_update(|data| {
///         println!("feeds: {}", data);
///         Ok(())
///     })
///     .on_status(|status| println!("status: {}", status));
/// ```
#[derive(Clone, Default)]
pub struct Handlers {
    feed_update: Option<DataHandler>,
    report_update: Option<DataHandler>,
    new_indicator: Option<IndicatorHandler>,
    status: Option<StatusHandler>,
    error: Option<ErrorHandler>,
}

impl Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("feed_update", &self.feed_update.is_some())
            .field("report_update", &self.report_update.is_some())
            .field("new_indicator", &self.new_indicator.is_some())
            .field("status", &self.status.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl Handlers {
    /// Create an empty handler set, every update is unhandled
    pub fn new() -> Self {
        Self::default()
    }

    /// Set handler for feed updates
    pub fn on_feed_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.feed_update = Some(Arc::new(f));
        self
    }

    /// Set handler for report updates
    pub fn on_report_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.report_update = Some(Arc::new(f));
        self
    }

    /// Set handler for new indicators, second argument is the server timestamp
    pub fn on_new_indicator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, Option<&str>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.new_indicator = Some(Arc::new(f));
        self
    }

    /// Set handler for connection status changes
    pub fn on_status<F>(mut self, f: F) -> Self
    where
        F: Fn(&Status) + Send + Sync + 'static,
    {
        self.status = Some(Arc::new(f));
        self
    }

    /// Set handler for non-fatal client errors
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(f));
        self
    }
}

impl UpdateSink for Handlers {
    fn on_update(&self, update: &UpdateEvent) -> Result<(), SinkError> {
        let tag = update.tag();
        match update {
            UpdateEvent::FeedUpdate(data) => {
                let f = self
                    .feed_update
                    .as_ref()
                    .context(sink_error::Unhandled { tag })?;
                f(data).context(sink_error::Failed { tag })
            }
            UpdateEvent::ReportUpdate(data) => {
                let f = self
                    .report_update
                    .as_ref()
                    .context(sink_error::Unhandled { tag })?;
                f(data).context(sink_error::Failed { tag })
            }
            UpdateEvent::NewIndicator(indicator, timestamp) => {
                let f = self
                    .new_indicator
                    .as_ref()
                    .context(sink_error::Unhandled { tag })?;
                f(indicator, timestamp.as_deref()).context(sink_error::Failed { tag })
            }
        }
    }

    fn on_status(&self, status: &Status) {
        if let Some(ref f) = self.status {
            f(status)
        }
    }

    fn on_error(&self, error: &Error) {
        if let Some(ref f) = self.error {
            f(error)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Route an update to the sink.
///
/// Never panics. Unhandled updates are dropped, handler failures and panics are logged and
/// reported to [`UpdateSink::on_error`].
pub fn dispatch<S: UpdateSink + ?Sized>(sink: &S, event: &UpdateEvent) {
    let tag = event.tag();

    log::trace!("Dispatch {} event to sink", tag);

    match panic::catch_unwind(AssertUnwindSafe(|| sink.on_update(event))) {
        Ok(Ok(())) => log::trace!("Sink handled {} event", tag),
        Ok(Err(SinkError::Unhandled { .. })) => {
            log::debug!("No handler for {} event, dropped", tag)
        }
        Ok(Err(err)) => {
            log::warn!("Sink failed when handle {} event: {}", tag, err);
            report_error(sink, &Error::SinkFailed { source: err });
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::warn!("Sink panicked when handle {} event: {}", tag, message);
            report_error(sink, &Error::SinkPanicked { tag, message });
        }
    }
}

/// Tell the sink connection status changed, panics are logged and swallowed.
pub fn notify_status<S: UpdateSink + ?Sized>(sink: &S, status: &Status) {
    log::debug!("Connection status: {}", status);

    if panic::catch_unwind(AssertUnwindSafe(|| sink.on_status(status))).is_err() {
        log::warn!("Sink panicked when handle status {}", status);
    }
}

/// Report a non-fatal error to the sink, panics are logged and swallowed.
pub fn report_error<S: UpdateSink + ?Sized>(sink: &S, err: &Error) {
    if panic::catch_unwind(AssertUnwindSafe(|| sink.on_error(err))).is_err() {
        log::warn!("Sink panicked when handle error: {}", err);
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_dispatch_routes_by_tag() {
        let feeds = Arc::new(Mutex::new(Vec::new()));
        let indicators = Arc::new(Mutex::new(Vec::new()));

        let handlers = Handlers::new()
            .on_feed_update({
                let feeds = feeds.clone();
                move |data| {
                    feeds.lock().unwrap().push(data.clone());
                    Ok(())
                }
            })
            .on_new_indicator({
                let indicators = indicators.clone();
                move |indicator, timestamp| {
                    indicators
                        .lock()
                        .unwrap()
                        .push((indicator.clone(), timestamp.map(str::to_string)));
                    Ok(())
                }
            });

        dispatch(&handlers, &UpdateEvent::FeedUpdate(json!({ "sources": [] })));
        dispatch(
            &handlers,
            &UpdateEvent::NewIndicator(json!({ "value": "evil.example" }), None),
        );

        assert_eq!(*feeds.lock().unwrap(), vec![json!({ "sources": [] })]);
        assert_eq!(
            *indicators.lock().unwrap(),
            vec![(json!({ "value": "evil.example" }), None)]
        );
    }

    #[test]
    fn test_dispatch_unhandled_is_dropped_silently() {
        let errors = Arc::new(Mutex::new(0));
        let handlers = Handlers::new().on_error({
            let errors = errors.clone();
            move |_| *errors.lock().unwrap() += 1
        });

        dispatch(&handlers, &UpdateEvent::ReportUpdate(json!({})));

        assert_eq!(*errors.lock().unwrap(), 0);
    }

    #[test]
    fn test_dispatch_reports_handler_failure() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let handlers = Handlers::new()
            .on_report_update(|_| Err("table missing".into()))
            .on_error({
                let errors = errors.clone();
                move |err| errors.lock().unwrap().push(err.to_string())
            });

        dispatch(&handlers, &UpdateEvent::ReportUpdate(json!({})));

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("table missing"), "{}", errors[0]);
    }

    #[test]
    fn test_dispatch_catches_panic() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let handlers = Handlers::new()
            .on_feed_update(|_| panic!("render exploded"))
            .on_error({
                let errors = errors.clone();
                move |err| errors.lock().unwrap().push(err.to_string())
            });

        dispatch(&handlers, &UpdateEvent::FeedUpdate(json!(null)));

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("render exploded"), "{}", errors[0]);
    }

    #[test]
    fn test_closure_is_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |event: &UpdateEvent| seen.lock().unwrap().push(event.tag())
        };

        dispatch(&sink, &UpdateEvent::ReportUpdate(json!({})));
        notify_status(&sink, &Status::Connected);

        assert_eq!(*seen.lock().unwrap(), vec!["report_update"]);
    }

    #[test]
    fn test_status_label() {
        assert_eq!(Status::ConnectionError("refused".into()).label(), "Connection Error");
        assert_eq!(
            Status::ConnectionError("refused".into()).to_string(),
            "Connection Error: refused"
        );
        assert_eq!(Status::Disconnected.severity(), "warning");
    }
}
