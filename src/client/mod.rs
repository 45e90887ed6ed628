//! Realtime update client.
//!
//! Owns one push channel, follows its lifecycle and reconnects with a fixed delay. After
//! too many consecutive disconnects it gives up the channel for the rest of the session and
//! falls back to polling the http api.

mod driver;
mod machine;

pub use machine::{
    ConnectionState, ReconnectPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};

use std::{
    collections::HashSet,
    fmt::Debug,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::stream::FuturesUnordered;
use snafu::prelude::*;
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    api::{self, UpdateFetcher},
    channel::PushChannel,
    config::Config,
    error,
    event::{UpdateEvent, UpdateKind},
    sink::{self, UpdateSink},
    ws::WsChannel,
    Result,
};
use driver::{Command, Driver};
use machine::Machine;

/// Default interval of polling fallback
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(30000);

/// Observable client state
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// connection state
    pub state: ConnectionState,
    /// consecutive reconnect attempts
    pub attempts: u32,
}

/// Realtime update client.
///
/// Create one per dashboard session with [`RealtimeClient::builder`], then call
/// [`init`](RealtimeClient::init) inside a tokio runtime. Dropping the client or calling
/// [`shutdown`](RealtimeClient::shutdown) releases the channel and stops all timers.
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    sink: Arc<dyn UpdateSink>,
    driver: Mutex<Option<Driver>>,
}

impl Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("snapshot", &*self.snapshot.borrow())
            .finish()
    }
}

impl RealtimeClient {
    /// Start building a client
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Build a client from config, with http api fetcher and websocket channel if push url is set.
    ///
    /// Http requests time out within one poll interval.
    pub fn from_config<S>(config: &Config, sink: S) -> Result<Self>
    where
        S: UpdateSink + 'static,
    {
        let timeout = config.poll_interval.min(api::DEFAULT_REQUEST_TIMEOUT);
        let api_client = api::Client::with_timeout(&config.api_url, timeout)
            .context(error::CreateAPIClientFailed)?;

        let mut builder = Self::builder()
            .policy(config.policy)
            .poll_interval(config.poll_interval)
            .poll_kinds(config.poll_kinds.iter().copied())
            .fetcher(api_client)
            .sink(sink);

        if let Some(ref push_url) = config.push_url {
            let channel = WsChannel::new(push_url, config.push_compress)
                .context(error::CreatePushChannelFailed)?;
            builder = builder.channel(channel);
        }

        builder.build()
    }

    /// Start the client on the current tokio runtime.
    ///
    /// Connects the push channel if there is one, otherwise starts polling right away.
    /// Calling it again does nothing. Outside a runtime it logs a warning and the client
    /// stays uninitialized.
    pub fn init(&self) {
        let mut pending = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if pending.is_none() {
            log::debug!("Realtime client already initialized");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                log::warn!("Realtime client not started: {}", err);
                return;
            }
        };

        if let Some(driver) = pending.take() {
            log::info!("Start realtime client");
            runtime.spawn(driver.run());
        }
    }

    /// Ask for fresh data of `kind`.
    ///
    /// Requested over the push channel when connected, fetched over http otherwise. The result
    /// arrives at the sink as a normal update.
    pub fn request_update(&self, kind: UpdateKind) {
        if self.commands.send(Command::Request(kind)).is_err() {
            log::warn!("Realtime client stopped, drop {} update request", kind);
        }
    }

    /// Hand an update to the sink, sink failures are reported and never propagated
    pub fn dispatch(&self, event: &UpdateEvent) {
        sink::dispatch(self.sink.as_ref(), event)
    }

    /// current connection state
    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    /// current consecutive reconnect attempts
    pub fn attempts(&self) -> u32 {
        self.snapshot.borrow().attempts
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Release channel, cancel timers and wait the client to stop
    pub async fn shutdown(&self) {
        let pending = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if pending.is_some() {
            log::debug!("Realtime client shutdown before init");
            return;
        }

        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(Some(done_tx))).is_ok() {
            let _ = done_rx.await;
        }

        log::info!("Realtime client stopped");
    }
}

/// [`RealtimeClient`] builder
#[derive(Default)]
pub struct Builder {
    policy: ReconnectPolicy,
    poll_interval: Option<Duration>,
    poll_kinds: Option<Vec<UpdateKind>>,
    channel: Option<Box<dyn PushChannel>>,
    fetcher: Option<Arc<dyn UpdateFetcher>>,
    sink: Option<Arc<dyn UpdateSink>>,
}

impl Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("policy", &self.policy)
            .field("poll_interval", &self.poll_interval)
            .field("poll_kinds", &self.poll_kinds)
            .field("channel", &self.channel)
            .field("fetcher", &self.fetcher.is_some())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Builder {
    /// Set reconnect policy, default 5 attempts with 5 seconds delay
    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set polling interval, default 30 seconds
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set data sets fetched on each poll, default feeds only
    pub fn poll_kinds<I: IntoIterator<Item = UpdateKind>>(mut self, kinds: I) -> Self {
        self.poll_kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Set push channel, without one the client polls from the start
    pub fn channel<C: PushChannel + 'static>(mut self, channel: C) -> Self {
        self.channel = Some(Box::new(channel));
        self
    }

    /// Set http fetcher, required
    pub fn fetcher<F: UpdateFetcher + 'static>(mut self, fetcher: F) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Set update sink, default one only logs updates
    pub fn sink<S: UpdateSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Build the client, nothing runs until [`RealtimeClient::init`]
    pub fn build(self) -> Result<RealtimeClient> {
        let fetcher = self.fetcher.context(error::NoFetcher)?;

        ensure!(!self.policy.delay().is_zero(), error::ReconnectDelayZero);

        let poll_interval = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        ensure!(!poll_interval.is_zero(), error::PollIntervalZero);

        let sink: Arc<dyn UpdateSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(|update: &UpdateEvent| log::info!("Unhandled {} update", update.tag())),
        };

        let machine = Machine::new(self.policy);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot {
            state: machine.state(),
            attempts: machine.attempts(),
        });

        let driver = Driver {
            machine,
            channel: self.channel,
            fetcher,
            sink: sink.clone(),
            poll_interval,
            poll_kinds: self.poll_kinds.unwrap_or_else(|| vec![UpdateKind::Feed]),
            commands: commands_rx,
            snapshot: snapshot_tx,
            channel_open: false,
            reconnect_at: None,
            poll_timer: None,
            fetches: FuturesUnordered::new(),
            in_flight: HashSet::new(),
        };

        Ok(RealtimeClient {
            commands: commands_tx,
            snapshot: snapshot_rx,
            sink,
            driver: Mutex::new(Some(driver)),
        })
    }
}
