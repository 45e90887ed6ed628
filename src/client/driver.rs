use std::{collections::HashSet, sync::Arc, time::Duration};

use futures_util::{future, future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, Interval, MissedTickBehavior},
};

use super::{
    machine::{Action, ConnectionState, Machine},
    Snapshot,
};
use crate::{
    api::{self, UpdateFetcher},
    channel::{ChannelEvent, PushChannel},
    error::Error,
    event::{UpdateEvent, UpdateKind},
    sink::{self, UpdateSink},
};

pub(crate) enum Command {
    Request(UpdateKind),
    Shutdown(Option<oneshot::Sender<()>>),
}

type Fetched = (UpdateKind, api::Result<Value>);

enum Wakeup {
    Command(Command),
    Channel(Option<ChannelEvent>),
    ReconnectDue,
    PollTick,
    Fetched(Fetched),
}

/// Owns the channel, timers and in-flight fetches of one client, runs on a single task.
pub(crate) struct Driver {
    pub machine: Machine,
    pub channel: Option<Box<dyn PushChannel>>,
    pub fetcher: Arc<dyn UpdateFetcher>,
    pub sink: Arc<dyn UpdateSink>,
    pub poll_interval: Duration,
    pub poll_kinds: Vec<UpdateKind>,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub snapshot: watch::Sender<Snapshot>,
    pub channel_open: bool,
    pub reconnect_at: Option<Instant>,
    pub poll_timer: Option<Interval>,
    pub fetches: FuturesUnordered<BoxFuture<'static, Fetched>>,
    pub in_flight: HashSet<UpdateKind>,
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn tick_or_pending(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => future::pending().await,
    }
}

async fn next_channel_event(channel: &mut Option<Box<dyn PushChannel>>) -> Option<ChannelEvent> {
    match channel {
        Some(channel) => channel.next_event().await,
        None => future::pending().await,
    }
}

impl Driver {
    pub async fn run(mut self) {
        log::debug!("Realtime driver start");

        let actions = self.machine.init(self.channel.is_some());
        self.apply(actions).await;

        loop {
            let wakeup = tokio::select! {
                biased;

                command = self.commands.recv() => {
                    // client handle dropped means page unloaded
                    Wakeup::Command(command.unwrap_or(Command::Shutdown(None)))
                }

                event = next_channel_event(&mut self.channel), if self.channel_open => {
                    Wakeup::Channel(event)
                }

                _ = sleep_until_or_pending(self.reconnect_at) => Wakeup::ReconnectDue,

                _ = tick_or_pending(&mut self.poll_timer) => Wakeup::PollTick,

                Some(fetched) = self.fetches.next(), if !self.fetches.is_empty() => {
                    Wakeup::Fetched(fetched)
                }
            };

            match wakeup {
                Wakeup::Command(Command::Request(kind)) => self.request(kind).await,
                Wakeup::Command(Command::Shutdown(done)) => {
                    self.teardown().await;
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    break;
                }
                Wakeup::Channel(event) => self.on_channel_event(event).await,
                Wakeup::ReconnectDue => {
                    log::trace!("Reconnect timer fired");
                    self.reconnect_at = None;
                    let actions = self.machine.on_reconnect_due();
                    self.apply(actions).await;
                }
                Wakeup::PollTick => {
                    log::debug!("Poll tick, fetching {:?}", self.poll_kinds);
                    for kind in self.poll_kinds.clone() {
                        self.start_fetch(kind);
                    }
                }
                Wakeup::Fetched((kind, result)) => self.on_fetched(kind, result),
            }
        }

        log::debug!("Realtime driver stopped");
    }

    fn publish(&self) {
        self.snapshot.send_replace(Snapshot {
            state: self.machine.state(),
            attempts: self.machine.attempts(),
        });
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            log::trace!("Apply {:?}", action);

            match action {
                Action::OpenChannel => {
                    // state is visible while the channel dials
                    self.publish();
                    if let Some(ref mut channel) = self.channel {
                        self.channel_open = true;
                        channel.connect().await;
                    }
                }
                Action::ScheduleReconnect(delay) => {
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                Action::CancelReconnect => {
                    self.reconnect_at = None;
                }
                Action::ReleaseChannel => {
                    self.channel_open = false;
                    if let Some(mut channel) = self.channel.take() {
                        log::debug!("Release push channel");
                        channel.disconnect().await;
                    }
                }
                Action::StartPolling => {
                    if self.poll_timer.is_none() {
                        log::info!("Start polling every {:?}", self.poll_interval);
                        let mut timer = tokio::time::interval_at(
                            Instant::now() + self.poll_interval,
                            self.poll_interval,
                        );
                        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        self.poll_timer = Some(timer);
                    }
                }
                Action::Notify(status) => sink::notify_status(self.sink.as_ref(), &status),
            }
        }

        self.publish();
    }

    async fn on_channel_event(&mut self, event: Option<ChannelEvent>) {
        let actions = match event {
            Some(ChannelEvent::Connected) => {
                log::info!("Connected to realtime push channel");
                self.machine.on_connected()
            }
            Some(ChannelEvent::Disconnected) => {
                log::info!("Disconnected from realtime push channel");
                self.machine.on_disconnected()
            }
            Some(ChannelEvent::ConnectError(err)) => {
                log::warn!("Push channel connection error: {}", err);
                let reason = err.to_string();
                sink::report_error(self.sink.as_ref(), &Error::TransportFailed { source: err });
                self.machine.on_connect_error(reason)
            }
            Some(ChannelEvent::Message { name, payload }) => {
                match UpdateEvent::decode(&name, payload) {
                    Ok(update) => {
                        log::debug!("Received {} from push channel", name);
                        sink::dispatch(self.sink.as_ref(), &update);
                    }
                    Err(err) => log::debug!("Drop channel message: {}", err),
                }
                return;
            }
            None => {
                log::warn!("Push channel stopped firing events");
                self.channel_open = false;
                self.machine.on_disconnected()
            }
        };

        self.apply(actions).await;
    }

    async fn request(&mut self, kind: UpdateKind) {
        if self.machine.state() == ConnectionState::Connected {
            if let Some(ref mut channel) = self.channel {
                match channel.emit(kind.request_event(), Value::Null).await {
                    Ok(()) => {
                        log::debug!("Requested {} update over push channel", kind);
                        return;
                    }
                    Err(err) => {
                        log::warn!("Request {} update over push channel failed: {}", kind, err);
                        sink::report_error(
                            self.sink.as_ref(),
                            &Error::TransportFailed { source: err },
                        );
                    }
                }
            }
        }

        log::debug!("Request {} update over http", kind);
        self.start_fetch(kind);
    }

    fn start_fetch(&mut self, kind: UpdateKind) {
        if !self.in_flight.insert(kind) {
            log::debug!("Fetch of {} update still in flight, skip", kind);
            return;
        }

        let fetcher = self.fetcher.clone();
        self.fetches
            .push(async move { (kind, fetcher.refresh(kind).await) }.boxed());
    }

    fn on_fetched(&mut self, kind: UpdateKind, result: api::Result<Value>) {
        self.in_flight.remove(&kind);

        match result {
            Ok(data) => {
                log::debug!("Fetched {} update", kind);
                sink::dispatch(self.sink.as_ref(), &UpdateEvent::from_refresh(kind, data));
            }
            Err(err) => {
                log::warn!("Fetch {} update failed: {}", kind, err);
                sink::report_error(self.sink.as_ref(), &Error::FetchFailed { kind, source: err });
            }
        }
    }

    async fn teardown(&mut self) {
        log::debug!("Tearing down realtime client");

        self.reconnect_at = None;
        self.poll_timer = None;
        self.fetches = FuturesUnordered::new();
        self.in_flight.clear();

        self.channel_open = false;
        if let Some(mut channel) = self.channel.take() {
            channel.disconnect().await;
        }
    }
}
