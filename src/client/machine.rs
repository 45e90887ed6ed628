use std::{fmt::Display, time::Duration};

use crate::sink::Status;

/// Default max reconnect attempts before falling back to polling
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Connection state of a realtime client
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// not initialized yet
    Disconnected,
    /// waiting a connect attempt or the delay before next attempt
    Connecting,
    /// push channel is connected
    Connected,
    /// push channel given up, data is fetched periodically, terminal for the session
    Polling,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Polling => "polling",
        })
    }
}

/// Fixed delay, bounded attempts reconnect policy
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy, a zero `delay` is rejected when building the client
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// consecutive disconnects tolerated before falling back to polling
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// wait time before each reconnect attempt
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Side effect requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    OpenChannel,
    ScheduleReconnect(Duration),
    CancelReconnect,
    ReleaseChannel,
    StartPolling,
    Notify(Status),
}

/// Connection state machine, free of any IO.
///
/// Every input returns the actions the driver should perform, in order.
#[derive(Debug)]
pub(crate) struct Machine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
    polling_started: bool,
}

impl Machine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
            polling_started: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn move_to(&mut self, state: ConnectionState) {
        if self.state != state {
            log::debug!("Move to {} state", state);
            self.state = state;
        }
    }

    pub fn init(&mut self, channel_available: bool) -> Vec<Action> {
        if self.state != ConnectionState::Disconnected {
            log::debug!("Already initialized, in {} state", self.state);
            return vec![];
        }

        if channel_available {
            self.move_to(ConnectionState::Connecting);
            vec![Action::OpenChannel]
        } else {
            log::warn!("Push channel not available, realtime updates disabled");
            self.enter_polling()
        }
    }

    pub fn on_connected(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Polling | ConnectionState::Disconnected => {
                log::debug!("Ignore connected event in {} state", self.state);
                vec![]
            }
            _ => {
                self.attempts = 0;
                self.move_to(ConnectionState::Connected);
                vec![Action::CancelReconnect, Action::Notify(Status::Connected)]
            }
        }
    }

    pub fn on_disconnected(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Polling | ConnectionState::Disconnected => {
                log::debug!("Ignore disconnected event in {} state", self.state);
                return vec![];
            }
            _ => {}
        }

        let mut actions = vec![Action::Notify(Status::Disconnected)];

        if self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            log::info!(
                "Attempting to reconnect in {:?} ({}/{})",
                self.policy.delay,
                self.attempts,
                self.policy.max_attempts
            );
            self.move_to(ConnectionState::Connecting);
            actions.push(Action::ScheduleReconnect(self.policy.delay));
        } else {
            log::info!("Max reconnection attempts reached, falling back to polling");
            actions.extend(self.enter_polling());
        }

        actions
    }

    pub fn on_connect_error(&mut self, reason: String) -> Vec<Action> {
        if self.state == ConnectionState::Polling {
            return vec![];
        }
        vec![Action::Notify(Status::ConnectionError(reason))]
    }

    pub fn on_reconnect_due(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            log::debug!("Ignore reconnect timer in {} state", self.state);
            return vec![];
        }

        if self.attempts >= self.policy.max_attempts {
            log::info!("Max reconnection attempts reached, falling back to polling");
            self.enter_polling()
        } else {
            vec![Action::OpenChannel]
        }
    }

    fn enter_polling(&mut self) -> Vec<Action> {
        if self.polling_started {
            return vec![];
        }

        self.polling_started = true;
        self.move_to(ConnectionState::Polling);

        vec![
            Action::CancelReconnect,
            Action::ReleaseChannel,
            Action::StartPolling,
            Action::Notify(Status::Polling),
        ]
    }
}
