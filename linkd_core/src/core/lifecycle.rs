//! The connection lifecycle state machine.
//!
//! `ConnectionState` is pure: it never touches a client, a store or a timer.
//! Every transition returns what the caller has to do next, and the
//! [`SessionManager`](crate::core::session_manager::SessionManager) driver
//! carries that out.

use std::time::Duration;

use log::info;
use serde::Serialize;

use crate::connections::client::CloseReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Disconnected,
    Connecting,
    QrNeeded,
    Connected,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Disconnected => "DISCONNECTED",
            Phase::Connecting => "CONNECTING",
            Phase::QrNeeded => "QR_NEEDED",
            Phase::Connected => "CONNECTED",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded linear backoff plus the logout policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Automatic reconnects allowed before parking.
    pub max_retries: u32,
    /// Delay added per attempt.
    pub step: Duration,
    /// Upper bound on a single delay.
    pub cap: Duration,
    /// Start a fresh connect right after a logout wiped the credentials.
    pub restart_on_logout: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            step: Duration::from_millis(2000),
            cap: Duration::from_millis(10_000),
            restart_on_logout: true,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (1-based, post-increment).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.cap)
    }
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// Nothing to schedule.
    Stay,
    /// Arm the reconnect timer.
    ReconnectAfter(Duration),
    /// Connect again right away.
    ReconnectNow,
    /// Credentials are invalid: delete them, then connect again if `restart`.
    WipeCredentials { restart: bool },
}

/// Outcome of an external reconnect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualReconnect {
    AlreadyConnected,
    /// The caller must start a fresh connect.
    Initiated,
    /// An attempt is in flight; only the retry counter was reset.
    RetriesReset,
}

impl ManualReconnect {
    pub fn message(&self) -> &'static str {
        match self {
            ManualReconnect::AlreadyConnected => "Already connected",
            ManualReconnect::Initiated => "Connection initiated",
            ManualReconnect::RetriesReset => "Already connecting or QR pending. Retries reset.",
        }
    }
}

/// Read-only copy of the state handed to status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub phase: Phase,
    pub pending_challenge: Option<String>,
    pub retry_count: u32,
    pub parked: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectionState {
    phase: Phase,
    pending_challenge: Option<String>,
    retry_count: u32,
    parked: bool,
    /// Credentials are being wiped and a fresh connect follows.
    restarting: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Disconnected,
            pending_challenge: None,
            retry_count: 0,
            parked: false,
            restarting: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending_challenge(&self) -> Option<&str> {
        self.pending_challenge.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            phase: self.phase,
            pending_challenge: self.pending_challenge.clone(),
            retry_count: self.retry_count,
            parked: self.parked,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if phase != Phase::QrNeeded {
            self.pending_challenge = None;
        }
        if self.phase != phase {
            info!("Session phase {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// A new session client is about to be instantiated.
    pub fn begin_connect(&mut self) {
        self.parked = false;
        self.restarting = false;
        self.set_phase(Phase::Connecting);
    }

    /// The network issued (or renewed) an authentication challenge.
    pub fn on_challenge(&mut self, payload: String) {
        self.set_phase(Phase::QrNeeded);
        self.pending_challenge = Some(payload);
    }

    pub fn on_opened(&mut self) {
        self.set_phase(Phase::Connected);
        self.retry_count = 0;
        self.parked = false;
    }

    /// The link closed. Terminal reasons return to `Disconnected`, everything
    /// else stays in `Connecting` and consumes one retry.
    pub fn on_closed(&mut self, reason: &CloseReason, policy: &ReconnectPolicy) -> NextAction {
        if reason.is_terminal() {
            self.set_phase(Phase::Disconnected);
            self.restarting = policy.restart_on_logout;
            return NextAction::WipeCredentials {
                restart: policy.restart_on_logout,
            };
        }

        self.set_phase(Phase::Connecting);
        if self.retry_count < policy.max_retries {
            self.retry_count += 1;
            let delay = policy.delay_for(self.retry_count);
            info!(
                "Reconnecting in {}ms (attempt {})",
                delay.as_millis(),
                self.retry_count
            );
            NextAction::ReconnectAfter(delay)
        } else {
            info!("Max retries reached. Waiting for manual reconnect.");
            self.parked = true;
            NextAction::Stay
        }
    }

    /// The post-logout restart will not happen, the wipe failed.
    pub fn abandon_restart(&mut self) {
        self.restarting = false;
    }

    /// External reconnect request. A parked session has nothing in flight, so
    /// it is restarted like a disconnected one. A logout restart counts as in
    /// flight even while the phase reads `Disconnected`.
    pub fn manual_reconnect(&mut self) -> ManualReconnect {
        if self.phase == Phase::Connected {
            return ManualReconnect::AlreadyConnected;
        }
        self.retry_count = 0;
        if self.restarting {
            ManualReconnect::RetriesReset
        } else if self.phase == Phase::Disconnected || self.parked {
            self.begin_connect();
            ManualReconnect::Initiated
        } else {
            ManualReconnect::RetriesReset
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lost() -> CloseReason {
        CloseReason::ConnectionLost
    }

    #[test]
    fn retry_count_and_delay_follow_consecutive_closes() {
        let policy = ReconnectPolicy::default();
        let mut state = ConnectionState::new();
        state.begin_connect();

        for n in 1..=10u32 {
            let action = state.on_closed(&lost(), &policy);
            assert_eq!(state.retry_count(), n);
            let expected = Duration::from_millis(u64::from((n * 2000).min(10_000)));
            assert_eq!(action, NextAction::ReconnectAfter(expected), "close #{n}");
            state.begin_connect();
        }

        let action = state.on_closed(&lost(), &policy);
        assert_eq!(action, NextAction::Stay);
        assert_eq!(state.retry_count(), 10);
        assert_eq!(state.phase(), Phase::Connecting);
        assert!(state.is_parked());
    }

    #[test]
    fn challenge_then_open_clears_everything() {
        let policy = ReconnectPolicy::default();
        let mut state = ConnectionState::new();
        state.begin_connect();
        state.on_closed(&lost(), &policy);
        state.begin_connect();

        state.on_challenge("qr-1".into());
        assert_eq!(state.phase(), Phase::QrNeeded);
        assert_eq!(state.pending_challenge(), Some("qr-1"));

        state.on_challenge("qr-2".into());
        assert_eq!(state.pending_challenge(), Some("qr-2"));

        state.on_opened();
        assert_eq!(state.phase(), Phase::Connected);
        assert_eq!(state.pending_challenge(), None);
        assert_eq!(state.retry_count(), 0);
    }

    #[test]
    fn logout_clears_challenge_from_any_phase() {
        let policy = ReconnectPolicy {
            restart_on_logout: false,
            ..ReconnectPolicy::default()
        };
        let mut state = ConnectionState::new();
        state.begin_connect();
        state.on_challenge("qr".into());

        let action = state.on_closed(&CloseReason::LoggedOut, &policy);
        assert_eq!(action, NextAction::WipeCredentials { restart: false });
        assert_eq!(state.phase(), Phase::Disconnected);
        assert_eq!(state.pending_challenge(), None);

        state.begin_connect();
        state.on_opened();
        let action = state.on_closed(&CloseReason::LoggedOut, &ReconnectPolicy::default());
        assert_eq!(action, NextAction::WipeCredentials { restart: true });
        assert_eq!(state.phase(), Phase::Disconnected);
    }

    #[test]
    fn manual_reconnect_waits_for_logout_restart() {
        let mut state = ConnectionState::new();
        state.begin_connect();
        state.on_opened();

        let action = state.on_closed(&CloseReason::LoggedOut, &ReconnectPolicy::default());
        assert_eq!(action, NextAction::WipeCredentials { restart: true });
        assert_eq!(state.phase(), Phase::Disconnected);
        assert_eq!(state.manual_reconnect(), ManualReconnect::RetriesReset);

        state.begin_connect();
        assert_eq!(state.manual_reconnect(), ManualReconnect::RetriesReset);
    }

    #[test]
    fn abandoned_restart_allows_manual_connect() {
        let mut state = ConnectionState::new();
        state.begin_connect();
        state.on_closed(&CloseReason::LoggedOut, &ReconnectPolicy::default());
        state.abandon_restart();

        assert_eq!(state.phase(), Phase::Disconnected);
        assert_eq!(state.manual_reconnect(), ManualReconnect::Initiated);
        assert_eq!(state.phase(), Phase::Connecting);
    }

    #[test]
    fn recoverable_close_leaves_qr_phase() {
        let mut state = ConnectionState::new();
        state.begin_connect();
        state.on_challenge("qr".into());
        state.on_closed(&CloseReason::Other(Some(515)), &ReconnectPolicy::default());
        assert_eq!(state.phase(), Phase::Connecting);
        assert_eq!(state.pending_challenge(), None);
    }

    #[test]
    fn manual_reconnect_outcomes() {
        let policy = ReconnectPolicy::default();
        let mut state = ConnectionState::new();

        assert_eq!(state.manual_reconnect(), ManualReconnect::Initiated);
        assert_eq!(state.phase(), Phase::Connecting);
        assert_eq!(state.manual_reconnect(), ManualReconnect::RetriesReset);

        state.on_closed(&lost(), &policy);
        assert_eq!(state.retry_count(), 1);
        assert_eq!(state.manual_reconnect(), ManualReconnect::RetriesReset);
        assert_eq!(state.retry_count(), 0);

        state.on_opened();
        assert_eq!(state.manual_reconnect(), ManualReconnect::AlreadyConnected);
    }

    #[test]
    fn manual_reconnect_restarts_a_parked_session() {
        let policy = ReconnectPolicy {
            max_retries: 1,
            ..ReconnectPolicy::default()
        };
        let mut state = ConnectionState::new();
        state.begin_connect();
        state.on_closed(&lost(), &policy);
        state.begin_connect();
        assert_eq!(state.on_closed(&lost(), &policy), NextAction::Stay);

        assert_eq!(state.manual_reconnect(), ManualReconnect::Initiated);
        assert_eq!(state.retry_count(), 0);
        assert!(!state.is_parked());
    }

    #[test]
    fn delay_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(9), Duration::from_millis(10_000));
    }
}
