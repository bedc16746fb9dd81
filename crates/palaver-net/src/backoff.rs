//! Reconnect bookkeeping, kept pure so the schedule is testable without a
//! socket.

use std::time::Duration;

use palaver_shared::constants::{RECONNECT_CEILING_MS, RECONNECT_MAX_ATTEMPTS};

/// Delay before reconnect `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at the 30 s ceiling.
pub fn reconnect_delay(base_ms: u64, attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(31);
    let delay = base_ms.saturating_mul(1u64 << doublings);
    Duration::from_millis(delay.min(RECONNECT_CEILING_MS))
}

/// Reconnect state carried across the lifetime of the connection manager:
/// created at init, reset on every successful connection, advanced on every
/// abnormal close, abandoned on manual logout.
#[derive(Debug)]
pub struct ReconnectState {
    pub attempts: u32,
    pub is_reconnecting: bool,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            is_reconnecting: false,
        }
    }

    /// A connection opened; the slate is wiped clean.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.is_reconnecting = false;
    }

    /// An abnormal close happened. Returns the delay to wait before the next
    /// attempt, or `None` once the attempt ceiling is exhausted (terminal;
    /// only a manual restart reconnects after that). A reconnect already in
    /// flight is never double-scheduled.
    pub fn schedule(&mut self, base_ms: u64) -> Option<Duration> {
        if self.is_reconnecting {
            return None;
        }
        self.attempts += 1;
        if self.attempts > RECONNECT_MAX_ATTEMPTS {
            return None;
        }
        self.is_reconnecting = true;
        Some(reconnect_delay(base_ms, self.attempts))
    }

    /// The scheduled wait elapsed and the next connect is starting.
    pub fn begin_attempt(&mut self) {
        self.is_reconnecting = false;
    }

    pub fn exhausted(&self) -> bool {
        self.attempts > RECONNECT_MAX_ATTEMPTS
    }
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let delays: Vec<u64> = (1..=5)
            .map(|attempt| reconnect_delay(3000, attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![3000, 6000, 12000, 24000, 30000]);
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        assert_eq!(
            reconnect_delay(3000, u32::MAX),
            Duration::from_millis(RECONNECT_CEILING_MS)
        );
    }

    #[test]
    fn schedule_walks_the_ladder_and_goes_terminal() {
        let mut state = ReconnectState::new();

        for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
            let delay = state.schedule(3000).expect("attempt within ceiling");
            assert_eq!(delay, reconnect_delay(3000, attempt));
            state.begin_attempt();
        }

        assert!(state.schedule(3000).is_none());
        assert!(state.exhausted());
    }

    #[test]
    fn in_flight_reconnect_is_not_double_scheduled() {
        let mut state = ReconnectState::new();
        assert!(state.schedule(3000).is_some());
        // Another abnormal-close signal before the timer fires.
        assert!(state.schedule(3000).is_none());
        assert_eq!(state.attempts, 1);
    }

    #[test]
    fn reset_wipes_the_slate() {
        let mut state = ReconnectState::new();
        state.schedule(3000);
        state.begin_attempt();
        state.reset();
        assert_eq!(state.attempts, 0);
        assert_eq!(
            state.schedule(3000).unwrap(),
            Duration::from_millis(3000)
        );
    }
}
