//! Per-connection keepalive task.
//!
//! Runs only while the session is Connected.  Sends a Ping every interval
//! through the shared write path and declares the host unresponsive when the
//! oldest unanswered Ping is older than the pong timeout, even if the socket
//! still looks healthy.

use std::collections::VecDeque;
use std::time::Duration;

use rembraille_core::protocol::TokenCounter;
use rembraille_core::BrailleMessage;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::infrastructure::network::{ConnectionError, SharedWriter};

/// Keepalive bookkeeping; lives entirely inside the keepalive task.
#[derive(Debug, Default)]
pub(crate) struct PingState {
    /// Unanswered pings, oldest first.
    outstanding: VecDeque<(u64, Instant)>,
    pub last_sent_at: Option<Instant>,
    pub last_ack_at: Option<Instant>,
}

impl PingState {
    pub fn on_sent(&mut self, token: u64, at: Instant) {
        self.outstanding.push_back((token, at));
        self.last_sent_at = Some(at);
    }

    /// Clears every ping up to and including `token`.  Token 0 comes from
    /// hosts that send empty Pong payloads and clears everything.
    ///
    /// Returns how many pings were acknowledged.
    pub fn on_ack(&mut self, token: u64, at: Instant) -> usize {
        let before = self.outstanding.len();
        if token == 0 {
            self.outstanding.clear();
        } else {
            while matches!(self.outstanding.front(), Some(&(t, _)) if t <= token) {
                self.outstanding.pop_front();
            }
        }
        let acked = before - self.outstanding.len();
        if acked > 0 {
            self.last_ack_at = Some(at);
        }
        acked
    }

    /// When the oldest unanswered ping expires, if any is outstanding.
    pub fn timeout_deadline(&self, pong_timeout: Duration) -> Option<Instant> {
        self.outstanding.front().map(|&(_, sent)| sent + pong_timeout)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

/// Runs until the link fails and returns the reason.
pub(crate) async fn run(
    writer: SharedWriter,
    mut pongs: watch::Receiver<u64>,
    ping_interval: Duration,
    pong_timeout: Duration,
) -> ConnectionError {
    let tokens = TokenCounter::new();
    let mut state = PingState::default();
    let mut ticker = interval_at(Instant::now() + ping_interval, ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(?ping_interval, ?pong_timeout, "keepalive started");

    loop {
        let deadline = state.timeout_deadline(pong_timeout);

        tokio::select! {
            _ = ticker.tick() => {
                let token = tokens.next();
                let sent_at = Instant::now();
                state.on_sent(token, sent_at);
                // A host that stops reading blocks this write; the pong
                // deadline still applies while it is pending.
                let expires = state
                    .timeout_deadline(pong_timeout)
                    .unwrap_or(sent_at + pong_timeout);
                match timeout_at(expires, writer.send(&BrailleMessage::Ping(token))).await {
                    Ok(Ok(())) => trace!(token, outstanding = state.outstanding(), "ping sent"),
                    Ok(Err(e)) => return e.into_link_error(),
                    Err(_) => {
                        warn!(
                            outstanding = state.outstanding(),
                            "ping write blocked past {pong_timeout:?}; host unresponsive"
                        );
                        return ConnectionError::Unresponsive(pong_timeout);
                    }
                }
            }
            changed = pongs.changed() => {
                if changed.is_err() {
                    // The receive task is gone; its own error reaches the supervisor.
                    return ConnectionError::Closed;
                }
                let token = *pongs.borrow_and_update();
                let acked = state.on_ack(token, Instant::now());
                trace!(token, acked, "pong matched");
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                warn!(
                    outstanding = state.outstanding(),
                    since_last_ping = ?state.last_sent_at.map(|t| t.elapsed()),
                    since_last_pong = ?state.last_ack_at.map(|t| t.elapsed()),
                    "no pong within {pong_timeout:?}; host unresponsive"
                );
                return ConnectionError::Unresponsive(pong_timeout);
            }
        }
    }
}
