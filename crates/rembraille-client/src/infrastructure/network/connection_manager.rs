//! Connection manager: handshake, supervision and reconnects.
//!
//! ```text
//! Disconnected → Connecting → Handshaking → Connected → Reconnecting → Connecting …
//! ```
//!
//! One [`ConnectionManager`] exists per driver session.  [`connect`] spawns a
//! supervisor task that owns the whole state machine; the public methods only
//! signal it, read the published state, or write through the shared writer.
//!
//! # Teardown order
//!
//! Whenever a link ends, the supervisor aborts and joins both the receive
//! task and the keepalive task, then closes the write half, before the next
//! attempt starts.  Every write is bounded by the pong timeout, so a driver
//! `send` stuck on a host that stopped reading cannot stall teardown either.  No task from an old link can write to or report on a new
//! one.
//!
//! [`connect`]: ConnectionManager::connect

use std::sync::Arc;

use rembraille_core::protocol::messages::{HandshakeRequest, HandshakeResponse, PROTOCOL_MAJOR};
use rembraille_core::{
    BrailleMessage, CandidateList, CellBuffer, CellError, ConnectionState, Endpoint,
    FailureReason,
};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::application::dispatch::{SessionEvent, StatusEvent};
use crate::infrastructure::network::backoff::Backoff;
use crate::infrastructure::network::keepalive;
use crate::infrastructure::network::receive_loop::{self, HandshakeReply, ReceiveContext};
use crate::infrastructure::network::transport::Connector;
use crate::infrastructure::network::{
    ConnectionError, HandshakeError, NetworkConfig, SendError, SharedWriter,
};

/// Publishes state transitions to the watch channel and the event queue.
#[derive(Clone)]
struct StatusPublisher {
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::Sender<SessionEvent>,
}

impl StatusPublisher {
    fn publish(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next.clone());
        if previous == next {
            return;
        }
        info!(from = previous.label(), to = next.label(), "{next}");
        // Never block the supervisor on a driver that is not draining events.
        if let Err(e) = self
            .events
            .try_send(SessionEvent::Status(StatusEvent::StateChanged(next)))
        {
            warn!("dropping state change event: {e}");
        }
    }
}

/// State shared between the public handle and the supervisor task.
struct Shared {
    config: NetworkConfig,
    connector: Arc<dyn Connector>,
    writer: SharedWriter,
    status: StatusPublisher,
}

struct Supervisor {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the link to the host for one driver session.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
    supervisor: Mutex<Option<Supervisor>>,
}

/// How one pass at an endpoint ended.
enum LinkOutcome {
    /// `disconnect()` was called or the manager was dropped.
    Shutdown,
    /// Never reached Connected; try the next candidate.
    AttemptFailed(ConnectionError),
    /// Was Connected, then the link broke.
    Lost(ConnectionError),
    /// Incompatible host; stop for good.
    Fatal(FailureReason),
}

impl ConnectionManager {
    /// Creates a disconnected manager and the receiver for its session events.
    pub fn new(
        config: NetworkConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let writer = SharedWriter::with_write_timeout(config.pong_timeout);
        let shared = Arc::new(Shared {
            config,
            connector,
            writer,
            status: StatusPublisher {
                state: Arc::new(state_tx),
                events: events_tx,
            },
        });
        (
            Self {
                shared,
                state_rx,
                supervisor: Mutex::new(None),
            },
            events_rx,
        )
    }

    /// Starts (or restarts) connecting to `candidates`, front to back.
    ///
    /// Returns immediately; progress is reported through status events.  Any
    /// previous session, including a `Failed` one, is torn down first.  An
    /// empty list moves straight to `Failed`.
    pub async fn connect(&self, candidates: CandidateList) {
        let mut slot = self.supervisor.lock().await;
        Self::stop(slot.take(), &self.shared).await;

        if candidates.is_empty() {
            warn!("connect called without candidates");
            self.shared
                .status
                .publish(ConnectionState::Failed(FailureReason::NoCandidates));
            return;
        }

        info!(candidates = candidates.len(), "starting braille link");
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(supervise(shared, candidates, shutdown_rx));
        *slot = Some(Supervisor { shutdown, task });
    }

    /// Tears the link down and stays `Disconnected` until the next `connect`.
    pub async fn disconnect(&self) {
        let mut slot = self.supervisor.lock().await;
        Self::stop(slot.take(), &self.shared).await;
        self.shared.status.publish(ConnectionState::Disconnected);
    }

    /// Tears any link down and settles in `Failed(reason)`.
    ///
    /// Used when a session cannot even start, e.g. discovery found nothing,
    /// so status handlers still hear about it.
    pub async fn fail(&self, reason: FailureReason) {
        let mut slot = self.supervisor.lock().await;
        Self::stop(slot.take(), &self.shared).await;
        self.shared.status.publish(ConnectionState::Failed(reason));
    }

    async fn stop(supervisor: Option<Supervisor>, shared: &Shared) {
        if let Some(Supervisor { shutdown, task }) = supervisor {
            let _ = shutdown.send(true);
            if let Err(e) = task.await {
                warn!("supervisor task ended abnormally: {e}");
            }
        }
        shared.writer.detach().await;
    }

    /// Sends one display row.
    ///
    /// # Errors
    ///
    /// - [`SendError::NotConnected`] unless the session is `Connected`.
    /// - [`SendError::CellCountMismatch`] if the row length differs from the
    ///   negotiated cell count.
    /// - [`SendError::LinkDown`] if the write fails; the manager then moves to
    ///   `Reconnecting` and reports it through a status event.
    pub async fn send(&self, cells: &CellBuffer) -> Result<(), SendError> {
        let expected = self.status().cell_count().ok_or(SendError::NotConnected)?;
        cells
            .validate(usize::from(expected))
            .map_err(|CellError::CountMismatch { expected, actual }| {
                SendError::CellCountMismatch { expected, actual }
            })?;
        self.shared
            .writer
            .send(&BrailleMessage::Cells(cells.as_bytes().to_vec()))
            .await
    }

    /// The current state.
    pub fn status(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

async fn supervise(
    shared: Arc<Shared>,
    candidates: CandidateList,
    mut shutdown: watch::Receiver<bool>,
) {
    let cfg = &shared.config;
    let mut backoff = Backoff::new(cfg.backoff_base, cfg.backoff_cap);
    let mut rotation: Vec<Endpoint> = candidates.into_iter().collect();
    let mut attempt: u32 = 0;

    loop {
        let mut lost = None;
        for &endpoint in &rotation {
            match shared.run_link(endpoint, &mut shutdown, &mut backoff).await {
                LinkOutcome::Shutdown => {
                    debug!("supervisor stopping");
                    return;
                }
                LinkOutcome::Fatal(reason) => {
                    warn!(%endpoint, "giving up: {reason}");
                    shared.status.publish(ConnectionState::Failed(reason));
                    return;
                }
                LinkOutcome::AttemptFailed(e) => {
                    warn!(%endpoint, "connection attempt failed: {e}");
                }
                LinkOutcome::Lost(e) => {
                    warn!(%endpoint, "link lost: {e}");
                    lost = Some(endpoint);
                    break;
                }
            }
        }

        if let Some(endpoint) = lost {
            // A fresh outage: count retries from zero and try the host that
            // just worked before the others.
            attempt = 0;
            rotation.retain(|e| *e != endpoint);
            rotation.insert(0, endpoint);
        }

        attempt += 1;
        if let Some(max) = cfg.max_retries {
            if attempt > max {
                shared
                    .status
                    .publish(ConnectionState::Failed(FailureReason::RetriesExhausted {
                        attempts: attempt,
                    }));
                return;
            }
        }

        let delay = backoff.next_delay();
        shared
            .status
            .publish(ConnectionState::Reconnecting { attempt });
        info!(attempt, delay_ms = delay.as_millis() as u64, "waiting before reconnecting");
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => {
                debug!("supervisor stopping during backoff");
                return;
            }
        }
    }
}

impl Shared {
    async fn run_link(
        &self,
        endpoint: Endpoint,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> LinkOutcome {
        let cfg = &self.config;
        if *shutdown.borrow() {
            return LinkOutcome::Shutdown;
        }

        self.status.publish(ConnectionState::Connecting(endpoint));
        let (reader, writer) = tokio::select! {
            res = timeout(cfg.connect_timeout, self.connector.connect(endpoint)) => match res {
                Ok(Ok(halves)) => halves,
                Ok(Err(source)) => {
                    return LinkOutcome::AttemptFailed(ConnectionError::Connect { endpoint, source });
                }
                Err(_) => {
                    return LinkOutcome::AttemptFailed(ConnectionError::ConnectTimeout {
                        endpoint,
                        after: cfg.connect_timeout,
                    });
                }
            },
            _ = shutdown.changed() => return LinkOutcome::Shutdown,
        };

        self.status.publish(ConnectionState::Handshaking(endpoint));
        let mut link_failed = self.writer.attach(writer).await;
        let (hs_tx, hs_rx) = oneshot::channel();
        let (pong_tx, pong_rx) = watch::channel(0u64);
        let mut tasks = JoinSet::new();
        tasks.spawn(receive_loop::run(
            reader,
            ReceiveContext {
                events: self.status.events.clone(),
                writer: self.writer.clone(),
                handshake: Some(hs_tx),
                pongs: pong_tx,
            },
        ));

        let negotiated = tokio::select! {
            res = self.handshake(hs_rx, &mut tasks) => Some(res),
            _ = shutdown.changed() => None,
        };
        let response = match negotiated {
            None => {
                self.teardown(&mut tasks).await;
                return LinkOutcome::Shutdown;
            }
            Some(Ok(response)) => response,
            Some(Err(e)) => {
                self.teardown(&mut tasks).await;
                return match e {
                    ConnectionError::Handshake(h) => match fatal_reason(h) {
                        Ok(reason) => LinkOutcome::Fatal(reason),
                        Err(h) => LinkOutcome::AttemptFailed(h.into()),
                    },
                    other => LinkOutcome::AttemptFailed(other),
                };
            }
        };

        backoff.reset();
        info!(
            %endpoint,
            cells = response.cell_count,
            host = %response.server_name,
            version = %format!("{}.{}", response.major, response.minor),
            "handshake complete"
        );
        self.status.publish(ConnectionState::Connected {
            endpoint,
            cell_count: response.cell_count,
        });
        tasks.spawn(keepalive::run(
            self.writer.clone(),
            pong_rx,
            cfg.ping_interval,
            cfg.pong_timeout,
        ));

        let reason = tokio::select! {
            joined = tasks.join_next() => Some(joined_error(joined)),
            Ok(e) = &mut link_failed => Some(ConnectionError::Write(e)),
            _ = shutdown.changed() => None,
        };
        self.teardown(&mut tasks).await;
        match reason {
            Some(reason) => LinkOutcome::Lost(reason),
            None => LinkOutcome::Shutdown,
        }
    }

    /// Sends the request and waits for the receive task to deliver the response.
    async fn handshake(
        &self,
        response: oneshot::Receiver<HandshakeReply>,
        tasks: &mut JoinSet<ConnectionError>,
    ) -> Result<HandshakeResponse, ConnectionError> {
        let cfg = &self.config;
        let request = HandshakeRequest::current(cfg.client_name.clone(), cfg.capabilities);
        self.writer
            .send(&BrailleMessage::HandshakeRequest(request))
            .await
            .map_err(SendError::into_link_error)?;

        let response = match timeout(cfg.handshake_timeout, response).await {
            Err(_) => return Err(HandshakeError::Timeout(cfg.handshake_timeout).into()),
            Ok(Ok(reply)) => reply?,
            // The receive task ended first; report why.
            Ok(Err(_)) => return Err(joined_error(tasks.join_next().await)),
        };

        if response.major != PROTOCOL_MAJOR {
            return Err(HandshakeError::VersionMismatch {
                local: PROTOCOL_MAJOR,
                remote: response.major,
            }
            .into());
        }
        if response.cell_count == 0 {
            return Err(HandshakeError::CapabilityMismatch(
                "host reports a display with no cells".to_string(),
            )
            .into());
        }
        Ok(response)
    }

    /// Aborts and joins every link task, then closes the write half.
    ///
    /// Tasks go first: one of them may be parked in a write that holds the
    /// writer lock.
    async fn teardown(&self, tasks: &mut JoinSet<ConnectionError>) {
        tasks.shutdown().await;
        self.writer.detach().await;
        debug!("link torn down");
    }
}

fn joined_error(
    joined: Option<Result<ConnectionError, tokio::task::JoinError>>,
) -> ConnectionError {
    match joined {
        Some(Ok(e)) => e,
        Some(Err(e)) => ConnectionError::TaskFailed(e.to_string()),
        None => ConnectionError::Closed,
    }
}

/// The terminal reason for a fatal handshake error; retryable errors come
/// back unchanged.
fn fatal_reason(e: HandshakeError) -> Result<FailureReason, HandshakeError> {
    match e {
        HandshakeError::VersionMismatch { local, remote } => {
            Ok(FailureReason::VersionMismatch { local, remote })
        }
        HandshakeError::CapabilityMismatch(detail) => Ok(FailureReason::CapabilityMismatch(detail)),
        retryable @ HandshakeError::Timeout(_) => Err(retryable),
    }
}
