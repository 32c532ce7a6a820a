//! BrailleSession: the driver-facing facade.
//!
//! A screen-reader binding owns exactly one session.  It wires together the
//! settings, host discovery, the connection manager and the event pump:
//!
//! ```text
//! connect() ─▶ host override? ──yes──▶ [override]
//!                   │ no
//!                   ▼
//!              discover(last_connected) ─▶ CandidateList ─▶ ConnectionManager
//!
//! pump_events() ─▶ remember last Connected endpoint ─▶ driver handlers
//! ```

use std::sync::Arc;

use rembraille_core::{
    CandidateList, CellBuffer, ConnectionState, Endpoint, FailureReason, Gesture, KeyEvent,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::application::dispatch::{EventPump, SessionEvent, StatusEvent};
use crate::infrastructure::discovery::{DiscoveryError, HostDiscovery, NetworkProbe, SystemProbe};
use crate::infrastructure::network::{ConnectionManager, Connector, SendError, TcpConnector};
use crate::infrastructure::storage::{ClientConfig, ConfigStore};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("host discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// One braille display session on the guest.
pub struct BrailleSession<P = SystemProbe> {
    config: ClientConfig,
    /// Where `config` is persisted; `None` keeps everything in memory.
    store: Option<ConfigStore>,
    discovery: HostDiscovery<P>,
    manager: ConnectionManager,
    pump: EventPump,
}

impl BrailleSession<SystemProbe> {
    /// A session that probes the real network and connects over TCP.
    pub fn from_config(config: ClientConfig, store: Option<ConfigStore>) -> Self {
        Self::new(config, store, SystemProbe::default(), Arc::new(TcpConnector))
    }
}

impl<P: NetworkProbe> BrailleSession<P> {
    pub fn new(
        config: ClientConfig,
        store: Option<ConfigStore>,
        probe: P,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let discovery = HostDiscovery::new(probe, config.discovery_config());
        let (manager, events) = ConnectionManager::new(config.network_config(), connector);
        Self {
            config,
            store,
            discovery,
            manager,
            pump: EventPump::new(events),
        }
    }

    /// Connects if the settings ask for it; returns whether it did.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn start(&mut self) -> Result<bool, SessionError> {
        if !self.config.connection.auto_connect {
            info!("auto-connect disabled; waiting for an explicit connect");
            return Ok(false);
        }
        self.connect().await?;
        Ok(true)
    }

    /// Finds candidate hosts and hands them to the connection manager.
    ///
    /// A configured host bypasses discovery entirely.  Returns the candidates
    /// being tried; progress is reported through status events.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Discovery`] when discovery finds nothing.  The
    /// status handler also sees `Failed(NoCandidates)` in that case.
    pub async fn connect(&mut self) -> Result<CandidateList, SessionError> {
        let candidates = match self.config.host_override() {
            Some(endpoint) => {
                info!(%endpoint, "using configured host; skipping discovery");
                std::iter::once(endpoint).collect()
            }
            None => match self.discovery.discover(self.config.state.last_connected).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("{e}");
                    self.manager.fail(FailureReason::NoCandidates).await;
                    return Err(e.into());
                }
            },
        };
        self.manager.connect(candidates.clone()).await;
        Ok(candidates)
    }

    pub async fn disconnect(&mut self) {
        self.manager.disconnect().await;
    }

    /// Sends a row of exactly the negotiated length.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::send`].
    pub async fn send(&self, cells: &CellBuffer) -> Result<(), SendError> {
        self.manager.send(cells).await
    }

    /// Sends a row after padding or truncating it to the display size.
    ///
    /// # Errors
    ///
    /// [`SendError::NotConnected`] when no display size is negotiated yet,
    /// otherwise as [`ConnectionManager::send`].
    pub async fn display(&self, cells: Vec<u8>) -> Result<(), SendError> {
        let count = self
            .manager
            .status()
            .cell_count()
            .ok_or(SendError::NotConnected)?;
        self.manager
            .send(&CellBuffer::fit(cells, usize::from(count)))
            .await
    }

    pub fn on_key_event(&mut self, handler: impl FnMut(&KeyEvent) + Send + 'static) {
        self.pump.on_key_event(handler);
    }

    /// Registers a handler for mapped key presses; releases and unmapped
    /// keys are not delivered.
    pub fn on_gesture(&mut self, mut handler: impl FnMut(Gesture) + Send + 'static) {
        self.pump.on_key_event(move |key| {
            if !key.pressed {
                return;
            }
            match Gesture::from_key_id(key.code) {
                Some(gesture) => handler(gesture),
                None => debug!(key = key.code, "unmapped display key"),
            }
        });
    }

    pub fn on_status_change(&mut self, handler: impl FnMut(&StatusEvent) + Send + 'static) {
        self.pump.on_status_change(handler);
    }

    pub fn status(&self) -> ConnectionState {
        self.manager.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe_status()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Delivers every queued event to the registered handlers.
    pub fn pump_events(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.pump.try_next() {
            self.observe(&event);
            self.pump.deliver(&event);
            delivered += 1;
        }
        delivered
    }

    /// Waits for one event, delivers it and returns it.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let event = self.pump.next().await?;
        self.observe(&event);
        self.pump.deliver(&event);
        Some(event)
    }

    /// Remembers the endpoint of every session that reaches Connected.
    fn observe(&mut self, event: &SessionEvent) {
        let SessionEvent::Status(StatusEvent::StateChanged(ConnectionState::Connected {
            endpoint,
            ..
        })) = event
        else {
            return;
        };
        self.remember(*endpoint);
    }

    fn remember(&mut self, endpoint: Endpoint) {
        if self.config.state.last_connected == Some(endpoint) {
            return;
        }
        self.config.state.last_connected = Some(endpoint);
        let Some(store) = &self.store else { return };
        match store.save(&self.config) {
            Ok(()) => debug!(%endpoint, path = %store.path().display(), "saved last connected host"),
            Err(e) => warn!("could not save last connected host: {e}"),
        }
    }
}
