//! Store lifecycle.

use std::fmt;

use tokio::sync::watch;
use tracing::debug;

/// Connection state of a store.
///
/// `Init -> Connecting -> Connected`, or `Init -> Connecting -> Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreState {
    Init,
    Connecting,
    Connected,
    Disconnected,
}

impl StoreState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether the handshake has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected)
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus change notifications.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<StoreState>,
    directory: String,
}

impl StateCell {
    pub(crate) fn new(directory: String) -> Self {
        let (tx, _rx) = watch::channel(StoreState::Init);
        Self { tx, directory }
    }

    pub(crate) fn get(&self) -> StoreState {
        *self.tx.borrow()
    }

    pub(crate) fn set(&self, state: StoreState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            debug!(directory = %self.directory, from = %previous, to = %state, "Session store state changed");
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.tx.subscribe()
    }
}
