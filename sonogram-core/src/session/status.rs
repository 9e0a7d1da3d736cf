//! Session lifecycle state and the events published when it changes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::mode::Mode;

/// Where a session is in its lifecycle.
///
/// `Disconnected → Connected → AwaitingGrammar → Ready(mode) → Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "mode", rename_all = "camelCase")]
pub enum SessionState {
    /// Created, no connection attempted yet.
    Disconnected,
    /// Channel open, handshake not started.
    Connected,
    /// `requestGrammar` sent, waiting for the reply.
    AwaitingGrammar,
    /// Recognizing and forwarding results.
    Ready(Mode),
    /// Finished, cleanly or not. Terminal.
    Terminated,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated)
    }
}

/// Published on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    #[serde(flatten)]
    pub state: SessionState,
    /// Human-readable detail, the error message for an abnormal termination.
    pub detail: Option<String>,
}

/// Running counters for observability.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub results: AtomicU64,
    pub messages_queued: AtomicU64,
    pub inbound_dropped: AtomicU64,
    pub mode_switches: AtomicU64,
    pub grammar_updates: AtomicU64,
}

impl SessionStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            results: self.results.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            inbound_dropped: self.inbound_dropped.load(Ordering::Relaxed),
            mode_switches: self.mode_switches.load(Ordering::Relaxed),
            grammar_updates: self.grammar_updates.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub results: u64,
    pub messages_queued: u64,
    pub inbound_dropped: u64,
    pub mode_switches: u64,
    pub grammar_updates: u64,
}
