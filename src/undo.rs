use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::engine::EngineError;
use crate::limits::MAX_UNDO_WINDOWS;

/// A deferred reversal. Boxed so the registry can hold reversals over
/// arbitrary engine calls without knowing their shape.
pub type UndoAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), EngineError>> + Send>;

#[derive(Debug, PartialEq, Eq)]
pub enum UndoError {
    /// The window expired, was dismissed, was already consumed, or never
    /// existed. A benign signal, not an alarm.
    Expired,
}

impl std::fmt::Display for UndoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UndoError::Expired => write!(f, "undo window expired"),
        }
    }
}

impl std::error::Error for UndoError {}

struct UndoWindow {
    action: UndoAction,
    deadline: Instant,
}

/// Per-connection registry of once-only undo windows for destructive
/// actions. Windows live in connection memory only — a dropped
/// connection silently forfeits them.
///
/// Registering under a live key replaces the old window; invocation,
/// dismissal, and expiry all deregister the key, and every register
/// purges dead entries, so the map stays bounded over a session.
pub struct UndoRegistry {
    windows: Mutex<HashMap<String, UndoWindow>>,
}

impl Default for UndoRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoRegistry {
    pub fn new() -> Self {
        Self { windows: Mutex::new(HashMap::new()) }
    }

    /// Open an undo window. No two live windows share a key: an existing
    /// window under `key` is discarded and only the new action can fire.
    pub fn register(&self, key: impl Into<String>, ttl: Duration, action: UndoAction) {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();
        windows.retain(|_, w| w.deadline > now);
        if windows.len() >= MAX_UNDO_WINDOWS {
            // Evict the window closest to expiry rather than refusing.
            if let Some(oldest) = windows
                .iter()
                .min_by_key(|(_, w)| w.deadline)
                .map(|(k, _)| k.clone())
            {
                windows.remove(&oldest);
            }
        }
        windows.insert(key.into(), UndoWindow { action, deadline: now + ttl });
    }

    /// Take the action for `key`, exactly once. Fails `Expired` after
    /// the deadline or for a key with no live window.
    pub fn invoke(&self, key: &str) -> Result<UndoAction, UndoError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();
        let window = windows.remove(key).ok_or(UndoError::Expired)?;
        if window.deadline <= now {
            return Err(UndoError::Expired);
        }
        Ok(window.action)
    }

    /// Drop a window early (e.g. the user dismissed the toast).
    pub fn dismiss(&self, key: &str) {
        self.windows.lock().unwrap().remove(key);
    }

    pub fn len(&self) -> usize {
        self.windows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
