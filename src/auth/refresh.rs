//! Proactive refresh scheduling.
//!
//! On entering the authenticated state, a single timer is armed to fire
//! shortly before the session expires. At most one timer exists at a
//! time; re-arming cancels the previous one. When the timer fires a
//! [`RefreshDue`] event is delivered to the subscriber, which is
//! expected to re-authenticate (no working silent-refresh endpoint is
//! assumed, so refresh degrades to a fresh login redirect).

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::session::Session;

/// Proactive refresh buffer: fire this long before expiry.
pub const REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// Event delivered when the session should be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshDue;

/// Single-timer refresh scheduler.
pub struct RefreshScheduler {
    buffer: Duration,
    tx: mpsc::UnboundedSender<RefreshDue>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// Create a scheduler with the default 5-minute buffer.
    ///
    /// Returns the scheduler and the receiver on which [`RefreshDue`]
    /// events are delivered.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RefreshDue>) {
        Self::with_buffer(REFRESH_BUFFER)
    }

    /// Create a scheduler with a custom buffer.
    pub fn with_buffer(buffer: Duration) -> (Self, mpsc::UnboundedReceiver<RefreshDue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                buffer,
                tx,
                handle: Mutex::new(None),
            },
            rx,
        )
    }

    /// Arm the timer for the given session.
    ///
    /// Cancels any previously armed timer. If the session expires within
    /// the buffer already, the event fires immediately.
    pub fn arm(&self, session: &Session) {
        let until_expiry = session.time_until_expiry();
        let delay = until_expiry.saturating_sub(self.buffer);

        debug!(
            until_expiry_secs = until_expiry.as_secs(),
            delay_secs = delay.as_secs(),
            "Arming refresh timer"
        );

        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            // Receiver may be gone during shutdown; nothing to do then.
            let _ = tx.send(RefreshDue);
        });

        let mut guard = self.handle.lock().expect("lock poisoned");
        if let Some(previous) = guard.replace(task) {
            previous.abort();
        }
    }

    /// Cancel the armed timer, if any.
    pub fn disarm(&self) {
        let mut guard = self.handle.lock().expect("lock poisoned");
        if let Some(task) = guard.take() {
            task.abort();
            debug!("Refresh timer disarmed");
        }
    }

    /// Whether a timer is currently armed (and has not fired yet).
    pub fn is_armed(&self) -> bool {
        let guard = self.handle.lock().expect("lock poisoned");
        guard.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
