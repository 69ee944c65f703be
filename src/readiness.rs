//! Cross-task readiness signaling.
//!
//! [`Readiness`] is the shared, monotonic flag set other firmware tasks
//! wait on before touching the pub/sub surface. Bits are set exactly once
//! per session lifetime and never cleared; restarting means dropping the
//! value and creating a fresh one.

use tokio::sync::watch;

/// Lifecycle milestone bits.
pub mod flag {
    /// The session opened successfully.
    pub const CONNECTED: u32 = 1 << 1;

    /// The declarer finished attempting every applicable resource.
    pub const DECLARED: u32 = 1 << 2;

    /// Shutdown was requested.
    pub const STOP_REQUESTED: u32 = 1 << 3;

    /// Reserved for the application (e.g. a transfer-complete marker);
    /// never touched by the manager.
    pub const APP_EVENT: u32 = 1 << 4;
}

/// Shared monotonic readiness flags.
///
/// Cheap to clone; all clones observe the same bits. Waiting is
/// level-triggered: a bit already set satisfies `wait` immediately.
///
/// # Example
///
/// ```
/// use overlink::{flag, Readiness};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let readiness = Readiness::new();
/// let waiter = readiness.clone();
///
/// readiness.set(flag::CONNECTED | flag::DECLARED);
/// waiter.wait(flag::DECLARED).await;
/// assert!(waiter.is_set(flag::CONNECTED));
/// # }
/// ```
#[derive(Clone)]
pub struct Readiness {
    tx: watch::Sender<u32>,
}

impl Readiness {
    /// Create a fresh flag set with no bits raised.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Raise `bits`. Setting is monotonic; already-set bits stay set.
    pub fn set(&self, bits: u32) {
        self.tx.send_modify(|value| *value |= bits);
    }

    /// Whether every bit in `mask` is currently set.
    pub fn is_set(&self, mask: u32) -> bool {
        *self.tx.borrow() & mask == mask
    }

    /// Current raw value.
    pub fn snapshot(&self) -> u32 {
        *self.tx.borrow()
    }

    /// Wait until every bit in `mask` is set.
    pub async fn wait(&self, mask: u32) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for cannot observe a closed
        // channel.
        let _ = rx.wait_for(|value| value & mask == mask).await;
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn bits_accumulate_monotonically() {
        // ---
        let readiness = Readiness::new();

        readiness.set(flag::CONNECTED);
        readiness.set(flag::DECLARED);

        assert!(readiness.is_set(flag::CONNECTED));
        assert!(readiness.is_set(flag::CONNECTED | flag::DECLARED));
        assert!(!readiness.is_set(flag::STOP_REQUESTED));
        assert_eq!(readiness.snapshot(), flag::CONNECTED | flag::DECLARED);
    }

    #[tokio::test]
    async fn wait_is_level_triggered() {
        // ---
        let readiness = Readiness::new();
        readiness.set(flag::DECLARED);

        // Already-set bits satisfy the wait without a new notification.
        timeout(Duration::from_millis(100), readiness.wait(flag::DECLARED))
            .await
            .expect("wait should complete immediately");
    }

    #[tokio::test]
    async fn wait_wakes_on_set() {
        // ---
        let readiness = Readiness::new();
        let waiter = readiness.clone();

        let handle = tokio::spawn(async move {
            waiter.wait(flag::CONNECTED | flag::DECLARED).await;
        });

        readiness.set(flag::CONNECTED);
        readiness.set(flag::DECLARED);

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .expect("waiter task should not panic");
    }
}
