//! The shared shutdown signal ("halter") propagated through a session and its tunnels
//! (§5, §9 design notes — "module-level toggles... no process-global singletons").

use tokio::sync::watch;

/// Cloneable handle to a single shutdown signal. Every long-running task (accept loops,
/// shovel pumps) holds a clone and races it against I/O via `tokio::select!`.
#[derive(Clone)]
pub struct Halter {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for Halter {
    fn default() -> Self {
        Self::new()
    }
}

impl Halter {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Raises the signal for every holder of this halter and its clones. Idempotent.
    pub fn halt(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_halted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`Self::halt`] has been called. Safe to await from any number of
    /// tasks concurrently; already-halted callers return immediately.
    pub async fn halted(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn halted_resolves_after_halt_from_another_clone() {
        let halter = Halter::new();
        let other = halter.clone();

        let waiter = tokio::spawn(async move {
            other.halted().await;
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        halter.halt();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("halted() never resolved")
            .unwrap();
    }

    #[tokio::test]
    async fn halted_returns_immediately_if_already_halted() {
        let halter = Halter::new();
        halter.halt();
        tokio::time::timeout(Duration::from_millis(50), halter.halted())
            .await
            .expect("halted() blocked despite signal already raised");
    }

    #[test]
    fn is_halted_reflects_current_state() {
        let halter = Halter::new();
        assert!(!halter.is_halted());
        halter.halt();
        assert!(halter.is_halted());
    }
}
