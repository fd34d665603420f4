// MIT License - Copyright (c) 2026 telenot-bridge authors
// Readiness gate: one outbound command per panel poll

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Flow-control flag shared by the reader task and command senders.
///
/// `true` means the panel is listening and one command may be written.
/// Senders claim the gate atomically, so two concurrent commands can
/// never both see it open.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    tx: watch::Sender<bool>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    /// New gate, closed until the panel signals readiness.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_ready(&self) {
        self.tx.send_replace(true);
    }

    pub fn set_busy(&self) {
        self.tx.send_replace(false);
    }

    /// Flip ready to busy. Returns `false` if the gate was already busy.
    pub fn try_claim(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                *ready = false;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the gate can be claimed, then claim it.
    ///
    /// Returns `false` if `timeout` elapsed first. The gate is left untouched
    /// in that case.
    pub async fn claim(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut rx = self.tx.subscribe();
        loop {
            if self.try_claim() {
                return true;
            }
            // the borrow returned by wait_for must be released before claiming
            let woke = tokio::time::timeout_at(deadline, rx.wait_for(|ready| *ready))
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false);
            if !woke {
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_claim() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_ready());
        assert!(!gate.try_claim());

        gate.set_ready();
        assert!(gate.try_claim());
        assert!(!gate.is_ready());
        assert!(!gate.try_claim());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_times_out_when_busy() {
        let gate = ReadinessGate::new();
        let start = Instant::now();
        assert!(!gate.claim(Duration::from_secs(20)).await);
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert!(!gate.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_waits_for_ready() {
        let gate = ReadinessGate::new();
        let opener = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            opener.set_ready();
        });
        assert!(gate.claim(Duration::from_secs(20)).await);
        assert!(!gate.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_claimer_wins() {
        let gate = ReadinessGate::new();
        let a = tokio::spawn({
            let gate = gate.clone();
            async move { gate.claim(Duration::from_secs(5)).await }
        });
        let b = tokio::spawn({
            let gate = gate.clone();
            async move { gate.claim(Duration::from_secs(5)).await }
        });
        tokio::task::yield_now().await;
        gate.set_ready();

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a ^ b, "exactly one claim must succeed");
    }
}
