//! Cooperative pause gate shared between a job's controller and its task.
//!
//! # Design
//! - A single atomic flag; `pause` and `resume` never block and are idempotent.
//! - The supervised task polls the flag every [`PAUSE_POLL_INTERVAL`] instead
//!   of waiting on a wake-up, so resumption is observed within one interval.
//! - Cancellation always wins over both states.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Polling interval while the gate is closed.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Returned when cancellation fires while a task waits on the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled while waiting on pause gate")]
pub struct PauseInterrupted;

/// Per-job pause flag.
#[derive(Debug, Default)]
pub struct PauseGate {
    paused: AtomicBool,
}

impl PauseGate {
    /// Open gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
        }
    }

    /// Close the gate; a no-op when already closed.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Open the gate; a no-op when already open.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Whether the gate is currently closed.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Return once the gate is open, polling while it is closed.
    ///
    /// # Errors
    ///
    /// Returns [`PauseInterrupted`] as soon as `cancel` fires, whether or not
    /// the gate is closed.
    pub async fn wait_while_paused(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), PauseInterrupted> {
        loop {
            if cancel.is_cancelled() {
                return Err(PauseInterrupted);
            }
            if !self.is_paused() {
                return Ok(());
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PauseInterrupted),
                () = tokio::time::sleep(PAUSE_POLL_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::{Instant, advance};

    use super::*;

    #[test]
    fn pause_and_resume_are_idempotent() {
        let gate = PauseGate::new();
        gate.resume();
        assert!(!gate.is_paused());
        gate.pause();
        gate.pause();
        assert!(gate.is_paused());
        gate.resume();
        assert!(!gate.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn open_gate_returns_immediately() {
        let gate = PauseGate::new();
        let started = Instant::now();
        assert_eq!(
            gate.wait_while_paused(&CancellationToken::new()).await,
            Ok(())
        );
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_is_observed_within_one_interval() -> Result<(), Box<dyn std::error::Error>> {
        let gate = Arc::new(PauseGate::new());
        gate.pause();
        let started = Instant::now();
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                gate.wait_while_paused(&CancellationToken::new())
                    .await
                    .map(|()| started.elapsed())
            })
        };
        tokio::task::yield_now().await;

        advance(Duration::from_millis(350)).await;
        assert!(!waiter.is_finished());
        gate.resume();
        let waited = waiter.await??;
        assert!(waited >= Duration::from_millis(350));
        assert!(waited <= Duration::from_millis(350) + PAUSE_POLL_INTERVAL);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_closed_gate() -> Result<(), Box<dyn std::error::Error>> {
        let gate = Arc::new(PauseGate::new());
        gate.pause();
        let cancel = CancellationToken::new();
        let waiter = {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.wait_while_paused(&cancel).await })
        };
        advance(Duration::from_millis(250)).await;
        cancel.cancel();
        assert_eq!(waiter.await?, Err(PauseInterrupted));
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_wins_over_open_gate() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            PauseGate::new().wait_while_paused(&cancel).await,
            Err(PauseInterrupted)
        );
    }
}
