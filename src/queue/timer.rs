//! One-shot timer backing the acknowledgement timeout.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// A cancellable one-shot timer.
///
/// At most one deadline is armed at a time: arming cancels the previous
/// deadline before installing the new one.
#[derive(Debug, Default)]
pub struct OneShotTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl OneShotTimer {
    /// Creates a disarmed timer.
    #[must_use]
    pub const fn new() -> Self {
        Self { sleep: None }
    }

    /// Arms the timer to fire after `delay`, returning the deadline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm(&mut self, delay: Duration) -> Instant {
        self.cancel();
        let deadline = Instant::now() + delay;
        self.sleep = Some(Box::pin(tokio::time::sleep_until(deadline)));
        deadline
    }

    /// Disarms the timer. Returns true if it was armed.
    pub fn cancel(&mut self) -> bool {
        self.sleep.take().is_some()
    }

    /// Returns true if a deadline is pending.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Returns the pending deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|sleep| sleep.deadline())
    }

    /// Completes when the armed deadline passes, disarming the timer.
    ///
    /// Never completes while disarmed. Cancel safe: dropping the future
    /// keeps the deadline armed.
    pub async fn fired(&mut self) {
        if let Some(sleep) = self.sleep.as_mut() {
            sleep.await;
            self.sleep = None;
        } else {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let start = Instant::now();
        let mut timer = OneShotTimer::new();
        let deadline = timer.arm(Duration::from_secs(2));

        assert_eq!(timer.deadline(), Some(deadline));
        timer.fired().await;

        assert!(Instant::now() >= start + Duration::from_secs(2));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_deadline() {
        let mut timer = OneShotTimer::new();
        timer.arm(Duration::from_secs(1));
        let second = timer.arm(Duration::from_secs(10));
        assert_eq!(timer.deadline(), Some(second));

        tokio::time::advance(Duration::from_secs(2)).await;
        let early = tokio::time::timeout(Duration::ZERO, timer.fired()).await;
        assert!(early.is_err());
        assert!(timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_never_fires() {
        let mut timer = OneShotTimer::new();
        timer.arm(Duration::from_secs(1));
        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::advance(Duration::from_secs(5)).await;
        let result = tokio::time::timeout(Duration::ZERO, timer.fired()).await;
        assert!(result.is_err());
    }
}
