use std::time::Duration;

use tokio::time::Instant;

/// One-shot deferred hide.
///
/// Arming an armed timer keeps the original deadline; cancelling is a no-op
/// when nothing is armed.
#[derive(Debug, Clone)]
pub struct HideTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl HideTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Arms the timer unless it already runs. Returns whether it was armed now.
    pub fn arm(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.delay);
        true
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Disarms and returns `true` if the deadline has passed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Resolves once the armed deadline passes; never resolves while disarmed.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
