//! Reviewer notification seam and the newest-pending stamp.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

/// Outbound mail, fire-and-forget from the core's perspective. Transport
/// lives elsewhere; failures are the sender's problem, not the queue's.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str);
}

/// Sender that only logs. Used by processes without a mail transport.
pub struct LoggingNotifier;

#[async_trait]
impl NotificationSender for LoggingNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) {
        info!(to, subject, body_len = body.len(), "notification (not sent)");
    }
}

/// Small cache of the most recent pending-change timestamp.
///
/// Refreshed when a change is enqueued and invalidated by approve/reject,
/// this backs the "new pending changes" indicator without a queue scan per
/// page view. `None` means "unknown, recompute on next read".
#[derive(Default)]
pub struct NewestPendingStamp {
    inner: RwLock<Option<DateTime<Utc>>>,
}

impl NewestPendingStamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn refresh(&self, at: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        match *inner {
            Some(current) if current >= at => {}
            _ => *inner = Some(at),
        }
    }

    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }

    pub async fn get(&self) -> Option<DateTime<Utc>> {
        *self.inner.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_refresh_keeps_newest() {
        let stamp = NewestPendingStamp::new();
        let now = Utc::now();

        stamp.refresh(now).await;
        stamp.refresh(now - Duration::minutes(5)).await;
        assert_eq!(stamp.get().await, Some(now));

        let later = now + Duration::minutes(1);
        stamp.refresh(later).await;
        assert_eq!(stamp.get().await, Some(later));
    }

    #[tokio::test]
    async fn test_invalidate_clears() {
        let stamp = NewestPendingStamp::new();
        stamp.refresh(Utc::now()).await;
        stamp.invalidate().await;
        assert_eq!(stamp.get().await, None);
    }
}
