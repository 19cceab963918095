// Injectable notification and audio capabilities, plus headless
// implementations that render through tracing.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::FeedResult;
use crate::notify::types::{PermissionState, QueuedNotification, Sound};

/// Reported back by the platform for a notification it is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    Clicked(u64),
    Closed(u64),
}

pub type PlatformEventHandler = Arc<dyn Fn(PlatformEvent) + Send + Sync>;

#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    /// Whether a notification facility exists at all.
    fn is_supported(&self) -> bool;

    /// Current permission, read without prompting.
    fn permission(&self) -> FeedResult<PermissionState>;

    /// Prompt for permission. May stay pending until the user decides.
    async fn request_permission(&self) -> FeedResult<PermissionState>;

    fn can_notify(&self) -> bool;

    /// Show `notification` under `id`; clicks and closes are reported via `events`.
    fn show(&self, id: u64, notification: &QueuedNotification, events: PlatformEventHandler) -> FeedResult<()>;

    fn close(&self, id: u64);
}

pub trait AudioPlayer: Send + Sync {
    fn play(&self, sound: Sound) -> FeedResult<()>;
}

/// Headless platform: notifications become `info!` lines.
///
/// The session permission is fixed at construction; a request from
/// `Default` resolves to granted or denied according to `grant_on_request`.
pub struct LogPlatform {
    permission: Mutex<PermissionState>,
    grant_on_request: bool,
}

impl LogPlatform {
    pub fn new(permission: PermissionState, grant_on_request: bool) -> Self {
        Self { permission: Mutex::new(permission), grant_on_request }
    }
}

#[async_trait]
impl NotificationPlatform for LogPlatform {
    fn is_supported(&self) -> bool {
        true
    }

    fn permission(&self) -> FeedResult<PermissionState> {
        Ok(*self.permission.lock())
    }

    async fn request_permission(&self) -> FeedResult<PermissionState> {
        let mut permission = self.permission.lock();
        if *permission == PermissionState::Default {
            *permission = if self.grant_on_request { PermissionState::Granted } else { PermissionState::Denied };
        }
        Ok(*permission)
    }

    fn can_notify(&self) -> bool {
        *self.permission.lock() == PermissionState::Granted
    }

    fn show(&self, id: u64, n: &QueuedNotification, _events: PlatformEventHandler) -> FeedResult<()> {
        info!(id, priority = ?n.priority, tag = n.tag.as_deref().unwrap_or("-"), "[notify] {}: {}", n.title, n.body);
        Ok(())
    }

    fn close(&self, id: u64) {
        debug!(id, "[notify] closed");
    }
}

pub struct LogAudio;

impl AudioPlayer for LogAudio {
    fn play(&self, sound: Sound) -> FeedResult<()> {
        debug!(?sound, "[audio] play");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_platform_request_resolves_default_once() {
        let platform = LogPlatform::new(PermissionState::Default, true);
        assert!(!platform.can_notify());
        assert_eq!(platform.request_permission().await.unwrap(), PermissionState::Granted);
        assert!(platform.can_notify());

        let denied = LogPlatform::new(PermissionState::Denied, true);
        assert_eq!(denied.request_permission().await.unwrap(), PermissionState::Denied);
    }
}
