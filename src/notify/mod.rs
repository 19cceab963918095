// Notification module entrypoint
pub mod types;     // permission/state enums, records, payloads, stats
pub mod platform;  // injectable platform + audio capabilities
pub mod manager;   // permission-gated dispatch/queue state machine

pub use manager::{ClickHandler, Delivery, NotificationManager};
pub use platform::{AudioPlayer, LogAudio, LogPlatform, NotificationPlatform, PlatformEvent, PlatformEventHandler};
pub use types::{
    ExecutionReport, NotificationStats, NotifierState, PermissionState, Priority, QueuedNotification, RiskAlert,
    SignalAlert, Sound, SystemMessage,
};
