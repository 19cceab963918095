//! Notification records, domain payloads and the manager's state types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform authorization for showing notifications. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    Default,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Lifecycle of the notification manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifierState {
    Uninitialized,
    Initializing,
    ReadyGranted,
    ReadyDefault,
    ReadyDenied,
}

impl NotifierState {
    pub fn from_permission(permission: PermissionState) -> Self {
        match permission {
            PermissionState::Granted => Self::ReadyGranted,
            PermissionState::Default => Self::ReadyDefault,
            PermissionState::Denied => Self::ReadyDenied,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::ReadyGranted | Self::ReadyDefault | Self::ReadyDenied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sound {
    Chime,
    Alert,
}

impl Sound {
    pub fn for_priority(priority: Priority) -> Self {
        if priority >= Priority::High {
            Sound::Alert
        } else {
            Sound::Chime
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedNotification {
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueuedNotification {
    pub fn new(title: impl Into<String>, body: impl Into<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority,
            tag: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Derived projection of the manager's state. Recomputed on every read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub enabled: bool,
    pub permission: PermissionState,
    pub active_count: usize,
    pub queued_count: usize,
    pub sound_enabled: bool,
    pub error: Option<String>,
}

// ---- domain payloads ----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalAlert {
    pub symbol: String,
    pub direction: String,
    pub confidence: Option<f64>,
    pub entry_price: Option<f64>,
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub severity: Priority,
    pub message: String,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub title: String,
    pub message: String,
    pub priority: Priority,
}

// Signals at or above this confidence are raised as high priority.
const HIGH_CONFIDENCE: f64 = 0.8;

impl From<&SignalAlert> for QueuedNotification {
    fn from(s: &SignalAlert) -> Self {
        let mut body = match s.entry_price {
            Some(px) => format!("Entry {px}"),
            None => "Market entry".to_string(),
        };
        if let Some(c) = s.confidence {
            body.push_str(&format!(", confidence {:.0}%", c * 100.0));
        }
        if let Some(strategy) = &s.strategy {
            body.push_str(&format!(" ({strategy})"));
        }
        let priority = match s.confidence {
            Some(c) if c >= HIGH_CONFIDENCE => Priority::High,
            _ => Priority::Normal,
        };
        QueuedNotification::new(
            format!("{} signal: {}", s.direction.to_uppercase(), s.symbol),
            body,
            priority,
        )
        .with_tag(format!("signal-{}", s.symbol))
    }
}

impl From<&RiskAlert> for QueuedNotification {
    fn from(r: &RiskAlert) -> Self {
        match &r.symbol {
            Some(sym) => QueuedNotification::new(format!("Risk alert: {sym}"), r.message.clone(), r.severity)
                .with_tag(format!("risk-{sym}")),
            None => QueuedNotification::new("Risk alert", r.message.clone(), r.severity),
        }
    }
}

impl From<&ExecutionReport> for QueuedNotification {
    fn from(e: &ExecutionReport) -> Self {
        QueuedNotification::new(
            format!("Order {}: {}", e.status, e.symbol),
            format!("{} {} @ {}", e.side.to_uppercase(), e.quantity, e.price),
            Priority::Normal,
        )
    }
}

impl From<&SystemMessage> for QueuedNotification {
    fn from(m: &SystemMessage) -> Self {
        QueuedNotification::new(m.title.clone(), m.message.clone(), m.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sound_by_priority() {
        assert_eq!(Sound::for_priority(Priority::Low), Sound::Chime);
        assert_eq!(Sound::for_priority(Priority::Normal), Sound::Chime);
        assert_eq!(Sound::for_priority(Priority::High), Sound::Alert);
        assert_eq!(Sound::for_priority(Priority::Critical), Sound::Alert);
    }

    #[test]
    fn test_signal_normalisation() {
        let n = QueuedNotification::from(&SignalAlert {
            symbol: "BTC/USDT".into(),
            direction: "long".into(),
            confidence: Some(0.85),
            entry_price: Some(64000.0),
            strategy: Some("breakout".into()),
        });
        assert_eq!(n.title, "LONG signal: BTC/USDT");
        assert_eq!(n.body, "Entry 64000, confidence 85% (breakout)");
        assert_eq!(n.priority, Priority::High);
        assert_eq!(n.tag.as_deref(), Some("signal-BTC/USDT"));
    }

    #[test]
    fn test_stats_serialise_camel_case() {
        let stats = NotificationStats {
            enabled: false,
            permission: PermissionState::Default,
            active_count: 0,
            queued_count: 2,
            sound_enabled: true,
            error: None,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["permission"], "default");
        assert_eq!(json["queuedCount"], 2);
        assert_eq!(json["soundEnabled"], true);
    }
}
