//! Notification manager.
//!
//! A permission-gated state machine in front of a [`NotificationPlatform`].
//! Domain payloads are normalised into [`QueuedNotification`]s; while the
//! manager is `ReadyGranted` (and the user has not switched notifications
//! off) they are shown at once, otherwise they wait in a bounded queue that
//! drains as soon as the manager enters `ReadyGranted`.
//!
//! Denial is terminal from the manager's side: it never requests permission
//! again once denied. A later grant made on the platform itself is picked up
//! by re-running [`NotificationManager::initialize`].

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::config::NotifyConfig;
use crate::error::FeedError;
use crate::events::types::{EventPayload, TelemetryEvent};
use crate::notify::platform::{AudioPlayer, NotificationPlatform, PlatformEvent, PlatformEventHandler};
use crate::notify::types::{
    ExecutionReport, NotificationStats, NotifierState, PermissionState, Priority, QueuedNotification, RiskAlert,
    SignalAlert, Sound, SystemMessage,
};

pub type ClickHandler = Arc<dyn Fn(&QueuedNotification) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the platform under this id.
    Shown(u64),
    Queued,
}

struct ManagerState {
    phase: NotifierState,
    permission: PermissionState,
    user_enabled: bool,
    sound_enabled: bool,
    max_queued: usize,
    active: BTreeMap<u64, QueuedNotification>,
    queued: VecDeque<QueuedNotification>,
    next_id: u64,
    error: Option<String>,
    on_click: Option<ClickHandler>,
}

impl ManagerState {
    fn can_dispatch(&self) -> bool {
        self.phase == NotifierState::ReadyGranted && self.user_enabled
    }

    // Drop any queued record carrying `tag` and return active ids carrying it.
    fn take_tagged(&mut self, tag: &str) -> Vec<u64> {
        self.queued.retain(|n| n.tag.as_deref() != Some(tag));
        let ids: Vec<u64> = self
            .active
            .iter()
            .filter(|(_, n)| n.tag.as_deref() == Some(tag))
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.active.remove(id);
        }
        ids
    }

    fn enqueue(&mut self, n: QueuedNotification) {
        self.queued.push_back(n);
        while self.queued.len() > self.max_queued {
            if let Some(dropped) = self.queued.pop_front() {
                warn!(title = %dropped.title, "notification queue full, dropping oldest");
                metrics::counter!("feedhub_notifications_total", "outcome" => "dropped").increment(1);
            }
        }
    }
}

struct ManagerInner {
    platform: Arc<dyn NotificationPlatform>,
    audio: Option<Arc<dyn AudioPlayer>>,
    state: Mutex<ManagerState>,
    // one platform permission prompt at a time
    requesting: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct NotificationManager {
    inner: Arc<ManagerInner>,
}

impl NotificationManager {
    pub fn new(
        platform: Arc<dyn NotificationPlatform>,
        audio: Option<Arc<dyn AudioPlayer>>,
        cfg: &NotifyConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                platform,
                audio,
                state: Mutex::new(ManagerState {
                    phase: NotifierState::Uninitialized,
                    permission: PermissionState::Default,
                    user_enabled: cfg.enabled,
                    sound_enabled: cfg.sound_enabled,
                    max_queued: cfg.max_queued.max(1),
                    active: BTreeMap::new(),
                    queued: VecDeque::new(),
                    next_id: 1,
                    error: None,
                    on_click: None,
                }),
                requesting: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Read the platform's current permission and settle into a ready state.
    /// Never prompts. Safe to call again to observe an external change.
    #[instrument(skip(self))]
    pub fn initialize(&self) -> NotifierState {
        self.inner.state.lock().phase = NotifierState::Initializing;

        let read = if self.inner.platform.is_supported() {
            self.inner.platform.permission()
        } else {
            Err(FeedError::CapabilityUnavailable("no notification facility".into()))
        };

        let phase = {
            let mut st = self.inner.state.lock();
            match read {
                Ok(permission) => {
                    st.permission = permission;
                    st.error = None;
                }
                Err(e) => {
                    warn!(error = %e, "notification platform unavailable");
                    st.permission = PermissionState::Denied;
                    st.error = Some(e.to_string());
                }
            }
            st.phase = NotifierState::from_permission(st.permission);
            st.phase
        };
        info!(state = ?phase, "notification manager ready");

        if phase == NotifierState::ReadyGranted {
            self.drain_queue();
        }
        phase
    }

    /// Prompt for permission if it is still undecided. Concurrent callers
    /// share one platform prompt; once decided, no further prompt is made.
    pub async fn request_permission(&self) -> PermissionState {
        if self.state() == NotifierState::Uninitialized {
            self.initialize();
        }

        let _prompt = self.inner.requesting.lock().await;
        {
            let st = self.inner.state.lock();
            if st.permission != PermissionState::Default || st.phase != NotifierState::ReadyDefault {
                return st.permission;
            }
        }

        let result = self.inner.platform.request_permission().await;
        let permission = {
            let mut st = self.inner.state.lock();
            match result {
                Ok(permission) => {
                    st.permission = permission;
                    st.phase = NotifierState::from_permission(permission);
                    if permission == PermissionState::Denied {
                        st.error = Some(FeedError::PermissionDenied.to_string());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "permission request failed");
                    st.error = Some(e.to_string());
                }
            }
            st.permission
        };
        info!(%permission, "notification permission resolved");

        if permission == PermissionState::Granted {
            self.drain_queue();
        }
        permission
    }

    pub fn notify_signal(&self, signal: &SignalAlert) -> Delivery {
        self.notify(signal.into())
    }

    pub fn notify_risk_alert(&self, alert: &RiskAlert) -> Delivery {
        self.notify(alert.into())
    }

    pub fn notify_execution(&self, report: &ExecutionReport) -> Delivery {
        self.notify(report.into())
    }

    pub fn notify_system(&self, message: &SystemMessage) -> Delivery {
        self.notify(message.into())
    }

    /// Raise a notification for telemetry events worth interrupting the
    /// user for. Other event types are ignored.
    pub fn notify_event(&self, event: &TelemetryEvent) -> Option<Delivery> {
        let symbol = event.symbol.clone().unwrap_or_default();
        let delivery = match &event.payload {
            EventPayload::SignalGenerated(sig) => self.notify_signal(&SignalAlert {
                symbol,
                direction: sig.direction.clone().unwrap_or_else(|| "new".to_string()),
                confidence: sig.confidence,
                entry_price: sig.entry_price,
                strategy: sig.strategy.clone(),
            }),
            EventPayload::AltStopSuggested(stop) => self.notify_risk_alert(&RiskAlert {
                severity: Priority::High,
                message: match stop.current_stop {
                    Some(cur) => format!("Move stop from {cur} to {}", stop.suggested_stop),
                    None => format!("Suggested stop {}", stop.suggested_stop),
                },
                symbol: event.symbol.clone(),
            }),
            EventPayload::ErrorOccurred(err) => self.notify_system(&SystemMessage {
                title: match &err.component {
                    Some(c) => format!("Error in {c}"),
                    None => "Analysis error".to_string(),
                },
                message: err.message.clone(),
                priority: Priority::High,
            }),
            _ => return None,
        };
        Some(delivery)
    }

    /// Show now if allowed, otherwise queue. A tag shared with an active or
    /// queued record replaces that record.
    pub fn notify(&self, n: QueuedNotification) -> Delivery {
        let (replaced, dispatch) = {
            let mut st = self.inner.state.lock();
            let replaced = match &n.tag {
                Some(tag) => st.take_tagged(tag),
                None => Vec::new(),
            };
            if st.can_dispatch() && self.inner.platform.can_notify() {
                (replaced, Some(n))
            } else {
                debug!(title = %n.title, state = ?st.phase, "queueing notification");
                st.enqueue(n);
                metrics::counter!("feedhub_notifications_total", "outcome" => "queued").increment(1);
                (replaced, None)
            }
        };

        for id in replaced {
            self.inner.platform.close(id);
        }
        match dispatch {
            Some(n) => self.dispatch(n),
            None => Delivery::Queued,
        }
    }

    // Platform calls happen outside the state lock; a platform may report
    // events synchronously from inside `show`.
    fn dispatch(&self, n: QueuedNotification) -> Delivery {
        let (id, sound) = {
            let mut st = self.inner.state.lock();
            let id = st.next_id;
            st.next_id += 1;
            st.active.insert(id, n.clone());
            (id, st.sound_enabled.then(|| Sound::for_priority(n.priority)))
        };

        if let Err(e) = self.inner.platform.show(id, &n, self.event_handler()) {
            warn!(error = %e, title = %n.title, "platform refused notification, queueing");
            let mut st = self.inner.state.lock();
            st.active.remove(&id);
            st.error = Some(e.to_string());
            st.enqueue(n);
            return Delivery::Queued;
        }
        metrics::counter!("feedhub_notifications_total", "outcome" => "shown").increment(1);

        if let (Some(sound), Some(audio)) = (sound, &self.inner.audio) {
            if let Err(e) = audio.play(sound) {
                warn!(error = %e, ?sound, "audio playback failed");
            }
        }
        Delivery::Shown(id)
    }

    fn drain_queue(&self) {
        let pending: Vec<QueuedNotification> = {
            let mut st = self.inner.state.lock();
            if !st.can_dispatch() || !self.inner.platform.can_notify() {
                return;
            }
            st.queued.drain(..).collect()
        };
        if !pending.is_empty() {
            info!(count = pending.len(), "draining queued notifications");
        }
        for n in pending {
            self.dispatch(n);
        }
    }

    fn event_handler(&self) -> PlatformEventHandler {
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                NotificationManager { inner }.on_platform_event(event);
            }
        })
    }

    fn on_platform_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::Closed(id) => {
                self.inner.state.lock().active.remove(&id);
            }
            PlatformEvent::Clicked(id) => {
                let (record, handler) = {
                    let mut st = self.inner.state.lock();
                    (st.active.remove(&id), st.on_click.clone())
                };
                let Some(record) = record else { return };
                if let Some(handler) = handler {
                    if catch_unwind(AssertUnwindSafe(|| handler(&record))).is_err() {
                        error!(id, "notification click handler panicked");
                    }
                }
                self.inner.platform.close(id);
            }
        }
    }

    pub fn set_click_handler(&self, handler: ClickHandler) {
        self.inner.state.lock().on_click = Some(handler);
    }

    /// Close everything shown and forget everything queued.
    pub fn clear_all_notifications(&self) {
        let ids: Vec<u64> = {
            let mut st = self.inner.state.lock();
            st.queued.clear();
            std::mem::take(&mut st.active).into_keys().collect()
        };
        for id in ids {
            self.inner.platform.close(id);
        }
    }

    /// Affects dispatches made after the call only.
    pub fn set_sound_enabled(&self, enabled: bool) {
        self.inner.state.lock().sound_enabled = enabled;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.state.lock().user_enabled = enabled;
        if enabled {
            self.drain_queue();
        }
    }

    pub fn state(&self) -> NotifierState {
        self.inner.state.lock().phase
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    pub fn get_stats(&self) -> NotificationStats {
        let st = self.inner.state.lock();
        NotificationStats {
            enabled: st.user_enabled
                && self.inner.platform.is_supported()
                && st.permission == PermissionState::Granted,
            permission: st.permission,
            active_count: st.active.len(),
            queued_count: st.queued.len(),
            sound_enabled: st.sound_enabled,
            error: st.error.clone(),
        }
    }
}
