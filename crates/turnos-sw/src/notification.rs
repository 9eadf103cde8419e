//! Push payloads, notification descriptors and the notification service seam.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{Result, ServiceWorkerError};

/// Action id that only closes the notification.
pub const DISMISS_ACTION: &str = "dismiss";

// ==================== Wire types ====================

/// A notification button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Payload pushed by the panel server. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub tag: Option<String>,
    pub important: Option<bool>,
    pub url: Option<String>,
    pub turno_id: Option<JsonValue>,
    pub tipo: Option<JsonValue>,
    pub actions: Option<Vec<NotificationAction>>,
}

impl PushPayload {
    /// Parse raw push data. Only unreadable JSON or a bare `null` is an error.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let value: JsonValue = serde_json::from_slice(data)?;
        if value.is_null() {
            return Err(ServiceWorkerError::Notification(
                "push payload is null".to_string(),
            ));
        }
        Ok(Self::from_value(&value))
    }

    /// Read each field on its own; a field of the wrong type counts as missing.
    pub fn from_value(value: &JsonValue) -> Self {
        let text = |key: &str| value.get(key).and_then(JsonValue::as_str).map(str::to_string);
        let present = |key: &str| value.get(key).filter(|v| !v.is_null()).cloned();

        Self {
            title: text("title"),
            body: text("body"),
            tag: text("tag"),
            important: value.get("important").map(is_truthy),
            url: text("url"),
            turno_id: present("turnoId"),
            tipo: present("tipo"),
            actions: value.get("actions").and_then(JsonValue::as_array).map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                    .collect()
            }),
        }
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

/// Data attached to a displayed notification, read back on click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turno_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// Everything the notification service needs to display a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub require_interaction: bool,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

// ==================== Defaults ====================

/// Fallback values used when a push carries no payload or omits fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct NotificationDefaults {
    pub title: String,
    /// Body when the push carried no usable payload.
    pub body: String,
    /// Body when a payload was parsed but had no body.
    pub payload_body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub url: String,
    pub actions: Vec<NotificationAction>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "🔔 TurnosBot Admin".to_string(),
            body: "Nueva actividad en el sistema".to_string(),
            payload_body: "Nueva actividad".to_string(),
            icon: "/static/icon-192.png".to_string(),
            badge: "/static/icon-192.png".to_string(),
            tag: "turno-notification".to_string(),
            url: "/".to_string(),
            actions: vec![
                NotificationAction {
                    action: "view".to_string(),
                    title: "👀 Ver Panel".to_string(),
                    icon: Some("/static/icon-192.png".to_string()),
                },
                NotificationAction {
                    action: DISMISS_ACTION.to_string(),
                    title: "❌ Cerrar".to_string(),
                    icon: None,
                },
            ],
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl NotificationDescriptor {
    /// Descriptor shown when the push had no usable payload.
    pub fn fallback(defaults: &NotificationDefaults) -> Self {
        Self {
            title: defaults.title.clone(),
            body: defaults.body.clone(),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            tag: defaults.tag.clone(),
            require_interaction: true,
            data: NotificationData {
                url: defaults.url.clone(),
                turno_id: None,
                tipo: None,
                timestamp: None,
            },
            actions: defaults.actions.clone(),
        }
    }

    /// Merge a parsed payload over the defaults.
    pub fn from_payload(
        payload: PushPayload,
        defaults: &NotificationDefaults,
        now_millis: u64,
    ) -> Self {
        let actions = payload
            .actions
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| defaults.actions.clone());

        Self {
            title: non_empty(payload.title).unwrap_or_else(|| defaults.title.clone()),
            body: non_empty(payload.body).unwrap_or_else(|| defaults.payload_body.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            tag: non_empty(payload.tag).unwrap_or_else(|| defaults.tag.clone()),
            require_interaction: payload.important.unwrap_or(false),
            data: NotificationData {
                url: non_empty(payload.url).unwrap_or_else(|| defaults.url.clone()),
                turno_id: payload.turno_id,
                tipo: payload.tipo,
                timestamp: Some(now_millis),
            },
            actions,
        }
    }

    /// Build a descriptor from raw push data. Never fails: unreadable data
    /// falls back to the defaults.
    pub fn from_push(
        data: Option<&[u8]>,
        defaults: &NotificationDefaults,
        now_millis: u64,
    ) -> Self {
        let Some(data) = data.filter(|d| !d.is_empty()) else {
            debug!("Push without payload, using defaults");
            return Self::fallback(defaults);
        };

        match PushPayload::parse(data) {
            Ok(payload) => Self::from_payload(payload, defaults, now_millis),
            Err(e) => {
                warn!(error = %e, "Unreadable push payload, using defaults");
                Self::fallback(defaults)
            }
        }
    }
}

// ==================== Events ====================

/// A push message delivered to the worker.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Bytes>,
}

impl PushEvent {
    pub fn empty() -> Self {
        Self { data: None }
    }

    pub fn with_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    pub fn with_json(value: &serde_json::Value) -> Self {
        Self::with_data(value.to_string())
    }
}

/// A click on a displayed notification or one of its buttons.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: NotificationDescriptor,
    /// Action id of the clicked button; `None` for the notification body.
    pub action: Option<String>,
}

impl NotificationClickEvent {
    pub fn is_dismiss(&self) -> bool {
        self.action.as_deref() == Some(DISMISS_ACTION)
    }
}

// ==================== Service ====================

/// Host capability that displays and closes system notifications.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Display a notification; completes once it is shown.
    async fn show_notification(&self, descriptor: &NotificationDescriptor) -> Result<()>;

    /// Close every displayed notification with this tag.
    async fn close_notification(&self, tag: &str) -> Result<()>;
}

/// Notification service that keeps displayed notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifications {
    displayed: RwLock<Vec<NotificationDescriptor>>,
    closed: RwLock<Vec<String>>,
}

impl MemoryNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently displayed notifications, oldest first.
    pub async fn displayed(&self) -> Vec<NotificationDescriptor> {
        self.displayed.read().await.clone()
    }

    /// Tags closed so far, in order.
    pub async fn closed(&self) -> Vec<String> {
        self.closed.read().await.clone()
    }
}

#[async_trait]
impl NotificationService for MemoryNotifications {
    async fn show_notification(&self, descriptor: &NotificationDescriptor) -> Result<()> {
        let mut displayed = self.displayed.write().await;
        // Same tag replaces the previous notification.
        displayed.retain(|n| n.tag != descriptor.tag);
        displayed.push(descriptor.clone());
        Ok(())
    }

    async fn close_notification(&self, tag: &str) -> Result<()> {
        self.displayed.write().await.retain(|n| n.tag != tag);
        self.closed.write().await.push(tag.to_string());
        Ok(())
    }
}
