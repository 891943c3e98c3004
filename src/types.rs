use serde::{Deserialize, Serialize};

/// Store-assigned reminder identifier.
pub type ReminderId = i64;

/// Id carried by a reminder that has not been inserted yet.
pub const NEW_REMINDER_ID: ReminderId = -1;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Where a location trigger fires. All three parts are present or the
/// reminder has no place at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub latitude: f64,
    pub longitude: f64,
    /// Human-readable label, e.g. a resolved street address.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_ms: i64,
    pub edited_ms: i64,
    /// Target fire time of the date-time trigger.
    pub notify_at_ms: Option<i64>,
    /// True while an alarm is scheduled for `notify_at_ms`.
    pub date_time_armed: bool,
    pub place: Option<Place>,
    /// True while a geofence is registered for `place`.
    pub location_armed: bool,
}

impl Reminder {
    /// A fresh, not-yet-inserted reminder with no triggers.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: NEW_REMINDER_ID,
            title: title.into(),
            description: description.into(),
            completed: false,
            created_ms: now,
            edited_ms: now,
            notify_at_ms: None,
            date_time_armed: false,
            place: None,
            location_armed: false,
        }
    }

    pub fn is_new(&self) -> bool {
        self.id < 1
    }

    /// Empty reminders are never persisted.
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.description.is_empty()
    }

    /// Payload handed to the alarm/geofence facilities and returned on fire.
    pub fn payload(&self) -> NotificationPayload {
        NotificationPayload {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
        }
    }

    pub fn is_armed(&self, kind: TriggerKind) -> bool {
        match kind {
            TriggerKind::DateTime => self.date_time_armed,
            TriggerKind::Location => self.location_armed,
        }
    }
}

/// What a fired alarm or geofence carries back: enough to build the
/// notification without touching the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub id: ReminderId,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    DateTime,
    Location,
}
