//! Contracts for the operating-system services the reminder core drives.
//!
//! Alarms, geofences, notifications and permission checks are injected as
//! trait objects so the same core runs against the in-process implementations
//! in [`crate::local`] or against a real device bridge.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::GeofenceError;
use crate::types::{NotificationPayload, ReminderId};

/// Wake-capable exact alarms, one per key.
pub trait AlarmFacility: Send + Sync {
    /// Schedule an alarm for `at_ms`, replacing any alarm already keyed by `key`.
    /// A time in the past fires at the next opportunity.
    fn schedule_exact_wake(&self, key: ReminderId, at_ms: i64, payload: NotificationPayload);
    /// Cancel the alarm keyed by `key`. Absence is not an error.
    fn cancel(&self, key: ReminderId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Enter,
    Exit,
    Dwell,
}

/// A circular region to watch.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceRequest {
    pub key: ReminderId,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f32,
    /// The facility drops the region on its own after this long.
    pub expires_in: Duration,
    pub transition: Transition,
    pub payload: NotificationPayload,
}

/// Region-entry detection. Both calls complete asynchronously; their result is
/// only ever logged by callers.
#[async_trait]
pub trait GeofenceFacility: Send + Sync {
    /// Register `request`, replacing any region already keyed by `request.key`.
    async fn register(&self, request: GeofenceRequest) -> Result<(), GeofenceError>;
    /// Remove the region keyed by `key`. Absence is not an error.
    async fn unregister(&self, key: ReminderId) -> Result<(), GeofenceError>;
}

/// Where tapping a notification (or one of its buttons) leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeepLink {
    EditReminder(ReminderId),
    MarkCompleted(ReminderId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notifications are keyed by reminder id; showing again replaces.
    pub id: ReminderId,
    pub title: String,
    pub body: String,
    pub tap: DeepLink,
    pub action: Option<DeepLink>,
}

impl Notification {
    /// The notification shown when either trigger of a reminder fires.
    pub fn for_fired_reminder(payload: &NotificationPayload) -> Self {
        Self {
            id: payload.id,
            title: payload.title.clone(),
            body: payload.description.clone(),
            tap: DeepLink::EditReminder(payload.id),
            action: Some(DeepLink::MarkCompleted(payload.id)),
        }
    }
}

pub trait NotificationFacility: Send + Sync {
    fn show(&self, notification: Notification);
    fn cancel(&self, id: ReminderId);
}

pub trait LocationPermissions: Send + Sync {
    fn fine_location_granted(&self) -> bool;
    /// `None` on platforms without a separate background-location tier.
    fn background_location_granted(&self) -> Option<bool>;

    /// Whether geofences may be registered at all.
    fn location_permitted(&self) -> bool {
        self.fine_location_granted() && self.background_location_granted().unwrap_or(true)
    }
}

/// A geofence transition as delivered by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceEvent {
    pub transition: Transition,
    /// Platform status code when delivery failed.
    pub error_code: Option<i32>,
    /// Payload of the registration that matched; may be lost in transit.
    pub payload: Option<NotificationPayload>,
}

/// Everything the platform can deliver to the app out of band.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    AlarmFired(Option<NotificationPayload>),
    Geofence(GeofenceEvent),
    /// The "mark completed" button of a shown notification.
    CompleteAction(ReminderId),
    BootCompleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Perms(bool, Option<bool>);

    impl LocationPermissions for Perms {
        fn fine_location_granted(&self) -> bool {
            self.0
        }
        fn background_location_granted(&self) -> Option<bool> {
            self.1
        }
    }

    #[test]
    fn test_location_permitted_respects_background_tier() {
        assert!(Perms(true, None).location_permitted());
        assert!(Perms(true, Some(true)).location_permitted());
        assert!(!Perms(true, Some(false)).location_permitted());
        assert!(!Perms(false, None).location_permitted());
        assert!(!Perms(false, Some(true)).location_permitted());
    }

    #[test]
    fn test_fired_notification_links_back_to_reminder() {
        let payload = NotificationPayload {
            id: 5,
            title: "Pharmacy".to_string(),
            description: "pick up prescription".to_string(),
        };
        let n = Notification::for_fired_reminder(&payload);
        assert_eq!(n.id, 5);
        assert_eq!(n.body, "pick up prescription");
        assert_eq!(n.tap, DeepLink::EditReminder(5));
        assert_eq!(n.action, Some(DeepLink::MarkCompleted(5)));
    }
}
