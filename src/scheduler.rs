use std::sync::Arc;
use std::time::Duration;

use crate::platform::{
    AlarmFacility, GeofenceFacility, GeofenceRequest, LocationPermissions, NotificationFacility,
    Transition,
};
use crate::types::{now_ms, Reminder, ReminderId};

/// Geofence radius in meters.
pub const DEFAULT_GEOFENCE_RADIUS_M: f32 = 150.0;
/// Geofences expire on their own after 30 days.
pub const DEFAULT_GEOFENCE_EXPIRY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceSettings {
    pub radius_m: f32,
    pub expiry: Duration,
}

impl Default for GeofenceSettings {
    fn default() -> Self {
        Self {
            radius_m: DEFAULT_GEOFENCE_RADIUS_M,
            expiry: DEFAULT_GEOFENCE_EXPIRY,
        }
    }
}

/// Result of an arm request. Skips are silent for the caller: nothing is
/// raised, the reason is only reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Armed {
    Scheduled,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoTimestamp,
    NoPlace,
    PermissionDenied,
    RegistrationFailed,
}

/// Turns a reminder's triggers into exactly one alarm and one geofence, keyed
/// by the reminder id, or removes them.
pub struct TriggerScheduler {
    alarms: Arc<dyn AlarmFacility>,
    geofences: Arc<dyn GeofenceFacility>,
    notifications: Arc<dyn NotificationFacility>,
    permissions: Arc<dyn LocationPermissions>,
    geofence: GeofenceSettings,
}

impl TriggerScheduler {
    pub fn new(
        alarms: Arc<dyn AlarmFacility>,
        geofences: Arc<dyn GeofenceFacility>,
        notifications: Arc<dyn NotificationFacility>,
        permissions: Arc<dyn LocationPermissions>,
        geofence: GeofenceSettings,
    ) -> Self {
        Self {
            alarms,
            geofences,
            notifications,
            permissions,
            geofence,
        }
    }

    /// Schedule the reminder's alarm at its target time, superseding any alarm
    /// already keyed by its id. A target in the past is still scheduled.
    pub fn arm_date_time(&self, reminder: &Reminder) -> Armed {
        let Some(at_ms) = reminder.notify_at_ms else {
            tracing::debug!("Reminder {} has no time to notify at", reminder.id);
            return Armed::Skipped(SkipReason::NoTimestamp);
        };
        self.alarms.cancel(reminder.id);
        self.alarms
            .schedule_exact_wake(reminder.id, at_ms, reminder.payload());
        if at_ms <= now_ms() {
            tracing::debug!("Alarm for reminder {} is already due", reminder.id);
        }
        Armed::Scheduled
    }

    /// Cancel the alarm and any notification it already produced.
    pub fn disarm_date_time(&self, id: ReminderId) {
        self.notifications.cancel(id);
        self.alarms.cancel(id);
    }

    /// Register the reminder's geofence, replacing a previous one. Skips when
    /// location permission is missing or the reminder has no place.
    pub async fn arm_location(&self, reminder: &Reminder) -> Armed {
        if !self.permissions.location_permitted() {
            tracing::debug!(
                "Location permission missing, not registering geofence for reminder {}",
                reminder.id
            );
            return Armed::Skipped(SkipReason::PermissionDenied);
        }
        let Some(place) = &reminder.place else {
            return Armed::Skipped(SkipReason::NoPlace);
        };

        let request = GeofenceRequest {
            key: reminder.id,
            latitude: place.latitude,
            longitude: place.longitude,
            radius_m: self.geofence.radius_m,
            expires_in: self.geofence.expiry,
            transition: Transition::Enter,
            payload: reminder.payload(),
        };
        match self.geofences.register(request).await {
            Ok(()) => {
                tracing::info!("Geofence registered for reminder {} at {}", reminder.id, place.label);
                Armed::Scheduled
            }
            Err(e) => {
                tracing::warn!("Failed to register geofence for reminder {}: {e}", reminder.id);
                Armed::Skipped(SkipReason::RegistrationFailed)
            }
        }
    }

    /// Remove the geofence and any notification it already produced.
    pub async fn disarm_location(&self, id: ReminderId) {
        self.notifications.cancel(id);
        self.remove_geofence(id).await;
    }

    /// Drop leftover registrations for a reminder without touching its
    /// notifications.
    pub(crate) async fn clear_stale(&self, reminder: &Reminder) {
        if !reminder.date_time_armed {
            self.alarms.cancel(reminder.id);
        }
        if !reminder.location_armed {
            self.remove_geofence(reminder.id).await;
        }
    }

    async fn remove_geofence(&self, id: ReminderId) {
        match self.geofences.unregister(id).await {
            Ok(()) => tracing::debug!("Geofence for reminder {id} removed"),
            Err(e) => tracing::warn!("Failed to remove the geofence for reminder {id}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalPlatform, StaticPermissions};
    use crate::platform::Notification;
    use crate::types::Place;
    use tokio::sync::mpsc;

    fn scheduler(local: &LocalPlatform) -> TriggerScheduler {
        TriggerScheduler::new(
            local.alarms.clone(),
            local.geofences.clone(),
            local.notifications.clone(),
            local.permissions.clone(),
            GeofenceSettings::default(),
        )
    }

    fn reminder(id: ReminderId) -> Reminder {
        let mut r = Reminder::new("Buy milk", "");
        r.id = id;
        r
    }

    fn with_place(id: ReminderId) -> Reminder {
        let mut r = reminder(id);
        r.place = Some(Place {
            latitude: 53.9,
            longitude: 27.56,
            label: "Corner shop".to_string(),
        });
        r
    }

    #[tokio::test]
    async fn test_arming_twice_leaves_one_alarm() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let local = LocalPlatform::new(tx, StaticPermissions::granted()).unwrap();
        let triggers = scheduler(&local);

        let mut r = reminder(1);
        r.notify_at_ms = Some(now_ms() + 60_000);
        assert_eq!(triggers.arm_date_time(&r), Armed::Scheduled);
        r.notify_at_ms = Some(now_ms() + 120_000);
        assert_eq!(triggers.arm_date_time(&r), Armed::Scheduled);

        let pending = local.alarms.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], (1, r.notify_at_ms.unwrap()));
    }

    #[tokio::test]
    async fn test_arming_without_time_is_skipped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let local = LocalPlatform::new(tx, StaticPermissions::granted()).unwrap();
        let triggers = scheduler(&local);

        assert_eq!(
            triggers.arm_date_time(&reminder(1)),
            Armed::Skipped(SkipReason::NoTimestamp)
        );
        assert!(local.alarms.pending().is_empty());
    }

    #[tokio::test]
    async fn test_disarm_cancels_alarm_and_notification() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let local = LocalPlatform::new(tx, StaticPermissions::granted()).unwrap();
        let triggers = scheduler(&local);

        let mut r = reminder(2);
        r.notify_at_ms = Some(now_ms() + 60_000);
        triggers.arm_date_time(&r);
        local
            .notifications
            .show(Notification::for_fired_reminder(&r.payload()));

        triggers.disarm_date_time(2);
        assert!(local.alarms.pending().is_empty());
        assert!(local.notifications.shown(2).is_none());

        // Never armed: nothing to do, nothing fails.
        triggers.disarm_date_time(99);
    }

    #[tokio::test]
    async fn test_arm_location_registers_geofence() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let local = LocalPlatform::new(tx, StaticPermissions::granted()).unwrap();
        let triggers = scheduler(&local);

        assert_eq!(triggers.arm_location(&with_place(3)).await, Armed::Scheduled);
        assert_eq!(triggers.arm_location(&with_place(3)).await, Armed::Scheduled);
        assert_eq!(local.geofences.registered(), vec![3]);

        triggers.disarm_location(3).await;
        assert!(local.geofences.registered().is_empty());
        triggers.disarm_location(3).await;
    }

    #[tokio::test]
    async fn test_arm_location_skips_without_permission_or_place() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let local = LocalPlatform::new(tx, StaticPermissions::new(true, Some(false))).unwrap();
        let triggers = scheduler(&local);

        assert_eq!(
            triggers.arm_location(&with_place(4)).await,
            Armed::Skipped(SkipReason::PermissionDenied)
        );
        local.permissions.set_background(true);
        assert_eq!(
            triggers.arm_location(&reminder(4)).await,
            Armed::Skipped(SkipReason::NoPlace)
        );
        assert!(local.geofences.registered().is_empty());
    }

    #[tokio::test]
    async fn test_registration_failure_is_reported_not_raised() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let local = LocalPlatform::new(tx, StaticPermissions::granted()).unwrap();
        let triggers = scheduler(&local);
        local.geofences.set_available(false);

        assert_eq!(
            triggers.arm_location(&with_place(5)).await,
            Armed::Skipped(SkipReason::RegistrationFailed)
        );
        triggers.disarm_location(5).await;
    }
}
