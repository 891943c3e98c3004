use std::sync::Arc;

use crate::jobs::{Job, JobScheduler};
use crate::platform::{
    GeofenceEvent, GeofenceFacility, Notification, NotificationFacility, Transition,
};
use crate::types::{NotificationPayload, ReminderId};

/// Reacts to fired alarms, entered geofences and notification actions.
///
/// Runs in the short-lived receiver context: it only notifies and touches the
/// platform, then hands the store update to a job.
pub struct FiredTriggerHandler {
    notifications: Arc<dyn NotificationFacility>,
    geofences: Arc<dyn GeofenceFacility>,
    jobs: JobScheduler,
}

impl FiredTriggerHandler {
    pub fn new(
        notifications: Arc<dyn NotificationFacility>,
        geofences: Arc<dyn GeofenceFacility>,
        jobs: JobScheduler,
    ) -> Self {
        Self {
            notifications,
            geofences,
            jobs,
        }
    }

    pub fn on_alarm_fired(&self, payload: Option<NotificationPayload>) {
        let payload = payload_or_default(payload, "alarm");
        tracing::info!("Alarm fired for reminder {}", payload.id);
        self.notifications
            .show(Notification::for_fired_reminder(&payload));
        self.jobs.schedule_or_log(Job::SetDateTimeArmed {
            id: payload.id,
            armed: false,
        });
    }

    pub async fn on_geofence_event(&self, event: GeofenceEvent) {
        if let Some(code) = event.error_code {
            tracing::error!("Geofence event delivery failed with status {code}");
            return;
        }
        if event.transition != Transition::Enter {
            tracing::debug!("Ignoring geofence transition {:?}", event.transition);
            return;
        }

        let payload = payload_or_default(event.payload, "geofence");
        tracing::info!("Geofence entered for reminder {}", payload.id);
        self.notifications
            .show(Notification::for_fired_reminder(&payload));

        match self.geofences.unregister(payload.id).await {
            Ok(()) => tracing::info!("Geofence is removed"),
            Err(e) => tracing::error!("Failed to remove the geofence: {e}"),
        }

        self.jobs.schedule_or_log(Job::SetLocationArmed {
            id: payload.id,
            armed: false,
            place: None,
        });
    }

    /// The "mark completed" button on a shown notification.
    pub fn on_complete_action(&self, id: ReminderId) {
        self.notifications.cancel(id);
        self.jobs.schedule_or_log(Job::SetCompleted {
            id,
            completed: true,
        });
    }
}

/// A lost payload still produces a notification, just an empty one for id 0.
fn payload_or_default(payload: Option<NotificationPayload>, source: &str) -> NotificationPayload {
    payload.unwrap_or_else(|| {
        tracing::warn!("Missing {source} payload, notifying with defaults");
        NotificationPayload::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::jobs::{job_queue, JobDeadlines, JobService};
    use crate::local::{LocalPlatform, StaticPermissions};
    use crate::platform::{GeofenceRequest, DeepLink};
    use crate::scheduler::{GeofenceSettings, TriggerScheduler};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup() -> (LocalPlatform, FiredTriggerHandler, JobService) {
        let (events, _) = mpsc::unbounded_channel();
        let local = LocalPlatform::new(events, StaticPermissions::granted()).unwrap();
        let triggers = Arc::new(TriggerScheduler::new(
            local.alarms.clone(),
            local.geofences.clone(),
            local.notifications.clone(),
            local.permissions.clone(),
            GeofenceSettings::default(),
        ));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (jobs, service) = job_queue(8, store, triggers, JobDeadlines::default());
        let handler =
            FiredTriggerHandler::new(local.notifications.clone(), local.geofences.clone(), jobs);
        (local, handler, service)
    }

    /// Drain whatever the handler queued.
    async fn queued(handler: FiredTriggerHandler, service: JobService) -> Vec<Job> {
        drop(handler);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
        service.report_to(tx).run(shutdown_rx).await;
        let mut jobs = Vec::new();
        while let Ok(report) = rx.try_recv() {
            jobs.push(report.job);
        }
        jobs
    }

    fn payload(id: ReminderId) -> NotificationPayload {
        NotificationPayload {
            id,
            title: "Buy milk".to_string(),
            description: "2%".to_string(),
        }
    }

    #[tokio::test]
    async fn test_alarm_notifies_and_queues_flag_clear() {
        let (local, handler, service) = setup();
        handler.on_alarm_fired(Some(payload(7)));

        let shown = local.notifications.shown(7).unwrap();
        assert_eq!(shown.title, "Buy milk");
        assert_eq!(shown.tap, DeepLink::EditReminder(7));

        assert_eq!(
            queued(handler, service).await,
            vec![Job::SetDateTimeArmed { id: 7, armed: false }]
        );
    }

    #[tokio::test]
    async fn test_missing_alarm_payload_uses_defaults() {
        let (local, handler, service) = setup();
        handler.on_alarm_fired(None);

        let shown = local.notifications.shown(0).unwrap();
        assert!(shown.title.is_empty());
        assert_eq!(
            queued(handler, service).await,
            vec![Job::SetDateTimeArmed { id: 0, armed: false }]
        );
    }

    #[tokio::test]
    async fn test_geofence_enter_consumes_registration() {
        let (local, handler, service) = setup();
        local
            .geofences
            .register(GeofenceRequest {
                key: 3,
                latitude: 1.0,
                longitude: 1.0,
                radius_m: 150.0,
                expires_in: Duration::from_secs(60),
                transition: Transition::Enter,
                payload: payload(3),
            })
            .await
            .unwrap();

        handler
            .on_geofence_event(GeofenceEvent {
                transition: Transition::Enter,
                error_code: None,
                payload: Some(payload(3)),
            })
            .await;

        assert!(local.notifications.shown(3).is_some());
        assert!(local.geofences.registered().is_empty());
        assert_eq!(
            queued(handler, service).await,
            vec![Job::SetLocationArmed {
                id: 3,
                armed: false,
                place: None
            }]
        );
    }

    #[tokio::test]
    async fn test_bad_geofence_events_are_discarded() {
        let (local, handler, service) = setup();
        handler
            .on_geofence_event(GeofenceEvent {
                transition: Transition::Enter,
                error_code: Some(1000),
                payload: Some(payload(3)),
            })
            .await;
        handler
            .on_geofence_event(GeofenceEvent {
                transition: Transition::Exit,
                error_code: None,
                payload: Some(payload(3)),
            })
            .await;

        assert_eq!(local.notifications.shown_count(), 0);
        assert!(queued(handler, service).await.is_empty());
    }

    #[tokio::test]
    async fn test_complete_action_cancels_notification() {
        let (local, handler, service) = setup();
        handler.on_alarm_fired(Some(payload(4)));
        handler.on_complete_action(4);

        assert!(local.notifications.shown(4).is_none());
        let jobs = queued(handler, service).await;
        assert!(jobs.contains(&Job::SetCompleted {
            id: 4,
            completed: true
        }));
    }
}
