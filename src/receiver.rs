use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::boot::BootSignal;
use crate::handler::FiredTriggerHandler;
use crate::platform::PlatformEvent;

/// Route platform events to the handler until the platform side hangs up.
pub async fn receive_events(
    mut events: UnboundedReceiver<PlatformEvent>,
    handler: Arc<FiredTriggerHandler>,
    boot: Arc<BootSignal>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PlatformEvent::AlarmFired(payload) => handler.on_alarm_fired(payload),
            PlatformEvent::Geofence(event) => handler.on_geofence_event(event).await,
            PlatformEvent::CompleteAction(id) => handler.on_complete_action(id),
            PlatformEvent::BootCompleted => {
                boot.deliver();
            }
        }
    }
    tracing::debug!("Platform event channel closed");
}

/// Spawn [`receive_events`] on the current runtime.
pub fn start_receiver(
    events: UnboundedReceiver<PlatformEvent>,
    handler: Arc<FiredTriggerHandler>,
    boot: Arc<BootSignal>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        receive_events(events, handler, boot).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::jobs::{job_queue, Job, JobDeadlines};
    use crate::local::{LocalPlatform, StaticPermissions};
    use crate::scheduler::{GeofenceSettings, TriggerScheduler};
    use crate::types::NotificationPayload;
    use tokio::sync::{mpsc, watch};

    #[tokio::test]
    async fn test_events_are_routed_and_boot_runs_once() {
        let (platform_tx, _platform_rx) = mpsc::unbounded_channel();
        let local = LocalPlatform::new(platform_tx, StaticPermissions::granted()).unwrap();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let triggers = Arc::new(TriggerScheduler::new(
            local.alarms.clone(),
            local.geofences.clone(),
            local.notifications.clone(),
            local.permissions.clone(),
            GeofenceSettings::default(),
        ));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (jobs, service) = job_queue(8, store, triggers, JobDeadlines::default());
        let handler = Arc::new(FiredTriggerHandler::new(
            local.notifications.clone(),
            local.geofences.clone(),
            jobs.clone(),
        ));
        let boot = Arc::new(BootSignal::new(jobs));

        events_tx
            .send(PlatformEvent::AlarmFired(Some(NotificationPayload {
                id: 1,
                title: "t".to_string(),
                description: String::new(),
            })))
            .unwrap();
        events_tx.send(PlatformEvent::BootCompleted).unwrap();
        events_tx.send(PlatformEvent::BootCompleted).unwrap();
        events_tx.send(PlatformEvent::CompleteAction(1)).unwrap();
        drop(events_tx);

        receive_events(events_rx, handler, boot).await;

        let (report_tx, mut reports) = mpsc::unbounded_channel();
        let (_shutdown, shutdown_rx) = watch::channel(false);
        service.report_to(report_tx).run(shutdown_rx).await;

        let mut jobs = Vec::new();
        while let Ok(report) = reports.try_recv() {
            jobs.push(report.job);
        }
        assert_eq!(jobs.len(), 3);
        assert!(jobs.contains(&Job::SetDateTimeArmed { id: 1, armed: false }));
        assert!(jobs.contains(&Job::SetCompleted { id: 1, completed: true }));
        assert_eq!(jobs.iter().filter(|j| **j == Job::RestoreAfterBoot).count(), 1);
    }
}
