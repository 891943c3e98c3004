use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::db::ReminderStore;
use crate::jobs::{Job, JobScheduler};
use crate::scheduler::{Armed, TriggerScheduler};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootReport {
    pub alarms_restored: usize,
    pub geofences_restored: usize,
    /// Armed location triggers that could not be registered (permission gone,
    /// no place, or the facility refused). Their flags are left alone.
    pub geofences_skipped: usize,
}

/// Bring the platform's alarms and geofences back in line with the store after
/// a reboot wiped them. Every armed trigger is scheduled again from its
/// persisted time/place and leftovers for unarmed triggers are cleared. Armed
/// flags are never changed here.
pub async fn restore_armed_triggers(
    store: Arc<dyn ReminderStore>,
    triggers: &TriggerScheduler,
) -> Result<BootReport> {
    let reminders = tokio::task::spawn_blocking(move || store.get_all()).await??;
    let mut report = BootReport::default();

    for reminder in &reminders {
        triggers.clear_stale(reminder).await;

        if reminder.date_time_armed && triggers.arm_date_time(reminder) == Armed::Scheduled {
            report.alarms_restored += 1;
        }
        if reminder.location_armed {
            match triggers.arm_location(reminder).await {
                Armed::Scheduled => report.geofences_restored += 1,
                Armed::Skipped(reason) => {
                    tracing::debug!("Not restoring geofence for reminder {}: {reason:?}", reminder.id);
                    report.geofences_skipped += 1;
                }
            }
        }
    }

    tracing::info!(
        "Boot reconciliation: {} alarm(s), {} geofence(s) restored, {} geofence(s) skipped",
        report.alarms_restored,
        report.geofences_restored,
        report.geofences_skipped
    );
    Ok(report)
}

/// The once-per-boot "device started" signal. Delivering it schedules the
/// boot job; later deliveries are ignored.
pub struct BootSignal {
    delivered: AtomicBool,
    jobs: JobScheduler,
}

impl BootSignal {
    pub fn new(jobs: JobScheduler) -> Self {
        Self {
            delivered: AtomicBool::new(false),
            jobs,
        }
    }

    /// Returns false if the signal was already consumed.
    pub fn deliver(&self) -> bool {
        if self.delivered.swap(true, Ordering::SeqCst) {
            tracing::debug!("Boot signal already delivered, ignoring");
            return false;
        }
        self.jobs.schedule_or_log(Job::RestoreAfterBoot);
        true
    }
}
