pub mod boot;
pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod jobs;
pub mod local;
pub mod platform;
pub mod receiver;
pub mod reminders;
pub mod scheduler;
pub mod types;

use std::sync::Arc;

use crate::boot::BootSignal;
use crate::config::Config;
use crate::db::ReminderStore;
use crate::handler::FiredTriggerHandler;
use crate::jobs::{job_queue, JobScheduler, JobService};
use crate::platform::{AlarmFacility, GeofenceFacility, LocationPermissions, NotificationFacility};
use crate::reminders::ReminderService;
use crate::scheduler::TriggerScheduler;

/// The platform services the core drives.
#[derive(Clone)]
pub struct Platform {
    pub alarms: Arc<dyn AlarmFacility>,
    pub geofences: Arc<dyn GeofenceFacility>,
    pub notifications: Arc<dyn NotificationFacility>,
    pub permissions: Arc<dyn LocationPermissions>,
}

/// Everything wired together. The [`JobService`] returned next to it must be
/// run for deferred store updates to land.
pub struct AppState {
    pub store: Arc<dyn ReminderStore>,
    pub triggers: Arc<TriggerScheduler>,
    /// User-facing workflows (save, delete, arm/disarm, ...).
    pub reminders: ReminderService,
    /// Fired alarms, entered geofences and notification actions.
    pub handler: Arc<FiredTriggerHandler>,
    /// One-shot signal that restores armed triggers after a reboot.
    pub boot: Arc<BootSignal>,
    pub jobs: JobScheduler,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<dyn ReminderStore>, platform: Platform) -> (Self, JobService) {
        let triggers = Arc::new(TriggerScheduler::new(
            platform.alarms,
            platform.geofences.clone(),
            platform.notifications.clone(),
            platform.permissions,
            config.geofence,
        ));
        let (jobs, service) = job_queue(
            config.queue_capacity,
            Arc::clone(&store),
            Arc::clone(&triggers),
            config.deadlines,
        );
        let handler = Arc::new(FiredTriggerHandler::new(
            platform.notifications,
            platform.geofences,
            jobs.clone(),
        ));
        let state = Self {
            reminders: ReminderService::new(Arc::clone(&store), Arc::clone(&triggers)),
            boot: Arc::new(BootSignal::new(jobs.clone())),
            store,
            triggers,
            handler,
            jobs,
        };
        (state, service)
    }
}

/// Install the global tracing subscriber.
/// Release builds only log WARN and above to keep reminder text out of logs.
pub fn init_tracing() {
    #[cfg(debug_assertions)]
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    #[cfg(not(debug_assertions))]
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .init();
}
