//! In-process stand-ins for the platform services, used by the desktop binary
//! and by tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::error::GeofenceError;
use crate::platform::{
    AlarmFacility, GeofenceEvent, GeofenceFacility, GeofenceRequest, LocationPermissions,
    Notification, NotificationFacility, PlatformEvent, Transition,
};
use crate::types::{now_ms, NotificationPayload, ReminderId};

/// Per-app geofence limit enforced by Android's location services.
pub const MAX_GEOFENCES: usize = 100;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Nothing in here panics while holding a lock; recover the data if it ever does.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct PendingAlarm {
    at_ms: i64,
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct AlarmTable {
    pending: HashMap<ReminderId, PendingAlarm>,
    next_generation: u64,
}

/// Alarms backed by tokio timers. Firing sends [`PlatformEvent::AlarmFired`].
pub struct TokioAlarmClock {
    runtime: Handle,
    events: UnboundedSender<PlatformEvent>,
    table: Arc<Mutex<AlarmTable>>,
}

impl TokioAlarmClock {
    /// Must be called from inside a Tokio runtime.
    pub fn new(events: UnboundedSender<PlatformEvent>) -> Result<Self> {
        Ok(Self {
            runtime: Handle::try_current()?,
            events,
            table: Arc::new(Mutex::new(AlarmTable::default())),
        })
    }

    /// Outstanding alarms as `(key, at_ms)`, sorted by key.
    pub fn pending(&self) -> Vec<(ReminderId, i64)> {
        let table = lock(&self.table);
        let mut pending: Vec<_> = table.pending.iter().map(|(k, a)| (*k, a.at_ms)).collect();
        pending.sort_unstable();
        pending
    }
}

impl AlarmFacility for TokioAlarmClock {
    fn schedule_exact_wake(&self, key: ReminderId, at_ms: i64, payload: NotificationPayload) {
        let delay = Duration::from_millis(at_ms.saturating_sub(now_ms()).max(0) as u64);
        let mut table = lock(&self.table);
        table.next_generation += 1;
        let generation = table.next_generation;

        let events = self.events.clone();
        let shared = Arc::clone(&self.table);
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut table = lock(&shared);
                // A newer alarm for the same key owns the slot now.
                if table.pending.get(&key).map(|a| a.generation) != Some(generation) {
                    return;
                }
                table.pending.remove(&key);
            }
            tracing::debug!("Alarm for reminder {key} fired");
            let _ = events.send(PlatformEvent::AlarmFired(Some(payload)));
        });

        if let Some(previous) = table.pending.insert(
            key,
            PendingAlarm {
                at_ms,
                generation,
                timer,
            },
        ) {
            previous.timer.abort();
        }
    }

    fn cancel(&self, key: ReminderId) {
        if let Some(alarm) = lock(&self.table).pending.remove(&key) {
            alarm.timer.abort();
            tracing::debug!("Alarm for reminder {key} cancelled");
        }
    }
}

struct Region {
    request: GeofenceRequest,
    registered_at: Instant,
    inside: bool,
}

impl Region {
    fn expired(&self) -> bool {
        self.registered_at.elapsed() >= self.request.expires_in
    }

    fn contains(&self, latitude: f64, longitude: f64) -> bool {
        distance_m(self.request.latitude, self.request.longitude, latitude, longitude)
            <= f64::from(self.request.radius_m)
    }
}

#[derive(Default)]
struct GeofenceTable {
    regions: HashMap<ReminderId, Region>,
    position: Option<(f64, f64)>,
}

/// Geofences evaluated against positions fed in through [`update_position`].
///
/// [`update_position`]: SimulatedGeofences::update_position
pub struct SimulatedGeofences {
    events: UnboundedSender<PlatformEvent>,
    table: Mutex<GeofenceTable>,
    capacity: usize,
    available: AtomicBool,
}

impl SimulatedGeofences {
    pub fn new(events: UnboundedSender<PlatformEvent>) -> Self {
        Self::with_capacity(events, MAX_GEOFENCES)
    }

    pub fn with_capacity(events: UnboundedSender<PlatformEvent>, capacity: usize) -> Self {
        Self {
            events,
            table: Mutex::new(GeofenceTable::default()),
            capacity,
            available: AtomicBool::new(true),
        }
    }

    /// Make every later call fail with [`GeofenceError::Unavailable`], like a
    /// device with location services switched off.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Keys of the registered regions, sorted.
    pub fn registered(&self) -> Vec<ReminderId> {
        let table = lock(&self.table);
        let mut keys: Vec<_> = table.regions.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Move the device. Emits an Enter event for each region the position has
    /// just entered.
    pub fn update_position(&self, latitude: f64, longitude: f64) {
        let mut table = lock(&self.table);
        table.position = Some((latitude, longitude));
        table.regions.retain(|key, region| {
            if region.expired() {
                tracing::debug!("Geofence for reminder {key} expired");
            }
            !region.expired()
        });

        for region in table.regions.values_mut() {
            let inside = region.contains(latitude, longitude);
            if inside && !region.inside && region.request.transition == Transition::Enter {
                self.emit_enter(&region.request.payload);
            }
            region.inside = inside;
        }
    }

    fn emit_enter(&self, payload: &NotificationPayload) {
        let _ = self.events.send(PlatformEvent::Geofence(GeofenceEvent {
            transition: Transition::Enter,
            error_code: None,
            payload: Some(payload.clone()),
        }));
    }

    fn check_available(&self) -> Result<(), GeofenceError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GeofenceError::Unavailable)
        }
    }
}

#[async_trait]
impl GeofenceFacility for SimulatedGeofences {
    async fn register(&self, request: GeofenceRequest) -> Result<(), GeofenceError> {
        self.check_available()?;
        let mut table = lock(&self.table);
        if !table.regions.contains_key(&request.key) && table.regions.len() >= self.capacity {
            return Err(GeofenceError::TooManyGeofences(self.capacity));
        }

        let mut region = Region {
            request,
            registered_at: Instant::now(),
            inside: false,
        };
        // Initial trigger: already inside at registration counts as entering.
        if let Some((lat, lon)) = table.position {
            if region.contains(lat, lon) {
                region.inside = true;
                if region.request.transition == Transition::Enter {
                    self.emit_enter(&region.request.payload);
                }
            }
        }
        table.regions.insert(region.request.key, region);
        Ok(())
    }

    async fn unregister(&self, key: ReminderId) -> Result<(), GeofenceError> {
        self.check_available()?;
        lock(&self.table).regions.remove(&key);
        Ok(())
    }
}

/// Great-circle distance in meters (haversine).
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Writes notifications to the log and keeps the currently shown ones.
#[derive(Default)]
pub struct TracingNotifier {
    shown: Mutex<HashMap<ReminderId, Notification>>,
}

impl TracingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self, id: ReminderId) -> Option<Notification> {
        lock(&self.shown).get(&id).cloned()
    }

    pub fn shown_count(&self) -> usize {
        lock(&self.shown).len()
    }
}

impl NotificationFacility for TracingNotifier {
    fn show(&self, notification: Notification) {
        tracing::info!(
            reminder = notification.id,
            "Notification: {} ({})",
            notification.title,
            notification.body
        );
        lock(&self.shown).insert(notification.id, notification);
    }

    fn cancel(&self, id: ReminderId) {
        lock(&self.shown).remove(&id);
    }
}

/// Permissions fixed at startup, adjustable in tests.
pub struct StaticPermissions {
    fine: AtomicBool,
    background: Option<AtomicBool>,
}

impl StaticPermissions {
    /// All location permissions granted, with a background tier.
    pub fn granted() -> Self {
        Self {
            fine: AtomicBool::new(true),
            background: Some(AtomicBool::new(true)),
        }
    }

    pub fn new(fine: bool, background: Option<bool>) -> Self {
        Self {
            fine: AtomicBool::new(fine),
            background: background.map(AtomicBool::new),
        }
    }

    pub fn set_fine(&self, granted: bool) {
        self.fine.store(granted, Ordering::SeqCst);
    }

    /// No-op on a platform without a background tier.
    pub fn set_background(&self, granted: bool) {
        if let Some(background) = &self.background {
            background.store(granted, Ordering::SeqCst);
        }
    }
}

impl LocationPermissions for StaticPermissions {
    fn fine_location_granted(&self) -> bool {
        self.fine.load(Ordering::SeqCst)
    }

    fn background_location_granted(&self) -> Option<bool> {
        self.background.as_ref().map(|b| b.load(Ordering::SeqCst))
    }
}

/// The concrete in-process services, kept typed so callers can inspect them.
pub struct LocalPlatform {
    pub alarms: Arc<TokioAlarmClock>,
    pub geofences: Arc<SimulatedGeofences>,
    pub notifications: Arc<TracingNotifier>,
    pub permissions: Arc<StaticPermissions>,
}

impl LocalPlatform {
    pub fn new(events: UnboundedSender<PlatformEvent>, permissions: StaticPermissions) -> Result<Self> {
        Ok(Self {
            alarms: Arc::new(TokioAlarmClock::new(events.clone())?),
            geofences: Arc::new(SimulatedGeofences::new(events)),
            notifications: Arc::new(TracingNotifier::new()),
            permissions: Arc::new(permissions),
        })
    }

    pub fn platform(&self) -> crate::Platform {
        crate::Platform {
            alarms: self.alarms.clone(),
            geofences: self.geofences.clone(),
            notifications: self.notifications.clone(),
            permissions: self.permissions.clone(),
        }
    }
}
