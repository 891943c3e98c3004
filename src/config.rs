use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::{JobDeadlines, BOOT_DEADLINE, RECONCILE_DEADLINE};
use crate::local::StaticPermissions;
use crate::scheduler::{GeofenceSettings, DEFAULT_GEOFENCE_EXPIRY, DEFAULT_GEOFENCE_RADIUS_M};

const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Which location permissions the in-process platform reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationPermission {
    /// Fine and background location.
    Granted,
    /// Fine location only; geofences are refused.
    Foreground,
    Denied,
}

impl LocationPermission {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "granted" => Ok(Self::Granted),
            "foreground" => Ok(Self::Foreground),
            "denied" => Ok(Self::Denied),
            other => bail!("unknown location permission '{other}' (granted, foreground, denied)"),
        }
    }

    pub fn to_permissions(self) -> StaticPermissions {
        match self {
            Self::Granted => StaticPermissions::new(true, Some(true)),
            Self::Foreground => StaticPermissions::new(true, Some(false)),
            Self::Denied => StaticPermissions::new(false, Some(false)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub geofence: GeofenceSettings,
    pub deadlines: JobDeadlines,
    pub queue_capacity: usize,
    pub location_permission: LocationPermission,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            geofence: GeofenceSettings {
                radius_m: DEFAULT_GEOFENCE_RADIUS_M,
                expiry: DEFAULT_GEOFENCE_EXPIRY,
            },
            deadlines: JobDeadlines {
                reconcile: RECONCILE_DEADLINE,
                boot: BOOT_DEADLINE,
            },
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            location_permission: LocationPermission::Granted,
        }
    }
}

impl Config {
    /// Defaults overridden by `GEOFICATIONS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("GEOFICATIONS_DB") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(radius) = lookup("GEOFICATIONS_GEOFENCE_RADIUS_M") {
            let radius: f32 = radius
                .trim()
                .parse()
                .with_context(|| format!("GEOFICATIONS_GEOFENCE_RADIUS_M='{radius}'"))?;
            if !(radius > 0.0) {
                bail!("GEOFICATIONS_GEOFENCE_RADIUS_M must be positive, got {radius}");
            }
            config.geofence.radius_m = radius;
        }
        if let Some(days) = lookup("GEOFICATIONS_GEOFENCE_EXPIRY_DAYS") {
            let days: u64 = days
                .trim()
                .parse()
                .with_context(|| format!("GEOFICATIONS_GEOFENCE_EXPIRY_DAYS='{days}'"))?;
            let secs = days
                .checked_mul(24 * 60 * 60)
                .with_context(|| format!("GEOFICATIONS_GEOFENCE_EXPIRY_DAYS={days} is out of range"))?;
            config.geofence.expiry = Duration::from_secs(secs);
        }
        if let Some(capacity) = lookup("GEOFICATIONS_QUEUE_CAPACITY") {
            config.queue_capacity = capacity
                .trim()
                .parse()
                .with_context(|| format!("GEOFICATIONS_QUEUE_CAPACITY='{capacity}'"))?;
            if config.queue_capacity == 0 {
                bail!("GEOFICATIONS_QUEUE_CAPACITY must be at least 1");
            }
        }
        if let Some(permission) = lookup("GEOFICATIONS_LOCATION_PERMISSION") {
            config.location_permission = LocationPermission::parse(&permission)
                .context("GEOFICATIONS_LOCATION_PERMISSION")?;
        }
        Ok(config)
    }
}

/// Per-user data location for the reminder database.
pub fn default_db_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(app_data) = std::env::var("APPDATA") {
            return PathBuf::from(app_data)
                .join("Geofications")
                .join("geofications.sqlite");
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local/share/geofications")
                .join("geofications.sqlite");
        }
    }

    PathBuf::from("geofications.sqlite")
}
