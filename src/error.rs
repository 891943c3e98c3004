use thiserror::Error;

use crate::jobs::Job;
use crate::types::ReminderId;

/// Errors surfaced by the reminder workflows.
#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("reminder {0} not found")]
    NotFound(ReminderId),
    #[error("reminder needs a title")]
    MissingTitle,
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type ReminderResult<T> = std::result::Result<T, ReminderError>;

/// Failures reported asynchronously by a geofence facility. These are only
/// ever logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeofenceError {
    #[error("geofence service unavailable")]
    Unavailable,
    #[error("too many geofences registered (limit {0})")]
    TooManyGeofences(usize),
    #[error("geofence request rejected: {0}")]
    Rejected(String),
}

/// Why a job could not be handed to the job service.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("job queue is full, dropped {0:?}")]
    Full(Job),
    #[error("job service is gone, dropped {0:?}")]
    Closed(Job),
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = ReminderError::NotFound(42);
        assert_eq!(err.to_string(), "reminder 42 not found");
    }

    #[test]
    fn test_store_error_keeps_source() {
        let err = ReminderError::from(anyhow::anyhow!("disk I/O error"));
        assert_eq!(err.to_string(), "store error: disk I/O error");
        assert!(matches!(err, ReminderError::Store(_)));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_queue_error_names_the_job() {
        let err = QueueError::Full(Job::SetCompleted { id: 3, completed: true });
        assert!(err.to_string().contains("SetCompleted"));
    }
}
