use std::sync::Arc;

use crate::db::ReminderStore;
use crate::error::{ReminderError, ReminderResult};
use crate::scheduler::{Armed, TriggerScheduler};
use crate::types::{now_ms, Place, Reminder, ReminderId, TriggerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created(ReminderId),
    Updated(ReminderId),
    /// An existing reminder was saved empty and got deleted.
    Deleted(ReminderId),
    /// A new reminder was saved empty; nothing was written.
    Discarded,
}

/// What arming a date-time trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTimeArmed {
    pub armed: Armed,
    /// The target time has already passed; the caller should warn the user.
    pub already_due: bool,
}

/// The user-facing reminder workflows. Every change to a trigger's armed flag
/// goes together with the matching alarm/geofence change.
pub struct ReminderService {
    store: Arc<dyn ReminderStore>,
    triggers: Arc<TriggerScheduler>,
}

impl ReminderService {
    pub fn new(store: Arc<dyn ReminderStore>, triggers: Arc<TriggerScheduler>) -> Self {
        Self { store, triggers }
    }

    pub fn list(&self) -> ReminderResult<Vec<Reminder>> {
        Ok(self.store.get_all()?)
    }

    /// Load a reminder for editing.
    pub fn load(&self, id: ReminderId) -> ReminderResult<Reminder> {
        self.store
            .get_by_id(id)?
            .ok_or(ReminderError::NotFound(id))
    }

    /// Persist an edited or new reminder.
    ///
    /// Empty reminders are never kept: a new one is discarded, an existing one is
    /// deleted. A reminder with a description but no title is rejected. Triggers
    /// marked armed on the draft are armed after the write.
    pub async fn save(&self, mut draft: Reminder) -> ReminderResult<SaveOutcome> {
        if draft.is_empty() {
            if draft.is_new() {
                tracing::debug!("Discarding empty new reminder");
                return Ok(SaveOutcome::Discarded);
            }
            self.delete(draft.id).await?;
            return Ok(SaveOutcome::Deleted(draft.id));
        }
        if draft.title.is_empty() {
            return Err(ReminderError::MissingTitle);
        }

        let now = now_ms();
        draft.edited_ms = now;
        let outcome = if draft.is_new() {
            draft.created_ms = now;
            draft.id = self.store.insert(&draft)?;
            SaveOutcome::Created(draft.id)
        } else {
            let stored = self.load(draft.id)?;
            if self.store.update(&draft)? == 0 {
                return Err(ReminderError::NotFound(draft.id));
            }
            // Triggers the edit switched off lose their alarm/geofence too.
            if stored.date_time_armed && !draft.date_time_armed {
                self.triggers.disarm_date_time(draft.id);
            }
            if stored.location_armed && !draft.location_armed {
                self.triggers.disarm_location(draft.id).await;
            }
            SaveOutcome::Updated(draft.id)
        };

        // Re-arming also refreshes the title/description the alarm carries.
        if draft.date_time_armed {
            self.arm_date_time_for(&draft)?;
        }
        if draft.location_armed {
            self.arm_location_for(&draft).await?;
        }
        Ok(outcome)
    }

    pub fn set_completed(&self, id: ReminderId, completed: bool) -> ReminderResult<()> {
        if self.store.set_completed(id, completed)? == 0 {
            return Err(ReminderError::NotFound(id));
        }
        Ok(())
    }

    /// Arm (or move) the date-time trigger to `at_ms`.
    pub fn arm_date_time(&self, id: ReminderId, at_ms: i64) -> ReminderResult<DateTimeArmed> {
        if self.store.set_date_time_armed(id, true, Some(at_ms))? == 0 {
            return Err(ReminderError::NotFound(id));
        }
        let reminder = self.load(id)?;
        let armed = self.arm_date_time_for(&reminder)?;
        Ok(DateTimeArmed {
            armed,
            already_due: at_ms <= now_ms(),
        })
    }

    /// Cancel the date-time trigger. The row of a reminder whose trigger is not
    /// armed (or that no longer exists) is left as it is.
    pub fn disarm_date_time(&self, id: ReminderId) -> ReminderResult<()> {
        self.triggers.disarm_date_time(id);
        if self.is_armed(id, TriggerKind::DateTime)? {
            self.store.set_date_time_armed(id, false, None)?;
        }
        Ok(())
    }

    /// Arm (or move) the location trigger to `place`.
    pub async fn arm_location(&self, id: ReminderId, place: Place) -> ReminderResult<Armed> {
        if self.store.set_location_armed(id, true, Some(&place))? == 0 {
            return Err(ReminderError::NotFound(id));
        }
        let reminder = self.load(id)?;
        self.arm_location_for(&reminder).await
    }

    /// Remove the geofence. A place kept on an unarmed reminder survives.
    pub async fn disarm_location(&self, id: ReminderId) -> ReminderResult<()> {
        self.triggers.disarm_location(id).await;
        if self.is_armed(id, TriggerKind::Location)? {
            self.store.set_location_armed(id, false, None)?;
        }
        Ok(())
    }

    fn is_armed(&self, id: ReminderId, kind: TriggerKind) -> ReminderResult<bool> {
        Ok(self
            .store
            .get_by_id(id)?
            .is_some_and(|reminder| reminder.is_armed(kind)))
    }

    /// Delete a reminder together with its alarm, geofence and notification.
    /// Returns the number of rows removed.
    pub async fn delete(&self, id: ReminderId) -> ReminderResult<usize> {
        if id < 1 {
            return Ok(0);
        }
        self.triggers.disarm_date_time(id);
        self.triggers.disarm_location(id).await;
        Ok(self.store.delete_by_id(id)?)
    }

    /// Delete every completed reminder and disarm what they had armed.
    pub async fn delete_completed(&self) -> ReminderResult<usize> {
        let completed = self.store.get_completed()?;
        let deleted = self.store.delete_completed()?;
        for reminder in &completed {
            if reminder.date_time_armed {
                self.triggers.disarm_date_time(reminder.id);
            }
            if reminder.location_armed {
                self.triggers.disarm_location(reminder.id).await;
            }
        }
        tracing::info!("Deleted {deleted} completed reminder(s)");
        Ok(deleted)
    }

    /// Put back a reminder that was just deleted, under its old id, and re-arm
    /// whatever it had armed.
    pub async fn restore(&self, reminder: Reminder) -> ReminderResult<ReminderId> {
        let id = self.store.insert(&reminder)?;
        let restored = Reminder { id, ..reminder };
        if restored.date_time_armed {
            self.arm_date_time_for(&restored)?;
        }
        if restored.location_armed {
            self.arm_location_for(&restored).await?;
        }
        Ok(id)
    }

    fn arm_date_time_for(&self, reminder: &Reminder) -> ReminderResult<Armed> {
        let armed = self.triggers.arm_date_time(reminder);
        if armed != Armed::Scheduled {
            // Armed without a time to fire at: keep the flag honest.
            self.store.set_date_time_armed(reminder.id, false, None)?;
        }
        Ok(armed)
    }

    /// Arm the geofence; when it could not be registered the stored flag is
    /// forced back to false so it never claims a geofence that does not exist.
    async fn arm_location_for(&self, reminder: &Reminder) -> ReminderResult<Armed> {
        let armed = self.triggers.arm_location(reminder).await;
        if let Armed::Skipped(reason) = armed {
            tracing::warn!(
                "Location reminder {} not armed ({reason:?}), clearing its flag",
                reminder.id
            );
            self.store
                .set_location_armed(reminder.id, false, reminder.place.as_ref())?;
        }
        Ok(armed)
    }
}
