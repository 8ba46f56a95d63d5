use chrono::{DateTime, NaiveDateTime};
use chrono_tz::Tz;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not reconciled against bookkeeping yet.
    Undefined,
    Pending,
    Executed,
}

/// Identity and lifecycle status of one migration.
///
/// Values are never mutated: [`State::with_status`] derives a new one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct State {
    name: String,
    time_created: NaiveDateTime,
    status: Status,
    time_executed: Option<DateTime<Tz>>,
}

impl State {
    pub fn new(name: impl Into<String>, time_created: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            time_created,
            status: Status::Undefined,
            time_executed: None,
        }
    }

    /// Copy of this state with a new status.
    ///
    /// # Panics
    ///
    /// When `Executed` comes without an execution time, or any other status
    /// comes with one.
    pub fn with_status(&self, status: Status, time_executed: Option<DateTime<Tz>>) -> Self {
        assert_eq!(
            status == Status::Executed,
            time_executed.is_some(),
            "state {}: status {status:?} is inconsistent with time_executed {time_executed:?}",
            self.name
        );

        Self {
            name: self.name.clone(),
            time_created: self.time_created,
            status,
            time_executed,
        }
    }

    pub fn pending(&self) -> Self {
        self.with_status(Status::Pending, None)
    }

    pub fn executed(&self, at: DateTime<Tz>) -> Self {
        self.with_status(Status::Executed, Some(at))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time_created(&self) -> NaiveDateTime {
        self.time_created
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn time_executed(&self) -> Option<&DateTime<Tz>> {
        self.time_executed.as_ref()
    }
}
