pub mod approval;
pub mod batch;
pub mod hours;
pub mod permissions;
pub mod reconcile;
pub mod timesheet;

use chrono::NaiveDate;

use crate::model::UserId;

/// Per-request context: who acts and what "today" is for date-window checks.
/// Passed explicitly; the core keeps no thread-local request state.
#[derive(Debug, Clone, Copy)]
pub struct RequestCtx {
    pub actor: UserId,
    pub today: NaiveDate,
}

impl RequestCtx {
    pub fn new(actor: UserId, today: NaiveDate) -> Self {
        Self { actor, today }
    }
}
