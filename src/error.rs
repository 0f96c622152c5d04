use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::model::permission::WdPermissionAction;
use crate::model::worker_day::GraphType;
use crate::model::{EmployeeId, UserId, WorkerDayId};

/// Predicate that made a permission tuple fail, reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DenyPredicate {
    NoMatchingTuple,
    EmployeeScope,
    ShopScope,
    DtWindow,
    VacancyForbidden,
    UnknownDayType,
}

/// Structured denial: which tuple was closest and which predicate it failed.
#[derive(Debug, Clone, Serialize)]
pub struct DenyReason {
    pub tuple_id: Option<u64>,
    pub predicate: DenyPredicate,
    pub actor: UserId,
    pub action: WdPermissionAction,
    pub graph_type: GraphType,
    pub day_type: String,
    pub employee_id: EmployeeId,
    pub dt: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("worker day already exists for employee {employee_id} on {dt} (fact={is_fact}, approved={is_approved})")]
    Uniqueness {
        employee_id: EmployeeId,
        dt: NaiveDate,
        is_fact: bool,
        is_approved: bool,
    },
    #[error("day type {code:?} is unknown")]
    UnknownDayType { code: String },
    #[error("day type {code:?} is not usable in the {graph_type} graph")]
    TypeNotAllowedInGraph { code: String, graph_type: GraphType },
    #[error("type {code:?} and fields do not align: {detail}")]
    FieldsMismatch { code: String, detail: String },
    #[error("work end must be after work start")]
    EndBeforeStart,
    #[error("shift of {seconds}s exceeds the {cap}s cap")]
    ShiftOverCap { seconds: i64, cap: i64 },
    #[error("details work parts sum to {sum}, more than a whole day")]
    DetailsOverflow { sum: f64 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("permission denied: {} on {} {} for employee {} at {} ({})",
        .0.action, .0.graph_type, .0.day_type, .0.employee_id, .0.dt, .0.predicate)]
    PermissionDenied(Box<DenyReason>),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("concurrent write on worker day {id}: expected version {expected}, found {found}")]
    Conflict {
        id: WorkerDayId,
        expected: u64,
        found: u64,
    },

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transient failure, retry later: {0}")]
    Transient(String),
}

impl Error {
    pub fn denied(reason: DenyReason) -> Self {
        Error::PermissionDenied(Box::new(reason))
    }

    /// True for errors the caller may retry verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Transient(_) | Error::Conflict { .. })
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound {
                entity: "row",
                id: 0,
            },
            other => Error::Transient(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
