use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{BreakPolicyId, EmployeeId, EmploymentId, PositionId, ShopId, UserId, WorkTypeId};

/// An identity bound to a user; unique by tabel code when one is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub user_id: UserId,
    pub tabel_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub title: String,
    /// Weekly norm for a full-rate employment, hours.
    pub hours_in_a_week: f64,
    pub break_policy_id: Option<BreakPolicyId>,
    /// Work type inherited by reconciled facts when the plan carries none.
    pub default_work_type_id: Option<WorkTypeId>,
}

/// Time-bounded assignment of an employee to a shop with a position.
/// Several employments may overlap; soft-deleted rows stay for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employment {
    pub id: EmploymentId,
    pub employee_id: EmployeeId,
    pub shop_id: ShopId,
    pub position_id: PositionId,
    /// Percentage of the position norm, 100.0 for a full rate.
    pub norm_work_hours: f64,
    pub dt_hired: NaiveDate,
    pub dt_fired: Option<NaiveDate>,
    /// Mon..Sun availability; `None` means every day.
    pub week_availability: Option<[bool; 7]>,
    pub dttm_deleted: Option<NaiveDateTime>,
}

impl Employment {
    pub fn active_at(&self, dt: NaiveDate) -> bool {
        self.dttm_deleted.is_none()
            && self.dt_hired <= dt
            && self.dt_fired.map(|fired| fired >= dt).unwrap_or(true)
    }
}
