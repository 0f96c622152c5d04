use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{EmployeeId, ShopId, UserId, WorkTypeId, WorkerDayId};

/// Plan vs fact layer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GraphType {
    Plan,
    Fact,
}

impl GraphType {
    pub fn is_fact(self) -> bool {
        self == GraphType::Fact
    }

    pub fn from_is_fact(is_fact: bool) -> Self {
        if is_fact { GraphType::Fact } else { GraphType::Plan }
    }
}

/// Creation provenance of a record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerDaySource {
    ManualQuick,
    ManualFull,
    Copy,
    Algo,
    AutoVacancy,
    Exchange,
    Upload,
    ChangeRange,
    AttendanceRecalc,
    Integration,
}

/// Slice of a day attributed to a work type; parts across a day sum to ≤ 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDayDetail {
    pub work_type_id: WorkTypeId,
    pub work_part: f64,
}

/// Natural key: (employee, date, is_fact, is_approved).
pub type WdKey = (EmployeeId, NaiveDate, bool, bool);

/// The central record: one shift or absence for one employee on one date, in
/// one cell of the plan/fact × draft/approved matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDay {
    pub id: WorkerDayId,
    pub employee_id: EmployeeId,
    pub dt: NaiveDate,
    pub type_code: String,
    pub shop_id: Option<ShopId>,
    pub dttm_work_start: Option<NaiveDateTime>,
    pub dttm_work_end: Option<NaiveDateTime>,
    /// Net duration in hours, 2 decimals.
    pub work_hours: f64,
    pub is_fact: bool,
    pub is_approved: bool,
    pub is_vacancy: bool,
    pub source: WorkerDaySource,
    /// Back-link from a fact record to the plan-approved record it matched.
    pub closest_plan_approved: Option<WorkerDayId>,
    /// Approved→draft lineage used for detail reattachment.
    pub parent_worker_day: Option<WorkerDayId>,
    pub cost_per_hour: Option<f64>,
    pub created_by: Option<UserId>,
    pub last_edited_by: Option<UserId>,
    pub dttm_modified: NaiveDateTime,
    /// Optimistic concurrency counter, bumped on every write.
    pub version: u64,
    pub details: Vec<WorkerDayDetail>,
}

impl WorkerDay {
    /// Fresh unsaved record; the store assigns `id` and `version` on insert.
    pub fn new(
        employee_id: EmployeeId,
        dt: NaiveDate,
        type_code: &str,
        graph_type: GraphType,
        source: WorkerDaySource,
    ) -> Self {
        Self {
            id: 0,
            employee_id,
            dt,
            type_code: type_code.to_string(),
            shop_id: None,
            dttm_work_start: None,
            dttm_work_end: None,
            work_hours: 0.0,
            is_fact: graph_type.is_fact(),
            is_approved: false,
            is_vacancy: false,
            source,
            closest_plan_approved: None,
            parent_worker_day: None,
            cost_per_hour: None,
            created_by: None,
            last_edited_by: None,
            dttm_modified: dt.and_time(chrono::NaiveTime::MIN),
            version: 0,
            details: Vec::new(),
        }
    }

    pub fn with_interval(
        mut self,
        shop_id: ShopId,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Self {
        self.shop_id = Some(shop_id);
        self.dttm_work_start = Some(start);
        self.dttm_work_end = Some(end);
        self
    }

    pub fn graph_type(&self) -> GraphType {
        GraphType::from_is_fact(self.is_fact)
    }

    pub fn key(&self) -> WdKey {
        (self.employee_id, self.dt, self.is_fact, self.is_approved)
    }

    pub fn interval(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        match (self.dttm_work_start, self.dttm_work_end) {
            (Some(s), Some(e)) => Some((s, e)),
            _ => None,
        }
    }

    /// True when the two records describe the same day content, ignoring
    /// identity, lineage and audit columns. Used to make approval idempotent.
    pub fn same_content(&self, other: &WorkerDay) -> bool {
        self.type_code == other.type_code
            && self.shop_id == other.shop_id
            && self.dttm_work_start == other.dttm_work_start
            && self.dttm_work_end == other.dttm_work_end
            && self.details == other.details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn key_reflects_matrix_cell() {
        let mut wd = WorkerDay::new(1, d(2024, 3, 10), "W", GraphType::Plan, WorkerDaySource::ManualFull);
        assert_eq!(wd.key(), (1, d(2024, 3, 10), false, false));
        wd.is_approved = true;
        wd.is_fact = true;
        assert_eq!(wd.key(), (1, d(2024, 3, 10), true, true));
        assert_eq!(wd.graph_type(), GraphType::Fact);
    }

    #[test]
    fn same_content_ignores_lineage() {
        let a = WorkerDay::new(1, d(2024, 3, 10), "W", GraphType::Plan, WorkerDaySource::ManualFull);
        let mut b = a.clone();
        b.id = 99;
        b.parent_worker_day = Some(7);
        b.version = 4;
        assert!(a.same_content(&b));
        b.type_code = "H".into();
        assert!(!a.same_content(&b));
    }
}
