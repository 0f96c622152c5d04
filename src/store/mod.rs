pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::NetworkSettings;
use crate::error::{Error, InvariantViolation, Result};
use crate::model::day_type::codes;
use crate::model::{
    AttendanceRecord, EmployeeId, GraphType, OrgDirectory, ShopId, TimesheetRow, UserId, WorkerDay,
    WorkerDayId,
};
use crate::registry::DayTypeRegistry;
use crate::service::hours;

/// Typed query over the worker-day table; the dynamic "multi-shop" filters
/// of the UI all reduce to this.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub dt_from: NaiveDate,
    pub dt_to: NaiveDate,
    pub employee_ids: Option<Vec<EmployeeId>>,
    pub shop_ids: Option<Vec<ShopId>>,
    pub graph_type: Option<GraphType>,
    pub is_approved: Option<bool>,
    pub include_deleted: bool,
}

impl QuerySpec {
    pub fn range(dt_from: NaiveDate, dt_to: NaiveDate) -> Self {
        Self {
            dt_from,
            dt_to,
            employee_ids: None,
            shop_ids: None,
            graph_type: None,
            is_approved: None,
            include_deleted: false,
        }
    }

    pub fn employees(mut self, ids: Vec<EmployeeId>) -> Self {
        self.employee_ids = Some(ids);
        self
    }

    pub fn shops(mut self, ids: Vec<ShopId>) -> Self {
        self.shop_ids = Some(ids);
        self
    }

    pub fn graph(mut self, graph_type: GraphType) -> Self {
        self.graph_type = Some(graph_type);
        self
    }

    pub fn approved(mut self, is_approved: bool) -> Self {
        self.is_approved = Some(is_approved);
        self
    }

    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn matches(&self, wd: &WorkerDay) -> bool {
        if wd.dt < self.dt_from || wd.dt > self.dt_to {
            return false;
        }
        if !self.include_deleted && wd.type_code == codes::DELETED {
            return false;
        }
        if let Some(ids) = &self.employee_ids {
            if !ids.contains(&wd.employee_id) {
                return false;
            }
        }
        if let Some(ids) = &self.shop_ids {
            match wd.shop_id {
                Some(shop) if ids.contains(&shop) => {}
                _ => return false,
            }
        }
        if let Some(graph) = self.graph_type {
            if wd.is_fact != graph.is_fact() {
                return false;
            }
        }
        if let Some(approved) = self.is_approved {
            if wd.is_approved != approved {
                return false;
            }
        }
        true
    }
}

/// A single write against the worker-day table. Batches of these are
/// applied atomically: either every op lands or none does.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert(WorkerDay),
    Update(WorkerDay),
    SoftDelete(WorkerDayId),
}

/// History row written on every approval commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub actor: UserId,
    pub dttm: NaiveDateTime,
    pub shop_id: ShopId,
    pub graph_type: GraphType,
    pub dt_from: NaiveDate,
    pub dt_to: NaiveDate,
    pub affected: usize,
}

/// The repository boundary (C3). Business logic never mutates persistent
/// records outside of these calls.
#[async_trait]
pub trait WorkerDayStore: Send + Sync {
    async fn get(&self, id: WorkerDayId) -> Result<Option<WorkerDay>>;
    async fn fetch(&self, spec: &QuerySpec) -> Result<Vec<WorkerDay>>;
    /// Atomic batch; returns the written rows in op order (soft deletes
    /// return the tombstoned row).
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<Vec<WorkerDay>>;

    async fn append_attendance(&self, rec: AttendanceRecord) -> Result<AttendanceRecord>;
    async fn fetch_attendance(
        &self,
        employee_id: EmployeeId,
        dt_from: NaiveDate,
        dt_to: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>>;

    async fn put_timesheet(&self, rows: Vec<TimesheetRow>) -> Result<()>;
    async fn fetch_timesheet(
        &self,
        employee_id: EmployeeId,
        dt_from: NaiveDate,
        dt_to: NaiveDate,
    ) -> Result<Vec<TimesheetRow>>;

    async fn record_approval(&self, event: ApprovalEvent) -> Result<()>;
    async fn fetch_approvals(&self, shop_id: ShopId) -> Result<Vec<ApprovalEvent>>;
}

/// Shared write-path normalization: type⇔field alignment, shift cap,
/// day-off shop auto-fill, vacancy detection, interval hours recompute.
/// Both store implementations run this before touching their backing state.
pub(crate) fn normalize_record(
    rec: &mut WorkerDay,
    registry: &DayTypeRegistry,
    settings: &NetworkSettings,
    org: &OrgDirectory,
) -> Result<()> {
    let day_type = registry.require(&rec.type_code)?;

    if !day_type.usable_in(rec.graph_type()) {
        return Err(InvariantViolation::TypeNotAllowedInGraph {
            code: rec.type_code.clone(),
            graph_type: rec.graph_type(),
        }
        .into());
    }

    if day_type.has_interval() {
        let (start, end) = rec.interval().ok_or_else(|| {
            Error::from(InvariantViolation::FieldsMismatch {
                code: rec.type_code.clone(),
                detail: "work type requires both start and end".into(),
            })
        })?;
        let shop_id = rec.shop_id.ok_or_else(|| {
            Error::from(InvariantViolation::FieldsMismatch {
                code: rec.type_code.clone(),
                detail: "work type requires a shop".into(),
            })
        })?;
        if end <= start {
            return Err(InvariantViolation::EndBeforeStart.into());
        }
        let seconds = (end - start).num_seconds();
        if seconds > settings.max_work_shift_seconds {
            return Err(InvariantViolation::ShiftOverCap {
                seconds,
                cap: settings.max_work_shift_seconds,
            }
            .into());
        }
        // A shift crossing midnight belongs to its start date.
        if rec.dt != start.date() {
            return Err(InvariantViolation::FieldsMismatch {
                code: rec.type_code.clone(),
                detail: format!("dt {} must equal the work start date {}", rec.dt, start.date()),
            }
            .into());
        }

        let main = org.main_employment(rec.employee_id, rec.dt);
        let policy = org.break_policy_for(shop_id, main.map(|e| e.position_id))?;
        rec.work_hours = hours::interval_work_hours(start, end, policy);
    } else if day_type.is_dayoff {
        if rec.dttm_work_start.is_some() || rec.dttm_work_end.is_some() {
            return Err(InvariantViolation::FieldsMismatch {
                code: rec.type_code.clone(),
                detail: "day-off type forbids work times".into(),
            }
            .into());
        }
        if rec.shop_id.is_none() {
            rec.shop_id = org.main_employment(rec.employee_id, rec.dt).map(|e| e.shop_id);
        }
    }

    let parts_sum: f64 = rec.details.iter().map(|d| d.work_part).sum();
    if rec.details.iter().any(|d| !(0.0..=1.0).contains(&d.work_part)) || parts_sum > 1.0 + 1e-9 {
        return Err(InvariantViolation::DetailsOverflow { sum: parts_sum }.into());
    }

    if let Some(shop) = rec.shop_id {
        if !rec.is_vacancy && !org.employee_shops_at(rec.employee_id, rec.dt).contains(&shop) {
            rec.is_vacancy = true;
        }
    }

    Ok(())
}
