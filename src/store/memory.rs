use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::NetworkSettings;
use crate::error::{Error, InvariantViolation, Result};
use crate::model::day_type::codes;
use crate::model::{
    AttendanceRecord, EmployeeId, OrgDirectory, ShopId, TimesheetRow, WorkerDay, WorkerDayId,
};
use crate::registry::DayTypeRegistry;

use super::{normalize_record, ApprovalEvent, QuerySpec, WorkerDayStore, WriteOp};

#[derive(Default)]
struct State {
    days: BTreeMap<WorkerDayId, WorkerDay>,
    next_day_id: WorkerDayId,
    attendance: Vec<AttendanceRecord>,
    next_att_id: u64,
    timesheets: BTreeMap<(EmployeeId, NaiveDate), TimesheetRow>,
    approvals: Vec<ApprovalEvent>,
}

/// Reference store implementation: the whole worker-day table behind one
/// RwLock, with a staged copy per batch so a failing op leaves nothing
/// behind. Authoritative for the invariant suite; the MySQL adapter mirrors
/// the same semantics for deployments.
pub struct InMemoryStore {
    registry: Arc<DayTypeRegistry>,
    settings: NetworkSettings,
    org: Arc<OrgDirectory>,
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new(
        registry: Arc<DayTypeRegistry>,
        settings: NetworkSettings,
        org: Arc<OrgDirectory>,
    ) -> Self {
        Self {
            registry,
            settings,
            org,
            state: RwLock::new(State { next_day_id: 1, next_att_id: 1, ..State::default() }),
        }
    }

    fn check_uniqueness(
        &self,
        days: &BTreeMap<WorkerDayId, WorkerDay>,
        candidate: &WorkerDay,
    ) -> Result<()> {
        if self
            .settings
            .allow_creation_several_wdays_for_one_employee_for_one_date
        {
            return Ok(());
        }
        let clash = days.values().any(|wd| {
            wd.id != candidate.id && wd.type_code != codes::DELETED && wd.key() == candidate.key()
        });
        if clash {
            return Err(InvariantViolation::Uniqueness {
                employee_id: candidate.employee_id,
                dt: candidate.dt,
                is_fact: candidate.is_fact,
                is_approved: candidate.is_approved,
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerDayStore for InMemoryStore {
    async fn get(&self, id: WorkerDayId) -> Result<Option<WorkerDay>> {
        Ok(self.state.read().await.days.get(&id).cloned())
    }

    async fn fetch(&self, spec: &QuerySpec) -> Result<Vec<WorkerDay>> {
        let state = self.state.read().await;
        let mut rows: Vec<WorkerDay> = state
            .days
            .values()
            .filter(|wd| spec.matches(wd))
            .cloned()
            .collect();
        rows.sort_by_key(|wd| (wd.employee_id, wd.dt, wd.id));
        Ok(rows)
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> Result<Vec<WorkerDay>> {
        let mut state = self.state.write().await;
        // Stage on a copy; swap only after the whole batch validated.
        let mut staged = state.days.clone();
        let mut next_id = state.next_day_id;
        let mut written = Vec::with_capacity(ops.len());
        let now = Utc::now().naive_utc();

        for op in ops {
            match op {
                WriteOp::Insert(mut rec) => {
                    normalize_record(&mut rec, &self.registry, &self.settings, &self.org)?;
                    rec.id = next_id;
                    next_id += 1;
                    rec.version = 1;
                    rec.dttm_modified = now;
                    self.check_uniqueness(&staged, &rec)?;
                    staged.insert(rec.id, rec.clone());
                    written.push(rec);
                }
                WriteOp::Update(mut rec) => {
                    let current = staged.get(&rec.id).ok_or(Error::NotFound {
                        entity: "worker_day",
                        id: rec.id,
                    })?;
                    if current.version != rec.version {
                        return Err(Error::Conflict {
                            id: rec.id,
                            expected: rec.version,
                            found: current.version,
                        });
                    }
                    normalize_record(&mut rec, &self.registry, &self.settings, &self.org)?;
                    self.check_uniqueness(&staged, &rec)?;
                    rec.version += 1;
                    rec.dttm_modified = now;
                    staged.insert(rec.id, rec.clone());
                    written.push(rec);
                }
                WriteOp::SoftDelete(id) => {
                    let current = staged.get_mut(&id).ok_or(Error::NotFound {
                        entity: "worker_day",
                        id,
                    })?;
                    if current.is_fact && current.is_approved {
                        info!(
                            worker_day_id = id,
                            employee_id = current.employee_id,
                            dt = %current.dt,
                            "approved fact record soft-deleted"
                        );
                    }
                    current.type_code = codes::DELETED.to_string();
                    current.version += 1;
                    current.dttm_modified = now;
                    written.push(current.clone());
                }
            }
        }

        state.days = staged;
        state.next_day_id = next_id;
        Ok(written)
    }

    async fn append_attendance(&self, mut rec: AttendanceRecord) -> Result<AttendanceRecord> {
        let mut state = self.state.write().await;
        rec.id = state.next_att_id;
        state.next_att_id += 1;
        state.attendance.push(rec.clone());
        Ok(rec)
    }

    async fn fetch_attendance(
        &self,
        employee_id: EmployeeId,
        dt_from: NaiveDate,
        dt_to: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>> {
        let state = self.state.read().await;
        let mut rows: Vec<AttendanceRecord> = state
            .attendance
            .iter()
            .filter(|r| r.employee_id == employee_id && r.dt >= dt_from && r.dt <= dt_to)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.dttm, r.id));
        Ok(rows)
    }

    async fn put_timesheet(&self, rows: Vec<TimesheetRow>) -> Result<()> {
        let mut state = self.state.write().await;
        for row in rows {
            state.timesheets.insert((row.employee_id, row.dt), row);
        }
        Ok(())
    }

    async fn fetch_timesheet(
        &self,
        employee_id: EmployeeId,
        dt_from: NaiveDate,
        dt_to: NaiveDate,
    ) -> Result<Vec<TimesheetRow>> {
        let state = self.state.read().await;
        Ok(state
            .timesheets
            .range((employee_id, dt_from)..=(employee_id, dt_to))
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn record_approval(&self, event: ApprovalEvent) -> Result<()> {
        self.state.write().await.approvals.push(event);
        Ok(())
    }

    async fn fetch_approvals(&self, shop_id: ShopId) -> Result<Vec<ApprovalEvent>> {
        let state = self.state.read().await;
        Ok(state
            .approvals
            .iter()
            .filter(|a| a.shop_id == shop_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::model::worker_day::{GraphType, WorkerDaySource};
    use crate::model::{BreakPolicy, BreakRule, Employee, Employment, Position, Shop};
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn org() -> Arc<OrgDirectory> {
        let mut org = OrgDirectory::new();
        org.employees.insert(1, Employee { id: 1, user_id: 11, tabel_code: None });
        org.shops.insert(
            1,
            Shop { id: 1, network_id: 1, title: "sh1".into(), region_id: None, break_policy_id: Some(1) },
        );
        org.shops.insert(
            2,
            Shop { id: 2, network_id: 1, title: "sh2".into(), region_id: None, break_policy_id: Some(1) },
        );
        org.break_policies.insert(
            1,
            BreakPolicy::new(1, "std", vec![BreakRule { min_shift_minutes: 540, breaks_minutes: vec![30, 30, 15] }]),
        );
        org.positions.insert(
            1,
            Position {
                id: 1,
                title: "clerk".into(),
                hours_in_a_week: 40.0,
                break_policy_id: None,
                default_work_type_id: None,
            },
        );
        org.employments.push(Employment {
            id: 1,
            employee_id: 1,
            shop_id: 1,
            position_id: 1,
            norm_work_hours: 100.0,
            dt_hired: d(2024, 1, 1),
            dt_fired: None,
            week_availability: None,
            dttm_deleted: None,
        });
        Arc::new(org)
    }

    fn store() -> InMemoryStore {
        let registry = Arc::new(DayTypeRegistry::with_builtin(EventBus::default()));
        InMemoryStore::new(registry, NetworkSettings::default(), org())
    }

    fn plan_draft(dt: NaiveDate) -> WorkerDay {
        WorkerDay::new(1, dt, "W", GraphType::Plan, WorkerDaySource::ManualFull).with_interval(
            1,
            dt.and_hms_opt(9, 0, 0).unwrap(),
            dt.and_hms_opt(18, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn insert_computes_hours_and_assigns_identity() {
        let store = store();
        let rows = store
            .apply(vec![WriteOp::Insert(plan_draft(d(2024, 3, 10)))])
            .await
            .unwrap();
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].version, 1);
        // 9h gross − 75m of breaks
        assert_eq!(rows[0].work_hours, 7.75);
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected_and_nothing_lands() {
        let store = store();
        let dt = d(2024, 3, 10);
        let err = store
            .apply(vec![
                WriteOp::Insert(plan_draft(dt)),
                WriteOp::Insert(plan_draft(dt)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Invariant(InvariantViolation::Uniqueness { .. })
        ));
        let spec = QuerySpec::range(dt, dt);
        assert!(store.fetch(&spec).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn several_wdays_flag_lifts_uniqueness() {
        let registry = Arc::new(DayTypeRegistry::with_builtin(EventBus::default()));
        let mut settings = NetworkSettings::default();
        settings.allow_creation_several_wdays_for_one_employee_for_one_date = true;
        let store = InMemoryStore::new(registry, settings, org());
        let dt = d(2024, 3, 10);
        store
            .apply(vec![
                WriteOp::Insert(plan_draft(dt)),
                WriteOp::Insert(plan_draft(dt)),
            ])
            .await
            .unwrap();
        assert_eq!(store.fetch(&QuerySpec::range(dt, dt)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let store = store();
        let dt = d(2024, 3, 10);
        let mut saved = store
            .apply(vec![WriteOp::Insert(plan_draft(dt))])
            .await
            .unwrap()
            .remove(0);
        saved.version = 7;
        let err = store.apply(vec![WriteOp::Update(saved)]).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn soft_delete_keeps_the_row_out_of_default_fetches() {
        let store = store();
        let dt = d(2024, 3, 10);
        let saved = store
            .apply(vec![WriteOp::Insert(plan_draft(dt))])
            .await
            .unwrap()
            .remove(0);
        store.apply(vec![WriteOp::SoftDelete(saved.id)]).await.unwrap();

        let spec = QuerySpec::range(dt, dt);
        assert!(store.fetch(&spec).await.unwrap().is_empty());
        let with_deleted = store.fetch(&spec.clone().with_deleted()).await.unwrap();
        assert_eq!(with_deleted.len(), 1);
        assert_eq!(with_deleted[0].type_code, "D");
    }

    #[tokio::test]
    async fn dayoff_gets_shop_from_employment_and_forbids_times() {
        let store = store();
        let dt = d(2024, 3, 10);
        let vacation = WorkerDay::new(1, dt, "V", GraphType::Plan, WorkerDaySource::ManualFull);
        let rows = store.apply(vec![WriteOp::Insert(vacation)]).await.unwrap();
        assert_eq!(rows[0].shop_id, Some(1));

        let mut bad = WorkerDay::new(1, dt.succ_opt().unwrap(), "V", GraphType::Plan, WorkerDaySource::ManualFull);
        bad.dttm_work_start = dt.and_hms_opt(9, 0, 0);
        bad.dttm_work_end = dt.and_hms_opt(18, 0, 0);
        assert!(store.apply(vec![WriteOp::Insert(bad)]).await.is_err());
    }

    #[tokio::test]
    async fn foreign_shop_marks_vacancy() {
        let store = store();
        let dt = d(2024, 3, 10);
        let mut wd = plan_draft(dt);
        wd.shop_id = Some(2);
        let rows = store.apply(vec![WriteOp::Insert(wd)]).await.unwrap();
        assert!(rows[0].is_vacancy);
    }

    #[tokio::test]
    async fn shift_over_cap_is_rejected() {
        let registry = Arc::new(DayTypeRegistry::with_builtin(EventBus::default()));
        let mut settings = NetworkSettings::default();
        settings.max_work_shift_seconds = 8 * 3600;
        let store = InMemoryStore::new(registry, settings, org());
        let err = store
            .apply(vec![WriteOp::Insert(plan_draft(d(2024, 3, 10)))])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Invariant(InvariantViolation::ShiftOverCap { .. })
        ));
    }
}
