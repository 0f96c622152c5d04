//! MySQL-backed store. Mirrors the in-memory semantics: the same
//! normalization runs before every write, batches commit in one transaction,
//! soft deletes retype the row to "D".
//!
//! All queries are built at runtime so the crate compiles without a live
//! database.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, MySqlPool, QueryBuilder, Row};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::config::NetworkSettings;
use crate::error::{Error, InvariantViolation, Result};
use crate::model::attendance::AttendanceType;
use crate::model::day_type::codes;
use crate::model::timesheet::FactSource;
use crate::model::worker_day::WorkerDaySource;
use crate::model::{
    AttendanceRecord, EmployeeId, GraphType, OrgDirectory, ShopId, TimesheetRow, WorkerDay,
    WorkerDayDetail, WorkerDayId,
};
use crate::registry::DayTypeRegistry;

use super::{normalize_record, ApprovalEvent, QuerySpec, WorkerDayStore, WriteOp};

pub struct MySqlStore {
    pool: MySqlPool,
    registry: Arc<DayTypeRegistry>,
    settings: NetworkSettings,
    org: Arc<OrgDirectory>,
}

impl MySqlStore {
    pub async fn connect(
        database_url: &str,
        registry: Arc<DayTypeRegistry>,
        settings: NetworkSettings,
        org: Arc<OrgDirectory>,
    ) -> Result<Self> {
        let pool = MySqlPool::connect(database_url).await?;
        Ok(Self { pool, registry, settings, org })
    }

    pub fn with_pool(
        pool: MySqlPool,
        registry: Arc<DayTypeRegistry>,
        settings: NetworkSettings,
        org: Arc<OrgDirectory>,
    ) -> Self {
        Self { pool, registry, settings, org }
    }

    async fn load_details(
        &self,
        ids: &[WorkerDayId],
    ) -> Result<std::collections::HashMap<WorkerDayId, Vec<WorkerDayDetail>>> {
        let mut map: std::collections::HashMap<WorkerDayId, Vec<WorkerDayDetail>> =
            std::collections::HashMap::new();
        if ids.is_empty() {
            return Ok(map);
        }
        let mut qb = QueryBuilder::<MySql>::new(
            "SELECT worker_day_id, work_type_id, work_part FROM worker_day_detail \
             WHERE worker_day_id IN (",
        );
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        qb.push(")");
        for row in qb.build().fetch_all(&self.pool).await? {
            let wd_id: WorkerDayId = row.try_get("worker_day_id")?;
            map.entry(wd_id).or_default().push(WorkerDayDetail {
                work_type_id: row.try_get("work_type_id")?,
                work_part: row.try_get("work_part")?,
            });
        }
        Ok(map)
    }
}

const WD_COLUMNS: &str = "id, employee_id, dt, type_code, shop_id, dttm_work_start, \
     dttm_work_end, work_hours, is_fact, is_approved, is_vacancy, source, \
     closest_plan_approved, parent_worker_day, cost_per_hour, created_by, \
     last_edited_by, dttm_modified, version";

fn worker_day_from_row(row: &MySqlRow) -> Result<WorkerDay> {
    let source: String = row.try_get("source")?;
    Ok(WorkerDay {
        id: row.try_get("id")?,
        employee_id: row.try_get("employee_id")?,
        dt: row.try_get("dt")?,
        type_code: row.try_get("type_code")?,
        shop_id: row.try_get("shop_id")?,
        dttm_work_start: row.try_get("dttm_work_start")?,
        dttm_work_end: row.try_get("dttm_work_end")?,
        work_hours: row.try_get("work_hours")?,
        is_fact: row.try_get("is_fact")?,
        is_approved: row.try_get("is_approved")?,
        is_vacancy: row.try_get("is_vacancy")?,
        source: WorkerDaySource::from_str(&source)
            .map_err(|_| Error::Config(format!("unknown worker day source {source:?}")))?,
        closest_plan_approved: row.try_get("closest_plan_approved")?,
        parent_worker_day: row.try_get("parent_worker_day")?,
        cost_per_hour: row.try_get("cost_per_hour")?,
        created_by: row.try_get("created_by")?,
        last_edited_by: row.try_get("last_edited_by")?,
        dttm_modified: row.try_get("dttm_modified")?,
        version: row.try_get("version")?,
        details: Vec::new(),
    })
}

fn bind_worker_day<'a>(
    qb: &mut sqlx::query_builder::Separated<'_, 'a, MySql, &'static str>,
    rec: &'a WorkerDay,
) {
    qb.push_bind(rec.employee_id);
    qb.push_bind(rec.dt);
    qb.push_bind(rec.type_code.as_str());
    qb.push_bind(rec.shop_id);
    qb.push_bind(rec.dttm_work_start);
    qb.push_bind(rec.dttm_work_end);
    qb.push_bind(rec.work_hours);
    qb.push_bind(rec.is_fact);
    qb.push_bind(rec.is_approved);
    qb.push_bind(rec.is_vacancy);
    qb.push_bind(rec.source.to_string());
    qb.push_bind(rec.closest_plan_approved);
    qb.push_bind(rec.parent_worker_day);
    qb.push_bind(rec.cost_per_hour);
    qb.push_bind(rec.created_by);
    qb.push_bind(rec.last_edited_by);
    qb.push_bind(rec.dttm_modified);
    qb.push_bind(rec.version);
}

#[async_trait]
impl WorkerDayStore for MySqlStore {
    async fn get(&self, id: WorkerDayId) -> Result<Option<WorkerDay>> {
        let row = sqlx::query(&format!("SELECT {WD_COLUMNS} FROM worker_day WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let mut wd = worker_day_from_row(&row)?;
        wd.details = self.load_details(&[id]).await?.remove(&id).unwrap_or_default();
        Ok(Some(wd))
    }

    async fn fetch(&self, spec: &QuerySpec) -> Result<Vec<WorkerDay>> {
        let mut qb = QueryBuilder::<MySql>::new(format!(
            "SELECT {WD_COLUMNS} FROM worker_day WHERE dt >= "
        ));
        qb.push_bind(spec.dt_from);
        qb.push(" AND dt <= ");
        qb.push_bind(spec.dt_to);
        if !spec.include_deleted {
            qb.push(" AND type_code <> ");
            qb.push_bind(codes::DELETED);
        }
        if let Some(ids) = &spec.employee_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" AND employee_id IN (");
            let mut sep = qb.separated(", ");
            for id in ids {
                sep.push_bind(*id);
            }
            qb.push(")");
        }
        if let Some(ids) = &spec.shop_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" AND shop_id IN (");
            let mut sep = qb.separated(", ");
            for id in ids {
                sep.push_bind(*id);
            }
            qb.push(")");
        }
        if let Some(graph) = spec.graph_type {
            qb.push(" AND is_fact = ");
            qb.push_bind(graph.is_fact());
        }
        if let Some(approved) = spec.is_approved {
            qb.push(" AND is_approved = ");
            qb.push_bind(approved);
        }
        qb.push(" ORDER BY employee_id, dt, id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(worker_day_from_row(row)?);
        }
        let ids: Vec<WorkerDayId> = out.iter().map(|wd| wd.id).collect();
        let mut details = self.load_details(&ids).await?;
        for wd in &mut out {
            wd.details = details.remove(&wd.id).unwrap_or_default();
        }
        Ok(out)
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> Result<Vec<WorkerDay>> {
        let mut tx = self.pool.begin().await?;
        let mut written = Vec::with_capacity(ops.len());
        let now = Utc::now().naive_utc();

        for op in ops {
            match op {
                WriteOp::Insert(mut rec) => {
                    normalize_record(&mut rec, &self.registry, &self.settings, &self.org)?;
                    rec.version = 1;
                    rec.dttm_modified = now;
                    check_uniqueness(&mut tx, &self.settings, &rec).await?;
                    let mut qb = QueryBuilder::<MySql>::new(
                        "INSERT INTO worker_day (employee_id, dt, type_code, shop_id, \
                         dttm_work_start, dttm_work_end, work_hours, is_fact, is_approved, \
                         is_vacancy, source, closest_plan_approved, parent_worker_day, \
                         cost_per_hour, created_by, last_edited_by, dttm_modified, version) \
                         VALUES (",
                    );
                    let mut sep = qb.separated(", ");
                    bind_worker_day(&mut sep, &rec);
                    qb.push(")");
                    let result = qb.build().execute(&mut *tx).await?;
                    rec.id = result.last_insert_id();
                    write_details(&mut tx, &rec).await?;
                    written.push(rec);
                }
                WriteOp::Update(mut rec) => {
                    let current = sqlx::query(
                        "SELECT version FROM worker_day WHERE id = ? FOR UPDATE",
                    )
                    .bind(rec.id)
                    .fetch_optional(&mut *tx)
                    .await?;
                    let found: u64 = current
                        .ok_or(Error::NotFound { entity: "worker_day", id: rec.id })?
                        .try_get("version")?;
                    if found != rec.version {
                        return Err(Error::Conflict { id: rec.id, expected: rec.version, found });
                    }
                    normalize_record(&mut rec, &self.registry, &self.settings, &self.org)?;
                    check_uniqueness(&mut tx, &self.settings, &rec).await?;
                    rec.version += 1;
                    rec.dttm_modified = now;
                    sqlx::query(
                        "UPDATE worker_day SET type_code = ?, shop_id = ?, \
                         dttm_work_start = ?, dttm_work_end = ?, work_hours = ?, \
                         is_fact = ?, is_approved = ?, is_vacancy = ?, source = ?, \
                         closest_plan_approved = ?, parent_worker_day = ?, \
                         cost_per_hour = ?, last_edited_by = ?, dttm_modified = ?, \
                         version = ? WHERE id = ?",
                    )
                    .bind(rec.type_code.as_str())
                    .bind(rec.shop_id)
                    .bind(rec.dttm_work_start)
                    .bind(rec.dttm_work_end)
                    .bind(rec.work_hours)
                    .bind(rec.is_fact)
                    .bind(rec.is_approved)
                    .bind(rec.is_vacancy)
                    .bind(rec.source.to_string())
                    .bind(rec.closest_plan_approved)
                    .bind(rec.parent_worker_day)
                    .bind(rec.cost_per_hour)
                    .bind(rec.last_edited_by)
                    .bind(rec.dttm_modified)
                    .bind(rec.version)
                    .bind(rec.id)
                    .execute(&mut *tx)
                    .await?;
                    sqlx::query("DELETE FROM worker_day_detail WHERE worker_day_id = ?")
                        .bind(rec.id)
                        .execute(&mut *tx)
                        .await?;
                    write_details(&mut tx, &rec).await?;
                    written.push(rec);
                }
                WriteOp::SoftDelete(id) => {
                    let row = sqlx::query(&format!(
                        "SELECT {WD_COLUMNS} FROM worker_day WHERE id = ? FOR UPDATE"
                    ))
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or(Error::NotFound { entity: "worker_day", id })?;
                    let mut rec = worker_day_from_row(&row)?;
                    if rec.is_fact && rec.is_approved {
                        info!(
                            worker_day_id = id,
                            employee_id = rec.employee_id,
                            dt = %rec.dt,
                            "approved fact record soft-deleted"
                        );
                    }
                    rec.type_code = codes::DELETED.to_string();
                    rec.version += 1;
                    rec.dttm_modified = now;
                    sqlx::query(
                        "UPDATE worker_day SET type_code = ?, version = ?, dttm_modified = ? \
                         WHERE id = ?",
                    )
                    .bind(rec.type_code.as_str())
                    .bind(rec.version)
                    .bind(rec.dttm_modified)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    written.push(rec);
                }
            }
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn append_attendance(&self, mut rec: AttendanceRecord) -> Result<AttendanceRecord> {
        let result = sqlx::query(
            "INSERT INTO attendance_record (employee_id, user_id, shop_id, kind, dttm, dt, \
             verified, terminal) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rec.employee_id)
        .bind(rec.user_id)
        .bind(rec.shop_id)
        .bind(rec.kind.to_string())
        .bind(rec.dttm)
        .bind(rec.dt)
        .bind(rec.verified)
        .bind(rec.terminal)
        .execute(&self.pool)
        .await?;
        rec.id = result.last_insert_id();
        Ok(rec)
    }

    async fn fetch_attendance(
        &self,
        employee_id: EmployeeId,
        dt_from: NaiveDate,
        dt_to: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>> {
        let rows = sqlx::query(
            "SELECT id, employee_id, user_id, shop_id, kind, dttm, dt, verified, terminal \
             FROM attendance_record WHERE employee_id = ? AND dt >= ? AND dt <= ? \
             ORDER BY dttm, id",
        )
        .bind(employee_id)
        .bind(dt_from)
        .bind(dt_to)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("kind")?;
            out.push(AttendanceRecord {
                id: row.try_get("id")?,
                employee_id: row.try_get("employee_id")?,
                user_id: row.try_get("user_id")?,
                shop_id: row.try_get("shop_id")?,
                kind: AttendanceType::from_str(&kind)
                    .map_err(|_| Error::Config(format!("unknown tick kind {kind:?}")))?,
                dttm: row.try_get("dttm")?,
                dt: row.try_get("dt")?,
                verified: row.try_get("verified")?,
                terminal: row.try_get("terminal")?,
            });
        }
        Ok(out)
    }

    async fn put_timesheet(&self, rows: Vec<TimesheetRow>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO timesheet (employee_id, dt, fact_source, fact_type, \
                 fact_dttm_work_start, fact_dttm_work_end, fact_total_hours, fact_day_hours, \
                 fact_night_hours, main_type, main_total_hours, main_day_hours, \
                 main_night_hours, additional_hours) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON DUPLICATE KEY UPDATE fact_source = VALUES(fact_source), \
                 fact_type = VALUES(fact_type), \
                 fact_dttm_work_start = VALUES(fact_dttm_work_start), \
                 fact_dttm_work_end = VALUES(fact_dttm_work_end), \
                 fact_total_hours = VALUES(fact_total_hours), \
                 fact_day_hours = VALUES(fact_day_hours), \
                 fact_night_hours = VALUES(fact_night_hours), \
                 main_type = VALUES(main_type), \
                 main_total_hours = VALUES(main_total_hours), \
                 main_day_hours = VALUES(main_day_hours), \
                 main_night_hours = VALUES(main_night_hours), \
                 additional_hours = VALUES(additional_hours)",
            )
            .bind(row.employee_id)
            .bind(row.dt)
            .bind(row.fact_source.to_string())
            .bind(&row.fact_type)
            .bind(row.fact_dttm_work_start)
            .bind(row.fact_dttm_work_end)
            .bind(row.fact_total_hours)
            .bind(row.fact_day_hours)
            .bind(row.fact_night_hours)
            .bind(&row.main_type)
            .bind(row.main_total_hours)
            .bind(row.main_day_hours)
            .bind(row.main_night_hours)
            .bind(row.additional_hours)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_timesheet(
        &self,
        employee_id: EmployeeId,
        dt_from: NaiveDate,
        dt_to: NaiveDate,
    ) -> Result<Vec<TimesheetRow>> {
        let rows = sqlx::query(
            "SELECT employee_id, dt, fact_source, fact_type, fact_dttm_work_start, \
             fact_dttm_work_end, fact_total_hours, fact_day_hours, fact_night_hours, \
             main_type, main_total_hours, main_day_hours, main_night_hours, additional_hours \
             FROM timesheet WHERE employee_id = ? AND dt >= ? AND dt <= ? ORDER BY dt",
        )
        .bind(employee_id)
        .bind(dt_from)
        .bind(dt_to)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let source: String = row.try_get("fact_source")?;
            out.push(TimesheetRow {
                employee_id: row.try_get("employee_id")?,
                dt: row.try_get("dt")?,
                fact_source: FactSource::from_str(&source)
                    .map_err(|_| Error::Config(format!("unknown fact source {source:?}")))?,
                fact_type: row.try_get("fact_type")?,
                fact_dttm_work_start: row.try_get("fact_dttm_work_start")?,
                fact_dttm_work_end: row.try_get("fact_dttm_work_end")?,
                fact_total_hours: row.try_get("fact_total_hours")?,
                fact_day_hours: row.try_get("fact_day_hours")?,
                fact_night_hours: row.try_get("fact_night_hours")?,
                main_type: row.try_get("main_type")?,
                main_total_hours: row.try_get("main_total_hours")?,
                main_day_hours: row.try_get("main_day_hours")?,
                main_night_hours: row.try_get("main_night_hours")?,
                additional_hours: row.try_get("additional_hours")?,
            });
        }
        Ok(out)
    }

    async fn record_approval(&self, event: ApprovalEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO approval_history (actor, dttm, shop_id, graph_type, dt_from, dt_to, \
             affected) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.actor)
        .bind(event.dttm)
        .bind(event.shop_id)
        .bind(event.graph_type.to_string())
        .bind(event.dt_from)
        .bind(event.dt_to)
        .bind(event.affected as u64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_approvals(&self, shop_id: ShopId) -> Result<Vec<ApprovalEvent>> {
        let rows = sqlx::query(
            "SELECT actor, dttm, shop_id, graph_type, dt_from, dt_to, affected \
             FROM approval_history WHERE shop_id = ? ORDER BY dttm",
        )
        .bind(shop_id)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let graph: String = row.try_get("graph_type")?;
            let affected: u64 = row.try_get("affected")?;
            out.push(ApprovalEvent {
                actor: row.try_get("actor")?,
                dttm: row.try_get("dttm")?,
                shop_id: row.try_get("shop_id")?,
                graph_type: GraphType::from_str(&graph)
                    .map_err(|_| Error::Config(format!("unknown graph type {graph:?}")))?,
                dt_from: row.try_get("dt_from")?,
                dt_to: row.try_get("dt_to")?,
                affected: affected as usize,
            });
        }
        Ok(out)
    }
}

async fn check_uniqueness(
    tx: &mut sqlx::Transaction<'_, MySql>,
    settings: &NetworkSettings,
    rec: &WorkerDay,
) -> Result<()> {
    if settings.allow_creation_several_wdays_for_one_employee_for_one_date {
        return Ok(());
    }
    let count: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM worker_day WHERE employee_id = ? AND dt = ? \
         AND is_fact = ? AND is_approved = ? AND type_code <> ? AND id <> ?",
    )
    .bind(rec.employee_id)
    .bind(rec.dt)
    .bind(rec.is_fact)
    .bind(rec.is_approved)
    .bind(codes::DELETED)
    .bind(rec.id)
    .fetch_one(&mut **tx)
    .await?
    .try_get("n")?;
    if count > 0 {
        return Err(InvariantViolation::Uniqueness {
            employee_id: rec.employee_id,
            dt: rec.dt,
            is_fact: rec.is_fact,
            is_approved: rec.is_approved,
        }
        .into());
    }
    Ok(())
}

async fn write_details(tx: &mut sqlx::Transaction<'_, MySql>, rec: &WorkerDay) -> Result<()> {
    for detail in &rec.details {
        sqlx::query(
            "INSERT INTO worker_day_detail (worker_day_id, work_type_id, work_part) \
             VALUES (?, ?, ?)",
        )
        .bind(rec.id)
        .bind(detail.work_type_id)
        .bind(detail.work_part)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
