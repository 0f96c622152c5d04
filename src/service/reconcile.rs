//! Attendance reconciliation (C6): turns the tick stream into fact-approved
//! worker days paired to their closest approved plan.

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::NetworkSettings;
use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventBus};
use crate::model::worker_day::{GraphType, WorkerDaySource};
use crate::model::{
    AttendanceRecord, AttendanceType, EmployeeId, OrgDirectory, ShopId, WorkerDay, WorkerDayDetail,
};
use crate::registry::DayTypeRegistry;
use crate::store::{QuerySpec, WorkerDayStore, WriteOp};

/// A closed (or still open) physical shift assembled from ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct TickShift {
    pub employee_id: EmployeeId,
    pub shop_id: ShopId,
    /// Business date: the date of the first coming tick.
    pub dt: NaiveDate,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    /// Break ticks are logged only; deduction stays with the break table.
    pub breaks: Vec<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct QuarantinedTick {
    pub record: AttendanceRecord,
    pub reason: String,
}

pub struct AttendanceReconciler {
    store: Arc<dyn WorkerDayStore>,
    registry: Arc<DayTypeRegistry>,
    org: Arc<OrgDirectory>,
    settings: NetworkSettings,
    bus: EventBus,
}

impl AttendanceReconciler {
    pub fn new(
        store: Arc<dyn WorkerDayStore>,
        registry: Arc<DayTypeRegistry>,
        org: Arc<OrgDirectory>,
        settings: NetworkSettings,
        bus: EventBus,
    ) -> Self {
        Self { store, registry, org, settings, bus }
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.settings.reconcile_queue_capacity
    }

    /// Accept one tick and recompute the shifts it can influence (its date
    /// ± one day, which also covers late-arriving events).
    #[instrument(name = "attendance_ingest", skip(self, tick), fields(employee_id = tick.employee_id, dttm = %tick.dttm))]
    pub async fn ingest(&self, tick: AttendanceRecord) -> Result<()> {
        if !tick.verified && !self.settings.trust_tick_request {
            self.quarantine(&tick, "unverified tick from untrusted source");
            return Ok(());
        }

        let saved = self.store.append_attendance(tick).await?;
        let window_from = saved.dt - ChronoDuration::days(1);
        let window_to = saved.dt + ChronoDuration::days(1);

        let recalc = self.recalc(saved.employee_id, window_from, window_to);
        match tokio::time::timeout(Duration::from_secs(self.settings.reconcile_timeout_secs), recalc)
            .await
        {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(Error::Timeout(self.settings.reconcile_timeout_secs)),
        }
    }

    /// Rebuild fact records for one employee over an inclusive date range.
    /// Replaying the same tick stream yields the same fact set.
    pub async fn recalc(
        &self,
        employee_id: EmployeeId,
        dt_from: NaiveDate,
        dt_to: NaiveDate,
    ) -> Result<Vec<WorkerDay>> {
        // A shift belonging to dt_from may have started the evening before.
        let events = self
            .store
            .fetch_attendance(employee_id, dt_from - ChronoDuration::days(1), dt_to)
            .await?;

        let (shifts, quarantined) = assemble_shifts(&events);
        for q in &quarantined {
            self.quarantine(&q.record, &q.reason);
        }

        let mut written = Vec::new();
        for shift in shifts {
            if shift.dt < dt_from || shift.dt > dt_to {
                continue;
            }
            // A shift the store rejects is quarantined like a bad tick; the
            // rest of the window still reconciles.
            match self.write_fact(shift.clone()).await {
                Ok(Some(wd)) => written.push(wd),
                Ok(None) => {}
                Err(Error::Invariant(violation)) => {
                    self.quarantine_shift(&shift, &format!("fact rejected: {violation}"));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    /// Recompute several employees concurrently; each employee stays serial.
    pub async fn recalc_many(
        &self,
        employee_ids: &[EmployeeId],
        dt_from: NaiveDate,
        dt_to: NaiveDate,
    ) -> Result<usize> {
        let runs = employee_ids
            .iter()
            .map(|&id| self.recalc(id, dt_from, dt_to));
        let mut total = 0usize;
        for outcome in join_all(runs).await {
            total += outcome?.len();
        }
        Ok(total)
    }

    /// Approved plan records eligible for pairing: interval types on the
    /// shift's date or adjacent ones.
    async fn plan_candidates(&self, shift: &TickShift) -> Result<Vec<WorkerDay>> {
        let spec = QuerySpec::range(shift.dt - ChronoDuration::days(1), shift.dt + ChronoDuration::days(1))
            .employees(vec![shift.employee_id])
            .graph(GraphType::Plan)
            .approved(true);
        let mut plans: Vec<WorkerDay> = self
            .store
            .fetch(&spec)
            .await?
            .into_iter()
            .filter(|p| p.interval().is_some())
            .filter(|p| {
                self.registry
                    .get(&p.type_code)
                    .map(|t| !t.is_dayoff)
                    .unwrap_or(false)
            })
            .collect();
        if self.settings.consider_department_in_att_records {
            plans.retain(|p| p.shop_id == Some(shift.shop_id));
        }
        Ok(plans)
    }

    /// Δ-window match with a min-distance tie-break, then the weak
    /// single-plan fallback.
    fn choose_plan<'a>(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        dt: NaiveDate,
        plans: &'a [WorkerDay],
    ) -> Option<&'a WorkerDay> {
        let delta = self.settings.max_plan_diff_in_seconds;
        let mut best: Option<(&WorkerDay, i64)> = None;
        for plan in plans {
            let Some((ps, pe)) = plan.interval() else { continue };
            let d_start = (start - ps).num_seconds().abs();
            let d_end = (end - pe).num_seconds().abs();
            if d_start <= delta && d_end <= delta {
                let score = d_start + d_end;
                if best.map(|(_, s)| score < s).unwrap_or(true) {
                    best = Some((plan, score));
                }
            }
        }
        if let Some((plan, _)) = best {
            return Some(plan);
        }
        // Weak match: a lone plan on the business date claims the shift.
        let mut same_day = plans.iter().filter(|p| p.dt == dt);
        match (same_day.next(), same_day.next()) {
            (Some(plan), None) => Some(plan),
            _ => None,
        }
    }

    async fn write_fact(&self, shift: TickShift) -> Result<Option<WorkerDay>> {
        let plans = self.plan_candidates(&shift).await?;

        let end = match shift.end {
            Some(end) => end,
            None if self.settings.skip_leaving_tick => {
                // Close from the plan; without one the shift stays pending.
                let plan_end = self
                    .choose_plan(shift.start, shift.start, shift.dt, &plans)
                    .and_then(|p| p.interval())
                    .map(|(_, pe)| pe);
                match plan_end {
                    Some(pe) if pe > shift.start => pe,
                    _ => {
                        self.quarantine_shift(&shift, "open shift and no plan to close it from");
                        return Ok(None);
                    }
                }
            }
            None => {
                self.quarantine_shift(&shift, "no leaving tick");
                return Ok(None);
            }
        };

        let matched = self.choose_plan(shift.start, end, shift.dt, &plans);

        // Early arrivals and late departures are honored only up to the
        // configured allowances; beyond them the plan boundary wins.
        let (mut start, mut end) = (shift.start, end);
        if let Some((ps, pe)) = matched.and_then(|p| p.interval()) {
            let earliest = ps - ChronoDuration::seconds(self.settings.allowed_interval_for_early_arrival);
            let latest = pe + ChronoDuration::seconds(self.settings.allowed_interval_for_late_departure);
            if start < earliest {
                start = earliest;
            }
            if end > latest {
                end = latest;
            }
        }

        let existing_spec = QuerySpec::range(shift.dt, shift.dt)
            .employees(vec![shift.employee_id])
            .graph(GraphType::Fact)
            .approved(true);
        let existing = self.store.fetch(&existing_spec).await?.into_iter().next();

        let details = match matched {
            Some(plan) if !plan.details.is_empty() => plan.details.clone(),
            _ => self
                .org
                .default_work_type(shift.employee_id, shift.dt)
                .map(|wt| vec![WorkerDayDetail { work_type_id: wt, work_part: 1.0 }])
                .unwrap_or_default(),
        };

        let written = match existing {
            Some(current) if current.source != WorkerDaySource::AttendanceRecalc => {
                // Manual fact stays authoritative; ticks never overwrite it.
                debug!(
                    employee_id = shift.employee_id,
                    dt = %shift.dt,
                    source = %current.source,
                    "fact exists with manual source, reconciliation skipped"
                );
                return Ok(None);
            }
            Some(current) => {
                if current.dttm_work_start == Some(start)
                    && current.dttm_work_end == Some(end)
                    && current.shop_id == Some(shift.shop_id)
                    && current.closest_plan_approved == matched.map(|p| p.id)
                {
                    return Ok(Some(current)); // replay, nothing to do
                }
                let mut updated = current;
                updated.shop_id = Some(shift.shop_id);
                updated.dttm_work_start = Some(start);
                updated.dttm_work_end = Some(end);
                updated.closest_plan_approved = matched.map(|p| p.id);
                updated.details = details;
                self.store
                    .apply(vec![WriteOp::Update(updated)])
                    .await?
                    .remove(0)
            }
            None => {
                let mut rec = WorkerDay::new(
                    shift.employee_id,
                    shift.dt,
                    matched.map(|p| p.type_code.as_str()).unwrap_or("W"),
                    GraphType::Fact,
                    WorkerDaySource::AttendanceRecalc,
                )
                .with_interval(shift.shop_id, start, end);
                rec.is_approved = true;
                rec.closest_plan_approved = matched.map(|p| p.id);
                rec.details = details;
                self.store.apply(vec![WriteOp::Insert(rec)]).await?.remove(0)
            }
        };

        info!(
            employee_id = written.employee_id,
            dt = %written.dt,
            worker_day_id = written.id,
            paired = written.closest_plan_approved.is_some(),
            "fact reconciled from attendance"
        );
        self.bus.publish(CoreEvent::AttendanceReconciled {
            employee_id: written.employee_id,
            dt: written.dt,
            worker_day_id: written.id,
            paired: written.closest_plan_approved.is_some(),
        });
        self.bus.publish(CoreEvent::WorkerDayChanged {
            employee_id: written.employee_id,
            dt: written.dt,
            graph_type: GraphType::Fact,
            is_approved: true,
        });
        Ok(Some(written))
    }

    fn quarantine(&self, record: &AttendanceRecord, reason: &str) {
        info!(
            employee_id = record.employee_id,
            dttm = %record.dttm,
            kind = %record.kind,
            reason,
            "tick quarantined"
        );
        self.bus.publish(CoreEvent::TickQuarantined {
            employee_id: record.employee_id,
            dttm: record.dttm,
            reason: reason.to_string(),
        });
    }

    fn quarantine_shift(&self, shift: &TickShift, reason: &str) {
        info!(
            employee_id = shift.employee_id,
            start = %shift.start,
            reason,
            "shift quarantined"
        );
        self.bus.publish(CoreEvent::TickQuarantined {
            employee_id: shift.employee_id,
            dttm: shift.start,
            reason: reason.to_string(),
        });
    }
}

/// The per-employee shift state machine: Idle → Opened (coming) → Closed
/// (leaving). Ticks that do not fit the current state are quarantined, never
/// fatal. Events must arrive sorted by `dttm` (the store guarantees it).
pub fn assemble_shifts(events: &[AttendanceRecord]) -> (Vec<TickShift>, Vec<QuarantinedTick>) {
    let mut shifts = Vec::new();
    let mut quarantined = Vec::new();
    let mut open: Option<TickShift> = None;

    for event in events {
        match event.kind {
            AttendanceType::Coming => {
                if let Some(current) = open.take() {
                    // Two comings in a row: the first shift never closed.
                    shifts.push(current);
                }
                open = Some(TickShift {
                    employee_id: event.employee_id,
                    shop_id: event.shop_id,
                    dt: event.dttm.date(),
                    start: event.dttm,
                    end: None,
                    breaks: Vec::new(),
                });
            }
            AttendanceType::Leaving => match open.take() {
                Some(mut shift) => {
                    shift.end = Some(event.dttm);
                    shifts.push(shift);
                }
                None => quarantined.push(QuarantinedTick {
                    record: event.clone(),
                    reason: "leaving without a matching coming".into(),
                }),
            },
            AttendanceType::BreakStart | AttendanceType::BreakEnd => match open.as_mut() {
                Some(shift) => shift.breaks.push(event.dttm),
                None => quarantined.push(QuarantinedTick {
                    record: event.clone(),
                    reason: "break tick outside a shift".into(),
                }),
            },
            AttendanceType::NoType => quarantined.push(QuarantinedTick {
                record: event.clone(),
                reason: "untyped tick".into(),
            }),
        }
    }
    if let Some(shift) = open {
        shifts.push(shift);
    }
    (shifts, quarantined)
}

/// Bounded ingest front of the reconciler. `try_submit` never blocks; a full
/// queue is reported as a retryable error so upstream can back off.
pub struct TickQueue {
    tx: mpsc::Sender<AttendanceRecord>,
}

impl TickQueue {
    pub fn start(reconciler: Arc<AttendanceReconciler>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AttendanceRecord>(reconciler.queue_capacity());
        let handle = tokio::spawn(async move {
            while let Some(tick) = rx.recv().await {
                if let Err(e) = reconciler.ingest(tick).await {
                    warn!(error = %e, "tick ingestion failed");
                }
            }
        });
        (Self { tx }, handle)
    }

    pub fn try_submit(&self, tick: AttendanceRecord) -> Result<()> {
        self.tx.try_send(tick).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::Transient("attendance queue full, retry later".into())
            }
            mpsc::error::TrySendError::Closed(_) => Error::Cancelled,
        })
    }
}
