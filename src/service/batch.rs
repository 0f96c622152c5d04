use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::NetworkSettings;
use crate::error::{Error, InvariantViolation, Result};
use crate::events::{CoreEvent, EventBus};
use crate::model::worker_day::{GraphType, WorkerDaySource};
use crate::model::{
    EmployeeId, OrgDirectory, ShopId, WdPermissionAction, WorkerDay, WorkerDayDetail, WorkerDayId,
};
use crate::service::permissions::{PermissionEvaluator, PermissionIntent};
use crate::service::RequestCtx;
use crate::store::{QuerySpec, WorkerDayStore, WriteOp};

/// Field payload of a create/update intent. `None` payload on the intent
/// itself means delete.
#[derive(Debug, Clone)]
pub struct WorkerDayPayload {
    pub type_code: String,
    pub shop_id: Option<ShopId>,
    pub dttm_work_start: Option<NaiveDateTime>,
    pub dttm_work_end: Option<NaiveDateTime>,
    pub details: Vec<WorkerDayDetail>,
    pub source: WorkerDaySource,
    pub cost_per_hour: Option<f64>,
    /// Hours for manual-method types; interval types are recomputed anyway.
    pub work_hours: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct WorkerDayIntent {
    pub employee_id: EmployeeId,
    pub dt: NaiveDate,
    pub payload: Option<WorkerDayPayload>,
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub graph_type: GraphType,
    pub approved: bool,
    /// Partial mode applies the legal intents and reports the rest;
    /// strict mode aborts before any write.
    pub partial: bool,
    pub intents: Vec<WorkerDayIntent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntentOutcome {
    Ok { worker_day_id: WorkerDayId },
    Noop,
    Denied { reason: String },
    Invalid { message: String },
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// False when strict mode aborted: outcomes explain why, nothing wrote.
    pub applied: bool,
    pub outcomes: Vec<IntentOutcome>,
}

/// Single entry point for bulk edits (C7): UIs and uploads both land here.
pub struct BatchMutator {
    store: Arc<dyn WorkerDayStore>,
    perms: Arc<PermissionEvaluator>,
    org: Arc<OrgDirectory>,
    settings: NetworkSettings,
    bus: EventBus,
}

enum Classified {
    Create(usize, WorkerDay),
    Update(usize, WorkerDay),
    Delete(usize, WorkerDayId),
}

impl BatchMutator {
    pub fn new(
        store: Arc<dyn WorkerDayStore>,
        perms: Arc<PermissionEvaluator>,
        org: Arc<OrgDirectory>,
        settings: NetworkSettings,
        bus: EventBus,
    ) -> Self {
        Self { store, perms, org, settings, bus }
    }

    #[instrument(name = "batch_mutate", skip(self, ctx, req), fields(actor = ctx.actor, intents = req.intents.len()))]
    pub async fn mutate(&self, ctx: &RequestCtx, req: BatchRequest) -> Result<BatchOutcome> {
        if req.intents.is_empty() {
            return Ok(BatchOutcome { applied: true, outcomes: Vec::new() });
        }

        // Uploads must deduplicate: duplicates inside one batch are rejected
        // outright, whatever the several-wdays network flag says.
        let mut seen: HashSet<(EmployeeId, NaiveDate)> = HashSet::new();
        for intent in &req.intents {
            if !seen.insert((intent.employee_id, intent.dt)) {
                return Err(InvariantViolation::Uniqueness {
                    employee_id: intent.employee_id,
                    dt: intent.dt,
                    is_fact: req.graph_type.is_fact(),
                    is_approved: req.approved,
                }
                .into());
            }
        }

        let existing = self.load_existing(&req).await?;

        let mut outcomes: Vec<IntentOutcome> = Vec::with_capacity(req.intents.len());
        let mut classified: Vec<Classified> = Vec::new();

        for (idx, intent) in req.intents.iter().enumerate() {
            let current = existing.get(&(intent.employee_id, intent.dt));
            let outcome = match (&intent.payload, current) {
                (Some(payload), None) => {
                    match self.permit(ctx, &req, intent, payload, WdPermissionAction::Create).await {
                        Err(e) => deny_outcome(e)?,
                        Ok(()) => {
                            classified.push(Classified::Create(idx, self.build(ctx, &req, intent, payload, None)));
                            IntentOutcome::Noop // replaced after apply
                        }
                    }
                }
                (Some(payload), Some(current)) => {
                    if self.integration_locked(current) {
                        IntentOutcome::Denied {
                            reason: "records imported through integration are read-only".into(),
                        }
                    } else {
                        match self.permit(ctx, &req, intent, payload, WdPermissionAction::Update).await {
                            Err(e) => deny_outcome(e)?,
                            Ok(()) => {
                                classified.push(Classified::Update(
                                    idx,
                                    self.build(ctx, &req, intent, payload, Some(current)),
                                ));
                                IntentOutcome::Noop
                            }
                        }
                    }
                }
                (None, Some(current)) => {
                    if self.integration_locked(current) {
                        IntentOutcome::Denied {
                            reason: "records imported through integration are read-only".into(),
                        }
                    } else {
                        let intent_for_delete = PermissionIntent {
                            action: WdPermissionAction::Delete,
                            graph_type: req.graph_type,
                            employee_id: intent.employee_id,
                            day_type: current.type_code.clone(),
                            dt: intent.dt,
                            shop_id: current.shop_id,
                            is_vacancy: current.is_vacancy,
                        };
                        match self.perms.evaluate(ctx, &intent_for_delete).await {
                            Err(e) => deny_outcome(e)?,
                            Ok(()) => {
                                classified.push(Classified::Delete(idx, current.id));
                                IntentOutcome::Noop
                            }
                        }
                    }
                }
                (None, None) => IntentOutcome::Invalid { message: "no record to delete".into() },
            };
            outcomes.push(outcome);
        }

        let failed = outcomes
            .iter()
            .any(|o| matches!(o, IntentOutcome::Denied { .. } | IntentOutcome::Invalid { .. }));
        if failed && !req.partial {
            info!("strict batch aborted before any write");
            return Ok(BatchOutcome { applied: false, outcomes });
        }
        if failed {
            classified.retain(|c| {
                let idx = match c {
                    Classified::Create(i, _) | Classified::Update(i, _) | Classified::Delete(i, _) => *i,
                };
                matches!(outcomes[idx], IntentOutcome::Noop)
            });
        }

        // Deterministic order: deletes, then updates, then inserts, each
        // sorted by (employee, dt).
        classified.sort_by_key(|c| {
            let idx = match c {
                Classified::Create(i, _) | Classified::Update(i, _) | Classified::Delete(i, _) => *i,
            };
            (req.intents[idx].employee_id, req.intents[idx].dt)
        });
        let mut op_index: Vec<usize> = Vec::new();
        let mut ops: Vec<WriteOp> = Vec::new();
        for c in &classified {
            if let Classified::Delete(idx, id) = c {
                op_index.push(*idx);
                ops.push(WriteOp::SoftDelete(*id));
            }
        }
        for c in &classified {
            if let Classified::Update(idx, rec) = c {
                op_index.push(*idx);
                ops.push(WriteOp::Update(rec.clone()));
            }
        }
        for c in &classified {
            if let Classified::Create(idx, rec) = c {
                op_index.push(*idx);
                ops.push(WriteOp::Insert(rec.clone()));
            }
        }

        if ops.is_empty() {
            return Ok(BatchOutcome { applied: true, outcomes });
        }

        // Interactive single-record edits get the short deadline.
        let timeout_secs = if req.intents.len() == 1 {
            self.settings.edit_timeout_secs
        } else {
            self.settings.batch_timeout_secs
        };
        let apply = self.store.apply(ops);
        let written = match tokio::time::timeout(Duration::from_secs(timeout_secs), apply).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout(timeout_secs)),
        };

        for (slot, wd) in op_index.iter().zip(written.iter()) {
            outcomes[*slot] = IntentOutcome::Ok { worker_day_id: wd.id };
            self.bus.publish(CoreEvent::WorkerDayChanged {
                employee_id: wd.employee_id,
                dt: wd.dt,
                graph_type: req.graph_type,
                is_approved: req.approved,
            });
        }

        Ok(BatchOutcome { applied: true, outcomes })
    }

    async fn load_existing(
        &self,
        req: &BatchRequest,
    ) -> Result<HashMap<(EmployeeId, NaiveDate), WorkerDay>> {
        let (Some(dt_from), Some(dt_to)) = (
            req.intents.iter().map(|i| i.dt).min(),
            req.intents.iter().map(|i| i.dt).max(),
        ) else {
            return Ok(HashMap::new());
        };
        let employees: Vec<EmployeeId> = {
            let mut ids: Vec<EmployeeId> = req.intents.iter().map(|i| i.employee_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let spec = QuerySpec::range(dt_from, dt_to)
            .employees(employees)
            .graph(req.graph_type)
            .approved(req.approved);
        let mut map = HashMap::new();
        for wd in self.store.fetch(&spec).await? {
            map.entry((wd.employee_id, wd.dt)).or_insert(wd);
        }
        Ok(map)
    }

    async fn permit(
        &self,
        ctx: &RequestCtx,
        req: &BatchRequest,
        intent: &WorkerDayIntent,
        payload: &WorkerDayPayload,
        action: WdPermissionAction,
    ) -> Result<()> {
        let shop_id = payload.shop_id;
        let is_vacancy = shop_id
            .map(|s| {
                !self
                    .org
                    .employee_shops_at(intent.employee_id, intent.dt)
                    .contains(&s)
            })
            .unwrap_or(false);
        let p = PermissionIntent {
            action,
            graph_type: req.graph_type,
            employee_id: intent.employee_id,
            day_type: payload.type_code.clone(),
            dt: intent.dt,
            shop_id,
            is_vacancy,
        };
        self.perms.evaluate(ctx, &p).await
    }

    fn integration_locked(&self, current: &WorkerDay) -> bool {
        self.settings.forbid_edit_work_days_came_through_integration
            && current.source == WorkerDaySource::Integration
    }

    fn build(
        &self,
        ctx: &RequestCtx,
        req: &BatchRequest,
        intent: &WorkerDayIntent,
        payload: &WorkerDayPayload,
        current: Option<&WorkerDay>,
    ) -> WorkerDay {
        let mut rec = match current {
            Some(current) => current.clone(),
            None => {
                let mut rec = WorkerDay::new(
                    intent.employee_id,
                    intent.dt,
                    &payload.type_code,
                    req.graph_type,
                    payload.source,
                );
                rec.created_by = Some(ctx.actor);
                rec
            }
        };
        rec.last_edited_by = Some(ctx.actor);
        rec.type_code = payload.type_code.clone();
        rec.shop_id = payload.shop_id;
        rec.dttm_work_start = payload.dttm_work_start;
        rec.dttm_work_end = payload.dttm_work_end;
        rec.details = payload.details.clone();
        rec.source = payload.source;
        rec.cost_per_hour = payload.cost_per_hour;
        rec.is_approved = req.approved;
        if let Some(hours) = payload.work_hours {
            rec.work_hours = hours;
        }
        rec
    }
}

/// Strict single-intent failures become outcomes, not errors; real faults
/// (store down) still propagate.
fn deny_outcome(e: Error) -> Result<IntentOutcome> {
    match e {
        Error::PermissionDenied(reason) => Ok(IntentOutcome::Denied {
            reason: format!("{}", reason.predicate),
        }),
        other => Err(other),
    }
}
