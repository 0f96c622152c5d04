use chrono::{NaiveDate, Utc};
use derive_more::Display;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::NetworkSettings;
use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventBus};
use crate::model::day_type::codes;
use crate::model::worker_day::GraphType;
use crate::model::{EmployeeId, ShopId, WorkerDay};
use crate::service::permissions::{PermissionEvaluator, PermissionIntent};
use crate::service::reconcile::AttendanceReconciler;
use crate::service::RequestCtx;
use crate::store::{ApprovalEvent, QuerySpec, WorkerDayStore, WriteOp};
use crate::model::WdPermissionAction;

/// What gets promoted: one shop, one layer, one date range, optionally a
/// subset of employees.
#[derive(Debug, Clone, Display)]
#[display(fmt = "{} {}..{} shop {}", graph_type, dt_from, dt_to, shop_id)]
pub struct ApprovalScope {
    pub shop_id: ShopId,
    pub graph_type: GraphType,
    pub dt_from: NaiveDate,
    pub dt_to: NaiveDate,
    pub employee_ids: Option<Vec<EmployeeId>>,
}

/// Promotes drafts into the approved slot of their layer (C5).
pub struct ApprovalEngine {
    store: Arc<dyn WorkerDayStore>,
    perms: Arc<PermissionEvaluator>,
    settings: NetworkSettings,
    bus: EventBus,
    reconciler: Option<Arc<AttendanceReconciler>>,
}

impl ApprovalEngine {
    pub fn new(
        store: Arc<dyn WorkerDayStore>,
        perms: Arc<PermissionEvaluator>,
        settings: NetworkSettings,
        bus: EventBus,
    ) -> Self {
        Self { store, perms, settings, bus, reconciler: None }
    }

    /// Wire the reconciler so plan approval can trigger a fact recompute.
    pub fn with_reconciler(mut self, reconciler: Arc<AttendanceReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Snapshot drafts and approved for the scope, then per slot: copy the
    /// draft over the approved (archiving the old one), or retire an
    /// approved slot whose draft is gone. The whole scope commits or none
    /// of it does. Re-approving an unchanged scope writes nothing.
    #[instrument(name = "approve_scope", skip(self, ctx), fields(actor = ctx.actor, scope = %scope))]
    pub async fn approve(&self, ctx: &RequestCtx, scope: ApprovalScope) -> Result<usize> {
        let mut draft_spec = QuerySpec::range(scope.dt_from, scope.dt_to)
            .shops(vec![scope.shop_id])
            .graph(scope.graph_type)
            .approved(false);
        let mut approved_spec = QuerySpec::range(scope.dt_from, scope.dt_to)
            .shops(vec![scope.shop_id])
            .graph(scope.graph_type)
            .approved(true);
        if let Some(ids) = &scope.employee_ids {
            draft_spec = draft_spec.employees(ids.clone());
            approved_spec = approved_spec.employees(ids.clone());
        }

        let drafts = self.store.fetch(&draft_spec).await?;
        let approved = self.store.fetch(&approved_spec).await?;

        let mut slots: BTreeMap<(EmployeeId, NaiveDate), (Option<WorkerDay>, Option<WorkerDay>)> =
            BTreeMap::new();
        for wd in drafts {
            slots.entry((wd.employee_id, wd.dt)).or_default().0.get_or_insert(wd);
        }
        for wd in approved {
            slots.entry((wd.employee_id, wd.dt)).or_default().1.get_or_insert(wd);
        }

        let plan_approved = if scope.graph_type == GraphType::Fact {
            // Needed to re-link manual facts to their closest plan.
            let spec = QuerySpec::range(scope.dt_from, scope.dt_to)
                .graph(GraphType::Plan)
                .approved(true);
            self.store.fetch(&spec).await?
        } else {
            Vec::new()
        };

        let mut ops: Vec<WriteOp> = Vec::new();
        let mut touched: Vec<(EmployeeId, NaiveDate)> = Vec::new();

        for ((employee_id, dt), (draft, current)) in slots {
            match (draft, current) {
                (Some(draft), current) => {
                    if current
                        .as_ref()
                        .map(|c| c.same_content(&draft))
                        .unwrap_or(false)
                    {
                        continue; // already approved as-is
                    }
                    self.check(ctx, &draft).await?;
                    if let Some(current) = &current {
                        ops.push(WriteOp::SoftDelete(current.id));
                    }
                    let mut copy = draft.clone();
                    copy.id = 0;
                    copy.version = 0;
                    copy.is_approved = true;
                    copy.parent_worker_day = Some(draft.id);
                    copy.created_by = Some(ctx.actor);
                    copy.last_edited_by = Some(ctx.actor);
                    if copy.is_fact && copy.closest_plan_approved.is_none() {
                        copy.closest_plan_approved =
                            self.closest_plan(&copy, &plan_approved).map(|p| p.id);
                    }
                    ops.push(WriteOp::Insert(copy));
                    touched.push((employee_id, dt));
                }
                (None, Some(current)) => {
                    self.check(ctx, &current).await?;
                    ops.push(WriteOp::SoftDelete(current.id));
                    touched.push((employee_id, dt));
                }
                (None, None) => {}
            }
        }

        if ops.is_empty() {
            info!("approval scope already settled, nothing to do");
            return Ok(0);
        }

        let apply = self.store.apply(ops);
        match tokio::time::timeout(Duration::from_secs(self.settings.batch_timeout_secs), apply).await
        {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout(self.settings.batch_timeout_secs)),
        };

        self.store
            .record_approval(ApprovalEvent {
                actor: ctx.actor,
                dttm: Utc::now().naive_utc(),
                shop_id: scope.shop_id,
                graph_type: scope.graph_type,
                dt_from: scope.dt_from,
                dt_to: scope.dt_to,
                affected: touched.len(),
            })
            .await?;

        for (employee_id, dt) in &touched {
            self.bus.publish(CoreEvent::WorkerDayChanged {
                employee_id: *employee_id,
                dt: *dt,
                graph_type: scope.graph_type,
                is_approved: true,
            });
        }
        self.bus.publish(CoreEvent::Approved {
            shop_id: scope.shop_id,
            graph_type: scope.graph_type,
            dt_from: scope.dt_from,
            dt_to: scope.dt_to,
            affected: touched.len(),
        });

        if scope.graph_type == GraphType::Plan
            && self.settings.run_recalc_fact_from_att_records_on_plan_approve
        {
            if let Some(reconciler) = &self.reconciler {
                let employees: Vec<EmployeeId> = {
                    let mut ids: Vec<EmployeeId> = touched.iter().map(|(e, _)| *e).collect();
                    ids.sort_unstable();
                    ids.dedup();
                    ids
                };
                reconciler
                    .recalc_many(&employees, scope.dt_from, scope.dt_to)
                    .await?;
            }
        }

        Ok(touched.len())
    }

    /// Administrative undo of the last approval of a scope: the current
    /// approved records are retired and the set they replaced comes back.
    /// The tombstone keeps everything but the type code, which is recovered
    /// from the draft the archived record was approved from.
    #[instrument(name = "revert_scope", skip(self, ctx), fields(actor = ctx.actor, scope = %scope))]
    pub async fn revert(&self, ctx: &RequestCtx, scope: ApprovalScope) -> Result<usize> {
        let mut approved_spec = QuerySpec::range(scope.dt_from, scope.dt_to)
            .shops(vec![scope.shop_id])
            .graph(scope.graph_type)
            .approved(true);
        if let Some(ids) = &scope.employee_ids {
            approved_spec = approved_spec.employees(ids.clone());
        }

        let current = self.store.fetch(&approved_spec).await?;
        let archived: Vec<WorkerDay> = self
            .store
            .fetch(&approved_spec.clone().with_deleted())
            .await?
            .into_iter()
            .filter(|wd| wd.type_code == codes::DELETED)
            .collect();

        // Latest tombstone per slot is the record the last approval replaced.
        let mut latest: BTreeMap<(EmployeeId, NaiveDate), WorkerDay> = BTreeMap::new();
        for tomb in archived {
            let key = (tomb.employee_id, tomb.dt);
            match latest.get(&key) {
                Some(held) if (held.dttm_modified, held.id) >= (tomb.dttm_modified, tomb.id) => {}
                _ => {
                    latest.insert(key, tomb);
                }
            }
        }

        let mut ops: Vec<WriteOp> = Vec::new();
        let mut touched: Vec<(EmployeeId, NaiveDate)> = Vec::new();

        for wd in &current {
            self.check(ctx, wd).await?;
            ops.push(WriteOp::SoftDelete(wd.id));
            touched.push((wd.employee_id, wd.dt));
        }
        for ((employee_id, dt), tomb) in latest {
            let Some(parent_id) = tomb.parent_worker_day else { continue };
            let Some(parent) = self.store.get(parent_id).await? else { continue };
            let mut restored = tomb.clone();
            restored.id = 0;
            restored.version = 0;
            restored.type_code = parent.type_code;
            restored.is_approved = true;
            restored.last_edited_by = Some(ctx.actor);
            ops.push(WriteOp::Insert(restored));
            if !touched.contains(&(employee_id, dt)) {
                touched.push((employee_id, dt));
            }
        }

        if ops.is_empty() {
            info!("nothing approved in scope, revert is a no-op");
            return Ok(0);
        }

        let apply = self.store.apply(ops);
        match tokio::time::timeout(Duration::from_secs(self.settings.batch_timeout_secs), apply).await
        {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout(self.settings.batch_timeout_secs)),
        };

        for (employee_id, dt) in &touched {
            self.bus.publish(CoreEvent::WorkerDayChanged {
                employee_id: *employee_id,
                dt: *dt,
                graph_type: scope.graph_type,
                is_approved: true,
            });
        }
        Ok(touched.len())
    }

    async fn check(&self, ctx: &RequestCtx, wd: &WorkerDay) -> Result<()> {
        let intent = PermissionIntent {
            action: WdPermissionAction::Approve,
            graph_type: wd.graph_type(),
            employee_id: wd.employee_id,
            day_type: wd.type_code.clone(),
            dt: wd.dt,
            shop_id: wd.shop_id,
            is_vacancy: wd.is_vacancy,
        };
        self.perms.evaluate(ctx, &intent).await
    }

    /// Closest approved plan for a fact copy, inside the manual-fact Δ.
    fn closest_plan<'a>(&self, fact: &WorkerDay, plans: &'a [WorkerDay]) -> Option<&'a WorkerDay> {
        let (fs, fe) = fact.interval()?;
        let delta = self.settings.set_closest_plan_approved_delta_for_manual_fact;
        plans
            .iter()
            .filter(|p| p.employee_id == fact.employee_id)
            .filter(|p| (p.dt - fact.dt).num_days().abs() <= 1)
            .filter_map(|p| {
                let (ps, pe) = p.interval()?;
                let d_start = (fs - ps).num_seconds().abs();
                let d_end = (fe - pe).num_seconds().abs();
                if d_start <= delta && d_end <= delta {
                    Some((p, d_start + d_end))
                } else {
                    None
                }
            })
            .min_by_key(|(_, score)| *score)
            .map(|(p, _)| p)
    }
}
