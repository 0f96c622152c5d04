use chrono::NaiveDate;
use moka::future::Cache;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::NetworkSettings;
use crate::error::{DenyPredicate, DenyReason, Error, Result};
use crate::model::{
    EmployeeId, EmployeeScope, GraphType, GroupId, GroupWorkerDayPermission, OrgDirectory, ShopId,
    ShopScope, UserId, WdPermissionAction,
};
use crate::registry::DayTypeRegistry;
use crate::service::RequestCtx;

/// One mutation the caller intends; the evaluator answers legal / illegal.
#[derive(Debug, Clone)]
pub struct PermissionIntent {
    pub action: WdPermissionAction,
    pub graph_type: GraphType,
    pub employee_id: EmployeeId,
    pub day_type: String,
    pub dt: NaiveDate,
    pub shop_id: Option<ShopId>,
    pub is_vacancy: bool,
}

/// Evaluates intents against the actor's group permission tuples (C2).
/// The subordinate closure is the only expensive lookup, so it is cached
/// per actor with a short TTL.
pub struct PermissionEvaluator {
    org: Arc<OrgDirectory>,
    registry: Arc<DayTypeRegistry>,
    closure_cache: Cache<UserId, Arc<HashSet<GroupId>>>,
}

impl PermissionEvaluator {
    pub fn new(
        org: Arc<OrgDirectory>,
        registry: Arc<DayTypeRegistry>,
        settings: &NetworkSettings,
    ) -> Self {
        Self {
            org,
            registry,
            closure_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(settings.lookup_cache_ttl_secs))
                .build(),
        }
    }

    /// Legal iff at least one tuple allows; otherwise the denial cites the
    /// closest tuple and the predicate it failed.
    pub async fn evaluate(&self, ctx: &RequestCtx, intent: &PermissionIntent) -> Result<()> {
        let deny = |tuple_id: Option<u64>, predicate: DenyPredicate| {
            let reason = DenyReason {
                tuple_id,
                predicate,
                actor: ctx.actor,
                action: intent.action,
                graph_type: intent.graph_type,
                day_type: intent.day_type.clone(),
                employee_id: intent.employee_id,
                dt: intent.dt,
            };
            info!(
                actor = ctx.actor,
                employee_id = intent.employee_id,
                dt = %intent.dt,
                predicate = %predicate,
                "worker day intent denied"
            );
            Error::denied(reason)
        };

        if self.registry.get(&intent.day_type).is_none() {
            return Err(deny(None, DenyPredicate::UnknownDayType));
        }

        let groups = self.org.groups_of_user(ctx.actor);
        let candidates: Vec<&GroupWorkerDayPermission> = self
            .org
            .permissions_for_groups(&groups)
            .into_iter()
            .filter(|t| {
                t.action == intent.action
                    && t.graph_type == intent.graph_type
                    && t.day_type == intent.day_type
                    // A tuple pointing at a type the registry dropped is a no-match.
                    && self.registry.get(&t.day_type).is_some()
            })
            .collect();

        if candidates.is_empty() {
            return Err(deny(None, DenyPredicate::NoMatchingTuple));
        }

        let mut first_failure: Option<(u64, DenyPredicate)> = None;
        for tuple in candidates {
            match self.check_tuple(ctx, intent, tuple).await {
                None => return Ok(()),
                Some(predicate) => {
                    first_failure.get_or_insert((tuple.id, predicate));
                }
            }
        }

        let (tuple_id, predicate) = first_failure.unwrap_or((0, DenyPredicate::NoMatchingTuple));
        Err(deny(Some(tuple_id), predicate))
    }

    /// `None` means the tuple allows the intent.
    async fn check_tuple(
        &self,
        ctx: &RequestCtx,
        intent: &PermissionIntent,
        tuple: &GroupWorkerDayPermission,
    ) -> Option<DenyPredicate> {
        if !self.employee_in_scope(ctx.actor, intent, tuple.employee_scope).await {
            return Some(DenyPredicate::EmployeeScope);
        }
        if !self.shop_in_scope(ctx.actor, intent.shop_id, tuple.shop_scope) {
            return Some(DenyPredicate::ShopScope);
        }

        let offset = (intent.dt - ctx.today).num_days();
        if let Some(limit) = tuple.limit_days_in_past {
            if offset < -limit {
                return Some(DenyPredicate::DtWindow);
            }
        }
        if let Some(limit) = tuple.limit_days_in_future {
            if offset > limit {
                return Some(DenyPredicate::DtWindow);
            }
        }

        if intent.is_vacancy && !tuple.allow_actions_on_vacancies {
            return Some(DenyPredicate::VacancyForbidden);
        }
        None
    }

    async fn employee_in_scope(
        &self,
        actor: UserId,
        intent: &PermissionIntent,
        scope: EmployeeScope,
    ) -> bool {
        let org = &self.org;
        match scope {
            EmployeeScope::MyShopsEmployees => {
                let actor_shops = org.user_shops.get(&actor).cloned().unwrap_or_default();
                org.employee_shops_at(intent.employee_id, intent.dt)
                    .iter()
                    .any(|s| actor_shops.contains(s))
            }
            EmployeeScope::SubordinateEmployees => {
                let closure = self.subordinates_of(actor).await;
                org.groups_of_employee(intent.employee_id)
                    .iter()
                    .any(|g| closure.contains(g))
            }
            EmployeeScope::OutsourceEmployees => {
                match (org.user_networks.get(&actor), org.network_of_employee(intent.employee_id)) {
                    (Some(actor_net), Some(emp_net)) => {
                        org.outsourcing_networks_of(*actor_net).contains(&emp_net)
                    }
                    _ => false,
                }
            }
            EmployeeScope::MyNetworkEmployees => {
                match (org.user_networks.get(&actor), org.network_of_employee(intent.employee_id)) {
                    (Some(actor_net), Some(emp_net)) => *actor_net == emp_net,
                    _ => false,
                }
            }
        }
    }

    fn shop_in_scope(&self, actor: UserId, shop_id: Option<ShopId>, scope: ShopScope) -> bool {
        // Day-offs may carry no shop; there is nothing to scope then.
        let Some(shop_id) = shop_id else { return true };
        let org = &self.org;
        let Some(shop) = org.shops.get(&shop_id) else { return false };
        match scope {
            ShopScope::MyShops => org
                .user_shops
                .get(&actor)
                .map(|shops| shops.contains(&shop_id))
                .unwrap_or(false),
            ShopScope::MyNetworkShops => org
                .user_networks
                .get(&actor)
                .map(|net| *net == shop.network_id)
                .unwrap_or(false),
            ShopScope::OutsourceNetworkShops => org
                .user_networks
                .get(&actor)
                .map(|net| org.outsourcing_networks_of(*net).contains(&shop.network_id))
                .unwrap_or(false),
            ShopScope::ClientNetworkShops => org
                .user_networks
                .get(&actor)
                .map(|net| org.client_networks_of(*net).contains(&shop.network_id))
                .unwrap_or(false),
        }
    }

    async fn subordinates_of(&self, actor: UserId) -> Arc<HashSet<GroupId>> {
        let org = Arc::clone(&self.org);
        self.closure_cache
            .get_with(actor, async move {
                let roots = org.groups_of_user(actor);
                Arc::new(org.subordinate_closure(&roots))
            })
            .await
    }
}
