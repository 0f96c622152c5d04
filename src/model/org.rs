use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

use super::break_policy::BreakPolicy;
use super::employee::{Employee, Employment, Position};
use super::permission::{Group, GroupWorkerDayPermission};
use super::shop::{Network, NetworkConnect, Shop};
use super::{
    BreakPolicyId, EmployeeId, GroupId, NetworkId, PositionId, ShopId, UserId, WorkTypeId,
};
use crate::error::{Error, Result};

/// Reference topology the evaluator and the store query: employees with
/// their employments, shops, groups, networks and break tables. Built once
/// per process (or per cache refresh); reads only.
#[derive(Debug, Default, Clone)]
pub struct OrgDirectory {
    pub employees: HashMap<EmployeeId, Employee>,
    pub employments: Vec<Employment>,
    pub positions: HashMap<PositionId, Position>,
    pub shops: HashMap<ShopId, Shop>,
    pub groups: HashMap<GroupId, Group>,
    pub networks: HashMap<NetworkId, Network>,
    pub network_connects: Vec<NetworkConnect>,
    pub break_policies: HashMap<BreakPolicyId, BreakPolicy>,
    pub wd_permissions: Vec<GroupWorkerDayPermission>,

    pub user_groups: HashMap<UserId, Vec<GroupId>>,
    pub user_shops: HashMap<UserId, Vec<ShopId>>,
    pub user_networks: HashMap<UserId, NetworkId>,
}

impl OrgDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn employee(&self, id: EmployeeId) -> Result<&Employee> {
        self.employees
            .get(&id)
            .ok_or(Error::NotFound { entity: "employee", id })
    }

    pub fn shop(&self, id: ShopId) -> Result<&Shop> {
        self.shops
            .get(&id)
            .ok_or(Error::NotFound { entity: "shop", id })
    }

    pub fn position(&self, id: PositionId) -> Result<&Position> {
        self.positions
            .get(&id)
            .ok_or(Error::NotFound { entity: "position", id })
    }

    /// Employments active at the date, highest rate first.
    pub fn active_employments(&self, employee_id: EmployeeId, dt: NaiveDate) -> Vec<&Employment> {
        let mut rows: Vec<&Employment> = self
            .employments
            .iter()
            .filter(|e| e.employee_id == employee_id && e.active_at(dt))
            .collect();
        rows.sort_by(|a, b| {
            b.norm_work_hours
                .partial_cmp(&a.norm_work_hours)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows
    }

    pub fn main_employment(&self, employee_id: EmployeeId, dt: NaiveDate) -> Option<&Employment> {
        self.active_employments(employee_id, dt).into_iter().next()
    }

    pub fn employee_shops_at(&self, employee_id: EmployeeId, dt: NaiveDate) -> Vec<ShopId> {
        self.active_employments(employee_id, dt)
            .iter()
            .map(|e| e.shop_id)
            .collect()
    }

    /// The work type a reconciled fact inherits when the plan carries none.
    pub fn default_work_type(&self, employee_id: EmployeeId, dt: NaiveDate) -> Option<WorkTypeId> {
        let employment = self.main_employment(employee_id, dt)?;
        self.positions
            .get(&employment.position_id)
            .and_then(|p| p.default_work_type_id)
    }

    pub fn network_of_employee(&self, employee_id: EmployeeId) -> Option<NetworkId> {
        let employee = self.employees.get(&employee_id)?;
        self.user_networks.get(&employee.user_id).copied()
    }

    pub fn groups_of_user(&self, user_id: UserId) -> Vec<GroupId> {
        self.user_groups.get(&user_id).cloned().unwrap_or_default()
    }

    pub fn groups_of_employee(&self, employee_id: EmployeeId) -> Vec<GroupId> {
        self.employees
            .get(&employee_id)
            .map(|e| self.groups_of_user(e.user_id))
            .unwrap_or_default()
    }

    /// Transitive closure over the subordinates relation; tolerant of
    /// malformed cycles (visited set), though cycles are forbidden upstream.
    pub fn subordinate_closure(&self, roots: &[GroupId]) -> HashSet<GroupId> {
        let mut seen: HashSet<GroupId> = HashSet::new();
        let mut stack: Vec<GroupId> = roots.to_vec();
        while let Some(gid) = stack.pop() {
            if let Some(group) = self.groups.get(&gid) {
                for sub in &group.subordinate_ids {
                    if seen.insert(*sub) {
                        stack.push(*sub);
                    }
                }
            }
        }
        seen
    }

    pub fn permissions_for_groups(&self, groups: &[GroupId]) -> Vec<&GroupWorkerDayPermission> {
        self.wd_permissions
            .iter()
            .filter(|t| groups.contains(&t.group_id))
            .collect()
    }

    /// Networks that staff the given client network.
    pub fn outsourcing_networks_of(&self, client: NetworkId) -> Vec<NetworkId> {
        self.network_connects
            .iter()
            .filter(|c| c.client_network_id == client)
            .map(|c| c.outsourcing_network_id)
            .collect()
    }

    /// Client networks the given contractor network staffs.
    pub fn client_networks_of(&self, outsourcing: NetworkId) -> Vec<NetworkId> {
        self.network_connects
            .iter()
            .filter(|c| c.outsourcing_network_id == outsourcing)
            .map(|c| c.client_network_id)
            .collect()
    }

    /// Break table for a day at a shop: position-level first, shop-level as
    /// the fallback. No table at all is a misconfiguration.
    pub fn break_policy_for(
        &self,
        shop_id: ShopId,
        position_id: Option<PositionId>,
    ) -> Result<&BreakPolicy> {
        if let Some(pid) = position_id {
            if let Some(bp_id) = self.positions.get(&pid).and_then(|p| p.break_policy_id) {
                if let Some(bp) = self.break_policies.get(&bp_id) {
                    return Ok(bp);
                }
            }
        }
        if let Some(bp_id) = self.shops.get(&shop_id).and_then(|s| s.break_policy_id) {
            if let Some(bp) = self.break_policies.get(&bp_id) {
                return Ok(bp);
            }
        }
        Err(Error::Config(format!(
            "no break policy configured for shop {shop_id}"
        )))
    }
}
