use serde::{Deserialize, Serialize};

use super::worker_day::GraphType;
use super::{GroupId, NetworkId};

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
pub enum WdPermissionAction {
    Create,
    Update,
    Delete,
    Approve,
}

/// Which employees a tuple reaches, relative to the actor.
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
pub enum EmployeeScope {
    MyShopsEmployees,
    SubordinateEmployees,
    OutsourceEmployees,
    MyNetworkEmployees,
}

/// Which shops a tuple reaches, relative to the actor.
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
pub enum ShopScope {
    MyShops,
    MyNetworkShops,
    OutsourceNetworkShops,
    ClientNetworkShops,
}

/// A functional group; subordination is transitive and acyclic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub network_id: NetworkId,
    pub name: String,
    pub subordinate_ids: Vec<GroupId>,
}

/// One permission tuple. An intent is legal iff at least one tuple of the
/// actor's groups allows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupWorkerDayPermission {
    pub id: u64,
    pub group_id: GroupId,
    pub action: WdPermissionAction,
    pub graph_type: GraphType,
    /// Day type code the tuple covers.
    pub day_type: String,
    pub employee_scope: EmployeeScope,
    pub shop_scope: ShopScope,
    /// `None` means unbounded on that side.
    pub limit_days_in_past: Option<i64>,
    pub limit_days_in_future: Option<i64>,
    pub allow_actions_on_vacancies: bool,
}
