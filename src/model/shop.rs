use serde::{Deserialize, Serialize};

use super::{BreakPolicyId, NetworkId, RegionId, ShopId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub title: String,
}

/// Outsourcing relation: the contractor network staffs shops of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConnect {
    pub outsourcing_network_id: NetworkId,
    pub client_network_id: NetworkId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub id: ShopId,
    pub network_id: NetworkId,
    pub title: String,
    pub region_id: Option<RegionId>,
    /// Shop-level break table; a position-level one takes precedence.
    pub break_policy_id: Option<BreakPolicyId>,
}
