use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{EmployeeId, ShopId, UserId};

/// Physical tick kind as reported by the terminal.
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
pub enum AttendanceType {
    Coming,
    Leaving,
    BreakStart,
    BreakEnd,
    NoType,
}

/// Immutable event produced by a tick point; input to the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: u64,
    pub employee_id: EmployeeId,
    pub user_id: Option<UserId>,
    pub shop_id: ShopId,
    pub kind: AttendanceType,
    pub dttm: NaiveDateTime,
    pub dt: NaiveDate,
    pub verified: bool,
    pub terminal: bool,
}

impl AttendanceRecord {
    pub fn tick(
        employee_id: EmployeeId,
        shop_id: ShopId,
        kind: AttendanceType,
        dttm: NaiveDateTime,
    ) -> Self {
        Self {
            id: 0,
            employee_id,
            user_id: None,
            shop_id,
            kind,
            dttm,
            dt: dttm.date(),
            verified: true,
            terminal: true,
        }
    }
}
