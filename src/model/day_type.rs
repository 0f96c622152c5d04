use serde::{Deserialize, Serialize};

use super::worker_day::GraphType;

/// How `work_hours` is obtained for a day of this type.
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
pub enum WorkHoursMethod {
    /// Daily average of the month's planned hours.
    AverageSawh,
    /// Production-calendar norm for the day.
    NormHours,
    /// Whatever the editor entered.
    Manual,
    /// End minus start minus breaks.
    DerivedFromInterval,
}

/// Behavioral flags of a day kind. Behavior is read from these flags, never
/// from per-kind dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayType {
    /// Short code, e.g. "W" for a workday.
    pub code: String,
    pub title: String,
    /// No shop or times; the employee is off.
    pub is_dayoff: bool,
    /// Counts toward the hours sum.
    pub is_work_hours: bool,
    /// Absence that lowers the monthly norm (vacation, sick, ...).
    pub is_reduce_norm: bool,
    pub use_in_plan: bool,
    pub use_in_fact: bool,
    pub show_stat_in_days: bool,
    pub show_stat_in_hours: bool,
    pub get_work_hours_method: WorkHoursMethod,
    /// System types cannot be removed from the registry.
    pub is_system: bool,
}

impl DayType {
    /// Interval types carry both timestamps and a shop.
    pub fn has_interval(&self) -> bool {
        !self.is_dayoff && self.get_work_hours_method == WorkHoursMethod::DerivedFromInterval
    }

    pub fn usable_in(&self, graph_type: GraphType) -> bool {
        match graph_type {
            GraphType::Plan => self.use_in_plan,
            GraphType::Fact => self.use_in_fact,
        }
    }
}

/// Codes of the built-in day types.
pub mod codes {
    pub const WORKDAY: &str = "W";
    pub const HOLIDAY: &str = "H";
    pub const VACATION: &str = "V";
    pub const SICK: &str = "S";
    pub const BUSINESS_TRIP: &str = "T";
    pub const EMPTY: &str = "E";
    pub const DELETED: &str = "D";
    pub const QUALIFICATION: &str = "Q";
}
