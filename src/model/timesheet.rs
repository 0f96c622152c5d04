use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::EmployeeId;

/// Where the fact side of a timesheet row came from.
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
pub enum FactSource {
    Plan,
    Fact,
    Manual,
    System,
}

/// One per-(employee, date) row of the monthly timesheet. The `main_*`
/// columns are the payroll projection, clamped to the month norm; overflow
/// lands in `additional_hours`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimesheetRow {
    pub employee_id: EmployeeId,
    pub dt: NaiveDate,

    pub fact_source: FactSource,
    pub fact_type: Option<String>,
    pub fact_dttm_work_start: Option<NaiveDateTime>,
    pub fact_dttm_work_end: Option<NaiveDateTime>,
    pub fact_total_hours: f64,
    pub fact_day_hours: f64,
    pub fact_night_hours: f64,

    pub main_type: Option<String>,
    pub main_total_hours: f64,
    pub main_day_hours: f64,
    pub main_night_hours: f64,

    pub additional_hours: f64,
}

impl TimesheetRow {
    pub fn empty(employee_id: EmployeeId, dt: NaiveDate) -> Self {
        Self {
            employee_id,
            dt,
            fact_source: FactSource::System,
            fact_type: None,
            fact_dttm_work_start: None,
            fact_dttm_work_end: None,
            fact_total_hours: 0.0,
            fact_day_hours: 0.0,
            fact_night_hours: 0.0,
            main_type: None,
            main_total_hours: 0.0,
            main_day_hours: 0.0,
            main_night_hours: 0.0,
            additional_hours: 0.0,
        }
    }
}
