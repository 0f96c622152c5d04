use chrono::NaiveTime;
use dotenvy::dotenv;
use std::env;

/// Per-network options recognized by the core. Every field has a default so a
/// bare environment still yields a working configuration; deployments override
/// through env vars (one `WFM_*` var per field).
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    /// Cap on a single interval's length, seconds.
    pub max_work_shift_seconds: i64,
    /// Tolerance window for plan↔fact pairing during reconciliation, seconds.
    pub max_plan_diff_in_seconds: i64,
    /// Δ used when linking a manually created fact to its plan, seconds.
    pub set_closest_plan_approved_delta_for_manual_fact: i64,
    /// How much earlier than plan a fact may start, seconds.
    pub allowed_interval_for_early_arrival: i64,
    /// How much later than plan a fact may end, seconds.
    pub allowed_interval_for_late_departure: i64,
    pub allow_creation_several_wdays_for_one_employee_for_one_date: bool,
    /// Restrict plan candidates to the tick's shop when pairing.
    pub consider_department_in_att_records: bool,
    pub run_recalc_fact_from_att_records_on_plan_approve: bool,
    /// Accept unverified ticks; when off they are quarantined.
    pub trust_tick_request: bool,
    /// Close an open shift from the paired plan end when no leaving tick came.
    pub skip_leaving_tick: bool,
    pub forbid_edit_work_days_came_through_integration: bool,

    /// Night band for day/night hour decomposition.
    pub night_start: NaiveTime,
    pub night_end: NaiveTime,

    // Per-operation timeouts, seconds.
    pub edit_timeout_secs: u64,
    pub batch_timeout_secs: u64,
    pub reconcile_timeout_secs: u64,

    /// Bound on the reconciler ingest queue; overflow is rejected retryable.
    pub reconcile_queue_capacity: usize,
    /// TTL for the read-heavy lookup caches, seconds.
    pub lookup_cache_ttl_secs: u64,
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_time(key: &str, default: NaiveTime) -> NaiveTime {
    env::var(key)
        .ok()
        .and_then(|v| NaiveTime::parse_from_str(&v, "%H:%M").ok())
        .unwrap_or(default)
}

impl NetworkSettings {
    pub fn from_env() -> Self {
        dotenv().ok();

        Self {
            max_work_shift_seconds: env_i64("WFM_MAX_WORK_SHIFT_SECONDS", 24 * 3600),
            max_plan_diff_in_seconds: env_i64("WFM_MAX_PLAN_DIFF_IN_SECONDS", 2 * 3600),
            set_closest_plan_approved_delta_for_manual_fact: env_i64(
                "WFM_CLOSEST_PLAN_DELTA_FOR_MANUAL_FACT",
                5 * 3600,
            ),
            allowed_interval_for_early_arrival: env_i64("WFM_ALLOWED_EARLY_ARRIVAL_SECONDS", 3600),
            allowed_interval_for_late_departure: env_i64(
                "WFM_ALLOWED_LATE_DEPARTURE_SECONDS",
                3600,
            ),
            allow_creation_several_wdays_for_one_employee_for_one_date: env_bool(
                "WFM_ALLOW_SEVERAL_WDAYS_PER_DATE",
                false,
            ),
            consider_department_in_att_records: env_bool(
                "WFM_CONSIDER_DEPARTMENT_IN_ATT_RECORDS",
                false,
            ),
            run_recalc_fact_from_att_records_on_plan_approve: env_bool(
                "WFM_RECALC_FACT_ON_PLAN_APPROVE",
                false,
            ),
            trust_tick_request: env_bool("WFM_TRUST_TICK_REQUEST", true),
            skip_leaving_tick: env_bool("WFM_SKIP_LEAVING_TICK", false),
            forbid_edit_work_days_came_through_integration: env_bool(
                "WFM_FORBID_EDIT_INTEGRATION_DAYS",
                false,
            ),
            night_start: env_time("WFM_NIGHT_START", NaiveTime::from_hms_opt(22, 0, 0).unwrap()),
            night_end: env_time("WFM_NIGHT_END", NaiveTime::from_hms_opt(6, 0, 0).unwrap()),
            edit_timeout_secs: env_u64("WFM_EDIT_TIMEOUT_SECS", 10),
            batch_timeout_secs: env_u64("WFM_BATCH_TIMEOUT_SECS", 60),
            reconcile_timeout_secs: env_u64("WFM_RECONCILE_TIMEOUT_SECS", 30),
            reconcile_queue_capacity: env_u64("WFM_RECONCILE_QUEUE_CAPACITY", 1024) as usize,
            lookup_cache_ttl_secs: env_u64("WFM_LOOKUP_CACHE_TTL_SECS", 60),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            max_work_shift_seconds: 24 * 3600,
            max_plan_diff_in_seconds: 2 * 3600,
            set_closest_plan_approved_delta_for_manual_fact: 5 * 3600,
            allowed_interval_for_early_arrival: 3600,
            allowed_interval_for_late_departure: 3600,
            allow_creation_several_wdays_for_one_employee_for_one_date: false,
            consider_department_in_att_records: false,
            run_recalc_fact_from_att_records_on_plan_approve: false,
            trust_tick_request: true,
            skip_leaving_tick: false,
            forbid_edit_work_days_came_through_integration: false,
            night_start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            night_end: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            edit_timeout_secs: 10,
            batch_timeout_secs: 60,
            reconcile_timeout_secs: 30,
            reconcile_queue_capacity: 1024,
            lookup_cache_ttl_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = NetworkSettings::default();
        assert!(s.max_work_shift_seconds >= 16 * 3600);
        assert!(!s.allow_creation_several_wdays_for_one_employee_for_one_date);
        assert_eq!(s.night_start, NaiveTime::from_hms_opt(22, 0, 0).unwrap());
    }
}
