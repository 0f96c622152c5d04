use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use crate::error::{Error, InvariantViolation, Result};
use crate::events::{CoreEvent, EventBus};
use crate::model::day_type::{codes, DayType, WorkHoursMethod};
use crate::model::GraphType;

fn day_type(
    code: &str,
    title: &str,
    is_dayoff: bool,
    is_work_hours: bool,
    is_reduce_norm: bool,
    method: WorkHoursMethod,
) -> DayType {
    DayType {
        code: code.to_string(),
        title: title.to_string(),
        is_dayoff,
        is_work_hours,
        is_reduce_norm,
        use_in_plan: true,
        use_in_fact: true,
        show_stat_in_days: is_dayoff,
        show_stat_in_hours: is_work_hours,
        get_work_hours_method: method,
        is_system: true,
    }
}

/// Built-in catalog; every entry is a system type.
static BUILTIN_DAY_TYPES: Lazy<Vec<DayType>> = Lazy::new(|| {
    vec![
        day_type(codes::WORKDAY, "Workday", false, true, false, WorkHoursMethod::DerivedFromInterval),
        day_type(codes::HOLIDAY, "Holiday", true, false, false, WorkHoursMethod::Manual),
        day_type(codes::VACATION, "Vacation", true, false, true, WorkHoursMethod::AverageSawh),
        day_type(codes::SICK, "Sick leave", true, false, true, WorkHoursMethod::AverageSawh),
        day_type(codes::BUSINESS_TRIP, "Business trip", false, true, false, WorkHoursMethod::NormHours),
        day_type(codes::EMPTY, "Empty", true, false, false, WorkHoursMethod::Manual),
        day_type(codes::DELETED, "Deleted", true, false, false, WorkHoursMethod::Manual),
        day_type(codes::QUALIFICATION, "Qualification", false, true, false, WorkHoursMethod::DerivedFromInterval),
    ]
});

/// Catalog of day types (C1). Immutable at runtime apart from the
/// administrative `upsert`/`remove`, which re-announce themselves on the bus
/// so permission expansions can follow.
pub struct DayTypeRegistry {
    inner: RwLock<HashMap<String, DayType>>,
    bus: EventBus,
}

impl DayTypeRegistry {
    pub fn with_builtin(bus: EventBus) -> Self {
        let map = BUILTIN_DAY_TYPES
            .iter()
            .cloned()
            .map(|t| (t.code.clone(), t))
            .collect();
        Self { inner: RwLock::new(map), bus }
    }

    pub fn get(&self, code: &str) -> Option<DayType> {
        self.inner.read().expect("day type registry poisoned").get(code).cloned()
    }

    pub fn require(&self, code: &str) -> Result<DayType> {
        self.get(code).ok_or_else(|| {
            Error::Invariant(InvariantViolation::UnknownDayType { code: code.to_string() })
        })
    }

    pub fn list(&self) -> Vec<DayType> {
        let mut all: Vec<DayType> = self
            .inner
            .read()
            .expect("day type registry poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        all
    }

    pub fn permitted_for(&self, graph_type: GraphType) -> Vec<DayType> {
        self.list()
            .into_iter()
            .filter(|t| t.usable_in(graph_type))
            .collect()
    }

    pub fn work_hours_method(&self, code: &str) -> Result<WorkHoursMethod> {
        Ok(self.require(code)?.get_work_hours_method)
    }

    /// Administrative create-or-replace. Flag changes are announced so the
    /// permission layer can re-expand its tuples.
    pub fn upsert(&self, day_type: DayType) {
        let code = day_type.code.clone();
        self.inner
            .write()
            .expect("day type registry poisoned")
            .insert(code.clone(), day_type);
        info!(code = %code, "day type upserted");
        self.bus.publish(CoreEvent::DayTypeChanged { code });
    }

    pub fn remove(&self, code: &str) -> Result<()> {
        let mut map = self.inner.write().expect("day type registry poisoned");
        match map.get(code) {
            None => Err(Error::NotFound { entity: "day_type", id: 0 }),
            Some(t) if t.is_system => Err(Error::Config(format!(
                "system day type {code:?} cannot be deleted"
            ))),
            Some(_) => {
                map.remove(code);
                drop(map);
                self.bus.publish(CoreEvent::DayTypeChanged { code: code.to_string() });
                Ok(())
            }
        }
    }
}
