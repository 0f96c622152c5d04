use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::RegionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProductionDayKind {
    Workday,
    /// Abbreviated pre-holiday day; the norm loses one hour.
    ShortWorkday,
    Holiday,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub parent_id: Option<RegionId>,
    pub name: String,
}

/// Business calendar. Regions form a parent tree; a child region inherits
/// overrides from the nearest ancestor that has an entry for the date.
/// Without any entry the weekday decides (Sat/Sun are holidays).
#[derive(Debug, Clone, Default)]
pub struct ProductionCalendar {
    regions: HashMap<RegionId, Region>,
    overrides: HashMap<(RegionId, NaiveDate), ProductionDayKind>,
}

impl ProductionCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_region(&mut self, region: Region) {
        self.regions.insert(region.id, region);
    }

    pub fn set_day(&mut self, region_id: RegionId, dt: NaiveDate, kind: ProductionDayKind) {
        self.overrides.insert((region_id, dt), kind);
    }

    pub fn day_kind(&self, region_id: Option<RegionId>, dt: NaiveDate) -> ProductionDayKind {
        let mut cursor = region_id;
        let mut hops = 0usize;
        while let Some(rid) = cursor {
            if let Some(kind) = self.overrides.get(&(rid, dt)) {
                return *kind;
            }
            cursor = self.regions.get(&rid).and_then(|r| r.parent_id);
            hops += 1;
            if hops > self.regions.len() {
                break; // malformed parent chain, fall through to the weekday rule
            }
        }
        match dt.weekday() {
            Weekday::Sat | Weekday::Sun => ProductionDayKind::Holiday,
            _ => ProductionDayKind::Workday,
        }
    }

    pub fn is_working(&self, region_id: Option<RegionId>, dt: NaiveDate) -> bool {
        self.day_kind(region_id, dt) != ProductionDayKind::Holiday
    }

    /// Working (incl. short) days in the inclusive range.
    pub fn working_days(
        &self,
        region_id: Option<RegionId>,
        dt_from: NaiveDate,
        dt_to: NaiveDate,
    ) -> Vec<(NaiveDate, ProductionDayKind)> {
        let mut out = Vec::new();
        let mut dt = dt_from;
        while dt <= dt_to {
            let kind = self.day_kind(region_id, dt);
            if kind != ProductionDayKind::Holiday {
                out.push((dt, kind));
            }
            dt = match dt.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        out
    }
}
