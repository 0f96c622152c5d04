use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::NetworkSettings;
use crate::error::Result;
use crate::events::{CoreEvent, EventBus};
use crate::model::calendar::ProductionCalendar;
use crate::model::day_type::WorkHoursMethod;
use crate::model::worker_day::{GraphType, WorkerDaySource};
use crate::model::{EmployeeId, FactSource, OrgDirectory, TimesheetRow, WorkerDay};
use crate::registry::DayTypeRegistry;
use crate::service::hours;
use crate::store::{QuerySpec, WorkerDayStore};

/// Monthly projection of approved records into payroll rows (C8).
///
/// `main_*` is what payroll pays: the fact hours, clamped so the month total
/// never exceeds the employment norm. Whatever the clamp trims off a day
/// lands in `additional_hours` of that same day, so the latest days of the
/// month absorb the overtime. Reduce-norm absences lower the norm instead of
/// filling it.
pub struct TimesheetProjector {
    store: Arc<dyn WorkerDayStore>,
    registry: Arc<DayTypeRegistry>,
    org: Arc<OrgDirectory>,
    calendar: Arc<ProductionCalendar>,
    settings: NetworkSettings,
    bus: EventBus,
}

impl TimesheetProjector {
    pub fn new(
        store: Arc<dyn WorkerDayStore>,
        registry: Arc<DayTypeRegistry>,
        org: Arc<OrgDirectory>,
        calendar: Arc<ProductionCalendar>,
        settings: NetworkSettings,
        bus: EventBus,
    ) -> Self {
        Self { store, registry, org, calendar, settings, bus }
    }

    /// Rebuild the month from scratch and persist it. Running it twice over
    /// the same worker-day state writes the same rows.
    #[instrument(name = "timesheet_rebuild", skip(self))]
    pub async fn rebuild(
        &self,
        employee_id: EmployeeId,
        year: i32,
        month: u32,
    ) -> Result<Vec<TimesheetRow>> {
        let first = first_day(year, month);
        let last = last_day(year, month);

        let fact = self.layer_by_date(employee_id, first, last, GraphType::Fact).await?;
        let plan = self.layer_by_date(employee_id, first, last, GraphType::Plan).await?;

        let month_norm = self.month_norm(employee_id, first, year, month);

        let mut rows: Vec<TimesheetRow> = Vec::with_capacity(31);
        let mut norm_reduction = 0.0;
        let mut dt = first;
        while dt <= last {
            let row = match fact.get(&dt).or_else(|| plan.get(&dt)) {
                None => TimesheetRow::empty(employee_id, dt),
                Some(wd) => {
                    let source = if wd.is_fact {
                        match wd.source {
                            WorkerDaySource::ManualQuick | WorkerDaySource::ManualFull => {
                                FactSource::Manual
                            }
                            _ => FactSource::Fact,
                        }
                    } else {
                        FactSource::Plan
                    };
                    self.project_day(wd, source, month_norm, year, month, &mut norm_reduction)?
                }
            };
            rows.push(row);
            dt = match dt.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        let effective_norm = (month_norm - norm_reduction).max(0.0);
        clamp_to_norm(&mut rows, effective_norm);

        self.store.put_timesheet(rows.clone()).await?;
        info!(
            employee_id,
            year,
            month,
            norm = effective_norm,
            "timesheet rebuilt"
        );
        self.bus.publish(CoreEvent::TimesheetRebuilt {
            employee_id,
            year,
            month,
            rows: rows.len(),
        });
        Ok(rows)
    }

    async fn layer_by_date(
        &self,
        employee_id: EmployeeId,
        first: NaiveDate,
        last: NaiveDate,
        graph_type: GraphType,
    ) -> Result<HashMap<NaiveDate, WorkerDay>> {
        let spec = QuerySpec::range(first, last)
            .employees(vec![employee_id])
            .graph(graph_type)
            .approved(true);
        let mut map = HashMap::new();
        for wd in self.store.fetch(&spec).await? {
            map.entry(wd.dt).or_insert(wd);
        }
        Ok(map)
    }

    fn month_norm(&self, employee_id: EmployeeId, first: NaiveDate, year: i32, month: u32) -> f64 {
        let Some(employment) = self.org.main_employment(employee_id, first) else {
            return 0.0;
        };
        let Some(position) = self.org.positions.get(&employment.position_id) else {
            return 0.0;
        };
        let region_id = self
            .org
            .shops
            .get(&employment.shop_id)
            .and_then(|s| s.region_id);
        hours::month_norm_hours(employment, position, region_id, &self.calendar, year, month)
    }

    fn project_day(
        &self,
        wd: &WorkerDay,
        source: FactSource,
        month_norm: f64,
        year: i32,
        month: u32,
        norm_reduction: &mut f64,
    ) -> Result<TimesheetRow> {
        let day_type = self.registry.require(&wd.type_code)?;
        let mut row = TimesheetRow::empty(wd.employee_id, wd.dt);
        row.fact_source = source;
        row.fact_type = Some(wd.type_code.clone());
        row.main_type = Some(wd.type_code.clone());

        if let Some((start, end)) = wd.interval() {
            let main = self.org.main_employment(wd.employee_id, wd.dt);
            let policy = match wd.shop_id {
                Some(shop_id) => {
                    Some(self.org.break_policy_for(shop_id, main.map(|e| e.position_id))?)
                }
                None => None,
            };
            let (day, night) = match policy {
                Some(policy) => hours::split_day_night(
                    start,
                    end,
                    policy,
                    self.settings.night_start,
                    self.settings.night_end,
                ),
                None => (wd.work_hours, 0.0),
            };
            row.fact_dttm_work_start = Some(start);
            row.fact_dttm_work_end = Some(end);
            row.fact_total_hours = wd.work_hours;
            row.fact_day_hours = day;
            row.fact_night_hours = night;
            row.main_total_hours = wd.work_hours;
            row.main_day_hours = day;
            row.main_night_hours = night;
            return Ok(row);
        }

        let contributed = match day_type.get_work_hours_method {
            WorkHoursMethod::AverageSawh => hours::average_sawh(month_norm, year, month),
            WorkHoursMethod::NormHours => self.date_norm(wd.employee_id, wd.dt),
            WorkHoursMethod::Manual | WorkHoursMethod::DerivedFromInterval => wd.work_hours,
        };
        row.fact_total_hours = contributed;
        row.fact_day_hours = contributed;

        if day_type.is_reduce_norm {
            // Absences lower the month norm; they are not paid work hours.
            *norm_reduction += self.date_norm(wd.employee_id, wd.dt);
        } else {
            row.main_total_hours = contributed;
            row.main_day_hours = contributed;
        }
        Ok(row)
    }

    /// The employment norm of one calendar date: zero on holidays, one hour
    /// short on abbreviated days.
    fn date_norm(&self, employee_id: EmployeeId, dt: NaiveDate) -> f64 {
        let Some(employment) = self.org.main_employment(employee_id, dt) else {
            return 0.0;
        };
        let Some(position) = self.org.positions.get(&employment.position_id) else {
            return 0.0;
        };
        let region_id = self
            .org
            .shops
            .get(&employment.shop_id)
            .and_then(|s| s.region_id);
        hours::norm_hours(employment, position, region_id, &self.calendar, dt, dt)
    }
}

/// Walk the month in date order; once the running main total passes the norm
/// the excess of each further day moves into `additional_hours`. The trim
/// comes out of day hours before night hours.
fn clamp_to_norm(rows: &mut [TimesheetRow], norm: f64) {
    let mut running = 0.0;
    for row in rows.iter_mut() {
        let allowed = (norm - running).max(0.0);
        if row.main_total_hours > allowed {
            let excess = hours::round2(row.main_total_hours - allowed);
            row.additional_hours = excess;
            row.main_total_hours = hours::round2(allowed);
            let day_trim = excess.min(row.main_day_hours);
            row.main_day_hours = hours::round2(row.main_day_hours - day_trim);
            row.main_night_hours =
                hours::round2((row.main_night_hours - (excess - day_trim)).max(0.0));
        }
        running += row.main_total_hours;
    }
}

fn first_day(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default()
}

fn last_day(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, hours::days_in_month(year, month)).unwrap_or_default()
}
