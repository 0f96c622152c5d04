pub mod attendance;
pub mod break_policy;
pub mod calendar;
pub mod day_type;
pub mod employee;
pub mod org;
pub mod permission;
pub mod shop;
pub mod timesheet;
pub mod worker_day;

pub type UserId = u64;
pub type EmployeeId = u64;
pub type EmploymentId = u64;
pub type ShopId = u64;
pub type NetworkId = u64;
pub type GroupId = u64;
pub type PositionId = u64;
pub type RegionId = u64;
pub type WorkTypeId = u64;
pub type WorkerDayId = u64;
pub type BreakPolicyId = u64;

pub use attendance::{AttendanceRecord, AttendanceType};
pub use break_policy::{BreakPolicy, BreakRule};
pub use calendar::{ProductionCalendar, ProductionDayKind, Region};
pub use day_type::{DayType, WorkHoursMethod};
pub use employee::{Employee, Employment, Position};
pub use org::OrgDirectory;
pub use permission::{
    EmployeeScope, Group, GroupWorkerDayPermission, ShopScope, WdPermissionAction,
};
pub use shop::{Network, NetworkConnect, Shop};
pub use timesheet::{FactSource, TimesheetRow};
pub use worker_day::{GraphType, WdKey, WorkerDay, WorkerDayDetail, WorkerDaySource};
