//! Workforce management core: versioned worker-day records (plan/fact ×
//! draft/approved), the permission model over them, attendance
//! reconciliation and the monthly timesheet projection.

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod registry;
pub mod service;
pub mod store;

pub use config::NetworkSettings;
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
pub use registry::DayTypeRegistry;
pub use service::RequestCtx;
