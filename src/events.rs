use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{EmployeeId, GraphType, ShopId, WorkerDayId};

/// Egress events, consumed by the (external) notification dispatcher.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    WorkerDayChanged {
        employee_id: EmployeeId,
        dt: NaiveDate,
        graph_type: GraphType,
        is_approved: bool,
    },
    AttendanceReconciled {
        employee_id: EmployeeId,
        dt: NaiveDate,
        worker_day_id: WorkerDayId,
        paired: bool,
    },
    Approved {
        shop_id: ShopId,
        graph_type: GraphType,
        dt_from: NaiveDate,
        dt_to: NaiveDate,
        affected: usize,
    },
    TimesheetRebuilt {
        employee_id: EmployeeId,
        year: i32,
        month: u32,
        rows: usize,
    },
    DayTypeChanged {
        code: String,
    },
    TickQuarantined {
        employee_id: EmployeeId,
        dttm: NaiveDateTime,
        reason: String,
    },
}

impl CoreEvent {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Fan-out bus. Publishing never fails: with no subscribers the event is
/// dropped, which is the right behavior for an optional notification sink.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: CoreEvent) {
        debug!(event = %event.to_json(), "core event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(CoreEvent::DayTypeChanged { code: "W".into() });
        let got = rx.recv().await.unwrap();
        assert!(matches!(got, CoreEvent::DayTypeChanged { ref code } if code == "W"));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(CoreEvent::DayTypeChanged { code: "H".into() });
    }
}
