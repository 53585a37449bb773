use std::sync::Arc;

use crate::{
    api::{AttendanceLog, AttendanceRecord},
    fanout::{Topic, UpdateBus},
};

use super::RefetchView;

/// Recent server-side attendance marks. Refreshed whenever the server marks
/// attendance or the local roster changes.
pub struct AttendanceFeed {
    view: RefetchView<Vec<AttendanceRecord>>,
}

impl AttendanceFeed {
    pub const TOPICS: [Topic; 2] = [Topic::AttendanceChanged, Topic::RosterChanged];

    pub fn mount(bus: &UpdateBus, log: Arc<dyn AttendanceLog>, limit: usize) -> Self {
        let view = RefetchView::mount(bus, &Self::TOPICS, move || log.list(limit));
        Self { view }
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.view.current().unwrap_or_default()
    }

    pub fn view(&self) -> &RefetchView<Vec<AttendanceRecord>> {
        &self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::fake::FakeBackend, fanout::Update};
    use std::time::Duration;
    use tokio::time;

    async fn settle<T: Clone + Send + Sync + 'static>(view: &RefetchView<T>, generation: u64) {
        time::timeout(Duration::from_secs(5), view.wait_for_generation(generation))
            .await
            .expect("view never refreshed");
    }

    #[tokio::test]
    async fn refetches_on_attendance_updates() {
        let backend = FakeBackend::new();
        let bus = UpdateBus::new();
        let feed = AttendanceFeed::mount(&bus, Arc::new(backend.clone()), 10);
        settle(feed.view(), 1).await;
        assert!(feed.records().is_empty());

        backend.mark("CS-01", "Asha");
        bus.publish(Update::new(Topic::AttendanceChanged, "attendance_marked"));
        settle(feed.view(), 2).await;

        let records = feed.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].roll_number, "CS-01");
    }

    #[tokio::test]
    async fn remounting_does_not_leak_subscriptions() {
        let backend = FakeBackend::new();
        let bus = UpdateBus::new();

        let first = AttendanceFeed::mount(&bus, Arc::new(backend.clone()), 10);
        settle(first.view(), 1).await;
        drop(first);
        let second = AttendanceFeed::mount(&bus, Arc::new(backend.clone()), 10);
        settle(second.view(), 1).await;

        assert_eq!(bus.subscriber_count(Topic::AttendanceChanged), 1);
        assert_eq!(bus.subscriber_count(Topic::RosterChanged), 1);

        let calls_before = backend.attendance_calls();
        bus.notify(Topic::AttendanceChanged, "attendance_marked");
        settle(second.view(), 2).await;
        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.attendance_calls(), calls_before + 1);

        drop(second);
        assert_eq!(bus.total_subscribers(), 0);
    }
}
