use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, ThreadId},
};

use log::{debug, warn};

use super::{Topic, Update};

/// Upper bound on deliveries triggered by one outer publish, counting the
/// publishes its subscribers make while handling it.
const MAX_CASCADE: usize = 64;

type Callback = Arc<dyn Fn(&Update) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    topic: Topic,
    callback: Callback,
    live: Arc<AtomicBool>,
}

struct Queued {
    update: Update,
    /// Subscriber whose handler was running when this was published.
    origin: Option<u64>,
}

#[derive(Default)]
struct Dispatch {
    owner: Option<ThreadId>,
    current: Option<u64>,
    queue: VecDeque<Queued>,
}

struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    dispatch: Mutex<Dispatch>,
    /// Serialises dispatch across threads so notifications never interleave.
    gate: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide topic bus between the transport and the views.
///
/// Delivery is synchronous and in registration order. A publish made from
/// inside a handler is queued behind the one being delivered and is never
/// handed back to the handler that made it.
#[derive(Clone)]
pub struct UpdateBus {
    inner: Arc<BusInner>,
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UpdateBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateBus")
            .field("subscribers", &lock(&self.inner.subscribers).len())
            .finish()
    }
}

impl UpdateBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                dispatch: Mutex::new(Dispatch::default()),
                gate: Mutex::new(()),
            }),
        }
    }

    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscribers).push(Subscriber {
            id,
            topic,
            callback: Arc::new(callback),
            live: Arc::new(AtomicBool::new(true)),
        });
        debug!("fan-out: subscriber {id} registered for {topic:?}");
        SubscriptionHandle { id, topic }
    }

    /// Like [`subscribe`](Self::subscribe) but tied to the returned guard's
    /// lifetime.
    pub fn subscribe_scoped<F>(&self, topic: Topic, callback: F) -> SubscriptionGuard
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        let handle = self.subscribe(topic, callback);
        SubscriptionGuard {
            bus: self.clone(),
            handle: Some(handle),
        }
    }

    /// Returns `true` if the handle was live. Later calls are no-ops.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = lock(&self.inner.subscribers);
        let Some(index) = subscribers.iter().position(|sub| sub.id == handle.id) else {
            return false;
        };
        let removed = subscribers.remove(index);
        removed.live.store(false, Ordering::SeqCst);
        debug!(
            "fan-out: subscriber {} removed from {:?}",
            handle.id, handle.topic
        );
        true
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        lock(&self.inner.subscribers)
            .iter()
            .filter(|sub| sub.topic == topic)
            .count()
    }

    pub fn total_subscribers(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    pub fn notify(&self, topic: Topic, kind: impl Into<String>) {
        self.publish(Update::new(topic, kind));
    }

    pub fn publish(&self, update: Update) {
        let me = thread::current().id();
        {
            let mut dispatch = lock(&self.inner.dispatch);
            if dispatch.owner == Some(me) {
                let origin = dispatch.current;
                dispatch.queue.push_back(Queued { update, origin });
                return;
            }
        }

        let _gate = lock(&self.inner.gate);
        let _owner = DispatchOwner::claim(&self.inner.dispatch, me, update);

        let mut delivered = 0usize;
        loop {
            let next = lock(&self.inner.dispatch).queue.pop_front();
            let Some(queued) = next else {
                break;
            };
            if delivered == MAX_CASCADE {
                let mut dispatch = lock(&self.inner.dispatch);
                warn!(
                    "fan-out: dropping {} cascaded updates after {MAX_CASCADE} deliveries",
                    dispatch.queue.len() + 1
                );
                dispatch.queue.clear();
                break;
            }
            self.deliver(queued);
            delivered += 1;
        }
    }

    fn deliver(&self, queued: Queued) {
        let targets: Vec<Subscriber> = lock(&self.inner.subscribers)
            .iter()
            .filter(|sub| sub.topic == queued.update.topic)
            .cloned()
            .collect();

        for subscriber in targets {
            if queued.origin == Some(subscriber.id) {
                debug!(
                    "fan-out: not re-entering subscriber {} for its own {:?}",
                    subscriber.id, queued.update.topic
                );
                continue;
            }
            // Unsubscribed by an earlier handler in this same delivery.
            if !subscriber.live.load(Ordering::SeqCst) {
                continue;
            }

            let previous = lock(&self.inner.dispatch).current.replace(subscriber.id);
            (subscriber.callback)(&queued.update);
            lock(&self.inner.dispatch).current = previous;
        }
    }
}

struct DispatchOwner<'a> {
    dispatch: &'a Mutex<Dispatch>,
}

impl<'a> DispatchOwner<'a> {
    fn claim(dispatch: &'a Mutex<Dispatch>, owner: ThreadId, first: Update) -> Self {
        let mut guard = lock(dispatch);
        guard.owner = Some(owner);
        guard.current = None;
        guard.queue.push_back(Queued {
            update: first,
            origin: None,
        });
        Self { dispatch }
    }
}

impl Drop for DispatchOwner<'_> {
    fn drop(&mut self) {
        let mut guard = lock(self.dispatch);
        guard.owner = None;
        guard.current = None;
        guard.queue.clear();
    }
}

/// Owns one subscription and removes it when dropped.
pub struct SubscriptionGuard {
    bus: UpdateBus,
    handle: Option<SubscriptionHandle>,
}

impl SubscriptionGuard {
    pub fn handle(&self) -> Option<SubscriptionHandle> {
        self.handle
    }

    /// Unsubscribe now instead of at drop.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.bus.unsubscribe(handle);
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&Update) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_factory = log.clone();
        let factory = move |name: &str| -> Box<dyn Fn(&Update) + Send + Sync> {
            let log = log_for_factory.clone();
            let name = name.to_string();
            Box::new(move |update: &Update| {
                log.lock().unwrap().push(format!("{name}:{}", update.kind));
            })
        };
        (log, factory)
    }

    #[test]
    fn delivers_in_registration_order_to_matching_topic_only() {
        let bus = UpdateBus::new();
        let (log, make) = recorder();

        let first = make("first");
        let second = make("second");
        let other = make("other");
        bus.subscribe(Topic::AttendanceChanged, move |u| first(u));
        bus.subscribe(Topic::DirectoryChanged, move |u| other(u));
        bus.subscribe(Topic::AttendanceChanged, move |u| second(u));

        bus.notify(Topic::AttendanceChanged, "attendance_marked");

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:attendance_marked", "second:attendance_marked"]
        );
    }

    #[test]
    fn unsubscribe_twice_is_a_no_op() {
        let bus = UpdateBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = bus.subscribe(Topic::RosterChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));
        assert_eq!(bus.subscriber_count(Topic::RosterChanged), 0);

        bus.notify(Topic::RosterChanged, "detection");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn guard_removes_subscription_exactly_once() {
        let bus = UpdateBus::new();
        let mut guard = bus.subscribe_scoped(Topic::DirectoryChanged, |_| {});
        let handle = guard.handle().unwrap();
        assert_eq!(bus.subscriber_count(Topic::DirectoryChanged), 1);

        guard.release();
        assert_eq!(bus.subscriber_count(Topic::DirectoryChanged), 0);
        assert!(guard.handle().is_none());
        drop(guard);

        assert!(!bus.unsubscribe(handle));
    }

    #[test]
    fn remounting_views_does_not_accumulate_subscribers() {
        let bus = UpdateBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = hits.clone();
            let _view = bus.subscribe_scoped(Topic::AttendanceChanged, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        let counter = hits.clone();
        let _mounted = bus.subscribe_scoped(Topic::AttendanceChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.notify(Topic::AttendanceChanged, "attendance_marked");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.total_subscribers(), 1);
    }

    #[test]
    fn reentrant_publish_is_queued_and_skips_its_origin() {
        let bus = UpdateBus::new();
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        let refetching_bus = bus.clone();
        let log_a = log.clone();
        bus.subscribe(Topic::AttendanceChanged, move |update| {
            log_a.lock().unwrap().push(format!("a:{}", update.kind));
            // A view that refetches and announces the same change again.
            refetching_bus.notify(Topic::AttendanceChanged, "refetched");
        });
        let log_b = log.clone();
        bus.subscribe(Topic::AttendanceChanged, move |update| {
            log_b.lock().unwrap().push(format!("b:{}", update.kind));
        });

        bus.notify(Topic::AttendanceChanged, "attendance_marked");

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:attendance_marked", "b:attendance_marked", "b:refetched"]
        );
    }

    #[test]
    fn ping_pong_between_views_terminates() {
        let bus = UpdateBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let bus_a = bus.clone();
        let calls_a = calls.clone();
        bus.subscribe(Topic::AttendanceChanged, move |_| {
            calls_a.fetch_add(1, Ordering::SeqCst);
            bus_a.notify(Topic::RosterChanged, "bounce");
        });
        let bus_b = bus.clone();
        let calls_b = calls.clone();
        bus.subscribe(Topic::RosterChanged, move |_| {
            calls_b.fetch_add(1, Ordering::SeqCst);
            bus_b.notify(Topic::AttendanceChanged, "bounce");
        });

        bus.notify(Topic::AttendanceChanged, "start");

        assert_eq!(calls.load(Ordering::SeqCst), MAX_CASCADE);
        // The bus is usable again afterwards.
        let after = Arc::new(AtomicUsize::new(0));
        let counter = after.clone();
        bus.subscribe(Topic::SmsChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.notify(Topic::SmsChanged, "sms_sent");
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_unsubscribing_a_later_view_stops_its_delivery() {
        let bus = UpdateBus::new();
        let later_hits = Arc::new(AtomicUsize::new(0));

        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let bus_for_first = bus.clone();
        let slot_for_first = slot.clone();
        bus.subscribe(Topic::SessionChanged, move |_| {
            if let Some(handle) = slot_for_first.lock().unwrap().take() {
                bus_for_first.unsubscribe(handle);
            }
        });
        let counter = later_hits.clone();
        let later = bus.subscribe(Topic::SessionChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        *slot.lock().unwrap() = Some(later);

        bus.notify(Topic::SessionChanged, "session_started");
        assert_eq!(later_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn publishes_from_other_threads_are_serialised() {
        let bus = UpdateBus::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        let (a, o, t) = (active.clone(), overlaps.clone(), total.clone());
        bus.subscribe(Topic::AttendanceChanged, move |_| {
            if a.fetch_add(1, Ordering::SeqCst) > 0 {
                o.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
            t.fetch_add(1, Ordering::SeqCst);
            a.fetch_sub(1, Ordering::SeqCst);
        });

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        bus.notify(Topic::AttendanceChanged, "attendance_marked");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(total.load(Ordering::SeqCst), 20);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
