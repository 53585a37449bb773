use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};

use crate::fanout::{SubscriptionGuard, Topic, UpdateBus};

type Fetch<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// A mounted view that treats bus updates as dirty flags.
///
/// On mount it fetches once, then re-fetches whenever one of its topics
/// fires. Updates arriving during a fetch collapse into a single follow-up
/// fetch. Dropping the view unsubscribes every topic and stops the worker.
pub struct RefetchView<T> {
    data: Arc<RwLock<Option<T>>>,
    last_error: Arc<RwLock<Option<String>>>,
    generation: watch::Receiver<u64>,
    subscriptions: Vec<SubscriptionGuard>,
    worker: Option<JoinHandle<()>>,
}

impl<T> RefetchView<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn mount<F>(bus: &UpdateBus, topics: &[Topic], fetch: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
    {
        let fetch: Fetch<T> = Arc::new(fetch);
        let dirty = Arc::new(Notify::new());

        let subscriptions = topics
            .iter()
            .map(|&topic| {
                let dirty = dirty.clone();
                bus.subscribe_scoped(topic, move |_| dirty.notify_one())
            })
            .collect();

        let data = Arc::new(RwLock::new(None));
        let last_error = Arc::new(RwLock::new(None));
        let (generation_tx, generation) = watch::channel(0u64);

        let worker = tokio::spawn(refetch_loop(
            fetch,
            dirty,
            data.clone(),
            last_error.clone(),
            generation_tx,
        ));

        Self {
            data,
            last_error,
            generation,
            subscriptions,
            worker: Some(worker),
        }
    }

    /// Latest successfully fetched value, if any.
    pub fn current(&self) -> Option<T> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of completed fetch attempts.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Waits until at least `generation` fetches have completed.
    pub async fn wait_for_generation(&self, generation: u64) {
        let mut rx = self.generation.clone();
        let _ = rx.wait_for(|current| *current >= generation).await;
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl<T> Drop for RefetchView<T> {
    fn drop(&mut self) {
        self.subscriptions.clear();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn refetch_loop<T>(
    fetch: Fetch<T>,
    dirty: Arc<Notify>,
    data: Arc<RwLock<Option<T>>>,
    last_error: Arc<RwLock<Option<String>>>,
    generation: watch::Sender<u64>,
) {
    loop {
        match fetch().await {
            Ok(value) => {
                *data.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
                *last_error.write().unwrap_or_else(PoisonError::into_inner) = None;
            }
            Err(err) => {
                log::warn!("view refresh failed: {err:#}");
                *last_error.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(format!("{err:#}"));
            }
        }
        generation.send_modify(|count| *count += 1);
        dirty.notified().await;
    }
}
