use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// The history database. Statements run on one dedicated thread; callers
/// await the result through a oneshot reply. Clones share the thread, which
/// exits when the last clone is dropped.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

struct Worker {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn submit(&self, job: Job) -> Result<()> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = jobs
            .as_ref()
            .ok_or_else(|| anyhow!("capture history is closed"))?;
        sender
            .send(job)
            .map_err(|_| anyhow!("capture history worker has exited"))
    }

    /// Drops the job queue so the thread drains what is queued and exits.
    fn stop(&self) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                log::error!("capture history worker panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_connection(path: &Path) -> Result<(Connection, i32)> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open capture history at {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL mode")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    let previous = run_migrations(&mut conn).context("failed to migrate capture history")?;
    Ok((conn, previous))
}

impl Database {
    /// Opens (creating if needed) and migrates the database before returning.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<i32>>();
        let thread_path = path.clone();

        let thread = thread::Builder::new()
            .name("attendance-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&thread_path) {
                    Ok((conn, previous)) => {
                        let _ = ready_tx.send(Ok(previous));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                for job in jobs_rx {
                    job(&mut conn);
                }
                log::debug!("capture history worker stopped");
            })
            .context("failed to spawn capture history worker")?;

        let previous = ready_rx
            .recv()
            .context("capture history worker exited during startup")??;
        log::info!(
            "capture history at {} (schema was v{previous})",
            path.display()
        );

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: Mutex::new(Some(jobs_tx)),
                thread: Mutex::new(Some(thread)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Runs `task` on the worker thread.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.worker.submit(Box::new(move |conn| {
            // The caller may have given up waiting; the work still happened.
            let _ = reply_tx.send(task(conn));
        }))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("capture history worker dropped the request"))?
    }

    /// Finishes queued work and stops the worker for every clone. Later calls
    /// to [`execute`](Self::execute) fail.
    pub fn close(&self) {
        self.worker.stop();
    }
}
