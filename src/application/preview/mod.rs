//! The debounce/broadcast coordinator: coalesces bursts of update requests,
//! renders once per quiet window, and fans the result out to subscribers.

mod subscribers;

pub use subscribers::{PushMessage, SubscriberSet};

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::render::{DocumentPipeline, RenderOptions};
use crate::application::stats::{METRIC_UPDATES_PROCESSED, PreviewStats};

/// Default quiet window a pending update must survive before it renders.
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(300);

/// The most recent unprocessed update request. At most one is pending per
/// session; a newer submission replaces it unconditionally.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub text: String,
    pub options: RenderOptions,
    pub scroll_percent: Option<f64>,
}

/// Single-slot mailbox shared between the submission path and the
/// timer-expiry path.
struct Mailbox {
    pending: Option<PendingUpdate>,
    /// Monotonic stamp of the latest submission. A timer whose stamp no
    /// longer matches has been superseded and must do nothing.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// One live preview document session: the pipeline, the debounce mailbox,
/// the subscriber registry, and the last rendered HTML for late joiners.
pub struct PreviewSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    pipeline: tokio::sync::Mutex<DocumentPipeline>,
    mailbox: Mutex<Mailbox>,
    subscribers: SubscriberSet,
    last_html: RwLock<Option<String>>,
    stats: Arc<PreviewStats>,
    quiet_window: Duration,
}

impl PreviewSession {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        quiet_window: Duration,
        stats: Arc<PreviewStats>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                pipeline: tokio::sync::Mutex::new(DocumentPipeline::new(
                    base_dir,
                    Arc::clone(&stats),
                )),
                mailbox: Mutex::new(Mailbox {
                    pending: None,
                    generation: 0,
                    timer: None,
                }),
                subscribers: SubscriberSet::new(),
                last_html: RwLock::new(None),
                stats,
                quiet_window,
            }),
        }
    }

    pub fn stats(&self) -> Arc<PreviewStats> {
        Arc::clone(&self.inner.stats)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn last_html(&self) -> Option<String> {
        read_lock(&self.inner.last_html).clone()
    }

    /// Register a push-channel connection. Late joiners immediately receive
    /// the last rendered HTML, if any, so they see current state without
    /// waiting for the next edit.
    pub fn subscribe(&self) -> (Uuid, UnboundedReceiver<PushMessage>) {
        let (id, receiver) = self.inner.subscribers.register();
        if let Some(html) = self.last_html() {
            self.inner.subscribers.send_to(
                id,
                PushMessage {
                    html,
                    scroll_percent: None,
                },
            );
        }
        (id, receiver)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.inner.subscribers.remove(id);
    }

    /// Store `update` as the sole pending update (last write wins), cancel
    /// the running quiet-window timer, and start a new one. Must run inside
    /// a tokio runtime.
    pub fn queue_update(&self, update: PendingUpdate) {
        let mut mailbox = lock_mailbox(&self.inner.mailbox);
        mailbox.pending = Some(update);
        mailbox.generation += 1;
        let generation = mailbox.generation;

        if let Some(previous) = mailbox.timer.take() {
            previous.abort();
        }

        let inner = Arc::clone(&self.inner);
        mailbox.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.quiet_window).await;
            on_quiet_window_elapsed(&inner, generation).await;
        }));
    }
}

/// Timer-expiry path. A superseded or already-consumed update is a safe
/// no-op; only the generation that survived the full quiet window renders.
async fn on_quiet_window_elapsed(inner: &Arc<SessionInner>, generation: u64) {
    let taken = {
        let mut mailbox = lock_mailbox(&inner.mailbox);
        if mailbox.generation != generation {
            return;
        }
        mailbox.pending.take()
    };

    let Some(update) = taken else {
        return;
    };

    render_and_broadcast(inner, update).await;
}

async fn render_and_broadcast(inner: &Arc<SessionInner>, update: PendingUpdate) {
    // The pipeline mutex is what forbids concurrent renders of the session.
    let rendered = {
        let mut pipeline = inner.pipeline.lock().await;
        pipeline.render(&update.text, update.options)
    };

    inner.stats.record_update(rendered.duration);
    counter!(METRIC_UPDATES_PROCESSED).increment(1);

    *write_lock(&inner.last_html) = Some(rendered.html.clone());

    let delivered = inner.subscribers.broadcast(&PushMessage {
        html: rendered.html,
        scroll_percent: update.scroll_percent,
    });

    debug!(
        target = "application::preview",
        bytes = rendered.bytes,
        duration_ms = rendered.duration.as_secs_f64() * 1000.0,
        cache_hit = rendered.cache_hit,
        subscribers = delivered,
        "Broadcast rendered document"
    );
}

fn lock_mailbox(lock: &Mutex<Mailbox>) -> MutexGuard<'_, Mailbox> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                target = "application::preview",
                lock_kind = "mutex.mailbox",
                result = "poisoned_recovered",
                "Recovered from poisoned coordinator lock"
            );
            poisoned.into_inner()
        }
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                target = "application::preview",
                lock_kind = "rwlock.read",
                result = "poisoned_recovered",
                "Recovered from poisoned coordinator lock"
            );
            poisoned.into_inner()
        }
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                target = "application::preview",
                lock_kind = "rwlock.write",
                result = "poisoned_recovered",
                "Recovered from poisoned coordinator lock"
            );
            poisoned.into_inner()
        }
    }
}
