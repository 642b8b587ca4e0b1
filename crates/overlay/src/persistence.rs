//! Persistence bridge between committed strokes and the document model
//!
//! Flushes append one stamp annotation per stroke; saves serialize the whole
//! document and write it out. In background mode both run on a single worker
//! so a save always observes every flush submitted before it. Results reach
//! the owner thread only through [`PersistenceBridge::poll`].
//!
//! Dropping the bridge waits for queued background work, so ink committed
//! just before shutdown still reaches the document.
//!
//! Failures are never retried on their own. A failed stroke stays committed
//! (and composited) in memory until the shell calls
//! [`PersistenceBridge::retry_failed`].

use pdf_engine::{AnnotationContent, DocumentModel};
use pdf_markup_core::{MarkupError, MarkupResult, PageId, Stroke, StrokeId};
use pdf_markup_scheduler::{
    CancellationToken, Completion, TaskId, TaskOutcome, WorkerPool, WorkerPoolConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

/// Where flushes and saves execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    /// On the calling thread, before the call returns
    Inline,
    /// On a worker thread
    #[default]
    Background,
}

/// Outcome of a flush or save, observed on the owner thread
#[derive(Debug, Clone, PartialEq)]
pub enum PersistenceEvent {
    Flushed { page: PageId, stroke: StrokeId },
    FlushFailed { page: PageId, stroke: StrokeId, error: MarkupError },
    Saved { destination: PathBuf },
    SaveFailed { destination: PathBuf, error: MarkupError },
}

impl PersistenceEvent {
    pub fn is_failure(&self) -> bool {
        matches!(self, PersistenceEvent::FlushFailed { .. } | PersistenceEvent::SaveFailed { .. })
    }
}

struct FlushEntry {
    page: PageId,
    stroke: Arc<Stroke>,
}

/// What a background task was doing, so a lost result can still be reported
enum TaskKind {
    Flush { page: PageId, stroke: StrokeId },
    Save { destination: PathBuf },
}

impl TaskKind {
    fn failed(self, message: &str) -> PersistenceEvent {
        match self {
            TaskKind::Flush { page, stroke } => PersistenceEvent::FlushFailed {
                page,
                stroke,
                error: MarkupError::persistence(Some(page), message),
            },
            TaskKind::Save { destination } => PersistenceEvent::SaveFailed {
                destination,
                error: MarkupError::persistence(None, message),
            },
        }
    }
}

/// Serializes committed strokes into the document model
pub struct PersistenceBridge<D: DocumentModel> {
    document: Arc<Mutex<D>>,
    /// Read once up front so a save never waits on the document lock
    destination: Option<PathBuf>,
    mode: PersistenceMode,
    stamp_scale: f64,
    pool: Option<WorkerPool<PersistenceEvent>>,
    tasks: HashMap<TaskId, TaskKind>,
    pending: HashMap<StrokeId, FlushEntry>,
    failed: HashMap<StrokeId, (FlushEntry, MarkupError)>,
    saves_in_flight: usize,
    ready: VecDeque<PersistenceEvent>,
}

impl<D: DocumentModel> PersistenceBridge<D> {
    pub fn new(document: D, mode: PersistenceMode, stamp_scale: f64) -> MarkupResult<Self> {
        let pool = match mode {
            PersistenceMode::Inline => None,
            PersistenceMode::Background => {
                let config = WorkerPoolConfig::new(1).with_thread_name("pdf-markup-persist");
                Some(WorkerPool::new(config).map_err(|e| {
                    MarkupError::persistence(None, format!("failed to start persistence worker: {e}"))
                })?)
            }
        };

        Ok(Self {
            destination: document.destination(),
            document: Arc::new(Mutex::new(document)),
            mode,
            stamp_scale,
            pool,
            tasks: HashMap::new(),
            pending: HashMap::new(),
            failed: HashMap::new(),
            saves_in_flight: 0,
            ready: VecDeque::new(),
        })
    }

    pub fn mode(&self) -> PersistenceMode {
        self.mode
    }

    /// Shared handle to the document model
    pub fn document(&self) -> Arc<Mutex<D>> {
        Arc::clone(&self.document)
    }

    /// Run `f` against the document on the calling thread
    pub fn with_document<R>(&mut self, f: impl FnOnce(&mut D) -> R) -> MarkupResult<R> {
        let mut guard = lock(&self.document, None)?;
        let result = f(&mut guard);
        self.destination = guard.destination();
        Ok(result)
    }

    /// Strokes already persisted on `page`
    pub fn page_strokes(&self, page: PageId) -> MarkupResult<Vec<Stroke>> {
        lock(&self.document, Some(page))?.page_strokes(page).map_err(|e| e.into_markup(Some(page)))
    }

    /// Like [`Self::page_strokes`], but `None` instead of waiting while a
    /// background flush or save holds the document
    pub fn try_page_strokes(&self, page: PageId) -> MarkupResult<Option<Vec<Stroke>>> {
        let guard = match self.document.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Ok(None),
            Err(TryLockError::Poisoned(_)) => {
                return Err(MarkupError::persistence(Some(page), "document lock poisoned"))
            }
        };
        guard.page_strokes(page).map(Some).map_err(|e| e.into_markup(Some(page)))
    }

    /// Append a finalized stroke to its page.
    ///
    /// Inline mode reports a failure directly; background mode reports it
    /// through [`Self::poll`]. Either way a [`PersistenceEvent`] is queued.
    pub fn flush(&mut self, page: PageId, stroke: Arc<Stroke>) -> MarkupResult<()> {
        if !stroke.is_finalized() {
            return Err(MarkupError::invalid_state(format!(
                "stroke {} must be finalized before it is flushed",
                stroke.id()
            )));
        }
        if self.pending.contains_key(&stroke.id()) {
            return Err(MarkupError::invalid_state(format!(
                "stroke {} is already being flushed",
                stroke.id()
            )));
        }

        let id = stroke.id();
        self.failed.remove(&id);
        let entry = FlushEntry { page, stroke: Arc::clone(&stroke) };

        match self.pool.as_mut() {
            Some(pool) => {
                let document = Arc::clone(&self.document);
                let scale = self.stamp_scale;
                let handle = pool.submit(Box::new(move |_: &CancellationToken| {
                    match flush_stroke(&document, page, &stroke, scale) {
                        Ok(()) => PersistenceEvent::Flushed { page, stroke: id },
                        Err(error) => PersistenceEvent::FlushFailed { page, stroke: id, error },
                    }
                }));
                self.tasks.insert(handle.id, TaskKind::Flush { page, stroke: id });
                self.pending.insert(id, entry);
                log::trace!("{page}: queued flush of stroke {id}");
                Ok(())
            }
            None => {
                let result = flush_stroke(&self.document, page, &stroke, self.stamp_scale);
                let event = match &result {
                    Ok(()) => PersistenceEvent::Flushed { page, stroke: id },
                    Err(error) => PersistenceEvent::FlushFailed { page, stroke: id, error: error.clone() },
                };
                self.pending.insert(id, entry);
                self.record(event);
                result
            }
        }
    }

    /// Serialize the document and write it to `destination`, or to the
    /// document's own destination when none is given
    pub fn save(&mut self, destination: Option<&Path>) -> MarkupResult<()> {
        let destination = match destination {
            Some(path) => path.to_path_buf(),
            None => self
                .destination
                .clone()
                .ok_or_else(|| MarkupError::persistence(None, "document has no save destination"))?,
        };

        match self.pool.as_mut() {
            Some(pool) => {
                let document = Arc::clone(&self.document);
                let target = destination.clone();
                let handle = pool.submit(Box::new(move |_: &CancellationToken| {
                    match save_document(&document, &target) {
                        Ok(()) => PersistenceEvent::Saved { destination: target },
                        Err(error) => PersistenceEvent::SaveFailed { destination: target, error },
                    }
                }));
                self.tasks.insert(handle.id, TaskKind::Save { destination });
                self.saves_in_flight += 1;
                Ok(())
            }
            None => {
                let result = save_document(&self.document, &destination);
                self.saves_in_flight += 1;
                self.record(match &result {
                    Ok(()) => PersistenceEvent::Saved { destination },
                    Err(error) => PersistenceEvent::SaveFailed { destination, error: error.clone() },
                });
                result
            }
        }
    }

    /// Drain every finished flush and save without blocking
    pub fn poll(&mut self) -> Vec<PersistenceEvent> {
        if let Some(pool) = self.pool.as_mut() {
            let completions = pool.try_completions();
            self.accept(completions);
        }
        self.ready.drain(..).collect()
    }

    /// Block until nothing is in flight or `timeout` passes, then drain
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<PersistenceEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let Some(pool) = self.pool.as_mut() else { break };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if pool.in_flight() == 0 || remaining.is_zero() {
                break;
            }
            let Some(completion) = pool.wait_completion(remaining) else { break };
            self.accept(vec![completion]);
        }
        self.poll()
    }

    /// Resubmit every failed flush. Returns how many were resubmitted.
    pub fn retry_failed(&mut self) -> usize {
        let failed: Vec<_> = self.failed.drain().map(|(_, (entry, _))| entry).collect();
        let count = failed.len();
        for entry in failed {
            log::debug!("{}: retrying flush of stroke {}", entry.page, entry.stroke.id());
            // Inline failures are queued as events; nothing more to do here.
            let _ = self.flush(entry.page, entry.stroke);
        }
        count
    }

    pub fn is_pending(&self, stroke: StrokeId) -> bool {
        self.pending.contains_key(&stroke)
    }

    /// Last error for a failed stroke
    pub fn failure(&self, stroke: StrokeId) -> Option<&MarkupError> {
        self.failed.get(&stroke).map(|(_, error)| error)
    }

    pub fn pending_on(&self, page: PageId) -> usize {
        self.pending.values().filter(|entry| entry.page == page).count()
    }

    pub fn failed_on(&self, page: PageId) -> usize {
        self.failed.values().filter(|(entry, _)| entry.page == page).count()
    }

    /// Whether any flush or save has not reported back yet
    pub fn is_busy(&self) -> bool {
        !self.pending.is_empty() || self.saves_in_flight > 0
    }

    fn accept(&mut self, completions: Vec<Completion<PersistenceEvent>>) {
        for Completion { id, outcome } in completions {
            let kind = self.tasks.remove(&id);
            match (outcome, kind) {
                (TaskOutcome::Finished(event), _) => self.record(event),
                (TaskOutcome::Cancelled, Some(kind)) => {
                    self.record(kind.failed("persistence task was cancelled"))
                }
                (TaskOutcome::Panicked, Some(kind)) => {
                    self.record(kind.failed("persistence task panicked"))
                }
                (_, None) => log::warn!("persistence task {id} finished without a record"),
            }
        }
    }

    fn record(&mut self, event: PersistenceEvent) {
        match &event {
            PersistenceEvent::Flushed { page, stroke } => {
                self.pending.remove(stroke);
                log::debug!("{page}: flushed stroke {stroke}");
            }
            PersistenceEvent::FlushFailed { page, stroke, error } => {
                log::error!("{page}: flush of stroke {stroke} failed: {error}");
                if let Some(entry) = self.pending.remove(stroke) {
                    self.failed.insert(*stroke, (entry, error.clone()));
                }
            }
            PersistenceEvent::Saved { destination } => {
                self.saves_in_flight = self.saves_in_flight.saturating_sub(1);
                log::debug!("saved document to {}", destination.display());
            }
            PersistenceEvent::SaveFailed { destination, error } => {
                self.saves_in_flight = self.saves_in_flight.saturating_sub(1);
                log::error!("saving document to {} failed: {error}", destination.display());
            }
        }
        self.ready.push_back(event);
    }
}

impl<D: DocumentModel> Drop for PersistenceBridge<D> {
    fn drop(&mut self) {
        let Some(mut pool) = self.pool.take() else { return };
        if pool.in_flight() > 0 {
            log::debug!("waiting for {} persistence tasks before shutdown", pool.in_flight());
        }
        // Results still get logged through `record`.
        while let Some(completion) = pool.wait_completion(DRAIN_TIMEOUT) {
            self.accept(vec![completion]);
        }
        pool.shutdown();
    }
}

/// Longest wait for any single queued task while dropping the bridge
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn lock<D>(document: &Mutex<D>, page: Option<PageId>) -> MarkupResult<MutexGuard<'_, D>> {
    document.lock().map_err(|_| MarkupError::persistence(page, "document lock poisoned"))
}

fn flush_stroke<D: DocumentModel>(
    document: &Mutex<D>,
    page: PageId,
    stroke: &Stroke,
    stamp_scale: f64,
) -> MarkupResult<()> {
    // Rasterize before taking the lock.
    let content =
        AnnotationContent::from_stroke(stroke, stamp_scale).map_err(|e| e.into_markup(Some(page)))?;
    lock(document, Some(page))?
        .append_annotation(page, &content)
        .map_err(|e| e.into_markup(Some(page)))
}

fn save_document<D: DocumentModel>(document: &Mutex<D>, destination: &Path) -> MarkupResult<()> {
    let mut guard = lock(document, None)?;
    let bytes = guard.serialize().map_err(|e| e.into_markup(None))?;
    guard.write(&bytes, destination).map_err(|e| e.into_markup(None))
}
