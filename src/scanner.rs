//! Batch scanning of item identities against the remote item database.
//!
//! A scan runs on one worker thread that owns the [`CacheStore`] for its
//! duration. The controlling thread only flips the pause/cancel flags in
//! [`ScanControl`] and drains [`ScanEvent`]s from a bounded channel, so the
//! worker never waits on its observer.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::api::RecordFetcher;
use crate::cache::{CacheStore, DedupReport};
use crate::config::ResolvedConfig;
use crate::domain::{Identity, ScanState};
use crate::error::ScanError;
use crate::export;
use crate::retry::{RetryPolicy, fetch_with_retry};

pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Flags shared between the worker and the controlling thread.
#[derive(Debug, Default)]
pub struct ScanControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
}

impl ScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// 1-based position of the identity about to be processed.
    Progress { processed: usize, total: usize },
    Status(String),
    StateChanged(ScanState),
}

/// Best-effort event sender. Full or closed queues drop events silently.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<SyncSender<ScanEvent>>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, Receiver<ScanEvent>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(event);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub retry: RetryPolicy,
    pub delay_range: (Duration, Duration),
    /// Re-fetch even when a fresh record is cached.
    pub force: bool,
    pub deduplicate: bool,
    pub readable_path: Option<Utf8PathBuf>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            delay_range: (Duration::from_millis(300), Duration::from_millis(800)),
            force: false,
            deduplicate: true,
            readable_path: None,
        }
    }
}

impl ScanSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            retry: RetryPolicy::new(config.max_attempts, config.retry_delay),
            delay_range: config.delay_range,
            force: false,
            deduplicate: true,
            readable_path: config.export_readable.then(|| config.readable_file()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounters {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Served from a fresh cache entry; also counted in `succeeded`.
    pub reused: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub state: ScanState,
    pub total: usize,
    pub counters: ScanCounters,
    pub dedup: Option<DedupReport>,
}

/// State of one batch run. Lives on the worker thread.
#[derive(Debug)]
pub struct ScanJob {
    identities: Vec<Identity>,
    counters: ScanCounters,
    control: Arc<ScanControl>,
}

impl ScanJob {
    pub fn new(identities: Vec<Identity>, control: Arc<ScanControl>) -> Self {
        Self {
            identities,
            counters: ScanCounters::default(),
            control,
        }
    }

    pub fn total(&self) -> usize {
        self.identities.len()
    }

    pub fn counters(&self) -> ScanCounters {
        self.counters
    }

    pub fn control(&self) -> &Arc<ScanControl> {
        &self.control
    }
}

pub struct BatchDriver<'a, F: RecordFetcher + ?Sized> {
    fetcher: &'a F,
    settings: &'a ScanSettings,
    events: EventSink,
}

impl<'a, F: RecordFetcher + ?Sized> BatchDriver<'a, F> {
    pub fn new(fetcher: &'a F, settings: &'a ScanSettings) -> Self {
        Self {
            fetcher,
            settings,
            events: EventSink::disconnected(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Walks the job's identities in order. Returns `Cancelled` if the
    /// cancel flag stopped the loop, `Completed` otherwise; results gathered
    /// so far stay in `cache` either way.
    pub fn run(&self, job: &mut ScanJob, cache: &mut CacheStore) -> ScanState {
        let total = job.total();
        let control = Arc::clone(&job.control);
        info!(total, "starting item scan");

        for (index, id) in job.identities.iter().enumerate() {
            if control.is_cancelled() {
                break;
            }
            self.wait_while_paused(&control);
            if control.is_cancelled() {
                break;
            }

            let position = index + 1;
            self.events.emit(ScanEvent::Progress {
                processed: position,
                total,
            });
            self.events
                .emit(ScanEvent::Status(format!("Scanning {position}/{total}: {id}")));
            info!(position, total, id = %id, "scanning item");

            let counters = &mut job.counters;
            counters.processed += 1;
            let fresh = (!self.settings.force)
                .then(|| cache.get_fresh(id, Utc::now()))
                .flatten()
                .is_some();
            if fresh {
                debug!(id = %id, "using cached record");
                counters.succeeded += 1;
                counters.reused += 1;
            } else {
                let fetched = panic::catch_unwind(AssertUnwindSafe(|| {
                    fetch_with_retry(self.fetcher, id, &self.settings.retry)
                }))
                .unwrap_or_else(|payload| {
                    error!(id = %id, reason = panic_reason(payload.as_ref()), "item fetch panicked");
                    None
                });
                match fetched {
                    Some(record) => {
                        cache.put(record);
                        if let Err(err) = cache.flush() {
                            error!(%err, path = %cache.path(), "failed to save item cache");
                        }
                        counters.succeeded += 1;
                    }
                    None => {
                        warn!(id = %id, "no data for item");
                        counters.failed += 1;
                    }
                }
            }

            if position < total && !control.is_cancelled() {
                let delay = random_delay(self.settings.delay_range);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }

        let counters = job.counters;
        if control.is_cancelled() {
            info!(
                succeeded = counters.succeeded,
                failed = counters.failed,
                total,
                "scan cancelled"
            );
            ScanState::Cancelled
        } else {
            info!(
                succeeded = counters.succeeded,
                failed = counters.failed,
                total,
                "scan finished"
            );
            ScanState::Completed
        }
    }

    fn wait_while_paused(&self, control: &ScanControl) {
        if !control.is_paused() || control.is_cancelled() {
            return;
        }
        info!("scan paused");
        self.events.emit(ScanEvent::StateChanged(ScanState::Paused));
        while control.is_paused() && !control.is_cancelled() {
            thread::sleep(PAUSE_POLL_INTERVAL);
        }
        if !control.is_cancelled() {
            info!("scan resumed");
            self.events.emit(ScanEvent::StateChanged(ScanState::Running));
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn random_delay((min, max): (Duration, Duration)) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Full scan on the current thread: batch, dedup (skipped when cancelled),
/// final save and readable export.
pub fn execute_scan<F: RecordFetcher + ?Sized>(
    fetcher: &F,
    cache: &mut CacheStore,
    job: &mut ScanJob,
    settings: &ScanSettings,
    events: EventSink,
) -> ScanReport {
    events.emit(ScanEvent::StateChanged(ScanState::Running));
    let driver = BatchDriver::new(fetcher, settings).with_events(events.clone());
    let mut state = driver.run(job, cache);

    let mut dedup = None;
    if state == ScanState::Cancelled && cache.pending_duplicates() > 0 {
        warn!(
            count = cache.pending_duplicates(),
            "scan cancelled, unresolved duplicate entries are not saved"
        );
    }
    if state == ScanState::Completed && settings.deduplicate {
        match cache.deduplicate() {
            Ok(report) => dedup = Some(report),
            Err(err) => {
                error!(%err, "deduplication failed");
                state = ScanState::Failed(err.to_string());
            }
        }
    }

    if let Err(err) = cache.flush() {
        error!(%err, path = %cache.path(), "failed to save item cache");
    }
    if let Some(path) = &settings.readable_path {
        let index = export::export(cache.cache());
        if let Err(err) = export::write_readable(path, &index) {
            error!(%err, path = %path, "failed to export readable cache");
        }
    }

    events.emit(ScanEvent::StateChanged(state.clone()));
    ScanReport {
        state,
        total: job.total(),
        counters: job.counters(),
        dedup,
    }
}

pub type ProgressCallback = Box<dyn FnMut(usize, usize) + Send>;
pub type StatusCallback = Box<dyn FnMut(&str) + Send>;

struct ActiveScan {
    control: Arc<ScanControl>,
    events: Receiver<ScanEvent>,
    worker: JoinHandle<(CacheStore, ScanReport)>,
    total: usize,
}

/// Owns the cache and runs at most one scan against it at a time.
pub struct Scanner<F: RecordFetcher + 'static> {
    fetcher: Arc<F>,
    settings: ScanSettings,
    cache_path: Utf8PathBuf,
    store: Option<CacheStore>,
    active: Option<ActiveScan>,
    state: ScanState,
    on_progress: Option<ProgressCallback>,
    on_status: Option<StatusCallback>,
}

impl<F: RecordFetcher + 'static> Scanner<F> {
    pub fn new(fetcher: F, store: CacheStore, settings: ScanSettings) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            settings,
            cache_path: store.path().to_path_buf(),
            store: Some(store),
            active: None,
            state: ScanState::Idle,
            on_progress: None,
            on_status: None,
        }
    }

    pub fn settings_mut(&mut self) -> &mut ScanSettings {
        &mut self.settings
    }

    /// `None` while a scan holds the store.
    pub fn store(&self) -> Option<&CacheStore> {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> Option<&mut CacheStore> {
        self.store.as_mut()
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn set_progress_callback<C>(&mut self, callback: C)
    where
        C: FnMut(usize, usize) + Send + 'static,
    {
        self.on_progress = Some(Box::new(callback));
    }

    pub fn set_status_callback<C>(&mut self, callback: C)
    where
        C: FnMut(&str) + Send + 'static,
    {
        self.on_status = Some(Box::new(callback));
    }

    pub fn start(&mut self, identities: Vec<Identity>) -> Result<(), ScanError> {
        if self.active.is_some() {
            return Err(ScanError::ScanActive);
        }
        let mut store = self.store.take().ok_or(ScanError::ScanActive)?;
        let control = Arc::new(ScanControl::new());
        let (sink, events) = EventSink::channel(EVENT_QUEUE_CAPACITY);
        let total = identities.len();

        let fetcher = Arc::clone(&self.fetcher);
        let settings = self.settings.clone();
        let mut job = ScanJob::new(identities, Arc::clone(&control));
        let worker = thread::spawn(move || {
            let report = execute_scan(fetcher.as_ref(), &mut store, &mut job, &settings, sink);
            (store, report)
        });

        self.active = Some(ActiveScan {
            control,
            events,
            worker,
            total,
        });
        self.state = ScanState::Running;
        Ok(())
    }

    pub fn pause(&mut self) {
        if let Some(active) = &self.active {
            if !active.control.is_cancelled() {
                active.control.pause();
                self.state = ScanState::Paused;
            }
        }
    }

    pub fn resume(&mut self) {
        if let Some(active) = &self.active {
            active.control.resume();
            if self.state == ScanState::Paused {
                self.state = ScanState::Running;
            }
        }
    }

    pub fn cancel(&mut self) {
        if let Some(active) = &self.active {
            active.control.cancel();
        }
    }

    /// Dispatches queued worker events to the registered callbacks on the
    /// calling thread. Returns the number of events handled.
    pub fn pump_events(&mut self) -> usize {
        let Some(active) = &self.active else {
            return 0;
        };
        let mut handled = 0;
        loop {
            match active.events.try_recv() {
                Ok(event) => {
                    handled += 1;
                    match event {
                        ScanEvent::Progress { processed, total } => {
                            if let Some(callback) = self.on_progress.as_mut() {
                                callback(processed, total);
                            }
                        }
                        ScanEvent::Status(message) => {
                            if let Some(callback) = self.on_status.as_mut() {
                                callback(&message);
                            }
                        }
                        ScanEvent::StateChanged(state) => {
                            // The controller's own pause/resume is newer than
                            // anything still queued.
                            if state.is_terminal() || !active.control.is_paused() {
                                self.state = state;
                            }
                        }
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        handled
    }

    pub fn is_finished(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.worker.is_finished())
    }

    /// Blocks until the running scan ends and takes the cache back.
    pub fn wait(&mut self) -> Result<ScanReport, ScanError> {
        if self.active.is_none() {
            return Err(ScanError::NoActiveScan);
        }
        self.pump_events();
        let Some(active) = self.active.take() else {
            return Err(ScanError::NoActiveScan);
        };
        let total = active.total;
        let joined = active.worker.join();
        while let Ok(event) = active.events.try_recv() {
            self.dispatch_late(event);
        }

        let report = match joined {
            Ok((store, report)) => {
                self.store = Some(store);
                report
            }
            Err(_) => {
                error!("scan worker panicked, reloading cache from disk");
                self.store = Some(CacheStore::open(self.cache_path.clone()));
                ScanReport {
                    state: ScanState::Failed("scan worker panicked".to_string()),
                    total,
                    counters: ScanCounters::default(),
                    dedup: None,
                }
            }
        };
        self.state = report.state.clone();
        Ok(report)
    }

    fn dispatch_late(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Progress { processed, total } => {
                if let Some(callback) = self.on_progress.as_mut() {
                    callback(processed, total);
                }
            }
            ScanEvent::Status(message) => {
                if let Some(callback) = self.on_status.as_mut() {
                    callback(&message);
                }
            }
            ScanEvent::StateChanged(_) => {}
        }
    }
}

impl<F: RecordFetcher + 'static> Drop for Scanner<F> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.control.cancel();
            let _ = active.worker.join();
        }
    }
}
