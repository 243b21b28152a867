// vim: tw=80

//! A generic producer of periodic health snapshots.
//!
//! A [`DebugInfoProducer<S>`] owns two bounded ring histories ("history"
//! and "history-error") of `S::Info` and a monotonic summary health. The
//! sampler thread is spawned once at construction, parked on a `run` flag;
//! [`DebugInfoProducer::register`] only releases it when the caller asks
//! for async logging, and dropping the producer parks it permanently and
//! joins it.
//!
//! Sampling and grading are split: [`DebugInfoSource::make_debug_info`]
//! produces a snapshot, [`DebugInfoSource::is_okay`] grades it, and the
//! grade folds into a monotonic summary that only ever gets worse.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::DEBUG_INFO_DEFAULT_TIMER_USEC;

/// Sentinel `user_specific` value for entries appended by the sampler
/// thread itself, as opposed to an explicit caller-driven
/// [`DebugInfoProducer::add_debug_info`].
pub const TIMER_TRIGGERED: u64 = u64::MAX;

/// The health grade of one snapshot. Ordered so that aggregating a
/// run of snapshots is a running `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugInfoOkay {
    Pass,
    Warn,
    Critical,
}

impl Default for DebugInfoOkay {
    fn default() -> Self {
        DebugInfoOkay::Pass
    }
}

/// Pins the calling thread to whatever CPU set the embedding application
/// considers "general usage". No real affinity manager lives in this
/// crate, so the default does nothing; a caller that cares injects its
/// own implementation, the same way [`crate::numa::HugepageAllocator`] is
/// injected rather than hardcoded.
pub trait CpuPinner: Send + Sync {
    fn pin_current_thread(&self);
}

#[derive(Debug, Default)]
pub struct NoCpuPinning;

impl CpuPinner for NoCpuPinning {
    fn pin_current_thread(&self) {}
}

/// Produces and grades periodic snapshots of type `Self::Info`. Methods
/// take `&self` because a source is sampled from the dedicated sampler
/// thread while the embedding object is presumably also in use elsewhere.
pub trait DebugInfoSource: Send + Sync + 'static {
    type Info: Clone + Send + 'static;

    fn make_debug_info(&self) -> Self::Info;

    /// Grades one snapshot. The default always passes; override to flag
    /// `Warn`/`Critical` conditions specific to `Self::Info`.
    fn is_okay(&self, _info: &Self::Info) -> DebugInfoOkay {
        DebugInfoOkay::Pass
    }
}

struct RingQueue<T> {
    entries: Mutex<VecDeque<(T, u64)>>,
    capacity: Mutex<usize>,
    enabled: AtomicBool,
}

impl<T> RingQueue<T> {
    fn new() -> Self {
        RingQueue {
            entries: Mutex::new(VecDeque::new()),
            capacity: Mutex::new(0),
            enabled: AtomicBool::new(false),
        }
    }

    fn register(&self, capacity: usize, enabled: bool) {
        *self.capacity.lock().unwrap() = capacity;
        self.enabled.store(enabled, Ordering::SeqCst);
        self.entries.lock().unwrap().clear();
    }

    fn deregister(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.entries.lock().unwrap().clear();
    }

    fn push(&self, info: T, user_specific: u64) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        let capacity = *self.capacity.lock().unwrap();
        if capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= capacity {
            entries.pop_front();
        }
        entries.push_back((info, user_specific));
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl<T: Clone> RingQueue<T> {
    fn snapshot(&self) -> Vec<(T, u64)> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }
}

struct Inner<S: DebugInfoSource> {
    source: S,
    history: RingQueue<S::Info>,
    history_error: RingQueue<S::Info>,
    summary_okay: Mutex<DebugInfoOkay>,
    run: AtomicBool,
    shutdown: AtomicBool,
    registered: AtomicBool,
    timer_usec: AtomicU64,
    name: Mutex<String>,
    pinner: Arc<dyn CpuPinner>,
}

impl<S: DebugInfoSource> Inner<S> {
    fn add_debug_info(&self, user_specific: u64) {
        assert!(
            self.registered.load(Ordering::SeqCst),
            "add_debug_info called before register"
        );
        let info = self.source.make_debug_info();
        let instance_okay = self.source.is_okay(&info);
        {
            let mut summary = self.summary_okay.lock().unwrap();
            if instance_okay > *summary {
                *summary = instance_okay;
            }
        }
        if instance_okay != DebugInfoOkay::Pass {
            self.history_error.push(info.clone(), user_specific);
        }
        self.history.push(info, user_specific);
    }
}

/// A registered, running debug-info producer for snapshot type `S::Info`.
pub struct DebugInfoProducer<S: DebugInfoSource> {
    inner: Arc<Inner<S>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: DebugInfoSource> DebugInfoProducer<S> {
    /// Builds the producer and spawns its sampler thread, parked
    /// immediately: no snapshots are taken until [`Self::register`] turns
    /// on async logging.
    pub fn new(source: S, pinner: Arc<dyn CpuPinner>) -> Self {
        let inner = Arc::new(Inner {
            source,
            history: RingQueue::new(),
            history_error: RingQueue::new(),
            summary_okay: Mutex::new(DebugInfoOkay::Pass),
            run: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            timer_usec: AtomicU64::new(DEBUG_INFO_DEFAULT_TIMER_USEC),
            name: Mutex::new(String::new()),
            pinner,
        });
        let sampler_inner = inner.clone();
        let thread = thread::Builder::new()
            .name("debug-info-sampler".to_string())
            .spawn(move || Self::sampler_loop(sampler_inner))
            .expect("failed to spawn debug-info sampler thread");
        DebugInfoProducer { inner, thread: Some(thread) }
    }

    fn sampler_loop(inner: Arc<Inner<S>>) {
        inner.pinner.pin_current_thread();
        loop {
            if inner.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if !inner.run.load(Ordering::SeqCst) {
                thread::park();
                continue;
            }
            inner.add_debug_info(TIMER_TRIGGERED);
            let usec = inner.timer_usec.load(Ordering::SeqCst);
            thread::sleep(Duration::from_micros(usec));
        }
    }

    /// Registers both ring histories at `capacity` entries and, if
    /// `async_logging`, releases the sampler thread. `timer_usec == 0`
    /// leaves the current interval (or the default) unchanged.
    pub fn register(
        &self,
        name: impl Into<String>,
        capacity: usize,
        async_logging: bool,
        timer_usec: u64,
        enabled: bool,
    ) {
        if timer_usec != 0 {
            self.inner.timer_usec.store(timer_usec, Ordering::SeqCst);
        }
        self.inner.history.register(capacity, enabled);
        self.inner.history_error.register(capacity, enabled);
        *self.inner.name.lock().unwrap() = name.into();
        self.inner.registered.store(true, Ordering::SeqCst);
        if async_logging {
            self.inner.run.store(true, Ordering::SeqCst);
            if let Some(t) = &self.thread {
                t.thread().unpark();
            }
        }
        log::info!(
            "DebugInfoProducer {} registered, capacity:{}, async:{}",
            self.inner.name.lock().unwrap(),
            capacity,
            async_logging
        );
    }

    pub fn deregister(&self) {
        if self.inner.registered.swap(false, Ordering::SeqCst) {
            self.inner.history.deregister();
            self.inner.history_error.deregister();
        }
    }

    pub fn set_timer(&self, timer_usec: u64) {
        self.inner.timer_usec.store(timer_usec, Ordering::SeqCst);
    }

    /// Samples and grades one snapshot immediately. Panics if called
    /// before `register`, mirroring the original's `assert(registered)`.
    pub fn add_debug_info(&self, user_specific: u64) {
        self.inner.add_debug_info(user_specific);
    }

    pub fn summary_okay(&self) -> DebugInfoOkay {
        *self.inner.summary_okay.lock().unwrap()
    }

    pub fn history_len(&self) -> usize {
        self.inner.history.len()
    }

    pub fn history_error_len(&self) -> usize {
        self.inner.history_error.len()
    }

    pub fn history_snapshot(&self) -> Vec<(S::Info, u64)> {
        self.inner.history.snapshot()
    }

    pub fn history_error_snapshot(&self) -> Vec<(S::Info, u64)> {
        self.inner.history_error.snapshot()
    }
}

impl<S: DebugInfoSource> Drop for DebugInfoProducer<S> {
    fn drop(&mut self) {
        self.inner.run.store(false, Ordering::SeqCst);
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(t) = self.thread.take() {
            t.thread().unpark();
            let _ = t.join();
        }
        self.deregister();
    }
}
