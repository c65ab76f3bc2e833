//! Background warm-up sweep for the thumbnail cache
//!
//! At boot the whole upload tree is walked once and every thumbnail-eligible original is
//! passed through [`ThumbnailStore::ensure`]. The sweep is a best-effort pre-pass: the store
//! performs the same check lazily on first request regardless, so walk errors are counted
//! and skipped. The sweep runs on its own thread and can be cancelled and joined, which lets
//! the server tie it to its shutdown sequence.

use crate::cache::{ThumbnailOutcome, ThumbnailStore};
use crate::paths::{is_thumbnailable_extension, AssetCategory, AssetLayout};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Sources handed to rayon at a time; small so cancellation stays responsive
const CHUNK_SIZE: usize = 4;

/// Progress of a warm-up sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmupProgress {
    pub discovered: usize,
    pub completed: usize,
    pub generated: usize,
    pub failed: usize,
    pub walk_errors: usize,
    pub is_cancelled: bool,
    pub is_finished: bool,
}

impl WarmupProgress {
    pub fn completion_percentage(&self) -> f64 {
        if self.discovered == 0 {
            100.0
        } else {
            (self.completed as f64 / self.discovered as f64) * 100.0
        }
    }
}

/// Walks the upload tree and materializes missing or stale thumbnails
pub struct WarmupSweeper {
    store: Arc<ThumbnailStore>,
}

/// Running sweep started by [`WarmupSweeper::start`]
pub struct WarmupHandle {
    cancel_flag: Arc<AtomicBool>,
    progress: Arc<Mutex<WarmupProgress>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl WarmupSweeper {
    pub fn new(store: Arc<ThumbnailStore>) -> Self {
        Self { store }
    }

    /// Start the sweep on a background thread and return immediately
    pub fn start(self) -> io::Result<WarmupHandle> {
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(Mutex::new(WarmupProgress::default()));

        let store = Arc::clone(&self.store);
        let progress_clone = Arc::clone(&progress);
        let cancel_flag_clone = Arc::clone(&cancel_flag);

        let thread_handle = thread::Builder::new()
            .name("thumbnail-warmup".to_string())
            .spawn(move || execute_sweep(&store, &progress_clone, &cancel_flag_clone))?;

        Ok(WarmupHandle {
            cancel_flag,
            progress,
            thread_handle: Some(thread_handle),
        })
    }

    /// Run the sweep on the calling thread until it completes
    pub fn run_blocking(&self) -> WarmupProgress {
        let progress = Mutex::new(WarmupProgress::default());
        execute_sweep(&self.store, &progress, &AtomicBool::new(false));
        progress.into_inner()
    }
}

impl WarmupHandle {
    /// Ask the sweep to stop; in-flight thumbnails are still finished
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    pub fn progress(&self) -> WarmupProgress {
        self.progress.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.progress.lock().is_finished
    }

    /// Wait for the sweep thread and return its final progress
    pub fn join(mut self) -> WarmupProgress {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("thumbnail warm-up thread panicked");
            }
        }
        self.progress()
    }

    /// Cancel, then wait for the sweep to wind down
    pub fn shutdown(self) -> WarmupProgress {
        self.cancel();
        self.join()
    }
}

fn execute_sweep(store: &ThumbnailStore, progress: &Mutex<WarmupProgress>, cancel_flag: &AtomicBool) {
    info!(root = %store.layout().upload_dir().display(), "thumbnail warm-up started");

    let (sources, walk_complete) = discover_sources(store.layout(), progress, cancel_flag);
    progress.lock().discovered = sources.len();

    for chunk in sources.chunks(CHUNK_SIZE) {
        if cancel_flag.load(Ordering::Relaxed) {
            break;
        }

        chunk.par_iter().for_each(|url| {
            if cancel_flag.load(Ordering::Relaxed) {
                return;
            }

            let outcome = store.ensure(url);

            let mut progress_guard = progress.lock();
            progress_guard.completed += 1;
            match outcome {
                ThumbnailOutcome::Generated(_) => progress_guard.generated += 1,
                ThumbnailOutcome::Fallback => progress_guard.failed += 1,
                _ => {}
            }
        });
    }

    let mut progress_guard = progress.lock();
    progress_guard.is_cancelled =
        stopped_early(walk_complete, progress_guard.completed, progress_guard.discovered);
    progress_guard.is_finished = true;
    info!(
        discovered = progress_guard.discovered,
        completed = progress_guard.completed,
        generated = progress_guard.generated,
        failed = progress_guard.failed,
        walk_errors = progress_guard.walk_errors,
        cancelled = progress_guard.is_cancelled,
        "thumbnail warm-up finished"
    );
}

/// A sweep counts as cancelled only if it left work undone. A cancel flag raised after the
/// last source was handled does not.
fn stopped_early(walk_complete: bool, completed: usize, discovered: usize) -> bool {
    !walk_complete || completed < discovered
}

/// URLs of every thumbnailable file under the upload root, and whether the walk ran to the end.
/// The thumbnail and non-image subtrees are pruned whole, never descended into.
fn discover_sources(
    layout: &AssetLayout,
    progress: &Mutex<WarmupProgress>,
    cancel_flag: &AtomicBool,
) -> (Vec<String>, bool) {
    let upload_dir = layout.upload_dir();
    if !upload_dir.is_dir() {
        debug!(root = %upload_dir.display(), "upload root missing, nothing to warm");
        return (Vec::new(), true);
    }

    let thumb_dir = layout.thumb_dir();
    let file_dir = layout.category_dir(AssetCategory::File);

    let walker = WalkDir::new(&upload_dir).into_iter().filter_entry(|entry| {
        !(entry.file_type().is_dir() && (entry.path() == thumb_dir || entry.path() == file_dir))
    });

    let mut sources = Vec::new();
    for entry in walker {
        if cancel_flag.load(Ordering::Relaxed) {
            return (sources, false);
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("skipping unreadable entry during warm-up: {}", e);
                progress.lock().walk_errors += 1;
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }

        let eligible_name = entry
            .file_name()
            .to_str()
            .is_some_and(is_thumbnailable_extension);
        if !eligible_name {
            continue;
        }

        match layout.path_to_url(entry.path()) {
            Some(url) => sources.push(url),
            None => debug!(path = %entry.path().display(), "no URL for entry, skipping"),
        }
    }

    (sources, true)
}
