//! Index Coordinator (C8): one off-thread indexing job per file-id. Owns the
//! state machine `idle -> indexing -> {complete, cancelled, error}` and the
//! atomics a status poll reads without blocking on the worker thread.

use std::{
  collections::HashMap,
  path::PathBuf,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
    Arc,
  },
  thread,
};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
  engine::{CoreError, CoreOptions},
  indexer,
  models::{IndexStatus, JobState},
  storage::Storage,
};

struct JobHandle {
  state: Mutex<JobState>,
  cancelled: Arc<AtomicBool>,
  percent: AtomicU8,
  records_so_far: AtomicU64,
  eta_secs: AtomicU64,
  warnings: AtomicU64,
  error: Mutex<Option<String>>,
}

impl JobHandle {
  fn new() -> Self {
    Self {
      state: Mutex::new(JobState::Indexing),
      cancelled: Arc::new(AtomicBool::new(false)),
      percent: AtomicU8::new(0),
      records_so_far: AtomicU64::new(0),
      eta_secs: AtomicU64::new(0),
      warnings: AtomicU64::new(0),
      error: Mutex::new(None),
    }
  }
}

#[derive(Clone)]
pub(crate) struct Coordinator {
  storage: Storage,
  options: CoreOptions,
  jobs: Arc<Mutex<HashMap<String, Arc<JobHandle>>>>,
}

impl Coordinator {
  pub(crate) fn new(storage: Storage, options: CoreOptions) -> Self {
    Self { storage, options, jobs: Arc::new(Mutex::new(HashMap::new())) }
  }

  pub(crate) fn start(&self, file_id: String, path: PathBuf, size: u64, mtime_ms: i64) -> Result<(), CoreError> {
    {
      let mut jobs = self.jobs.lock();
      if let Some(existing) = jobs.get(&file_id) {
        if matches!(*existing.state.lock(), JobState::Indexing) {
          return Err(CoreError::JobAlreadyRunning(file_id));
        }
      }
      jobs.insert(file_id.clone(), Arc::new(JobHandle::new()));
    }

    let handle = self.jobs.lock().get(&file_id).expect("just inserted").clone();
    let storage = self.storage.clone();
    let options = self.options.clone();
    let cancelled = handle.cancelled.clone();

    info!(file_id = %file_id, path = %path.display(), "starting index job");

    thread::spawn(move || {
      let fid = file_id.clone();
      let percent = &handle.percent;
      let records_so_far = &handle.records_so_far;
      let eta_secs = &handle.eta_secs;
      let on_progress = |p: u8, records: u64, eta: u64| {
        percent.store(p, Ordering::Relaxed);
        records_so_far.store(records, Ordering::Relaxed);
        eta_secs.store(eta, Ordering::Relaxed);
      };

      let result = indexer::run(&storage, &options, &fid, &path, size, mtime_ms, &cancelled, on_progress);

      match result {
        Ok(outcome) => {
          handle.records_so_far.store(outcome.total_records, Ordering::Relaxed);
          handle.warnings.store(outcome.warnings, Ordering::Relaxed);
          handle.percent.store(100, Ordering::Relaxed);
          *handle.state.lock() = JobState::Complete;
          info!(file_id = %fid, records = outcome.total_records, "index job complete");
        }
        Err(CoreError::Cancelled) => {
          *handle.state.lock() = JobState::Cancelled;
          info!(file_id = %fid, "index job cancelled");
        }
        Err(e) => {
          *handle.error.lock() = Some(e.to_string());
          *handle.state.lock() = JobState::Error;
          warn!(file_id = %fid, error = %e, "index job failed");
        }
      }
    });

    Ok(())
  }

  pub(crate) fn status(&self, file_id: &str) -> Result<IndexStatus, CoreError> {
    if let Some(handle) = self.jobs.lock().get(file_id) {
      return Ok(IndexStatus {
        file_id: file_id.to_string(),
        state: *handle.state.lock(),
        percent: handle.percent.load(Ordering::Relaxed),
        records_so_far: handle.records_so_far.load(Ordering::Relaxed),
        eta_secs: handle.eta_secs.load(Ordering::Relaxed),
        warnings: handle.warnings.load(Ordering::Relaxed),
        error: handle.error.lock().clone(),
      });
    }

    if let Some(entry) = self.storage.get_catalog(file_id)? {
      return Ok(IndexStatus {
        file_id: file_id.to_string(),
        state: JobState::Complete,
        percent: 100,
        records_so_far: entry.total_records,
        eta_secs: 0,
        warnings: 0,
        error: None,
      });
    }

    Ok(IndexStatus {
      file_id: file_id.to_string(),
      state: JobState::Idle,
      percent: 0,
      records_so_far: 0,
      eta_secs: 0,
      warnings: 0,
      error: None,
    })
  }

  pub(crate) fn cancel(&self, file_id: &str) -> Result<(), CoreError> {
    if let Some(handle) = self.jobs.lock().get(file_id) {
      if matches!(*handle.state.lock(), JobState::Indexing) {
        handle.cancelled.store(true, Ordering::Relaxed);
      }
    }
    Ok(())
  }
}
