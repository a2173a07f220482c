//! Asynchronous job runner.
//!
//! Wraps one backtest invocation behind a persisted job record under
//! `<results_root>/jobs/<job_id>/`. Jobs move `queued -> running -> {done,
//! failed}`; a bounded worker pool (default 2 slots) executes them on
//! detached threads. Cancellation and the wall-clock timeout both land
//! between bars, so partial artifacts survive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{error, info};

use crate::config::RunConfig;
use crate::error::RunError;
use crate::export;
use crate::metrics::MetricsReport;
use crate::paths::job_dir;
use crate::runner::{self, RunStatus};

pub const DEFAULT_WORKER_SLOTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobErrorRecord {
    pub kind: String,
    pub message: String,
}

/// The persisted `job.json` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: RunConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsReport>,
    #[serde(default)]
    pub artifact_paths: BTreeMap<String, PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorRecord>,
}

/// Row returned by `list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub config_summary: String,
}

struct WorkerHandle {
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Owns the job-directory region of the filesystem and the worker pool.
pub struct JobManager {
    repo_root: PathBuf,
    results_root: PathBuf,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    slots: Arc<(Mutex<u32>, Condvar)>,
}

impl JobManager {
    pub fn new(repo_root: impl Into<PathBuf>, results_root: impl Into<PathBuf>) -> Self {
        Self::with_slots(repo_root, results_root, DEFAULT_WORKER_SLOTS)
    }

    pub fn with_slots(
        repo_root: impl Into<PathBuf>,
        results_root: impl Into<PathBuf>,
        slots: u32,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            results_root: results_root.into(),
            workers: Mutex::new(HashMap::new()),
            slots: Arc::new((Mutex::new(slots.max(1)), Condvar::new())),
        }
    }

    fn record_path(&self, job_id: &str) -> PathBuf {
        job_dir(&self.results_root, job_id).join("job.json")
    }

    fn log_path(&self, job_id: &str) -> PathBuf {
        job_dir(&self.results_root, job_id).join("job.log")
    }

    /// Create the job directory, persist the queued record, dispatch a
    /// worker thread, and return the job id.
    pub fn submit(&self, config: RunConfig) -> Result<String, RunError> {
        config.validate()?;

        let created_at = Utc::now();
        let job_id = format!(
            "job_{}",
            &blake3::hash(
                format!("{}:{}", config.digest(), created_at.timestamp_nanos_opt().unwrap_or(0))
                    .as_bytes()
            )
            .to_hex()[..12]
        );

        let dir = job_dir(&self.results_root, &job_id);
        fs::create_dir_all(&dir)
            .map_err(|e| RunError::Runtime(format!("create {}: {e}", dir.display())))?;

        let record = JobRecord {
            job_id: job_id.clone(),
            status: JobStatus::Queued,
            progress: 0.0,
            created_at,
            updated_at: created_at,
            config,
            metrics: None,
            artifact_paths: BTreeMap::new(),
            error: None,
        };
        write_record(&self.record_path(&job_id), &record)?;
        append_log(&self.log_path(&job_id), "job queued");

        let cancel = Arc::new(AtomicBool::new(false));
        let handle = self.spawn_worker(record, cancel.clone());
        self.workers
            .lock()
            .expect("worker table lock")
            .insert(job_id.clone(), WorkerHandle { cancel, join: handle });

        info!(job_id, "job submitted");
        Ok(job_id)
    }

    fn spawn_worker(&self, record: JobRecord, cancel: Arc<AtomicBool>) -> JoinHandle<()> {
        let repo_root = self.repo_root.clone();
        let results_root = self.results_root.clone();
        let slots = Arc::clone(&self.slots);

        std::thread::Builder::new()
            .name(format!("dexterio-job-{}", record.job_id))
            .spawn(move || {
                // bounded pool: wait for a free slot
                {
                    let (lock, cvar) = &*slots;
                    let mut free = lock.lock().expect("slot lock");
                    while *free == 0 {
                        free = cvar.wait(free).expect("slot wait");
                    }
                    *free -= 1;
                }
                run_job(record, cancel, &repo_root, &results_root);
                let (lock, cvar) = &*slots;
                *lock.lock().expect("slot lock") += 1;
                cvar.notify_one();
            })
            .expect("spawn job worker")
    }

    pub fn status(&self, job_id: &str) -> Result<JobRecord, RunError> {
        read_record(&self.record_path(job_id))
    }

    pub fn log(&self, job_id: &str) -> Result<String, RunError> {
        fs::read_to_string(self.log_path(job_id))
            .map_err(|e| RunError::Runtime(format!("read log for {job_id}: {e}")))
    }

    /// Bytes of one named artifact.
    pub fn download(&self, job_id: &str, artifact_name: &str) -> Result<Vec<u8>, RunError> {
        // artifact names are plain file names inside the job dir
        if artifact_name.contains(['/', '\\']) || artifact_name.contains("..") {
            return Err(RunError::Runtime(format!("invalid artifact name '{artifact_name}'")));
        }
        let path = job_dir(&self.results_root, job_id).join(artifact_name);
        fs::read(&path).map_err(|e| RunError::Runtime(format!("read {}: {e}", path.display())))
    }

    /// Most recent jobs first.
    pub fn list(&self, limit: usize) -> Result<Vec<JobSummary>, RunError> {
        let jobs_root = self.results_root.join("jobs");
        let mut records: Vec<JobRecord> = Vec::new();
        if let Ok(entries) = fs::read_dir(&jobs_root) {
            for entry in entries.flatten() {
                let record_path = entry.path().join("job.json");
                if let Ok(record) = read_record(&record_path) {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records
            .into_iter()
            .take(limit)
            .map(|r| JobSummary {
                job_id: r.job_id,
                status: r.status,
                created_at: r.created_at,
                config_summary: format!(
                    "{} {} {}..{} {}",
                    r.config.run.run_name,
                    r.config.run.symbols.join(","),
                    r.config.run.start_date,
                    r.config.run.end_date,
                    r.config.run.trading_mode
                ),
            })
            .collect())
    }

    /// Request cancellation. Takes effect between bars.
    pub fn cancel(&self, job_id: &str) -> bool {
        let workers = self.workers.lock().expect("worker table lock");
        match workers.get(job_id) {
            Some(handle) => {
                handle.cancel.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Startup sweep: any persisted `running` job without a live worker
    /// moves to `failed(worker_lost)`. Returns the number reset.
    pub fn reset_stale(&self) -> Result<usize, RunError> {
        let workers = self.workers.lock().expect("worker table lock");
        let jobs_root = self.results_root.join("jobs");
        let mut reset = 0;
        if let Ok(entries) = fs::read_dir(&jobs_root) {
            for entry in entries.flatten() {
                let record_path = entry.path().join("job.json");
                let Ok(mut record) = read_record(&record_path) else { continue };
                if record.status == JobStatus::Running && !workers.contains_key(&record.job_id) {
                    record.status = JobStatus::Failed;
                    record.error = Some(JobErrorRecord {
                        kind: "worker_lost".into(),
                        message: "worker handle gone at startup".into(),
                    });
                    record.updated_at = Utc::now();
                    write_record(&record_path, &record)?;
                    reset += 1;
                }
            }
        }
        Ok(reset)
    }

    /// Block until the job's worker thread exits (test support).
    pub fn wait(&self, job_id: &str) {
        let handle = self.workers.lock().expect("worker table lock").remove(job_id);
        if let Some(handle) = handle {
            let _ = handle.join.join();
        }
    }
}

fn run_job(mut record: JobRecord, cancel: Arc<AtomicBool>, repo_root: &Path, results_root: &Path) {
    let job_id = record.job_id.clone();
    let dir = job_dir(results_root, &job_id);
    let record_path = dir.join("job.json");
    let log_path = dir.join("job.log");

    record.status = JobStatus::Running;
    record.updated_at = Utc::now();
    let _ = write_record(&record_path, &record);
    append_log(&log_path, "run started");

    let deadline = Instant::now()
        + std::time::Duration::from_secs(record.config.run.timeout_minutes * 60);
    let timed_out = Arc::new(AtomicBool::new(false));
    let mut last_progress = 0.0_f64;

    let result = {
        let record_path = record_path.clone();
        let mut record_snapshot = record.clone();
        let cancel = Arc::clone(&cancel);
        let timed_out = Arc::clone(&timed_out);
        let mut on_progress = move |progress: f64| -> bool {
            if progress - last_progress >= 0.01 {
                last_progress = progress;
                record_snapshot.progress = progress;
                record_snapshot.updated_at = Utc::now();
                let _ = write_record(&record_path, &record_snapshot);
            }
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if Instant::now() >= deadline {
                timed_out.store(true, Ordering::Relaxed);
                return false;
            }
            true
        };
        runner::run(&record.config, repo_root, Some(&mut on_progress))
    };
    let timed_out = timed_out.load(Ordering::Relaxed);

    match result {
        Ok(run_outcome) => {
            // artifacts are written even for stopped runs
            let mut artifacts = BTreeMap::new();
            let trades_path = dir.join("trades.parquet");
            let equity_path = dir.join("equity.parquet");
            let summary_path = dir.join("summary.json");
            let debug_path = dir.join("debug_counts.json");

            let writes: [(&str, anyhow::Result<()>, &PathBuf); 4] = [
                ("trades.parquet", export::write_trades_parquet(&run_outcome.trades, &trades_path), &trades_path),
                ("equity.parquet", export::write_equity_parquet(&run_outcome.equity, &equity_path), &equity_path),
                ("summary.json", export::write_summary_json(&run_outcome.metrics, &summary_path), &summary_path),
                ("debug_counts.json", export::write_debug_counts_json(&run_outcome.debug, &debug_path), &debug_path),
            ];
            for (name, result, path) in writes {
                match result {
                    Ok(()) => {
                        artifacts.insert(name.to_string(), (*path).clone());
                    }
                    Err(e) => append_log(&log_path, &format!("artifact {name} failed: {e:#}")),
                }
            }
            if record.config.run.export_market_state {
                let ms_path = dir.join("market_state_stream.parquet");
                match export::write_market_state_parquet(&run_outcome.market_state_stream, &ms_path)
                {
                    Ok(()) => {
                        artifacts.insert("market_state_stream.parquet".to_string(), ms_path);
                    }
                    Err(e) => append_log(&log_path, &format!("market state export failed: {e:#}")),
                }
            }
            record.artifact_paths = artifacts;
            record.metrics = Some(run_outcome.metrics);

            match run_outcome.status {
                RunStatus::Completed => {
                    record.status = JobStatus::Done;
                    record.progress = 1.0;
                    append_log(
                        &log_path,
                        &format!("run complete: {} trades", run_outcome.trades.len()),
                    );
                }
                RunStatus::Stopped => {
                    record.status = JobStatus::Failed;
                    let kind = if timed_out { "timeout" } else { "cancelled" };
                    record.error = Some(JobErrorRecord {
                        kind: kind.into(),
                        message: format!("run stopped ({kind}); partial artifacts preserved"),
                    });
                    append_log(&log_path, &format!("run stopped: {kind}"));
                }
            }
        }
        Err(e) => {
            record.status = JobStatus::Failed;
            record.error =
                Some(JobErrorRecord { kind: e.kind().into(), message: e.to_string() });
            append_log(&log_path, &format!("run failed: {e}"));
            error!(job_id, error = %e, "job failed");
        }
    }

    record.updated_at = Utc::now();
    let _ = write_record(&record_path, &record);
}

fn write_record(path: &Path, record: &JobRecord) -> Result<(), RunError> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| RunError::Runtime(format!("serialize job record: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| RunError::Runtime(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| RunError::Runtime(format!("rename {}: {e}", path.display())))?;
    Ok(())
}

fn read_record(path: &Path) -> Result<JobRecord, RunError> {
    let text = fs::read_to_string(path)
        .map_err(|e| RunError::Runtime(format!("read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| RunError::Runtime(format!("parse {}: {e}", path.display())))
}

/// Append one timestamped line to the job log.
fn append_log(path: &Path, line: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{} {line}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued_record(job_id: &str) -> JobRecord {
        let config = RunConfig::from_toml(
            r#"
[run]
run_name = "t"
symbols = ["SPY"]
start_date = "2025-08-01"
end_date = "2025-08-01"
trading_mode = "SAFE"
"#,
        )
        .unwrap();
        JobRecord {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            progress: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            config,
            metrics: None,
            artifact_paths: BTreeMap::new(),
            error: None,
        }
    }

    #[test]
    fn record_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        let record = queued_record("job_x");
        write_record(&path, &record).unwrap();
        let loaded = read_record(&path).unwrap();
        assert_eq!(loaded.job_id, "job_x");
        assert_eq!(loaded.status, JobStatus::Queued);
        assert!(loaded.error.is_none());
    }

    #[test]
    fn reset_stale_flips_orphaned_running_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JobManager::new(dir.path(), dir.path().join("results"));

        let mut record = queued_record("job_stale");
        record.status = JobStatus::Running;
        let jd = job_dir(&dir.path().join("results"), "job_stale");
        fs::create_dir_all(&jd).unwrap();
        write_record(&jd.join("job.json"), &record).unwrap();

        let reset = manager.reset_stale().unwrap();
        assert_eq!(reset, 1);
        let after = manager.status("job_stale").unwrap();
        assert_eq!(after.status, JobStatus::Failed);
        assert_eq!(after.error.unwrap().kind, "worker_lost");

        // idempotent: already failed jobs stay put
        assert_eq!(manager.reset_stale().unwrap(), 0);
    }

    #[test]
    fn download_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JobManager::new(dir.path(), dir.path().join("results"));
        assert!(manager.download("job_x", "../secrets").is_err());
        assert!(manager.download("job_x", "a/b.parquet").is_err());
    }

    #[test]
    fn list_orders_newest_first_and_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let manager = JobManager::new(dir.path(), &results);

        for (i, id) in ["job_a", "job_b", "job_c"].iter().enumerate() {
            let mut record = queued_record(id);
            record.created_at = Utc::now() + chrono::Duration::seconds(i as i64);
            let jd = job_dir(&results, id);
            fs::create_dir_all(&jd).unwrap();
            write_record(&jd.join("job.json"), &record).unwrap();
        }

        let listed = manager.list(2).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].job_id, "job_c");
        assert_eq!(listed[1].job_id, "job_b");
    }
}
