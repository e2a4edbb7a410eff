//! Worker pool pulling jobs from the store.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::executor::JobExecutor;
use super::types::JobStatus;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Fallback poll period when no wake-up arrives
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(1),
            name: "job-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct JobWorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<PoolStats>>,
    started: Instant,
}

impl JobWorkerPoolHandle {
    /// Stop claiming new jobs and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for join in self.joins {
            let _ = join.await;
        }
    }

    /// Get current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Pool of tokio tasks executing jobs.
///
/// Workers sleep on the dispatcher's [`Notify`] and fall back to polling, so a
/// lost wake-up only delays a job by one poll interval.
pub struct JobWorkerPool;

impl JobWorkerPool {
    pub fn spawn(
        executor: Arc<JobExecutor>,
        wake: Arc<Notify>,
        config: WorkerPoolConfig,
    ) -> JobWorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(PoolStats::default()));

        let workers = config.workers.max(1);
        info!(pool = %config.name, workers, "job worker pool started");

        let joins = (0..workers)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    executor.clone(),
                    wake.clone(),
                    config.clone(),
                    shutdown_rx.clone(),
                    stats.clone(),
                ))
            })
            .collect();

        JobWorkerPoolHandle {
            shutdown: shutdown_tx,
            joins,
            stats,
            started: Instant::now(),
        }
    }
}

async fn worker_loop(
    index: usize,
    executor: Arc<JobExecutor>,
    wake: Arc<Notify>,
    config: WorkerPoolConfig,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<PoolStats>>,
) {
    debug!(pool = %config.name, worker = index, "worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match executor.jobs().claim_next().await {
            Ok(Some(job)) => {
                let job_id = job.id;
                debug!(pool = %config.name, worker = index, job_id = %job_id, kind = %job.kind(), "claimed job");
                record(&stats, |s| s.current_running += 1);

                let result = executor.execute(job).await;
                let succeeded = matches!(result, Ok(JobStatus::Done));

                record(&stats, |s| {
                    s.current_running = s.current_running.saturating_sub(1);
                    s.jobs_processed += 1;
                    if succeeded {
                        s.jobs_succeeded += 1;
                    } else {
                        s.jobs_failed += 1;
                    }
                });

                if let Err(e) = result {
                    error!(pool = %config.name, job_id = %job_id, error = %e, "could not record job outcome");
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!(pool = %config.name, error = %e, "failed to claim job");
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!(pool = %config.name, worker = index, "worker stopped");
}

fn record(stats: &Mutex<PoolStats>, f: impl FnOnce(&mut PoolStats)) {
    f(&mut stats.lock().unwrap_or_else(PoisonError::into_inner));
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use medscribe_ai::{FakeBackend, FakeOp};
    use medscribe_core::{
        Consultation, ConsultationId, NewConsultation, NewPatient, Patient, PatientId,
        ResourceEntry, UserId,
    };

    use super::*;
    use crate::blobs::InMemoryBlobStaging;
    use crate::clinic::{ClinicStore, InMemoryClinicStore};
    use crate::jobs::{JobParams, JobStore, InMemoryJobStore};
    use crate::ledger::ResourceLedger;

    async fn seeded_clinic(owner: UserId) -> (Arc<InMemoryClinicStore>, ConsultationId) {
        let clinic = InMemoryClinicStore::arc();
        let patient = Patient::register(
            PatientId::new(),
            owner,
            NewPatient {
                first_name: "Rosa".into(),
                middle_name: None,
                last_name: "Vega".into(),
                second_last_name: None,
                address: "Calle Sol 9".into(),
                date_of_birth: NaiveDate::from_ymd_opt(1968, 11, 30).unwrap(),
                description: None,
            },
        )
        .unwrap();
        let consultation = Consultation::schedule(
            ConsultationId::new(),
            owner,
            &patient,
            NewConsultation {
                patient_id: patient.id,
                scheduled_on: Utc::now(),
                time: "12:00".into(),
                description: "control".into(),
            },
        )
        .unwrap();
        let id = consultation.id;
        clinic.insert_patient(patient).await.unwrap();
        clinic.insert_consultation(consultation).await.unwrap();
        (clinic, id)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_drains_the_queue_and_counts_outcomes() {
        let owner = UserId::new();
        let (clinic, subject) = seeded_clinic(owner).await;
        let jobs = InMemoryJobStore::arc();
        let fake = Arc::new(FakeBackend::new());
        fake.reply(FakeOp::Complete, Err(medscribe_ai::AiError::Backend("boom".into())));

        let executor = Arc::new(JobExecutor::new(
            jobs.clone(),
            Arc::new(InMemoryBlobStaging::new()),
            clinic.clone(),
            fake.clone(),
        ));
        let wake = Arc::new(Notify::new());
        let pool = JobWorkerPool::spawn(
            executor,
            wake.clone(),
            WorkerPoolConfig::default()
                .with_workers(3)
                .with_poll_interval(Duration::from_millis(10)),
        );

        let mut ids = Vec::new();
        for i in 0..6 {
            let job = jobs
                .create(owner, subject, JobParams::Chat { prompt: format!("p{i}") })
                .await
                .unwrap();
            ids.push(job.id);
            wake.notify_one();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.stats().jobs_processed < ids.len() as u64 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = pool.stats();
        pool.shutdown().await;

        assert_eq!(stats.jobs_processed, 6);
        assert_eq!(stats.jobs_succeeded, 5);
        assert_eq!(stats.jobs_failed, 1);
        for id in &ids {
            assert!(jobs.get(*id).await.unwrap().status.is_terminal());
        }
        let entries = clinic.list(subject).await.unwrap();
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|e| matches!(e, ResourceEntry::Qa { .. })));
    }

    #[tokio::test]
    async fn shutdown_returns_when_idle() {
        let executor = Arc::new(JobExecutor::new(
            InMemoryJobStore::arc(),
            Arc::new(InMemoryBlobStaging::new()),
            InMemoryClinicStore::arc(),
            Arc::new(FakeBackend::new()),
        ));
        let pool = JobWorkerPool::spawn(
            executor,
            Arc::new(Notify::new()),
            WorkerPoolConfig::default().with_poll_interval(Duration::from_secs(3600)),
        );
        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .unwrap();
    }
}
