//! Service wiring: stores, dispatcher, worker pool and sweeper.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

use medscribe_ai::{AiBackend, AiError, OpenAiBackend, RetryPolicy, RetryingBackend};
use medscribe_infra::{
    BlobStaging, BlobSweeper, BlobSweeperHandle, ClinicRecords, ClinicStore, InMemoryBlobStaging,
    InMemoryClinicStore, InMemoryJobStore, JobDispatcher, JobExecutor, JobStore, JobStoreError,
    JobWorkerPool, JobWorkerPoolHandle, ResourceLedger, WorkerPoolConfig,
};

use crate::config::AppConfig;

/// Error recorded on jobs a previous process left running.
pub const INTERRUPTED_REASON: &str = "interrupted by shutdown";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("database error: {0}")]
    Database(String),
    #[error("job store error: {0}")]
    Jobs(#[from] JobStoreError),
}

/// Request-side services shared by all handlers.
pub struct AppServices {
    pub records: ClinicRecords,
    pub dispatcher: JobDispatcher,
    pub blobs: Arc<dyn BlobStaging>,
}

/// Background tasks started alongside the router.
pub struct Background {
    pool: JobWorkerPoolHandle,
    sweeper: BlobSweeperHandle,
}

impl Background {
    /// Stop claiming jobs, let in-flight ones finish, then stop the sweeper.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
        self.sweeper.shutdown().await;
        info!("background workers stopped");
    }
}

struct Stores {
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStaging>,
    clinic: Arc<dyn ClinicStore>,
    ledger: Arc<dyn ResourceLedger>,
}

fn in_memory_stores() -> Stores {
    let clinic = InMemoryClinicStore::arc();
    Stores {
        jobs: InMemoryJobStore::arc(),
        blobs: Arc::new(InMemoryBlobStaging::new()),
        clinic: clinic.clone(),
        ledger: clinic,
    }
}

#[cfg(feature = "postgres")]
async fn postgres_stores(database_url: &str) -> Result<Stores, ServiceError> {
    use medscribe_infra::postgres::{PgBlobStaging, PgClinicStore, PgJobStore, ensure_schema};

    let pool = sqlx::PgPool::connect(database_url)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;
    ensure_schema(&pool)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    let clinic = Arc::new(PgClinicStore::new(pool.clone()));
    Ok(Stores {
        jobs: Arc::new(PgJobStore::new(pool.clone())),
        blobs: Arc::new(PgBlobStaging::new(pool)),
        clinic: clinic.clone(),
        ledger: clinic,
    })
}

async fn select_stores(config: &AppConfig) -> Result<Stores, ServiceError> {
    let Some(database_url) = config.database_url.as_deref() else {
        info!("using in-memory stores");
        return Ok(in_memory_stores());
    };

    #[cfg(feature = "postgres")]
    {
        info!("using postgres stores");
        postgres_stores(database_url).await
    }
    #[cfg(not(feature = "postgres"))]
    {
        let _ = database_url;
        warn!("DATABASE_URL is set but the postgres feature is not enabled, falling back to in-memory");
        Ok(in_memory_stores())
    }
}

/// Production AI backend: OpenAI over HTTP, retried on rate limiting.
pub fn openai_backend(config: &AppConfig) -> Result<Arc<dyn AiBackend>, AiError> {
    let backend = OpenAiBackend::new(config.openai.clone())?;
    Ok(Arc::new(RetryingBackend::new(backend, RetryPolicy::default())))
}

pub async fn build_services(
    config: &AppConfig,
    backend: Arc<dyn AiBackend>,
) -> Result<(Arc<AppServices>, Background), ServiceError> {
    let stores = select_stores(config).await?;

    let interrupted = stores.jobs.fail_interrupted(INTERRUPTED_REASON).await?;
    if interrupted > 0 {
        warn!(count = interrupted, "failed jobs left running by a previous process");
    }

    let wake = Arc::new(Notify::new());
    let dispatcher = JobDispatcher::new(
        stores.jobs.clone(),
        stores.blobs.clone(),
        stores.clinic.clone(),
        wake.clone(),
    );
    let executor = Arc::new(JobExecutor::new(
        stores.jobs.clone(),
        stores.blobs.clone(),
        stores.ledger.clone(),
        backend,
    ));

    let pool = JobWorkerPool::spawn(
        executor,
        wake,
        WorkerPoolConfig::default()
            .with_name("ai-jobs")
            .with_workers(config.job_workers),
    );
    let sweeper = BlobSweeper::new(config.blob_max_age, config.blob_sweep_interval)
        .spawn(stores.blobs.clone());

    let services = AppServices {
        records: ClinicRecords::new(stores.clinic),
        dispatcher,
        blobs: stores.blobs,
    };

    Ok((Arc::new(services), Background { pool, sweeper }))
}
