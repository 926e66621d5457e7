use std::sync::Arc;

use tracing::info;

use deploy_engine::cmd::command::ProcessRunner;
use deploy_engine::cmd::helm::HelmCliAdapter;
use deploy_engine::cmd::kubectl::KubectlAdapter;
use deploy_engine::config::Config;
use deploy_engine::db::Database;
use deploy_engine::logger;
use deploy_engine::reconciler::{run_lease_recovery_sweep, run_worker, ProvisionerHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    logger::init(&config.log_level);

    info!("connecting to database");
    let database = Database::connect(&config.database_url).await?;
    database.migrate().await?;

    let provisioner = ProvisionerHandle::new(Arc::new(KubectlAdapter::new(ProcessRunner)), Arc::new(HelmCliAdapter::new(ProcessRunner)));

    let mut workers = Vec::new();
    for idx in 0..config.worker_count {
        let pool = database.pool.clone();
        let backend = database.backend;
        let worker_id = format!("worker-{idx}");
        let provisioner = provisioner.clone();
        let poll_interval = config.worker_poll_interval;
        workers.push(tokio::spawn(run_worker(pool, backend, worker_id, provisioner, poll_interval)));
    }

    let sweep_pool = database.pool.clone();
    let lease_threshold = config.job_lease_threshold;
    workers.push(tokio::spawn(run_lease_recovery_sweep(sweep_pool, lease_threshold, lease_threshold)));

    info!(worker_count = config.worker_count, "deploy-engine started");

    for worker in workers {
        worker.await?;
    }

    Ok(())
}
