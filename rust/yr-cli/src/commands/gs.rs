use std::sync::Arc;

use yr_config::Config;
use yr_globalsched::spawn_global_scheduler;
use yr_heartbeat::spawn_registration_service;
use yr_metastore::{LeaseConfig, MetaStore};

use crate::shutdown::wait_for_signal;

pub async fn run(address: String, metastore: String, leader: bool, config: Config) -> anyhow::Result<()> {
    tracing::info!(%address, %metastore, leader, "starting global scheduler");

    let meta_store = MetaStore::spawn(LeaseConfig {
        node_id: 0,
        sweep_interval_ms: config.lease_sweep_interval_ms,
    })
    .await;

    let registration = spawn_registration_service(1024, meta_store, None).await;

    let on_ls_abnormal_exit = Arc::new(|name: String| {
        tracing::warn!(%name, "local scheduler exited abnormally");
    });

    let _scheduler = spawn_global_scheduler(1024, registration, leader, on_ls_abnormal_exit);

    wait_for_signal().await;
    Ok(())
}
