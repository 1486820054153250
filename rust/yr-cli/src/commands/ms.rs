use std::sync::Arc;

use yr_config::Config;
use yr_metastore::backup::{BackupConfig, InMemoryBackupSink};
use yr_metastore::{LeaseConfig, MetaStore};

use crate::shutdown::wait_for_signal;

pub async fn run(address: String, config: Config) -> anyhow::Result<()> {
    tracing::info!(%address, "starting metadata store");

    // The corpus ships only the in-memory reference sink; a real deployment
    // plugs in a `BackupSink` backed by an external store (DESIGN.md).
    let sink = Arc::new(InMemoryBackupSink::new());
    let backup_config = BackupConfig {
        max_flush_concurrency: config.meta_store_max_flush_concurrency,
        max_flush_batch_size: config.meta_store_max_flush_batch_size,
    };

    let _store = MetaStore::spawn_with_backup(
        LeaseConfig {
            node_id: node_id_from_address(&address),
            sweep_interval_ms: config.lease_sweep_interval_ms,
        },
        sink,
        backup_config,
        config.enable_sync_sys_func,
    )
    .await;

    wait_for_signal().await;
    Ok(())
}

/// Derives a small, deterministic node id for lease-id packing (spec §C.1)
/// from the bind address, so two daemons on different ports don't collide.
fn node_id_from_address(address: &str) -> u16 {
    address
        .rsplit(':')
        .next()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(0)
}
