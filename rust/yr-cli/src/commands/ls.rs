use std::sync::Arc;

use yr_config::Config;
use yr_localsched::{spawn_local_scheduler, LocalSchedulerConfig, NoParent};
use yr_metastore::{LeaseConfig, MetaStore};
use yr_resourceview::ResourceView;

use crate::shutdown::wait_for_signal;

/// Boots a Local Scheduler. Wire transport to a remote parent Domain
/// Scheduler and a remote Metadata Store is out of this core's scope
/// (spec §1 names the RPC front-end as an external collaborator); this
/// binary spawns its own in-process Metadata Store actor and, absent a
/// `ParentLink` implementation reaching a real DS process, runs with
/// [`NoParent`] so `Schedule` falls back to "no fit" instead of hanging.
pub async fn run(
    address: String,
    parent: Option<String>,
    metastore: String,
    config: Config,
) -> anyhow::Result<()> {
    tracing::info!(%address, ?parent, %metastore, "starting local scheduler");

    let meta_store = MetaStore::spawn(LeaseConfig {
        node_id: 0,
        sweep_interval_ms: config.lease_sweep_interval_ms,
    })
    .await;

    let _scheduler = spawn_local_scheduler(
        1024,
        ResourceView::new(),
        meta_store,
        Arc::new(NoParent),
        LocalSchedulerConfig {
            reservation_ttl_ms: config.reserved_timeout_ms as i64,
            reservation_sweep_interval_ms: 1_000,
        },
    );

    wait_for_signal().await;
    Ok(())
}
