use std::sync::Arc;

use yr_config::Config;
use yr_domainsched::{spawn_domain_scheduler, DomainSchedulerConfig, NoParent};

use crate::shutdown::wait_for_signal;

/// Boots a Domain Scheduler. A DS persists nothing directly (spec §4.7:
/// its children's own Binds write the durable instance state); the
/// `--metastore` flag is accepted for parity with the other roles and so
/// operators can point every daemon at the same address, but this crate
/// has no direct [`yr_metastore::MetaStore`] dependency to wire up.
pub async fn run(
    address: String,
    parent: Option<String>,
    metastore: String,
    config: Config,
) -> anyhow::Result<()> {
    tracing::info!(%address, ?parent, %metastore, "starting domain scheduler");

    let _scheduler = spawn_domain_scheduler(
        1024,
        Arc::new(NoParent),
        DomainSchedulerConfig {
            reservation_ttl_ms: config.reserved_timeout_ms as i64,
            reservation_sweep_interval_ms: 1_000,
            max_candidates: 3,
        },
    );

    wait_for_signal().await;
    Ok(())
}
