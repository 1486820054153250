use std::sync::Arc;

use async_trait::async_trait;
use yr_base::error::CoreError;
use yr_base::ids::InstanceId;
use yr_config::Config;
use yr_funcagent::{spawn_func_agent, FuncAgentConfig, PackageDownloader, RuntimeLauncher};

use crate::shutdown::wait_for_signal;

/// The runtime process launcher and code-package downloader are named
/// external collaborators in spec §1 ("runtime process launchers,
/// code-package downloaders ... NOT in scope"). This binary substitutes
/// trivial pass-through implementations so the agent actor has something
/// to drive; a real deployment supplies its own via the same traits.
struct PassthroughLauncher;

#[async_trait]
impl RuntimeLauncher for PassthroughLauncher {
    async fn start_instance(&self, instance_id: &InstanceId, package_id: &str) -> Result<String, CoreError> {
        tracing::info!(%instance_id, %package_id, "starting instance (passthrough launcher)");
        Ok(format!("runtime-{instance_id}"))
    }

    async fn stop_instance(&self, instance_id: &InstanceId) -> Result<(), CoreError> {
        tracing::info!(%instance_id, "stopping instance (passthrough launcher)");
        Ok(())
    }
}

struct PassthroughDownloader;

#[async_trait]
impl PackageDownloader for PassthroughDownloader {
    async fn download(&self, package_id: &str) -> Result<(), CoreError> {
        tracing::info!(%package_id, "downloading code package (passthrough downloader)");
        Ok(())
    }
}

pub async fn run(address: String, local_scheduler: String, config: Config) -> anyhow::Result<()> {
    tracing::info!(%address, %local_scheduler, "starting function agent");

    let _agent = spawn_func_agent(
        1024,
        Arc::new(PassthroughLauncher),
        Arc::new(PassthroughDownloader),
        FuncAgentConfig {
            max_download_retries: 3,
            package_aging_sec: config.code_package_aging_sec,
        },
    );

    wait_for_signal().await;
    Ok(())
}
