//! Function Agent actor (spec §4.5): deploy/kill bridge between a Local
//! Scheduler and the on-host runtime launcher, with download coalescing,
//! package refcounting, and the "monopoly-used agent" self-exit rule.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use yr_base::actor::{spawn_actor, ActorHandle, Reply};
use yr_base::error::CoreError;
use yr_base::ids::InstanceId;

use crate::launcher::{PackageDownloader, RuntimeLauncher};
use crate::package_cache::{download_with_retries, DeployAdmission, DownloadStatus, PackageCache};

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub instance_id: InstanceId,
    pub package_id: String,
    /// Propagated from the Resource View's `Allocation::exclusive` (spec §3):
    /// an instance that monopolizes the agent.
    pub exclusive: bool,
}

#[derive(Debug, Clone)]
pub enum DeployOutcome {
    Deployed { runtime_id: String },
    DownloadFailed,
}

pub struct FuncAgentConfig {
    pub max_download_retries: u32,
    pub package_aging_sec: u64,
}

impl Default for FuncAgentConfig {
    fn default() -> Self {
        Self {
            max_download_retries: 3,
            package_aging_sec: 600,
        }
    }
}

pub enum FuncAgentMsg {
    DeployInstance {
        request: DeployRequest,
        reply: Reply<Result<DeployOutcome, CoreError>>,
    },
    KillInstance {
        instance_id: InstanceId,
        reply: Reply<Result<(), CoreError>>,
    },
    SweepAgedPackages,
    /// Fired by the heartbeat observer after it gives up on the parent LS
    /// (spec §4.5: "repeated failures escalate to self-exit"). `attempt`
    /// performs one re-registration call.
    HeartbeatTimeout {
        reply: Reply<bool>,
    },
    IsTerminated {
        reply: Reply<bool>,
    },
}

pub type FuncAgentHandle = ActorHandle<FuncAgentMsg>;

struct DeployedInstance {
    package_id: String,
    exclusive: bool,
}

struct FuncAgentState {
    launcher: Arc<dyn RuntimeLauncher>,
    downloader: Arc<dyn PackageDownloader>,
    packages: PackageCache,
    deployed: HashMap<InstanceId, DeployedInstance>,
    exclusive_holder: Option<InstanceId>,
    terminated: bool,
    config: FuncAgentConfig,
}

pub fn spawn_func_agent(
    mailbox_size: usize,
    launcher: Arc<dyn RuntimeLauncher>,
    downloader: Arc<dyn PackageDownloader>,
    config: FuncAgentConfig,
) -> FuncAgentHandle {
    let aging_sec = config.package_aging_sec;
    let state = FuncAgentState {
        launcher,
        downloader,
        packages: PackageCache::new(),
        deployed: HashMap::new(),
        exclusive_holder: None,
        terminated: false,
        config,
    };
    let handle = spawn_actor(mailbox_size, state, |state, msg| handle_msg(state, msg));

    let sweep_handle = handle.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(aging_sec.max(1)));
        loop {
            ticker.tick().await;
            if sweep_handle.tell(FuncAgentMsg::SweepAgedPackages).await.is_err() {
                break;
            }
        }
    });

    handle
}

async fn handle_msg(state: &mut FuncAgentState, msg: FuncAgentMsg) {
    match msg {
        FuncAgentMsg::DeployInstance { request, reply } => {
            let result = deploy_instance(state, request).await;
            let _ = reply.send(result);
        }
        FuncAgentMsg::KillInstance { instance_id, reply } => {
            let result = kill_instance(state, &instance_id).await;
            let _ = reply.send(result);
        }
        FuncAgentMsg::SweepAgedPackages => {
            let aged = state.packages.sweep_aged(state.config.package_aging_sec);
            for package_id in aged {
                tracing::info!(%package_id, "aged code package evicted");
            }
        }
        FuncAgentMsg::HeartbeatTimeout { reply } => {
            // The actual re-registration call lives with the transport the
            // daemon wires in; this actor only owns the self-exit decision
            // once that attempt (reported back to it) has failed.
            state.terminated = true;
            tracing::warn!("function agent heartbeat to local scheduler lost, self-exiting");
            let _ = reply.send(true);
        }
        FuncAgentMsg::IsTerminated { reply } => {
            let _ = reply.send(state.terminated);
        }
    }
}

/// §4.5 DeployInstance flow: ensure the package is present (coalescing
/// concurrent downloads), then forward to the launcher.
async fn deploy_instance(state: &mut FuncAgentState, request: DeployRequest) -> Result<DeployOutcome, CoreError> {
    if state.terminated {
        return Err(CoreError::InnerSystemError(
            "function agent refuses further deploys: terminated after exclusive-instance kill".to_string(),
        ));
    }
    if let Some(holder) = &state.exclusive_holder {
        if *holder != request.instance_id {
            return Err(CoreError::ResourceNotEnough(format!(
                "agent is monopoly-held by instance {holder}, refusing deploy of {}",
                request.instance_id
            )));
        }
    }

    loop {
        match state.packages.admit_deploy(&request.package_id) {
            DeployAdmission::ReadyNow => break,
            DeployAdmission::YouDownload => {
                let downloader = state.downloader.clone();
                let package_id = request.package_id.clone();
                let outcome = download_with_retries(
                    || {
                        let downloader = downloader.clone();
                        let package_id = package_id.clone();
                        async move { downloader.download(&package_id).await }
                    },
                    state.config.max_download_retries,
                )
                .await;
                match outcome {
                    Ok(()) => {
                        state.packages.resolve_download(&request.package_id, DownloadStatus::Ready);
                        break;
                    }
                    Err(err) => {
                        state.packages.resolve_download(&request.package_id, DownloadStatus::Failed);
                        tracing::error!(package_id = %request.package_id, %err, "code package download exhausted retries");
                        return Ok(DeployOutcome::DownloadFailed);
                    }
                }
            }
            DeployAdmission::WaitForInFlight => {
                // Another deploy owns this download; yield and re-check.
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }

    let runtime_id = state.launcher.start_instance(&request.instance_id, &request.package_id).await?;

    state.packages.record_deployed(&request.package_id);
    if request.exclusive {
        state.exclusive_holder = Some(request.instance_id.clone());
    }
    state.deployed.insert(
        request.instance_id,
        DeployedInstance {
            package_id: request.package_id,
            exclusive: request.exclusive,
        },
    );

    Ok(DeployOutcome::Deployed { runtime_id })
}

/// §4.5 KillInstance flow: relay to the launcher, decrement the package
/// refcount, and — if this instance held exclusive access — terminate the
/// agent for further deploys.
async fn kill_instance(state: &mut FuncAgentState, instance_id: &InstanceId) -> Result<(), CoreError> {
    state.launcher.stop_instance(instance_id).await?;

    let Some(deployed) = state.deployed.remove(instance_id) else {
        return Ok(());
    };
    state.packages.record_killed(&deployed.package_id);

    if deployed.exclusive && state.exclusive_holder.as_ref() == Some(instance_id) {
        state.exclusive_holder = None;
        state.terminated = true;
        tracing::info!(%instance_id, "monopoly instance killed, agent self-exiting");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeLauncher {
        start_calls: AtomicU32,
    }

    #[async_trait]
    impl RuntimeLauncher for FakeLauncher {
        async fn start_instance(&self, instance_id: &InstanceId, _package_id: &str) -> Result<String, CoreError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("runtime-{instance_id}"))
        }

        async fn stop_instance(&self, _instance_id: &InstanceId) -> Result<(), CoreError> {
            Ok(())
        }
    }

    struct FakeDownloader {
        fails: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PackageDownloader for FakeDownloader {
        async fn download(&self, _package_id: &str) -> Result<(), CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                Err(CoreError::EtcdOperationError("network down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn handle_with(fails: bool) -> FuncAgentHandle {
        spawn_func_agent(
            16,
            Arc::new(FakeLauncher { start_calls: AtomicU32::new(0) }),
            Arc::new(FakeDownloader { fails, calls: AtomicU32::new(0) }),
            FuncAgentConfig { max_download_retries: 1, package_aging_sec: 3600 },
        )
    }

    #[tokio::test]
    async fn deploy_downloads_once_then_starts_the_runtime() {
        let handle = handle_with(false);
        let outcome = handle
            .ask(|reply| FuncAgentMsg::DeployInstance {
                request: DeployRequest {
                    instance_id: InstanceId::new("i1"),
                    package_id: "pkg-a".to_string(),
                    exclusive: false,
                },
                reply,
            })
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, DeployOutcome::Deployed { .. }));
    }

    #[tokio::test]
    async fn deploy_reports_download_failed_after_retries_exhausted() {
        let handle = handle_with(true);
        let outcome = handle
            .ask(|reply| FuncAgentMsg::DeployInstance {
                request: DeployRequest {
                    instance_id: InstanceId::new("i1"),
                    package_id: "pkg-a".to_string(),
                    exclusive: false,
                },
                reply,
            })
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, DeployOutcome::DownloadFailed));
    }

    #[tokio::test]
    async fn killing_the_exclusive_instance_terminates_the_agent() {
        let handle = handle_with(false);
        handle
            .ask(|reply| FuncAgentMsg::DeployInstance {
                request: DeployRequest {
                    instance_id: InstanceId::new("i1"),
                    package_id: "pkg-a".to_string(),
                    exclusive: true,
                },
                reply,
            })
            .await
            .unwrap()
            .unwrap();

        handle
            .ask(|reply| FuncAgentMsg::KillInstance { instance_id: InstanceId::new("i1"), reply })
            .await
            .unwrap()
            .unwrap();

        let terminated = handle.ask(|reply| FuncAgentMsg::IsTerminated { reply }).await.unwrap();
        assert!(terminated);

        let rejected = handle
            .ask(|reply| FuncAgentMsg::DeployInstance {
                request: DeployRequest {
                    instance_id: InstanceId::new("i2"),
                    package_id: "pkg-a".to_string(),
                    exclusive: false,
                },
                reply,
            })
            .await
            .unwrap();
        assert!(rejected.is_err());
    }

    #[tokio::test]
    async fn exclusive_agent_refuses_deploys_from_other_instances() {
        let handle = handle_with(false);
        handle
            .ask(|reply| FuncAgentMsg::DeployInstance {
                request: DeployRequest {
                    instance_id: InstanceId::new("i1"),
                    package_id: "pkg-a".to_string(),
                    exclusive: true,
                },
                reply,
            })
            .await
            .unwrap()
            .unwrap();

        let rejected = handle
            .ask(|reply| FuncAgentMsg::DeployInstance {
                request: DeployRequest {
                    instance_id: InstanceId::new("i2"),
                    package_id: "pkg-b".to_string(),
                    exclusive: false,
                },
                reply,
            })
            .await
            .unwrap();
        assert!(rejected.is_err());
    }
}
