//! Function Agent: per-worker bridge between a Local Scheduler and the
//! on-host runtime launcher (spec §4.5). Code-package download coalescing,
//! refcounting, and aging sweep; launcher process management itself is out
//! of scope (spec §1) and is reached through the [`RuntimeLauncher`] trait.

mod agent;
mod launcher;
mod package_cache;

pub use agent::{
    spawn_func_agent, DeployOutcome, DeployRequest, FuncAgentConfig, FuncAgentHandle, FuncAgentMsg,
};
pub use launcher::{PackageDownloader, RuntimeLauncher};
pub use package_cache::{DeployAdmission, DownloadStatus, PackageCache};
