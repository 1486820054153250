//! The link from a Function Agent down to its on-host runtime launcher
//! (spec §4.5). Kept as a trait, matching `yr_localsched::ParentLink`'s
//! shape, since the launcher (fork/exec of user code) is explicitly out of
//! scope (spec §1) — whoever wires the daemon together supplies the real
//! process-management implementation.

use async_trait::async_trait;

use yr_base::error::CoreError;
use yr_base::ids::InstanceId;

#[async_trait]
pub trait RuntimeLauncher: Send + Sync {
    /// Starts the runtime process for `instance_id` from the named
    /// package, returning a launcher-assigned runtime id on success.
    async fn start_instance(&self, instance_id: &InstanceId, package_id: &str) -> Result<String, CoreError>;

    async fn stop_instance(&self, instance_id: &InstanceId) -> Result<(), CoreError>;
}

/// Coalesced download of one code package (spec §4.5: "coalesce concurrent
/// downloads of the same artifact behind one promise").
#[async_trait]
pub trait PackageDownloader: Send + Sync {
    async fn download(&self, package_id: &str) -> Result<(), CoreError>;
}
