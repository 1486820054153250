//! Code-package bookkeeping (spec §4.5): ref-counted by deployed instance,
//! aged out after its refcount has been zero for longer than
//! `codePackageAgingSec` (spec §6.3). Download coalescing keys on the
//! package's content id: the first `DeployInstance` for a package triggers
//! the real download; concurrent arrivals for the same package queue
//! behind it instead of issuing their own.

use std::collections::HashMap;

use yr_base::error::CoreError;
use yr_base::revision::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Ready,
    Failed,
}

enum PackageState {
    Ready { refcount: u32, zero_since_ms: Option<i64> },
    /// A download is in flight; waiters are resolved by
    /// [`PackageCache::resolve_download`] once it completes.
    InFlight,
    Failed,
}

#[derive(Default)]
pub struct PackageCache {
    packages: HashMap<String, PackageState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAdmission {
    /// Package is ready; the caller may proceed straight to launching.
    ReadyNow,
    /// No other deploy is downloading this package; the caller owns the
    /// download and must call [`PackageCache::resolve_download`] when done.
    YouDownload,
    /// Another deploy is already downloading this package; the caller
    /// should wait and re-check once that download resolves.
    WaitForInFlight,
}

impl PackageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a deploy needs `package_id`, before incrementing its
    /// refcount (the refcount bump happens once the instance is actually
    /// recorded as deployed, via [`Self::record_deployed`]).
    pub fn admit_deploy(&mut self, package_id: &str) -> DeployAdmission {
        match self.packages.get(package_id) {
            Some(PackageState::Ready { .. }) => DeployAdmission::ReadyNow,
            Some(PackageState::InFlight) => DeployAdmission::WaitForInFlight,
            Some(PackageState::Failed) | None => {
                self.packages.insert(package_id.to_string(), PackageState::InFlight);
                DeployAdmission::YouDownload
            }
        }
    }

    /// The downloading caller reports the outcome; every other deploy
    /// waiting on this package observes it on its next `admit_deploy` call.
    pub fn resolve_download(&mut self, package_id: &str, status: DownloadStatus) {
        let state = match status {
            DownloadStatus::Ready => PackageState::Ready { refcount: 0, zero_since_ms: Some(now_millis()) },
            DownloadStatus::Failed => PackageState::Failed,
        };
        self.packages.insert(package_id.to_string(), state);
    }

    /// Records that an instance now holds a reference to `package_id`
    /// (spec §4.5: "record the instance in a deployment cache so the
    /// resource refcount for the package is tracked").
    pub fn record_deployed(&mut self, package_id: &str) {
        match self.packages.get_mut(package_id) {
            Some(PackageState::Ready { refcount, zero_since_ms }) => {
                *refcount += 1;
                *zero_since_ms = None;
            }
            _ => {
                self.packages.insert(
                    package_id.to_string(),
                    PackageState::Ready { refcount: 1, zero_since_ms: None },
                );
            }
        }
    }

    /// Decrements a package's refcount on kill; starts its aging clock the
    /// instant it reaches zero.
    pub fn record_killed(&mut self, package_id: &str) {
        if let Some(PackageState::Ready { refcount, zero_since_ms }) = self.packages.get_mut(package_id) {
            *refcount = refcount.saturating_sub(1);
            if *refcount == 0 {
                *zero_since_ms = Some(now_millis());
            }
        }
    }

    /// Removes every package whose refcount has been zero for at least
    /// `aging_sec`, returning their ids for the caller to log.
    pub fn sweep_aged(&mut self, aging_sec: u64) -> Vec<String> {
        let now = now_millis();
        let threshold_ms = (aging_sec as i64) * 1000;
        let aged: Vec<String> = self
            .packages
            .iter()
            .filter_map(|(id, state)| match state {
                PackageState::Ready { refcount: 0, zero_since_ms: Some(since) } if now - since >= threshold_ms => {
                    Some(id.clone())
                }
                _ => None,
            })
            .collect();
        for id in &aged {
            self.packages.remove(id);
        }
        aged
    }

    pub fn refcount(&self, package_id: &str) -> u32 {
        match self.packages.get(package_id) {
            Some(PackageState::Ready { refcount, .. }) => *refcount,
            _ => 0,
        }
    }
}

/// Bounded-retry wrapper around a single download attempt (spec §4.5:
/// "retry on transient download errors with bounded retries; on exhausted
/// retries report a specific error code").
pub async fn download_with_retries<F, Fut>(mut attempt: F, max_retries: u32) -> Result<(), CoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), CoreError>>,
{
    let mut last_error = CoreError::InnerSystemError("no download attempts made".to_string());
    for try_index in 0..=max_retries {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() => {
                last_error = err;
                tracing::warn!(attempt = try_index + 1, error = %last_error, "code package download failed, retrying");
            }
            Err(err) => return Err(err),
        }
    }
    Err(CoreError::EtcdOperationError(format!(
        "code package download exhausted {max_retries} retries: {last_error}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_deploy_owns_the_download_others_wait() {
        let mut cache = PackageCache::new();
        assert_eq!(cache.admit_deploy("pkg-a"), DeployAdmission::YouDownload);
        assert_eq!(cache.admit_deploy("pkg-a"), DeployAdmission::WaitForInFlight);
    }

    #[test]
    fn resolve_download_makes_package_ready_for_future_admits() {
        let mut cache = PackageCache::new();
        cache.admit_deploy("pkg-a");
        cache.resolve_download("pkg-a", DownloadStatus::Ready);
        assert_eq!(cache.admit_deploy("pkg-a"), DeployAdmission::ReadyNow);
    }

    #[test]
    fn refcount_tracks_deployed_and_killed_instances() {
        let mut cache = PackageCache::new();
        cache.admit_deploy("pkg-a");
        cache.resolve_download("pkg-a", DownloadStatus::Ready);
        cache.record_deployed("pkg-a");
        cache.record_deployed("pkg-a");
        assert_eq!(cache.refcount("pkg-a"), 2);

        cache.record_killed("pkg-a");
        assert_eq!(cache.refcount("pkg-a"), 1);
    }

    #[test]
    fn sweep_aged_only_removes_packages_zero_past_threshold() {
        let mut cache = PackageCache::new();
        cache.admit_deploy("pkg-a");
        cache.resolve_download("pkg-a", DownloadStatus::Ready);
        // refcount is already 0 with zero_since_ms set by resolve_download.
        let aged = cache.sweep_aged(0);
        assert_eq!(aged, vec!["pkg-a".to_string()]);
        assert_eq!(cache.refcount("pkg-a"), 0);
    }

    #[test]
    fn sweep_aged_leaves_still_referenced_packages() {
        let mut cache = PackageCache::new();
        cache.admit_deploy("pkg-a");
        cache.resolve_download("pkg-a", DownloadStatus::Ready);
        cache.record_deployed("pkg-a");
        let aged = cache.sweep_aged(0);
        assert!(aged.is_empty());
    }

    #[tokio::test]
    async fn download_with_retries_gives_up_after_budget() {
        let result = download_with_retries(
            || std::future::ready(Err(CoreError::EtcdOperationError("down".to_string()))),
            2,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn download_with_retries_returns_first_success() {
        let mut calls = 0;
        let result = download_with_retries(
            || {
                calls += 1;
                std::future::ready(if calls < 2 {
                    Err(CoreError::EtcdOperationError("transient".to_string()))
                } else {
                    Ok(())
                })
            },
            5,
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(calls, 2);
    }
}
