//! Child-side heartbeat observer (spec §4.2): sends a ping to the parent
//! every `ping_interval_ms / 2` and expects a pong within `ping_interval_ms`.
//! Two consecutive missed pongs fire the timeout callback exactly once,
//! then the observer stops until [`HeartbeatObserver::restart`] is called
//! (typically after a successful re-registration).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use yr_base::error::CoreError;

/// Sends a ping to the parent and waits for the matching pong. Implementors
/// own the actual transport (the `-PingPong` channel of spec §6.2); this
/// crate only owns the interval/timeout/callback bookkeeping around it.
#[async_trait]
pub trait PingTransport: Send + Sync {
    async fn ping(&self) -> Result<(), CoreError>;
}

pub struct HeartbeatObserverConfig {
    pub ping_interval_ms: u64,
}

impl Default for HeartbeatObserverConfig {
    fn default() -> Self {
        // heartbeatTimeoutMs defaults to 2x the ping interval (spec §6.3).
        Self { ping_interval_ms: 1000 }
    }
}

/// Runs the observer loop on the current task set via [`tokio::spawn`].
/// `on_timeout` is called at most once per spawned observer, after two
/// consecutive missed pongs, and receives no further ticks afterward.
pub fn spawn_observer<T, F>(
    transport: Arc<T>,
    config: HeartbeatObserverConfig,
    on_timeout: F,
) -> ObserverHandle
where
    T: PingTransport + 'static,
    F: Fn() + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_task = stop.clone();
    let restarted = Arc::new(Notify::new());
    let restarted_for_task = restarted.clone();

    tokio::spawn(async move {
        let half_interval = Duration::from_millis(config.ping_interval_ms / 2);
        let pong_deadline = Duration::from_millis(config.ping_interval_ms);

        loop {
            let mut consecutive_misses = 0u32;
            loop {
                if stop_for_task.load(Ordering::SeqCst) {
                    return;
                }
                tokio::time::sleep(half_interval).await;
                match tokio::time::timeout(pong_deadline, transport.ping()).await {
                    Ok(Ok(())) => {
                        consecutive_misses = 0;
                    }
                    _ => {
                        consecutive_misses += 1;
                        tracing::debug!(consecutive_misses, "missed pong from parent");
                        if consecutive_misses >= 2 {
                            on_timeout();
                            break;
                        }
                    }
                }
            }
            // Wait to be restarted (e.g. after re-registration) or stopped.
            tokio::select! {
                _ = restarted_for_task.notified() => {}
                () = async {
                    loop {
                        if stop_for_task.load(Ordering::SeqCst) {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                } => return,
            }
        }
    });

    ObserverHandle { stop, restarted }
}

pub struct ObserverHandle {
    stop: Arc<AtomicBool>,
    restarted: Arc<Notify>,
}

impl ObserverHandle {
    pub fn restart(&self) {
        self.restarted.notify_one();
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.restarted.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct AlwaysFails;

    #[async_trait]
    impl PingTransport for AlwaysFails {
        async fn ping(&self) -> Result<(), CoreError> {
            Err(CoreError::InnerCommunication("unreachable".to_string()))
        }
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl PingTransport for AlwaysSucceeds {
        async fn ping(&self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fires_timeout_after_two_consecutive_misses() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = fired.clone();
        let handle = spawn_observer(
            Arc::new(AlwaysFails),
            HeartbeatObserverConfig { ping_interval_ms: 20 },
            move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop();
        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn healthy_transport_never_fires_timeout() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = fired.clone();
        let handle = spawn_observer(
            Arc::new(AlwaysSucceeds),
            HeartbeatObserverConfig { ping_interval_ms: 20 },
            move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
