//! SIGTERM/ctrl-c wait shared by every role (spec §6.4: "daemons terminate
//! on receipt of SIGTERM and complete in-flight bindings within a
//! configurable grace period"). The grace period itself is each actor's own
//! concern (draining its mailbox before the process exits); this just
//! blocks until a signal arrives.

pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = term.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = tokio::signal::ctrl_c() => tracing::info!("received ctrl-c, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c, shutting down");
    }
}
