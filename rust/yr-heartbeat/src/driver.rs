//! Parent-side heartbeat driver (spec §4.2): tracks `first-ping` from each
//! registered child and declares a child dead once its heartbeat stops for
//! two consecutive intervals, firing a timeout callback exactly once per
//! child (spec invariant 9).

use std::collections::HashMap;
use std::time::Duration;

use yr_base::actor::{spawn_actor, ActorHandle, Reply};
use yr_base::revision::now_millis;

enum ChildState {
    /// Has pinged at least once; `last_ping_ms` drives the timeout check.
    Alive { last_ping_ms: i64 },
    /// Already reported dead; suppresses duplicate callbacks.
    TimedOut,
}

struct Child {
    state: ChildState,
}

pub enum DriverMsg {
    RecordPing { name: String },
    Register { name: String },
    Unregister { name: String },
    /// Runs the timeout sweep; `reply` carries the children that just
    /// crossed the timeout threshold on this call (never repeats a name).
    CheckTimeouts { reply: Reply<Vec<String>> },
}

pub type DriverHandle = ActorHandle<DriverMsg>;

struct DriverState {
    children: HashMap<String, Child>,
    timeout_ms: i64,
}

pub fn spawn_driver(mailbox_size: usize, ping_interval_ms: u64) -> DriverHandle {
    let state = DriverState {
        children: HashMap::new(),
        // heartbeatTimeoutMs defaults to 2x the ping interval (spec §6.3).
        timeout_ms: (ping_interval_ms * 2) as i64,
    };
    spawn_actor(mailbox_size, state, |state, msg| handle(state, msg))
}

/// Spawns a background ticker that periodically asks the driver to sweep
/// for timed-out children and invokes `on_timeout` for each one.
pub fn spawn_timeout_sweeper<F>(handle: DriverHandle, interval_ms: u64, on_timeout: F)
where
    F: Fn(String) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            match handle.ask(|reply| DriverMsg::CheckTimeouts { reply }).await {
                Ok(timed_out) => {
                    for name in timed_out {
                        on_timeout(name);
                    }
                }
                Err(_) => break,
            }
        }
    });
}

async fn handle(state: &mut DriverState, msg: DriverMsg) {
    match msg {
        DriverMsg::Register { name } => {
            state.children.insert(
                name,
                Child {
                    state: ChildState::Alive {
                        last_ping_ms: now_millis(),
                    },
                },
            );
        }
        DriverMsg::Unregister { name } => {
            state.children.remove(&name);
        }
        DriverMsg::RecordPing { name } => {
            if let Some(child) = state.children.get_mut(&name) {
                child.state = ChildState::Alive {
                    last_ping_ms: now_millis(),
                };
            }
        }
        DriverMsg::CheckTimeouts { reply } => {
            let now = now_millis();
            let mut newly_timed_out = Vec::new();
            for (name, child) in state.children.iter_mut() {
                if let ChildState::Alive { last_ping_ms } = child.state {
                    if now - last_ping_ms >= state.timeout_ms {
                        child.state = ChildState::TimedOut;
                        newly_timed_out.push(name.clone());
                    }
                }
            }
            let _ = reply.send(newly_timed_out);
        }
    }
}
