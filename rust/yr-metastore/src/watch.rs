//! Watch service actor (spec §4.1 "Watch", "Watch fan-out cache").
//!
//! Keeps a prefix-keyed observer cache and a separate single-key index, so a
//! point watch doesn't pay the cost of a prefix scan and a prefix watch's
//! fan-out stays
//! `O(matching-prefixes + matching-strict-watchers)` rather than scanning
//! every live watcher.

use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

use yr_base::actor::{spawn_actor, ActorHandle, Reply};
use yr_base::error::CoreError;

use crate::types::{KeyRange, WatchEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchId(pub u64);

struct Watcher {
    range: KeyRange,
    start_revision: i64,
    include_prev_kv: bool,
    sender: mpsc::Sender<WatchEvent>,
}

#[derive(Default)]
struct WatchState {
    next_id: u64,
    watchers: HashMap<WatchId, Watcher>,
    /// prefix -> watcher ids registered on that exact prefix string.
    prefix_index: BTreeMap<String, Vec<WatchId>>,
    /// key -> watcher ids registered as a single-key watch on that key.
    single_index: BTreeMap<String, Vec<WatchId>>,
}

pub enum WatchMsg {
    Create {
        range: KeyRange,
        start_revision: i64,
        include_prev_kv: bool,
        reply: Reply<(WatchId, mpsc::Receiver<WatchEvent>)>,
    },
    Cancel {
        id: WatchId,
        reason: String,
    },
    /// Fire-and-forget notification from the KV actor after a commit. Events
    /// must already be sorted by (mod_revision, key) per spec's batching
    /// rule.
    Publish(Vec<WatchEvent>),
}

pub type WatchHandle = ActorHandle<WatchMsg>;

pub fn spawn_watch_actor(mailbox_size: usize) -> WatchHandle {
    spawn_actor(mailbox_size, WatchState::default(), |state, msg| {
        let fut = async move {
            handle(state, msg).await;
        };
        fut
    })
}

async fn handle(state: &mut WatchState, msg: WatchMsg) {
    match msg {
        WatchMsg::Create {
            range,
            start_revision,
            include_prev_kv,
            reply,
        } => {
            let id = WatchId(state.next_id);
            state.next_id += 1;
            let (tx, rx) = mpsc::channel(128);
            match &range {
                KeyRange::Single(k) => state.single_index.entry(k.clone()).or_default().push(id),
                KeyRange::Prefix(p) => state.prefix_index.entry(p.clone()).or_default().push(id),
            }
            state.watchers.insert(
                id,
                Watcher {
                    range,
                    start_revision,
                    include_prev_kv,
                    sender: tx,
                },
            );
            let _ = reply.send((id, rx));
        }
        WatchMsg::Cancel { id, reason } => {
            cancel_watcher(state, id, reason).await;
        }
        WatchMsg::Publish(events) => {
            for event in events {
                publish_event(state, event).await;
            }
        }
    }
}

async fn cancel_watcher(state: &mut WatchState, id: WatchId, reason: String) {
    if let Some(watcher) = state.watchers.remove(&id) {
        let _ = watcher
            .sender
            .send(WatchEvent::Canceled { reason })
            .await;
        match &watcher.range {
            KeyRange::Single(k) => remove_from_index(&mut state.single_index, k, id),
            KeyRange::Prefix(p) => remove_from_index(&mut state.prefix_index, p, id),
        }
    }
}

fn remove_from_index(index: &mut BTreeMap<String, Vec<WatchId>>, key: &str, id: WatchId) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| *existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

async fn publish_event(state: &mut WatchState, event: WatchEvent) {
    let key = event.key().to_string();
    let revision = event.mod_revision();

    let mut candidates: Vec<WatchId> = Vec::new();
    if let Some(ids) = state.single_index.get(&key) {
        candidates.extend(ids.iter().copied());
    }
    for (prefix, ids) in state.prefix_index.range(..=key.clone()) {
        if key.starts_with(prefix.as_str()) {
            candidates.extend(ids.iter().copied());
        }
    }

    let mut dead: Vec<WatchId> = Vec::new();
    for id in candidates {
        let Some(watcher) = state.watchers.get(&id) else {
            continue;
        };
        if revision < watcher.start_revision || !watcher.range.matches(&key) {
            continue;
        }
        let to_send = if watcher.include_prev_kv {
            event.clone()
        } else {
            strip_prev_kv(event.clone())
        };
        if watcher.sender.send(to_send).await.is_err() {
            dead.push(id);
        }
    }
    for id in dead {
        cancel_watcher(state, id, "client link lost".to_string()).await;
    }
}

fn strip_prev_kv(event: WatchEvent) -> WatchEvent {
    match event {
        WatchEvent::Put { kv, .. } => WatchEvent::Put { kv, prev_kv: None },
        WatchEvent::Delete { kv, .. } => WatchEvent::Delete { kv, prev_kv: None },
        other => other,
    }
}

pub async fn create_watch(
    handle: &WatchHandle,
    range: KeyRange,
    start_revision: i64,
    include_prev_kv: bool,
) -> Result<(WatchId, mpsc::Receiver<WatchEvent>), CoreError> {
    handle
        .ask(|reply| WatchMsg::Create {
            range,
            start_revision,
            include_prev_kv,
            reply,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyValue;

    fn kv(key: &str, rev: i64) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: b"v".to_vec(),
            create_revision: rev,
            mod_revision: rev,
            version: 1,
            lease_id: 0,
        }
    }

    #[tokio::test]
    async fn prefix_watch_receives_matching_puts_only() {
        let handle = spawn_watch_actor(16);
        let (_, mut rx) = create_watch(&handle, KeyRange::Prefix("/sn/".into()), 0, false)
            .await
            .unwrap();

        handle
            .tell(WatchMsg::Publish(vec![
                WatchEvent::Put {
                    kv: kv("/sn/a", 1),
                    prev_kv: None,
                },
                WatchEvent::Put {
                    kv: kv("/yr/b", 2),
                    prev_kv: None,
                },
            ]))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.key(), "/sn/a");
        // the /yr/b put must not show up on this watcher.
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn events_before_start_revision_are_not_delivered() {
        let handle = spawn_watch_actor(16);
        let (_, mut rx) = create_watch(&handle, KeyRange::Single("/k".into()), 5, false)
            .await
            .unwrap();

        handle
            .tell(WatchMsg::Publish(vec![WatchEvent::Put {
                kv: kv("/k", 3),
                prev_kv: None,
            }]))
            .await
            .unwrap();
        handle
            .tell(WatchMsg::Publish(vec![WatchEvent::Put {
                kv: kv("/k", 6),
                prev_kv: None,
            }]))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.mod_revision(), 6);
    }

    #[tokio::test]
    async fn cancel_sends_final_canceled_event() {
        let handle = spawn_watch_actor(16);
        let (id, mut rx) = create_watch(&handle, KeyRange::Single("/k".into()), 0, false)
            .await
            .unwrap();
        handle
            .tell(WatchMsg::Cancel {
                id,
                reason: "done".into(),
            })
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            WatchEvent::Canceled { reason } => assert_eq!(reason, "done"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }
}
