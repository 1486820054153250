//! A small actor-mailbox runtime. Spec §5 models every component as "a
//! single-threaded cooperative entity with a mailbox of typed messages";
//! the idiomatic Rust shape for that is a `tokio::sync::mpsc` channel owned
//! by a spawned task that drains it serially, with `oneshot` channels for
//! request/response. This module is that shape, generic over the message
//! enum each component defines for itself.

use std::future::Future;
use tokio::sync::{mpsc, oneshot};

use crate::error::CoreError;

/// The sender half of a reply channel, attached to a request message so the
/// actor's handler can answer it.
pub type Reply<T> = oneshot::Sender<T>;

/// A handle to a running actor. Cloning it is cheap (it's just a channel
/// sender) and is how sibling actors hold references to each other.
#[derive(Debug)]
pub struct ActorHandle<M> {
    tx: mpsc::Sender<M>,
}

impl<M> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + 'static> ActorHandle<M> {
    /// Fire-and-forget send. Ordering guarantee per §5: messages from the
    /// same sender arrive in send order.
    pub async fn tell(&self, msg: M) -> Result<(), CoreError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| CoreError::InnerCommunication("actor mailbox closed".into()))
    }

    /// Send a message and await a typed reply. `make_msg` receives the
    /// reply sender so the caller doesn't need to know the message enum's
    /// exact reply-field name.
    pub async fn ask<R>(&self, make_msg: impl FnOnce(Reply<R>) -> M) -> Result<R, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.tell(make_msg(tx)).await?;
        rx.await.map_err(CoreError::from)
    }

    pub fn mailbox_len_hint(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Spawn an actor owning `state`, draining `rx` serially through `handler`.
/// The handler sees `&mut state` so the actor's internal state needs no
/// further locking (§5) — concurrent actors each own their own state, and
/// cross-actor calls go back out through an [`ActorHandle`].
pub fn spawn_actor<S, M, F, Fut>(mailbox_size: usize, mut state: S, mut handler: F) -> ActorHandle<M>
where
    S: Send + 'static,
    M: Send + 'static,
    F: FnMut(&mut S, M) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (tx, mut rx) = mpsc::channel(mailbox_size);
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            handler(&mut state, msg).await;
        }
    });
    ActorHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Msg {
        Add(i64, Reply<i64>),
    }

    #[tokio::test]
    async fn ask_round_trips_through_serial_handler() {
        let handle: ActorHandle<Msg> = spawn_actor(8, 0i64, |state, msg| {
            match msg {
                Msg::Add(n, reply) => {
                    *state += n;
                    let _ = reply.send(*state);
                }
            }
            std::future::ready(())
        });

        let a = handle.ask(|reply| Msg::Add(3, reply)).await.unwrap();
        let b = handle.ask(|reply| Msg::Add(4, reply)).await.unwrap();
        assert_eq!(a, 3);
        assert_eq!(b, 7);
    }
}
