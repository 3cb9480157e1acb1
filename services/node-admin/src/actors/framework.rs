//! Core actor framework types and traits.
//!
//! Provides the building blocks the node agents run on:
//! - `Actor` trait for defining actor behavior
//! - `ActorHandle` for sending messages to actors
//! - `Supervisor` for spawning and stopping keyed actors

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// =============================================================================
// Core Traits
// =============================================================================

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// The Actor trait defines behavior for an actor.
///
/// Actors:
/// - Process messages and ticks one at a time (no internal concurrency)
/// - Own mutable state not shared with other actors
/// - Communicate only via message passing
///
/// Hooks cannot fail. An actor that can hit errors keeps them in its own
/// state and retries on a later tick.
#[async_trait]
pub trait Actor: Send + 'static {
    /// The message type this actor handles.
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Handle a single message. Returns false to stop the actor.
    async fn handle(&mut self, msg: Self::Message, ctx: &mut ActorContext) -> bool;

    /// Period of `on_tick`, or `None` for a purely message-driven actor.
    ///
    /// The first tick fires as soon as the actor has started.
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    /// Periodic work.
    async fn on_tick(&mut self, _ctx: &mut ActorContext) {}

    /// Called when the actor starts.
    async fn on_start(&mut self, _ctx: &mut ActorContext) {}

    /// Called when the actor is about to stop.
    async fn on_stop(&mut self, _ctx: &mut ActorContext) {}
}

/// Context provided to actors during message handling.
pub struct ActorContext {
    /// Actor's unique ID.
    pub actor_id: String,

    /// Messages handled so far.
    pub messages_processed: u64,

    /// Ticks run so far.
    pub ticks: u64,
}

impl ActorContext {
    /// Create a new actor context.
    pub fn new(actor_id: String) -> Self {
        Self {
            actor_id,
            messages_processed: 0,
            ticks: 0,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors delivering a message to an actor.
#[derive(Debug, Error)]
pub enum ActorError {
    /// Actor mailbox is full.
    #[error("mailbox full")]
    MailboxFull,

    /// Actor has stopped.
    #[error("actor stopped")]
    ActorStopped,
}

// =============================================================================
// Actor Handle
// =============================================================================

/// Handle for sending messages to an actor.
pub struct ActorHandle<M: Message> {
    tx: mpsc::Sender<M>,
}

// Derived Clone would require `M: Clone`.
impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Message> ActorHandle<M> {
    /// Try to send a message without blocking.
    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ActorError::MailboxFull,
            mpsc::error::TrySendError::Closed(_) => ActorError::ActorStopped,
        })
    }
}

/// Type-erased actor reference for supervision.
pub struct ActorRef {
    pub actor_id: String,
    task_handle: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ActorRef {
    /// Signal the actor to stop after its current message or tick.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Check if the actor task is still running.
    pub fn is_running(&self) -> bool {
        !self.task_handle.is_finished()
    }

    /// Wait for the actor task to finish.
    pub async fn join(self) {
        if let Err(e) = self.task_handle.await {
            error!(actor_id = %self.actor_id, error = %e, "Actor task panicked");
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Owns a set of actors, at most one per key.
///
/// Stopping never aborts a task: the supervisor signals shutdown and waits for
/// the actor to finish whatever it is doing.
pub struct Supervisor<K> {
    children: HashMap<K, ActorRef>,
}

impl<K> Default for Supervisor<K> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
        }
    }
}

impl<K> Supervisor<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an actor under `key`.
    ///
    /// An actor already registered under `key` is signalled to stop and
    /// detached.
    pub fn spawn<A>(&mut self, key: K, actor: A, mailbox_size: usize) -> ActorHandle<A::Message>
    where
        A: Actor,
    {
        let actor_type = actor.name().to_string();
        let actor_id = format!("{actor_type}_{key}");
        let (tx, rx) = mpsc::channel(mailbox_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task_handle = tokio::spawn(run_actor_loop(actor, rx, shutdown_rx, actor_id.clone()));

        let actor_ref = ActorRef {
            actor_id: actor_id.clone(),
            task_handle,
            shutdown_tx,
        };

        if let Some(previous) = self.children.insert(key, actor_ref) {
            warn!(actor_id = %previous.actor_id, "Replacing actor, stopping previous instance");
            previous.stop();
        }

        info!(actor_id = %actor_id, actor_type = %actor_type, "Spawned actor");

        ActorHandle { tx }
    }

    /// Stop the actor under `key` and wait for it to finish.
    ///
    /// Returns false if no actor was registered under `key`.
    pub async fn stop(&mut self, key: &K) -> bool {
        let Some(child) = self.children.remove(key) else {
            return false;
        };
        child.stop();
        child.join().await;
        true
    }

    /// Stop all supervised actors and wait for them to finish.
    pub async fn stop_all(&mut self) {
        info!(count = self.children.len(), "Stopping all actors");

        let children: Vec<ActorRef> = self.children.drain().map(|(_, child)| child).collect();
        for child in &children {
            child.stop();
        }
        for child in children {
            child.join().await;
        }
    }

    /// Whether the actor under `key` is still running.
    pub fn is_running(&self, key: &K) -> bool {
        self.children.get(key).is_some_and(ActorRef::is_running)
    }
}

// =============================================================================
// Actor Loop
// =============================================================================

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Run the main actor loop.
async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    mut shutdown: watch::Receiver<bool>,
    actor_id: String,
) {
    let mut ctx = ActorContext::new(actor_id);

    actor.on_start(&mut ctx).await;

    let mut ticker = actor.tick_interval().map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    debug!(actor_id = %ctx.actor_id, "Actor started");

    loop {
        tokio::select! {
            biased;

            // Check shutdown first
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(actor_id = %ctx.actor_id, "Actor received shutdown signal");
                    break;
                }
            }

            msg = rx.recv() => {
                let Some(msg) = msg else {
                    debug!(actor_id = %ctx.actor_id, "Actor mailbox closed");
                    break;
                };
                ctx.messages_processed += 1;

                if !actor.handle(msg, &mut ctx).await {
                    info!(actor_id = %ctx.actor_id, "Actor requested stop");
                    break;
                }
            }

            _ = next_tick(&mut ticker) => {
                ctx.ticks += 1;
                actor.on_tick(&mut ctx).await;
            }
        }
    }

    actor.on_stop(&mut ctx).await;

    info!(
        actor_id = %ctx.actor_id,
        messages_processed = ctx.messages_processed,
        ticks = ctx.ticks,
        "Actor stopped"
    );
}

// =============================================================================
// Tests
// =============================================================================
