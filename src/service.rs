//! Actor that owns an [`Engine`] on a tokio task.
//!
//! All mutations go through one channel, so the engine keeps its
//! single-writer discipline while feeds, renderers and queries run
//! concurrently elsewhere. The loop also drives the engine's timers.

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::{Engine, IngestOutcome};
use crate::event::Event;

type Job = Box<dyn FnOnce(&mut Engine) + Send>;

enum Command {
    Ingest(Event, oneshot::Sender<IngestOutcome>),
    Run(Job),
    Shutdown(oneshot::Sender<usize>),
}

/// Cloneable handle to a running engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

/// Move `engine` onto a new task and return a handle plus the task itself.
pub fn spawn(engine: Engine) -> (EngineHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1024);
    let task = tokio::spawn(run(engine, rx));
    (EngineHandle { tx }, task)
}

async fn run(mut engine: Engine, mut rx: mpsc::Receiver<Command>) {
    loop {
        let wait = engine.next_deadline();
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Ingest(event, reply)) => {
                    let _ = reply.send(engine.ingest(event));
                }
                Some(Command::Run(job)) => job(&mut engine),
                Some(Command::Shutdown(reply)) => {
                    let flushed = engine.shutdown();
                    info!(flushed, "engine stopped");
                    let _ = reply.send(flushed);
                    break;
                }
                None => {
                    debug!("all engine handles dropped");
                    engine.shutdown();
                    break;
                }
            },
            _ = tokio::time::sleep(wait) => engine.poll(),
        }
    }
}

impl EngineHandle {
    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| anyhow!("engine task has stopped"))
    }

    pub async fn ingest(&self, event: Event) -> Result<IngestOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Ingest(event, tx)).await?;
        rx.await.map_err(|_| anyhow!("engine task has stopped"))
    }

    /// Run `f` against the engine on its task and return the result.
    pub async fn query<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Engine) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Run(Box::new(move |engine| {
            let _ = tx.send(f(engine));
        })))
        .await?;
        rx.await.map_err(|_| anyhow!("engine task has stopped"))
    }

    /// Resolution signal: `id` has been rendered, replay its reactions.
    pub async fn process_pending_reactions(&self, id: &str) -> Result<usize> {
        let id = id.to_string();
        self.query(move |engine| engine.process_pending_reactions(&id))
            .await
    }

    /// Force the final flush and stop the task.
    pub async fn shutdown(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| anyhow!("engine task has stopped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::event::fixtures::{hex_id, note, reaction};
    use crate::persist::MemoryStore;
    use crate::time::SystemClock;
    use std::{sync::Arc, time::Duration};

    fn start(debounce_ms: u64) -> (EngineHandle, JoinHandle<()>, Arc<MemoryStore>) {
        let sink = Arc::new(MemoryStore::default());
        let config = EngineConfig {
            reaction_debounce: Duration::from_millis(debounce_ms),
            ..EngineConfig::default()
        };
        let engine = Engine::new(config, Arc::new(SystemClock), sink.clone());
        let (handle, task) = spawn(engine);
        (handle, task, sink)
    }

    #[tokio::test]
    async fn timer_flushes_batched_reactions() {
        let (handle, _task, sink) = start(50);
        handle.ingest(note("a", "alice", 1, vec![])).await.unwrap();
        for i in 0..3 {
            handle
                .ingest(reaction(&format!("r{i}"), "a", "+"))
                .await
                .unwrap();
        }
        assert!(sink.reaction_writes().is_empty());
        tokio::time::sleep(Duration::from_millis(300)).await;
        let writes = sink.reaction_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.like_count, 3);
    }

    #[tokio::test]
    async fn queries_and_shutdown() {
        let (handle, task, sink) = start(60_000);
        let outcome = handle.ingest(reaction("r1", "a", "+")).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored(_)));
        let counted = handle
            .query(|engine| engine.set_title(&hex_id("a"), "A"))
            .await
            .unwrap();
        assert_eq!(counted, 1);
        assert_eq!(handle.process_pending_reactions(&hex_id("a")).await.unwrap(), 0);
        let likes = handle
            .query(|engine| engine.get_reaction_stats(&hex_id("a")).map(|r| r.like_count))
            .await
            .unwrap();
        assert_eq!(likes, Some(1));
        assert_eq!(handle.shutdown().await.unwrap(), 1);
        task.await.unwrap();
        assert_eq!(sink.reaction_writes().len(), 1);
        assert!(handle.ingest(note("b", "bob", 1, vec![])).await.is_err());
    }
}
