//! Ordered event actor
//!
//! Host callbacks arrive from many places. [`EngineHandle`] funnels them into
//! one channel drained by a single task that owns the [`Engine`], so events
//! are handled one at a time in delivery order and a handler never observes
//! a half-applied update from another.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::{EngineMessage, EngineReply, HostEvent, Outcome};

enum Command {
    Dispatch(EngineMessage, oneshot::Sender<EngineReply>),
    Shutdown,
}

/// Cloneable handle to an engine running on its own task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    /// Move `engine` onto a task. The join handle yields the engine back
    /// after shutdown, or once every handle has been dropped.
    pub fn spawn(engine: Engine) -> (Self, JoinHandle<Engine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(engine, rx));
        (Self { tx }, task)
    }

    pub async fn send(&self, message: EngineMessage) -> Result<EngineReply, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Dispatch(message, reply_tx))
            .map_err(|_| EngineError::ShutDown)?;
        reply_rx.await.map_err(|_| EngineError::NoReply)
    }

    pub async fn handle_event(&self, event: HostEvent) -> Result<Outcome, EngineError> {
        match self.send(EngineMessage::Event(event)).await? {
            EngineReply::Outcome(outcome) => Ok(outcome),
            _ => Err(EngineError::NoReply),
        }
    }

    /// Ask the engine to tear down after the messages already queued.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.tx.send(Command::Shutdown).map_err(|_| EngineError::ShutDown)
    }
}

async fn run(mut engine: Engine, mut rx: mpsc::UnboundedReceiver<Command>) -> Engine {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Dispatch(message, reply) => {
                let response = engine.handle_message(message);
                if reply.send(response).is_err() {
                    log::debug!("engine reply dropped by caller");
                }
            }
            Command::Shutdown => break,
        }
    }
    engine.shutdown();
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::{NavigationDetails, Notice, TabRemoval};
    use crate::services::Services;
    use crate::types::TabId;

    fn spawn() -> (EngineHandle, JoinHandle<Engine>) {
        EngineHandle::spawn(Engine::new(EngineConfig::default(), Services::in_memory()))
    }

    #[tokio::test]
    async fn test_events_handled_in_order() {
        let (handle, task) = spawn();
        let outcome = handle
            .handle_event(HostEvent::BeforeNavigate(NavigationDetails::main_frame(
                TabId(1),
                "https://example.com/",
                0,
            )))
            .await
            .unwrap();
        assert!(matches!(outcome.notices.as_slice(), [Notice::TabChanged(_)]));

        handle
            .handle_event(HostEvent::TabRemoved(TabRemoval { tab_id: TabId(1) }))
            .await
            .unwrap();
        assert_eq!(handle.send(EngineMessage::GetTab(TabId(1))).await.unwrap(), EngineReply::Tab(None));

        handle.shutdown().unwrap();
        let engine = task.await.unwrap();
        assert!(engine.tabs().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_senders_share_one_engine() {
        let (handle, task) = spawn();
        let mut joins = Vec::new();
        for tab in 0..8 {
            let handle = handle.clone();
            joins.push(tokio::spawn(async move {
                handle
                    .handle_event(HostEvent::BeforeNavigate(NavigationDetails::main_frame(
                        TabId(tab),
                        "https://example.com/",
                        0,
                    )))
                    .await
            }));
        }
        for join in joins {
            join.await.unwrap().unwrap();
        }

        match handle.send(EngineMessage::ListTabs).await.unwrap() {
            EngineReply::Tabs(tabs) => assert_eq!(tabs.len(), 8),
            other => panic!("unexpected reply {other:?}"),
        }

        drop(handle);
        let engine = task.await.unwrap();
        assert!(engine.tabs().is_empty());
    }

    #[tokio::test]
    async fn test_send_after_shutdown_fails() {
        let (handle, task) = spawn();
        handle.shutdown().unwrap();
        task.await.unwrap();
        assert_eq!(handle.send(EngineMessage::ListTabs).await, Err(EngineError::ShutDown));
    }
}
