use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info};

use super::{CheckpointError, CheckpointStore, Checkpoints};
use crate::{
    alert::{Alert, Alerter},
    retry::Backoff,
    types::{MarketKey, SeqNum},
};

/// Persistence policy of the background writer.
#[derive(Clone, Copy, Debug)]
pub struct WriterPolicy {
    /// Timeout of a single save attempt.
    pub timeout: Duration,
    pub backoff: Backoff,
}

impl Default for WriterPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            backoff: Backoff::default(),
        }
    }
}

/// In-memory checkpoints with asynchronous persistence.
///
/// Commits update the in-memory mapping immediately and never wait for the
/// store. A background task persists the latest mapping after every change,
/// intermediate states may be skipped but a save never writes an older
/// mapping than a previous one.
#[derive(Debug)]
pub struct CheckpointWriter {
    state: watch::Sender<Checkpoints>,
    close: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CheckpointWriter {
    /// Starts the writer task persisting to `store`.
    pub fn spawn(
        initial: Checkpoints,
        store: Arc<dyn CheckpointStore>,
        alerter: Arc<dyn Alerter>,
        policy: WriterPolicy,
    ) -> Self {
        let (state, rx) = watch::channel(initial);
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(persist_loop(rx, close_rx, store, alerter, policy));

        Self {
            state,
            close: Mutex::new(Some(close_tx)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Writer keeping checkpoints in memory only.
    pub fn detached(initial: Checkpoints) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            close: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn get(&self, market: &MarketKey) -> Option<SeqNum> {
        self.state.borrow().get(market)
    }

    pub fn snapshot(&self) -> Checkpoints {
        self.state.borrow().clone()
    }

    /// Records `seq_num` as the last committed sequence number of the market.
    pub fn commit(&self, market: MarketKey, seq_num: SeqNum) {
        self.state.send_modify(|checkpoints| checkpoints.set(market, seq_num));
    }

    /// Persists the latest unsaved mapping and stops the writer task.
    pub async fn shutdown(&self) {
        if let Some(close) = self.close.lock().await.take() {
            let _ = close.send(());
        }
        if let Some(task) = self.task.lock().await.take()
            && let Err(err) = task.await
        {
            error!(%err, "checkpoint writer task failed");
        }
    }
}

async fn persist_loop(
    mut rx: watch::Receiver<Checkpoints>,
    mut close: oneshot::Receiver<()>,
    store: Arc<dyn CheckpointStore>,
    alerter: Arc<dyn Alerter>,
    policy: WriterPolicy,
) {
    let mut saved = Some(rx.borrow_and_update().clone());

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut close => break,
        }
        rx.mark_unchanged();
        saved = persist(&rx, store.as_ref(), alerter.as_ref(), policy).await;
    }

    let unsaved = saved.as_ref() != Some(&*rx.borrow());
    if unsaved {
        saved = persist(&rx, store.as_ref(), alerter.as_ref(), policy).await;
    }
    info!(flushed = saved.is_some(), "checkpoint writer stopped");
}

/// Saves the latest mapping, returns it on success.
async fn persist(
    rx: &watch::Receiver<Checkpoints>,
    store: &dyn CheckpointStore,
    alerter: &dyn Alerter,
    policy: WriterPolicy,
) -> Option<Checkpoints> {
    let result = policy
        .backoff
        .retry("checkpoint save", |_| {
            let snapshot = rx.borrow().clone();
            async move {
                match tokio::time::timeout(policy.timeout, store.save(&snapshot)).await {
                    Ok(Ok(())) => Ok(snapshot),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(CheckpointError::Timeout),
                }
            }
        })
        .await;

    match result {
        Ok(snapshot) => {
            debug!(markets = snapshot.len(), "checkpoints saved");
            Some(snapshot)
        }
        Err(err) => {
            error!(%err, "checkpoint save failed, retry budget exhausted");
            alerter.notify(Alert::CheckpointFailed {
                error: err.to_string(),
            });
            None
        }
    }
}
