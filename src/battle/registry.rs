//! The run registry: id -> state plus a per-run FIFO update queue.
//!
//! The registry is an explicit, injectable store rather than process-global
//! state, so tests can run several independent orchestrators side by side.
//! Each run's state is written only by its own pipeline task; readers get
//! consistent snapshots through the lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::Stream;
use log::{info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use super::stage::ProgressEvent;
use super::state::{BattleConfig, BattleState};

/// How long the stream waits for an update before emitting a heartbeat.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

struct BattleEntry {
    state: Arc<RwLock<BattleState>>,
    tx: UnboundedSender<ProgressEvent>,
    /// Taken by the first stream consumer; the queue is single-consumer.
    rx: Arc<tokio::sync::Mutex<Option<UnboundedReceiver<ProgressEvent>>>>,
}

/// Concurrent map of live and finished runs.
#[derive(Clone, Default)]
pub struct BattleRegistry {
    entries: Arc<RwLock<HashMap<Uuid, BattleEntry>>>,
}

/// Write handle the pipeline task uses to publish progress for one run.
#[derive(Clone)]
pub struct RunHandle {
    pub battle_id: Uuid,
    state: Arc<RwLock<BattleState>>,
    tx: UnboundedSender<ProgressEvent>,
}

impl RunHandle {
    /// Mutate the state and push the resulting snapshot onto the run's queue.
    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut BattleState),
    {
        let snapshot = {
            let mut state = self.state.write().expect("battle state lock poisoned");
            mutate(&mut state);
            state.snapshot()
        };
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(ProgressEvent::Snapshot(snapshot));
    }

    /// Read-only view of the current state.
    pub fn read<T>(&self, f: impl FnOnce(&BattleState) -> T) -> T {
        f(&self.state.read().expect("battle state lock poisoned"))
    }
}

impl BattleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run in `Queued` and hand back its write handle.
    pub fn create(&self, config: BattleConfig) -> RunHandle {
        let battle_id = Uuid::new_v4();
        let state = Arc::new(RwLock::new(BattleState::new(battle_id, config)));
        let (tx, rx) = mpsc::unbounded_channel();
        let entry = BattleEntry {
            state: state.clone(),
            tx: tx.clone(),
            rx: Arc::new(tokio::sync::Mutex::new(Some(rx))),
        };
        self.entries
            .write()
            .expect("registry lock poisoned")
            .insert(battle_id, entry);
        info!("Registered battle {battle_id}");
        RunHandle {
            battle_id,
            state,
            tx,
        }
    }

    /// Snapshot of a run's current state.
    pub fn get(&self, battle_id: Uuid) -> Option<BattleState> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(&battle_id)
            .map(|entry| entry.state.read().expect("battle state lock poisoned").clone())
    }

    /// Remove one run and its queue.
    pub fn remove(&self, battle_id: Uuid) -> bool {
        let removed = self
            .entries
            .write()
            .expect("registry lock poisoned")
            .remove(&battle_id)
            .is_some();
        if removed {
            info!("Removed battle {battle_id}");
        }
        removed
    }

    /// Drop all terminal runs created before `cutoff`. Returns how many were
    /// purged. Live runs are never touched.
    pub fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| {
            let state = entry.state.read().expect("battle state lock poisoned");
            !(state.stage.is_terminal() && state.created_at < cutoff)
        });
        let purged = before - entries.len();
        if purged > 0 {
            info!("Purged {purged} finished battles");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live progress stream for a run.
    ///
    /// The first element is the current snapshot; each subsequent element is
    /// an update pushed by the pipeline, with a heartbeat emitted whenever no
    /// update arrives within the heartbeat interval. The stream ends after a
    /// terminal snapshot. Each run's queue supports a single consumer; a
    /// second stream request gets only the current snapshot.
    pub async fn stream(
        &self,
        battle_id: Uuid,
    ) -> Option<impl Stream<Item = ProgressEvent> + Send> {
        let (state, rx_slot) = {
            let entries = self.entries.read().expect("registry lock poisoned");
            let entry = entries.get(&battle_id)?;
            (entry.state.clone(), entry.rx.clone())
        };

        let initial = state.read().expect("battle state lock poisoned").snapshot();
        let terminal = initial.is_terminal();
        let receiver = rx_slot.lock().await.take();
        if receiver.is_none() && !terminal {
            warn!("Progress queue for {battle_id} already consumed");
        }

        Some(futures::stream::unfold(
            StreamCursor {
                initial: Some(initial),
                receiver,
                done: false,
            },
            |mut cursor| async move {
                if cursor.done {
                    return None;
                }
                if let Some(snapshot) = cursor.initial.take() {
                    cursor.done = snapshot.is_terminal() || cursor.receiver.is_none();
                    return Some((ProgressEvent::Snapshot(snapshot), cursor));
                }
                let receiver = cursor.receiver.as_mut()?;
                match tokio::time::timeout(HEARTBEAT_INTERVAL, receiver.recv()).await {
                    Ok(Some(event)) => {
                        if let ProgressEvent::Snapshot(snapshot) = &event {
                            cursor.done = snapshot.is_terminal();
                        }
                        Some((event, cursor))
                    }
                    // Sender dropped without a terminal snapshot.
                    Ok(None) => None,
                    Err(_) => Some((ProgressEvent::heartbeat(), cursor)),
                }
            },
        ))
    }
}

struct StreamCursor {
    initial: Option<super::stage::ProgressSnapshot>,
    receiver: Option<UnboundedReceiver<ProgressEvent>>,
    done: bool,
}
