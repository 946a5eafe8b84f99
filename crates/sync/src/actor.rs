//! Single-writer worker per cluster: the task owns the `Cluster`, sync requests queue up
//! and run one at a time, readers see an atomically swapped snapshot.

use std::sync::Arc;

use arc_swap::ArcSwap;
use keel_core::{ClusterManifest, ClusterStatus, Error, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cluster::Cluster;

/// What readers can see of a cluster without going through the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub name: String,
    pub namespace: String,
    pub status: ClusterStatus,
    /// Completed sync passes, failed ones included.
    pub syncs: u64,
    pub last_error: Option<String>,
}

impl ClusterSnapshot {
    fn of(cluster: &Cluster, syncs: u64, last_error: Option<String>) -> Self {
        Self { name: cluster.name().to_string(), namespace: cluster.namespace().to_string(), status: cluster.status, syncs, last_error }
    }
}

enum Command {
    Sync(ClusterManifest, oneshot::Sender<Result<()>>),
    Shutdown,
}

#[derive(Clone)]
pub struct ClusterHandle {
    tx: mpsc::Sender<Command>,
    snap: Arc<ArcSwap<ClusterSnapshot>>,
    syncs_rx: watch::Receiver<u64>,
}

fn stopped() -> Error { Error::Transport("cluster worker has stopped".into()) }

impl ClusterHandle {
    /// Queue a sync pass and wait for its outcome.
    pub async fn sync(&self, manifest: ClusterManifest) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Sync(manifest, reply)).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    pub fn status(&self) -> ClusterStatus { self.snap.load().status }

    pub fn snapshot(&self) -> Arc<ClusterSnapshot> { self.snap.load_full() }

    /// Fires after every completed pass with the total pass count.
    pub fn subscribe_syncs(&self) -> watch::Receiver<u64> { self.syncs_rx.clone() }

    /// Ask the worker to stop after the pass in flight. Queued passes behind it are dropped.
    /// Fails if the worker has already stopped.
    pub async fn shutdown(&self) -> Result<()> { self.tx.send(Command::Shutdown).await.map_err(|_| stopped()) }
}

/// Spawn the worker. The join handle yields the cluster back once the worker stops.
pub fn spawn_cluster(mut cluster: Cluster, cap: usize) -> (ClusterHandle, JoinHandle<Cluster>) {
    let (tx, mut rx) = mpsc::channel::<Command>(cap.max(1));
    let snap = Arc::new(ArcSwap::from_pointee(ClusterSnapshot::of(&cluster, 0, None)));
    let (syncs_tx, syncs_rx) = watch::channel(0u64);
    let snap_clone = Arc::clone(&snap);

    let join = tokio::spawn(async move {
        let mut syncs = 0u64;
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Sync(manifest, reply) => {
                    let result = cluster.sync(manifest).await;
                    syncs += 1;
                    let last_error = result.as_ref().err().map(|e| e.to_string());
                    snap_clone.store(Arc::new(ClusterSnapshot::of(&cluster, syncs, last_error)));
                    let _ = syncs_tx.send(syncs);
                    if reply.send(result).is_err() {
                        debug!(cluster = %cluster.name(), "sync requester went away before the reply");
                    }
                }
                Command::Shutdown => break,
            }
        }
        info!(cluster = %cluster.name(), syncs, "cluster worker stopped");
        cluster
    });

    (ClusterHandle { tx, snap, syncs_rx }, join)
}
