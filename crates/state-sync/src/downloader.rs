//! World-state download driver.
//!
//! [`WorldStateDownloader::run`] seeds a [`WorldDownloadState`] with the state
//! root and spawns workers. Each worker takes a batch of tasks, serves what it
//! can from local storage, asks an idle peer for the rest and hands every task
//! to [`CompleteTaskStep`].

use async_trait::async_trait;
use bytes::Bytes;
use protocore_config::SyncConfig;
use protocore_p2p::{DisconnectReason, EthPeer, EthPeers};
use protocore_storage::{RequestStore, WorldStateStorage};
use protocore_types::{BlockHeader, H256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::complete_task::CompleteTaskStep;
use crate::download_state::{DownloadProgress, DownloadState, DownloadStatus, WorldDownloadState};
use crate::task::{QueuedTask, Task};
use crate::{NodeDataRequest, WorldStateSyncError};

/// Delay before retrying when no peer can serve a batch
pub const NO_PEER_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Fetches node data from peers.
#[async_trait]
pub trait NodeDataNetwork: Send + Sync {
    /// Ask `peer` for the nodes with the given hashes. Peers may answer with
    /// any subset, in any order.
    async fn request_node_data(&self, peer: &EthPeer, hashes: Vec<H256>)
        -> Result<Vec<Bytes>, String>;
}

/// Downloads the world state of a block from connected peers.
pub struct WorldStateDownloader<N: NodeDataNetwork> {
    network: Arc<N>,
    eth_peers: Arc<EthPeers>,
    storage: Arc<dyn WorldStateStorage>,
    request_store: Option<Arc<dyn RequestStore>>,
    config: SyncConfig,
}

impl<N: NodeDataNetwork + 'static> WorldStateDownloader<N> {
    /// Create a downloader
    pub fn new(
        network: Arc<N>,
        eth_peers: Arc<EthPeers>,
        storage: Arc<dyn WorldStateStorage>,
        config: SyncConfig,
    ) -> Self {
        Self {
            network,
            eth_peers,
            storage,
            request_store: None,
            config,
        }
    }

    /// Spill requests beyond the task capacity to `store` instead of memory
    pub fn with_request_store(mut self, store: Arc<dyn RequestStore>) -> Self {
        self.request_store = Some(store);
        self
    }

    /// Start downloading the state of `header`.
    ///
    /// If the state is already stored the returned handle is complete.
    pub async fn run(&self, header: BlockHeader) -> Result<WorldDownloadHandle, WorldStateSyncError> {
        self.config
            .validate()
            .map_err(|e| WorldStateSyncError::InvalidConfig(e.to_string()))?;

        let mut state = WorldDownloadState::new(&self.config);
        if let Some(store) = &self.request_store {
            store.clear()?;
            state = state.with_request_store(Arc::clone(store));
        }
        let state = Arc::new(state);

        if self.storage.is_world_state_available(&header.state_root)? {
            info!(
                block = header.number,
                state_root = %header.state_root,
                "World state already available"
            );
            state.complete_without_download();
            return Ok(WorldDownloadHandle {
                state,
                workers: Vec::new(),
            });
        }

        info!(
            block = header.number,
            state_root = %header.state_root,
            workers = self.config.world_state_request_parallelism,
            "Starting world state download"
        );
        state
            .enqueue_requests(vec![NodeDataRequest::account_trie_node(header.state_root)])
            .await;

        let worker = Arc::new(Worker {
            network: Arc::clone(&self.network),
            eth_peers: Arc::clone(&self.eth_peers),
            storage: Arc::clone(&self.storage),
            state: Arc::clone(&state),
            complete_step: CompleteTaskStep::new(Arc::clone(&self.storage)),
            header,
            batch_size: self.config.world_state_hash_count_per_request,
            request_timeout: self.config.request_timeout(),
        });
        let workers = (0..self.config.world_state_request_parallelism)
            .map(|id| tokio::spawn(Arc::clone(&worker).run(id)))
            .collect();

        Ok(WorldDownloadHandle { state, workers })
    }
}

/// Handle to a running download.
pub struct WorldDownloadHandle {
    state: Arc<WorldDownloadState>,
    workers: Vec<JoinHandle<()>>,
}

impl WorldDownloadHandle {
    /// Current counters
    pub fn progress(&self) -> DownloadProgress {
        self.state.progress()
    }

    /// Receive progress updates
    pub fn subscribe(&self) -> watch::Receiver<DownloadProgress> {
        self.state.subscribe()
    }

    /// Abandon the download
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Wait for the download to end and all workers to exit
    pub async fn wait(self) -> Result<(), WorldStateSyncError> {
        let mut progress = self.state.subscribe();
        let status = match progress.wait_for(|p| p.status.is_finished()).await {
            Ok(progress) => progress.status.clone(),
            Err(_) => self.state.status(),
        };

        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "World state worker ended abnormally");
            }
        }

        match status {
            DownloadStatus::Completed => Ok(()),
            DownloadStatus::Cancelled => Err(WorldStateSyncError::Cancelled),
            DownloadStatus::Failed(err) => Err(err),
            DownloadStatus::Running => Err(WorldStateSyncError::Internal(
                "download ended while still running".to_string(),
            )),
        }
    }
}

struct Worker<N> {
    network: Arc<N>,
    eth_peers: Arc<EthPeers>,
    storage: Arc<dyn WorldStateStorage>,
    state: Arc<WorldDownloadState>,
    complete_step: CompleteTaskStep,
    header: BlockHeader,
    batch_size: usize,
    request_timeout: Duration,
}

impl<N: NodeDataNetwork> Worker<N> {
    async fn run(self: Arc<Self>, id: usize) {
        trace!(worker = id, "World state worker started");

        while let Some(batch) = self.state.next_batch(self.batch_size).await {
            if let Err(e) = self.process_batch(batch).await {
                self.state.fail(e);
                break;
            }
        }

        trace!(worker = id, "World state worker exiting");
    }

    /// Finish every task of `batch`, then write the nodes it produced in one
    /// commit
    async fn process_batch(&self, batch: Vec<QueuedTask>) -> Result<(), WorldStateSyncError> {
        let fetched = self.fetch_batch(batch).await;
        self.state.flush_writes(self.storage.as_ref())?;
        fetched
    }

    async fn fetch_batch(&self, batch: Vec<QueuedTask>) -> Result<(), WorldStateSyncError> {
        let mut remote = Vec::with_capacity(batch.len());
        for mut task in batch {
            if let Some(data) = task.data().existing_data(self.storage.as_ref())? {
                if task.data_mut().set_data(data).is_ok() {
                    self.complete(&mut task).await;
                    continue;
                }
            }
            remote.push(task);
        }
        if remote.is_empty() {
            return Ok(());
        }

        let Some(peer) = self.eth_peers.idle_peer(self.header.number) else {
            debug!(tasks = remote.len(), "No peer available for world state data");
            drop(remote);
            self.state.notify_task_available();
            tokio::time::sleep(NO_PEER_RETRY_DELAY).await;
            return Ok(());
        };

        let made_progress = self.request_from_peer(&peer, &mut remote).await;
        self.state.request_complete(made_progress);

        for task in remote.iter_mut() {
            self.complete(task).await;
        }
        Ok(())
    }

    async fn request_from_peer(&self, peer: &EthPeer, tasks: &mut [QueuedTask]) -> bool {
        let hashes: Vec<H256> = tasks.iter().map(|task| task.data().hash()).collect();
        trace!(peer = %peer, count = hashes.len(), "Requesting world state data");

        let response = {
            let _request = peer.begin_request();
            tokio::time::timeout(
                self.request_timeout,
                self.network.request_node_data(peer, hashes),
            )
            .await
        };
        let blobs = match response {
            Ok(Ok(blobs)) => blobs,
            Ok(Err(e)) => {
                debug!(peer = %peer, error = %e, "World state data request failed");
                return false;
            }
            Err(_) => {
                debug!(peer = %peer, "World state data request timed out");
                return false;
            }
        };

        let by_hash: HashMap<H256, Bytes> = blobs
            .into_iter()
            .map(|blob| (H256::keccak256(&blob), blob))
            .collect();
        let mut used = HashSet::new();
        for task in tasks.iter_mut() {
            let hash = task.data().hash();
            if let Some(data) = by_hash.get(&hash) {
                if task.data_mut().set_data(data.clone()).is_ok() {
                    used.insert(hash);
                }
            }
        }

        let unsolicited = by_hash.len() - used.len();
        if unsolicited > 0 {
            warn!(peer = %peer, unsolicited, "Peer returned world state data that was not requested");
            peer.disconnect(DisconnectReason::BreachOfProtocol);
        }

        !used.is_empty()
    }

    async fn complete(&self, task: &mut QueuedTask) {
        self.complete_step
            .mark_as_complete_or_failed(&self.header, self.state.as_ref(), task)
            .await;
    }
}
