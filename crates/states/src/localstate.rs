//! The node's mutable local state.

use isaac_network::NodePool;
use isaac_storage::{BlockData, Database};
use isaac_types::{LocalNode, LocalPolicy, Manifest, NetworkId, Voteproof};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Everything a handler needs about the local node.
///
/// Initialized once at boot; the mutable pieces (policy, last voteproofs)
/// change only through the labeled setters. The policy is an immutable
/// snapshot behind an `Arc`, swapped atomically so a round in flight never
/// observes a half-applied reconfiguration.
pub struct LocalState {
    node: LocalNode,
    network_id: NetworkId,
    policy: RwLock<Arc<LocalPolicy>>,
    database: Arc<dyn Database>,
    blockdata: Arc<dyn BlockData>,
    nodes: Arc<NodePool>,
    last_init_voteproof: RwLock<Option<Voteproof>>,
    last_accept_voteproof: RwLock<Option<Voteproof>>,
}

impl LocalState {
    pub fn new(
        node: LocalNode,
        network_id: NetworkId,
        policy: LocalPolicy,
        database: Arc<dyn Database>,
        blockdata: Arc<dyn BlockData>,
        nodes: Arc<NodePool>,
    ) -> Arc<Self> {
        Arc::new(LocalState {
            node,
            network_id,
            policy: RwLock::new(Arc::new(policy)),
            database,
            blockdata,
            nodes,
            last_init_voteproof: RwLock::new(None),
            last_accept_voteproof: RwLock::new(None),
        })
    }

    pub fn node(&self) -> &LocalNode {
        &self.node
    }

    pub fn network_id(&self) -> &NetworkId {
        &self.network_id
    }

    /// The current policy snapshot.
    pub fn policy(&self) -> Arc<LocalPolicy> {
        self.policy.read().clone()
    }

    /// Swap in a new policy; takes effect for rounds entered afterwards.
    pub fn set_policy(&self, policy: LocalPolicy) {
        debug!("policy updated");
        *self.policy.write() = Arc::new(policy);
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn blockdata(&self) -> &Arc<dyn BlockData> {
        &self.blockdata
    }

    pub fn nodes(&self) -> &Arc<NodePool> {
        &self.nodes
    }

    pub fn last_manifest(&self) -> Option<Manifest> {
        self.database.last_manifest().ok().flatten()
    }

    pub fn last_init_voteproof(&self) -> Option<Voteproof> {
        self.last_init_voteproof.read().clone()
    }

    pub fn set_last_init_voteproof(&self, voteproof: Voteproof) {
        debug!(height = %voteproof.height(), round = %voteproof.round(),
            "last INIT voteproof updated");
        *self.last_init_voteproof.write() = Some(voteproof);
    }

    pub fn last_accept_voteproof(&self) -> Option<Voteproof> {
        self.last_accept_voteproof.read().clone()
    }

    pub fn set_last_accept_voteproof(&self, voteproof: Voteproof) {
        debug!(height = %voteproof.height(), round = %voteproof.round(),
            "last ACCEPT voteproof updated");
        *self.last_accept_voteproof.write() = Some(voteproof);
    }
}

impl std::fmt::Debug for LocalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalState")
            .field("node", self.node.address())
            .field("last_manifest", &self.last_manifest().map(|m| m.height))
            .finish()
    }
}
