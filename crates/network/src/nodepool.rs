//! The remote-node pool.

use crate::channel::Channel;
use isaac_types::{Address, PublicKey};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A known remote peer: identity plus (optionally) a live channel.
#[derive(Clone)]
pub struct RemoteNode {
    pub address: Address,
    pub public_key: PublicKey,
    channel: Option<Arc<dyn Channel>>,
}

impl RemoteNode {
    pub fn new(address: Address, public_key: PublicKey) -> Self {
        RemoteNode {
            address,
            public_key,
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel.clone()
    }
}

impl std::fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNode")
            .field("address", &self.address)
            .field("alive", &self.channel.is_some())
            .finish()
    }
}

/// All remote peers of one node, keyed by address.
///
/// Iteration order is the address order, so broadcast fan-out visits peers
/// deterministically.
#[derive(Default)]
pub struct NodePool {
    nodes: RwLock<BTreeMap<Address, RemoteNode>>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, node: RemoteNode) {
        self.nodes.write().insert(node.address.clone(), node);
    }

    pub fn remove(&self, address: &Address) -> Option<RemoteNode> {
        self.nodes.write().remove(address)
    }

    pub fn node(&self, address: &Address) -> Option<RemoteNode> {
        self.nodes.read().get(address).cloned()
    }

    pub fn channel(&self, address: &Address) -> Option<Arc<dyn Channel>> {
        self.nodes.read().get(address).and_then(|n| n.channel())
    }

    /// Install or replace the channel of a known peer.
    pub fn set_channel(&self, address: &Address, channel: Arc<dyn Channel>) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(address) {
            Some(node) => {
                node.channel = Some(channel);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Number of peers with a live channel.
    pub fn len_remote_alives(&self) -> usize {
        self.nodes
            .read()
            .values()
            .filter(|n| n.channel.is_some())
            .count()
    }

    /// Visit every peer; `f` returning `false` stops the traversal.
    pub fn traverse<F>(&self, mut f: F)
    where
        F: FnMut(&RemoteNode) -> bool,
    {
        for node in self.nodes.read().values() {
            if !f(node) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{LocalChannel, NodeInfo};
    use isaac_types::{Height, KeyPair};

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    fn test_channel(address: &Address) -> Arc<LocalChannel> {
        let (channel, _rx) = LocalChannel::new(NodeInfo {
            address: address.clone(),
            public_key: KeyPair::generate().public_key(),
            last_height: Height::NIL,
            state: "booting".into(),
            version: "0.1.0".into(),
        });
        channel
    }

    #[test]
    fn alive_count_follows_channels() {
        let pool = NodePool::new();
        let a = addr("a");
        let b = addr("b");
        pool.add(RemoteNode::new(a.clone(), KeyPair::generate().public_key()));
        pool.add(RemoteNode::new(b.clone(), KeyPair::generate().public_key()));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.len_remote_alives(), 0);

        assert!(pool.set_channel(&a, test_channel(&a)));
        assert_eq!(pool.len_remote_alives(), 1);
        assert!(pool.channel(&a).is_some());
        assert!(pool.channel(&b).is_none());
    }

    #[test]
    fn traverse_visits_in_address_order_and_can_stop() {
        let pool = NodePool::new();
        for name in ["c", "a", "b"] {
            pool.add(RemoteNode::new(addr(name), KeyPair::generate().public_key()));
        }

        let mut seen = Vec::new();
        pool.traverse(|n| {
            seen.push(n.address.clone());
            true
        });
        assert_eq!(seen, vec![addr("a"), addr("b"), addr("c")]);

        let mut count = 0;
        pool.traverse(|_| {
            count += 1;
            count < 2
        });
        assert_eq!(count, 2);
    }
}
