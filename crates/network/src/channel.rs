//! Per-node channels.

use crate::NetworkError;
use async_trait::async_trait;
use isaac_types::{Address, Hash, Height, PublicKey, Seal};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identity and progress summary a node serves to its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub address: Address,
    pub public_key: PublicKey,
    /// Height of the last committed block; nil before genesis.
    pub last_height: Height,
    /// Current consensus state tag, as a plain string to keep the wire
    /// format independent of the states crate.
    pub state: String,
    pub version: String,
}

/// Transport to one node.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Deliver a seal to the node.
    async fn send_seal(&self, seal: Seal) -> Result<(), NetworkError>;

    /// Fetch seals by hash; unknown hashes are skipped.
    async fn seals(&self, hashes: Vec<Hash>) -> Result<Vec<Seal>, NetworkError>;

    /// Ask the node for its info summary.
    async fn node_info(&self) -> Result<NodeInfo, NetworkError>;
}

/// Source of seals served by a [`LocalChannel`].
pub type SealSource = Arc<dyn Fn(&[Hash]) -> Vec<Seal> + Send + Sync>;

/// In-process channel backed by a tokio mpsc queue.
///
/// Incoming seals appear on the receiver returned by [`LocalChannel::new`];
/// the owner wires that receiver into its seal-ingress loop.
pub struct LocalChannel {
    seal_tx: mpsc::UnboundedSender<Seal>,
    info: RwLock<NodeInfo>,
    seal_source: RwLock<Option<SealSource>>,
}

impl LocalChannel {
    pub fn new(info: NodeInfo) -> (Arc<Self>, mpsc::UnboundedReceiver<Seal>) {
        let (seal_tx, seal_rx) = mpsc::unbounded_channel();
        (
            Arc::new(LocalChannel {
                seal_tx,
                info: RwLock::new(info),
                seal_source: RwLock::new(None),
            }),
            seal_rx,
        )
    }

    /// Install the callback answering `seals` requests.
    pub fn set_seal_source(&self, source: SealSource) {
        *self.seal_source.write() = Some(source);
    }

    /// Update the served last-height, typically after a commit.
    pub fn set_last_height(&self, height: Height) {
        self.info.write().last_height = height;
    }

    /// Update the served consensus state tag.
    pub fn set_state(&self, state: impl Into<String>) {
        self.info.write().state = state.into();
    }
}

#[async_trait]
impl Channel for LocalChannel {
    async fn send_seal(&self, seal: Seal) -> Result<(), NetworkError> {
        self.seal_tx
            .send(seal)
            .map_err(|_| NetworkError::ChannelClosed)
    }

    async fn seals(&self, hashes: Vec<Hash>) -> Result<Vec<Seal>, NetworkError> {
        let source = self.seal_source.read().clone();
        match source {
            Some(source) => Ok(source(&hashes)),
            None => Err(NetworkError::NotSupported),
        }
    }

    async fn node_info(&self) -> Result<NodeInfo, NetworkError> {
        Ok(self.info.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isaac_types::test_utils::{dummy_voteproof, random_hash, test_network_id};
    use isaac_types::{
        Ballot, BallotFact, InitFact, KeyPair, Round, Stage, VoteResult,
    };

    fn test_info() -> NodeInfo {
        NodeInfo {
            address: Address::new("n0").unwrap(),
            public_key: KeyPair::generate().public_key(),
            last_height: Height::NIL,
            state: "booting".into(),
            version: "0.1.0".into(),
        }
    }

    fn test_seal() -> Seal {
        let reference = dummy_voteproof(
            Height::new(9),
            Round::new(0),
            Stage::Accept,
            VoteResult::Majority,
        );
        Seal::Ballot(
            Ballot::sign(
                BallotFact::Init(InitFact::new(Height::new(10), Round::new(0), random_hash())),
                Some(reference),
                Address::new("n0").unwrap(),
                &KeyPair::generate(),
                &test_network_id(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn seals_arrive_in_order() {
        let (channel, mut rx) = LocalChannel::new(test_info());

        let a = test_seal();
        let b = test_seal();
        channel.send_seal(a.clone()).await.unwrap();
        channel.send_seal(b.clone()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().hash(), a.hash());
        assert_eq!(rx.recv().await.unwrap().hash(), b.hash());
    }

    #[tokio::test]
    async fn node_info_reflects_updates() {
        let (channel, _rx) = LocalChannel::new(test_info());
        assert_eq!(channel.node_info().await.unwrap().last_height, Height::NIL);

        channel.set_last_height(Height::new(4));
        channel.set_state("consensus");
        let info = channel.node_info().await.unwrap();
        assert_eq!(info.last_height, Height::new(4));
        assert_eq!(info.state, "consensus");
    }

    #[tokio::test]
    async fn seal_requests_need_a_source() {
        let (channel, _rx) = LocalChannel::new(test_info());
        assert!(matches!(
            channel.seals(vec![random_hash()]).await,
            Err(NetworkError::NotSupported)
        ));

        let served = test_seal();
        let want = served.hash();
        channel.set_seal_source(Arc::new(move |hashes: &[Hash]| {
            hashes
                .iter()
                .filter(|h| **h == want)
                .map(|_| served.clone())
                .collect()
        }));

        let got = channel.seals(vec![want, random_hash()]).await.unwrap();
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn node_info_serializes() {
        let info = test_info();
        let json = serde_json::to_string(&info).unwrap();
        let back: NodeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, back);
    }
}
