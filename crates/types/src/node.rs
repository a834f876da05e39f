//! Local node identity.

use crate::address::Address;
use crate::keys::{KeyPair, PublicKey, Signature};
use std::fmt;

/// This node's identity: address plus signing key.
///
/// Remote peers live in the network layer; only the local node ever holds a
/// private key.
pub struct LocalNode {
    address: Address,
    keypair: KeyPair,
}

impl LocalNode {
    pub fn new(address: Address, keypair: KeyPair) -> Self {
        LocalNode { address, keypair }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }
}

impl fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalNode")
            .field("address", &self.address)
            .field("public_key", &self.public_key())
            .finish()
    }
}
