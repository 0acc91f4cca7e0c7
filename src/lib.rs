//! Synthetic transaction traffic for load-testing a ledger backend.
//!
//! This crate produces a file of signed transactions whose action types follow
//! configured ratios. It wires the [`quota_scheduler`] pick loop to a resource
//! pool, a transaction builder and a framed output file.
//!
//! # Architecture
//!
//! - **Config**: total transaction count, user limit and action weights
//! - **Pool**: users, domains, tokens and fungibles; decides which actions
//!   are currently possible and hands out their arguments and signing keys
//! - **Ledger**: builds actions, assembles and signs transactions
//! - **Writer**: persists serialized transactions for replay
//! - **Generator**: plans quotas and runs the scheduler over all of the above
//!
//! # Quick Start
//!
//! ```
//! use trafficgen::{MemorySink, OrderMode, TrafficConfig, TrafficGenerator};
//!
//! let config = TrafficConfig::new(20, 5)
//!     .with_action("newdomain", 1.0)
//!     .with_action("issuetoken", 2.0)
//!     .with_action("transfer", 1.0);
//!
//! let generator = TrafficGenerator::new("TE", config, MemorySink::default()).unwrap();
//! assert_eq!(generator.total(), 20);
//!
//! let (summary, sink) = generator.generate(OrderMode::Fixed, |_| {}).unwrap();
//! assert_eq!(summary.emitted, 20);
//! assert_eq!(sink.records().len(), 20);
//! ```

pub mod config;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod pool;
pub mod writer;

pub use config::TrafficConfig;
pub use error::{ConfigError, GenerateError, LedgerError, PoolError};
pub use generator::TrafficGenerator;
pub use ledger::{Action, ActionKind, Ledger, Transaction};
pub use pool::{Grant, RandomPool};
pub use quota_scheduler::{OrderMode, RetryPolicy, RunState, RunSummary};
pub use writer::{MemorySink, TrafficReader, TrafficWriter};

use alloy_primitives::{keccak256, Address};
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::{rngs::StdRng, SeedableRng};

// ============================================================================
// Account & Key Management
// ============================================================================

/// A pool user with its signing key.
#[derive(Clone)]
pub struct Account {
    /// The secp256k1 signing key.
    pub signing_key: SigningKey,
    /// The address derived from the public key.
    pub address: Address,
}

impl Account {
    /// Creates an account from a signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = public_key_to_address(&verifying_key);
        Self { signing_key, address }
    }

    /// Generates a deterministic account from a seed.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_signing_key(SigningKey::random(&mut rng))
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish()
    }
}

/// Derives an address from a secp256k1 public key.
pub(crate) fn public_key_to_address(verifying_key: &VerifyingKey) -> Address {
    let public_key_bytes = verifying_key.to_encoded_point(false);
    // Skip the 0x04 prefix byte, hash the rest.
    let hash = keccak256(&public_key_bytes.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}
