//! Action construction, transaction assembly and signing.
//!
//! A transaction carries one or more actions and one signature per required
//! key. Signatures are recoverable secp256k1 signatures over the keccak256
//! hash of the transaction body (chain ID, expiration and actions), so a
//! replaying client can check who authorized each transaction.

use alloy_primitives::{hex, keccak256, Address, Signature, B256};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Named action arguments.
pub type Params = Map<String, Value>;

/// Domain under which all fungible-token actions are recorded.
pub const FUNGIBLE_DOMAIN: &str = ".fungible";

/// Every action type the generator can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    NewDomain,
    UpdateDomain,
    IssueToken,
    Transfer,
    DestroyToken,
    NewFungible,
    IssueFungible,
    TransferFt,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::NewDomain,
        ActionKind::UpdateDomain,
        ActionKind::IssueToken,
        ActionKind::Transfer,
        ActionKind::DestroyToken,
        ActionKind::NewFungible,
        ActionKind::IssueFungible,
        ActionKind::TransferFt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::NewDomain => "newdomain",
            ActionKind::UpdateDomain => "updatedomain",
            ActionKind::IssueToken => "issuetoken",
            ActionKind::Transfer => "transfer",
            ActionKind::DestroyToken => "destroytoken",
            ActionKind::NewFungible => "newfungible",
            ActionKind::IssueFungible => "issuefungible",
            ActionKind::TransferFt => "transferft",
        }
    }

    /// Parameters an action of this kind cannot be built without.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            ActionKind::NewDomain => &["name", "creator"],
            ActionKind::UpdateDomain => &["name", "manage"],
            ActionKind::IssueToken => &["domain", "names", "owner"],
            ActionKind::Transfer => &["domain", "name", "to"],
            ActionKind::DestroyToken => &["domain", "name"],
            ActionKind::NewFungible => &["sym", "creator", "total_supply"],
            ActionKind::IssueFungible => &["address", "number"],
            ActionKind::TransferFt => &["from", "to", "number"],
        }
    }

    pub fn is_fungible(&self) -> bool {
        matches!(
            self,
            ActionKind::NewFungible | ActionKind::IssueFungible | ActionKind::TransferFt
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| LedgerError::UnknownAction(s.to_string()))
    }
}

// ============================================================================
// Actions
// ============================================================================

/// One operation inside a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action type name.
    pub name: String,
    /// Domain the action operates on.
    pub domain: String,
    /// Key within the domain.
    pub key: String,
    /// The action arguments.
    pub data: Value,
}

/// Builds an action from pool-issued parameters.
///
/// The domain and key are derived from the parameters the way the backend
/// indexes actions: domain actions use reserved keys, token actions use the
/// token name, and fungible actions live in [`FUNGIBLE_DOMAIN`] keyed by
/// symbol ID.
pub fn build_action(action_type: &str, params: Params) -> Result<Action, LedgerError> {
    let kind = ActionKind::from_str(action_type)?;
    for &param in kind.required_params() {
        if !params.contains_key(param) {
            return Err(LedgerError::MissingParam {
                action: action_type.to_string(),
                param,
            });
        }
    }

    let text = |param: &'static str| -> Result<String, LedgerError> {
        params
            .get(param)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LedgerError::InvalidParam {
                action: action_type.to_string(),
                param,
            })
    };
    let symbol = |param: &'static str| -> Result<String, LedgerError> {
        text(param)?
            .rsplit_once('#')
            .map(|(_, id)| id.to_string())
            .ok_or_else(|| LedgerError::InvalidParam {
                action: action_type.to_string(),
                param,
            })
    };

    let (domain, key) = match kind {
        ActionKind::NewDomain => (text("name")?, ".create".to_string()),
        ActionKind::UpdateDomain => (text("name")?, ".update".to_string()),
        ActionKind::IssueToken => (text("domain")?, ".issue".to_string()),
        ActionKind::Transfer | ActionKind::DestroyToken => (text("domain")?, text("name")?),
        ActionKind::NewFungible => (FUNGIBLE_DOMAIN.to_string(), symbol("sym")?),
        ActionKind::IssueFungible | ActionKind::TransferFt => {
            (FUNGIBLE_DOMAIN.to_string(), symbol("number")?)
        }
    };

    Ok(Action {
        name: kind.as_str().to_string(),
        domain,
        key,
        data: Value::Object(params),
    })
}

// ============================================================================
// Transactions
// ============================================================================

/// A transaction ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub chain_id: u64,
    /// Unix time after which the backend rejects the transaction.
    pub expiration: u64,
    pub actions: Vec<Action>,
    /// Hex-encoded 65-byte recoverable signatures, in signing order.
    pub signatures: Vec<String>,
}

/// The signed portion of a transaction.
#[derive(Serialize)]
struct SigningPayload<'a> {
    chain_id: u64,
    expiration: u64,
    actions: &'a [Action],
}

impl Transaction {
    pub fn new(chain_id: u64, expiration: u64) -> Self {
        Self {
            chain_id,
            expiration,
            actions: Vec::new(),
            signatures: Vec::new(),
        }
    }

    pub fn add_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Hash of the chain ID, expiration and actions.
    pub fn signing_hash(&self) -> Result<B256, LedgerError> {
        let payload = SigningPayload {
            chain_id: self.chain_id,
            expiration: self.expiration,
            actions: &self.actions,
        };
        Ok(keccak256(serde_json::to_vec(&payload)?))
    }

    /// Signs the current body with `key` and appends the signature.
    ///
    /// Adding actions afterwards invalidates earlier signatures.
    pub fn add_signature(&mut self, key: &SigningKey) -> Result<(), LedgerError> {
        let hash = self.signing_hash()?;
        let (sig, recovery_id) = key.sign_prehash_recoverable(hash.as_slice())?;
        let signature = Signature::from_signature_and_parity(sig, recovery_id.is_y_odd());
        self.signatures.push(hex::encode_prefixed(signature.as_bytes()));
        Ok(())
    }

    /// Recovers the signer address of every signature.
    ///
    /// Succeeds for any well-formed signature. Callers that need to verify
    /// must compare the result with the expected signers.
    pub fn recover_signers(&self) -> Result<Vec<Address>, LedgerError> {
        let hash = self.signing_hash()?;
        self.signatures
            .iter()
            .map(|encoded| {
                let raw = hex::decode(encoded)
                    .map_err(|e| LedgerError::MalformedSignature(e.to_string()))?;
                let signature = Signature::try_from(raw.as_slice())
                    .map_err(|e| LedgerError::MalformedSignature(e.to_string()))?;
                signature
                    .recover_address_from_prehash(&hash)
                    .map_err(|e| LedgerError::MalformedSignature(e.to_string()))
            })
            .collect()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, LedgerError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, LedgerError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Transaction factory bound to one chain.
#[derive(Debug, Clone)]
pub struct Ledger {
    chain_id: u64,
    expiration: u64,
}

impl Ledger {
    pub fn new(chain_id: u64, expiration: u64) -> Self {
        Self {
            chain_id,
            expiration,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn new_transaction(&self) -> Transaction {
        Transaction::new(self.chain_id, self.expiration)
    }

    /// Builds a single-action transaction signed by every key in `keys`.
    pub fn sign_action(
        &self,
        action_type: &str,
        params: Params,
        keys: &[SigningKey],
    ) -> Result<Transaction, LedgerError> {
        let action = build_action(action_type, params)?;
        let mut trx = self.new_transaction();
        trx.add_action(action);
        for key in keys {
            trx.add_signature(key)?;
        }
        Ok(trx)
    }
}
