//! Random resource pool backing feasibility checks.
//!
//! The pool mirrors the ledger objects that earlier transactions in the
//! stream created: users, domains, non-fungible tokens and fungible symbols
//! with per-user balances. An action is feasible when the objects it needs
//! exist; issuing it updates the pool as if the transaction had executed.

use k256::ecdsa::SigningKey;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{json, Value};
use std::str::FromStr;

use quota_scheduler::FeasibilityOracle;

use crate::error::{ConfigError, PoolError};
use crate::ledger::{ActionKind, Params};
use crate::Account;

/// Decimal places used for every fungible symbol.
const FUNGIBLE_PRECISION: u32 = 5;

/// Supply minted by `newfungible`, in whole units.
const FUNGIBLE_SUPPLY: u64 = 100_000_000;

/// Largest amount moved by a single fungible issue, in whole units.
const MAX_ISSUE_AMOUNT: u64 = 1_000;

/// Arguments and signing keys for one pick.
#[derive(Debug, Clone)]
pub struct Grant {
    pub params: Params,
    pub keys: Vec<SigningKey>,
}

#[derive(Debug, Clone)]
struct Domain {
    name: String,
    creator: usize,
}

#[derive(Debug, Clone)]
struct Token {
    domain: usize,
    name: String,
    owner: usize,
}

#[derive(Debug, Clone)]
struct Fungible {
    sym_id: u32,
    creator: usize,
}

/// A positive balance of one fungible held by one user.
#[derive(Debug, Clone)]
struct Holding {
    user: usize,
    fungible: usize,
    amount: u64,
}

/// Seeded pool of users and ledger objects.
#[derive(Debug)]
pub struct RandomPool {
    prefix: String,
    max_users: usize,
    seed: u64,
    rng: StdRng,
    users: Vec<Account>,
    domains: Vec<Domain>,
    tokens: Vec<Token>,
    fungibles: Vec<Fungible>,
    holdings: Vec<Holding>,
    /// Monotonic counter for unique object names.
    serial: u64,
}

impl RandomPool {
    /// Creates an empty pool whose object names start with `prefix`.
    ///
    /// `prefix` identifies the generator (1-2 ASCII alphanumerics) so that
    /// several generators can feed the same backend without name clashes.
    pub fn new(prefix: &str, max_users: usize, seed: u64) -> Result<Self, ConfigError> {
        if prefix.is_empty()
            || prefix.len() > 2
            || !prefix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::InvalidName(prefix.to_string()));
        }
        if max_users == 0 {
            return Err(ConfigError::NoUsers);
        }

        Ok(Self {
            prefix: prefix.to_string(),
            max_users,
            seed,
            rng: StdRng::seed_from_u64(seed),
            users: Vec::new(),
            domains: Vec::new(),
            tokens: Vec::new(),
            fungibles: Vec::new(),
            holdings: Vec::new(),
            serial: 0,
        })
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Live (not destroyed) non-fungible tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn fungible_count(&self) -> usize {
        self.fungibles.len()
    }

    /// Reports whether `kind` can be issued with the current pool contents.
    pub fn satisfy_action(&self, kind: ActionKind) -> bool {
        match kind {
            ActionKind::NewDomain | ActionKind::NewFungible => true,
            ActionKind::UpdateDomain | ActionKind::IssueToken => !self.domains.is_empty(),
            ActionKind::Transfer | ActionKind::DestroyToken => !self.tokens.is_empty(),
            ActionKind::IssueFungible => !self.fungibles.is_empty(),
            ActionKind::TransferFt => !self.holdings.is_empty(),
        }
    }

    /// Issues arguments and keys for `kind` and records its effect.
    pub fn require(&mut self, kind: ActionKind) -> Result<Grant, PoolError> {
        if !self.satisfy_action(kind) {
            return Err(PoolError::Unsatisfied(kind.to_string()));
        }

        let grant = match kind {
            ActionKind::NewDomain => self.new_domain(),
            ActionKind::UpdateDomain => self.update_domain(),
            ActionKind::IssueToken => self.issue_token(),
            ActionKind::Transfer => self.transfer(),
            ActionKind::DestroyToken => self.destroy_token(),
            ActionKind::NewFungible => self.new_fungible(),
            ActionKind::IssueFungible => self.issue_fungible(),
            ActionKind::TransferFt => self.transfer_ft(),
        };
        Ok(grant)
    }

    // ------------------------------------------------------------------------
    // Users and names
    // ------------------------------------------------------------------------

    /// Returns a new user while below the limit, otherwise a random existing one.
    fn pick_user(&mut self) -> usize {
        if self.users.len() < self.max_users {
            let index = self.users.len();
            let seed = self.seed.wrapping_mul(1_000_003).wrapping_add(index as u64);
            self.users.push(Account::from_seed(seed));
            index
        } else {
            self.rng.gen_range(0..self.users.len())
        }
    }

    /// Picks a user other than `exclude` when the pool has more than one.
    fn pick_other_user(&mut self, exclude: usize) -> usize {
        let user = self.pick_user();
        if user != exclude || self.users.len() == 1 {
            return user;
        }
        (exclude + 1 + self.rng.gen_range(0..self.users.len() - 1)) % self.users.len()
    }

    fn next_name(&mut self, tag: &str) -> String {
        self.serial += 1;
        format!("{}{}{:07}", self.prefix, tag, self.serial)
    }

    fn address(&self, user: usize) -> Value {
        Value::String(self.users[user].address.to_string())
    }

    fn key(&self, user: usize) -> SigningKey {
        self.users[user].signing_key.clone()
    }

    fn memo(&mut self) -> Value {
        Value::String(format!("{}-{:016x}", self.prefix, self.rng.gen::<u64>()))
    }

    fn asset(amount: u64, sym_id: u32) -> String {
        format!("{amount}.{:0width$} S#{sym_id}", 0, width = FUNGIBLE_PRECISION as usize)
    }

    // ------------------------------------------------------------------------
    // Per-action requests
    // ------------------------------------------------------------------------

    fn new_domain(&mut self) -> Grant {
        let creator = self.pick_user();
        let name = self.next_name("d");
        let params = json!({
            "name": name,
            "creator": self.address(creator),
            "issue": {
                "name": "issue",
                "threshold": 1,
                "authorizers": [{ "ref": self.address(creator), "weight": 1 }],
            },
            "transfer": {
                "name": "transfer",
                "threshold": 1,
                "authorizers": [{ "ref": "[G] .OWNER", "weight": 1 }],
            },
            "manage": {
                "name": "manage",
                "threshold": 1,
                "authorizers": [{ "ref": self.address(creator), "weight": 1 }],
            },
        });
        self.domains.push(Domain { name, creator });
        grant(params, vec![self.key(creator)])
    }

    fn update_domain(&mut self) -> Grant {
        let domain = self.domains[self.rng.gen_range(0..self.domains.len())].clone();
        let params = json!({
            "name": domain.name,
            "manage": self.address(domain.creator),
        });
        grant(params, vec![self.key(domain.creator)])
    }

    fn issue_token(&mut self) -> Grant {
        let domain_idx = self.rng.gen_range(0..self.domains.len());
        let domain = self.domains[domain_idx].clone();
        let owner = self.pick_user();
        let name = self.next_name("t");
        let params = json!({
            "domain": domain.name,
            "names": [name],
            "owner": [self.address(owner)],
        });
        self.tokens.push(Token {
            domain: domain_idx,
            name,
            owner,
        });
        grant(params, vec![self.key(domain.creator)])
    }

    fn transfer(&mut self) -> Grant {
        let token_idx = self.rng.gen_range(0..self.tokens.len());
        let token = self.tokens[token_idx].clone();
        let to = self.pick_other_user(token.owner);
        let params = json!({
            "domain": self.domains[token.domain].name,
            "name": token.name,
            "to": [self.address(to)],
            "memo": self.memo(),
        });
        self.tokens[token_idx].owner = to;
        grant(params, vec![self.key(token.owner)])
    }

    fn destroy_token(&mut self) -> Grant {
        let token_idx = self.rng.gen_range(0..self.tokens.len());
        let token = self.tokens.swap_remove(token_idx);
        let params = json!({
            "domain": self.domains[token.domain].name,
            "name": token.name,
        });
        grant(params, vec![self.key(token.owner)])
    }

    fn new_fungible(&mut self) -> Grant {
        let creator = self.pick_user();
        let sym_id = self.fungibles.len() as u32 + 1;
        let name = self.next_name("f");
        let params = json!({
            "name": name,
            "sym_name": name,
            "sym": format!("{FUNGIBLE_PRECISION},S#{sym_id}"),
            "creator": self.address(creator),
            "total_supply": Self::asset(FUNGIBLE_SUPPLY, sym_id),
        });
        self.fungibles.push(Fungible { sym_id, creator });
        grant(params, vec![self.key(creator)])
    }

    fn issue_fungible(&mut self) -> Grant {
        let fungible = self.rng.gen_range(0..self.fungibles.len());
        let Fungible { sym_id, creator } = self.fungibles[fungible];
        let to = self.pick_user();
        let amount = self.rng.gen_range(1..=MAX_ISSUE_AMOUNT);
        let params = json!({
            "address": self.address(to),
            "number": Self::asset(amount, sym_id),
            "memo": self.memo(),
        });
        self.credit(to, fungible, amount);
        grant(params, vec![self.key(creator)])
    }

    fn transfer_ft(&mut self) -> Grant {
        let holding_idx = self.rng.gen_range(0..self.holdings.len());
        let Holding { user, fungible, amount: held } = self.holdings[holding_idx];
        let to = self.pick_other_user(user);
        let amount = self.rng.gen_range(1..=held);
        let sym_id = self.fungibles[fungible].sym_id;
        let params = json!({
            "from": self.address(user),
            "to": self.address(to),
            "number": Self::asset(amount, sym_id),
            "memo": self.memo(),
        });

        if amount == held {
            self.holdings.swap_remove(holding_idx);
        } else {
            self.holdings[holding_idx].amount -= amount;
        }
        self.credit(to, fungible, amount);
        grant(params, vec![self.key(user)])
    }

    fn credit(&mut self, user: usize, fungible: usize, amount: u64) {
        match self
            .holdings
            .iter_mut()
            .find(|h| h.user == user && h.fungible == fungible)
        {
            Some(holding) => holding.amount += amount,
            None => self.holdings.push(Holding {
                user,
                fungible,
                amount,
            }),
        }
    }
}

fn grant(params: Value, keys: Vec<SigningKey>) -> Grant {
    let params = match params {
        Value::Object(map) => map,
        _ => Params::new(),
    };
    Grant { params, keys }
}

impl FeasibilityOracle for RandomPool {
    type Request = Result<Grant, PoolError>;

    fn satisfies(&self, action: &str) -> bool {
        ActionKind::from_str(action).is_ok_and(|kind| self.satisfy_action(kind))
    }

    fn request(&mut self, action: &str) -> Self::Request {
        let kind =
            ActionKind::from_str(action).map_err(|_| PoolError::UnknownAction(action.to_string()))?;
        self.require(kind)
    }
}
