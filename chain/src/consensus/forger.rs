//! Local block production.
//!
//! The forger is driven by a periodic [`Forger::tick`]:
//!
//! - work and agreement chains keep one mining attempt, a [`Candidate`]
//!   on the current head, and try `hashes_per_tick` nonces per tick. A
//!   new head, a changed pending pool or a changed vote invalidate the
//!   attempt, and a clock that moved past the candidate's timestamp
//!   restamps it.
//! - stake chains rank the local generators by `hit / stake` on the
//!   current head and forge for the best one once its deadline arrives.
//!
//! Hashing and signing happen without the chain lock; it is taken only to
//! snapshot the head and to push a finished block.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crypto;
use crate::types::{AccountId, Block, BlockId, Candidate, ConsensusVariant, ProofParams, PublicKey};

use super::agreement;
use super::context::ChainContext;
use super::error::ChainError;
use super::pos::{self, GeneratorRank};
use super::pow;

/// Forging configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ForgingConfig {
    /// Start mining (work and agreement chains) at boot.
    pub mine_on_start: bool,
    pub tick_ms: u64,
    /// Nonces tried per tick.
    pub hashes_per_tick: u64,
    /// Stake generators to start with.
    pub secret_phrases: Vec<String>,
    pub vote: Option<String>,
    pub actor: Option<String>,
}

impl Default for ForgingConfig {
    fn default() -> Self {
        Self {
            mine_on_start: false,
            tick_ms: 200,
            hashes_per_tick: 10_000,
            secret_phrases: Vec::new(),
            vote: None,
            actor: None,
        }
    }
}

impl ForgingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// What one tick did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ForgeOutcome {
    /// Nothing to forge with: mining is off, or no generator holds stake.
    Idle,
    /// Nonces tried, none met the target.
    Searching { height: u64 },
    /// The best generator may publish at `deadline`.
    Waiting { account: AccountId, deadline: u64 },
    Forged { height: u64, id: BlockId },
    /// The finished block was refused, usually because the head moved.
    Dropped { reason: String },
}

/// Forging state exposed over the API.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgerStatus {
    pub forging: bool,
    pub mining: bool,
    pub generators: Vec<AccountId>,
    pub vote: Option<String>,
    pub actor: Option<String>,
}

struct Generator {
    key: SigningKey,
    public_key: PublicKey,
}

struct Attempt {
    candidate: Candidate,
    head: BlockId,
    pool_version: u64,
    params: ProofParams,
}

impl Attempt {
    /// Whether the attempt has to be rebuilt before hashing on.
    fn is_stale(&self, head: BlockId, pool_version: u64, params: &ProofParams, now: u64) -> bool {
        self.head != head
            || self.pool_version != pool_version
            || self.params != *params
            || now > self.candidate.timestamp()
    }
}

/// Stake ranking of the local generators on one head.
struct Ranking {
    head: BlockId,
    ranked: Vec<(GeneratorRank, u64)>,
}

#[derive(Default)]
struct ForgerState {
    mining: bool,
    vote: Option<(String, String)>,
    generators: BTreeMap<AccountId, Generator>,
    attempt: Option<Attempt>,
    ranking: Option<Ranking>,
}

pub struct Forger {
    ctx: Arc<ChainContext>,
    variant: ConsensusVariant,
    hashes_per_tick: u64,
    state: Mutex<ForgerState>,
}

impl Forger {
    pub fn new(ctx: Arc<ChainContext>) -> Self {
        let hashes_per_tick = ctx.config().forging.hashes_per_tick;
        let variant = ctx.lock().config().variant;
        Self {
            ctx,
            variant,
            hashes_per_tick,
            state: Mutex::new(ForgerState::default()),
        }
    }

    /// Builds a forger and applies the startup settings of the forging
    /// configuration.
    pub fn from_config(ctx: Arc<ChainContext>) -> Result<Self, ChainError> {
        let cfg = ctx.config().forging.clone();
        let forger = Self::new(ctx);
        for phrase in &cfg.secret_phrases {
            forger.add_generator(phrase);
        }
        if let (Some(vote), Some(actor)) = (cfg.vote, cfg.actor) {
            forger.set_agreement(vote, actor)?;
        }
        if cfg.mine_on_start {
            forger.start_mining();
        }
        Ok(forger)
    }

    fn state(&self) -> MutexGuard<'_, ForgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start_mining(&self) {
        let mut state = self.state();
        if !state.mining {
            info!("mining started");
        }
        state.mining = true;
    }

    pub fn stop_mining(&self) {
        let mut state = self.state();
        if state.mining {
            info!("mining stopped");
        }
        state.mining = false;
        state.attempt = None;
    }

    /// Sets the vote and actor carried by agreement blocks.
    pub fn set_agreement(&self, vote: String, actor: String) -> Result<(), ChainError> {
        agreement::check_fields(&vote, &actor)?;
        info!(vote = %vote, actor = %actor, "agreement vote set");
        self.state().vote = Some((vote, actor));
        Ok(())
    }

    /// Registers a stake generator. Returns its account.
    pub fn add_generator(&self, secret_phrase: &str) -> AccountId {
        let key = crypto::signing_key(secret_phrase);
        let public_key = crypto::public_key(&key);
        let account = public_key.account_id();
        let mut state = self.state();
        state.generators.insert(account, Generator { key, public_key });
        state.ranking = None;
        info!(account = %account, "generator added");
        account
    }

    /// Removes a stake generator. Returns `false` if it was not forging.
    pub fn remove_generator(&self, secret_phrase: &str) -> bool {
        let account = crypto::account_id(secret_phrase);
        let mut state = self.state();
        let removed = state.generators.remove(&account).is_some();
        if removed {
            state.ranking = None;
            info!(account = %account, "generator removed");
        }
        removed
    }

    /// Consensus variant of the chain this forger produces for.
    pub fn variant(&self) -> ConsensusVariant {
        self.variant
    }

    pub fn is_forging(&self) -> bool {
        let state = self.state();
        match self.variant {
            ConsensusVariant::Stake => !state.generators.is_empty(),
            ConsensusVariant::Work => state.mining,
            ConsensusVariant::Agreement => state.mining && state.vote.is_some(),
        }
    }

    pub fn status(&self) -> ForgerStatus {
        let forging = self.is_forging();
        let state = self.state();
        ForgerStatus {
            forging,
            mining: state.mining,
            generators: state.generators.keys().copied().collect(),
            vote: state.vote.as_ref().map(|(v, _)| v.clone()),
            actor: state.vote.as_ref().map(|(_, a)| a.clone()),
        }
    }

    /// Runs one forging step.
    ///
    /// Only fatal chain errors are returned. A refused block is reported
    /// as [`ForgeOutcome::Dropped`].
    pub fn tick(&self) -> Result<ForgeOutcome, ChainError> {
        match self.variant {
            ConsensusVariant::Stake => self.tick_stake(),
            ConsensusVariant::Work | ConsensusVariant::Agreement => self.tick_work(),
        }
    }

    fn mining_params(&self) -> Option<ProofParams> {
        let state = self.state();
        if !state.mining {
            return None;
        }
        match self.variant {
            ConsensusVariant::Agreement => {
                let (vote, actor) = state.vote.clone()?;
                Some(ProofParams::Agreement { vote, actor })
            }
            _ => Some(ProofParams::Work),
        }
    }

    fn tick_work(&self) -> Result<ForgeOutcome, ChainError> {
        let Some(params) = self.mining_params() else {
            return Ok(ForgeOutcome::Idle);
        };

        let now = self.ctx.now();
        let previous = self.state().attempt.take();
        let mut attempt = {
            let chain = self.ctx.lock();
            let head = chain.head().id();
            let pool_version = chain
                .pool()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .version();
            match previous {
                Some(a) if !a.is_stale(head, pool_version, &params, now) => a,
                _ => {
                    let cfg = chain.config();
                    let txs = chain
                        .pool()
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .select_for_block(cfg.max_block_txs, cfg.max_payload_bytes);
                    let head_block = chain.head();
                    let timestamp = now.max(head_block.timestamp() + 1);
                    let candidate = chain.engine().build_candidate(
                        head_block,
                        timestamp,
                        txs,
                        params.clone(),
                        &chain.ancestry(),
                    );
                    match candidate {
                        Ok(candidate) => Attempt {
                            candidate,
                            head,
                            pool_version,
                            params,
                        },
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            debug!(error = %e, "could not build a candidate");
                            return Ok(ForgeOutcome::Dropped {
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        };

        if !pow::search(&mut attempt.candidate, self.hashes_per_tick) {
            let height = attempt.candidate.height();
            let mut state = self.state();
            if state.mining {
                state.attempt = Some(attempt);
            }
            return Ok(ForgeOutcome::Searching { height });
        }
        self.submit(attempt.candidate)
    }

    fn tick_stake(&self) -> Result<ForgeOutcome, ChainError> {
        let now = self.ctx.now();
        let (rank, deadline) = match self.best_generator()? {
            Some(best) => best,
            None => return Ok(ForgeOutcome::Idle),
        };
        if deadline > now {
            return Ok(ForgeOutcome::Waiting {
                account: rank.account,
                deadline,
            });
        }

        let (key, public_key) = {
            let state = self.state();
            let Some(generator) = state.generators.get(&rank.account) else {
                return Ok(ForgeOutcome::Idle);
            };
            (generator.key.clone(), generator.public_key.clone())
        };

        let built = {
            let chain = self.ctx.lock();
            let cfg = chain.config();
            let txs = chain
                .pool()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .select_for_block(cfg.max_block_txs, cfg.max_payload_bytes);
            let head = chain.head();
            chain.engine().build_candidate(
                head,
                now.max(head.timestamp() + 1),
                txs,
                ProofParams::Stake {
                    generator_public_key: public_key,
                },
                &chain.ancestry(),
            )
        };
        let mut candidate = match built {
            Ok(candidate) => candidate,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(error = %e, "could not build a stake candidate");
                return Ok(ForgeOutcome::Dropped {
                    reason: e.to_string(),
                });
            }
        };
        candidate.sign(&key)?;
        self.submit(candidate)
    }

    /// Best-ranked generator with stake, and its deadline.
    ///
    /// Rankings are cached per head. Adding or removing a generator drops
    /// the cache.
    fn best_generator(&self) -> Result<Option<(GeneratorRank, u64)>, ChainError> {
        let keys: Vec<(AccountId, PublicKey)> = {
            let state = self.state();
            if state.generators.is_empty() {
                return Ok(None);
            }
            state
                .generators
                .iter()
                .map(|(a, g)| (*a, g.public_key.clone()))
                .collect()
        };

        let chain = self.ctx.lock();
        let head = chain.head();
        {
            let state = self.state();
            if let Some(r) = &state.ranking {
                if r.head == head.id() {
                    return Ok(r.ranked.first().cloned());
                }
            }
        }

        let previous_gs = head.generation_signature().ok_or_else(|| {
            ChainError::Fatal("stake chain head carries no generation signature".to_string())
        })?;
        let mut ranked: Vec<(GeneratorRank, u64)> = keys
            .iter()
            .filter_map(|(account, public_key)| {
                let hit = pos::hit(&pos::generation_signature(previous_gs, public_key));
                let stake = chain.ledger().effective_stake(account);
                let deadline = pos::hit_time(head, hit, stake)?;
                Some((
                    GeneratorRank {
                        account: *account,
                        hit,
                        stake,
                    },
                    deadline,
                ))
            })
            .collect();
        ranked.sort_by(|(a, _), (b, _)| a.compare(b));
        let best = ranked.first().cloned();

        self.state().ranking = Some(Ranking {
            head: head.id(),
            ranked,
        });
        Ok(best)
    }

    fn submit(&self, candidate: Candidate) -> Result<ForgeOutcome, ChainError> {
        let block: Block = candidate.freeze()?;
        let (height, id) = (block.height(), block.id());
        let tx_count = block.transactions().len();

        self.state().attempt = None;
        match self.ctx.push_block(block) {
            Ok(()) => {
                info!(height, id = %id, txs = tx_count, "forged block");
                Ok(ForgeOutcome::Forged { height, id })
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(height, error = %e, "own block refused");
                Ok(ForgeOutcome::Dropped {
                    reason: e.to_string(),
                })
            }
        }
    }
}
