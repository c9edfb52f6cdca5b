//! Scripted in-memory Chain Service used by the unit tests.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bitebot_chain::{BiteTransaction, ChainError, ChainService, Cup, CupId, TransactionHandle};

use crate::position::Position;

/// Scripted answer of the safety predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Safe,
    Unsafe,
    Unavailable,
    /// The node stopped answering
    Disconnected,
}

/// How a bite for a given cup plays out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitePlan {
    Confirm,
    RejectSubmission,
    Revert,
    ConfirmationTimeout,
}

pub fn id(n: u64) -> CupId {
    CupId::new(n).unwrap()
}

pub fn cup(n: u64) -> Cup {
    Cup {
        id: id(n),
        lad: Address::repeat_byte(0x42),
        ink: U256::from(100u64),
        art: U256::from(50u64),
        ire: U256::from(50u64),
    }
}

pub fn position(n: u64) -> Position {
    Position::new(cup(n))
}

#[derive(Default)]
struct State {
    safety: HashMap<u64, VecDeque<Answer>>,
    safety_queries: HashMap<u64, usize>,
    bite_plans: HashMap<u64, BitePlan>,
    bites: Vec<CupId>,
}

/// Mock chain with a fixed set of existing cups and scripted answers.
pub struct MockChain {
    existing: HashSet<u64>,
    unreachable: HashSet<u64>,
    dead_rpc: bool,
    fail_auth: bool,
    mined_delay: Duration,
    finality_delay: Duration,
    state: Mutex<State>,
}

impl MockChain {
    pub fn new(existing: &[u64]) -> Self {
        Self {
            existing: existing.iter().copied().collect(),
            unreachable: HashSet::new(),
            dead_rpc: false,
            fail_auth: false,
            mined_delay: Duration::ZERO,
            finality_delay: Duration::ZERO,
            state: Mutex::new(State::default()),
        }
    }

    /// Ids whose existence query fails with a non-`NotFound` error.
    pub fn with_unreachable(mut self, ids: &[u64]) -> Self {
        self.unreachable = ids.iter().copied().collect();
        self
    }

    /// Every existence query fails with a connection error.
    pub fn with_dead_rpc(mut self) -> Self {
        self.dead_rpc = true;
        self
    }

    pub fn with_failing_auth(mut self) -> Self {
        self.fail_auth = true;
        self
    }

    pub fn with_delays(mut self, mined: Duration, finality: Duration) -> Self {
        self.mined_delay = mined;
        self.finality_delay = finality;
        self
    }

    /// Answers returned by successive safety queries; the last one repeats.
    pub fn script(self, n: u64, answers: &[Answer]) -> Self {
        self.state.lock().safety.insert(n, answers.iter().copied().collect());
        self
    }

    pub fn plan(self, n: u64, plan: BitePlan) -> Self {
        self.state.lock().bite_plans.insert(n, plan);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Every bite submission, in order.
    pub fn bites(&self) -> Vec<CupId> {
        self.state.lock().bites.clone()
    }

    pub fn bites_for(&self, n: u64) -> usize {
        self.state.lock().bites.iter().filter(|b| b.get() == n).count()
    }

    pub fn safety_queries(&self, n: u64) -> usize {
        self.state.lock().safety_queries.get(&n).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ChainService for MockChain {
    async fn authenticate(&self) -> Result<Address, ChainError> {
        if self.fail_auth {
            return Err(ChainError::Authentication("bad key".to_string()));
        }
        Ok(Address::repeat_byte(0xaa))
    }

    async fn get_position(&self, id: CupId) -> Result<Cup, ChainError> {
        tokio::task::yield_now().await;
        if self.dead_rpc {
            return Err(ChainError::Connection("connection refused".to_string()));
        }
        if self.unreachable.contains(&id.get()) {
            return Err(ChainError::Unavailable {
                id,
                reason: "timeout".to_string(),
            });
        }
        if self.existing.contains(&id.get()) {
            Ok(cup(id.get()))
        } else {
            Err(ChainError::NotFound(id))
        }
    }

    async fn is_safe(&self, cup: &Cup) -> Result<bool, ChainError> {
        tokio::task::yield_now().await;
        let n = cup.id.get();
        let answer = {
            let mut state = self.state.lock();
            *state.safety_queries.entry(n).or_default() += 1;
            let script = state.safety.entry(n).or_default();
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().copied()
            }
        };
        match answer.unwrap_or(Answer::Safe) {
            Answer::Safe => Ok(true),
            Answer::Unsafe => Ok(false),
            Answer::Unavailable => Err(ChainError::Unavailable {
                id: cup.id,
                reason: "cup state unreadable".to_string(),
            }),
            Answer::Disconnected => Err(ChainError::Connection("connection reset".to_string())),
        }
    }

    async fn bite(&self, id: CupId) -> Result<TransactionHandle, ChainError> {
        tokio::task::yield_now().await;
        let plan = {
            let mut state = self.state.lock();
            state.bites.push(id);
            state
                .bite_plans
                .get(&id.get())
                .copied()
                .unwrap_or(BitePlan::Confirm)
        };
        if plan == BitePlan::RejectSubmission {
            return Err(ChainError::Submission {
                id,
                reason: "nonce too low".to_string(),
            });
        }
        let tx = MockTx {
            hash: B256::from(U256::from(id.get())),
            plan,
            mined_delay: self.mined_delay,
            finality_delay: self.finality_delay,
        };
        Ok(TransactionHandle::new(id, Box::new(tx)))
    }
}

struct MockTx {
    hash: B256,
    plan: BitePlan,
    mined_delay: Duration,
    finality_delay: Duration,
}

#[async_trait]
impl BiteTransaction for MockTx {
    fn hash(&self) -> B256 {
        self.hash
    }

    async fn mined(&self) -> Result<u64, ChainError> {
        tokio::time::sleep(self.mined_delay).await;
        match self.plan {
            BitePlan::Revert => Err(ChainError::Reverted { tx: self.hash }),
            _ => Ok(1_000),
        }
    }

    async fn finalized(&self, mined_block: u64) -> Result<u64, ChainError> {
        tokio::time::sleep(self.finality_delay).await;
        Ok(mined_block + 1)
    }

    async fn confirm(&self, finalized_block: u64, blocks: u64) -> Result<u64, ChainError> {
        match self.plan {
            BitePlan::ConfirmationTimeout => Err(ChainError::ConfirmationTimeout {
                tx: self.hash,
                blocks,
            }),
            _ => Ok(finalized_block + blocks),
        }
    }
}
