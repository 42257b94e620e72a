use crate::{
    error::{
        Result,
        SlotsError,
    },
    types::{
        Bytes32,
        ConfigSnapshot,
        TokenBalance,
    },
};
use ethers::types::{
    Address,
    U256,
};
use serde::Serialize;
use std::sync::{
    Mutex,
    MutexGuard,
    PoisonError,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum CommitmentState {
    #[default]
    Unset,
    Committing,
    Set(Bytes32),
}

impl CommitmentState {
    pub fn from_chain(value: Bytes32) -> Self {
        if value.is_zero() {
            CommitmentState::Unset
        } else {
            CommitmentState::Set(value)
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, CommitmentState::Set(_))
    }
}

/// Point-in-time copy of everything the client knows about the session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub user: Option<Address>,
    pub owner: Option<Address>,
    pub commitment: CommitmentState,
    pub config: Option<ConfigSnapshot>,
    pub balance: Option<U256>,
    pub loyalty: Option<TokenBalance>,
    pub commit_attempted: bool,
    pub events_bound: bool,
}

#[derive(Default)]
struct SessionState {
    snapshot: SessionSnapshot,
    // Written by our own commit, checked against the next chain read.
    unverified_commit: Option<Bytes32>,
}

/// Session-scoped cache and latches. Reads hand out copies; no lock is held
/// past a method call.
#[derive(Default)]
pub struct Session {
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn user(&self) -> Option<Address> {
        self.lock().snapshot.user
    }

    pub fn owner(&self) -> Option<Address> {
        self.lock().snapshot.owner
    }

    pub fn commitment(&self) -> CommitmentState {
        self.lock().snapshot.commitment
    }

    pub fn set_user(&self, user: Option<Address>) {
        self.lock().snapshot.user = user;
    }

    pub fn set_owner(&self, owner: Address) {
        self.lock().snapshot.owner = Some(owner);
    }

    pub fn set_balance(&self, balance: Option<U256>) {
        self.lock().snapshot.balance = balance;
    }

    pub fn set_loyalty(&self, loyalty: Option<TokenBalance>) {
        self.lock().snapshot.loyalty = loyalty;
    }

    pub fn begin_commit(&self) {
        self.lock().snapshot.commitment = CommitmentState::Committing;
    }

    /// Records the committed value without re-reading the chain.
    pub fn finish_commit(&self, commitment: Bytes32) {
        let mut state = self.lock();
        state.snapshot.commitment = CommitmentState::Set(commitment);
        state.unverified_commit = Some(commitment);
    }

    pub fn abort_commit(&self) {
        let mut state = self.lock();
        if state.snapshot.commitment == CommitmentState::Committing {
            state.snapshot.commitment = CommitmentState::Unset;
        }
    }

    /// Takes the chain's commitment as truth. A non-zero value that differs
    /// from our own unverified commit is reported as a mismatch after the
    /// cache has been corrected.
    pub fn observe_commitment(&self, onchain: Bytes32) -> Result<()> {
        let mut state = self.lock();
        let local = state.unverified_commit.take();
        state.snapshot.commitment = CommitmentState::from_chain(onchain);
        match local {
            Some(local) if !onchain.is_zero() && onchain != local => {
                Err(SlotsError::CommitmentMismatch {
                    local: local.to_string(),
                    chain: onchain.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn apply_refresh(
        &self,
        config: ConfigSnapshot,
        commitment: Bytes32,
        owner: Address,
    ) -> Result<()> {
        {
            let mut state = self.lock();
            state.snapshot.config = Some(config);
            state.snapshot.owner = Some(owner);
        }
        self.observe_commitment(commitment)
    }

    /// One-shot auto-commit latch. True only for the first caller.
    pub fn arm_commit_latch(&self) -> bool {
        let mut state = self.lock();
        !std::mem::replace(&mut state.snapshot.commit_attempted, true)
    }

    pub fn reset_commit_latch(&self) {
        self.lock().snapshot.commit_attempted = false;
    }

    /// Bound-once latch for the spin request subscription.
    pub fn bind_events(&self) -> bool {
        let mut state = self.lock();
        !std::mem::replace(&mut state.snapshot.events_bound, true)
    }

    pub fn unbind_events(&self) {
        self.lock().snapshot.events_bound = false;
    }

    /// Forgets the connected account but keeps contract-level state.
    pub fn clear_account(&self) {
        let mut state = self.lock();
        state.snapshot.user = None;
        state.snapshot.balance = None;
        state.snapshot.loyalty = None;
        state.snapshot.commit_attempted = false;
    }

    pub fn reset(&self) {
        *self.lock() = SessionState::default();
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn word(byte: u8) -> Bytes32 {
        Bytes32([byte; 32])
    }

    #[test]
    fn apply_refresh__overwrites_config_owner_and_commitment() {
        // given
        let session = Session::new();
        let config = ConfigSnapshot {
            min_bet: U256::from(1),
            max_bet: U256::from(10),
            ..ConfigSnapshot::default()
        };
        let owner = Address::repeat_byte(9);

        // when
        session.apply_refresh(config, word(1), owner).unwrap();

        // then
        let snapshot = session.snapshot();
        assert_eq!(snapshot.config, Some(config));
        assert_eq!(snapshot.owner, Some(owner));
        assert_eq!(snapshot.commitment, CommitmentState::Set(word(1)));
    }

    #[test]
    fn apply_refresh__zero_commit_reads_as_unset() {
        let session = Session::new();
        session.finish_commit(word(1));
        session
            .apply_refresh(ConfigSnapshot::default(), Bytes32::ZERO, Address::zero())
            .unwrap();
        assert_eq!(session.commitment(), CommitmentState::Unset);
    }

    #[test]
    fn observe_commitment__flags_disagreement_with_own_commit() {
        // given
        let session = Session::new();
        session.begin_commit();
        session.finish_commit(word(1));

        // when
        let result = session.observe_commitment(word(2));

        // then
        assert!(matches!(result, Err(SlotsError::CommitmentMismatch { .. })));
        assert_eq!(session.commitment(), CommitmentState::Set(word(2)));
        assert!(session.observe_commitment(word(3)).is_ok());
    }

    #[test]
    fn observe_commitment__accepts_matching_commit() {
        let session = Session::new();
        session.finish_commit(word(4));
        assert!(session.observe_commitment(word(4)).is_ok());
    }

    #[test]
    fn abort_commit__only_reverts_in_flight_commit() {
        let session = Session::new();
        session.begin_commit();
        session.abort_commit();
        assert_eq!(session.commitment(), CommitmentState::Unset);

        session.finish_commit(word(5));
        session.abort_commit();
        assert_eq!(session.commitment(), CommitmentState::Set(word(5)));
    }

    #[test]
    fn latches__fire_once_until_reset() {
        let session = Session::new();

        assert!(session.arm_commit_latch());
        assert!(!session.arm_commit_latch());
        session.clear_account();
        assert!(session.arm_commit_latch());

        assert!(session.bind_events());
        assert!(!session.bind_events());
        session.reset();
        assert!(session.bind_events());
    }

    #[test]
    fn snapshot__serializes_commitment_state() {
        let session = Session::new();
        session.finish_commit(word(0xab));
        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["commitment"]["state"], "set");
        assert_eq!(
            json["commitment"]["value"],
            format!("0x{}", "ab".repeat(32))
        );
    }
}
