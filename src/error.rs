use thiserror::Error;

use crate::ledger::{AccountId, Amount};
use crate::roles::Role;

/// Canonical error type returned by every core operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArmoryError {
    /// Caller lacks the role, ownership or admin flag the operation needs.
    #[error("unauthorized: {0}")]
    Authorization(#[from] AuthorizationError),

    /// A balance, supply or allowance rule would be broken.
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    /// Item identifier or batch shape out of range.
    #[error("out of bounds: {0}")]
    Bounds(#[from] BoundsError),

    /// A callback tried to act outside the flash-loan engine's mediation.
    #[error("re-entrancy hazard: {0}")]
    Reentrancy(#[from] ReentrancyHazard),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("{caller} is not the owner")]
    NotOwner { caller: AccountId },
    #[error("{caller} does not hold the {role} role")]
    MissingRole { caller: AccountId, role: Role },
    #[error("{caller} is not approved to move items of {owner}")]
    NotOperator { caller: AccountId, owner: AccountId },
    #[error("{caller} cannot run a flash loan callback as {borrower}")]
    NotBorrower { caller: AccountId, borrower: AccountId },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("minting {amount} would reach the supply cap {max_supply} (supply {supply})")]
    SupplyCapExceeded {
        supply: Amount,
        amount: Amount,
        max_supply: Amount,
    },
    #[error("insufficient balance in {account}: have {have}, need {need}")]
    InsufficientBalance {
        account: AccountId,
        have: Amount,
        need: Amount,
    },
    #[error("insufficient allowance from {owner} to {spender}: have {have}, need {need}")]
    InsufficientAllowance {
        owner: AccountId,
        spender: AccountId,
        have: Amount,
        need: Amount,
    },
    #[error("item {item} has {remaining} units left, requested {requested}")]
    InsufficientItemSupply {
        item: u64,
        remaining: u64,
        requested: u64,
    },
    #[error("{account} holds {have} of item {item}, needs {need}")]
    InsufficientItemBalance {
        account: AccountId,
        item: u64,
        have: u64,
        need: u64,
    },
    #[error("daily allowance for item {item} exhausted: {remaining} left, requested {requested}")]
    DailyAllowanceExceeded {
        item: u64,
        remaining: u64,
        requested: u64,
    },
    #[error("item {item} is not transferable")]
    NotTransferable { item: u64 },
    #[error("quantity must be greater than zero")]
    ZeroQuantity,
    #[error("flash loan not repaid: pool held {before}, now holds {after}")]
    FlashLoanNotRepaid { before: Amount, after: Amount },
    #[error("arithmetic overflow")]
    Overflow,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoundsError {
    #[error("unknown item {item} (catalog holds {len})")]
    UnknownItem { item: u64, len: u64 },
    #[error("batch length mismatch: {ids} ids, {amounts} amounts")]
    BatchLengthMismatch { ids: usize, amounts: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReentrancyHazard {
    #[error("flash loan requested while another loan is in flight")]
    NestedFlashLoan,
    #[error("call `{call}` cannot run with the pool's identity")]
    PoolIdentityCall { call: &'static str },
}

/// Result type for core operations.
pub type ArmoryResult<T> = Result<T, ArmoryError>;
