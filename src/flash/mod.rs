//! Flash loans against the pool's ledger balance.
//!
//! Under [`SettlementPolicy::Guarded`] a loan only completes when the pool's
//! balance is back to at least its pre-loan value, the pool's outstanding
//! allowances match their pre-loan values (with the borrower's forced to zero),
//! and the borrower never got to act with the pool's identity.
//! [`SettlementPolicy::Unguarded`] keeps the historical behaviour so the drain
//! can be replayed on purpose.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, ItemId, Quantity};
use crate::env::{Event, Timestamp};
use crate::error::{ArmoryResult, InvariantViolation, ReentrancyHazard};
use crate::ledger::{AccountId, Amount, Ledger};
use crate::roles::RoleRegistry;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementPolicy {
    #[default]
    Guarded,
    /// No restoration checks; pool calls run with the pool's identity.
    Unguarded,
}

/// Calldata a legacy borrower asks the pool to execute against the ledger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerCall {
    Approve { spender: AccountId, amount: Amount },
    Transfer { to: AccountId, amount: Amount },
    TransferFrom { owner: AccountId, to: AccountId, amount: Amount },
    Burn { amount: Amount },
}

impl LedgerCall {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerCall::Approve { .. } => "approve",
            LedgerCall::Transfer { .. } => "transfer",
            LedgerCall::TransferFrom { .. } => "transfer_from",
            LedgerCall::Burn { .. } => "burn",
        }
    }

    fn dispatch(&self, ledger: &mut Ledger, caller: &AccountId) -> ArmoryResult<()> {
        match self {
            LedgerCall::Approve { spender, amount } => ledger.approve(caller, spender, *amount),
            LedgerCall::Transfer { to, amount } => ledger.transfer(caller, to, *amount),
            LedgerCall::TransferFrom { owner, to, amount } => {
                ledger.transfer_from(caller, owner, to, *amount)
            }
            LedgerCall::Burn { amount } => ledger.burn(caller, *amount),
        }
    }
}

/// Borrower-side code run while the loan is outstanding.
pub trait FlashReceiver {
    fn on_flash_loan(&mut self, scope: &mut FlashScope<'_>, amount: Amount) -> ArmoryResult<()>;
}

impl<F> FlashReceiver for F
where
    F: FnMut(&mut FlashScope<'_>, Amount) -> ArmoryResult<()>,
{
    fn on_flash_loan(&mut self, scope: &mut FlashScope<'_>, amount: Amount) -> ArmoryResult<()> {
        self(scope, amount)
    }
}

/// What runs between disbursement and settlement.
pub enum FlashAction<'r> {
    None,
    PoolCall(LedgerCall),
    Receiver(&'r mut dyn FlashReceiver),
}

impl FlashAction<'_> {
    fn label(&self) -> &'static str {
        match self {
            FlashAction::None => "none",
            FlashAction::PoolCall(call) => call.name(),
            FlashAction::Receiver(_) => "receiver",
        }
    }
}

/// The books a loan may touch, plus the transaction's event journal.
pub struct Books<'a> {
    pub ledger: &'a mut Ledger,
    pub catalog: &'a mut Catalog,
    pub roles: &'a RoleRegistry,
    pub journal: &'a mut Vec<Event>,
}

impl<'a> Books<'a> {
    pub fn new(
        ledger: &'a mut Ledger,
        catalog: &'a mut Catalog,
        roles: &'a RoleRegistry,
        journal: &'a mut Vec<Event>,
    ) -> Self {
        Self {
            ledger,
            catalog,
            roles,
            journal,
        }
    }

    fn reborrow(&mut self) -> Books<'_> {
        Books {
            ledger: &mut *self.ledger,
            catalog: &mut *self.catalog,
            roles: self.roles,
            journal: &mut *self.journal,
        }
    }

    /// Moves pending ledger and catalog events into the journal, ledger first.
    fn flush(&mut self) {
        self.journal.extend(self.ledger.events.drain(..).map(Event::Ledger));
        self.journal.extend(self.catalog.events.drain(..).map(Event::Catalog));
    }
}

/// Re-entry point into the ledger and catalog for a receiver. Every call
/// runs with the borrower's identity and is journaled as soon as it returns.
pub struct FlashScope<'a> {
    books: Books<'a>,
    borrower: AccountId,
    pool: AccountId,
    now: Timestamp,
}

impl FlashScope<'_> {
    pub fn borrower(&self) -> &AccountId {
        &self.borrower
    }

    pub fn pool(&self) -> &AccountId {
        &self.pool
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.books.ledger.balance_of(account)
    }

    pub fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount {
        self.books.ledger.allowance(owner, spender)
    }

    fn journaled<T>(&mut self, result: ArmoryResult<T>) -> ArmoryResult<T> {
        self.books.flush();
        result
    }

    pub fn transfer(&mut self, to: &AccountId, amount: Amount) -> ArmoryResult<()> {
        let result = self.books.ledger.transfer(&self.borrower, to, amount);
        self.journaled(result)
    }

    /// Sends `amount` back to the pool.
    pub fn repay(&mut self, amount: Amount) -> ArmoryResult<()> {
        let result = self.books.ledger.transfer(&self.borrower, &self.pool, amount);
        self.journaled(result)
    }

    pub fn approve(&mut self, spender: &AccountId, amount: Amount) -> ArmoryResult<()> {
        let result = self.books.ledger.approve(&self.borrower, spender, amount);
        self.journaled(result)
    }

    pub fn transfer_from(
        &mut self,
        owner: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        let result = self
            .books
            .ledger
            .transfer_from(&self.borrower, owner, to, amount);
        self.journaled(result)
    }

    pub fn burn(&mut self, amount: Amount) -> ArmoryResult<()> {
        let result = self.books.ledger.burn(&self.borrower, amount);
        self.journaled(result)
    }

    pub fn approve_staker(
        &mut self,
        owner: &AccountId,
        spender: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        let result = self
            .books
            .ledger
            .approve_staker(self.books.roles, &self.borrower, owner, spender, amount);
        self.journaled(result)
    }

    pub fn purchase(&mut self, id: ItemId, quantity: Quantity) -> ArmoryResult<Amount> {
        let result = self.books.catalog.purchase(
            self.books.ledger,
            self.books.roles,
            &self.borrower,
            id,
            quantity,
            self.now,
        );
        self.journaled(result)
    }

    pub fn safe_transfer_from(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        id: ItemId,
        amount: Quantity,
    ) -> ArmoryResult<()> {
        let result = self
            .books
            .catalog
            .safe_transfer_from(&self.borrower, from, to, id, amount);
        self.journaled(result)
    }

    /// The pool is exclusively held for the duration of a loan.
    pub fn flash_loan(&mut self, _amount: Amount) -> ArmoryResult<FlashReceipt> {
        Err(ReentrancyHazard::NestedFlashLoan.into())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlashReceipt {
    pub borrower: AccountId,
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlashEvent {
    FlashLoan {
        borrower: AccountId,
        amount: Amount,
        policy: SettlementPolicy,
        balance_before: Amount,
        balance_after: Amount,
    },
    AllowanceReset {
        spender: AccountId,
        from: Amount,
        to: Amount,
    },
}

/// The lending pool: an account on the ledger plus its settlement policy.
#[derive(Clone, Debug)]
pub struct LendingPool {
    address: AccountId,
    policy: SettlementPolicy,
}

impl LendingPool {
    pub fn new(address: impl Into<AccountId>, policy: SettlementPolicy) -> Self {
        Self {
            address: address.into(),
            policy,
        }
    }

    pub fn address(&self) -> &AccountId {
        &self.address
    }

    pub fn policy(&self) -> SettlementPolicy {
        self.policy
    }

    /// Lends `amount` of the pool's balance to `borrower` and runs `action`.
    ///
    /// Events land in `books.journal` in the order they happen. Errors leave
    /// partial effects behind; callers must run this inside a scope that
    /// discards the books on failure.
    pub fn flash_loan(
        &self,
        mut books: Books<'_>,
        borrower: &AccountId,
        amount: Amount,
        action: FlashAction<'_>,
        now: Timestamp,
    ) -> ArmoryResult<FlashReceipt> {
        let guarded = self.policy == SettlementPolicy::Guarded;
        if guarded {
            if let FlashAction::PoolCall(call) = &action {
                return Err(ReentrancyHazard::PoolIdentityCall { call: call.name() }.into());
            }
        }

        books.flush();
        let balance_before = books.ledger.balance_of(&self.address);
        let allowances_before = books.ledger.allowances_of(&self.address);
        tracing::debug!(
            pool = %self.address,
            %borrower,
            amount,
            balance_before,
            action = action.label(),
            "flash loan disbursing"
        );

        if amount > 0 {
            books.ledger.transfer(&self.address, borrower, amount)?;
            books.flush();
        }

        match action {
            FlashAction::None => {}
            FlashAction::PoolCall(call) => call.dispatch(books.ledger, &self.address)?,
            FlashAction::Receiver(receiver) => {
                let mut scope = FlashScope {
                    books: books.reborrow(),
                    borrower: borrower.clone(),
                    pool: self.address.clone(),
                    now,
                };
                receiver.on_flash_loan(&mut scope, amount)?;
            }
        }
        books.flush();

        if guarded {
            let current = books.ledger.allowances_of(&self.address);
            let spenders: BTreeSet<AccountId> = current
                .keys()
                .chain(allowances_before.keys())
                .cloned()
                .collect();
            for spender in spenders {
                let expected = if &spender == borrower {
                    0
                } else {
                    allowances_before.get(&spender).copied().unwrap_or(0)
                };
                let actual = current.get(&spender).copied().unwrap_or(0);
                if actual != expected {
                    books.ledger.set_allowance(&self.address, &spender, expected);
                    books.flush();
                    books.journal.push(Event::Flash(FlashEvent::AllowanceReset {
                        spender,
                        from: actual,
                        to: expected,
                    }));
                }
            }
        }

        let balance_after = books.ledger.balance_of(&self.address);
        if guarded && balance_after < balance_before {
            return Err(InvariantViolation::FlashLoanNotRepaid {
                before: balance_before,
                after: balance_after,
            }
            .into());
        }

        books.journal.push(Event::Flash(FlashEvent::FlashLoan {
            borrower: borrower.clone(),
            amount,
            policy: self.policy,
            balance_before,
            balance_after,
        }));
        Ok(FlashReceipt {
            borrower: borrower.clone(),
            amount,
            balance_before,
            balance_after,
        })
    }
}
