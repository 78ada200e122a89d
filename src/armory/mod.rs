//! Top-level context: owns every subsystem and runs each operation as a
//! transaction that either commits whole or leaves no trace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, HoldingEntry, ItemDefinition, ItemId, NewItem, Quantity};
use crate::config::ArmoryConfig;
use crate::env::{Clock, Event, EventSink, Timestamp};
use crate::error::{ArmoryResult, AuthorizationError};
use crate::flash::{Books, FlashAction, FlashReceipt, LendingPool, SettlementPolicy};
use crate::ledger::{build_merkle, AccountId, AllowanceEntry, Amount, Ledger};
use crate::roles::{Role, RoleRegistry};

/// Everything a transaction may touch.
///
/// Subsystem event buffers and the journal are empty between transactions,
/// so cloning a committed state copies no history.
#[derive(Clone, Debug)]
pub struct State {
    pub roles: RoleRegistry,
    pub ledger: Ledger,
    pub catalog: Catalog,
    pub pool: LendingPool,
    journal: Vec<Event>,
}

impl State {
    /// Moves pending subsystem events into the journal. Operations outside a
    /// loan either touch one subsystem or, like a purchase, finish their
    /// ledger work before the catalog records anything.
    fn flush(&mut self) {
        self.journal.extend(self.roles.events.drain(..).map(Event::Roles));
        self.journal.extend(self.ledger.events.drain(..).map(Event::Ledger));
        self.journal.extend(self.catalog.events.drain(..).map(Event::Catalog));
    }

    fn take_journal(&mut self) -> Vec<Event> {
        self.flush();
        std::mem::take(&mut self.journal)
    }

    pub fn state_root(&self) -> [u8; 32] {
        let mut leaves = self.roles.leaves();
        leaves.extend(self.ledger.leaves());
        leaves.extend(self.catalog.leaves());
        build_merkle(leaves)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleMember {
    pub role: Role,
    pub account: AccountId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArmorySnapshot {
    pub timestamp: Timestamp,
    pub owner: AccountId,
    pub roles: Vec<RoleMember>,
    pub total_supply: Amount,
    pub max_supply: Amount,
    pub balances: BTreeMap<AccountId, Amount>,
    pub allowances: Vec<AllowanceEntry>,
    pub items: Vec<ItemDefinition>,
    pub holdings: Vec<HoldingEntry>,
    pub pool: AccountId,
    pub flash_policy: SettlementPolicy,
    #[serde(with = "hex_root")]
    pub state_root: [u8; 32],
}

mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(root: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(root))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(text.trim()).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}

pub struct Armory {
    state: State,
    clock: Box<dyn Clock>,
    sink: Box<dyn EventSink>,
}

impl Armory {
    pub fn new(
        config: &ArmoryConfig,
        clock: impl Clock + 'static,
        sink: impl EventSink + 'static,
    ) -> ArmoryResult<Self> {
        let mut roles = RoleRegistry::new(config.owner.clone());
        if config.grant_shop_spender {
            roles.add_spender(&config.owner, &config.shop)?;
        }
        let mut state = State {
            roles,
            ledger: Ledger::new(config.max_supply),
            catalog: Catalog::new(
                config.shop.clone(),
                config.treasury.clone(),
                config.replenish_period,
            ),
            pool: LendingPool::new(config.pool.clone(), config.flash_policy),
            journal: Vec::new(),
        };
        let genesis = state.take_journal();
        let mut armory = Self {
            state,
            clock: Box::new(clock),
            sink: Box::new(sink),
        };
        armory.forward(&genesis);
        tracing::info!(
            owner = %config.owner,
            shop = %config.shop,
            pool = %config.pool,
            policy = ?config.flash_policy,
            "armory initialised"
        );
        Ok(armory)
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn forward(&mut self, events: &[Event]) {
        for event in events {
            self.sink.emit(event);
        }
    }

    /// Runs `op` against a draft of the state. The draft replaces the live
    /// state only when `op` succeeds; its journal then goes to the sink.
    pub fn transact<T>(
        &mut self,
        name: &'static str,
        caller: &AccountId,
        op: impl FnOnce(&mut State, Timestamp) -> ArmoryResult<T>,
    ) -> ArmoryResult<T> {
        let now = self.clock.now();
        let mut draft = self.state.clone();
        match op(&mut draft, now) {
            Ok(value) => {
                let events = draft.take_journal();
                self.state = draft;
                self.forward(&events);
                tracing::info!(op = name, %caller, events = events.len(), "committed");
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(op = name, %caller, %err, "aborted");
                Err(err)
            }
        }
    }

    // ---- ledger ----

    pub fn mint(&mut self, caller: &AccountId, to: &AccountId, amount: Amount) -> ArmoryResult<()> {
        self.transact("mint", caller, |s, _| s.ledger.mint(&s.roles, caller, to, amount))
    }

    pub fn burn(&mut self, caller: &AccountId, amount: Amount) -> ArmoryResult<()> {
        self.transact("burn", caller, |s, _| s.ledger.burn(caller, amount))
    }

    pub fn transfer(
        &mut self,
        caller: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        self.transact("transfer", caller, |s, _| s.ledger.transfer(caller, to, amount))
    }

    pub fn approve(
        &mut self,
        caller: &AccountId,
        spender: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        self.transact("approve", caller, |s, _| s.ledger.approve(caller, spender, amount))
    }

    /// `caller` spends its allowance from `owner`.
    pub fn transfer_from(
        &mut self,
        caller: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        self.transact("transfer_from", caller, |s, _| {
            s.ledger.transfer_from(caller, owner, to, amount)
        })
    }

    pub fn approve_staker(
        &mut self,
        caller: &AccountId,
        owner: &AccountId,
        spender: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        self.transact("approve_staker", caller, |s, _| {
            s.ledger.approve_staker(&s.roles, caller, owner, spender, amount)
        })
    }

    pub fn approve_spender(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        self.transact("approve_spender", caller, |s, _| {
            s.ledger.approve_spender(&s.roles, caller, account, amount)
        })
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.state.ledger.balance_of(account)
    }

    pub fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount {
        self.state.ledger.allowance(owner, spender)
    }

    pub fn total_supply(&self) -> Amount {
        self.state.ledger.total_supply()
    }

    // ---- roles ----

    pub fn transfer_ownership(
        &mut self,
        caller: &AccountId,
        new_owner: &AccountId,
    ) -> ArmoryResult<()> {
        self.transact("transfer_ownership", caller, |s, _| {
            s.roles.transfer_ownership(caller, new_owner)
        })
    }

    pub fn add_minter(&mut self, caller: &AccountId, account: &AccountId) -> ArmoryResult<()> {
        self.transact("add_minter", caller, |s, _| s.roles.add_minter(caller, account))
    }

    pub fn add_staker(&mut self, caller: &AccountId, account: &AccountId) -> ArmoryResult<()> {
        self.transact("add_staker", caller, |s, _| s.roles.add_staker(caller, account))
    }

    pub fn add_spender(&mut self, caller: &AccountId, account: &AccountId) -> ArmoryResult<()> {
        self.transact("add_spender", caller, |s, _| s.roles.add_spender(caller, account))
    }

    pub fn revoke_role(
        &mut self,
        caller: &AccountId,
        role: Role,
        account: &AccountId,
    ) -> ArmoryResult<()> {
        self.transact("revoke_role", caller, |s, _| s.roles.revoke_role(caller, role, account))
    }

    pub fn update_admin_access(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
        enabled: bool,
    ) -> ArmoryResult<()> {
        self.transact("update_admin_access", caller, |s, _| {
            s.roles.update_admin_access(caller, account, enabled)
        })
    }

    pub fn owner(&self) -> &AccountId {
        self.state.roles.owner()
    }

    pub fn has_role(&self, role: Role, account: &AccountId) -> bool {
        self.state.roles.has_role(role, account)
    }

    // ---- catalog ----

    pub fn create_item(&mut self, caller: &AccountId, item: NewItem) -> ArmoryResult<ItemId> {
        self.transact("create_item", caller, |s, _| s.catalog.create_item(&s.roles, caller, item))
    }

    pub fn adjust_transferability(
        &mut self,
        caller: &AccountId,
        id: ItemId,
        transferable: bool,
    ) -> ArmoryResult<()> {
        self.transact("adjust_transferability", caller, |s, _| {
            s.catalog.adjust_transferability(&s.roles, caller, id, transferable)
        })
    }

    pub fn set_uri(&mut self, caller: &AccountId, id: ItemId, uri: &str) -> ArmoryResult<()> {
        self.transact("set_uri", caller, |s, _| s.catalog.set_uri(&s.roles, caller, id, uri))
    }

    pub fn purchase(
        &mut self,
        caller: &AccountId,
        id: ItemId,
        quantity: Quantity,
    ) -> ArmoryResult<Amount> {
        self.transact("purchase", caller, |s, now| {
            s.catalog
                .purchase(&mut s.ledger, &s.roles, caller, id, quantity, now)
        })
    }

    pub fn set_approval_for_all(
        &mut self,
        caller: &AccountId,
        operator: &AccountId,
        approved: bool,
    ) -> ArmoryResult<()> {
        self.transact("set_approval_for_all", caller, |s, _| {
            s.catalog.set_approval_for_all(caller, operator, approved);
            Ok(())
        })
    }

    pub fn safe_transfer_from(
        &mut self,
        caller: &AccountId,
        from: &AccountId,
        to: &AccountId,
        id: ItemId,
        amount: Quantity,
    ) -> ArmoryResult<()> {
        self.transact("safe_transfer_from", caller, |s, _| {
            s.catalog.safe_transfer_from(caller, from, to, id, amount)
        })
    }

    pub fn safe_batch_transfer_from(
        &mut self,
        caller: &AccountId,
        from: &AccountId,
        to: &AccountId,
        ids: &[ItemId],
        amounts: &[Quantity],
    ) -> ArmoryResult<()> {
        self.transact("safe_batch_transfer_from", caller, |s, _| {
            s.catalog.safe_batch_transfer_from(caller, from, to, ids, amounts)
        })
    }

    pub fn get_allowance_remaining(
        &self,
        account: &AccountId,
        id: ItemId,
    ) -> ArmoryResult<Quantity> {
        self.state
            .catalog
            .get_allowance_remaining(account, id, self.clock.now())
    }

    pub fn remaining_supply(&self, id: ItemId) -> ArmoryResult<Quantity> {
        self.state.catalog.remaining_supply(id)
    }

    pub fn item(&self, id: ItemId) -> ArmoryResult<&ItemDefinition> {
        self.state.catalog.item(id)
    }

    pub fn uri(&self, id: ItemId) -> ArmoryResult<&str> {
        self.state.catalog.uri(id)
    }

    pub fn item_balance(&self, account: &AccountId, id: ItemId) -> Quantity {
        self.state.catalog.balance_of(account, id)
    }

    // ---- flash ----

    /// Lends `amount` from the pool to `borrower` and runs `action` inside the
    /// same transaction. A receiver acts as the borrower, so only the borrower
    /// may supply one.
    pub fn flash_loan(
        &mut self,
        caller: &AccountId,
        amount: Amount,
        borrower: &AccountId,
        action: FlashAction<'_>,
    ) -> ArmoryResult<FlashReceipt> {
        self.transact("flash_loan", caller, |s, now| {
            if matches!(action, FlashAction::Receiver(_)) && caller != borrower {
                return Err(AuthorizationError::NotBorrower {
                    caller: caller.clone(),
                    borrower: borrower.clone(),
                }
                .into());
            }
            let State {
                roles,
                ledger,
                catalog,
                pool,
                journal,
            } = s;
            let books = Books::new(ledger, catalog, roles, journal);
            pool.flash_loan(books, borrower, amount, action, now)
        })
    }

    pub fn pool(&self) -> &AccountId {
        self.state.pool.address()
    }

    pub fn snapshot(&self) -> ArmorySnapshot {
        let (balances, allowances) = self.state.ledger.entries();
        ArmorySnapshot {
            timestamp: self.clock.now(),
            owner: self.state.roles.owner().clone(),
            roles: self
                .state
                .roles
                .members()
                .map(|(role, account)| RoleMember {
                    role: *role,
                    account: account.clone(),
                })
                .collect(),
            total_supply: self.state.ledger.total_supply(),
            max_supply: self.state.ledger.max_supply(),
            balances,
            allowances,
            items: self.state.catalog.items().to_vec(),
            holdings: self.state.catalog.holdings(),
            pool: self.state.pool.address().clone(),
            flash_policy: self.state.pool.policy(),
            state_root: self.state.state_root(),
        }
    }
}
