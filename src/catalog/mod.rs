use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::env::Timestamp;
use crate::error::{ArmoryResult, AuthorizationError, BoundsError, InvariantViolation};
use crate::ledger::{AccountId, Amount, Ledger};
use crate::roles::{Role, RoleRegistry};

pub type ItemId = u64;
pub type Quantity = u64;

pub const DAY: u64 = 86_400;

/// A purchasable weapon. Only `transferable` and `uri` change after creation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemDefinition {
    pub name: String,
    pub uri: String,
    pub finite_supply: bool,
    pub transferable: bool,
    /// Meaningful only when `finite_supply` is set.
    pub remaining_supply: Quantity,
    pub price: Amount,
    pub daily_allowance: Quantity,
}

/// Arguments of `create_item`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NewItem {
    pub name: String,
    #[serde(default)]
    pub uri: String,
    pub finite_supply: bool,
    pub transferable: bool,
    #[serde(default)]
    pub remaining_supply: Quantity,
    pub price: Amount,
    pub daily_allowance: Quantity,
}

impl From<NewItem> for ItemDefinition {
    fn from(item: NewItem) -> Self {
        Self {
            name: item.name,
            uri: item.uri,
            finite_supply: item.finite_supply,
            transferable: item.transferable,
            remaining_supply: item.remaining_supply,
            price: item.price,
            daily_allowance: item.daily_allowance,
        }
    }
}

/// Per (account, item) quota. `remaining` is stale once `replenish_at` has
/// passed; readers must treat it as the full daily quota.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyAllowance {
    pub remaining: Quantity,
    pub replenish_at: Timestamp,
}

impl DailyAllowance {
    pub fn has_elapsed(&self, now: Timestamp) -> bool {
        now >= self.replenish_at
    }

    pub fn effective(&self, quota: Quantity, now: Timestamp) -> Quantity {
        if self.has_elapsed(now) {
            quota
        } else {
            self.remaining
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CatalogEvent {
    ItemCreated {
        item: ItemId,
        name: String,
    },
    Locked {
        item: ItemId,
    },
    Unlocked {
        item: ItemId,
    },
    UriChanged {
        item: ItemId,
        uri: String,
    },
    Purchased {
        buyer: AccountId,
        item: ItemId,
        quantity: Quantity,
        cost: Amount,
    },
    TransferSingle {
        operator: AccountId,
        from: AccountId,
        to: AccountId,
        item: ItemId,
        amount: Quantity,
    },
    TransferBatch {
        operator: AccountId,
        from: AccountId,
        to: AccountId,
        items: Vec<ItemId>,
        amounts: Vec<Quantity>,
    },
    ApprovalForAll {
        owner: AccountId,
        operator: AccountId,
        approved: bool,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HoldingEntry {
    pub account: AccountId,
    pub item: ItemId,
    pub amount: Quantity,
}

/// Item registry, holdings and the daily purchase engine.
///
/// The catalog acts on the ledger as `shop`, which must hold the SPENDER role
/// for purchases to settle. Proceeds go to `treasury`.
#[derive(Clone, Debug)]
pub struct Catalog {
    shop: AccountId,
    treasury: AccountId,
    replenish_period: u64,
    items: Vec<ItemDefinition>,
    holdings: BTreeMap<(AccountId, ItemId), Quantity>,
    allowances: BTreeMap<(AccountId, ItemId), DailyAllowance>,
    operators: BTreeSet<(AccountId, AccountId)>,
    pub events: Vec<CatalogEvent>,
}

impl Catalog {
    pub fn new(
        shop: impl Into<AccountId>,
        treasury: impl Into<AccountId>,
        replenish_period: u64,
    ) -> Self {
        Self {
            shop: shop.into(),
            treasury: treasury.into(),
            replenish_period,
            items: Vec::new(),
            holdings: BTreeMap::new(),
            allowances: BTreeMap::new(),
            operators: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    pub fn shop(&self) -> &AccountId {
        &self.shop
    }

    pub fn treasury(&self) -> &AccountId {
        &self.treasury
    }

    pub fn item_count(&self) -> u64 {
        self.items.len() as u64
    }

    pub fn items(&self) -> &[ItemDefinition] {
        &self.items
    }

    pub fn item(&self, id: ItemId) -> ArmoryResult<&ItemDefinition> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.items.get(idx))
            .ok_or_else(|| {
                BoundsError::UnknownItem {
                    item: id,
                    len: self.item_count(),
                }
                .into()
            })
    }

    fn item_mut(&mut self, id: ItemId) -> ArmoryResult<&mut ItemDefinition> {
        let len = self.item_count();
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.items.get_mut(idx))
            .ok_or_else(|| BoundsError::UnknownItem { item: id, len }.into())
    }

    pub fn uri(&self, id: ItemId) -> ArmoryResult<&str> {
        Ok(self.item(id)?.uri.as_str())
    }

    pub fn remaining_supply(&self, id: ItemId) -> ArmoryResult<Quantity> {
        Ok(self.item(id)?.remaining_supply)
    }

    pub fn balance_of(&self, account: &AccountId, id: ItemId) -> Quantity {
        self.holdings
            .get(&(account.clone(), id))
            .copied()
            .unwrap_or(0)
    }

    pub fn allowance_state(&self, account: &AccountId, id: ItemId) -> DailyAllowance {
        self.allowances
            .get(&(account.clone(), id))
            .copied()
            .unwrap_or_default()
    }

    /// Remaining purchases for today, with lazy replenishment applied.
    pub fn get_allowance_remaining(
        &self,
        account: &AccountId,
        id: ItemId,
        now: Timestamp,
    ) -> ArmoryResult<Quantity> {
        let quota = self.item(id)?.daily_allowance;
        Ok(self.allowance_state(account, id).effective(quota, now))
    }

    pub fn is_approved_for_all(&self, owner: &AccountId, operator: &AccountId) -> bool {
        self.operators.contains(&(owner.clone(), operator.clone()))
    }

    pub fn create_item(
        &mut self,
        roles: &RoleRegistry,
        caller: &AccountId,
        item: NewItem,
    ) -> ArmoryResult<ItemId> {
        roles.ensure_role(Role::Admin, caller)?;
        let id = self.item_count();
        let item = ItemDefinition::from(item);
        let transferable = item.transferable;
        self.events.push(CatalogEvent::ItemCreated {
            item: id,
            name: item.name.clone(),
        });
        self.items.push(item);
        if !transferable {
            self.events.push(CatalogEvent::Locked { item: id });
        }
        Ok(id)
    }

    pub fn adjust_transferability(
        &mut self,
        roles: &RoleRegistry,
        caller: &AccountId,
        id: ItemId,
        transferable: bool,
    ) -> ArmoryResult<()> {
        roles.ensure_owner(caller)?;
        self.item_mut(id)?.transferable = transferable;
        self.events.push(if transferable {
            CatalogEvent::Unlocked { item: id }
        } else {
            CatalogEvent::Locked { item: id }
        });
        Ok(())
    }

    pub fn set_uri(
        &mut self,
        roles: &RoleRegistry,
        caller: &AccountId,
        id: ItemId,
        uri: &str,
    ) -> ArmoryResult<()> {
        roles.ensure_owner(caller)?;
        self.item_mut(id)?.uri = uri.to_string();
        self.events.push(CatalogEvent::UriChanged {
            item: id,
            uri: uri.to_string(),
        });
        Ok(())
    }

    /// Buys `quantity` units of `id` for `buyer`, pulling the cost into the
    /// treasury. All checks run before the ledger is touched.
    pub fn purchase(
        &mut self,
        ledger: &mut Ledger,
        roles: &RoleRegistry,
        buyer: &AccountId,
        id: ItemId,
        quantity: Quantity,
        now: Timestamp,
    ) -> ArmoryResult<Amount> {
        let item = self.item(id)?;
        if quantity == 0 {
            return Err(InvariantViolation::ZeroQuantity.into());
        }
        let cost = item
            .price
            .checked_mul(Amount::from(quantity))
            .ok_or(InvariantViolation::Overflow)?;

        let have = ledger.balance_of(buyer);
        if have < cost {
            return Err(InvariantViolation::InsufficientBalance {
                account: buyer.clone(),
                have,
                need: cost,
            }
            .into());
        }
        if item.finite_supply && quantity > item.remaining_supply {
            return Err(InvariantViolation::InsufficientItemSupply {
                item: id,
                remaining: item.remaining_supply,
                requested: quantity,
            }
            .into());
        }

        let mut state = self.allowance_state(buyer, id);
        let elapsed = state.has_elapsed(now);
        let available = state.effective(item.daily_allowance, now);
        if quantity > available {
            return Err(InvariantViolation::DailyAllowanceExceeded {
                item: id,
                remaining: available,
                requested: quantity,
            }
            .into());
        }
        let finite_supply = item.finite_supply;
        let quota = item.daily_allowance;

        ledger.approve_spender(roles, &self.shop, buyer, cost)?;
        ledger.transfer_from(&self.shop, buyer, &self.treasury, cost)?;

        if elapsed {
            state.remaining = quota;
            state.replenish_at = now.saturating_add(self.replenish_period);
            tracing::debug!(
                %buyer,
                item = id,
                replenish_at = state.replenish_at,
                "daily allowance replenished"
            );
        }
        state.remaining -= quantity;
        self.allowances.insert((buyer.clone(), id), state);
        if finite_supply {
            self.item_mut(id)?.remaining_supply -= quantity;
        }
        self.credit(buyer, id, quantity)?;
        self.events.push(CatalogEvent::Purchased {
            buyer: buyer.clone(),
            item: id,
            quantity,
            cost,
        });
        Ok(cost)
    }

    pub fn set_approval_for_all(
        &mut self,
        caller: &AccountId,
        operator: &AccountId,
        approved: bool,
    ) {
        let key = (caller.clone(), operator.clone());
        if approved {
            self.operators.insert(key);
        } else {
            self.operators.remove(&key);
        }
        self.events.push(CatalogEvent::ApprovalForAll {
            owner: caller.clone(),
            operator: operator.clone(),
            approved,
        });
    }

    pub fn safe_transfer_from(
        &mut self,
        caller: &AccountId,
        from: &AccountId,
        to: &AccountId,
        id: ItemId,
        amount: Quantity,
    ) -> ArmoryResult<()> {
        self.ensure_operator(caller, from)?;
        self.check_movable(from, &[(id, amount)])?;
        self.debit(from, id, amount);
        self.credit(to, id, amount)?;
        self.events.push(CatalogEvent::TransferSingle {
            operator: caller.clone(),
            from: from.clone(),
            to: to.clone(),
            item: id,
            amount,
        });
        Ok(())
    }

    pub fn safe_batch_transfer_from(
        &mut self,
        caller: &AccountId,
        from: &AccountId,
        to: &AccountId,
        ids: &[ItemId],
        amounts: &[Quantity],
    ) -> ArmoryResult<()> {
        if ids.len() != amounts.len() {
            return Err(BoundsError::BatchLengthMismatch {
                ids: ids.len(),
                amounts: amounts.len(),
            }
            .into());
        }
        self.ensure_operator(caller, from)?;
        let moves: Vec<_> = ids.iter().copied().zip(amounts.iter().copied()).collect();
        self.check_movable(from, &moves)?;
        for &(id, amount) in &moves {
            self.debit(from, id, amount);
            self.credit(to, id, amount)?;
        }
        self.events.push(CatalogEvent::TransferBatch {
            operator: caller.clone(),
            from: from.clone(),
            to: to.clone(),
            items: ids.to_vec(),
            amounts: amounts.to_vec(),
        });
        Ok(())
    }

    fn ensure_operator(&self, caller: &AccountId, owner: &AccountId) -> ArmoryResult<()> {
        if caller != owner && !self.is_approved_for_all(owner, caller) {
            return Err(AuthorizationError::NotOperator {
                caller: caller.clone(),
                owner: owner.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Transfer hook: every moved id must exist, be transferable right now,
    /// and be covered by `from`'s holdings (duplicates summed).
    fn check_movable(&self, from: &AccountId, moves: &[(ItemId, Quantity)]) -> ArmoryResult<()> {
        let mut needed: BTreeMap<ItemId, Quantity> = BTreeMap::new();
        for &(id, amount) in moves {
            if !self.item(id)?.transferable {
                return Err(InvariantViolation::NotTransferable { item: id }.into());
            }
            let entry = needed.entry(id).or_insert(0);
            *entry = entry.checked_add(amount).ok_or(InvariantViolation::Overflow)?;
        }
        for (id, need) in needed {
            let have = self.balance_of(from, id);
            if have < need {
                return Err(InvariantViolation::InsufficientItemBalance {
                    account: from.clone(),
                    item: id,
                    have,
                    need,
                }
                .into());
            }
        }
        Ok(())
    }

    fn credit(&mut self, account: &AccountId, id: ItemId, amount: Quantity) -> ArmoryResult<()> {
        let held = self.holdings.entry((account.clone(), id)).or_insert(0);
        *held = held.checked_add(amount).ok_or(InvariantViolation::Overflow)?;
        Ok(())
    }

    fn debit(&mut self, account: &AccountId, id: ItemId, amount: Quantity) {
        let key = (account.clone(), id);
        if let Some(held) = self.holdings.get_mut(&key) {
            *held = held.saturating_sub(amount);
            if *held == 0 {
                self.holdings.remove(&key);
            }
        }
    }

    pub fn holdings(&self) -> Vec<HoldingEntry> {
        self.holdings
            .iter()
            .map(|((account, item), amount)| HoldingEntry {
                account: account.clone(),
                item: *item,
                amount: *amount,
            })
            .collect()
    }

    pub fn leaves(&self) -> Vec<[u8; 32]> {
        let mut leaves = Vec::new();
        for (id, item) in self.items.iter().enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(b"item");
            hasher.update((id as u64).to_le_bytes());
            hasher.update(item.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(item.uri.as_bytes());
            hasher.update([u8::from(item.finite_supply), u8::from(item.transferable)]);
            hasher.update(item.remaining_supply.to_le_bytes());
            hasher.update(item.price.to_le_bytes());
            hasher.update(item.daily_allowance.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        for ((account, item), amount) in &self.holdings {
            let mut hasher = Sha256::new();
            hasher.update(b"hold");
            hasher.update(account.as_bytes());
            hasher.update(item.to_le_bytes());
            hasher.update(amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        for ((account, item), state) in &self.allowances {
            let mut hasher = Sha256::new();
            hasher.update(b"daily");
            hasher.update(account.as_bytes());
            hasher.update(item.to_le_bytes());
            hasher.update(state.remaining.to_le_bytes());
            hasher.update(state.replenish_at.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        for (owner, operator) in &self.operators {
            let mut hasher = Sha256::new();
            hasher.update(b"operator");
            hasher.update(owner.as_bytes());
            hasher.update([0u8]);
            hasher.update(operator.as_bytes());
            leaves.push(hasher.finalize().into());
        }
        leaves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArmoryError;
    use crate::ledger::UNIT;

    fn acct(name: &str) -> AccountId {
        name.to_string()
    }

    struct Fixture {
        roles: RoleRegistry,
        ledger: Ledger,
        catalog: Catalog,
    }

    fn fixture() -> Fixture {
        let owner = acct("owner");
        let mut roles = RoleRegistry::new("owner");
        roles.add_minter(&owner, &owner).unwrap();
        roles.add_spender(&owner, &acct("shop")).unwrap();
        roles.update_admin_access(&owner, &owner, true).unwrap();
        Fixture {
            roles,
            ledger: Ledger::default(),
            catalog: Catalog::new("shop", "treasury", DAY),
        }
    }

    fn sword(remaining_supply: Quantity, daily_allowance: Quantity) -> NewItem {
        NewItem {
            name: "Sword".into(),
            uri: "ipfs://sword".into(),
            finite_supply: true,
            transferable: true,
            remaining_supply,
            price: UNIT,
            daily_allowance,
        }
    }

    #[test]
    fn items_get_sequential_ids_and_require_admin() {
        let mut f = fixture();
        let err = f
            .catalog
            .create_item(&f.roles, &acct("alice"), sword(10, 1))
            .unwrap_err();
        assert!(matches!(
            err,
            ArmoryError::Authorization(AuthorizationError::MissingRole { role: Role::Admin, .. })
        ));
        assert_eq!(f.catalog.create_item(&f.roles, &acct("owner"), sword(10, 1)).unwrap(), 0);
        assert_eq!(f.catalog.create_item(&f.roles, &acct("owner"), sword(10, 1)).unwrap(), 1);
        assert_eq!(f.catalog.item_count(), 2);
        assert_eq!(f.catalog.uri(1).unwrap(), "ipfs://sword");
    }

    #[test]
    fn locked_item_announces_lock_at_creation() {
        let mut f = fixture();
        let mut item = sword(1, 1);
        item.transferable = false;
        f.catalog.create_item(&f.roles, &acct("owner"), item).unwrap();
        assert_eq!(f.catalog.events.last(), Some(&CatalogEvent::Locked { item: 0 }));
    }

    #[test]
    fn purchase_moves_cost_to_treasury() {
        let mut f = fixture();
        let id = f.catalog.create_item(&f.roles, &acct("owner"), sword(10, 3)).unwrap();
        f.ledger.mint(&f.roles, &acct("owner"), &acct("alice"), 5 * UNIT).unwrap();

        let cost = f
            .catalog
            .purchase(&mut f.ledger, &f.roles, &acct("alice"), id, 2, 1_000)
            .unwrap();
        assert_eq!(cost, 2 * UNIT);
        assert_eq!(f.ledger.balance_of(&acct("alice")), 3 * UNIT);
        assert_eq!(f.ledger.balance_of(&acct("treasury")), 2 * UNIT);
        assert_eq!(f.ledger.allowance(&acct("alice"), &acct("shop")), 0);
        assert_eq!(f.catalog.balance_of(&acct("alice"), id), 2);
        assert_eq!(f.catalog.remaining_supply(id).unwrap(), 8);
        assert_eq!(
            f.catalog.allowance_state(&acct("alice"), id),
            DailyAllowance { remaining: 1, replenish_at: 1_000 + DAY }
        );
    }

    #[test]
    fn purchase_without_spender_role_fails() {
        let mut f = fixture();
        f.roles.revoke_role(&acct("owner"), Role::Spender, &acct("shop")).unwrap();
        let id = f.catalog.create_item(&f.roles, &acct("owner"), sword(10, 3)).unwrap();
        f.ledger.mint(&f.roles, &acct("owner"), &acct("alice"), UNIT).unwrap();
        let err = f
            .catalog
            .purchase(&mut f.ledger, &f.roles, &acct("alice"), id, 1, 0)
            .unwrap_err();
        assert!(matches!(err, ArmoryError::Authorization(_)));
    }

    #[test]
    fn unfunded_purchase_changes_nothing() {
        let mut f = fixture();
        let id = f.catalog.create_item(&f.roles, &acct("owner"), sword(10, 3)).unwrap();
        let before = f.catalog.leaves();
        let err = f
            .catalog
            .purchase(&mut f.ledger, &f.roles, &acct("alice"), id, 1, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            ArmoryError::Invariant(InvariantViolation::InsufficientBalance { have: 0, .. })
        ));
        assert_eq!(before, f.catalog.leaves());
        assert_eq!(f.catalog.remaining_supply(id).unwrap(), 10);
    }

    #[test]
    fn unknown_item_is_a_bounds_error() {
        let mut f = fixture();
        let err = f
            .catalog
            .purchase(&mut f.ledger, &f.roles, &acct("alice"), 4, 1, 0)
            .unwrap_err();
        assert_eq!(err, ArmoryError::Bounds(BoundsError::UnknownItem { item: 4, len: 0 }));
        assert!(f.catalog.remaining_supply(0).is_err());
    }

    #[test]
    fn daily_allowance_limits_and_replenishes_lazily() {
        let mut f = fixture();
        let id = f.catalog.create_item(&f.roles, &acct("owner"), sword(100, 2)).unwrap();
        f.ledger.mint(&f.roles, &acct("owner"), &acct("alice"), 10 * UNIT).unwrap();
        let alice = acct("alice");

        assert_eq!(f.catalog.get_allowance_remaining(&alice, id, 0).unwrap(), 2);
        f.catalog.purchase(&mut f.ledger, &f.roles, &alice, id, 2, 0).unwrap();
        assert_eq!(f.catalog.get_allowance_remaining(&alice, id, 10).unwrap(), 0);
        assert_eq!(f.catalog.get_allowance_remaining(&alice, id, 10).unwrap(), 0);
        assert!(matches!(
            f.catalog.purchase(&mut f.ledger, &f.roles, &alice, id, 1, 10).unwrap_err(),
            ArmoryError::Invariant(InvariantViolation::DailyAllowanceExceeded { .. })
        ));

        // stale stored value, full quota on read
        assert_eq!(f.catalog.get_allowance_remaining(&alice, id, DAY).unwrap(), 2);
        assert_eq!(f.catalog.allowance_state(&alice, id).remaining, 0);

        f.catalog.purchase(&mut f.ledger, &f.roles, &alice, id, 1, DAY).unwrap();
        assert_eq!(f.catalog.get_allowance_remaining(&alice, id, DAY).unwrap(), 1);
    }

    #[test]
    fn quantity_above_quota_fails_even_after_window() {
        let mut f = fixture();
        let id = f.catalog.create_item(&f.roles, &acct("owner"), sword(100, 2)).unwrap();
        f.ledger.mint(&f.roles, &acct("owner"), &acct("alice"), 10 * UNIT).unwrap();
        assert!(f
            .catalog
            .purchase(&mut f.ledger, &f.roles, &acct("alice"), id, 3, 0)
            .is_err());
        assert_eq!(f.ledger.balance_of(&acct("alice")), 10 * UNIT);
    }

    #[test]
    fn infinite_supply_ignores_counter() {
        let mut f = fixture();
        let mut item = sword(0, 5);
        item.finite_supply = false;
        let id = f.catalog.create_item(&f.roles, &acct("owner"), item).unwrap();
        f.ledger.mint(&f.roles, &acct("owner"), &acct("alice"), 5 * UNIT).unwrap();
        f.catalog.purchase(&mut f.ledger, &f.roles, &acct("alice"), id, 5, 0).unwrap();
        assert_eq!(f.catalog.remaining_supply(id).unwrap(), 0);
        assert_eq!(f.catalog.balance_of(&acct("alice"), id), 5);
    }

    #[test]
    fn transfer_hook_honours_lock() {
        let mut f = fixture();
        let id = f.catalog.create_item(&f.roles, &acct("owner"), sword(10, 5)).unwrap();
        f.ledger.mint(&f.roles, &acct("owner"), &acct("alice"), 5 * UNIT).unwrap();
        f.catalog.purchase(&mut f.ledger, &f.roles, &acct("alice"), id, 3, 0).unwrap();

        f.catalog.adjust_transferability(&f.roles, &acct("owner"), id, false).unwrap();
        assert_eq!(
            f.catalog
                .safe_transfer_from(&acct("alice"), &acct("alice"), &acct("bob"), id, 1)
                .unwrap_err(),
            ArmoryError::Invariant(InvariantViolation::NotTransferable { item: id })
        );
        assert!(f
            .catalog
            .safe_batch_transfer_from(&acct("alice"), &acct("alice"), &acct("bob"), &[id], &[1])
            .is_err());

        f.catalog.adjust_transferability(&f.roles, &acct("owner"), id, true).unwrap();
        f.catalog
            .safe_transfer_from(&acct("alice"), &acct("alice"), &acct("bob"), id, 1)
            .unwrap();
        assert_eq!(f.catalog.balance_of(&acct("bob"), id), 1);
        assert_eq!(f.catalog.balance_of(&acct("alice"), id), 2);
    }

    #[test]
    fn only_owner_adjusts_transferability() {
        let mut f = fixture();
        let id = f.catalog.create_item(&f.roles, &acct("owner"), sword(10, 5)).unwrap();
        f.roles.update_admin_access(&acct("owner"), &acct("ops"), true).unwrap();
        assert!(f
            .catalog
            .adjust_transferability(&f.roles, &acct("ops"), id, false)
            .is_err());
        assert!(f.catalog.item(id).unwrap().transferable);
    }

    #[test]
    fn batch_transfer_validates_shape_and_operator() {
        let mut f = fixture();
        let a = f.catalog.create_item(&f.roles, &acct("owner"), sword(10, 5)).unwrap();
        let b = f.catalog.create_item(&f.roles, &acct("owner"), sword(10, 5)).unwrap();
        f.ledger.mint(&f.roles, &acct("owner"), &acct("alice"), 10 * UNIT).unwrap();
        f.catalog.purchase(&mut f.ledger, &f.roles, &acct("alice"), a, 2, 0).unwrap();
        f.catalog.purchase(&mut f.ledger, &f.roles, &acct("alice"), b, 2, 0).unwrap();

        let (alice, bob) = (acct("alice"), acct("bob"));
        assert_eq!(
            f.catalog
                .safe_batch_transfer_from(&alice, &alice, &bob, &[a, b], &[1])
                .unwrap_err(),
            ArmoryError::Bounds(BoundsError::BatchLengthMismatch { ids: 2, amounts: 1 })
        );
        assert!(matches!(
            f.catalog
                .safe_batch_transfer_from(&acct("bob"), &acct("alice"), &acct("bob"), &[a], &[1])
                .unwrap_err(),
            ArmoryError::Authorization(AuthorizationError::NotOperator { .. })
        ));
        // duplicate ids are summed against the holding
        assert!(f
            .catalog
            .safe_batch_transfer_from(&alice, &alice, &bob, &[a, a], &[2, 1])
            .is_err());
        assert_eq!(f.catalog.balance_of(&acct("alice"), a), 2);

        f.catalog.set_approval_for_all(&acct("alice"), &acct("bob"), true);
        f.catalog
            .safe_batch_transfer_from(&acct("bob"), &acct("alice"), &acct("bob"), &[a, b], &[1, 2])
            .unwrap();
        assert_eq!(f.catalog.balance_of(&acct("bob"), a), 1);
        assert_eq!(f.catalog.balance_of(&acct("bob"), b), 2);
        assert_eq!(f.catalog.balance_of(&acct("alice"), b), 0);
    }
}
