use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ArmoryResult, InvariantViolation};
use crate::roles::{Role, RoleRegistry};

pub type AccountId = String;
pub type Amount = u128;

pub const UNIT: Amount = 1_000_000_000_000_000_000; // 1 token = 1e18 minimal units
pub const MAX_SUPPLY: Amount = 1_000_000_000 * UNIT;

/// Allowance value that `transfer_from` never decrements.
pub const UNLIMITED_ALLOWANCE: Amount = Amount::MAX;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Minted {
        to: AccountId,
        amount: Amount,
    },
    Burned {
        from: AccountId,
        amount: Amount,
    },
    Transferred {
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    Approved {
        owner: AccountId,
        spender: AccountId,
        amount: Amount,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowanceEntry {
    pub owner: AccountId,
    pub spender: AccountId,
    pub amount: Amount,
}

/// Fungible balances, allowances and the capped supply counter.
#[derive(Clone, Debug)]
pub struct Ledger {
    max_supply: Amount,
    supply: Amount,
    balances: BTreeMap<AccountId, Amount>,
    allowances: BTreeMap<(AccountId, AccountId), Amount>,
    pub events: Vec<LedgerEvent>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(MAX_SUPPLY)
    }
}

impl Ledger {
    pub fn new(max_supply: Amount) -> Self {
        Self {
            max_supply,
            supply: 0,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn total_supply(&self) -> Amount {
        self.supply
    }

    pub fn max_supply(&self) -> Amount {
        self.max_supply
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount {
        self.allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Every allowance `owner` has outstanding, keyed by spender.
    pub fn allowances_of(&self, owner: &AccountId) -> BTreeMap<AccountId, Amount> {
        self.allowances
            .iter()
            .filter(|((o, _), _)| o == owner)
            .map(|((_, spender), amount)| (spender.clone(), *amount))
            .collect()
    }

    pub fn entries(&self) -> (BTreeMap<AccountId, Amount>, Vec<AllowanceEntry>) {
        let allowances = self
            .allowances
            .iter()
            .map(|((owner, spender), amount)| AllowanceEntry {
                owner: owner.clone(),
                spender: spender.clone(),
                amount: *amount,
            })
            .collect();
        (self.balances.clone(), allowances)
    }

    fn credit_account(&mut self, account: &AccountId, amount: Amount) -> ArmoryResult<()> {
        let balance = self.balances.entry(account.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(InvariantViolation::Overflow)?;
        Ok(())
    }

    fn ensure_funds(&self, account: &AccountId, amount: Amount) -> ArmoryResult<()> {
        let have = self.balance_of(account);
        if have < amount {
            return Err(InvariantViolation::InsufficientBalance {
                account: account.clone(),
                have,
                need: amount,
            }
            .into());
        }
        Ok(())
    }

    fn debit_account(&mut self, account: &AccountId, amount: Amount) -> ArmoryResult<()> {
        self.ensure_funds(account, amount)?;
        if let Some(balance) = self.balances.get_mut(account) {
            *balance -= amount;
        }
        Ok(())
    }

    fn move_funds(&mut self, from: &AccountId, to: &AccountId, amount: Amount) -> ArmoryResult<()> {
        self.debit_account(from, amount)?;
        self.credit_account(to, amount)?;
        self.events.push(LedgerEvent::Transferred {
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    pub(crate) fn set_allowance(&mut self, owner: &AccountId, spender: &AccountId, amount: Amount) {
        let key = (owner.clone(), spender.clone());
        if amount == 0 {
            self.allowances.remove(&key);
        } else {
            self.allowances.insert(key, amount);
        }
        self.events.push(LedgerEvent::Approved {
            owner: owner.clone(),
            spender: spender.clone(),
            amount,
        });
    }

    /// Mints into `to`. The cap itself is never reachable: supply after the
    /// mint must stay strictly below `max_supply`.
    pub fn mint(
        &mut self,
        roles: &RoleRegistry,
        caller: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        roles.ensure_role(Role::Minter, caller)?;
        let next = self
            .supply
            .checked_add(amount)
            .ok_or(InvariantViolation::Overflow)?;
        if next >= self.max_supply {
            return Err(InvariantViolation::SupplyCapExceeded {
                supply: self.supply,
                amount,
                max_supply: self.max_supply,
            }
            .into());
        }
        self.credit_account(to, amount)?;
        self.supply = next;
        self.events.push(LedgerEvent::Minted {
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    pub fn burn(&mut self, caller: &AccountId, amount: Amount) -> ArmoryResult<()> {
        self.debit_account(caller, amount)?;
        self.supply -= amount;
        self.events.push(LedgerEvent::Burned {
            from: caller.clone(),
            amount,
        });
        Ok(())
    }

    pub fn transfer(
        &mut self,
        caller: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        self.move_funds(caller, to, amount)
    }

    pub fn approve(
        &mut self,
        caller: &AccountId,
        spender: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        self.set_allowance(caller, spender, amount);
        Ok(())
    }

    /// Moves `amount` from `owner` to `to` on the strength of the allowance
    /// `owner` granted `spender`.
    pub fn transfer_from(
        &mut self,
        spender: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        let have = self.allowance(owner, spender);
        if have < amount {
            return Err(InvariantViolation::InsufficientAllowance {
                owner: owner.clone(),
                spender: spender.clone(),
                have,
                need: amount,
            }
            .into());
        }
        self.ensure_funds(owner, amount)?;
        if have != UNLIMITED_ALLOWANCE {
            let key = (owner.clone(), spender.clone());
            if have == amount {
                self.allowances.remove(&key);
            } else {
                self.allowances.insert(key, have - amount);
            }
        }
        self.move_funds(owner, to, amount)
    }

    /// Sets `owner`'s allowance for `spender` on behalf of any owner. Stakers
    /// are trusted with every account's allowances.
    pub fn approve_staker(
        &mut self,
        roles: &RoleRegistry,
        caller: &AccountId,
        owner: &AccountId,
        spender: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        roles.ensure_role(Role::Staker, caller)?;
        self.set_allowance(owner, spender, amount);
        Ok(())
    }

    /// Sets `account`'s allowance with the calling spender as beneficiary.
    pub fn approve_spender(
        &mut self,
        roles: &RoleRegistry,
        caller: &AccountId,
        account: &AccountId,
        amount: Amount,
    ) -> ArmoryResult<()> {
        roles.ensure_role(Role::Spender, caller)?;
        self.set_allowance(account, caller, amount);
        Ok(())
    }

    pub fn leaves(&self) -> Vec<[u8; 32]> {
        let mut leaves = Vec::with_capacity(self.balances.len() + self.allowances.len() + 1);
        let mut hasher = Sha256::new();
        hasher.update(b"supply");
        hasher.update(self.supply.to_le_bytes());
        hasher.update(self.max_supply.to_le_bytes());
        leaves.push(hasher.finalize().into());
        for (account, balance) in &self.balances {
            let mut hasher = Sha256::new();
            hasher.update(b"acct");
            hasher.update(account.as_bytes());
            hasher.update(balance.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        for ((owner, spender), amount) in &self.allowances {
            let mut hasher = Sha256::new();
            hasher.update(b"allow");
            hasher.update(owner.as_bytes());
            hasher.update([0u8]);
            hasher.update(spender.as_bytes());
            hasher.update(amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        leaves
    }
}

pub fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"armory-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ArmoryError, AuthorizationError};

    fn acct(name: &str) -> AccountId {
        name.to_string()
    }

    fn minting_registry() -> RoleRegistry {
        let mut roles = RoleRegistry::new("owner");
        roles.add_minter(&acct("owner"), &acct("minter")).unwrap();
        roles
    }

    #[test]
    fn merkle_root_is_deterministic() {
        let roles = minting_registry();
        let mut ledger = Ledger::default();
        ledger.mint(&roles, &acct("minter"), &acct("alice"), 1_000).unwrap();
        ledger.mint(&roles, &acct("minter"), &acct("bob"), 2_000).unwrap();
        let root1 = build_merkle(ledger.leaves());
        let root2 = build_merkle(ledger.leaves());
        assert_eq!(root1, root2);
        ledger.transfer(&acct("bob"), &acct("alice"), 1).unwrap();
        assert_ne!(root1, build_merkle(ledger.leaves()));
    }

    #[test]
    fn mint_requires_minter_role() {
        let mut roles = RoleRegistry::new("owner");
        let mut ledger = Ledger::default();
        let err = ledger.mint(&roles, &acct("alice"), &acct("alice"), 10).unwrap_err();
        assert!(matches!(
            err,
            ArmoryError::Authorization(AuthorizationError::MissingRole { role: Role::Minter, .. })
        ));
        roles.add_minter(&acct("owner"), &acct("alice")).unwrap();
        ledger.mint(&roles, &acct("alice"), &acct("alice"), 10).unwrap();
        assert_eq!(ledger.balance_of(&acct("alice")), 10);
        assert_eq!(ledger.total_supply(), 10);
    }

    #[test]
    fn supply_cap_is_exclusive() {
        let roles = minting_registry();
        let mut ledger = Ledger::new(100);
        ledger.mint(&roles, &acct("minter"), &acct("alice"), 99).unwrap();
        let err = ledger.mint(&roles, &acct("minter"), &acct("alice"), 1).unwrap_err();
        assert!(matches!(
            err,
            ArmoryError::Invariant(InvariantViolation::SupplyCapExceeded { supply: 99, .. })
        ));
        assert_eq!(ledger.total_supply(), 99);

        let mut fresh = Ledger::new(100);
        assert!(fresh.mint(&roles, &acct("minter"), &acct("alice"), 100).is_err());
        assert!(fresh.mint(&roles, &acct("minter"), &acct("alice"), Amount::MAX).is_err());
    }

    #[test]
    fn burn_reduces_supply_and_rejects_overdraw() {
        let roles = minting_registry();
        let mut ledger = Ledger::default();
        ledger.mint(&roles, &acct("minter"), &acct("alice"), 50).unwrap();
        ledger.burn(&acct("alice"), 20).unwrap();
        assert_eq!(ledger.balance_of(&acct("alice")), 30);
        assert_eq!(ledger.total_supply(), 30);
        assert!(ledger.burn(&acct("alice"), 31).is_err());
        assert!(ledger.burn(&acct("nobody"), 1).is_err());
    }

    #[test]
    fn transfer_from_consumes_allowance() {
        let roles = minting_registry();
        let mut ledger = Ledger::default();
        ledger.mint(&roles, &acct("minter"), &acct("alice"), 100).unwrap();
        ledger.approve(&acct("alice"), &acct("bob"), 60).unwrap();

        ledger
            .transfer_from(&acct("bob"), &acct("alice"), &acct("carol"), 40)
            .unwrap();
        assert_eq!(ledger.allowance(&acct("alice"), &acct("bob")), 20);
        assert_eq!(ledger.balance_of(&acct("carol")), 40);

        let err = ledger
            .transfer_from(&acct("bob"), &acct("alice"), &acct("carol"), 21)
            .unwrap_err();
        assert!(matches!(
            err,
            ArmoryError::Invariant(InvariantViolation::InsufficientAllowance { have: 20, .. })
        ));
    }

    #[test]
    fn unlimited_allowance_is_not_decremented() {
        let roles = minting_registry();
        let mut ledger = Ledger::default();
        ledger.mint(&roles, &acct("minter"), &acct("alice"), 100).unwrap();
        ledger
            .approve(&acct("alice"), &acct("bob"), UNLIMITED_ALLOWANCE)
            .unwrap();
        ledger
            .transfer_from(&acct("bob"), &acct("alice"), &acct("bob"), 70)
            .unwrap();
        assert_eq!(ledger.allowance(&acct("alice"), &acct("bob")), UNLIMITED_ALLOWANCE);
    }

    #[test]
    fn transfer_from_checks_balance_before_touching_allowance() {
        let mut ledger = Ledger::default();
        ledger.approve(&acct("alice"), &acct("bob"), 10).unwrap();
        assert!(ledger
            .transfer_from(&acct("bob"), &acct("alice"), &acct("bob"), 5)
            .is_err());
        assert_eq!(ledger.allowance(&acct("alice"), &acct("bob")), 10);
    }

    #[test]
    fn staker_can_set_any_owners_allowance() {
        let mut roles = RoleRegistry::new("owner");
        let mut ledger = Ledger::default();
        assert!(ledger
            .approve_staker(&roles, &acct("staker"), &acct("alice"), &acct("vault"), 5)
            .is_err());
        roles.add_staker(&acct("owner"), &acct("staker")).unwrap();
        ledger
            .approve_staker(&roles, &acct("staker"), &acct("alice"), &acct("vault"), 5)
            .unwrap();
        assert_eq!(ledger.allowance(&acct("alice"), &acct("vault")), 5);
    }

    #[test]
    fn spender_approves_itself() {
        let mut roles = RoleRegistry::new("owner");
        roles.add_spender(&acct("owner"), &acct("shop")).unwrap();
        let mut ledger = Ledger::default();
        ledger
            .approve_spender(&roles, &acct("shop"), &acct("alice"), 7)
            .unwrap();
        assert_eq!(ledger.allowance(&acct("alice"), &acct("shop")), 7);
        assert!(ledger
            .approve_spender(&roles, &acct("alice"), &acct("bob"), 7)
            .is_err());
    }

    #[test]
    fn mutations_emit_events() {
        let roles = minting_registry();
        let mut ledger = Ledger::default();
        ledger.mint(&roles, &acct("minter"), &acct("alice"), 100).unwrap();
        ledger.transfer(&acct("alice"), &acct("bob"), 10).unwrap();
        ledger.burn(&acct("bob"), 5).unwrap();
        assert_eq!(
            ledger.events,
            vec![
                LedgerEvent::Minted { to: acct("alice"), amount: 100 },
                LedgerEvent::Transferred { from: acct("alice"), to: acct("bob"), amount: 10 },
                LedgerEvent::Burned { from: acct("bob"), amount: 5 },
            ]
        );
    }
}
