use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ArmoryResult, AuthorizationError};
use crate::ledger::AccountId;

/// Capability tags granted by the owner.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Minter,
    Staker,
    Spender,
    /// Coarse management flag toggled through `update_admin_access`.
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Minter => "minter",
            Role::Staker => "staker",
            Role::Spender => "spender",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoleEvent {
    OwnershipTransferred {
        previous: AccountId,
        owner: AccountId,
    },
    RoleGranted {
        role: Role,
        account: AccountId,
    },
    RoleRevoked {
        role: Role,
        account: AccountId,
    },
}

/// Single-owner access control.
///
/// The owner is one mutable slot. Transferring ownership keeps every role the
/// previous owner granted, including roles held by the previous owner.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleRegistry {
    owner: AccountId,
    members: BTreeSet<(Role, AccountId)>,
    pub events: Vec<RoleEvent>,
}

impl RoleRegistry {
    pub fn new(owner: impl Into<AccountId>) -> Self {
        Self {
            owner: owner.into(),
            members: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    pub fn owner(&self) -> &AccountId {
        &self.owner
    }

    pub fn has_role(&self, role: Role, account: &AccountId) -> bool {
        self.members.contains(&(role, account.clone()))
    }

    pub fn is_admin(&self, account: &AccountId) -> bool {
        self.has_role(Role::Admin, account)
    }

    pub fn members(&self) -> impl Iterator<Item = &(Role, AccountId)> {
        self.members.iter()
    }

    pub fn ensure_owner(&self, caller: &AccountId) -> ArmoryResult<()> {
        if caller != &self.owner {
            return Err(AuthorizationError::NotOwner {
                caller: caller.clone(),
            }
            .into());
        }
        Ok(())
    }

    pub fn ensure_role(&self, role: Role, caller: &AccountId) -> ArmoryResult<()> {
        if !self.has_role(role, caller) {
            return Err(AuthorizationError::MissingRole {
                caller: caller.clone(),
                role,
            }
            .into());
        }
        Ok(())
    }

    pub fn transfer_ownership(
        &mut self,
        caller: &AccountId,
        new_owner: &AccountId,
    ) -> ArmoryResult<()> {
        self.ensure_owner(caller)?;
        let previous = std::mem::replace(&mut self.owner, new_owner.clone());
        self.events.push(RoleEvent::OwnershipTransferred {
            previous,
            owner: new_owner.clone(),
        });
        Ok(())
    }

    /// Granting a role that is already held is a no-op.
    pub fn grant_role(
        &mut self,
        caller: &AccountId,
        role: Role,
        account: &AccountId,
    ) -> ArmoryResult<()> {
        self.ensure_owner(caller)?;
        if self.members.insert((role, account.clone())) {
            self.events.push(RoleEvent::RoleGranted {
                role,
                account: account.clone(),
            });
        }
        Ok(())
    }

    pub fn revoke_role(
        &mut self,
        caller: &AccountId,
        role: Role,
        account: &AccountId,
    ) -> ArmoryResult<()> {
        self.ensure_owner(caller)?;
        if self.members.remove(&(role, account.clone())) {
            self.events.push(RoleEvent::RoleRevoked {
                role,
                account: account.clone(),
            });
        }
        Ok(())
    }

    pub fn add_minter(&mut self, caller: &AccountId, account: &AccountId) -> ArmoryResult<()> {
        self.grant_role(caller, Role::Minter, account)
    }

    pub fn add_staker(&mut self, caller: &AccountId, account: &AccountId) -> ArmoryResult<()> {
        self.grant_role(caller, Role::Staker, account)
    }

    pub fn add_spender(&mut self, caller: &AccountId, account: &AccountId) -> ArmoryResult<()> {
        self.grant_role(caller, Role::Spender, account)
    }

    pub fn update_admin_access(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
        enabled: bool,
    ) -> ArmoryResult<()> {
        if enabled {
            self.grant_role(caller, Role::Admin, account)
        } else {
            self.revoke_role(caller, Role::Admin, account)
        }
    }

    pub fn leaves(&self) -> Vec<[u8; 32]> {
        let mut leaves = Vec::with_capacity(self.members.len() + 1);
        let mut hasher = Sha256::new();
        hasher.update(b"owner");
        hasher.update(self.owner.as_bytes());
        leaves.push(hasher.finalize().into());
        for (role, account) in &self.members {
            let mut hasher = Sha256::new();
            hasher.update(b"role");
            hasher.update(role.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(account.as_bytes());
            leaves.push(hasher.finalize().into());
        }
        leaves
    }
}
