//! JSON-driven scenarios: a config, a start time and a list of calls.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::armory::{Armory, ArmorySnapshot};
use crate::catalog::{ItemId, NewItem, Quantity};
use crate::config::{read_to_string, ArmoryConfig, ConfigError};
use crate::env::{EventSink, ManualClock, Timestamp};
use crate::error::ArmoryResult;
use crate::flash::{
    FlashAction, FlashReceipt, FlashReceiver, FlashScope, LedgerCall, SettlementPolicy,
};
use crate::ledger::{AccountId, Amount, UNIT};
use crate::roles::Role;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub config: ArmoryConfig,
    #[serde(default)]
    pub start_time: Timestamp,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let scenario: Self = serde_json::from_str(text)?;
        scenario.config.validate()?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json_str(&read_to_string(path)?)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Step {
    #[serde(default)]
    pub caller: AccountId,
    pub op: Operation,
    /// The step is expected to abort.
    #[serde(default)]
    pub expect_failure: bool,
}

impl Step {
    pub fn new(caller: impl Into<AccountId>, op: Operation) -> Self {
        Self {
            caller: caller.into(),
            op,
            expect_failure: false,
        }
    }

    pub fn failing(caller: impl Into<AccountId>, op: Operation) -> Self {
        Self {
            expect_failure: true,
            ..Self::new(caller, op)
        }
    }
}

/// One surface call. Externally tagged: `{ "mint": { "to": .., "amount": .. } }`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Mint { to: AccountId, amount: Amount },
    Burn { amount: Amount },
    Transfer { to: AccountId, amount: Amount },
    Approve { spender: AccountId, amount: Amount },
    TransferFrom { owner: AccountId, to: AccountId, amount: Amount },
    ApproveStaker { owner: AccountId, spender: AccountId, amount: Amount },
    ApproveSpender { account: AccountId, amount: Amount },
    TransferOwnership { new_owner: AccountId },
    AddMinter { account: AccountId },
    AddStaker { account: AccountId },
    AddSpender { account: AccountId },
    RevokeRole { role: Role, account: AccountId },
    UpdateAdminAccess { account: AccountId, enabled: bool },
    CreateItem { item: NewItem },
    AdjustTransferability { item: ItemId, transferable: bool },
    SetUri { item: ItemId, uri: String },
    Purchase { item: ItemId, quantity: Quantity },
    SetApprovalForAll { operator: AccountId, approved: bool },
    SafeTransferFrom { from: AccountId, to: AccountId, item: ItemId, amount: Quantity },
    SafeBatchTransferFrom {
        from: AccountId,
        to: AccountId,
        items: Vec<ItemId>,
        amounts: Vec<Quantity>,
    },
    FlashLoan {
        amount: Amount,
        borrower: AccountId,
        /// Legacy calldata run with the pool's identity.
        #[serde(default)]
        pool_call: Option<LedgerCall>,
        /// Calls the borrower makes while the loan is outstanding.
        #[serde(default)]
        receiver: Vec<BorrowerCall>,
    },
    BalanceOf { account: AccountId },
    GetAllowanceRemaining { account: AccountId, item: ItemId },
    RemainingSupply { item: ItemId },
    AdvanceClock { seconds: u64 },
    /// Moves the clock forward to `at`; an earlier instant leaves it alone.
    SetClock { at: Timestamp },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Mint { .. } => "mint",
            Operation::Burn { .. } => "burn",
            Operation::Transfer { .. } => "transfer",
            Operation::Approve { .. } => "approve",
            Operation::TransferFrom { .. } => "transfer_from",
            Operation::ApproveStaker { .. } => "approve_staker",
            Operation::ApproveSpender { .. } => "approve_spender",
            Operation::TransferOwnership { .. } => "transfer_ownership",
            Operation::AddMinter { .. } => "add_minter",
            Operation::AddStaker { .. } => "add_staker",
            Operation::AddSpender { .. } => "add_spender",
            Operation::RevokeRole { .. } => "revoke_role",
            Operation::UpdateAdminAccess { .. } => "update_admin_access",
            Operation::CreateItem { .. } => "create_item",
            Operation::AdjustTransferability { .. } => "adjust_transferability",
            Operation::SetUri { .. } => "set_uri",
            Operation::Purchase { .. } => "purchase",
            Operation::SetApprovalForAll { .. } => "set_approval_for_all",
            Operation::SafeTransferFrom { .. } => "safe_transfer_from",
            Operation::SafeBatchTransferFrom { .. } => "safe_batch_transfer_from",
            Operation::FlashLoan { .. } => "flash_loan",
            Operation::BalanceOf { .. } => "balance_of",
            Operation::GetAllowanceRemaining { .. } => "get_allowance_remaining",
            Operation::RemainingSupply { .. } => "remaining_supply",
            Operation::AdvanceClock { .. } => "advance_clock",
            Operation::SetClock { .. } => "set_clock",
        }
    }
}

/// A call a scripted borrower makes from inside a flash loan.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BorrowerCall {
    /// Returns `amount` to the pool, or the full loan when omitted.
    Repay {
        #[serde(default)]
        amount: Option<Amount>,
    },
    Transfer { to: AccountId, amount: Amount },
    Approve { spender: AccountId, amount: Amount },
    TransferFrom { owner: AccountId, to: AccountId, amount: Amount },
    ApproveStaker { owner: AccountId, spender: AccountId, amount: Amount },
    Burn { amount: Amount },
    Purchase { item: ItemId, quantity: Quantity },
}

/// Replays a fixed list of borrower calls.
pub struct ScriptedReceiver<'a> {
    calls: &'a [BorrowerCall],
}

impl<'a> ScriptedReceiver<'a> {
    pub fn new(calls: &'a [BorrowerCall]) -> Self {
        Self { calls }
    }
}

impl FlashReceiver for ScriptedReceiver<'_> {
    fn on_flash_loan(&mut self, scope: &mut FlashScope<'_>, amount: Amount) -> ArmoryResult<()> {
        for call in self.calls {
            match call {
                BorrowerCall::Repay { amount: repay } => scope.repay(repay.unwrap_or(amount))?,
                BorrowerCall::Transfer { to, amount } => scope.transfer(to, *amount)?,
                BorrowerCall::Approve { spender, amount } => scope.approve(spender, *amount)?,
                BorrowerCall::TransferFrom { owner, to, amount } => {
                    scope.transfer_from(owner, to, *amount)?
                }
                BorrowerCall::ApproveStaker {
                    owner,
                    spender,
                    amount,
                } => scope.approve_staker(owner, spender, *amount)?,
                BorrowerCall::Burn { amount } => scope.burn(*amount)?,
                BorrowerCall::Purchase { item, quantity } => {
                    scope.purchase(*item, *quantity)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Done,
    ItemCreated { item: ItemId },
    Paid { cost: Amount },
    FlashLoan(FlashReceipt),
    Amount { value: Amount },
    Quantity { value: Quantity },
    Clock { now: Timestamp },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepReport {
    pub index: usize,
    pub caller: AccountId,
    pub op: String,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
    pub expected_failure: bool,
}

impl StepReport {
    pub fn as_expected(&self) -> bool {
        self.error.is_some() == self.expected_failure
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioReport {
    pub steps: Vec<StepReport>,
    pub snapshot: ArmorySnapshot,
}

impl ScenarioReport {
    pub fn unexpected(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|step| !step.as_expected())
    }
}

fn apply(
    armory: &mut Armory,
    clock: &ManualClock,
    caller: &AccountId,
    op: &Operation,
) -> ArmoryResult<Outcome> {
    let done = |_: ()| Outcome::Done;
    match op {
        Operation::Mint { to, amount } => armory.mint(caller, to, *amount).map(done),
        Operation::Burn { amount } => armory.burn(caller, *amount).map(done),
        Operation::Transfer { to, amount } => armory.transfer(caller, to, *amount).map(done),
        Operation::Approve { spender, amount } => {
            armory.approve(caller, spender, *amount).map(done)
        }
        Operation::TransferFrom { owner, to, amount } => {
            armory.transfer_from(caller, owner, to, *amount).map(done)
        }
        Operation::ApproveStaker {
            owner,
            spender,
            amount,
        } => armory.approve_staker(caller, owner, spender, *amount).map(done),
        Operation::ApproveSpender { account, amount } => {
            armory.approve_spender(caller, account, *amount).map(done)
        }
        Operation::TransferOwnership { new_owner } => {
            armory.transfer_ownership(caller, new_owner).map(done)
        }
        Operation::AddMinter { account } => armory.add_minter(caller, account).map(done),
        Operation::AddStaker { account } => armory.add_staker(caller, account).map(done),
        Operation::AddSpender { account } => armory.add_spender(caller, account).map(done),
        Operation::RevokeRole { role, account } => {
            armory.revoke_role(caller, *role, account).map(done)
        }
        Operation::UpdateAdminAccess { account, enabled } => {
            armory.update_admin_access(caller, account, *enabled).map(done)
        }
        Operation::CreateItem { item } => armory
            .create_item(caller, item.clone())
            .map(|item| Outcome::ItemCreated { item }),
        Operation::AdjustTransferability { item, transferable } => armory
            .adjust_transferability(caller, *item, *transferable)
            .map(done),
        Operation::SetUri { item, uri } => armory.set_uri(caller, *item, uri).map(done),
        Operation::Purchase { item, quantity } => armory
            .purchase(caller, *item, *quantity)
            .map(|cost| Outcome::Paid { cost }),
        Operation::SetApprovalForAll { operator, approved } => {
            armory.set_approval_for_all(caller, operator, *approved).map(done)
        }
        Operation::SafeTransferFrom {
            from,
            to,
            item,
            amount,
        } => armory.safe_transfer_from(caller, from, to, *item, *amount).map(done),
        Operation::SafeBatchTransferFrom {
            from,
            to,
            items,
            amounts,
        } => armory
            .safe_batch_transfer_from(caller, from, to, items, amounts)
            .map(done),
        Operation::FlashLoan {
            amount,
            borrower,
            pool_call,
            receiver,
        } => {
            let mut scripted = ScriptedReceiver::new(receiver);
            let action = match pool_call {
                Some(call) => FlashAction::PoolCall(call.clone()),
                None if receiver.is_empty() => FlashAction::None,
                None => FlashAction::Receiver(&mut scripted),
            };
            armory
                .flash_loan(caller, *amount, borrower, action)
                .map(Outcome::FlashLoan)
        }
        Operation::BalanceOf { account } => Ok(Outcome::Amount {
            value: armory.balance_of(account),
        }),
        Operation::GetAllowanceRemaining { account, item } => armory
            .get_allowance_remaining(account, *item)
            .map(|value| Outcome::Quantity { value }),
        Operation::RemainingSupply { item } => armory
            .remaining_supply(*item)
            .map(|value| Outcome::Quantity { value }),
        Operation::AdvanceClock { seconds } => {
            clock.advance(*seconds);
            Ok(Outcome::Clock { now: armory.now() })
        }
        Operation::SetClock { at } => {
            clock.set(*at);
            Ok(Outcome::Clock { now: armory.now() })
        }
    }
}

/// Runs every step, recording failures instead of stopping on them unless
/// `strict` is set, in which case the first unexpected result ends the run.
pub fn run(
    scenario: &Scenario,
    sink: impl EventSink + 'static,
    strict: bool,
) -> ArmoryResult<ScenarioReport> {
    let clock = ManualClock::new(scenario.start_time);
    let mut armory = Armory::new(&scenario.config, clock.clone(), sink)?;
    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        let caller = if step.caller.is_empty() {
            armory.owner().clone()
        } else {
            step.caller.clone()
        };
        let result = apply(&mut armory, &clock, &caller, &step.op);
        let report = StepReport {
            index,
            caller,
            op: step.op.name().to_string(),
            expected_failure: step.expect_failure,
            outcome: result.as_ref().ok().cloned(),
            error: result.err().map(|err| err.to_string()),
        };
        let stop = strict && !report.as_expected();
        if !report.as_expected() {
            tracing::warn!(index, op = %report.op, error = ?report.error, "unexpected step result");
        }
        steps.push(report);
        if stop {
            break;
        }
    }
    Ok(ScenarioReport {
        steps,
        snapshot: armory.snapshot(),
    })
}

/// The historical drain: a zero-amount loan whose calldata makes the pool
/// approve the attacker for its whole balance, then a `transfer_from` after
/// the loan returns.
pub fn exploit_scenario(policy: SettlementPolicy) -> Scenario {
    let config = ArmoryConfig {
        flash_policy: policy,
        ..ArmoryConfig::default()
    };
    let owner = config.owner.clone();
    let pool = config.pool.clone();
    let attacker: AccountId = "attacker".into();
    let reserve = 1_000_000 * UNIT;
    let guarded = policy == SettlementPolicy::Guarded;
    let step = |caller: &AccountId, op: Operation, fails: bool| {
        if fails {
            Step::failing(caller.clone(), op)
        } else {
            Step::new(caller.clone(), op)
        }
    };
    Scenario {
        config,
        start_time: 0,
        steps: vec![
            step(&owner, Operation::AddMinter { account: owner.clone() }, false),
            step(&owner, Operation::Mint { to: pool.clone(), amount: reserve }, false),
            step(
                &attacker,
                Operation::FlashLoan {
                    amount: 0,
                    borrower: attacker.clone(),
                    pool_call: Some(LedgerCall::Approve {
                        spender: attacker.clone(),
                        amount: reserve,
                    }),
                    receiver: Vec::new(),
                },
                guarded,
            ),
            step(
                &attacker,
                Operation::TransferFrom {
                    owner: pool.clone(),
                    to: attacker.clone(),
                    amount: reserve,
                },
                guarded,
            ),
            step(&attacker, Operation::BalanceOf { account: pool }, false),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{MemorySink, NullSink};

    #[test]
    fn exploit_drains_only_the_unguarded_pool() {
        let unguarded =
            run(&exploit_scenario(SettlementPolicy::Unguarded), NullSink, true).unwrap();
        assert_eq!(unguarded.unexpected().count(), 0);
        assert_eq!(unguarded.snapshot.balances.get("pool").copied().unwrap_or(0), 0);

        let guarded = run(&exploit_scenario(SettlementPolicy::Guarded), NullSink, true).unwrap();
        assert_eq!(guarded.unexpected().count(), 0);
        assert_eq!(guarded.snapshot.balances["pool"], 1_000_000 * UNIT);
        assert_eq!(guarded.snapshot.allowances, Vec::new());
    }

    #[test]
    fn scenario_parses_from_json() {
        let text = r#"{
            "config": { "owner": "root" },
            "start_time": 1000,
            "steps": [
                { "op": { "add_minter": { "account": "root" } } },
                { "op": { "update_admin_access": { "account": "root", "enabled": true } } },
                { "op": { "mint": { "to": "alice", "amount": 5000000000000000000 } } },
                { "op": { "create_item": { "item": {
                    "name": "Axe", "finite_supply": true, "transferable": false,
                    "remaining_supply": 3, "price": 1000000000000000000,
                    "daily_allowance": 2 } } } },
                { "caller": "alice", "op": { "purchase": { "item": 0, "quantity": 2 } } },
                { "caller": "alice", "op": { "purchase": { "item": 0, "quantity": 1 } },
                  "expect_failure": true },
                { "op": { "advance_clock": { "seconds": 86400 } } },
                { "caller": "alice",
                  "op": { "get_allowance_remaining": { "account": "alice", "item": 0 } } },
                { "caller": "alice",
                  "op": { "safe_transfer_from": {
                      "from": "alice", "to": "bob", "item": 0, "amount": 1 } },
                  "expect_failure": true },
                { "caller": "bob", "op": { "flash_loan": { "amount": 0, "borrower": "bob",
                    "receiver": [ { "repay": {} } ] } } }
            ]
        }"#;
        let scenario = Scenario::from_json_str(text).unwrap();
        let sink = MemorySink::new();
        let report = run(&scenario, sink.clone(), false).unwrap();

        let unexpected: Vec<_> = report.unexpected().collect();
        assert!(unexpected.is_empty(), "{unexpected:?}");
        assert_eq!(report.steps[4].outcome, Some(Outcome::Paid { cost: 2 * UNIT }));
        assert_eq!(report.steps[7].outcome, Some(Outcome::Quantity { value: 2 }));
        assert_eq!(report.snapshot.owner, "root");
        assert_eq!(report.snapshot.balances["treasury"], 2 * UNIT);
        assert!(!sink.is_empty());
    }

    #[test]
    fn strict_run_stops_at_first_surprise() {
        let scenario = Scenario {
            config: ArmoryConfig::default(),
            start_time: 0,
            steps: vec![
                Step::new("mallory", Operation::Mint { to: "mallory".into(), amount: 1 }),
                Step::new("owner", Operation::AddMinter { account: "owner".into() }),
            ],
        };
        let report = run(&scenario, NullSink, true).unwrap();
        assert_eq!(report.steps.len(), 1);
        assert!(report.steps[0].error.as_deref().unwrap_or("").contains("minter"));

        let relaxed = run(&scenario, NullSink, false).unwrap();
        assert_eq!(relaxed.steps.len(), 2);
    }

    #[test]
    fn scripted_borrower_that_keeps_funds_is_reverted() {
        let mut scenario = exploit_scenario(SettlementPolicy::Guarded);
        scenario.steps.truncate(2);
        scenario.steps.push(Step::failing(
            "attacker",
            Operation::FlashLoan {
                amount: 10,
                borrower: "attacker".into(),
                pool_call: None,
                receiver: vec![BorrowerCall::Repay { amount: Some(9) }],
            },
        ));
        let report = run(&scenario, NullSink, true).unwrap();
        assert_eq!(report.unexpected().count(), 0);
        assert!(report.snapshot.balances.get("attacker").is_none());
    }

    #[test]
    fn clock_steps_only_move_forward() {
        let scenario = Scenario {
            config: ArmoryConfig::default(),
            start_time: 500,
            steps: vec![
                Step::new("owner", Operation::SetClock { at: 1_000 }),
                Step::new("owner", Operation::SetClock { at: 10 }),
                Step::new("owner", Operation::AdvanceClock { seconds: 5 }),
            ],
        };
        let report = run(&scenario, NullSink, true).unwrap();
        let clocks: Vec<_> = report.steps.iter().map(|step| step.outcome.clone()).collect();
        assert_eq!(
            clocks,
            [
                Some(Outcome::Clock { now: 1_000 }),
                Some(Outcome::Clock { now: 1_000 }),
                Some(Outcome::Clock { now: 1_005 }),
            ]
        );
        assert_eq!(report.snapshot.timestamp, 1_005);
    }

    #[test]
    fn scripted_receiver_cannot_name_another_borrower() {
        let mut scenario = exploit_scenario(SettlementPolicy::Guarded);
        scenario.steps.truncate(2);
        scenario.steps.push(Step::new(
            "owner",
            Operation::Mint { to: "alice".into(), amount: 100 * UNIT },
        ));
        scenario.steps.push(Step::failing(
            "mallory",
            Operation::FlashLoan {
                amount: 0,
                borrower: "alice".into(),
                pool_call: None,
                receiver: vec![BorrowerCall::Transfer {
                    to: "mallory".into(),
                    amount: 100 * UNIT,
                }],
            },
        ));
        let report = run(&scenario, NullSink, true).unwrap();
        assert_eq!(report.unexpected().count(), 0);
        assert_eq!(report.snapshot.balances["alice"], 100 * UNIT);
        assert!(report.snapshot.balances.get("mallory").is_none());
    }
}
