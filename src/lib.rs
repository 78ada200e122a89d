//! Role-gated fungible ledger, a weapon catalog with daily purchase
//! allowances and a flash-loan pool, all driven through one [`Armory`]
//! context whose operations commit atomically.

pub mod armory;
pub mod catalog;
pub mod config;
pub mod env;
pub mod error;
pub mod flash;
pub mod identity;
pub mod ledger;
pub mod roles;
pub mod scenario;

pub use armory::{Armory, ArmorySnapshot, State};
pub use catalog::{ItemDefinition, ItemId, NewItem, Quantity, DAY};
pub use config::{ArmoryConfig, ConfigError};
pub use env::{
    Clock, Event, EventSink, ManualClock, MemorySink, NullSink, SystemClock, Timestamp, TracingSink,
};
pub use error::{ArmoryError, ArmoryResult};
pub use flash::{
    Books, FlashAction, FlashReceipt, FlashReceiver, FlashScope, LedgerCall, SettlementPolicy,
};
pub use ledger::{AccountId, Amount, MAX_SUPPLY, UNIT, UNLIMITED_ALLOWANCE};
pub use roles::Role;
