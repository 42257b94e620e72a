pub mod error;
pub mod ethers_gateway;
pub mod gateway;
pub mod identity;
pub mod notify;
pub mod orchestrator;
pub mod outcome;
pub mod secret;
pub mod session;
pub mod tickets;
pub mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::{
    Result,
    SlotsError,
};
pub use gateway::{
    ContractGateway,
    discover,
};
pub use identity::ChainIdentity;
pub use notify::{
    Notification,
    Notifier,
};
pub use orchestrator::{
    CommitOutcome,
    Orchestrator,
    ResolveOutcome,
    Settings,
};
pub use outcome::{
    SpinResult,
    map_roll,
};
pub use secret::{
    HouseSecret,
    normalize,
};
pub use types::Wager;
