//! Typed bindings for the slot machine contract and its loyalty token.

pub mod slot_machine_types {
    use ethers::prelude::abigen;

    abigen!(SlotMachine, "$CARGO_MANIFEST_DIR/abi/SlotMachine.json");
}

pub mod loyalty_types {
    use ethers::prelude::abigen;

    abigen!(LoyaltyToken, "$CARGO_MANIFEST_DIR/abi/LoyaltyToken.json");
}

/// Function and event names the client binds to. A deployment whose ABI
/// lacks any of these cannot be driven by this client.
pub const REQUIRED_ENTRIES: &[&str] = &[
    "commitRandom",
    "spin",
    "resolveSpin",
    "refund",
    "currentCommit",
    "minBet",
    "maxBet",
    "maxHighBet",
    "highBetThreshold",
    "loyaltyToken",
    "owner",
    "pendingSpins",
    "SpinRequested",
    "SpinResolved",
];
