use crate::error::{
    Result,
    SlotsError,
};
use ethers::{
    types::{
        Address,
        H256,
        U256,
    },
    utils::{
        format_ether,
        format_units,
        parse_ether,
    },
};
use serde::{
    Serialize,
    Serializer,
};
use std::{
    fmt,
    str::FromStr,
};

/// A 32-byte word as exchanged with the contract.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bytes32(pub [u8; 32]);

impl Bytes32 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Bytes32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<Bytes32> for [u8; 32] {
    fn from(value: Bytes32) -> Self {
        value.0
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Bytes32 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; 32];
        hex::decode_to_slice(digits, &mut out)?;
        Ok(Self(out))
    }
}

impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Mirror of the contract's betting limits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConfigSnapshot {
    pub min_bet: U256,
    pub max_bet: U256,
    pub max_high_bet: U256,
    pub high_bet_threshold: U256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PendingSpin {
    pub wager: U256,
    pub placed_block: U256,
    pub user_seed: Bytes32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TokenBalance {
    pub raw: U256,
    pub decimals: u8,
}

impl fmt::Display for TokenBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match format_units(self.raw, u32::from(self.decimals)) {
            Ok(formatted) => write!(f, "{formatted}"),
            Err(_) => write!(f, "{}", self.raw),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SpinRequest {
    pub player: Address,
    pub wager: U256,
    pub user_seed: Bytes32,
    pub placed_block: U256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SpinResolution {
    pub player: Address,
    pub wager: U256,
    pub roll: U256,
    pub payout: U256,
    pub house_secret: Bytes32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotEvent {
    SpinRequested(SpinRequest),
    SpinResolved(SpinResolution),
}

/// An included transaction and the contract events it emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub events: Vec<SlotEvent>,
}

impl TxReceipt {
    pub fn resolution_for(&self, player: Address) -> Option<&SpinResolution> {
        self.events.iter().find_map(|event| match event {
            SlotEvent::SpinResolved(resolution) if resolution.player == player => {
                Some(resolution)
            }
            _ => None,
        })
    }
}

/// A strictly positive bet in wei.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Wager(U256);

impl Wager {
    pub fn new(wei: U256) -> Result<Self> {
        if wei.is_zero() {
            return Err(SlotsError::InvalidWager("enter bet > 0".to_string()));
        }
        Ok(Self(wei))
    }

    /// Parses a decimal ETH amount such as `0.01`.
    pub fn from_ether(amount: &str) -> Result<Self> {
        let wei = parse_ether(amount.trim())
            .map_err(|err| SlotsError::InvalidWager(format!("{amount:?}: {err}")))?;
        Self::new(wei)
    }

    pub fn wei(&self) -> U256 {
        self.0
    }
}

impl fmt::Display for Wager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_eth(self.0))
    }
}

pub fn short_addr(address: Address) -> String {
    let full = format!("{address:#x}");
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

pub fn short_hash(hash: H256) -> String {
    let full = format!("{hash:#x}");
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

pub fn format_eth(wei: U256) -> String {
    let ether = format_ether(wei);
    match ether.parse::<f64>() {
        Ok(value) => format!("{value:.4} ETH"),
        Err(_) => format!("{wei} wei"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn bytes32__parses_with_and_without_prefix() {
        let expected = Bytes32([0xab; 32]);
        let digits = "ab".repeat(32);

        assert_eq!(expected, format!("0x{digits}").parse().unwrap());
        assert_eq!(expected, digits.parse().unwrap());
        assert!("0x1234".parse::<Bytes32>().is_err());
        assert!(format!("0x{}", "zz".repeat(32)).parse::<Bytes32>().is_err());
    }

    #[test]
    fn bytes32__renders_lowercase_hex() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0xAB;
        let value = Bytes32(bytes);

        assert_eq!(value.to_string(), format!("0x{}ab", "0".repeat(62)));
        assert!(Bytes32::ZERO.is_zero());
        assert!(!value.is_zero());
    }

    #[test]
    fn wager__rejects_zero_and_garbage() {
        assert!(matches!(Wager::from_ether("0"), Err(SlotsError::InvalidWager(_))));
        assert!(matches!(Wager::from_ether("abc"), Err(SlotsError::InvalidWager(_))));
        assert_eq!(
            Wager::from_ether("0.01").unwrap().wei(),
            U256::from(10_000_000_000_000_000u64)
        );
    }

    #[test]
    fn short_addr__keeps_prefix_and_suffix() {
        let address: Address = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512".parse().unwrap();
        assert_eq!(short_addr(address), "0xe7f1…0512");
    }

    #[test]
    fn format_eth__uses_four_decimals() {
        assert_eq!(format_eth(U256::from(1_500_000_000_000_000_000u64)), "1.5000 ETH");
        assert_eq!(format_eth(U256::zero()), "0.0000 ETH");
    }

    #[test]
    fn token_balance__formats_with_decimals() {
        let balance = TokenBalance {
            raw: U256::from(1_250_000u64),
            decimals: 6,
        };
        assert_eq!(balance.to_string(), "1.250000");
    }

    #[test]
    fn resolution_for__matches_player() {
        // given
        let player = Address::repeat_byte(1);
        let other = Address::repeat_byte(2);
        let resolution = SpinResolution {
            player: other,
            wager: U256::one(),
            roll: U256::from(3),
            payout: U256::zero(),
            house_secret: Bytes32::ZERO,
        };
        let receipt = TxReceipt {
            tx_hash: H256::zero(),
            block_number: Some(1),
            events: vec![SlotEvent::SpinResolved(resolution)],
        };

        // then
        assert!(receipt.resolution_for(player).is_none());
        assert_eq!(receipt.resolution_for(other), Some(&resolution));
    }
}
