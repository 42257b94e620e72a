use ethers::types::U256;
use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Symbol {
    Cherry,
    Lemon,
    Bell,
    Star,
    Seven,
    Diamond,
    Grapes,
    Clover,
    Dice,
    Fire,
}

pub const SYMBOLS: [Symbol; 10] = [
    Symbol::Cherry,
    Symbol::Lemon,
    Symbol::Bell,
    Symbol::Star,
    Symbol::Seven,
    Symbol::Diamond,
    Symbol::Grapes,
    Symbol::Clover,
    Symbol::Dice,
    Symbol::Fire,
];

impl Symbol {
    pub fn glyph(self) -> &'static str {
        match self {
            Symbol::Cherry => "🍒",
            Symbol::Lemon => "🍋",
            Symbol::Bell => "🔔",
            Symbol::Star => "⭐",
            Symbol::Seven => "7️⃣",
            Symbol::Diamond => "💎",
            Symbol::Grapes => "🍇",
            Symbol::Clover => "🍀",
            Symbol::Dice => "🎲",
            Symbol::Fire => "🔥",
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glyph())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    Jackpot,
    Win,
    Loss,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::Jackpot => "Jackpot! x10",
            Category::Win => "Win! x2",
            Category::Loss => "Try again",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SpinResult {
    pub roll: U256,
    pub reels: [Symbol; 3],
    pub category: Category,
}

impl fmt::Display for SpinResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.reels;
        write!(f, "{a} {b} {c}  {}", self.category)
    }
}

/// Maps a revealed roll to its reels and payout band. Total over `uint256`.
pub fn map_roll(roll: impl Into<U256>) -> SpinResult {
    let roll = roll.into();
    let ten = U256::from(10u8);
    let mut reels = [Symbol::Cherry; 3];
    let mut rest = roll;
    for reel in reels.iter_mut() {
        *reel = SYMBOLS[(rest % ten).as_usize()];
        rest /= ten;
    }
    let category = if roll < U256::from(5u8) {
        Category::Jackpot
    } else if roll < U256::from(100u8) {
        Category::Win
    } else {
        Category::Loss
    };
    SpinResult {
        roll,
        reels,
        category,
    }
}
