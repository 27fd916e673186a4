use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical quote denom of the chain. Prices are expressed in display units
/// of this token (1 ZIG = 10^6 uzig).
pub const NATIVE_DENOM: &str = "uzig";

/// Decimal exponent of the native denom.
pub const NATIVE_EXPONENT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Native,
    Factory,
    Ibc,
    Cw20,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Factory => "factory",
            Self::Ibc => "ibc",
            Self::Cw20 => "cw20",
        }
    }

    /// Classifies a denom string. Unknown shapes default to `factory`, the
    /// most common kind of freshly listed token on this chain.
    pub fn classify(denom: &str) -> Self {
        if denom == NATIVE_DENOM {
            Self::Native
        } else if denom.starts_with("ibc/") {
            Self::Ibc
        } else if denom.starts_with("factory/") {
            Self::Factory
        } else if denom.starts_with("zig1") && !denom.contains('/') {
            Self::Cw20
        } else {
            Self::Factory
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairType {
    Xyk,
    Concentrated,
    CustomConcentrated,
}

impl PairType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xyk => "xyk",
            Self::Concentrated => "concentrated",
            Self::CustomConcentrated => "custom-concentrated",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "concentrated" => Self::Concentrated,
            "custom-concentrated" => Self::CustomConcentrated,
            _ => Self::Xyk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Swap,
    Provide,
    Withdraw,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Swap => "swap",
            Self::Provide => "provide",
            Self::Withdraw => "withdraw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    Buy,
    Sell,
    Provide,
    Withdraw,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Provide => "provide",
            Self::Withdraw => "withdraw",
        }
    }
}

/// Trade size class thresholded on native-unit notional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Shrimp,
    Shark,
    Whale,
}

impl SizeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shrimp => "shrimp",
            Self::Shark => "shark",
            Self::Whale => "whale",
        }
    }

    /// Classifies a trade by its ZIG notional (display units).
    pub fn from_zig_value(z: f64) -> Self {
        if z < 1_000.0 {
            Self::Shrimp
        } else if z < 10_000.0 {
            Self::Shark
        } else {
            Self::Whale
        }
    }
}

/// One leg of a pool: a denom and an integer amount at chain precision,
/// kept as a decimal string to preserve 78-digit precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub denom: String,
    pub amount_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Token {
    pub token_id: i64,
    pub denom: String,
    pub token_type: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub display: Option<String>,
    pub exponent: i32,
    pub holders_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Pool {
    pub pool_id: i64,
    pub pair_contract: String,
    pub dex_id: i64,
    pub base_token_id: i64,
    pub quote_token_id: i64,
    pub base_denom: String,
    pub quote_denom: String,
    pub pair_type: String,
    pub is_uzig_quote: bool,
    pub created_at: DateTime<Utc>,
}

/// A pool with both token rows resolved, as cached by the block processor.
#[derive(Debug, Clone)]
pub struct PoolWithTokens {
    pub pool: Pool,
    pub base: Token,
    pub quote: Token,
}

/// Insert-side trade record. Amounts stay decimal strings until the batch
/// flush binds them as NUMERIC.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub created_at: DateTime<Utc>,
    pub tx_hash: String,
    pub pool_id: i64,
    pub msg_index: i32,
    pub action: TradeAction,
    pub direction: TradeDirection,
    pub offer_denom: Option<String>,
    pub offer_amount_base: Option<String>,
    pub ask_denom: Option<String>,
    pub ask_amount_base: Option<String>,
    pub return_amount_base: Option<String>,
    pub reserve1_denom: Option<String>,
    pub reserve1_amount: Option<String>,
    pub reserve2_denom: Option<String>,
    pub reserve2_amount: Option<String>,
    pub value_zig: Option<f64>,
    pub size_class: Option<SizeClass>,
    pub is_router: bool,
    pub block_height: i64,
    pub signer: Option<String>,
}

/// Payload published on the `pair_created` notify topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairCreated {
    pub pool_id: i64,
    pub pair_contract: String,
    pub base_denom: String,
    pub quote_denom: String,
    pub base_token_id: i64,
    pub quote_token_id: i64,
    pub is_uzig_quote: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_class_thresholds_are_exact() {
        assert_eq!(SizeClass::from_zig_value(0.0), SizeClass::Shrimp);
        assert_eq!(SizeClass::from_zig_value(999.999), SizeClass::Shrimp);
        assert_eq!(SizeClass::from_zig_value(1_000.0), SizeClass::Shark);
        assert_eq!(SizeClass::from_zig_value(9_999.999), SizeClass::Shark);
        assert_eq!(SizeClass::from_zig_value(10_000.0), SizeClass::Whale);
        assert_eq!(SizeClass::from_zig_value(1_000_000.0), SizeClass::Whale);
    }

    #[test]
    fn denom_classification() {
        assert_eq!(TokenType::classify("uzig"), TokenType::Native);
        assert_eq!(
            TokenType::classify("ibc/27394FB092D2ECCD56123C74F36E4C1F"),
            TokenType::Ibc
        );
        assert_eq!(
            TokenType::classify("factory/zig1abc/mytoken"),
            TokenType::Factory
        );
        assert_eq!(
            TokenType::classify("zig1w8b8p9xk2lq9rnm0v4e6fjhg7q3zu5c8y0a2d4"),
            TokenType::Cw20
        );
    }

    #[test]
    fn pair_type_round_trip() {
        assert_eq!(PairType::parse("xyk"), PairType::Xyk);
        assert_eq!(PairType::parse("concentrated"), PairType::Concentrated);
        assert_eq!(
            PairType::parse("custom-concentrated"),
            PairType::CustomConcentrated
        );
        assert_eq!(PairType::parse("anything-else"), PairType::Xyk);
    }
}
