//! Enumerations used throughout the bmcp server.
//!
//! The trading enums are closed: every one has an explicit default variant
//! that unrecognized configuration input falls back to (with a warning), so
//! there is no string-keyed lookup anywhere downstream. Wire spellings match
//! what the upstream gateway expects (`"HK"`, `"SIMULATE"`, ...).

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Closed-enum parsing
// ---------------------------------------------------------------------------

/// Parse a closed enum from configuration text, falling back to its default
/// variant for anything unrecognized.
///
/// `name` is only used for the warning (e.g. `"TRD_MARKET"`).
pub fn parse_or_default<T>(name: &str, raw: &str) -> T
where
    T: FromStr + Default + std::fmt::Display,
{
    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            let fallback = T::default();
            warn!("unrecognized {name}={raw:?}, falling back to {fallback}");
            fallback
        }
    }
}

/// Error for an unrecognized enum spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown variant: {}", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

// ---------------------------------------------------------------------------
// Trading environment
// ---------------------------------------------------------------------------

/// Paper or live trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeEnv {
    #[default]
    Simulate,
    Real,
}

impl std::fmt::Display for TradeEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulate => write!(f, "SIMULATE"),
            Self::Real => write!(f, "REAL"),
        }
    }
}

impl FromStr for TradeEnv {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SIMULATE" => Ok(Self::Simulate),
            "REAL" => Ok(Self::Real),
            _ => Err(UnknownVariant(s.into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Security firm
// ---------------------------------------------------------------------------

/// Brokerage entity the trade session is opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityFirm {
    #[default]
    #[serde(rename = "FUTUSECURITIES")]
    FutuSecurities,
    #[serde(rename = "FUTUINC")]
    FutuInc,
}

impl std::fmt::Display for SecurityFirm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FutuSecurities => write!(f, "FUTUSECURITIES"),
            Self::FutuInc => write!(f, "FUTUINC"),
        }
    }
}

impl FromStr for SecurityFirm {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FUTUSECURITIES" => Ok(Self::FutuSecurities),
            "FUTUINC" => Ok(Self::FutuInc),
            _ => Err(UnknownVariant(s.into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Trading market
// ---------------------------------------------------------------------------

/// Market a trade session is scoped to. Only Hong Kong and US are supported;
/// anything else resolves to [`TrdMarket::Hk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrdMarket {
    #[default]
    Hk,
    Us,
}

impl TrdMarket {
    /// Numeric market id used by the upstream filter (`HK = 1`, `US = 2`).
    pub fn upstream_id(self) -> u8 {
        match self {
            Self::Hk => 1,
            Self::Us => 2,
        }
    }
}

impl std::fmt::Display for TrdMarket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hk => write!(f, "HK"),
            Self::Us => write!(f, "US"),
        }
    }
}

impl FromStr for TrdMarket {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HK" => Ok(Self::Hk),
            "US" => Ok(Self::Us),
            _ => Err(UnknownVariant(s.into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle state of an upstream session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ConnState {
    #[default]
    Uninitialized,
    Connecting,
    Ready,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_falls_back_to_hk() {
        assert_eq!(parse_or_default::<TrdMarket>("TRD_MARKET", "US"), TrdMarket::Us);
        assert_eq!(parse_or_default::<TrdMarket>("TRD_MARKET", "us"), TrdMarket::Us);
        assert_eq!(parse_or_default::<TrdMarket>("TRD_MARKET", "CN"), TrdMarket::Hk);
        assert_eq!(parse_or_default::<TrdMarket>("TRD_MARKET", ""), TrdMarket::Hk);
    }

    #[test]
    fn firm_and_env_defaults() {
        assert_eq!(parse_or_default::<SecurityFirm>("SECURITY_FIRM", "FUTUINC"), SecurityFirm::FutuInc);
        assert_eq!(parse_or_default::<SecurityFirm>("SECURITY_FIRM", "bogus"), SecurityFirm::FutuSecurities);
        assert_eq!(parse_or_default::<TradeEnv>("TRADE_ENV", "REAL"), TradeEnv::Real);
        assert_eq!(parse_or_default::<TradeEnv>("TRADE_ENV", "paper"), TradeEnv::Simulate);
    }

    #[test]
    fn wire_spelling() {
        assert_eq!(serde_json::to_string(&TrdMarket::Us).unwrap(), "\"US\"");
        assert_eq!(serde_json::to_string(&TradeEnv::Simulate).unwrap(), "\"SIMULATE\"");
        assert_eq!(serde_json::to_string(&SecurityFirm::FutuInc).unwrap(), "\"FUTUINC\"");
        assert_eq!(TrdMarket::Us.upstream_id(), 2);
    }
}
