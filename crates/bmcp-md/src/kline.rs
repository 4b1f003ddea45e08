//! K-line periods and real-time subscription types.
//!
//! Both are closed sets; user input is parsed case-insensitively and
//! rejected (not defaulted) when unknown, since a wrong period silently
//! substituted would return the wrong data.

use std::fmt;
use std::str::FromStr;

use bmcp_core::error::BmcpError;

/// K-line period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KlineType {
    K1M,
    K3M,
    K5M,
    K15M,
    K30M,
    K60M,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl KlineType {
    pub const ALL: [KlineType; 11] = [
        Self::K1M,
        Self::K3M,
        Self::K5M,
        Self::K15M,
        Self::K30M,
        Self::K60M,
        Self::Day,
        Self::Week,
        Self::Month,
        Self::Quarter,
        Self::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::K1M => "K_1M",
            Self::K3M => "K_3M",
            Self::K5M => "K_5M",
            Self::K15M => "K_15M",
            Self::K30M => "K_30M",
            Self::K60M => "K_60M",
            Self::Day => "K_DAY",
            Self::Week => "K_WEEK",
            Self::Month => "K_MON",
            Self::Quarter => "K_QUARTER",
            Self::Year => "K_YEAR",
        }
    }

    /// Whether historical requests accept this period. Quarterly and yearly
    /// bars are only served live.
    pub fn supports_history(&self) -> bool {
        !matches!(self, Self::Quarter | Self::Year)
    }
}

impl fmt::Display for KlineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineType {
    type Err = BmcpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == upper)
            .ok_or_else(|| BmcpError::InvalidParam(format!("unknown K-line type: {s}")))
    }
}

/// Real-time push subscription type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubType {
    Quote,
    OrderBook,
    Ticker,
    RtData,
    Broker,
    Kline(KlineType),
}

impl fmt::Display for SubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quote => f.write_str("QUOTE"),
            Self::OrderBook => f.write_str("ORDER_BOOK"),
            Self::Ticker => f.write_str("TICKER"),
            Self::RtData => f.write_str("RT_DATA"),
            Self::Broker => f.write_str("BROKER"),
            Self::Kline(k) => f.write_str(k.as_str()),
        }
    }
}

impl FromStr for SubType {
    type Err = BmcpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUOTE" => Ok(Self::Quote),
            "ORDER_BOOK" => Ok(Self::OrderBook),
            "TICKER" => Ok(Self::Ticker),
            "RT_DATA" => Ok(Self::RtData),
            "BROKER" => Ok(Self::Broker),
            other => other
                .parse::<KlineType>()
                .map(Self::Kline)
                .map_err(|_| BmcpError::InvalidParam(format!("unknown subscription type: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kline_parse_is_case_insensitive() {
        assert_eq!("k_day".parse::<KlineType>().unwrap(), KlineType::Day);
        assert_eq!(" K_1M ".parse::<KlineType>().unwrap(), KlineType::K1M);
        assert!("K_2M".parse::<KlineType>().is_err());
    }

    #[test]
    fn kline_display_matches_wire_names() {
        for k in KlineType::ALL {
            assert_eq!(k.to_string().parse::<KlineType>().unwrap(), k);
        }
        assert_eq!(KlineType::Month.to_string(), "K_MON");
    }

    #[test]
    fn history_excludes_quarter_and_year() {
        assert!(KlineType::Day.supports_history());
        assert!(!KlineType::Quarter.supports_history());
        assert!(!KlineType::Year.supports_history());
    }

    #[test]
    fn sub_type_includes_kline_periods() {
        assert_eq!("order_book".parse::<SubType>().unwrap(), SubType::OrderBook);
        assert_eq!("K_5M".parse::<SubType>().unwrap(), SubType::Kline(KlineType::K5M));
        assert_eq!(SubType::Kline(KlineType::Week).to_string(), "K_WEEK");
        let err = "DEPTH".parse::<SubType>().unwrap_err();
        assert!(err.to_string().contains("DEPTH"));
    }
}
