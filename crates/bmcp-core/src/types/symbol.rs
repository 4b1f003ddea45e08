//! Security code utilities.
//!
//! Upstream codes are written `{market}.{code}`, e.g. `HK.00700`, `US.AAPL`,
//! `SH.600519`. Operations validate codes here before forwarding so that a
//! malformed code is reported as an `invalid parameter` envelope instead of
//! an opaque upstream error.

use crate::error::{BmcpError, Result};

/// Market prefixes accepted in a security code.
pub const KNOWN_MARKETS: [&str; 4] = ["HK", "US", "SH", "SZ"];

/// Split a security code into `(market, code)`.
///
/// The market prefix must be one of [`KNOWN_MARKETS`] and the code part must
/// be non-empty.
pub fn split_code(s: &str) -> Result<(&str, &str)> {
    let (market, code) = s
        .split_once('.')
        .ok_or_else(|| BmcpError::InvalidParam(format!("code {s:?} must be {{market}}.{{code}}")))?;
    if !KNOWN_MARKETS.contains(&market) {
        return Err(BmcpError::InvalidParam(format!("unknown market {market:?} in code {s:?}")));
    }
    if code.is_empty() {
        return Err(BmcpError::InvalidParam(format!("empty code in {s:?}")));
    }
    Ok((market, code))
}

/// Validate a list of security codes, reporting the first bad one.
pub fn validate_codes<S: AsRef<str>>(codes: &[S]) -> Result<()> {
    if codes.is_empty() {
        return Err(BmcpError::InvalidParam("at least one code is required".into()));
    }
    for c in codes {
        split_code(c.as_ref())?;
    }
    Ok(())
}
