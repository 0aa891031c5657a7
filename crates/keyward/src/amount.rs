use alloy::primitives::U256;
use eyre::Context as _;

/// Decimals of the native asset (whole unit to base units).
pub const NATIVE_DECIMALS: u32 = 18;
/// Decimals of a gwei (gas price input unit) relative to base units.
pub const GWEI_DECIMALS: u32 = 9;

fn reject_sign(s: &str) -> eyre::Result<()> {
    if s.starts_with('-') {
        eyre::bail!("amount must be non-negative");
    }
    if s.starts_with('+') {
        eyre::bail!("amount must be a plain decimal number");
    }
    Ok(())
}

/// Parse a non-negative base-unit integer such as `"1500000000000000000"`.
pub fn parse_amount_base_u256(s: &str) -> eyre::Result<U256> {
    let s = s.trim();
    if s.is_empty() {
        eyre::bail!("empty amount");
    }
    reject_sign(s)?;
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        eyre::bail!("amount must be a decimal integer in base units");
    }
    U256::from_str_radix(s, 10).context("parse base amount")
}

/// Parse a user-facing decimal amount (`"1.5"`) into base units without touching floats.
pub fn parse_amount_ui_to_base_u256(s: &str, decimals: u32) -> eyre::Result<U256> {
    let s = s.trim();
    if s.is_empty() {
        eyre::bail!("empty amount");
    }
    reject_sign(s)?;

    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty() && frac.is_empty() {
        eyre::bail!("empty amount");
    }
    if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        eyre::bail!("amount must be a decimal number");
    }
    if frac.len() > decimals as usize {
        eyre::bail!("too many decimal places (decimals={decimals})");
    }

    let frac_padded = format!("{frac:0<width$}", width = decimals as usize);
    let digits = format!("{whole}{frac_padded}");
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).context("amount overflow")
}

/// Format base units as a decimal string, trimming trailing zeros (`1.5`, `0.000001`, `10`).
pub fn format_amount_base_to_ui_string(base: U256, decimals: u32) -> String {
    if decimals == 0 {
        return base.to_string();
    }
    let digits = base.to_string();
    let width = decimals as usize;
    let padded = format!("{digits:0>w$}", w = width + 1);
    let split = padded.len() - width;
    let (whole, frac) = padded.split_at(split);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_owned()
    } else {
        format!("{whole}.{frac}")
    }
}
