use crate::error::ParseError;

/// Largest magnitude any single amount may have. Keeps per-receipt sums of
/// parsed values well inside `i64`.
pub(crate) const MAX_AMOUNT: i64 = 10_000_000_000_000;

/// Regex fragment for a numeral-like token: optional minus, digits and commas.
pub(crate) const NUMERAL: &str = r"-?[ \t]*[0-9,]+";

/// Parses a comma-grouped numeral with an optional leading minus sign.
/// `label` names the field for the error message.
pub(crate) fn parse_grouped(label: &str, raw: &str) -> Result<i64, ParseError> {
    let text = raw.trim().replace(',', "");
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text.as_str()),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseError::malformed(label, raw));
    }
    let value = digits
        .parse::<i64>()
        .ok()
        .filter(|v| *v <= MAX_AMOUNT)
        .ok_or_else(|| ParseError::malformed(label, raw))?;
    Ok(if negative { -value } else { value })
}

/// Unit price times piece count, bounded like any parsed amount.
pub(crate) fn line_price(label: &str, unit_price: i64, quantity: u32) -> Result<i64, ParseError> {
    unit_price
        .checked_mul(i64::from(quantity))
        .filter(|v| v.abs() <= MAX_AMOUNT)
        .ok_or_else(|| ParseError::malformed(label, &format!("{unit_price} x {quantity}")))
}

pub(crate) fn parse_count(label: &str, raw: &str) -> Result<u32, ParseError> {
    let value = parse_grouped(label, raw)?;
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ParseError::malformed(label, raw))
}
