//! Go-style duration strings (`4h0m0s`, `1.5h`, `300ms`, `0`)
//!
//! Integer components are parsed by `humantime`. Go additionally allows a
//! sign, fractional components (`1.5h`) and the `µs` spelling, which are
//! handled here by scaling each component with the unit length `humantime`
//! reports for it.

use std::time::Duration;

/// Parse a duration into nanoseconds
///
/// Accepts an optional sign followed by one or more `<number><unit>`
/// components; a bare `0` is zero. Returns `None` for anything else.
pub fn parse_duration(text: &str) -> Option<i128> {
    let text = text.trim();
    let (negative, rest) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    if rest == "0" {
        return Some(0);
    }

    let rest = rest.replace(|c: char| c == 'µ' || c == 'μ', "u");
    let total = if rest.contains('.') {
        parse_fractional(&rest)?
    } else {
        nanos(humantime::parse_duration(&rest).ok()?)?
    };

    Some(if negative { -total } else { total })
}

fn nanos(duration: Duration) -> Option<i128> {
    i128::try_from(duration.as_nanos()).ok()
}

/// Length of one `unit` in nanoseconds
fn unit_nanos(unit: &str) -> Option<i128> {
    if unit.is_empty() {
        return None;
    }
    nanos(humantime::parse_duration(&format!("1{}", unit)).ok()?)
}

fn parse_fractional(mut rest: &str) -> Option<i128> {
    if rest.is_empty() {
        return None;
    }

    let mut total: i128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        rest = tail;

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        let scale = unit_nanos(unit)?;

        let whole: i128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        total = total.checked_add(whole.checked_mul(scale)?)?;

        if !fraction.is_empty() {
            let digits: i128 = fraction.parse().ok()?;
            let divisor = 10i128.checked_pow(fraction.len() as u32)?;
            total = total.checked_add(digits.checked_mul(scale)? / divisor)?;
        }
    }

    Some(total)
}
