//! Phone number normalization and pairing code formatting.

/// Width of a pairing code group.
const CODE_GROUP: usize = 4;

/// Separator between pairing code groups.
const CODE_SEPARATOR: &str = "-";

/// Normalize a phone number to its canonical form: E.164 digits, no `+`.
pub fn normalize_number(number: &str) -> Result<String, String> {
    if let Some(c) = number
        .chars()
        .find(|c| !(c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')' | '.')))
    {
        return Err(format!("Unexpected character '{}' in phone number", c));
    }

    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return Err("Phone number must contain at least one digit".into());
    }

    if digits.len() < 7 {
        return Err("Phone number too short".into());
    }

    if digits.len() > 15 {
        return Err("Phone number too long".into());
    }

    // Country codes never start with 0
    if digits.starts_with('0') {
        return Err("Phone number must include country code".into());
    }

    Ok(digits)
}

/// Group a raw pairing code into runs of four characters joined by `-`.
///
/// Codes that are empty or not plain alphanumerics are returned unchanged.
pub fn format_pairing_code(raw: &str) -> String {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return raw.to_string();
    }

    raw.as_bytes()
        .chunks(CODE_GROUP)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(CODE_SEPARATOR)
}
