use rand::Rng;

use crate::error::ProviderError;

/// Format milliseconds as zero-padded `HH:MM:SS`. No day rollover: durations
/// past 24 hours keep counting hours.
pub fn ms_to_formatted_duration(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Convert an ISO 8601 duration string (e.g. `PT1H2M3S`) to milliseconds.
///
/// Calendar components use approximate conversions: 1 year = 365 days,
/// 1 month = 30 days.
pub fn iso8601_duration_to_ms(input: &str) -> Result<u64, ProviderError> {
    let malformed = || ProviderError::MalformedResponse(format!("bad ISO 8601 duration {input:?}"));

    let rest = input.strip_prefix('P').ok_or_else(malformed)?;

    let mut in_time = false;
    let mut number = String::new();
    let mut total_ms: u64 = 0;

    for ch in rest.chars() {
        match ch {
            'T' | 't' => {
                if !number.is_empty() {
                    return Err(malformed());
                }
                in_time = true;
            }
            '0'..='9' | '.' => number.push(ch),
            unit => {
                let value: f64 = number.parse().map_err(|_| malformed())?;
                number.clear();
                let seconds = match (unit.to_ascii_uppercase(), in_time) {
                    ('Y', false) => value * 365.0 * 86_400.0,
                    ('M', false) => value * 30.0 * 86_400.0,
                    ('W', false) => value * 7.0 * 86_400.0,
                    ('D', false) => value * 86_400.0,
                    ('H', true) => value * 3_600.0,
                    ('M', true) => value * 60.0,
                    ('S', true) => value,
                    _ => return Err(malformed()),
                };
                total_ms += (seconds * 1000.0).round() as u64;
            }
        }
    }

    // A trailing number without a unit designator is invalid.
    if !number.is_empty() {
        return Err(malformed());
    }

    Ok(total_ms)
}

/// Random state parameter for OAuth flow correlation (CSRF protection).
pub fn generate_state() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..32)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}
