//! The `grpc-timeout` header codec.
//!
//! Wire format: `<value><unit>` where value is 1 to 8 ASCII digits and
//! unit is one of `H` (hours), `M` (minutes), `S` (seconds),
//! `m` (milliseconds), `u` (microseconds), `n` (nanoseconds).

use std::time::Duration;

/// Largest value expressible in the 8-digit field.
const MAX_TIMEOUT_VALUE: u128 = 99_999_999;

/// Unit ladder, finest first. Each entry is (nanoseconds per unit, suffix).
const UNITS: [(u128, char); 6] = [
    (1, 'n'),
    (1_000, 'u'),
    (1_000_000, 'm'),
    (1_000_000_000, 'S'),
    (60_000_000_000, 'M'),
    (3_600_000_000_000, 'H'),
];

/// Malformed `grpc-timeout` value.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid grpc-timeout value {0:?}")]
pub struct TimeoutError(pub String);

/// Encode a duration as a `grpc-timeout` header value.
///
/// Picks the smallest unit whose value fits in 8 digits, rounding up
/// when coarsening so the wire timeout never undercuts the deadline.
/// Durations beyond the largest expressible timeout clamp to
/// `99999999H`.
pub fn encode_timeout(duration: Duration) -> String {
    let nanos = duration.as_nanos();

    for (unit_nanos, suffix) in UNITS {
        let value = nanos.div_ceil(unit_nanos);
        if value <= MAX_TIMEOUT_VALUE {
            return format!("{value}{suffix}");
        }
    }

    format!("{MAX_TIMEOUT_VALUE}H")
}

/// Decode a `grpc-timeout` header value.
///
/// Rejects anything outside `/[0-9]{1,8}[HMSmun]/` and the
/// non-strictly-positive value `0`.
pub fn decode_timeout(value: &str) -> Result<Duration, TimeoutError> {
    let malformed = || TimeoutError(value.to_string());

    if value.len() < 2 || value.len() > 9 {
        return Err(malformed());
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let amount: u64 = digits.parse().map_err(|_| malformed())?;
    if amount == 0 {
        return Err(malformed());
    }

    let unit_nanos = match unit {
        "n" => 1,
        "u" => 1_000,
        "m" => 1_000_000,
        "S" => 1_000_000_000,
        "M" => 60_000_000_000,
        "H" => 3_600_000_000_000,
        _ => return Err(malformed()),
    };

    Ok(Duration::from_nanos(amount.saturating_mul(unit_nanos)))
}
