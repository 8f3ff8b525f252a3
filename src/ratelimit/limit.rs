//! Limit declarations and the `N/unit` limit-string grammar.

use std::time::Duration;
use thiserror::Error;

/// A single `count` requests per `window` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum number of admitted requests inside any window.
    pub count: u32,
    /// Length of the moving window.
    pub window: Duration,
}

impl RateLimit {
    /// Build a limit of `count` requests per `window`.
    pub const fn new(count: u32, window: Duration) -> Self {
        Self { count, window }
    }
}

/// Errors raised while parsing limit strings such as `10/minute`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitParseError {
    /// The expression did not follow `<count>/<unit>` or `<count> per <n> <unit>`.
    #[error("malformed rate limit '{0}'")]
    Malformed(String),
    /// The count or multiplier was zero or not a number.
    #[error("invalid amount in rate limit '{0}'")]
    InvalidAmount(String),
    /// The time unit was not recognised.
    #[error("unknown time unit '{0}'")]
    UnknownUnit(String),
}

/// Parse one or more limits separated by `;` or `,`.
///
/// Accepted forms: `10/minute`, `10 per minute`, `100/2 hours`, `100 per 2 hours`.
/// Units: second, minute, hour, day (singular, plural, or `s`/`m`/`h`/`d` abbreviations).
pub fn parse_limits(input: &str) -> Result<Vec<RateLimit>, LimitParseError> {
    let limits = input
        .split([';', ','])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_limit)
        .collect::<Result<Vec<_>, _>>()?;

    if limits.is_empty() {
        return Err(LimitParseError::Malformed(input.to_string()));
    }
    Ok(limits)
}

fn parse_limit(expression: &str) -> Result<RateLimit, LimitParseError> {
    let lowered = expression.to_lowercase();
    let (count, period) = lowered
        .split_once('/')
        .or_else(|| lowered.split_once(" per "))
        .ok_or_else(|| LimitParseError::Malformed(expression.to_string()))?;

    let count: u32 = count
        .trim()
        .parse()
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| LimitParseError::InvalidAmount(expression.to_string()))?;

    let mut parts = period.split_whitespace();
    let (multiplier, unit) = match (parts.next(), parts.next(), parts.next()) {
        (Some(unit), None, None) => (1, unit),
        (Some(amount), Some(unit), None) => {
            let amount: u64 = amount
                .parse()
                .ok()
                .filter(|value| *value > 0)
                .ok_or_else(|| LimitParseError::InvalidAmount(expression.to_string()))?;
            (amount, unit)
        }
        _ => return Err(LimitParseError::Malformed(expression.to_string())),
    };

    let unit_seconds = match unit {
        "s" | "sec" | "second" | "seconds" => 1,
        "m" | "min" | "minute" | "minutes" => 60,
        "h" | "hour" | "hours" => 60 * 60,
        "d" | "day" | "days" => 24 * 60 * 60,
        other => return Err(LimitParseError::UnknownUnit(other.to_string())),
    };

    Ok(RateLimit::new(
        count,
        Duration::from_secs(unit_seconds * multiplier),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slash_and_per_forms() {
        assert_eq!(
            parse_limits("10/minute").unwrap(),
            vec![RateLimit::new(10, Duration::from_secs(60))]
        );
        assert_eq!(
            parse_limits("2 per 10 seconds").unwrap(),
            vec![RateLimit::new(2, Duration::from_secs(10))]
        );
        assert_eq!(
            parse_limits("100/2 hours").unwrap(),
            vec![RateLimit::new(100, Duration::from_secs(7200))]
        );
    }

    #[test]
    fn parses_multiple_limits() {
        let limits = parse_limits("5/second; 100/day").unwrap();
        assert_eq!(
            limits,
            vec![
                RateLimit::new(5, Duration::from_secs(1)),
                RateLimit::new(100, Duration::from_secs(86_400)),
            ]
        );
    }

    #[test]
    fn rejects_malformed_limits() {
        assert!(matches!(
            parse_limits("ten/minute"),
            Err(LimitParseError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse_limits("0/minute"),
            Err(LimitParseError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse_limits("10/fortnight"),
            Err(LimitParseError::UnknownUnit(unit)) if unit == "fortnight"
        ));
        assert!(matches!(
            parse_limits("10 minute"),
            Err(LimitParseError::Malformed(_))
        ));
        assert!(matches!(parse_limits(" ; "), Err(LimitParseError::Malformed(_))));
    }
}
