//! Parsing and formatting of `[DD.]HH:MM:SS.ffffff` durations.
//!
//! Only millisecond precision is kept when parsing; live metrics never look further.

use std::time::Duration;

use anyhow::{anyhow, bail, Error};

pub fn parse_duration(raw: &str) -> Result<Duration, Error> {
    let mut parts = raw.split(':');
    let (Some(days_hours), Some(minutes), Some(seconds), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("duration {raw:?} is not in [DD.]HH:MM:SS.ffffff format");
    };

    let (days, hours) = match days_hours.split_once('.') {
        Some((days, hours)) => (digits(days)?, digits(hours)?),
        None => (0, digits(days_hours)?),
    };
    let minutes = digits(minutes)?;
    let (seconds, millis) = match seconds.split_once('.') {
        Some((seconds, fraction)) => (digits(seconds)?, fraction_millis(fraction)?),
        None => (digits(seconds)?, 0),
    };
    if minutes >= 60 || seconds >= 60 {
        bail!("duration {raw:?} has out of range minutes or seconds");
    }

    let total_millis = days
        .checked_mul(24)
        .and_then(|h| h.checked_add(hours))
        .and_then(|h| h.checked_mul(60))
        .and_then(|m| m.checked_add(minutes))
        .and_then(|m| m.checked_mul(60))
        .and_then(|s| s.checked_add(seconds))
        .and_then(|s| s.checked_mul(1000))
        .and_then(|ms| ms.checked_add(millis))
        .ok_or_else(|| anyhow!("duration {raw:?} is too large"))?;
    Ok(Duration::from_millis(total_millis))
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let days = total_seconds / 86_400;
    let hours = total_seconds / 3600 % 24;
    let minutes = total_seconds / 60 % 60;
    let seconds = total_seconds % 60;
    let micros = duration.subsec_micros();
    if days > 0 {
        format!("{days}.{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
    }
}

fn digits(raw: &str) -> Result<u64, Error> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(anyhow!("unexpected duration component {raw:?}"));
    }
    Ok(raw.parse()?)
}

fn fraction_millis(fraction: &str) -> Result<u64, Error> {
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        bail!("unexpected duration fraction {fraction:?}");
    }
    Ok(fraction
        .bytes()
        .chain(std::iter::repeat(b'0'))
        .take(3)
        .fold(0, |millis, b| millis * 10 + u64::from(b - b'0')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!(
            parse_duration("00:00:00.123456").unwrap(),
            Duration::from_millis(123)
        );
        assert_eq!(
            parse_duration("01:02:03.4").unwrap(),
            Duration::from_millis(((60 + 2) * 60 + 3) * 1000 + 400)
        );
        assert_eq!(
            parse_duration("2.00:00:01.000000").unwrap(),
            Duration::from_millis((2 * 86_400 + 1) * 1000)
        );
        assert_eq!(parse_duration("00:00:07").unwrap(), Duration::from_secs(7));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("00:00").is_err());
        assert!(parse_duration("00:00:00:00").is_err());
        assert!(parse_duration("00:61:00.000").is_err());
        assert!(parse_duration("aa:00:00.000").is_err());
        assert!(parse_duration("00:00:00.1x").is_err());
        assert!(parse_duration("99999999999999999.00:00:00.000").is_err());
        assert!(parse_duration("18446744073709551615:00:00").is_err());
    }

    #[test]
    fn format() {
        assert_eq!(format_duration(Duration::from_millis(120)), "00:00:00.120000");
        assert_eq!(
            format_duration(Duration::from_secs(86_400 + 3661)),
            "1.01:01:01.000000"
        );
    }
}
