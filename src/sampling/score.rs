use rand::Rng;

use crate::types::TelemetryItem;

const MIN_HASH_INPUT_LEN: usize = 8;
// keeps the top score strictly below 100
const MAX_SCORE: f64 = 99.999_999_999;

/// Returns the item's sampling score in `[0, 100)`.
///
/// Items with a user id (or failing that an operation id) always get the same score, so every
/// item of a user or operation is kept or dropped together. Anything else gets a random score.
pub fn sampling_score(item: &TelemetryItem) -> f64 {
    let identity = item
        .user_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .or_else(|| item.operation_id.as_deref().filter(|id| !id.is_empty()));

    match identity {
        Some(id) => score_for_id(id),
        None => rand::thread_rng().gen::<f64>() * 100.0,
    }
}

pub fn score_for_id(id: &str) -> f64 {
    score_from_hash(djb2(id))
}

fn score_from_hash(hash: i32) -> f64 {
    let hash = if hash == i32::MIN {
        i32::MAX
    } else {
        hash.abs()
    };
    (f64::from(hash) / f64::from(i32::MAX) * 100.0).min(MAX_SCORE)
}

/// DJB2 over UTF-16 code units with wrapping 32-bit arithmetic.
fn djb2(id: &str) -> i32 {
    let mut units: Vec<u16> = id.encode_utf16().collect();
    while !units.is_empty() && units.len() < MIN_HASH_INPUT_LEN {
        units.extend_from_within(..);
    }

    units.iter().fold(5381i32, |hash, &unit| {
        hash.wrapping_mul(33).wrapping_add(i32::from(unit))
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn known_scores() {
        assert_close(score_for_id("abc"), 46.12368808413096);
        assert_close(score_for_id("a"), 16.249091046046974);
        assert_close(score_for_id("user-1"), 91.2761658389476);
        assert_close(score_for_id("operation-42"), 45.58805038481395);
    }

    #[test]
    fn user_id_takes_precedence() {
        let item = TelemetryItem::request("k", Duration::ZERO, true)
            .with_user_id("abc")
            .with_operation_id("operation-42");
        assert_close(sampling_score(&item), score_for_id("abc"));

        let item = TelemetryItem::request("k", Duration::ZERO, true)
            .with_user_id("")
            .with_operation_id("operation-42");
        assert_close(sampling_score(&item), score_for_id("operation-42"));
    }

    #[test]
    fn extreme_hashes_stay_below_hundred() {
        assert_eq!(score_from_hash(0), 0.0);
        for hash in [i32::MAX, i32::MIN, i32::MIN + 1, -i32::MAX] {
            let score = score_from_hash(hash);
            assert!((99.0..100.0).contains(&score), "{hash} scored {score}");
        }
        assert_close(score_from_hash(-5), score_from_hash(5));
    }

    #[test]
    fn random_score_in_range() {
        let item = TelemetryItem::request("k", Duration::ZERO, true);
        for _ in 0..1000 {
            let score = sampling_score(&item);
            assert!((0.0..100.0).contains(&score));
        }
    }
}
