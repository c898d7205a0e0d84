//! Achievement checking logic

use super::definitions::Criteria;
use super::records::EventStats;
use crate::clock::DAY_MS;

/// Start of the rolling window for `criteria` ending at `now`
pub fn window_start(criteria: &Criteria, now: i64) -> Option<i64> {
    criteria
        .window_days()
        .map(|days| now.saturating_sub(i64::from(days) * DAY_MS))
}

/// Whether the aggregated events satisfy the criterion
pub fn is_satisfied(criteria: &Criteria, stats: &EventStats) -> bool {
    match criteria {
        Criteria::Count { threshold, .. } => stats.count >= *threshold,
        Criteria::SingleValue { threshold, .. } => stats.count > 0 && stats.max_value >= *threshold,
        Criteria::TotalValue { threshold, .. } => stats.total_value >= *threshold,
    }
}

/// Current progress and target, for display
pub fn progress(criteria: &Criteria, stats: &EventStats) -> (i64, i64) {
    match criteria {
        Criteria::Count { threshold, .. } => (
            i64::try_from(stats.count).unwrap_or(i64::MAX),
            i64::try_from(*threshold).unwrap_or(i64::MAX),
        ),
        Criteria::SingleValue { threshold, .. } => (stats.max_value, *threshold),
        Criteria::TotalValue { threshold, .. } => (stats.total_value, *threshold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(count: u64, max_value: i64, total_value: i64) -> EventStats {
        EventStats {
            count,
            max_value,
            total_value,
        }
    }

    #[test]
    fn test_count_threshold() {
        let c = Criteria::Count {
            event: "purchase".to_string(),
            threshold: 10,
            window_days: None,
        };
        assert!(!is_satisfied(&c, &stats(9, 1, 9)));
        assert!(is_satisfied(&c, &stats(10, 1, 10)));
        assert_eq!(progress(&c, &stats(4, 1, 4)), (4, 10));
    }

    #[test]
    fn test_single_value_needs_one_big_event() {
        let c = Criteria::SingleValue {
            event: "purchase".to_string(),
            threshold: 500,
            window_days: None,
        };
        assert!(!is_satisfied(&c, &stats(10, 499, 4_990)));
        assert!(is_satisfied(&c, &stats(1, 500, 500)));
    }

    #[test]
    fn test_total_value() {
        let c = Criteria::TotalValue {
            event: "purchase".to_string(),
            threshold: 1_000,
            window_days: None,
        };
        assert!(is_satisfied(&c, &stats(3, 400, 1_000)));
        assert!(!is_satisfied(&c, &stats(3, 400, 999)));
    }

    #[test]
    fn test_window_start() {
        let c = Criteria::Count {
            event: "share".to_string(),
            threshold: 5,
            window_days: Some(30),
        };
        assert_eq!(window_start(&c, 31 * DAY_MS), Some(DAY_MS));
        let unbounded = Criteria::Count {
            event: "share".to_string(),
            threshold: 5,
            window_days: None,
        };
        assert_eq!(window_start(&unbounded, 31 * DAY_MS), None);
    }
}
