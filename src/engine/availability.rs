use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::model::*;

// ── Availability Checker ──────────────────────────────────────────

/// True if `candidate` shares at least one calendar day with any range in
/// `existing`. Stops at the first hit; order of `existing` does not matter.
///
/// Callers pass only the confirmed reservations of a single room.
pub fn has_overlap<'a, I>(candidate: &DateRange, existing: I) -> bool
where
    I: IntoIterator<Item = &'a DateRange>,
{
    existing.into_iter().any(|range| candidate.overlaps(range))
}

/// Every calendar day held by a confirmed stay, deduplicated and sorted.
/// This is what a date picker greys out.
pub fn booked_days<'a, I>(confirmed: I) -> Vec<NaiveDate>
where
    I: IntoIterator<Item = &'a DateRange>,
{
    let mut days = BTreeSet::new();
    for range in confirmed {
        days.extend(range.days());
    }
    days.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn range(a: &str, b: &str) -> DateRange {
        DateRange::new(d(a), d(b)).unwrap()
    }

    fn shift(r: &DateRange, days: i64) -> DateRange {
        let delta = chrono::Duration::days(days);
        DateRange::new(r.start() + delta, r.end() + delta).unwrap()
    }

    /// A small grid of ranges of varying length around a fixed anchor.
    fn sample_ranges() -> Vec<DateRange> {
        let base = range("2024-06-10", "2024-06-10");
        let mut out = Vec::new();
        for offset in -6..=6 {
            for len in 0..=4 {
                let s = shift(&base, offset);
                out.push(DateRange::new(s.start(), s.start() + chrono::Duration::days(len)).unwrap());
            }
        }
        out
    }

    #[test]
    fn empty_existing_never_overlaps() {
        let c = range("2024-06-10", "2024-06-12");
        let none: [DateRange; 0] = [];
        assert!(!has_overlap(&c, &none));
    }

    #[test]
    fn overlap_is_symmetric() {
        let ranges = sample_ranges();
        for a in &ranges {
            for b in &ranges {
                assert_eq!(
                    has_overlap(a, [b]),
                    has_overlap(b, [a]),
                    "asymmetric for {a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn range_overlaps_itself() {
        for a in sample_ranges() {
            assert!(has_overlap(&a, [&a]), "{a} should overlap itself");
        }
    }

    #[test]
    fn strictly_contained_range_overlaps() {
        let outer = range("2024-06-01", "2024-06-30");
        let inner = range("2024-06-10", "2024-06-12");
        assert!(has_overlap(&inner, [&outer]));
        assert!(has_overlap(&outer, [&inner]));
    }

    #[test]
    fn shared_boundary_day_overlaps() {
        for a in sample_ranges() {
            let b = DateRange::new(a.end(), a.end() + chrono::Duration::days(3)).unwrap();
            assert!(has_overlap(&a, [&b]), "{a} and {b} share {}", a.end());
        }
    }

    #[test]
    fn full_free_day_between_means_no_overlap() {
        for a in sample_ranges() {
            for gap in 2..5 {
                let start = a.end() + chrono::Duration::days(gap);
                let b = DateRange::new(start, start + chrono::Duration::days(2)).unwrap();
                assert!(!has_overlap(&a, [&b]), "{a} vs {b}");
                assert!(!has_overlap(&b, [&a]), "{b} vs {a}");
            }
        }
    }

    #[test]
    fn checkin_on_checkout_day_is_blocked() {
        let existing = [range("2024-06-10", "2024-06-15")];
        let candidate = range("2024-06-15", "2024-06-18");
        assert!(has_overlap(&candidate, &existing));
    }

    #[test]
    fn next_day_after_checkout_is_free() {
        let existing = [range("2024-01-01", "2024-01-05")];
        let candidate = range("2024-01-06", "2024-01-10");
        assert!(!has_overlap(&candidate, &existing));
    }

    #[test]
    fn any_one_existing_range_is_enough() {
        let existing = [
            range("2024-01-01", "2024-01-03"),
            range("2024-03-01", "2024-03-03"),
            range("2024-02-10", "2024-02-12"),
        ];
        assert!(has_overlap(&range("2024-02-12", "2024-02-14"), &existing));
        assert!(!has_overlap(&range("2024-02-14", "2024-02-20"), &existing));
    }

    #[test]
    fn booked_days_merges_and_sorts() {
        let stays = [range("2024-06-14", "2024-06-16"), range("2024-06-10", "2024-06-14")];
        let days = booked_days(&stays);
        assert_eq!(days.first(), Some(&d("2024-06-10")));
        assert_eq!(days.last(), Some(&d("2024-06-16")));
        assert_eq!(days.len(), 7); // 10..=16, the 14th counted once
    }

    #[test]
    fn booked_days_empty() {
        let none: [DateRange; 0] = [];
        assert!(booked_days(&none).is_empty());
    }
}
