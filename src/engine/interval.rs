use crate::model::{Span, Ts};

/// Whether booking range `a` interacts with window `b`.
///
/// True iff any of:
/// 1. `a.start` lies strictly inside `(b.start, b.end)`
/// 2. `a.end` lies strictly inside `(b.start, b.end)`
/// 3. `a` and `b` are identical
/// 4. `a` strictly contains `b` on both sides
///
/// This is narrower than `a.start < b.end && b.start < a.end`: an `a` that
/// shares one bound with `b` and extends past the other, e.g. `a = [0, 1800]`
/// against `b = [0, 900]`, is not flagged. Candidate-booking filters depend
/// on this exact shape.
pub fn overlaps(a: &Span, b: &Span) -> bool {
    let starts_inside = b.start < a.start && a.start < b.end;
    let ends_inside = b.start < a.end && a.end < b.end;
    let exact = a.start == b.start && a.end == b.end;
    let contains = a.start < b.start && a.end > b.end;
    starts_inside || ends_inside || exact || contains
}

pub fn max_time(a: Ts, b: Ts) -> Ts {
    a.max(b)
}

pub fn min_time(a: Ts, b: Ts) -> Ts {
    a.min(b)
}

/// Intersection bounds of two ranges: `(max(starts), min(ends))`.
/// When the ranges are disjoint the result has `from > to`.
pub fn clamp_intersection(a: &Span, b: &Span) -> (Ts, Ts) {
    (max_time(a.start, b.start), min_time(a.end, b.end))
}

/// Bucket start instants covering `[from, to]`: `(to - from) / bucket + 1`
/// instants starting at `from`. Empty when `to < from` or `bucket <= 0`.
pub fn discretize_window(from: Ts, to: Ts, bucket: Ts) -> Vec<Ts> {
    if to < from || bucket <= 0 {
        return Vec::new();
    }
    let count = bucket_count(from, to, bucket);
    (0..count as Ts).map(|i| from + i * bucket).collect()
}

/// Number of buckets `discretize_window` would produce. Zero when the
/// count does not fit the integer types.
pub fn bucket_count(from: Ts, to: Ts, bucket: Ts) -> usize {
    if to < from || bucket <= 0 {
        return 0;
    }
    to.checked_sub(from)
        .and_then(|width| (width / bucket).checked_add(1))
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(start: Ts, end: Ts) -> Span {
        Span::new(start, end)
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        assert!(!overlaps(&s(0, 900), &s(900, 1800)));
        assert!(!overlaps(&s(900, 1800), &s(0, 900)));
    }

    #[test]
    fn strict_containment_overlaps() {
        assert!(overlaps(&s(0, 1800), &s(300, 900)));
    }

    #[test]
    fn start_or_end_strictly_inside() {
        assert!(overlaps(&s(300, 1200), &s(0, 900)));
        assert!(overlaps(&s(0, 600), &s(300, 900)));
    }

    #[test]
    fn exact_match_overlaps() {
        assert!(overlaps(&s(0, 900), &s(0, 900)));
    }

    #[test]
    fn shared_bound_gaps_are_not_flagged() {
        // a extends past b on one side only, sharing the other bound
        assert!(!overlaps(&s(0, 1800), &s(0, 900)));
        assert!(!overlaps(&s(0, 1800), &s(900, 1800)));
        // a sits inside b sharing exactly one bound
        assert!(overlaps(&s(0, 900), &s(0, 1800)));
        assert!(overlaps(&s(900, 1800), &s(0, 1800)));
    }

    #[test]
    fn canonical_overlap_gap_exists() {
        let a = s(0, 1800);
        let b = s(0, 900);
        let canonical = a.start < b.end && b.start < a.end;
        assert!(canonical);
        assert!(!overlaps(&a, &b));
    }

    #[test]
    fn disjoint_ranges() {
        assert!(!overlaps(&s(0, 100), &s(200, 300)));
        assert!(!overlaps(&s(200, 300), &s(0, 100)));
    }

    #[test]
    fn clamp_takes_inner_bounds() {
        assert_eq!(clamp_intersection(&s(0, 1800), &s(900, 3600)), (900, 1800));
        assert_eq!(clamp_intersection(&s(300, 600), &s(0, 900)), (300, 600));
    }

    #[test]
    fn clamp_disjoint_is_inverted() {
        let (from, to) = clamp_intersection(&s(0, 100), &s(200, 300));
        assert!(from > to);
    }

    #[test]
    fn discretize_includes_upper_bound() {
        assert_eq!(discretize_window(0, 1800, 900), vec![0, 900, 1800]);
        assert_eq!(discretize_window(0, 900, 900), vec![0, 900]);
    }

    #[test]
    fn discretize_partial_bucket_floors() {
        assert_eq!(discretize_window(0, 1000, 900), vec![0, 900]);
    }

    #[test]
    fn discretize_degenerate() {
        assert_eq!(discretize_window(900, 900, 900), vec![900]);
        assert!(discretize_window(900, 0, 900).is_empty());
        assert!(discretize_window(0, 900, 0).is_empty());
    }

    #[test]
    fn extreme_bounds_do_not_overflow() {
        let edge = i64::MAX / 900 * 900;
        assert_eq!(bucket_count(-edge, edge, 900), 0);
        assert!(discretize_window(-edge, edge, 900).is_empty());
        assert_eq!(bucket_count(edge - 900, edge, 900), 2);
        assert_eq!(Span::new(-edge, edge).duration_secs(), i64::MAX);
    }

    #[test]
    fn min_max() {
        assert_eq!(max_time(3, 7), 7);
        assert_eq!(min_time(3, 7), 3);
    }
}
