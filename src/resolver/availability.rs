use crate::model::*;

/// Free sub-spans of `window` not covered by any of `booked`.
/// `booked` may be unsorted and may stick out of the window.
pub fn free_windows(window: &Span, booked: &[Span]) -> Vec<Span> {
    let mut clamped: Vec<Span> = booked
        .iter()
        .filter(|b| b.overlaps(window))
        .map(|b| Span::new(b.start.max(window.start), b.end.min(window.end)))
        .collect();
    clamped.sort_by_key(|s| s.start);
    subtract_intervals(&[*window], &merge_overlapping(&clamped))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start and internally disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    #[test]
    fn empty_day_is_one_window() {
        let day = Span::new(0, 24 * H);
        assert_eq!(free_windows(&day, &[]), vec![day]);
    }

    #[test]
    fn bookings_carve_gaps() {
        let day = Span::new(8 * H, 18 * H);
        let booked = [Span::new(12 * H, 13 * H), Span::new(9 * H, 10 * H)];
        assert_eq!(
            free_windows(&day, &booked),
            vec![
                Span::new(8 * H, 9 * H),
                Span::new(10 * H, 12 * H),
                Span::new(13 * H, 18 * H),
            ]
        );
    }

    #[test]
    fn bookings_sticking_out_are_clamped() {
        let window = Span::new(10 * H, 12 * H);
        let booked = [Span::new(9 * H, 10 * H + 30), Span::new(11 * H, 20 * H), Span::new(0, H)];
        assert_eq!(free_windows(&window, &booked), vec![Span::new(10 * H + 30, 11 * H)]);
    }

    #[test]
    fn fully_booked_has_no_windows() {
        let window = Span::new(10 * H, 12 * H);
        let booked = [Span::new(10 * H, 11 * H), Span::new(11 * H, 12 * H)];
        assert!(free_windows(&window, &booked).is_empty());
    }

    #[test]
    fn merge_adjacent_and_overlapping() {
        let spans = [Span::new(0, 10), Span::new(10, 20), Span::new(15, 30), Span::new(40, 50)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(0, 30), Span::new(40, 50)]);
        assert!(merge_overlapping(&[]).is_empty());
    }

    #[test]
    fn subtract_empty_removals() {
        let base = [Span::new(0, 10), Span::new(20, 30)];
        assert_eq!(subtract_intervals(&base, &[]), base.to_vec());
        assert!(subtract_intervals(&[], &base).is_empty());
    }
}
