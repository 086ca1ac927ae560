use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayoutInterval<T> {
    pub start: u32,
    pub end: u32,
    pub payload: T,
}

impl<T> LayoutInterval<T> {
    pub fn new(start: u32, end: u32, payload: T) -> Self {
        Self {
            start,
            end,
            payload,
        }
    }

    pub fn duration(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionedInterval<T> {
    pub start: u32,
    pub end: u32,
    pub column: usize,
    pub total_columns: usize,
    pub payload: T,
}

pub fn overlaps(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> bool {
    a_start < b_end && a_end > b_start
}

/// Assigns every interval a column and the number of columns its own
/// concurrency peak needs. Output is ordered by start ascending, longer
/// intervals first on equal starts; input order breaks the remaining ties.
pub fn compute_layout<T>(
    intervals: Vec<LayoutInterval<T>>,
) -> Result<Vec<PositionedInterval<T>>, String> {
    if let Some(malformed) = intervals.iter().find(|interval| interval.end <= interval.start) {
        return Err(format!(
            "interval end ({}) must be after start ({})",
            malformed.end, malformed.start
        ));
    }

    let mut sorted = intervals;
    sorted.sort_by_key(|interval| (interval.start, Reverse(interval.duration())));

    let mut column_ends: Vec<u32> = Vec::new();
    let mut columns = Vec::with_capacity(sorted.len());
    for interval in &sorted {
        let column = match column_ends.iter().position(|end| *end <= interval.start) {
            Some(index) => {
                column_ends[index] = interval.end;
                index
            }
            None => {
                column_ends.push(interval.end);
                column_ends.len() - 1
            }
        };
        columns.push(column);
    }

    let peaks = sorted
        .iter()
        .map(|interval| peak_concurrency(interval, &sorted))
        .collect::<Vec<_>>();

    Ok(sorted
        .into_iter()
        .zip(columns.into_iter().zip(peaks))
        .map(|(interval, (column, total_columns))| PositionedInterval {
            start: interval.start,
            end: interval.end,
            column,
            total_columns,
            payload: interval.payload,
        })
        .collect())
}

fn peak_concurrency<T>(interval: &LayoutInterval<T>, all: &[LayoutInterval<T>]) -> usize {
    let inside = |instant: u32| instant > interval.start && instant < interval.end;

    let mut instants = vec![interval.start];
    for other in all {
        if inside(other.start) {
            instants.push(other.start);
        }
        if inside(other.end) {
            instants.push(other.end);
        }
    }
    instants.sort_unstable();
    instants.dedup();

    instants
        .into_iter()
        .map(|instant| {
            all.iter()
                .filter(|candidate| candidate.start <= instant && instant < candidate.end)
                .count()
        })
        .max()
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn interval(start: u32, end: u32, name: &'static str) -> LayoutInterval<&'static str> {
        LayoutInterval::new(start, end, name)
    }

    fn find<'a>(
        layout: &'a [PositionedInterval<&'static str>],
        name: &str,
    ) -> &'a PositionedInterval<&'static str> {
        layout
            .iter()
            .find(|positioned| positioned.payload == name)
            .expect("interval present in layout")
    }

    #[test]
    fn overlap_table_matches_half_open_semantics() {
        let (start, end) = (420, 450);
        assert!(overlaps(start, end, 430, 460));
        assert!(overlaps(start, end, 400, 440));
        assert!(overlaps(start, end, 425, 445));
        assert!(overlaps(start, end, 400, 500));

        assert!(!overlaps(start, end, 450, 480));
        assert!(!overlaps(start, end, 390, 420));
        assert!(!overlaps(start, end, 500, 530));
    }

    #[test]
    fn three_event_chain_uses_local_peak_widths() {
        let layout = compute_layout(vec![
            interval(70, 100, "c"),
            interval(0, 60, "a"),
            interval(30, 90, "b"),
        ])
        .expect("valid layout");

        let a = find(&layout, "a");
        let b = find(&layout, "b");
        let c = find(&layout, "c");

        assert_eq!((a.column, a.total_columns), (0, 2));
        assert_eq!((b.column, b.total_columns), (1, 2));
        assert_eq!((c.column, c.total_columns), (0, 2));
        assert_eq!(
            layout.iter().map(|positioned| positioned.payload).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn equal_starts_put_longer_interval_left() {
        let layout = compute_layout(vec![interval(420, 450, "short"), interval(420, 540, "long")])
            .expect("valid layout");

        assert_eq!(find(&layout, "long").column, 0);
        assert_eq!(find(&layout, "short").column, 1);
        assert_eq!(find(&layout, "short").total_columns, 2);
    }

    #[test]
    fn isolated_cluster_does_not_inherit_global_width() {
        let layout = compute_layout(vec![
            interval(420, 480, "x"),
            interval(420, 480, "y"),
            interval(430, 470, "z"),
            interval(600, 630, "alone"),
        ])
        .expect("valid layout");

        assert_eq!(find(&layout, "x").total_columns, 3);
        assert_eq!(find(&layout, "alone").total_columns, 1);
        assert_eq!(find(&layout, "alone").column, 0);
    }

    #[test]
    fn adjacent_intervals_share_a_column() {
        let layout = compute_layout(vec![interval(420, 450, "first"), interval(450, 480, "second")])
            .expect("valid layout");

        assert_eq!(find(&layout, "second").column, 0);
        assert_eq!(find(&layout, "second").total_columns, 1);
    }

    #[test]
    fn empty_and_malformed_inputs() {
        let empty: Vec<LayoutInterval<()>> = Vec::new();
        assert!(compute_layout(empty).expect("empty layout").is_empty());
        assert!(compute_layout(vec![interval(450, 450, "zero")]).is_err());
        assert!(compute_layout(vec![interval(460, 450, "reversed")]).is_err());
    }

    // Feature: dayplan, Property 4: intervals sharing a column never overlap
    proptest! {
        #[test]
        fn intervals_sharing_a_column_never_overlap(
            raw in proptest::collection::vec((0u32..600u32, 1u32..120u32), 1..25)
        ) {
            let input = raw
                .iter()
                .enumerate()
                .map(|(index, (start, length))| LayoutInterval::new(*start, start + length, index))
                .collect::<Vec<_>>();
            let layout = compute_layout(input).expect("valid layout");

            prop_assert_eq!(layout.len(), raw.len());
            for (index, left) in layout.iter().enumerate() {
                prop_assert!(left.total_columns >= 1);
                for right in layout.iter().skip(index + 1) {
                    if left.column == right.column {
                        prop_assert!(!overlaps(left.start, left.end, right.start, right.end));
                    }
                }
            }
        }
    }
}
