use crate::domain::layout::overlaps;
use crate::domain::models::BusyInterval;

pub const DAY_START_MINUTES: u32 = 420;
pub const DAY_END_MINUTES: u32 = 1200;
pub const GRID_INCREMENT_MINUTES: u32 = 5;
pub const DEFAULT_BLOCK_DURATION_MINUTES: u32 = 30;
pub const MINUTES_PER_DAY: u32 = 1440;

pub fn snap(minutes: i64) -> i64 {
    let grid = i64::from(GRID_INCREMENT_MINUTES);
    minutes
        .saturating_add(grid / 2)
        .div_euclid(grid)
        .saturating_mul(grid)
}

/// Shrinks `duration` so the block ends at day end at the latest, then floors
/// it to one grid increment. `start` is never moved.
pub fn clamp(start: i64, duration: i64) -> i64 {
    let day_end = i64::from(DAY_END_MINUTES);
    let duration = if start.saturating_add(duration) > day_end {
        day_end.saturating_sub(start)
    } else {
        duration
    };
    duration.max(i64::from(GRID_INCREMENT_MINUTES))
}

pub fn normalize_block(start: i64, duration: i64) -> Result<(u32, u32), String> {
    let day = i64::from(MINUTES_PER_DAY);
    if !(-day..=2 * day).contains(&start) {
        return Err(format!(
            "time_block.start_minutes must be within 0..{MINUTES_PER_DAY} (got {start})"
        ));
    }
    // Anything longer than a day clamps to day end anyway.
    let duration = duration.clamp(-day, day);
    let start = snap(start);
    if !(0..i64::from(MINUTES_PER_DAY)).contains(&start) {
        return Err(format!(
            "time_block.start_minutes must be within 0..{MINUTES_PER_DAY} (got {start})"
        ));
    }
    let duration = clamp(start, snap(duration));
    let duration = u32::try_from(duration)
        .map_err(|_| format!("time_block.duration_minutes out of range: {duration}"))?;
    Ok((start as u32, duration))
}

/// First grid-aligned start from day start whose `[t, t + duration)` window
/// fits before day end and overlaps none of `busy`. Falls back to day start
/// when the day is full, accepting an overlapping placement.
pub fn find_earliest_free_slot(duration_minutes: u32, busy: &[BusyInterval]) -> u32 {
    let mut candidate = DAY_START_MINUTES;
    while candidate + duration_minutes <= DAY_END_MINUTES {
        let candidate_end = candidate + duration_minutes;
        let conflict = busy.iter().any(|interval| {
            overlaps(
                candidate,
                candidate_end,
                interval.start_minutes,
                interval.end_minutes,
            )
        });
        if !conflict {
            return candidate;
        }
        candidate += GRID_INCREMENT_MINUTES;
    }
    DAY_START_MINUTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn busy(start_minutes: u32, end_minutes: u32) -> BusyInterval {
        BusyInterval {
            start_minutes,
            end_minutes,
        }
    }

    #[test]
    fn snap_rounds_to_nearest_grid_multiple() {
        assert_eq!(snap(423), 425);
        assert_eq!(snap(33), 35);
        assert_eq!(snap(483), 485);
        assert_eq!(snap(422), 420);
        assert_eq!(snap(2), 0);
        assert_eq!(snap(-3), -5);
    }

    #[test]
    fn clamp_shrinks_blocks_running_past_day_end() {
        assert_eq!(clamp(1170, 60), 30);
        assert_eq!(clamp(420, 60), 60);
        assert_eq!(clamp(420, 0), GRID_INCREMENT_MINUTES as i64);
        assert_eq!(clamp(1200, 30), GRID_INCREMENT_MINUTES as i64);
    }

    #[test]
    fn normalize_block_snaps_before_clamping() {
        assert_eq!(normalize_block(423, 30), Ok((425, 30)));
        assert_eq!(normalize_block(420, 33), Ok((420, 35)));
        assert_eq!(normalize_block(1170, 60), Ok((1170, 30)));
        assert_eq!(normalize_block(420, 2), Ok((420, 5)));
        assert!(normalize_block(-10, 30).is_err());
        assert!(normalize_block(1440, 30).is_err());
    }

    #[test]
    fn normalize_block_rejects_extreme_inputs_without_overflow() {
        assert!(normalize_block(i64::MAX, 30).is_err());
        assert!(normalize_block(i64::MIN, 30).is_err());
        assert_eq!(normalize_block(420, i64::MAX), Ok((420, 780)));
        assert_eq!(normalize_block(420, i64::MIN), Ok((420, 5)));
        assert_eq!(snap(i64::MAX) % 5, 0);
        assert_eq!(clamp(i64::MIN, i64::MIN), GRID_INCREMENT_MINUTES as i64);
    }

    #[test]
    fn free_slot_on_empty_day_is_day_start() {
        assert_eq!(find_earliest_free_slot(30, &[]), DAY_START_MINUTES);
    }

    #[test]
    fn free_slot_skips_busy_ranges_and_accepts_adjacency() {
        let busy = vec![busy(420, 450), busy(450, 500), busy(505, 520)];
        // 500..530 overlaps 505..520, so the first fit is right after it.
        assert_eq!(find_earliest_free_slot(30, &busy), 520);
        assert_eq!(find_earliest_free_slot(5, &busy), 500);
    }

    #[test]
    fn free_slot_falls_back_to_day_start_when_day_is_full() {
        let busy = vec![busy(DAY_START_MINUTES, DAY_END_MINUTES)];
        assert_eq!(find_earliest_free_slot(30, &busy), DAY_START_MINUTES);
    }

    #[test]
    fn free_slot_uses_last_window_that_still_fits() {
        let busy = vec![busy(DAY_START_MINUTES, 1170)];
        assert_eq!(find_earliest_free_slot(30, &busy), 1170);
        assert_eq!(find_earliest_free_slot(35, &busy), DAY_START_MINUTES);
    }

    // Feature: dayplan, Property 2: snapping is idempotent and moves at most half a step
    // Feature: dayplan, Property 3: a found slot is free of every busy interval
    proptest! {
        #[test]
        fn snap_is_idempotent(minutes in -5_000i64..5_000i64) {
            let once = snap(minutes);
            prop_assert_eq!(snap(once), once);
            prop_assert_eq!(once % GRID_INCREMENT_MINUTES as i64, 0);
            prop_assert!((once - minutes).abs() <= 2);
        }

        #[test]
        fn found_slot_never_overlaps_when_not_falling_back(
            duration in 1u32..120u32,
            raw in proptest::collection::vec((420u32..1200u32, 5u32..90u32), 0..12)
        ) {
            let busy = raw
                .into_iter()
                .map(|(start, length)| busy(start, start + length))
                .collect::<Vec<_>>();
            let slot = find_earliest_free_slot(duration, &busy);
            let conflicts = busy
                .iter()
                .any(|interval| overlaps(slot, slot + duration, interval.start_minutes, interval.end_minutes));
            if conflicts {
                prop_assert_eq!(slot, DAY_START_MINUTES);
            } else {
                prop_assert!(slot + duration <= DAY_END_MINUTES || slot == DAY_START_MINUTES);
            }
        }
    }
}
