// XP and level arithmetic.
//
// Levels are derived from cumulative XP and never stored. All values are
// clamped so a counter never exceeds MAX_XP and a level never exceeds MAX_LEVEL.

use serde::Serialize;

pub const XP_PER_MESSAGE: i64 = 100;
pub const XP_PER_LEVEL: i64 = 1000;
pub const MAX_LEVEL: i64 = 100;
pub const MAX_XP: i64 = MAX_LEVEL * XP_PER_LEVEL;

/// Level reached with `xp` cumulative experience.
pub fn level_from_xp(xp: i64) -> i64 {
    (xp / XP_PER_LEVEL).min(MAX_LEVEL)
}

/// Position of a counter inside its current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub level: i64,
    pub into_level: i64,
    pub needed: i64,
}

impl Progress {
    /// True once the counter sits on the last level. The bar is then reported
    /// full (`into_level == needed`) and `remaining()` must not be shown.
    pub fn is_maxed(&self) -> bool {
        self.level >= MAX_LEVEL
    }

    pub fn remaining(&self) -> i64 {
        self.needed - self.into_level
    }

    /// Completion of the current level, rounded down.
    pub fn percent(&self) -> i64 {
        self.into_level * 100 / self.needed
    }
}

/// Split `xp` into level, XP earned inside that level, and XP the level spans.
pub fn progress_to_next(xp: i64) -> Progress {
    let level = level_from_xp(xp);
    if level >= MAX_LEVEL {
        return Progress {
            level: MAX_LEVEL,
            into_level: XP_PER_LEVEL,
            needed: XP_PER_LEVEL,
        };
    }
    Progress {
        level,
        into_level: xp - level * XP_PER_LEVEL,
        needed: XP_PER_LEVEL,
    }
}

/// Outcome of adding XP to a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct XpChange {
    pub old_xp: i64,
    pub new_xp: i64,
    pub old_level: i64,
    pub new_level: i64,
}

impl XpChange {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }
}

/// Saturating add of `amount` onto `current`, capped at MAX_XP.
pub fn apply_gain(current: i64, amount: i64) -> XpChange {
    let new_xp = current.saturating_add(amount).min(MAX_XP);
    XpChange {
        old_xp: current,
        new_xp,
        old_level: level_from_xp(current),
        new_level: level_from_xp(new_xp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(MAX_XP, 100_000);
        assert_eq!(XP_PER_MESSAGE, 100);
    }

    #[test]
    fn test_level_boundaries() {
        assert_eq!(level_from_xp(0), 0);
        assert_eq!(level_from_xp(999), 0);
        assert_eq!(level_from_xp(1000), 1);
        assert_eq!(level_from_xp(1999), 1);
        assert_eq!(level_from_xp(MAX_XP - 1), MAX_LEVEL - 1);
        assert_eq!(level_from_xp(MAX_XP), MAX_LEVEL);
    }

    #[test]
    fn test_level_clamped_above_max() {
        assert_eq!(level_from_xp(MAX_XP * 3), MAX_LEVEL);
    }

    #[test]
    fn test_level_monotonic_over_full_range() {
        let mut prev = level_from_xp(0);
        for xp in 1..=MAX_XP {
            let lvl = level_from_xp(xp);
            assert!(lvl >= prev, "level dropped at xp={xp}");
            // Only steps on exact multiples of XP_PER_LEVEL
            if xp % XP_PER_LEVEL == 0 {
                assert_eq!(lvl, prev + 1);
            } else {
                assert_eq!(lvl, prev);
            }
            prev = lvl;
        }
    }

    #[test]
    fn test_progress_mid_level() {
        let p = progress_to_next(2350);
        assert_eq!(p.level, 2);
        assert_eq!(p.into_level, 350);
        assert_eq!(p.needed, XP_PER_LEVEL);
        assert_eq!(p.remaining(), 650);
        assert_eq!(p.percent(), 35);
        assert!(!p.is_maxed());
    }

    #[test]
    fn test_progress_percent_rounds_down() {
        assert_eq!(progress_to_next(999).percent(), 99);
        assert_eq!(progress_to_next(0).percent(), 0);
    }

    #[test]
    fn test_progress_at_max_is_saturated() {
        let p = progress_to_next(MAX_XP);
        assert_eq!(
            p,
            Progress {
                level: MAX_LEVEL,
                into_level: XP_PER_LEVEL,
                needed: XP_PER_LEVEL,
            }
        );
        assert!(p.is_maxed());
    }

    #[test]
    fn test_gain_crosses_level() {
        let change = apply_gain(999, 1);
        assert_eq!(change.new_xp, 1000);
        assert!(change.leveled_up());

        let change = apply_gain(1000, 1);
        assert_eq!(change.new_xp, 1001);
        assert!(!change.leveled_up());
    }

    #[test]
    fn test_gain_saturates() {
        let change = apply_gain(MAX_XP - 50, XP_PER_MESSAGE);
        assert_eq!(change.new_xp, MAX_XP);
        assert_eq!(change.new_level, MAX_LEVEL);

        let change = apply_gain(MAX_XP, i64::MAX);
        assert_eq!(change.new_xp, MAX_XP);
        assert!(!change.leveled_up());
    }

    #[test]
    fn test_gain_can_skip_levels() {
        let change = apply_gain(500, 5000);
        assert_eq!(change.old_level, 0);
        assert_eq!(change.new_level, 5);
        assert!(change.leveled_up());
    }
}
