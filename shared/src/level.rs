use serde::{Deserialize, Serialize};

/// Ordered level -> minimum cumulative points table. Strictly increasing
/// by level; read-only at calculation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelThresholds {
    thresholds: Vec<(u32, i64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LevelTableError {
    #[error("level table must not be empty")]
    Empty,
    #[error("thresholds must be strictly increasing by level")]
    NotIncreasing,
}

impl LevelThresholds {
    pub fn new(thresholds: Vec<(u32, i64)>) -> Result<Self, LevelTableError> {
        if thresholds.is_empty() {
            return Err(LevelTableError::Empty);
        }
        let increasing = thresholds
            .windows(2)
            .all(|pair| pair[0].0 < pair[1].0 && pair[0].1 < pair[1].1);
        if !increasing {
            return Err(LevelTableError::NotIncreasing);
        }
        Ok(Self { thresholds })
    }

    /// Highest level whose threshold the total has reached.
    pub fn level_for(&self, total_points: i64) -> u32 {
        self.thresholds
            .iter()
            .take_while(|(_, min)| *min <= total_points)
            .last()
            .map(|(level, _)| *level)
            .unwrap_or(1)
    }

    /// Minimum points for the level after `level`, if any.
    pub fn next_threshold(&self, level: u32) -> Option<i64> {
        self.thresholds
            .iter()
            .find(|(l, _)| *l > level)
            .map(|(_, min)| *min)
    }

    /// Progress through the current level band, 0-100.
    pub fn progress_percent(&self, total_points: i64) -> u8 {
        let level = self.level_for(total_points);
        let current = self
            .thresholds
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, min)| *min)
            .unwrap_or(0);
        match self.next_threshold(level) {
            Some(next) if next > current => {
                let span = (next - current) as f64;
                let done = (total_points - current).max(0) as f64;
                ((done / span) * 100.0).min(100.0) as u8
            }
            _ => 100,
        }
    }
}

impl Default for LevelThresholds {
    /// Twenty levels, 250 points apart.
    fn default() -> Self {
        let thresholds = (1..=20)
            .map(|level| (level, i64::from(level - 1) * 250))
            .collect();
        Self { thresholds }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_valid() {
        let table = LevelThresholds::default();
        LevelThresholds::new(table.thresholds.clone()).unwrap();
    }

    #[test]
    fn level_thirteen_starts_at_three_thousand() {
        let table = LevelThresholds::default();
        assert_eq!(table.level_for(2_980), 12);
        assert_eq!(table.level_for(3_000), 13);
        assert_eq!(table.level_for(3_005), 13);
    }

    #[test]
    fn zero_points_is_level_one() {
        let table = LevelThresholds::default();
        assert_eq!(table.level_for(0), 1);
        assert_eq!(table.next_threshold(1), Some(250));
    }

    #[test]
    fn top_level_has_no_next_threshold() {
        let table = LevelThresholds::default();
        assert_eq!(table.next_threshold(20), None);
        assert_eq!(table.progress_percent(1_000_000), 100);
    }

    #[test]
    fn progress_is_relative_to_the_current_band() {
        let table = LevelThresholds::default();
        // 125 into the 0..250 band
        assert_eq!(table.progress_percent(125), 50);
    }

    #[test]
    fn non_increasing_tables_are_rejected() {
        assert_eq!(
            LevelThresholds::new(vec![(1, 0), (2, 0)]),
            Err(LevelTableError::NotIncreasing)
        );
        assert_eq!(LevelThresholds::new(vec![]), Err(LevelTableError::Empty));
    }
}
