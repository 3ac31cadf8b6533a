use serde::{Deserialize, Serialize};

use crate::{ActivityEvent, ActivityType, PointConfig};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    #[error("no base points configured for activity type {0}")]
    UnknownActivityType(ActivityType),
}

/// Every intermediate value of a calculation, persisted alongside the
/// points-history entry for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsBreakdown {
    pub base_points: u32,
    pub ai_modifier_applied: Option<f64>,
    pub ai_adjusted: f64,
    pub size_adjusted: f64,
    pub complexity_adjusted: f64,
    pub final_points: u32,
}

/// Pure activity-to-points calculation. The step order is part of the
/// contract: base, ai, size, complexity, round, clamp. Rounding is
/// half-up to match the historical point-audit expectations.
pub fn calculate(event: &ActivityEvent, config: &PointConfig) -> Result<PointsBreakdown, CalcError> {
    let base = *config
        .base_points
        .get(&event.activity_type)
        .ok_or(CalcError::UnknownActivityType(event.activity_type))?;

    let (ai_adjusted, ai_modifier_applied) = if event.is_ai_generated {
        (f64::from(base) * config.ai_modifier, Some(config.ai_modifier))
    } else {
        (f64::from(base), None)
    };
    let size_adjusted = ai_adjusted * config.size_curve.multiplier(event.size);
    let complexity_adjusted = size_adjusted * config.complexity_curve.multiplier(event.complexity);

    let rounded = round_half_up(complexity_adjusted);
    let final_points = rounded.clamp(
        config.min_points_per_activity,
        config.max_points_per_activity,
    );

    Ok(PointsBreakdown {
        base_points: base,
        ai_modifier_applied,
        ai_adjusted,
        size_adjusted,
        complexity_adjusted,
        final_points,
    })
}

fn round_half_up(value: f64) -> u32 {
    (value + 0.5).floor().max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn event(activity_type: ActivityType, ai: bool, size: u32, complexity: u32) -> ActivityEvent {
        ActivityEvent {
            id: Uuid::new_v4(),
            team_member_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            organization_id: None,
            activity_type,
            is_ai_generated: ai,
            size,
            complexity,
            occurred_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn ai_check_in_rounds_half_up() {
        // 10 * 0.75 = 7.5, half-up to 8
        let config = PointConfig::default();
        let breakdown = calculate(&event(ActivityType::CheckIn, true, 0, 0), &config).unwrap();
        assert_eq!(breakdown.base_points, 10);
        assert_eq!(breakdown.ai_modifier_applied, Some(0.75));
        assert_eq!(breakdown.final_points, 8);
    }

    #[test]
    fn standard_activity_skips_ai_modifier() {
        let config = PointConfig::default();
        let breakdown = calculate(&event(ActivityType::CheckIn, false, 0, 0), &config).unwrap();
        assert_eq!(breakdown.ai_modifier_applied, None);
        assert_eq!(breakdown.final_points, 10);
    }

    #[test]
    fn size_and_complexity_are_capped() {
        let config = PointConfig::default();
        let capped = calculate(
            &event(ActivityType::PullRequest, false, u32::MAX, u32::MAX),
            &config,
        )
        .unwrap();
        let at_cap = calculate(
            &event(
                ActivityType::PullRequest,
                false,
                config.size_curve.cap,
                config.complexity_curve.cap,
            ),
            &config,
        )
        .unwrap();
        assert_eq!(capped.final_points, at_cap.final_points);
    }

    #[test]
    fn final_points_never_leave_configured_bounds() {
        let config = PointConfig::default();
        for ai in [false, true] {
            for size in [0, 1, 500, 10_000, u32::MAX] {
                for complexity in [0, 50, 100, u32::MAX] {
                    let breakdown = calculate(
                        &event(ActivityType::StoryClosure, ai, size, complexity),
                        &config,
                    )
                    .unwrap();
                    assert!(breakdown.final_points >= config.min_points_per_activity);
                    assert!(breakdown.final_points <= config.max_points_per_activity);
                }
            }
        }
    }

    #[test]
    fn missing_base_points_is_an_error() {
        let mut config = PointConfig::default();
        config.base_points.remove(&ActivityType::Review);
        let err = calculate(&event(ActivityType::Review, false, 0, 0), &config).unwrap_err();
        assert_eq!(err, CalcError::UnknownActivityType(ActivityType::Review));
    }

    #[test]
    fn determinism() {
        let config = PointConfig::default();
        let e = event(ActivityType::BugFix, true, 321, 17);
        let a = calculate(&e, &config).unwrap();
        let b = calculate(&e, &config).unwrap();
        assert_eq!(a, b);
    }
}
