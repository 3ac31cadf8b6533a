use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ActivityType, IntoEnumIterator, TenantId};

/// Historical business constants carried over from the original rules.
pub const DEFAULT_AI_MODIFIER: f64 = 0.75;
pub const DEFAULT_SIZE_CAP: u32 = 10_000;
pub const DEFAULT_SIZE_DIVISOR: u32 = 3333;
pub const DEFAULT_COMPLEXITY_CAP: u32 = 100;
pub const DEFAULT_COMPLEXITY_DIVISOR: u32 = 50;
pub const DEFAULT_MIN_POINTS: u32 = 1;
pub const DEFAULT_MAX_POINTS: u32 = 100;

/// Scope a configuration patch is attached to. Company is the tenant
/// itself; organizations are subdivisions inside a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigScope {
    Company(TenantId),
    Organization(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub cap: u32,
    pub divisor: u32,
}

impl Curve {
    /// `1 + min(value, cap) / divisor`, the multiplier shape used for
    /// both size and complexity.
    pub fn multiplier(&self, value: u32) -> f64 {
        1.0 + f64::from(value.min(self.cap)) / f64::from(self.divisor)
    }
}

/// Fully merged, validated point configuration. Snapshot semantics: a
/// calculation always works against one immutable instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointConfig {
    pub base_points: HashMap<ActivityType, u32>,
    pub ai_modifier: f64,
    pub size_curve: Curve,
    pub complexity_curve: Curve,
    pub min_points_per_activity: u32,
    pub max_points_per_activity: u32,
}

impl Default for PointConfig {
    fn default() -> Self {
        let base_points = [
            (ActivityType::CheckIn, 10),
            (ActivityType::PullRequest, 25),
            (ActivityType::Review, 15),
            (ActivityType::BugFix, 20),
            (ActivityType::StoryClosure, 30),
        ]
        .into_iter()
        .collect();
        Self {
            base_points,
            ai_modifier: DEFAULT_AI_MODIFIER,
            size_curve: Curve {
                cap: DEFAULT_SIZE_CAP,
                divisor: DEFAULT_SIZE_DIVISOR,
            },
            complexity_curve: Curve {
                cap: DEFAULT_COMPLEXITY_CAP,
                divisor: DEFAULT_COMPLEXITY_DIVISOR,
            },
            min_points_per_activity: DEFAULT_MIN_POINTS,
            max_points_per_activity: DEFAULT_MAX_POINTS,
        }
    }
}

/// Sparse overlay stored per scope. Only the fields present override the
/// less specific scope; everything else is inherited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointConfigPatch {
    #[serde(default)]
    pub base_points: HashMap<ActivityType, u32>,
    #[serde(default)]
    pub ai_modifier: Option<f64>,
    #[serde(default)]
    pub size_curve: Option<Curve>,
    #[serde(default)]
    pub complexity_curve: Option<Curve>,
    #[serde(default)]
    pub min_points_per_activity: Option<u32>,
    #[serde(default)]
    pub max_points_per_activity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{activity} base points {value} outside [{min}, {max}]")]
    PointsOutOfBounds {
        activity: ActivityType,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("ai modifier {0} outside [0, 1]")]
    AiModifierOutOfBounds(f64),
    #[error("curve divisor must be positive")]
    ZeroDivisor,
    #[error("floor {min} exceeds ceiling {max}")]
    InvertedBounds { min: u32, max: u32 },
}

/// Merges company- and organization-level overrides onto the system
/// defaults, most specific last so it wins field by field.
pub fn resolve_config(
    company: Option<&PointConfigPatch>,
    organization: Option<&PointConfigPatch>,
) -> Result<PointConfig, ConfigError> {
    let mut config = PointConfig::default();
    if let Some(patch) = company {
        apply_patch(&mut config, patch);
    }
    if let Some(patch) = organization {
        apply_patch(&mut config, patch);
    }
    validate_config(&config)?;
    Ok(config)
}

fn apply_patch(config: &mut PointConfig, patch: &PointConfigPatch) {
    for (activity, points) in &patch.base_points {
        config.base_points.insert(*activity, *points);
    }
    if let Some(modifier) = patch.ai_modifier {
        config.ai_modifier = modifier;
    }
    if let Some(curve) = patch.size_curve {
        config.size_curve = curve;
    }
    if let Some(curve) = patch.complexity_curve {
        config.complexity_curve = curve;
    }
    if let Some(min) = patch.min_points_per_activity {
        config.min_points_per_activity = min;
    }
    if let Some(max) = patch.max_points_per_activity {
        config.max_points_per_activity = max;
    }
}

fn validate_config(config: &PointConfig) -> Result<(), ConfigError> {
    if config.min_points_per_activity > config.max_points_per_activity {
        return Err(ConfigError::InvertedBounds {
            min: config.min_points_per_activity,
            max: config.max_points_per_activity,
        });
    }
    if !(0.0..=1.0).contains(&config.ai_modifier) {
        return Err(ConfigError::AiModifierOutOfBounds(config.ai_modifier));
    }
    if config.size_curve.divisor == 0 || config.complexity_curve.divisor == 0 {
        return Err(ConfigError::ZeroDivisor);
    }
    for activity in ActivityType::iter() {
        let value = config.base_points.get(&activity).copied().unwrap_or(0);
        if value < config.min_points_per_activity || value > config.max_points_per_activity {
            return Err(ConfigError::PointsOutOfBounds {
                activity,
                value,
                min: config.min_points_per_activity,
                max: config.max_points_per_activity,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org_patch() -> PointConfigPatch {
        PointConfigPatch {
            base_points: [(ActivityType::PullRequest, 30)].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn field_wise_merge_keeps_inherited_values() {
        let company = PointConfigPatch {
            base_points: [(ActivityType::PullRequest, 25), (ActivityType::BugFix, 20)]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let config = resolve_config(Some(&company), Some(&org_patch())).unwrap();
        assert_eq!(config.base_points[&ActivityType::PullRequest], 30);
        assert_eq!(config.base_points[&ActivityType::BugFix], 20);
        // Untouched fields fall through to the system defaults
        assert_eq!(config.ai_modifier, DEFAULT_AI_MODIFIER);
        assert_eq!(config.base_points[&ActivityType::CheckIn], 10);
    }

    #[test]
    fn no_patches_yields_system_default() {
        let config = resolve_config(None, None).unwrap();
        assert_eq!(config, PointConfig::default());
    }

    #[test]
    fn out_of_bounds_points_are_rejected_whole() {
        let bad = PointConfigPatch {
            base_points: [(ActivityType::Review, 5000)].into_iter().collect(),
            ..Default::default()
        };
        let err = resolve_config(None, Some(&bad)).unwrap_err();
        assert!(matches!(err, ConfigError::PointsOutOfBounds { .. }));
    }

    #[test]
    fn ai_modifier_must_stay_in_unit_interval() {
        let bad = PointConfigPatch {
            ai_modifier: Some(1.5),
            ..Default::default()
        };
        assert_eq!(
            resolve_config(Some(&bad), None),
            Err(ConfigError::AiModifierOutOfBounds(1.5))
        );
    }

    #[test]
    fn organization_override_beats_company() {
        let company = PointConfigPatch {
            ai_modifier: Some(0.5),
            ..Default::default()
        };
        let org = PointConfigPatch {
            ai_modifier: Some(0.9),
            ..Default::default()
        };
        let config = resolve_config(Some(&company), Some(&org)).unwrap();
        assert_eq!(config.ai_modifier, 0.9);
    }
}
