//! Score models
//!
//! Two Poisson models of team-perspective scores:
//! - GLM: every factor fixed, treatment coded
//! - GLMM: `field` fixed; offense, defense and game as random intercepts
//!
//! The scoring team's factor is stored as `offense` and the conceding
//! team's as `defense`.

pub mod design;
pub mod glm;
pub mod glmm;
pub mod linalg;

pub use design::{FactorLevels, ModelFrame, DEFENSE, OFFENSE};
pub use glm::GlmFit;
pub use glmm::GlmmFit;

use crate::{FactorEstimate, Field, ModelConfig, Observation, ParameterLevel, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which model to fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Glm,
    #[default]
    Glmm,
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "glm" => Ok(ModelKind::Glm),
            "glmm" => Ok(ModelKind::Glmm),
            _ => Err(format!("Unknown model kind: {}. Use glm or glmm.", s)),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Glm => write!(f, "glm"),
            ModelKind::Glmm => write!(f, "glmm"),
        }
    }
}

/// A fitted model of either kind
#[derive(Debug, Clone)]
pub enum FittedModel {
    Glm {
        fit: GlmFit,
        levels: Vec<ParameterLevel>,
    },
    Glmm {
        fit: GlmmFit,
        levels: Vec<ParameterLevel>,
    },
}

/// Build the model frame and fit the configured model
pub fn fit(observations: &[Observation], config: &ModelConfig) -> Result<FittedModel> {
    let frame = ModelFrame::build(observations, config.include_game_effect)?;
    fit_frame(&frame, config)
}

/// Fit the configured model to an already built frame
pub fn fit_frame(frame: &ModelFrame, config: &ModelConfig) -> Result<FittedModel> {
    let levels = frame.parameter_levels(config.kind);

    match config.kind {
        ModelKind::Glm => Ok(FittedModel::Glm {
            fit: glm::fit(frame, config)?,
            levels,
        }),
        ModelKind::Glmm => Ok(FittedModel::Glmm {
            fit: glmm::fit(frame, config)?,
            levels,
        }),
    }
}

impl FittedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            FittedModel::Glm { .. } => ModelKind::Glm,
            FittedModel::Glmm { .. } => ModelKind::Glmm,
        }
    }

    pub fn factor_estimates(&self) -> Vec<FactorEstimate> {
        match self {
            FittedModel::Glm { fit, .. } => fit.factor_estimates(),
            FittedModel::Glmm { fit, .. } => fit.factor_estimates(),
        }
    }

    pub fn parameter_levels(&self) -> &[ParameterLevel] {
        match self {
            FittedModel::Glm { levels, .. } | FittedModel::Glmm { levels, .. } => levels,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            FittedModel::Glm { fit, .. } => fit.summary(),
            FittedModel::Glmm { fit, .. } => fit.summary(),
        }
    }

    pub fn team_ratings(&self) -> Vec<TeamRating> {
        team_ratings_with_levels(&self.factor_estimates(), self.parameter_levels())
    }

    pub fn converged(&self) -> bool {
        match self {
            FittedModel::Glm { fit, .. } => fit.converged,
            FittedModel::Glmm { fit, .. } => fit.converged,
        }
    }

    pub fn intercept(&self) -> f64 {
        match self {
            FittedModel::Glm { fit, .. } => fit.intercept(),
            FittedModel::Glmm { fit, .. } => fit.intercept(),
        }
    }

    /// Effect of a factor level; reference and unseen levels are zero
    pub fn effect(&self, factor: &str, level: &str) -> f64 {
        match self {
            FittedModel::Glm { fit, .. } => fit.effect(factor, level),
            FittedModel::Glmm { fit, .. } => fit.effect(factor, level),
        }
    }

    /// Expected score of `team` against `opponent` for a new game.
    /// Unknown teams contribute nothing.
    pub fn expected_score(&self, team: &str, opponent: &str, field: Field) -> f64 {
        let eta = self.intercept()
            + self.effect("field", field.as_str())
            + self.effect(OFFENSE, team)
            + self.effect(DEFENSE, opponent);
        eta.exp()
    }
}

/// Attack and defence of one team on the log-score scale
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamRating {
    pub team: String,
    /// Effect on the team's own score
    pub attack: f64,
    /// Effect on the opponent's score; lower is better
    pub defence: f64,
    pub net: f64,
}

/// Strip treatment-coding decoration from a level name
fn level_label<'a>(factor: &str, level: &'a str) -> &'a str {
    let prefix = format!("C({})[T.", factor);
    level
        .strip_prefix(prefix.as_str())
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(level)
}

/// Ratings from stored offense and defense estimates, best net first.
/// Teams missing from one factor (a GLM reference level) count as zero there.
pub fn team_ratings(estimates: &[FactorEstimate]) -> Vec<TeamRating> {
    team_ratings_with_levels(estimates, &[])
}

/// As [`team_ratings`], also rating every `offense` level in `levels`
pub fn team_ratings_with_levels(
    estimates: &[FactorEstimate],
    levels: &[ParameterLevel],
) -> Vec<TeamRating> {
    let mut by_team: BTreeMap<String, (f64, f64)> = levels
        .iter()
        .filter(|p| p.parameter == OFFENSE)
        .map(|p| (p.level.clone(), (0.0, 0.0)))
        .collect();

    for est in estimates {
        let entry = match est.factor.as_str() {
            OFFENSE | DEFENSE => by_team
                .entry(level_label(&est.factor, &est.level).to_string())
                .or_insert((0.0, 0.0)),
            _ => continue,
        };
        if est.factor == OFFENSE {
            entry.0 = est.estimate;
        } else {
            entry.1 = est.estimate;
        }
    }

    let mut ratings: Vec<TeamRating> = by_team
        .into_iter()
        .map(|(team, (attack, defence))| TeamRating {
            team,
            attack,
            defence,
            net: attack - defence,
        })
        .collect();
    ratings.sort_by(|a, b| b.net.total_cmp(&a.net));
    ratings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EffectKind;
    use approx::assert_relative_eq;

    fn estimate(factor: &str, level: &str, value: f64) -> FactorEstimate {
        FactorEstimate {
            factor: factor.to_string(),
            kind: EffectKind::Random,
            level: level.to_string(),
            estimate: value,
        }
    }

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!("GLM".parse::<ModelKind>().unwrap(), ModelKind::Glm);
        assert_eq!("glmm".parse::<ModelKind>().unwrap(), ModelKind::Glmm);
        assert!("lmer".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::default().to_string(), "glmm");
    }

    #[test]
    fn test_team_ratings_sorted_by_net() {
        let estimates = vec![
            estimate("Intercept", "Intercept", 3.0),
            estimate("offense", "Storm", 0.3),
            estimate("defense", "Storm", -0.2),
            estimate("offense", "Eels", -0.1),
            estimate("defense", "Eels", 0.1),
            estimate("offense", "Panthers", 0.2),
            estimate("defense", "Panthers", -0.4),
        ];
        let ratings = team_ratings(&estimates);

        assert_eq!(ratings.len(), 3);
        assert_eq!(ratings[0].team, "Panthers");
        assert_relative_eq!(ratings[0].net, 0.6);
        assert_eq!(ratings[2].team, "Eels");
        assert_relative_eq!(ratings[2].defence, 0.1);
    }

    #[test]
    fn test_team_ratings_from_treatment_names() {
        let estimates = vec![
            estimate("offense", "C(offense)[T.Storm]", 0.25),
            estimate("defense", "C(defense)[T.Storm]", -0.05),
        ];
        let ratings = team_ratings(&estimates);
        assert_eq!(ratings[0].team, "Storm");
        assert_relative_eq!(ratings[0].net, 0.3);
    }

    #[test]
    fn test_fit_and_predict_both_kinds() {
        let mut data = Vec::new();
        let teams = ["Broncos", "Cowboys", "Dragons"];
        let strength = [0.3, 0.0, -0.3];
        let mut game = 0;
        for (i, t) in teams.iter().enumerate() {
            for (j, o) in teams.iter().enumerate() {
                if i == j {
                    continue;
                }
                game += 1;
                for (team, opponent, field, s) in [
                    (t, o, Field::OffenseHome, strength[i]),
                    (o, t, Field::DefenseHome, strength[j]),
                ] {
                    data.push(Observation {
                        game_id: format!("g{}", game),
                        year: 2025,
                        field,
                        team: team.to_string(),
                        opponent: opponent.to_string(),
                        score: (3.0_f64 + s).exp().round(),
                        weight: 1.0,
                    });
                }
            }
        }

        for kind in [ModelKind::Glm, ModelKind::Glmm] {
            let config = ModelConfig {
                kind,
                include_game_effect: false,
                ..ModelConfig::default()
            };
            let model = fit(&data, &config).unwrap();
            assert_eq!(model.kind(), kind);
            assert!(!model.factor_estimates().is_empty());
            assert!(model.summary().contains("Formula"));

            let strong = model.expected_score("Broncos", "Dragons", Field::Neutral);
            let weak = model.expected_score("Dragons", "Broncos", Field::Neutral);
            assert!(strong > weak);

            let ratings = model.team_ratings();
            assert_eq!(ratings.len(), 3);
            assert_eq!(ratings.first().map(|r| r.team.as_str()), Some("Broncos"));
        }
    }

    #[test]
    fn test_expected_score_from_shared_effects() {
        let data = vec![
            Observation {
                game_id: "g1".to_string(),
                year: 2025,
                field: Field::OffenseHome,
                team: "Storm".to_string(),
                opponent: "Eels".to_string(),
                score: 30.0,
                weight: 1.0,
            },
            Observation {
                game_id: "g1".to_string(),
                year: 2025,
                field: Field::DefenseHome,
                team: "Eels".to_string(),
                opponent: "Storm".to_string(),
                score: 12.0,
                weight: 1.0,
            },
            Observation {
                game_id: "g2".to_string(),
                year: 2025,
                field: Field::OffenseHome,
                team: "Eels".to_string(),
                opponent: "Storm".to_string(),
                score: 18.0,
                weight: 1.0,
            },
            Observation {
                game_id: "g2".to_string(),
                year: 2025,
                field: Field::DefenseHome,
                team: "Storm".to_string(),
                opponent: "Eels".to_string(),
                score: 20.0,
                weight: 1.0,
            },
        ];

        for kind in [ModelKind::Glm, ModelKind::Glmm] {
            let config = ModelConfig {
                kind,
                include_game_effect: false,
                ..ModelConfig::default()
            };
            let model = fit(&data, &config).unwrap();
            let eta = model.intercept()
                + model.effect("field", "offense_home")
                + model.effect(OFFENSE, "Storm")
                + model.effect(DEFENSE, "Eels");
            assert_relative_eq!(
                model.expected_score("Storm", "Eels", Field::OffenseHome),
                eta.exp(),
                max_relative = 1e-12
            );
            assert_eq!(model.effect(OFFENSE, "Nobody"), 0.0);
            assert!(model
                .parameter_levels()
                .iter()
                .all(|p| p.parameter != "team" && p.parameter != "opponent"));
        }
    }
}
