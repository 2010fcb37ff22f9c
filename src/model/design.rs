//! Model frame and sparse indicator design

use super::ModelKind;
use crate::{EffectKind, Observation, ParameterLevel, Result, SosError};
use std::collections::HashMap;

/// Reference level of the `field` factor
pub const FIELD_REFERENCE: &str = "none";

/// Stored name of the scoring-team factor
pub const OFFENSE: &str = "offense";

/// Stored name of the conceding-team factor
pub const DEFENSE: &str = "defense";

/// Sorted unique levels of a categorical column
#[derive(Debug, Clone, PartialEq)]
pub struct FactorLevels {
    pub name: String,
    levels: Vec<String>,
    index: HashMap<String, usize>,
}

impl FactorLevels {
    pub fn from_values<'a, I>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut levels: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
        levels.sort();
        levels.dedup();
        Self::from_sorted(name, levels)
    }

    fn from_sorted(name: &str, levels: Vec<String>) -> Self {
        let index = levels
            .iter()
            .enumerate()
            .map(|(i, level)| (level.clone(), i))
            .collect();
        FactorLevels {
            name: name.to_string(),
            levels,
            index,
        }
    }

    /// Move `reference` to the front if it is one of the levels
    pub fn with_reference(self, reference: &str) -> Self {
        match self.index.get(reference) {
            Some(&pos) if pos > 0 => {
                let mut levels = self.levels;
                let level = levels.remove(pos);
                levels.insert(0, level);
                Self::from_sorted(&self.name, levels)
            }
            _ => self,
        }
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn index_of(&self, level: &str) -> Option<usize> {
        self.index.get(level).copied()
    }

    /// Level used as the baseline under treatment coding
    pub fn reference(&self) -> Option<&str> {
        self.levels.first().map(|s| s.as_str())
    }
}

/// A categorical column: its levels and the level code of each row
#[derive(Debug, Clone)]
pub struct Factor {
    pub levels: FactorLevels,
    pub codes: Vec<usize>,
}

impl Factor {
    fn build(name: &str, values: &[&str], reference: Option<&str>) -> Self {
        let mut levels = FactorLevels::from_values(name, values.iter().copied());
        if let Some(reference) = reference {
            levels = levels.with_reference(reference);
        }
        let codes = values
            .iter()
            .map(|v| levels.index_of(v).unwrap_or(0))
            .collect();
        Factor { levels, codes }
    }
}

/// Response, weights and factor codes for a fit
#[derive(Debug, Clone)]
pub struct ModelFrame {
    pub response: Vec<f64>,
    pub weights: Vec<f64>,
    pub field: Factor,
    pub team: Factor,
    pub opponent: Factor,
    pub game: Option<Factor>,
    /// Rows removed before fitting
    pub dropped: usize,
}

impl ModelFrame {
    pub fn build(observations: &[Observation], include_game_effect: bool) -> Result<Self> {
        let mut kept: Vec<&Observation> = Vec::with_capacity(observations.len());
        let mut non_positive = 0;
        let mut non_finite = 0;

        for obs in observations {
            if !obs.score.is_finite() || !obs.weight.is_finite() || obs.score < 0.0 {
                non_finite += 1;
            } else if obs.weight <= 0.0 {
                non_positive += 1;
            } else {
                kept.push(obs);
            }
        }

        if non_positive > 0 {
            log::warn!(
                "Dropping {} observations with non-positive weight (check reference_year)",
                non_positive
            );
        }
        if non_finite > 0 {
            log::warn!("Dropping {} observations with invalid score or weight", non_finite);
        }
        if kept.is_empty() {
            return Err(SosError::NoData(format!(
                "no usable observations out of {}",
                observations.len()
            )));
        }

        let fields: Vec<&str> = kept.iter().map(|o| o.field.as_str()).collect();
        let teams: Vec<&str> = kept.iter().map(|o| o.team.as_str()).collect();
        let opponents: Vec<&str> = kept.iter().map(|o| o.opponent.as_str()).collect();

        let game = if include_game_effect {
            let games: Vec<&str> = kept.iter().map(|o| o.game_id.as_str()).collect();
            Some(Factor::build("game_id", &games, None))
        } else {
            None
        };

        Ok(ModelFrame {
            response: kept.iter().map(|o| o.score).collect(),
            weights: kept.iter().map(|o| o.weight).collect(),
            field: Factor::build("field", &fields, Some(FIELD_REFERENCE)),
            team: Factor::build(OFFENSE, &teams, None),
            opponent: Factor::build(DEFENSE, &opponents, None),
            game,
            dropped: non_positive + non_finite,
        })
    }

    pub fn n_obs(&self) -> usize {
        self.response.len()
    }

    /// Factors other than `field`, in model order
    pub fn grouping_factors(&self) -> Vec<&Factor> {
        let mut factors = vec![&self.team, &self.opponent];
        if let Some(game) = &self.game {
            factors.push(game);
        }
        factors
    }

    /// Every factor level and whether it enters the model as fixed or random,
    /// sorted by parameter then level
    pub fn parameter_levels(&self, kind: ModelKind) -> Vec<ParameterLevel> {
        let grouping_kind = match kind {
            ModelKind::Glm => EffectKind::Fixed,
            ModelKind::Glmm => EffectKind::Random,
        };

        let mut out: Vec<ParameterLevel> = self
            .field
            .levels
            .levels()
            .iter()
            .map(|level| ParameterLevel {
                parameter: "field".to_string(),
                kind: EffectKind::Fixed,
                level: level.clone(),
            })
            .collect();

        for factor in self.grouping_factors() {
            out.extend(factor.levels.levels().iter().map(|level| ParameterLevel {
                parameter: factor.levels.name.clone(),
                kind: grouping_kind,
                level: level.clone(),
            }));
        }
        out.sort_by(|a, b| (&a.parameter, &a.level).cmp(&(&b.parameter, &b.level)));
        out
    }
}

/// Column group within a design
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub factor: String,
    pub start: usize,
    pub levels: Vec<String>,
    pub random: bool,
}

impl Block {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.levels.len()
    }
}

/// Indicator design: every entry is 0 or 1, stored as the active columns of each row
#[derive(Debug, Clone)]
pub struct Design {
    pub n_cols: usize,
    pub rows: Vec<Vec<usize>>,
    /// Blocks after the intercept column
    pub blocks: Vec<Block>,
}

impl Design {
    /// Intercept plus treatment-coded columns for every factor
    pub fn treatment(frame: &ModelFrame) -> Self {
        let mut factors = vec![&frame.field];
        factors.extend(frame.grouping_factors());
        let mut builder = DesignBuilder::new(frame.n_obs());
        for factor in factors {
            builder.add(factor, true, false);
        }
        builder.finish()
    }

    /// Treatment-coded `field` plus full indicator blocks for each grouping factor
    pub fn mixed(frame: &ModelFrame) -> Self {
        let mut builder = DesignBuilder::new(frame.n_obs());
        builder.add(&frame.field, true, false);
        for factor in frame.grouping_factors() {
            builder.add(factor, false, true);
        }
        builder.finish()
    }

    pub fn linear_predictor(&self, beta: &[f64]) -> Vec<f64> {
        self.rows
            .iter()
            .map(|cols| cols.iter().map(|&c| beta[c]).sum())
            .collect()
    }
}

struct DesignBuilder {
    n_cols: usize,
    rows: Vec<Vec<usize>>,
    blocks: Vec<Block>,
}

impl DesignBuilder {
    fn new(n_obs: usize) -> Self {
        DesignBuilder {
            n_cols: 1,
            rows: vec![vec![0]; n_obs],
            blocks: Vec::new(),
        }
    }

    fn add(&mut self, factor: &Factor, drop_reference: bool, random: bool) {
        let skip = usize::from(drop_reference);
        let levels: Vec<String> = factor.levels.levels().iter().skip(skip).cloned().collect();
        let start = self.n_cols;

        for (row, &code) in self.rows.iter_mut().zip(&factor.codes) {
            if code >= skip {
                row.push(start + code - skip);
            }
        }

        self.n_cols += levels.len();
        self.blocks.push(Block {
            factor: factor.levels.name.clone(),
            start,
            levels,
            random,
        });
    }

    fn finish(self) -> Design {
        Design {
            n_cols: self.n_cols,
            rows: self.rows,
            blocks: self.blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Field;

    fn obs(game: &str, team: &str, opponent: &str, field: Field, score: f64, weight: f64) -> Observation {
        Observation {
            game_id: game.to_string(),
            year: 2025,
            field,
            team: team.to_string(),
            opponent: opponent.to_string(),
            score,
            weight,
        }
    }

    fn sample() -> Vec<Observation> {
        vec![
            obs("g1", "Storm", "Broncos", Field::OffenseHome, 24.0, 2.0),
            obs("g1", "Broncos", "Storm", Field::DefenseHome, 12.0, 2.0),
            obs("g2", "Raiders", "Storm", Field::Neutral, 18.0, 1.0),
            obs("g2", "Storm", "Raiders", Field::Neutral, 20.0, 1.0),
        ]
    }

    #[test]
    fn test_levels_sorted_with_reference_first() {
        let levels = FactorLevels::from_values("field", ["offense_home", "none", "defense_home", "none"])
            .with_reference(FIELD_REFERENCE);
        assert_eq!(levels.levels(), &["none", "defense_home", "offense_home"]);
        assert_eq!(levels.index_of("offense_home"), Some(2));
        assert_eq!(levels.reference(), Some("none"));
    }

    #[test]
    fn test_frame_drops_non_positive_weights() {
        let mut data = sample();
        data.push(obs("g3", "Storm", "Eels", Field::Neutral, 30.0, 0.0));
        data.push(obs("g3", "Eels", "Storm", Field::Neutral, f64::NAN, 1.0));

        let frame = ModelFrame::build(&data, true).unwrap();
        assert_eq!(frame.n_obs(), 4);
        assert_eq!(frame.dropped, 2);
        assert_eq!(frame.team.levels.levels(), &["Broncos", "Raiders", "Storm"]);
        assert_eq!(frame.game.as_ref().map(|g| g.levels.len()), Some(2));
    }

    #[test]
    fn test_frame_with_nothing_left_is_an_error() {
        let data = vec![obs("g1", "Storm", "Broncos", Field::Neutral, 10.0, -1.0)];
        assert!(matches!(
            ModelFrame::build(&data, false),
            Err(SosError::NoData(_))
        ));
    }

    #[test]
    fn test_parameter_levels_by_kind() {
        let frame = ModelFrame::build(&sample(), false).unwrap();

        let mixed = frame.parameter_levels(ModelKind::Glmm);
        assert_eq!(mixed.len(), 3 + 3 + 3);
        assert!(mixed
            .iter()
            .filter(|p| p.parameter == "field")
            .all(|p| p.kind == EffectKind::Fixed));
        assert!(mixed
            .iter()
            .filter(|p| p.parameter == OFFENSE)
            .all(|p| p.kind == EffectKind::Random));

        let fixed = frame.parameter_levels(ModelKind::Glm);
        assert!(fixed.iter().all(|p| p.kind == EffectKind::Fixed));
    }

    #[test]
    fn test_parameter_levels_use_offense_defense_and_sort() {
        let frame = ModelFrame::build(&sample(), true).unwrap();
        let levels = frame.parameter_levels(ModelKind::Glmm);

        let keys: Vec<(&str, &str)> = levels
            .iter()
            .map(|p| (p.parameter.as_str(), p.level.as_str()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        assert_eq!(levels[0].parameter, DEFENSE);
        assert!(levels.iter().any(|p| p.parameter == OFFENSE));
        assert!(!levels.iter().any(|p| p.parameter == "team" || p.parameter == "opponent"));
    }

    #[test]
    fn test_design_layouts() {
        let frame = ModelFrame::build(&sample(), true).unwrap();

        let treatment = Design::treatment(&frame);
        // intercept + field(2) + team(2) + opponent(2) + game(1)
        assert_eq!(treatment.n_cols, 8);
        assert_eq!(treatment.blocks[0].levels, vec!["defense_home", "offense_home"]);

        let mixed = Design::mixed(&frame);
        // intercept + field(2) + team(3) + opponent(3) + game(2)
        assert_eq!(mixed.n_cols, 11);
        assert!(mixed.blocks[1].random);
        // neutral row: intercept, team, opponent, game
        assert_eq!(mixed.rows[2].len(), 4);
        assert_eq!(mixed.rows[0].len(), 5);
    }
}
