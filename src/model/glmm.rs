//! Poisson mixed model fitted by penalised quasi-likelihood
//!
//! `score ~ field + (1|offense) + (1|defense) [+ (1|game_id)]`
//!
//! Each outer iteration runs penalised IRLS on the joint fixed and random
//! coefficients with penalty `1/sigma2_k` on random block k, then updates
//! `sigma2_k = (|b_k|^2 + tr(C^-1)_kk) / q_k`.

use super::design::{Design, ModelFrame};
use super::glm::{irls, RIDGE};
use super::linalg;
use crate::{EffectKind, FactorEstimate, ModelConfig, Result};
use std::collections::HashMap;

const INITIAL_VARIANCE: f64 = 1.0;
const MIN_VARIANCE: f64 = 1e-6;

/// Variance of one random-intercept term
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceComponent {
    pub factor: String,
    pub variance: f64,
    pub levels: usize,
}

impl VarianceComponent {
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixedEffect {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
}

/// Conditional mode of one random-effect level
#[derive(Debug, Clone, PartialEq)]
pub struct RandomEffect {
    pub factor: String,
    pub level: String,
    pub estimate: f64,
}

/// Fitted Poisson GLMM
#[derive(Debug, Clone)]
pub struct GlmmFit {
    pub fixed: Vec<FixedEffect>,
    pub random: Vec<RandomEffect>,
    pub variance_components: Vec<VarianceComponent>,
    pub deviance: f64,
    pub n_obs: usize,
    pub dropped: usize,
    pub outer_iterations: usize,
    pub converged: bool,
    pub formula: String,
    lookup: HashMap<(String, String), f64>,
}

pub fn fit(frame: &ModelFrame, config: &ModelConfig) -> Result<GlmmFit> {
    let design = Design::mixed(frame);
    let random_blocks: Vec<usize> = design
        .blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| b.random)
        .map(|(i, _)| i)
        .collect();

    log::info!(
        "Fitting Poisson GLMM by PQL: {} observations, {} fixed and {} random coefficients",
        frame.n_obs(),
        design.n_cols - random_blocks.iter().map(|&i| design.blocks[i].levels.len()).sum::<usize>(),
        random_blocks.iter().map(|&i| design.blocks[i].levels.len()).sum::<usize>()
    );

    let mut variances = vec![INITIAL_VARIANCE; random_blocks.len()];
    let mut beta: Option<Vec<f64>> = None;
    let mut converged = false;
    let mut outer = 0;

    let fit = loop {
        outer += 1;

        let mut penalty = vec![RIDGE; design.n_cols];
        for (k, &b) in random_blocks.iter().enumerate() {
            for j in design.blocks[b].range() {
                penalty[j] = 1.0 / variances[k];
            }
        }

        let inner = irls(
            &design,
            &frame.response,
            &frame.weights,
            &penalty,
            beta.as_deref(),
            config.max_iterations,
            config.tolerance,
        )?;
        let covariance = linalg::inverse(&inner.information)?;

        let mut max_change: f64 = 0.0;
        for (k, &b) in random_blocks.iter().enumerate() {
            let range = design.blocks[b].range();
            let q = range.len() as f64;
            let sum_sq: f64 = range.clone().map(|j| inner.beta[j] * inner.beta[j]).sum();
            let trace: f64 = range.map(|j| covariance[[j, j]]).sum();
            let updated = ((sum_sq + trace) / q).max(MIN_VARIANCE);

            max_change = max_change.max((updated - variances[k]).abs() / variances[k]);
            variances[k] = updated;
        }

        log::debug!(
            "PQL iteration {}: variances {:?}, deviance {:.6}",
            outer,
            variances,
            inner.deviance
        );

        beta = Some(inner.beta.clone());

        if max_change < config.tolerance.max(1e-6) {
            converged = true;
            break (inner, covariance);
        }
        if outer >= config.max_outer_iterations {
            break (inner, covariance);
        }
    };

    let (inner, covariance) = fit;
    if !converged {
        log::warn!(
            "GLMM variance components did not converge after {} iterations",
            outer
        );
    }

    let mut fixed = vec![FixedEffect {
        name: "Intercept".to_string(),
        estimate: inner.beta[0],
        std_error: covariance[[0, 0]].sqrt(),
    }];
    let mut random = Vec::new();
    let mut variance_components = Vec::new();
    let mut lookup = HashMap::new();

    for block in &design.blocks {
        for (offset, level) in block.levels.iter().enumerate() {
            let j = block.start + offset;
            lookup.insert((block.factor.clone(), level.clone()), inner.beta[j]);
            if block.random {
                random.push(RandomEffect {
                    factor: block.factor.clone(),
                    level: level.clone(),
                    estimate: inner.beta[j],
                });
            } else {
                fixed.push(FixedEffect {
                    name: format!("{}{}", block.factor, level),
                    estimate: inner.beta[j],
                    std_error: covariance[[j, j]].sqrt(),
                });
            }
        }
    }
    for (k, &b) in random_blocks.iter().enumerate() {
        variance_components.push(VarianceComponent {
            factor: design.blocks[b].factor.clone(),
            variance: variances[k],
            levels: design.blocks[b].levels.len(),
        });
    }

    let mut formula = "score ~ field + (1|offense) + (1|defense)".to_string();
    if frame.game.is_some() {
        formula.push_str(" + (1|game_id)");
    }

    Ok(GlmmFit {
        fixed,
        random,
        variance_components,
        deviance: inner.deviance,
        n_obs: frame.n_obs(),
        dropped: frame.dropped,
        outer_iterations: outer,
        converged,
        formula,
        lookup,
    })
}

impl GlmmFit {
    pub fn factor_estimates(&self) -> Vec<FactorEstimate> {
        let fixed = self.fixed.iter().map(|f| FactorEstimate {
            factor: if f.name == "Intercept" {
                "Intercept".to_string()
            } else {
                "field".to_string()
            },
            kind: EffectKind::Fixed,
            level: f.name.clone(),
            estimate: f.estimate,
        });
        let random = self.random.iter().map(|r| FactorEstimate {
            factor: r.factor.clone(),
            kind: EffectKind::Random,
            level: r.level.clone(),
            estimate: r.estimate,
        });
        fixed.chain(random).collect()
    }

    /// Effect of a factor level; reference and unseen levels are zero
    pub fn effect(&self, factor: &str, level: &str) -> f64 {
        self.lookup
            .get(&(factor.to_string(), level.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn intercept(&self) -> f64 {
        self.fixed.first().map(|f| f.estimate).unwrap_or(0.0)
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("Poisson GLMM (log link, PQL)\n");
        out.push_str(&format!("Formula:        {}\n", self.formula));
        out.push_str(&format!(
            "Observations:   {} ({} dropped)\n",
            self.n_obs, self.dropped
        ));
        out.push_str(&format!(
            "Iterations:     {} (converged: {})\n",
            self.outer_iterations, self.converged
        ));
        out.push_str(&format!("Deviance:       {:.4}\n", self.deviance));

        out.push_str("\nRandom effects:\n");
        out.push_str(&format!(
            "{:<12} {:>8} {:>12} {:>10}\n",
            "Groups", "Levels", "Variance", "Std.Dev"
        ));
        for vc in &self.variance_components {
            out.push_str(&format!(
                "{:<12} {:>8} {:>12.6} {:>10.6}\n",
                vc.factor,
                vc.levels,
                vc.variance,
                vc.std_dev()
            ));
        }

        out.push_str("\nFixed effects:\n");
        out.push_str(&format!(
            "{:<24} {:>10} {:>10} {:>8}\n",
            "", "Estimate", "Std.Err", "z"
        ));
        for f in &self.fixed {
            out.push_str(&format!(
                "{:<24} {:>10.4} {:>10.4} {:>8.2}\n",
                f.name,
                f.estimate,
                f.std_error,
                f.estimate / f.std_error
            ));
        }
        out
    }
}
