//! Poisson regression with log link, fitted by iteratively reweighted least squares

use super::design::{Design, ModelFrame};
use super::linalg;
use crate::{EffectKind, FactorEstimate, ModelConfig, Result};
use ndarray::{Array1, Array2};

/// Ridge added to every diagonal entry so aliased columns stay solvable
pub const RIDGE: f64 = 1e-8;

const MAX_STEP_HALVINGS: usize = 20;

/// Outcome of a (possibly penalised) IRLS run
#[derive(Debug, Clone)]
pub(crate) struct IrlsFit {
    pub beta: Vec<f64>,
    pub deviance: f64,
    pub iterations: usize,
    pub converged: bool,
    /// `X'WX + P` at the final iterate
    pub information: Array2<f64>,
}

/// Poisson deviance with frequency weights
pub fn poisson_deviance(y: &[f64], mu: &[f64], weights: &[f64]) -> f64 {
    y.iter()
        .zip(mu)
        .zip(weights)
        .map(|((&y, &mu), &w)| {
            let term = if y > 0.0 { y * (y / mu).ln() } else { 0.0 };
            2.0 * w * (term - (y - mu))
        })
        .sum()
}

fn penalised_objective(deviance: f64, beta: &[f64], penalty: &[f64]) -> f64 {
    deviance + beta.iter().zip(penalty).map(|(b, p)| p * b * b).sum::<f64>()
}

/// IRLS for `log E[y] = X beta` with a diagonal quadratic penalty on beta.
/// Starts from `start` when given, otherwise from `mu = y + 0.1`.
pub(crate) fn irls(
    design: &Design,
    y: &[f64],
    weights: &[f64],
    penalty: &[f64],
    start: Option<&[f64]>,
    max_iterations: usize,
    tolerance: f64,
) -> Result<IrlsFit> {
    let p = design.n_cols;
    let n = y.len();

    let (mut beta, mut eta) = match start {
        Some(beta) => (beta.to_vec(), design.linear_predictor(beta)),
        None => (vec![0.0; p], y.iter().map(|&y| (y + 0.1).ln()).collect()),
    };
    let mut mu: Vec<f64> = eta.iter().map(|e: &f64| e.exp()).collect();
    let mut deviance = poisson_deviance(y, &mu, weights);
    let mut objective = penalised_objective(deviance, &beta, penalty);

    let mut converged = false;
    let mut iterations = 0;
    let mut information = Array2::<f64>::zeros((p, p));

    while iterations < max_iterations {
        iterations += 1;

        information.fill(0.0);
        let mut rhs = Array1::<f64>::zeros(p);
        for i in 0..n {
            let w = weights[i] * mu[i];
            let z = eta[i] + (y[i] - mu[i]) / mu[i];
            let cols = &design.rows[i];
            for &a in cols {
                rhs[a] += w * z;
                for &b in cols {
                    information[[a, b]] += w;
                }
            }
        }
        for (j, pen) in penalty.iter().enumerate() {
            information[[j, j]] += pen;
        }

        let proposal = linalg::solve(&information, &rhs)?.to_vec();

        // Step-halve towards the previous iterate if the objective gets worse
        let mut step = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_STEP_HALVINGS {
            let candidate: Vec<f64> = beta
                .iter()
                .zip(&proposal)
                .map(|(old, new)| old + step * (new - old))
                .collect();
            let cand_eta = design.linear_predictor(&candidate);
            let cand_mu: Vec<f64> = cand_eta.iter().map(|e| e.exp()).collect();
            let cand_dev = poisson_deviance(y, &cand_mu, weights);
            let cand_obj = penalised_objective(cand_dev, &candidate, penalty);

            let first_from_data = iterations == 1 && start.is_none();
            let no_worse = cand_obj <= objective + 1e-10 * (objective.abs() + 0.1);
            if cand_obj.is_finite() && (first_from_data || no_worse) {
                accepted = Some((candidate, cand_eta, cand_mu, cand_dev, cand_obj));
                break;
            }
            step /= 2.0;
        }

        let Some((new_beta, new_eta, new_mu, new_dev, new_obj)) = accepted else {
            log::warn!("IRLS step halving failed at iteration {}", iterations);
            break;
        };

        let change = (objective - new_obj).abs() / (new_obj.abs() + 0.1);
        beta = new_beta;
        eta = new_eta;
        mu = new_mu;
        deviance = new_dev;
        objective = new_obj;

        log::debug!("IRLS iteration {}: deviance {:.6}", iterations, deviance);

        if change < tolerance && iterations > 1 {
            converged = true;
            break;
        }
    }

    // Information at the final iterate for standard errors
    information.fill(0.0);
    for i in 0..n {
        let w = weights[i] * mu[i];
        let cols = &design.rows[i];
        for &a in cols {
            for &b in cols {
                information[[a, b]] += w;
            }
        }
    }
    for (j, pen) in penalty.iter().enumerate() {
        information[[j, j]] += pen;
    }

    Ok(IrlsFit {
        beta,
        deviance,
        iterations,
        converged,
        information,
    })
}

/// One named coefficient
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficient {
    pub factor: String,
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
}

impl Coefficient {
    pub fn z_value(&self) -> f64 {
        self.estimate / self.std_error
    }
}

/// Fitted Poisson GLM
#[derive(Debug, Clone)]
pub struct GlmFit {
    pub coefficients: Vec<Coefficient>,
    pub deviance: f64,
    pub null_deviance: f64,
    pub n_obs: usize,
    pub dropped: usize,
    pub iterations: usize,
    pub converged: bool,
    pub formula: String,
}

/// Name of a treatment-coded column
pub fn column_name(factor: &str, level: &str) -> String {
    format!("C({})[T.{}]", factor, level)
}

/// Fit `score ~ C(field) + C(offense) + C(defense) [+ C(game_id)]`
pub fn fit(frame: &ModelFrame, config: &ModelConfig) -> Result<GlmFit> {
    let design = Design::treatment(frame);
    let penalty = vec![RIDGE; design.n_cols];

    log::info!(
        "Fitting Poisson GLM: {} observations, {} coefficients",
        frame.n_obs(),
        design.n_cols
    );

    let result = irls(
        &design,
        &frame.response,
        &frame.weights,
        &penalty,
        None,
        config.max_iterations,
        config.tolerance,
    )?;

    if !result.converged {
        log::warn!(
            "GLM did not converge after {} iterations",
            result.iterations
        );
    }

    let covariance = linalg::inverse(&result.information)?;

    let mut coefficients = vec![Coefficient {
        factor: "Intercept".to_string(),
        name: "Intercept".to_string(),
        estimate: result.beta[0],
        std_error: covariance[[0, 0]].sqrt(),
    }];
    for block in &design.blocks {
        for (offset, level) in block.levels.iter().enumerate() {
            let j = block.start + offset;
            coefficients.push(Coefficient {
                factor: block.factor.clone(),
                name: column_name(&block.factor, level),
                estimate: result.beta[j],
                std_error: covariance[[j, j]].sqrt(),
            });
        }
    }

    let total_weight: f64 = frame.weights.iter().sum();
    let mean = frame
        .response
        .iter()
        .zip(&frame.weights)
        .map(|(y, w)| y * w)
        .sum::<f64>()
        / total_weight;
    let null_mu = vec![mean; frame.n_obs()];
    let null_deviance = poisson_deviance(&frame.response, &null_mu, &frame.weights);

    let mut formula = "score ~ C(field) + C(offense) + C(defense)".to_string();
    if frame.game.is_some() {
        formula.push_str(" + C(game_id)");
    }

    Ok(GlmFit {
        coefficients,
        deviance: result.deviance,
        null_deviance,
        n_obs: frame.n_obs(),
        dropped: frame.dropped,
        iterations: result.iterations,
        converged: result.converged,
        formula,
    })
}

impl GlmFit {
    pub fn factor_estimates(&self) -> Vec<FactorEstimate> {
        self.coefficients
            .iter()
            .map(|c| FactorEstimate {
                factor: c.factor.clone(),
                kind: EffectKind::Fixed,
                level: c.name.clone(),
                estimate: c.estimate,
            })
            .collect()
    }

    /// Coefficient for a factor level; the reference level is zero
    pub fn effect(&self, factor: &str, level: &str) -> f64 {
        let name = column_name(factor, level);
        self.coefficients
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.estimate)
            .unwrap_or(0.0)
    }

    pub fn intercept(&self) -> f64 {
        self.coefficients.first().map(|c| c.estimate).unwrap_or(0.0)
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("Poisson GLM (log link)\n");
        out.push_str(&format!("Formula:        {}\n", self.formula));
        out.push_str(&format!(
            "Observations:   {} ({} dropped)\n",
            self.n_obs, self.dropped
        ));
        out.push_str(&format!(
            "Iterations:     {} (converged: {})\n",
            self.iterations, self.converged
        ));
        out.push_str(&format!("Deviance:       {:.4}\n", self.deviance));
        out.push_str(&format!("Null deviance:  {:.4}\n", self.null_deviance));
        out.push('\n');
        out.push_str(&format!(
            "{:<40} {:>10} {:>10} {:>8}\n",
            "Coefficient", "Estimate", "Std.Err", "z"
        ));
        for c in &self.coefficients {
            out.push_str(&format!(
                "{:<40} {:>10.4} {:>10.4} {:>8.2}\n",
                c.name,
                c.estimate,
                c.std_error,
                c.z_value()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Field, Observation};
    use approx::assert_relative_eq;

    fn obs(game: usize, team: &str, opponent: &str, field: Field, score: f64) -> Observation {
        Observation {
            game_id: format!("g{:03}", game),
            year: 2025,
            field,
            team: team.to_string(),
            opponent: opponent.to_string(),
            score,
            weight: 1.0,
        }
    }

    #[test]
    fn test_deviance_is_zero_at_saturation() {
        let y = [0.0, 3.0, 7.0];
        assert_relative_eq!(poisson_deviance(&y, &[1e-12, 3.0, 7.0], &[1.0; 3]), 0.0, epsilon = 1e-9);
        assert!(poisson_deviance(&y, &[1.0, 1.0, 1.0], &[1.0; 3]) > 0.0);
    }

    #[test]
    fn test_recovers_exact_multiplicative_effects() {
        // Scores generated exactly from exp(intercept + attack - defence + home)
        let teams = ["Alpha", "Bravo", "Charlie"];
        let attack = [0.0, 0.3, -0.2];
        let defence = [0.0, -0.1, 0.25];
        let home = 0.15;
        let base: f64 = 20.0_f64.ln();

        let mut data = Vec::new();
        let mut game = 0;
        for (i, t) in teams.iter().enumerate() {
            for (j, o) in teams.iter().enumerate() {
                if i == j {
                    continue;
                }
                game += 1;
                let home_score = (base + attack[i] + defence[j] + home).exp();
                let away_score = (base + attack[j] + defence[i]).exp();
                data.push(obs(game, t, o, Field::OffenseHome, home_score));
                data.push(obs(game, o, t, Field::DefenseHome, away_score));
            }
        }

        let frame = ModelFrame::build(&data, false).unwrap();
        let config = ModelConfig {
            include_game_effect: false,
            ..ModelConfig::default()
        };
        let fit = fit(&frame, &config).unwrap();

        assert!(fit.converged);
        assert_relative_eq!(fit.deviance, 0.0, epsilon = 1e-6);
        assert_relative_eq!(fit.intercept(), base, epsilon = 1e-4);
        assert_relative_eq!(fit.effect("field", "offense_home"), home, epsilon = 1e-4);
        assert_relative_eq!(fit.effect("field", "defense_home"), 0.0, epsilon = 1e-4);
        assert_relative_eq!(fit.effect("offense", "Bravo"), 0.3, epsilon = 1e-4);
        assert_relative_eq!(fit.effect("defense", "Charlie"), 0.25, epsilon = 1e-4);
        assert_eq!(fit.effect("offense", "Alpha"), 0.0);
    }

    #[test]
    fn test_estimates_are_named_and_fixed() {
        let data = vec![
            obs(1, "Alpha", "Bravo", Field::OffenseHome, 20.0),
            obs(1, "Bravo", "Alpha", Field::DefenseHome, 10.0),
            obs(2, "Bravo", "Alpha", Field::OffenseHome, 16.0),
            obs(2, "Alpha", "Bravo", Field::DefenseHome, 12.0),
        ];
        let frame = ModelFrame::build(&data, false).unwrap();
        let fit = fit(&frame, &ModelConfig::default()).unwrap();
        let estimates = fit.factor_estimates();

        assert_eq!(estimates[0].level, "Intercept");
        assert!(estimates.iter().any(|e| e.level == "C(offense)[T.Bravo]"));
        assert!(estimates.iter().all(|e| e.kind == EffectKind::Fixed));
        assert!(fit.summary().contains("C(defense)[T.Bravo]"));
        assert!(fit.null_deviance >= fit.deviance);
    }
}
