//! Principal component monitoring with Hotelling T² and SPE (Q) statistics.
//!
//! The model trains once, the first time the window holds
//! `max(10, window/2)` vectors, and again only after a reset. Samples are
//! standardised with the training means and standard deviations before
//! projection.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::linalg::{self, Matrix};
use crate::analysis::stats;
use crate::config::{PcaConfig, PcaStatistic};

use super::{details, Contribution, Severity, Verdict};

/// Eigenvalues at or below this are treated as zero in T².
const EIGEN_EPSILON: f64 = 1e-10;

/// Trained PCA artefacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcaModel {
    pub mean: Vec<f64>,
    pub std_dev: Vec<f64>,
    /// Sorted descending.
    pub eigenvalues: Vec<f64>,
    pub eigenvectors: Matrix,
    pub n_components: usize,
    pub t2_threshold: f64,
    pub spe_threshold: f64,
    pub covariance_trace: f64,
}

/// Statistics for one projected sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PcaScore {
    pub t2: f64,
    pub spe: f64,
    pub scores: Vec<f64>,
    pub standardized: Vec<f64>,
    pub residuals: Vec<f64>,
}

impl PcaModel {
    /// Fits the model on the training rows (all of equal width).
    pub fn train(rows: &[Vec<f64>], cfg: &PcaConfig) -> Self {
        let p = rows.first().map_or(0, Vec::len);

        let mut mean = Vec::with_capacity(p);
        let mut std_dev = Vec::with_capacity(p);
        for j in 0..p {
            let column: Vec<f64> = rows.iter().map(|r| r[j]).collect();
            mean.push(stats::mean(&column));
            let sd = stats::std_dev(&column);
            std_dev.push(if sd == 0.0 { 1.0 } else { sd });
        }

        let standardized: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| standardize(r, &mean, &std_dev))
            .collect();
        let cov = linalg::covariance(&standardized);
        let eigen = linalg::eigen_decompose(&cov);

        let n_components = if cfg.auto_components {
            components_for_variance(&eigen.values, cfg.variance_threshold)
        } else {
            cfg.n_components.clamp(1, p.max(1))
        };

        let mut model = Self {
            mean,
            std_dev,
            eigenvalues: eigen.values,
            eigenvectors: eigen.vectors,
            n_components,
            t2_threshold: cfg.threshold * cfg.threshold,
            spe_threshold: cfg.threshold,
            covariance_trace: linalg::trace(&cov),
        };

        if rows.len() >= 5 {
            let mut t2s = Vec::with_capacity(rows.len());
            let mut spes = Vec::with_capacity(rows.len());
            for row in rows {
                let s = model.score(row);
                t2s.push(s.t2);
                spes.push(s.spe);
            }
            // Empirical control limit: the 1 − 1/(10·threshold) quantile of the
            // training statistics.
            let pct = ((1.0 - 1.0 / (10.0 * cfg.threshold)) * 100.0).clamp(0.0, 100.0);
            model.t2_threshold = stats::percentile(&stats::sorted(&t2s), pct);
            model.spe_threshold = stats::percentile(&stats::sorted(&spes), pct);
        }

        model
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// False if training overflowed anywhere.
    pub fn is_finite(&self) -> bool {
        self.mean
            .iter()
            .chain(&self.std_dev)
            .chain(&self.eigenvalues)
            .chain(self.eigenvectors.iter().flatten())
            .chain([&self.t2_threshold, &self.spe_threshold])
            .all(|v| v.is_finite())
    }

    /// Fraction of total variance each retained component explains.
    pub fn explained_variance(&self) -> Vec<f64> {
        let total: f64 = self.eigenvalues.iter().map(|l| l.max(0.0)).sum();
        self.eigenvalues
            .iter()
            .take(self.n_components)
            .map(|l| if total > 0.0 { l.max(0.0) / total } else { 0.0 })
            .collect()
    }

    pub fn score(&self, x: &[f64]) -> PcaScore {
        let z = standardize(x, &self.mean, &self.std_dev);
        let k = self.n_components.min(self.eigenvectors.len());

        let scores: Vec<f64> = self.eigenvectors[..k]
            .iter()
            .map(|v| linalg::dot(&z, v))
            .collect();

        let t2: f64 = scores
            .iter()
            .zip(&self.eigenvalues)
            .filter(|(_, &l)| l > EIGEN_EPSILON)
            .map(|(s, l)| s * s / l)
            .sum();

        let mut reconstructed = vec![0.0; z.len()];
        for (s, v) in scores.iter().zip(&self.eigenvectors[..k]) {
            for (r, vj) in reconstructed.iter_mut().zip(v) {
                *r += s * vj;
            }
        }
        // A full basis reconstructs exactly; what power iteration leaves over
        // is round-off, not residual.
        let residuals: Vec<f64> = if k >= z.len() {
            vec![0.0; z.len()]
        } else {
            z.iter().zip(&reconstructed).map(|(a, b)| a - b).collect()
        };
        let spe: f64 = residuals.iter().map(|r| r * r).sum();

        PcaScore {
            t2,
            spe,
            scores,
            standardized: z,
            residuals,
        }
    }
}

fn standardize(x: &[f64], mean: &[f64], std_dev: &[f64]) -> Vec<f64> {
    x.iter()
        .zip(mean.iter().zip(std_dev))
        .map(|(v, (m, s))| (v - m) / s)
        .collect()
}

/// Smallest `k` whose leading eigenvalues reach the variance share.
pub fn components_for_variance(eigenvalues: &[f64], variance_threshold: f64) -> usize {
    let total: f64 = eigenvalues.iter().map(|l| l.max(0.0)).sum();
    if total <= 0.0 {
        return 1;
    }
    let mut cumulative = 0.0;
    for (i, l) in eigenvalues.iter().enumerate() {
        cumulative += l;
        if cumulative / total >= variance_threshold {
            return i + 1;
        }
    }
    eigenvalues.len().max(1)
}

/// Normalised per-feature contributions.
///
/// SPE-driven anomalies are attributed by reconstruction residual
/// `|x_j − x̂_j|`. T²-driven ones, and any sample whose residual vanishes
/// because every component is retained, use the standardised deviations.
pub fn contributions(features: &[String], score: &PcaScore, by_residual: bool) -> Vec<Contribution> {
    let deviation_sum: f64 = score.standardized.iter().map(|z| z.abs()).sum();
    let residual_sum: f64 = score.residuals.iter().map(|r| r.abs()).sum();
    let raw: Vec<f64> = if by_residual && residual_sum > 1e-9 * deviation_sum.max(1.0) {
        score.residuals.iter().map(|r| r.abs()).collect()
    } else {
        score.standardized.iter().map(|z| z.abs()).collect()
    };
    let total: f64 = raw.iter().sum();
    features
        .iter()
        .zip(raw)
        .map(|(f, r)| Contribution {
            feature: f.clone(),
            contribution: if total > 0.0 { r / total } else { 0.0 },
        })
        .collect()
}

/// PCA estimator state: the trained model, once there is one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcaDetector {
    pub model: Option<PcaModel>,
}

impl PcaDetector {
    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn reset(&mut self) {
        self.model = None;
    }

    /// Trains if needed, then classifies `x`, the newest of `rows`.
    pub fn ingest(
        &mut self,
        features: &[String],
        rows: &[Vec<f64>],
        x: &[f64],
        need: usize,
        cfg: &PcaConfig,
    ) -> Verdict {
        if self.model.is_none() {
            if rows.len() < need {
                return Verdict::warmup(rows.len(), need);
            }
            let model = PcaModel::train(rows, cfg);
            info!(
                samples = rows.len(),
                features = model.n_features(),
                components = model.n_components,
                t2_threshold = model.t2_threshold,
                spe_threshold = model.spe_threshold,
                "PCA model trained"
            );
            self.model = Some(model);
        }
        let Some(model) = self.model.as_ref() else {
            return Verdict::warmup(rows.len(), need);
        };

        let score = model.score(x);
        let t2_ratio = ratio(score.t2, model.t2_threshold);
        let spe_ratio = ratio(score.spe, model.spe_threshold);
        let ratio = match cfg.statistic {
            PcaStatistic::T2 => t2_ratio,
            PcaStatistic::Spe => spe_ratio,
            PcaStatistic::Combined => t2_ratio.max(spe_ratio),
        };

        let severity = if ratio > 2.0 {
            Severity::Critical
        } else if ratio > 1.0 {
            Severity::Warning
        } else {
            Severity::Normal
        };

        let by_residual = match cfg.statistic {
            PcaStatistic::T2 => false,
            PcaStatistic::Spe => true,
            PcaStatistic::Combined => spe_ratio >= t2_ratio,
        };
        let mut all = contributions(features, &score, by_residual);
        all.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
        let top_contributor = all
            .first()
            .filter(|c| c.contribution > 0.0)
            .map(|c| c.feature.clone());
        let top: Vec<Contribution> = all
            .into_iter()
            .filter(|c| c.contribution >= cfg.contribution_threshold)
            .take(cfg.top_contributors)
            .collect();

        let status = match (&severity, &top_contributor) {
            (Severity::Normal, _) => "Within PCA control limits".to_string(),
            (_, Some(f)) => format!("Multivariate anomaly, driven by {f}"),
            (_, None) => "Multivariate anomaly".to_string(),
        };

        let mut verdict = Verdict::new(
            severity,
            details([
                ("t2", score.t2),
                ("spe", score.spe),
                ("t2Threshold", model.t2_threshold),
                ("speThreshold", model.spe_threshold),
                ("nComponents", model.n_components as f64),
            ]),
            status,
        );
        verdict.contributions = top;
        verdict.top_contributor = top_contributor;
        verdict.sanitize();
        verdict
    }
}

fn ratio(stat: f64, limit: f64) -> f64 {
    if limit > 0.0 {
        stat / limit
    } else if stat > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}
