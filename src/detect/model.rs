//! Verdicts from an external model's output vector.
//!
//! The output is read by shape: as long as the input it is a
//! reconstruction, a single value is an anomaly score, and anything else is
//! a vector of class probabilities with class 0 meaning normal.

use crate::config::ModelConfig;

use super::{details, Severity, Verdict};

/// Warning band as a fraction of the score threshold.
const WARNING_FRACTION: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Reconstruction,
    Score,
    Probabilities,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Reconstruction => "reconstruction",
            OutputKind::Score => "score",
            OutputKind::Probabilities => "probabilities",
        }
    }
}

/// Anomaly score and how it was read from `output`.
pub fn interpret(input: &[f64], output: &[f64]) -> Option<(f64, OutputKind)> {
    match output.len() {
        0 => None,
        n if n == input.len() && n > 1 => {
            let mse = input
                .iter()
                .zip(output)
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f64>()
                / n as f64;
            Some((mse, OutputKind::Reconstruction))
        }
        1 => Some((output[0], OutputKind::Score)),
        _ => Some((1.0 - output[0], OutputKind::Probabilities)),
    }
}

pub fn evaluate(input: &[f64], output: &[f64], cfg: &ModelConfig) -> Verdict {
    let Some((score, kind)) = interpret(input, output) else {
        return Verdict::new(Severity::Normal, details([]), "model returned no output");
    };

    let threshold = cfg.score_threshold;
    let severity = if score >= threshold {
        Severity::Critical
    } else if score >= WARNING_FRACTION * threshold {
        Severity::Warning
    } else {
        Severity::Normal
    };

    let status = match severity {
        Severity::Normal => format!("Model {} {score:.4} below {threshold}", kind.as_str()),
        _ => format!("Model {} {score:.4} at or above {threshold}", kind.as_str()),
    };

    Verdict::new(
        severity,
        details([
            ("modelScore", score),
            ("scoreThreshold", threshold),
            ("outputSize", output.len() as f64),
        ]),
        status,
    )
}
