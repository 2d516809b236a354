//! Loss functions over scorer outputs
//!
//! Every loss returns its (batch-averaged) value together with the gradient
//! with respect to each score, in the order the scores were produced. Pairwise
//! scores are laid out as `[positives..., negatives...]`.

use train_core::RelevanceMatrix;

/// Loss value and gradients w.r.t. the scores
#[derive(Debug, Clone, PartialEq)]
pub struct LossOutput {
    pub loss: f64,
    pub gradients: Vec<f32>,
}

fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Losses of pointwise trainers; targets are judged relevances
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PointwiseLoss {
    /// Mean squared error against the relevance
    #[default]
    Mse,

    /// Binary cross-entropy on logits, target is `relevance > 0`
    BinaryCrossEntropy,
}

impl PointwiseLoss {
    pub fn name(&self) -> &'static str {
        match self {
            PointwiseLoss::Mse => "mse",
            PointwiseLoss::BinaryCrossEntropy => "ce",
        }
    }

    pub fn compute(&self, scores: &[f32], targets: &[f32]) -> LossOutput {
        let n = scores.len().max(1) as f64;
        let mut loss = 0.0;
        let mut gradients = Vec::with_capacity(scores.len());

        for (&s, &t) in scores.iter().zip(targets) {
            let (s, t) = (s as f64, t as f64);
            match self {
                PointwiseLoss::Mse => {
                    loss += (s - t).powi(2);
                    gradients.push((2.0 * (s - t) / n) as f32);
                }
                PointwiseLoss::BinaryCrossEntropy => {
                    let y = if t > 0.0 { 1.0 } else { 0.0 };
                    loss += softplus(s) - s * y;
                    gradients.push(((sigmoid(s) - y) / n) as f32);
                }
            }
        }

        LossOutput {
            loss: loss / n,
            gradients,
        }
    }
}

/// Losses of pairwise trainers
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PairwiseLoss {
    /// Cross-entropy of the positive against the (positive, negative) pair
    #[default]
    Softmax,

    /// `max(0, margin - positive + negative)`
    Hinge { margin: f32 },
}

impl PairwiseLoss {
    pub fn name(&self) -> &'static str {
        match self {
            PairwiseLoss::Softmax => "softmax",
            PairwiseLoss::Hinge { .. } => "hinge",
        }
    }

    /// `scores` holds the positive scores, then the negative scores
    pub fn compute(&self, scores: &[f32]) -> LossOutput {
        let b = scores.len() / 2;
        let n = b.max(1) as f64;
        let (positives, negatives) = scores.split_at(b);
        let mut loss = 0.0;
        let mut gradients = vec![0.0f32; 2 * b];

        for (i, (&p, &q)) in positives.iter().zip(negatives).enumerate() {
            let diff = q as f64 - p as f64;
            let g = match self {
                PairwiseLoss::Softmax => {
                    loss += softplus(diff);
                    sigmoid(diff)
                }
                PairwiseLoss::Hinge { margin } => {
                    let value = *margin as f64 + diff;
                    if value > 0.0 {
                        loss += value;
                        1.0
                    } else {
                        0.0
                    }
                }
            };
            gradients[i] = (-g / n) as f32;
            gradients[b + i] = (g / n) as f32;
        }

        LossOutput {
            loss: loss / n,
            gradients,
        }
    }
}

/// Losses of batchwise trainers
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BatchwiseLoss {
    /// Cross-entropy of each query's softmax over all documents against its
    /// normalised relevance row
    #[default]
    Softmax,
}

impl BatchwiseLoss {
    pub fn name(&self) -> &'static str {
        match self {
            BatchwiseLoss::Softmax => "batch-softmax",
        }
    }

    /// `scores` is the row-major (queries x documents) score matrix
    pub fn compute(&self, scores: &[f32], relevances: &RelevanceMatrix) -> LossOutput {
        let (rows, cols) = relevances.shape();
        let n = rows.max(1) as f64;
        let mut loss = 0.0;
        let mut gradients = vec![0.0f32; rows * cols];

        for row in 0..rows {
            let relevance = relevances.row(row);
            let total: f64 = relevance.iter().map(|&r| r as f64).sum();
            if total <= 0.0 {
                continue;
            }

            let logits = &scores[row * cols..(row + 1) * cols];
            let max = logits.iter().fold(f64::NEG_INFINITY, |m, &s| m.max(s as f64));
            let log_sum = logits
                .iter()
                .map(|&s| (s as f64 - max).exp())
                .sum::<f64>()
                .ln()
                + max;

            for col in 0..cols {
                let target = relevance[col] as f64 / total;
                let log_prob = logits[col] as f64 - log_sum;
                loss -= target * log_prob;
                gradients[row * cols + col] = ((log_prob.exp() - target) / n) as f32;
            }
        }

        LossOutput {
            loss: loss / n,
            gradients,
        }
    }
}

/// Losses of distillation trainers
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DistillationPairwiseLoss {
    /// Mean of `((s_neg - s_pos) - (t_neg - t_pos))^2`
    #[default]
    MseDifference,
}

impl DistillationPairwiseLoss {
    pub fn name(&self) -> &'static str {
        match self {
            DistillationPairwiseLoss::MseDifference => "mse-difference",
        }
    }

    /// Student and teacher scores both laid out as `[positives..., negatives...]`
    pub fn compute(&self, scores: &[f32], teacher: &[f32]) -> LossOutput {
        let b = scores.len() / 2;
        let n = b.max(1) as f64;
        let mut loss = 0.0;
        let mut gradients = vec![0.0f32; 2 * b];

        for i in 0..b {
            let student = scores[b + i] as f64 - scores[i] as f64;
            let target = teacher[b + i] as f64 - teacher[i] as f64;
            let d = student - target;
            loss += d * d;
            gradients[i] = (-2.0 * d / n) as f32;
            gradients[b + i] = (2.0 * d / n) as f32;
        }

        LossOutput {
            loss: loss / n,
            gradients,
        }
    }
}
