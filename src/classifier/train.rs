use crate::classifier::features::FeatureVector;
use crate::classifier::model::{FittedModel, Stump, sigmoid};
use crate::domain::Label;
use crate::error::TrainingError;

/// Leaf values are clamped so a nearly pure leaf cannot blow up the score.
const MAX_LEAF_VALUE: f32 = 4.0;

/// Training hyperparameters for stump boosting.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub rounds: usize,
    pub learning_rate: f32,
    /// Number of bins used for split search.
    pub bins: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            rounds: 60,
            learning_rate: 0.3,
            bins: 32,
        }
    }
}

/// One row of training input.
#[derive(Debug, Clone)]
pub struct LabeledVector {
    pub vector: FeatureVector,
    pub label: Label,
    /// Relative sample weight (repeated confirmations count more).
    pub weight: f32,
}

impl LabeledVector {
    pub fn new(vector: FeatureVector, label: Label) -> Self {
        Self {
            vector,
            label,
            weight: 1.0,
        }
    }
}

/// Fit a boosted stump ensemble with logistic loss.
///
/// Classes are reweighted to contribute equally, so the starting score is
/// neutral whatever the class ratio. Training is fully deterministic.
pub fn train(examples: &[LabeledVector], options: &TrainOptions) -> Result<FittedModel, TrainingError> {
    let first = examples.first().ok_or(TrainingError::Empty)?;
    let vocab_version = first.vector.vocab_version;
    let d = first.vector.dim();

    for (i, ex) in examples.iter().enumerate() {
        if ex.vector.vocab_version != vocab_version || ex.vector.dim() != d {
            return Err(TrainingError::Malformed(format!(
                "example {i} has vocabulary v{} with {} features, expected v{vocab_version} with {d}",
                ex.vector.vocab_version,
                ex.vector.dim()
            )));
        }
        if !(ex.weight.is_finite() && ex.weight > 0.0) {
            return Err(TrainingError::Malformed(format!(
                "example {i} has invalid weight {}",
                ex.weight
            )));
        }
        if ex.vector.values.iter().any(|v| !v.is_finite()) {
            return Err(TrainingError::Malformed(format!(
                "example {i} has non-finite features"
            )));
        }
    }

    let mut class_weight = [0.0f64; 2];
    for ex in examples {
        class_weight[class_slot(ex.label)] += ex.weight as f64;
    }
    if class_weight[1] == 0.0 {
        return Err(TrainingError::SingleClass(Label::Junk));
    }
    if class_weight[0] == 0.0 {
        return Err(TrainingError::SingleClass(Label::Important));
    }

    let total: f64 = class_weight.iter().sum();
    let w: Vec<f64> = examples
        .iter()
        .map(|ex| ex.weight as f64 * total / (2.0 * class_weight[class_slot(ex.label)]))
        .collect();
    let y: Vec<f64> = examples
        .iter()
        .map(|ex| if ex.label == Label::Important { 1.0 } else { 0.0 })
        .collect();
    let x: Vec<&[f32]> = examples.iter().map(|ex| ex.vector.values.as_slice()).collect();

    let w_sum: f64 = w.iter().sum();
    let prior = (w.iter().zip(&y).map(|(wi, yi)| wi * yi).sum::<f64>() / w_sum).clamp(1e-6, 1.0 - 1e-6);
    let init_raw = (prior / (1.0 - prior)).ln() as f32;

    let mut model = FittedModel {
        vocab_version,
        feature_len: d,
        learning_rate: options.learning_rate,
        init_raw,
        stumps: Vec::with_capacity(options.rounds),
    };
    if d == 0 {
        return Ok(model);
    }

    let bins = options.bins.clamp(2, 256);
    let (mins, maxs) = compute_feature_min_max(&x, d);
    let binned = bin_features(&x, &mins, &maxs, bins);
    let mut raw = vec![init_raw; examples.len()];

    for _round in 0..options.rounds {
        let probs: Vec<f64> = raw.iter().map(|r| sigmoid(*r) as f64).collect();
        let grad: Vec<f64> = y.iter().zip(&probs).map(|(yi, pi)| yi - pi).collect();
        let hess: Vec<f64> = probs.iter().map(|p| p * (1.0 - p)).collect();

        let Some(best) = best_split(&binned, &w, &grad, d, bins) else {
            break;
        };
        let threshold = threshold_for_bin(mins[best.feature_index], maxs[best.feature_index], best.split_bin, bins);
        let (left_value, right_value) = newton_leaf_values(&x, &w, &grad, &hess, best.feature_index, threshold);
        let stump = Stump {
            feature_index: best.feature_index as u32,
            threshold,
            left_value,
            right_value,
        };
        for (r, row) in raw.iter_mut().zip(&x) {
            *r += options.learning_rate * stump.predict(row);
        }
        model.stumps.push(stump);
    }

    Ok(model)
}

fn class_slot(label: Label) -> usize {
    match label {
        Label::Junk => 0,
        Label::Important => 1,
    }
}

fn compute_feature_min_max(x: &[&[f32]], feature_len: usize) -> (Vec<f32>, Vec<f32>) {
    let mut mins = vec![f32::INFINITY; feature_len];
    let mut maxs = vec![f32::NEG_INFINITY; feature_len];
    for row in x {
        for (j, &v) in row.iter().take(feature_len).enumerate() {
            mins[j] = mins[j].min(v);
            maxs[j] = maxs[j].max(v);
        }
    }
    for j in 0..feature_len {
        if !mins[j].is_finite() || !maxs[j].is_finite() {
            mins[j] = 0.0;
            maxs[j] = 0.0;
        }
    }
    (mins, maxs)
}

fn bin_features(x: &[&[f32]], mins: &[f32], maxs: &[f32], bins: usize) -> Vec<Vec<u8>> {
    let top = (bins - 1) as f32;
    x.iter()
        .map(|row| {
            mins.iter()
                .zip(maxs)
                .enumerate()
                .map(|(j, (&min, &max))| {
                    let v = row.get(j).copied().unwrap_or(0.0);
                    let t = if max > min {
                        ((v - min) / (max - min)).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    (t * top).round() as u8
                })
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    score: f64,
    feature_index: usize,
    split_bin: usize,
}

/// Split minimizing the weighted squared error of the gradients.
///
/// Returns `None` when no feature separates the rows.
fn best_split(binned: &[Vec<u8>], w: &[f64], grad: &[f64], d: usize, bins: usize) -> Option<BestSplit> {
    let mut best: Option<BestSplit> = None;
    let mut bin_w = vec![0f64; bins];
    let mut bin_wg = vec![0f64; bins];
    let mut bin_wgg = vec![0f64; bins];

    for feature_idx in 0..d {
        bin_w.iter_mut().for_each(|v| *v = 0.0);
        bin_wg.iter_mut().for_each(|v| *v = 0.0);
        bin_wgg.iter_mut().for_each(|v| *v = 0.0);
        for (i, row) in binned.iter().enumerate() {
            let b = row[feature_idx] as usize;
            bin_w[b] += w[i];
            bin_wg[b] += w[i] * grad[i];
            bin_wgg[b] += w[i] * grad[i] * grad[i];
        }
        let total_w: f64 = bin_w.iter().sum();
        let total_wg: f64 = bin_wg.iter().sum();
        let total_wgg: f64 = bin_wgg.iter().sum();

        let (mut left_w, mut left_wg, mut left_wgg) = (0f64, 0f64, 0f64);
        for split_bin in 0..(bins - 1) {
            left_w += bin_w[split_bin];
            left_wg += bin_wg[split_bin];
            left_wgg += bin_wgg[split_bin];
            let right_w = total_w - left_w;
            if left_w <= 0.0 || right_w <= 1e-12 {
                continue;
            }
            let right_wg = total_wg - left_wg;
            let right_wgg = total_wgg - left_wgg;
            let score = (left_wgg - left_wg * left_wg / left_w) + (right_wgg - right_wg * right_wg / right_w);
            if best.is_none_or(|b| score < b.score) {
                best = Some(BestSplit {
                    score,
                    feature_index: feature_idx,
                    split_bin,
                });
            }
        }
    }
    best
}

/// Boundary between `split_bin` and the next bin, in feature units.
fn threshold_for_bin(min: f32, max: f32, split_bin: usize, bins: usize) -> f32 {
    let t = (split_bin as f32 + 0.5) / (bins - 1) as f32;
    min + t * (max - min)
}

fn newton_leaf_values(
    x: &[&[f32]],
    w: &[f64],
    grad: &[f64],
    hess: &[f64],
    feature_idx: usize,
    threshold: f32,
) -> (f32, f32) {
    let (mut left_g, mut left_h, mut right_g, mut right_h) = (0f64, 0f64, 0f64, 0f64);
    for (i, row) in x.iter().enumerate() {
        let v = row.get(feature_idx).copied().unwrap_or(0.0);
        if v <= threshold {
            left_g += w[i] * grad[i];
            left_h += w[i] * hess[i];
        } else {
            right_g += w[i] * grad[i];
            right_h += w[i] * hess[i];
        }
    }
    (leaf(left_g, left_h), leaf(right_g, right_h))
}

fn leaf(g: f64, h: f64) -> f32 {
    if h <= 1e-12 {
        return 0.0;
    }
    ((g / h) as f32).clamp(-MAX_LEAF_VALUE, MAX_LEAF_VALUE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[f32], label: Label) -> LabeledVector {
        LabeledVector::new(FeatureVector::new(1, values.to_vec()), label)
    }

    #[test]
    fn recovers_linearly_separable_pair() {
        let examples = [row(&[1.0, 0.0], Label::Important), row(&[0.0, 1.0], Label::Junk)];
        let model = train(&examples, &TrainOptions::default()).unwrap();
        model.validate().unwrap();

        let important = model.predict_values(&[1.0, 0.0]);
        assert_eq!(important.label, Label::Important);
        assert!(important.confidence > 0.5);
        let junk = model.predict_values(&[0.0, 1.0]);
        assert_eq!(junk.label, Label::Junk);
        assert!(junk.confidence > 0.5);
    }

    #[test]
    fn empty_set_fails() {
        assert!(matches!(train(&[], &TrainOptions::default()), Err(TrainingError::Empty)));
    }

    #[test]
    fn single_class_fails() {
        let examples = [row(&[1.0], Label::Junk), row(&[0.5], Label::Junk)];
        assert!(matches!(
            train(&examples, &TrainOptions::default()),
            Err(TrainingError::SingleClass(Label::Junk))
        ));
    }

    #[test]
    fn mixed_dimensions_are_malformed() {
        let examples = [row(&[1.0, 0.0], Label::Important), row(&[0.0], Label::Junk)];
        assert!(matches!(
            train(&examples, &TrainOptions::default()),
            Err(TrainingError::Malformed(_))
        ));
    }

    #[test]
    fn training_is_deterministic() {
        let examples = [
            row(&[0.9, 0.1, 0.0], Label::Important),
            row(&[0.8, 0.0, 0.2], Label::Important),
            row(&[0.0, 0.7, 0.6], Label::Junk),
            row(&[0.1, 0.9, 0.3], Label::Junk),
            row(&[0.0, 0.2, 0.9], Label::Junk),
        ];
        let a = train(&examples, &TrainOptions::default()).unwrap();
        let b = train(&examples, &TrainOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn imbalanced_classes_start_neutral() {
        let examples = [
            row(&[1.0], Label::Important),
            row(&[0.0], Label::Junk),
            row(&[0.1], Label::Junk),
            row(&[0.2], Label::Junk),
        ];
        let model = train(&examples, &TrainOptions::default()).unwrap();
        assert!(model.init_raw.abs() < 1e-4);
        assert_eq!(model.predict_values(&[1.0]).label, Label::Important);
    }

    #[test]
    fn constant_features_train_no_stumps() {
        let examples = [row(&[0.5], Label::Important), row(&[0.5], Label::Junk)];
        let model = train(&examples, &TrainOptions::default()).unwrap();
        assert!(model.stumps.is_empty());
        assert_eq!(model.predict_values(&[0.5]).label, Label::Junk);
    }
}
