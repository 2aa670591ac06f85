//! Class-Balance Corrector: random undersampling of the negative class.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{LabeledDataset, TaskType};

/// Undersampling result plus the audit trail kept in model metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceOutcome {
    pub dataset: LabeledDataset,
    pub report: BalanceReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub applied: bool,
    pub max_imbalance_ratio: f64,
    pub initial_distribution: BTreeMap<String, usize>,
    pub final_distribution: BTreeMap<String, usize>,
}

/// RNG for one training invocation: seeded when configured, OS entropy otherwise.
pub fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Bound the negative class to `floor(positive * max_ratio)` samples.
///
/// Only `negative <= positive * max_ratio` is enforced, so a dataset where
/// positives outnumber negatives passes through unchanged, as does one with
/// no positives or without exactly two classes. Classes are resolved by the
/// detector labels, falling back to the positive-first schema order.
pub fn undersample(data: &LabeledDataset, max_ratio: f64, rng: &mut StdRng) -> BalanceOutcome {
    let initial = data.distribution();
    let counts = data.class_counts();
    let unchanged = |data: &LabeledDataset| BalanceOutcome {
        dataset: data.clone(),
        report: BalanceReport {
            applied: false,
            max_imbalance_ratio: max_ratio,
            initial_distribution: initial.clone(),
            final_distribution: initial.clone(),
        },
    };
    if counts.len() != 2 {
        return unchanged(data);
    }
    let class_of = |label: &str, fallback: usize| {
        data.classes
            .iter()
            .position(|class| class == label)
            .unwrap_or(fallback)
    };
    let positive_class = class_of(TaskType::Detector.positive_label(), 0);
    let negative_class = class_of(TaskType::Detector.negative_label(), 1);
    if positive_class == negative_class {
        return unchanged(data);
    }
    let positive = counts[positive_class];
    let negative = counts[negative_class];
    if positive == 0 || negative as f64 <= positive as f64 * max_ratio {
        return unchanged(data);
    }
    let target = ((positive as f64 * max_ratio).floor() as usize).clamp(1, negative);

    let mut keep: Vec<usize> = Vec::with_capacity(positive + target);
    let mut negative_rows = Vec::with_capacity(negative);
    for (idx, &label) in data.y.iter().enumerate() {
        if label == negative_class {
            negative_rows.push(idx);
        } else {
            keep.push(idx);
        }
    }
    keep.extend(
        sample(rng, negative_rows.len(), target)
            .into_iter()
            .map(|pos| negative_rows[pos]),
    );
    keep.shuffle(rng);
    let dataset = data.subset(&keep);
    let final_distribution = dataset.distribution();
    info!(
        positive,
        negative,
        kept = target,
        ratio = max_ratio,
        "Undersampled negative class"
    );
    BalanceOutcome {
        dataset,
        report: BalanceReport {
            applied: true,
            max_imbalance_ratio: max_ratio,
            initial_distribution: initial,
            final_distribution,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(melon: usize, non_melon: usize) -> LabeledDataset {
        let mut data = LabeledDataset::new(vec!["melon".into(), "non_melon".into()]);
        for i in 0..melon {
            data.push(vec![i as f32], 0);
        }
        for i in 0..non_melon {
            data.push(vec![100.0 + i as f32], 1);
        }
        data
    }

    #[test]
    fn negatives_are_cut_to_ratio() {
        let data = dataset(6, 40);
        let outcome = undersample(&data, 2.0, &mut rng_for(Some(1)));
        assert!(outcome.report.applied);
        assert_eq!(outcome.dataset.class_counts(), vec![6, 12]);
        assert_eq!(outcome.dataset.len(), 18);
        assert_eq!(outcome.report.initial_distribution["non_melon"], 40);
        assert_eq!(outcome.report.final_distribution["non_melon"], 12);
        // every melon row is kept, sampled non_melon rows are distinct originals
        let mut values: Vec<f32> = outcome.dataset.x.iter().map(|row| row[0]).collect();
        values.sort_by(f32::total_cmp);
        values.dedup();
        assert_eq!(values.len(), 18);
    }

    #[test]
    fn same_seed_same_sample() {
        let data = dataset(5, 30);
        let a = undersample(&data, 1.5, &mut rng_for(Some(9)));
        let b = undersample(&data, 1.5, &mut rng_for(Some(9)));
        assert_eq!(a, b);
    }

    #[test]
    fn bound_holds_for_many_shapes() {
        for (melon, non_melon, ratio) in [(1, 9, 2.0), (3, 50, 1.0), (7, 8, 1.1), (4, 40, 0.5)] {
            let outcome = undersample(&dataset(melon, non_melon), ratio, &mut rng_for(Some(3)));
            let counts = outcome.dataset.class_counts();
            assert_eq!(counts[0], melon);
            assert!(
                counts[1] as f64 <= (melon as f64 * ratio).ceil(),
                "{melon}/{non_melon} at {ratio} gave {counts:?}"
            );
        }
    }

    #[test]
    fn positives_are_never_cut() {
        let data = dataset(10, 3);
        let outcome = undersample(&data, 2.0, &mut rng_for(Some(3)));
        assert!(!outcome.report.applied);
        assert_eq!(outcome.dataset, data);
        assert_eq!(outcome.report.final_distribution["melon"], 10);

        let outcome = undersample(&dataset(40, 2), 0.5, &mut rng_for(Some(3)));
        assert!(!outcome.report.applied);
        assert_eq!(outcome.dataset.class_counts(), vec![40, 2]);
    }

    #[test]
    fn negative_class_is_found_by_label() {
        let mut data = LabeledDataset::new(vec!["non_melon".into(), "melon".into()]);
        for i in 0..20 {
            data.push(vec![i as f32], 0);
        }
        for i in 0..4 {
            data.push(vec![100.0 + i as f32], 1);
        }
        let outcome = undersample(&data, 2.0, &mut rng_for(Some(5)));
        assert!(outcome.report.applied);
        assert_eq!(outcome.dataset.class_counts(), vec![8, 4]);
    }

    #[test]
    fn no_op_cases_pass_through() {
        let balanced = dataset(6, 10);
        let outcome = undersample(&balanced, 2.0, &mut rng_for(Some(1)));
        assert!(!outcome.report.applied);
        assert_eq!(outcome.dataset, balanced);

        let no_positives = dataset(0, 10);
        let outcome = undersample(&no_positives, 2.0, &mut rng_for(None));
        assert!(!outcome.report.applied);
        assert_eq!(outcome.dataset.len(), 10);
    }
}
