//! Evaluation metrics: per-class and mean average precision with ignore
//! masking.

/// Per-class average precision over row-major samples x classes matrices.
///
/// For each class independently, only samples with weight 1 participate:
/// they are ranked by score descending and AP is the mean of precision@k over
/// the positive hits (area under the precision-recall curve in ranked order).
/// A class with zero weighted positives has no defined AP and yields `None`.
///
/// Ranking-only: any monotone-increasing transform of the scores within a
/// class leaves the result unchanged.
pub fn average_precision(
    labels: &[f32],
    scores: &[f32],
    weights: &[f32],
    num_classes: usize,
) -> Vec<Option<f32>> {
    assert_eq!(labels.len(), scores.len());
    assert_eq!(labels.len(), weights.len());
    let num_samples = if num_classes == 0 {
        0
    } else {
        labels.len() / num_classes
    };

    let mut out = Vec::with_capacity(num_classes);
    for class in 0..num_classes {
        let mut ranked: Vec<(f32, bool)> = (0..num_samples)
            .filter(|s| weights[s * num_classes + class] == 1.0)
            .map(|s| {
                (
                    scores[s * num_classes + class],
                    labels[s * num_classes + class] == 1.0,
                )
            })
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let positives = ranked.iter().filter(|(_, p)| *p).count();
        if positives == 0 {
            out.push(None);
            continue;
        }

        let mut hits = 0usize;
        let mut precision_sum = 0.0f32;
        for (rank, (_, positive)) in ranked.iter().enumerate() {
            if *positive {
                hits += 1;
                precision_sum += hits as f32 / (rank + 1) as f32;
            }
        }
        out.push(Some(precision_sum / positives as f32));
    }
    out
}

/// Mean over the defined per-class entries only; `None` when every class is
/// undefined.
pub fn mean_ap(aps: &[Option<f32>]) -> Option<f32> {
    let defined: Vec<f32> = aps.iter().filter_map(|a| *a).collect();
    if defined.is_empty() {
        None
    } else {
        Some(defined.iter().sum::<f32>() / defined.len() as f32)
    }
}

/// Secondary localization quality term reported alongside mAP.
///
/// No box-level ground truth reaches the evaluation engine, so there is
/// nothing honest to measure against; the term is a constant zero until a
/// CorLoc-style source of truth exists.
pub fn localization_score(_scores: &[f32], _labels: &[f32]) -> f32 {
    0.0
}
