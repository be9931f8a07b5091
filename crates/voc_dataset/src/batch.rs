//! Shuffled infinite-epoch batch sampling and train-time augmentation.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::pipeline::{crop_chw, hflip_chw, VocSplit};

/// Draws mini-batches of sample indices, reshuffling at each epoch boundary.
///
/// Epoch boundaries are reported so the caller can drive per-epoch learning
/// rate schedules; a batch never spans two epochs' shuffles (the tail of an
/// epoch is simply followed by the head of the next shuffle).
#[derive(Debug)]
pub struct BatchSampler {
    indices: Vec<usize>,
    cursor: usize,
}

impl BatchSampler {
    pub fn new(len: usize, rng: &mut StdRng) -> Self {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(rng);
        Self { indices, cursor: 0 }
    }

    /// Next `batch_size` indices; the bool is true when the draw crossed an
    /// epoch boundary.
    pub fn next_batch(&mut self, batch_size: usize, rng: &mut StdRng) -> (Vec<usize>, bool) {
        let mut out = Vec::with_capacity(batch_size);
        let mut wrapped = false;
        for _ in 0..batch_size.max(1) {
            if self.cursor == self.indices.len() {
                self.indices.shuffle(rng);
                self.cursor = 0;
                wrapped = true;
            }
            out.push(self.indices[self.cursor]);
            self.cursor += 1;
        }
        (out, wrapped)
    }
}

/// Assemble one training batch as flat CHW/label/weight buffers.
///
/// When `crop` is set, each drawn sample gets an independent random
/// horizontal flip followed by a random `crop` x `crop` window; otherwise
/// images pass through at stored size. Returns (images, labels, weights,
/// output side).
pub fn train_batch_arrays(
    split: &VocSplit,
    indices: &[usize],
    crop: Option<usize>,
    rng: &mut StdRng,
) -> (Vec<f32>, Vec<f32>, Vec<f32>, usize) {
    let side = split.side;
    let out_side = crop.unwrap_or(side);
    let c = split.num_classes;

    let mut images = Vec::with_capacity(indices.len() * 3 * out_side * out_side);
    let mut labels = Vec::with_capacity(indices.len() * c);
    let mut weights = Vec::with_capacity(indices.len() * c);

    for &idx in indices {
        let chw = &split.images[idx];
        match crop {
            Some(crop) if crop < side => {
                let flipped;
                let view = if rng.gen_bool(0.5) {
                    flipped = hflip_chw(chw, side);
                    &flipped
                } else {
                    chw
                };
                let top = rng.gen_range(0..=side - crop);
                let left = rng.gen_range(0..=side - crop);
                images.extend_from_slice(&crop_chw(view, side, crop, top, left));
            }
            _ => images.extend_from_slice(chw),
        }
        labels.extend_from_slice(&split.labels[idx * c..(idx + 1) * c]);
        weights.extend_from_slice(&split.weights[idx * c..(idx + 1) * c]);
    }

    (images, labels, weights, out_side)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn tiny_split() -> VocSplit {
        let side = 4;
        VocSplit {
            ids: vec!["a".into(), "b".into(), "c".into()],
            images: (0..3)
                .map(|i| vec![i as f32; 3 * side * side])
                .collect(),
            side,
            labels: vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            weights: vec![1.0, 1.0, 1.0, 0.0, 1.0, 1.0],
            num_classes: 2,
        }
    }

    #[test]
    fn sampler_visits_every_index_each_epoch() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut sampler = BatchSampler::new(3, &mut rng);
        let (batch, wrapped) = sampler.next_batch(3, &mut rng);
        assert!(!wrapped);
        let mut seen = batch.clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
        let (_, wrapped) = sampler.next_batch(1, &mut rng);
        assert!(wrapped);
    }

    #[test]
    fn batch_keeps_labels_aligned_with_images() {
        let split = tiny_split();
        let mut rng = StdRng::seed_from_u64(0);
        let (images, labels, weights, side) =
            train_batch_arrays(&split, &[2, 0], None, &mut rng);
        assert_eq!(side, 4);
        // Sample 2 first: constant image value 2.0, labels row [1, 1].
        assert_eq!(images[0], 2.0);
        assert_eq!(&labels[0..2], &[1.0, 1.0]);
        assert_eq!(&weights[2..4], &[1.0, 1.0]);
    }

    #[test]
    fn random_crop_yields_requested_size() {
        let split = tiny_split();
        let mut rng = StdRng::seed_from_u64(1);
        let (images, _, _, side) = train_batch_arrays(&split, &[0, 1], Some(2), &mut rng);
        assert_eq!(side, 2);
        assert_eq!(images.len(), 2 * 3 * 2 * 2);
    }
}
