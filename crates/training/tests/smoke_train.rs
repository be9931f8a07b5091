//! End-to-end smoke coverage on a tiny synthetic split: one optimizer step
//! must run, and evaluation must respect ignore masking.

use burn::backend::Autodiff;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use rand::rngs::StdRng;
use rand::SeedableRng;

use models::{masked_sigmoid_cross_entropy, ImageClassifier, RunMode, ScratchNet, ScratchNetConfig};
use training::{evaluate, mean_ap};
use voc_dataset::{train_batch_arrays, BatchSampler, VocSplit};

type B = NdArray<f32>;
type AD = Autodiff<B>;

const SIDE: usize = 8;

/// Four samples, two classes. Class 0 is fully annotated with two positives;
/// class 1 is entirely weight 0 and must vanish from every metric.
fn synthetic_split() -> VocSplit {
    let images = (0..4)
        .map(|i| vec![(i as f32 - 1.5) * 0.2; 3 * SIDE * SIDE])
        .collect();
    VocSplit {
        ids: (0..4).map(|i| format!("img{i}")).collect(),
        images,
        side: SIDE,
        labels: vec![
            1.0, 1.0, //
            0.0, 0.0, //
            1.0, 1.0, //
            0.0, 0.0,
        ],
        weights: vec![
            1.0, 0.0, //
            1.0, 0.0, //
            1.0, 0.0, //
            1.0, 0.0,
        ],
        num_classes: 2,
    }
}

fn tiny_model(device: &<AD as burn::tensor::backend::Backend>::Device) -> ScratchNet<AD> {
    ScratchNet::new(
        ScratchNetConfig {
            num_classes: 2,
            input_size: SIDE,
            hidden: 4,
            dropout: 0.1,
        },
        device,
    )
}

#[test]
fn single_sgd_step_runs_on_masked_batch() {
    let device = Default::default();
    let split = synthetic_split();
    let mut model = tiny_model(&device);
    let mut optim = SgdConfig::new().init();

    let mut rng = StdRng::seed_from_u64(3);
    let mut sampler = BatchSampler::new(split.len(), &mut rng);
    let (indices, _) = sampler.next_batch(4, &mut rng);
    let (images, labels, weights, side) = train_batch_arrays(&split, &indices, None, &mut rng);

    let images =
        Tensor::<AD, 4>::from_data(TensorData::new(images, [4, 3, side, side]), &device);
    let targets = Tensor::<AD, 2>::from_data(TensorData::new(labels, [4, 2]), &device);
    let weights = Tensor::<AD, 2>::from_data(TensorData::new(weights, [4, 2]), &device);

    let logits = model.forward(images, RunMode::Train);
    let loss = masked_sigmoid_cross_entropy(logits, targets, weights);
    let loss_value: f32 = loss.clone().into_data().to_vec::<f32>().unwrap()[0];
    assert!(loss_value.is_finite());
    assert!(loss_value > 0.0);

    let grads = GradientsParams::from_grads(loss.backward(), &model);
    model = optim.step(0.001, model, grads);

    // The updated model must still produce finite logits.
    let check = model.forward(
        Tensor::<AD, 4>::zeros([1, 3, SIDE, SIDE], &device),
        RunMode::Predict,
    );
    let check: Vec<f32> = check.into_data().to_vec::<f32>().unwrap();
    assert!(check.iter().all(|v| v.is_finite()));
}

#[test]
fn evaluate_skips_the_fully_masked_class() {
    let device = Default::default();
    let split = synthetic_split();
    let model = ScratchNet::<B>::new(
        ScratchNetConfig {
            num_classes: 2,
            input_size: SIDE,
            hidden: 4,
            dropout: 0.1,
        },
        &device,
    );

    let (aps, map) = evaluate(&model, &split, 2, &device).unwrap();
    assert_eq!(aps.len(), 2);
    assert!(aps[0].is_some());
    assert!(aps[1].is_none());
    assert_eq!(map, mean_ap(&aps));
    assert!(map.is_some());
}
