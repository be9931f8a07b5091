use burn::nn::conv::Conv2dConfig;
use burn_ndarray::NdArray;
use models::transplant::{
    conv_from_archive, conv_from_archive_if_present, NamedTensors, TensorEntry, TransplantError,
    TransplantReport,
};

type B = NdArray<f32>;

fn entry(shape: &[usize], fill: f32) -> TensorEntry {
    TensorEntry {
        shape: shape.to_vec(),
        data: vec![fill; shape.iter().product()],
    }
}

#[test]
fn explicit_conv_transplant_overwrites_weights_and_biases() {
    let device = Default::default();
    let conv = Conv2dConfig::new([2, 4], [3, 3]).init::<B>(&device);

    let mut src = NamedTensors::new();
    src.insert("vgg_16/conv1/conv1_1/weights".into(), entry(&[4, 2, 3, 3], 1.0));
    src.insert("vgg_16/conv1/conv1_1/biases".into(), entry(&[4], 0.25));

    let conv = conv_from_archive(conv, &src, "vgg_16/conv1/conv1_1").unwrap();
    let weights: Vec<f32> = conv.weight.val().into_data().to_vec().unwrap();
    assert!(weights.iter().all(|v| *v == 1.0));
    let biases: Vec<f32> = conv.bias.unwrap().val().into_data().to_vec().unwrap();
    assert!(biases.iter().all(|v| *v == 0.25));
}

#[test]
fn explicit_transplant_fails_on_missing_required_tensor() {
    let device = Default::default();
    let conv = Conv2dConfig::new([2, 4], [3, 3]).init::<B>(&device);
    let src = NamedTensors::new();
    let err = conv_from_archive(conv, &src, "vgg_16/conv1/conv1_1").unwrap_err();
    assert!(matches!(err, TransplantError::MissingTensor { .. }));
}

#[test]
fn bulk_conv_transplant_skips_mismatches_without_error() {
    let device = Default::default();
    let conv = Conv2dConfig::new([2, 4], [3, 3]).init::<B>(&device);
    let before: Vec<f32> = conv.weight.val().into_data().to_vec().unwrap();

    // Wrong shape in the archive: layer must come back untouched.
    let mut src = NamedTensors::new();
    src.insert("vgg_16/conv1/conv1_1/weights".into(), entry(&[8, 2, 3, 3], 1.0));

    let mut report = TransplantReport::default();
    let conv = conv_from_archive_if_present(conv, &src, "vgg_16/conv1/conv1_1", &mut report);
    let after: Vec<f32> = conv.weight.val().into_data().to_vec().unwrap();
    assert_eq!(before, after);
    assert!(report.copied.is_empty());
    assert_eq!(report.skipped.len(), 1);
}
