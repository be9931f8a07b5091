//! The epoch/step training loop: block training, periodic evaluation,
//! checkpointing, and learning-rate scheduling.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use models::{
    load_safetensors, masked_sigmoid_cross_entropy, ImageClassifier, RunMode, ScratchNet,
    ScratchNetConfig, Vgg16, Vgg16Config, Vgg16Localizer, Vgg16LocalizerConfig,
};
use voc_dataset::{
    load_split, summarize, train_batch_arrays, BatchSampler, LabelPolicy, LoadMode,
    PipelineConfig, VocSplit, CLASS_NAMES,
};

use crate::checkpoint::{load_meta, save_meta, CheckpointMeta, CheckpointPaths};
use crate::metrics::{average_precision, localization_score, mean_ap};
use crate::TrainBackend;

type ADBackend = Autodiff<TrainBackend>;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ModelKind {
    Scratch,
    Vgg,
    VggLocalizer,
}

impl ModelKind {
    pub fn tag(self) -> &'static str {
        match self {
            ModelKind::Scratch => "scratch",
            ModelKind::Vgg => "vgg",
            ModelKind::VggLocalizer => "vgg_localizer",
        }
    }

    /// The raw-zero annotation encoding each variant trains against. The
    /// scratch baseline keeps the historical inclusive encoding; both VGG
    /// variants use confirmed negatives.
    pub fn label_policy(self) -> LabelPolicy {
        match self {
            ModelKind::Scratch => LabelPolicy::InclusiveZero,
            ModelKind::Vgg | ModelKind::VggLocalizer => LabelPolicy::StrictZero,
        }
    }

    /// The scratch variant feeds the canonical size in both branches; the
    /// VGG variants crop to the network input size.
    pub fn pipeline_config(self) -> PipelineConfig {
        match self {
            ModelKind::Scratch => PipelineConfig {
                crop_size: None,
                ..Default::default()
            },
            ModelKind::Vgg | ModelKind::VggLocalizer => PipelineConfig::default(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train a multi-label VOC classifier (scratch CNN, VGG-16, or VGG localizer)"
)]
pub struct TrainArgs {
    /// Path to the VOC dataset root (contains ImageSets/ and JPEGImages/).
    #[arg(long, default_value = "data/VOC2007")]
    pub data_dir: String,
    /// Model variant to train.
    #[arg(long, value_enum, default_value_t = ModelKind::Scratch)]
    pub model: ModelKind,
    /// Training split name.
    #[arg(long, default_value = "trainval")]
    pub train_split: String,
    /// Evaluation split name.
    #[arg(long, default_value = "test")]
    pub eval_split: String,
    /// Total optimizer-step budget.
    #[arg(long, default_value_t = 1000)]
    pub max_steps: usize,
    /// Steps between evaluation points.
    #[arg(long, default_value_t = 100)]
    pub eval_stride: usize,
    /// Mini-batch size.
    #[arg(long, default_value_t = 10)]
    pub batch_size: usize,
    /// Print a loss line every N steps.
    #[arg(long, default_value_t = 10)]
    pub log_every: usize,
    /// Override the variant's base learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Image decode worker threads (0 lets rayon pick).
    #[arg(long, default_value_t = 0)]
    pub workers: usize,
    /// Shuffle/augmentation seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// Directory for checkpoints and run artifacts.
    #[arg(long, default_value = "checkpoints")]
    pub out_dir: String,
    /// Checkpoint prefix to resume from (e.g. checkpoints/vgg_best).
    #[arg(long)]
    pub resume: Option<String>,
    /// Pretrained safetensors archive for the VGG variants.
    #[arg(long)]
    pub pretrained: Option<String>,
    /// Also persist a "latest" checkpoint at every epoch boundary.
    #[arg(long, default_value_t = false)]
    pub save_every_epoch: bool,
}

/// Learning-rate policy, evaluated per optimizer step.
#[derive(Debug, Clone, Copy)]
pub enum LrSchedule {
    Fixed {
        lr: f64,
    },
    /// base * factor^(step / interval), matching exponential step decay.
    ExpDecayPerStep {
        base: f64,
        interval: usize,
        factor: f64,
    },
    /// base * factor^(epoch / every): stepped decay at epoch granularity.
    SteppedPerEpoch {
        base: f64,
        every: usize,
        factor: f64,
    },
}

impl LrSchedule {
    pub fn lr_at(&self, step: usize, epoch: usize) -> f64 {
        match *self {
            LrSchedule::Fixed { lr } => lr,
            LrSchedule::ExpDecayPerStep {
                base,
                interval,
                factor,
            } => base * factor.powf(step as f64 / interval as f64),
            LrSchedule::SteppedPerEpoch { base, every, factor } => {
                base * factor.powi((epoch / every) as i32)
            }
        }
    }
}

/// Mutable run state threaded through the loop.
#[derive(Debug, Clone)]
pub struct TrainState {
    pub step: usize,
    pub epoch: usize,
    pub best_map: f32,
    pub history: Vec<EvalPoint>,
}

impl TrainState {
    fn new() -> Self {
        Self {
            step: 0,
            epoch: 0,
            best_map: 0.0,
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvalPoint {
    pub step: usize,
    pub mean_ap: f32,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("cannot create output directory {}", args.out_dir))?;

    let policy = args.model.label_policy();
    let mut pipeline = args.model.pipeline_config();
    pipeline.workers = args.workers;
    let data_dir = Path::new(&args.data_dir);

    let train = load_split(data_dir, &args.train_split, &pipeline, LoadMode::Train, policy)?;
    let eval = load_split(data_dir, &args.eval_split, &pipeline, LoadMode::Eval, policy)?;
    print_split_summary(&args.train_split, &train);
    print_split_summary(&args.eval_split, &eval);

    let device = <ADBackend as Backend>::Device::default();
    let crop = pipeline.crop_size.map(|c| c as usize);

    match args.model {
        ModelKind::Scratch => {
            let model = ScratchNet::<ADBackend>::new(ScratchNetConfig::default(), &device);
            let schedule = LrSchedule::Fixed {
                lr: args.lr.unwrap_or(0.001),
            };
            fit(&args, &train, &eval, model, schedule, None, crop, &device)
        }
        ModelKind::Vgg => {
            let cfg = Vgg16Config::default();
            let model = match &args.pretrained {
                Some(path) => {
                    let archive = load_safetensors(Path::new(path))?;
                    Vgg16::<ADBackend>::from_pretrained(cfg, &archive, &device)?
                }
                None => Vgg16::<ADBackend>::new(cfg, &device),
            };
            let schedule = LrSchedule::ExpDecayPerStep {
                base: args.lr.unwrap_or(0.001),
                interval: 10_000,
                factor: 0.5,
            };
            fit(&args, &train, &eval, model, schedule, Some(0.9), crop, &device)
        }
        ModelKind::VggLocalizer => {
            let mut model =
                Vgg16Localizer::<ADBackend>::new(Vgg16LocalizerConfig::default(), &device);
            if let Some(path) = &args.pretrained {
                let archive = load_safetensors(Path::new(path))?;
                let (initialized, report) = model.with_pretrained_features(&archive);
                model = initialized;
                println!(
                    "pretrained features: {} layers copied, {} skipped",
                    report.copied.len(),
                    report.skipped.len()
                );
            }
            let schedule = LrSchedule::SteppedPerEpoch {
                base: args.lr.unwrap_or(0.1),
                every: 30,
                factor: 0.1,
            };
            fit(&args, &train, &eval, model, schedule, Some(0.9), crop, &device)
        }
    }
}

/// The INIT -> (TRAIN_BLOCK -> EVAL_POINT)* -> DONE loop shared by every
/// variant.
#[allow(clippy::too_many_arguments)]
fn fit<M>(
    args: &TrainArgs,
    train: &VocSplit,
    eval: &VocSplit,
    mut model: M,
    schedule: LrSchedule,
    momentum: Option<f64>,
    crop: Option<usize>,
    device: &<ADBackend as Backend>::Device,
) -> anyhow::Result<()>
where
    M: AutodiffModule<ADBackend> + ImageClassifier<ADBackend>,
{
    let mut sgd = SgdConfig::new();
    if let Some(momentum) = momentum {
        sgd = sgd.with_momentum(Some(MomentumConfig::new().with_momentum(momentum)));
    }
    let mut optim = sgd.init();

    let mut state = TrainState::new();
    if let Some(resume) = &args.resume {
        let paths = CheckpointPaths::new(resume);
        let (resumed_model, resumed_optim, meta) =
            load_checkpoint(model, optim, &paths, device)?;
        model = resumed_model;
        optim = resumed_optim;
        state.step = meta.step;
        state.epoch = meta.epoch;
        state.best_map = meta.best_map;
        println!(
            "resumed from {} (step {}, epoch {}, best mAP {:.4})",
            resume, meta.step, meta.epoch, meta.best_map
        );
    }

    let tag = args.model.tag();
    let out_dir = Path::new(&args.out_dir);
    let mut run_log = fs::File::create(out_dir.join(format!("{tag}_run.log")))
        .with_context(|| "cannot create run log")?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut sampler = BatchSampler::new(train.len(), &mut rng);
    let batch_size = args.batch_size.max(1);
    let num_classes = train.num_classes;

    while state.step < args.max_steps {
        let block = args.eval_stride.min(args.max_steps - state.step).max(1);
        for _ in 0..block {
            let (indices, wrapped) = sampler.next_batch(batch_size, &mut rng);
            if wrapped {
                state.epoch += 1;
                if args.save_every_epoch {
                    let paths = CheckpointPaths::new(out_dir.join(format!("{tag}_latest")));
                    save_checkpoint(&model, &optim, &meta_of(&state), &paths)?;
                }
            }

            let (images, labels, weights, side) =
                train_batch_arrays(train, &indices, crop, &mut rng);
            let n = indices.len();
            let images = Tensor::<ADBackend, 4>::from_data(
                TensorData::new(images, [n, 3, side, side]),
                device,
            );
            let targets = Tensor::<ADBackend, 2>::from_data(
                TensorData::new(labels, [n, num_classes]),
                device,
            );
            let weights = Tensor::<ADBackend, 2>::from_data(
                TensorData::new(weights, [n, num_classes]),
                device,
            );

            let logits = model.forward(images, RunMode::Train);
            let loss = masked_sigmoid_cross_entropy(logits, targets, weights);
            let loss_value = scalar(loss.clone().detach());
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            let lr = schedule.lr_at(state.step, state.epoch);
            model = optim.step(lr, model, grads);
            state.step += 1;

            if state.step % args.log_every.max(1) == 0 {
                println!(
                    "step {:>6} epoch {:>3} lr {:.6} loss {:.4}",
                    state.step, state.epoch, lr, loss_value
                );
                writeln!(
                    run_log,
                    "step {} epoch {} lr {:.6} loss {:.4}",
                    state.step, state.epoch, lr, loss_value
                )?;
            }
        }

        let (aps, map) = evaluate(&model, eval, batch_size, device)?;
        print_eval_report(eval, &aps, map, &mut rng);
        writeln!(
            run_log,
            "eval step {} mAP {}",
            state.step,
            map.map_or_else(|| "undefined".to_string(), |m| format!("{m:.4}"))
        )?;

        state.history.push(EvalPoint {
            step: state.step,
            mean_ap: map.unwrap_or(f32::NAN),
        });
        write_history_csv(&out_dir.join(format!("{tag}_map.csv")), &state.history)?;

        if let Some(map) = map {
            if map > state.best_map {
                state.best_map = map;
                let paths = CheckpointPaths::new(out_dir.join(format!("{tag}_best")));
                save_checkpoint(&model, &optim, &meta_of(&state), &paths)?;
                println!("new best mAP {map:.4}; checkpoint saved");
            }
        }
    }

    println!(
        "training done after {} steps; best mAP {:.4}",
        state.step, state.best_map
    );
    Ok(())
}

fn meta_of(state: &TrainState) -> CheckpointMeta {
    CheckpointMeta {
        epoch: state.epoch,
        step: state.step,
        best_map: state.best_map,
    }
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .first()
        .copied()
        .unwrap_or(0.0)
}

/// Full predict pass over a split: sigmoid probabilities per sample, then
/// per-class AP and its mean.
pub fn evaluate<B: Backend, M: ImageClassifier<B>>(
    model: &M,
    split: &VocSplit,
    batch_size: usize,
    device: &B::Device,
) -> anyhow::Result<(Vec<Option<f32>>, Option<f32>)> {
    let side = split.side;
    let c = split.num_classes;
    let mut scores: Vec<f32> = Vec::with_capacity(split.len() * c);

    let batch_size = batch_size.max(1);
    let mut start = 0;
    while start < split.len() {
        let end = (start + batch_size).min(split.len());
        let mut buf = Vec::with_capacity((end - start) * 3 * side * side);
        for image in &split.images[start..end] {
            buf.extend_from_slice(image);
        }
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(buf, [end - start, 3, side, side]),
            device,
        );
        let logits = model.forward(images, RunMode::Predict);
        let probs = burn::tensor::activation::sigmoid(logits);
        let chunk = probs
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("cannot read prediction tensor: {e:?}"))?;
        scores.extend_from_slice(&chunk);
        start = end;
    }

    let aps = average_precision(&split.labels, &scores, &split.weights, c);
    let map = mean_ap(&aps);
    Ok((aps, map))
}

fn print_split_summary(name: &str, split: &VocSplit) {
    let summary = summarize(split);
    let positives: usize = summary.positives.iter().sum();
    let ignored: usize = summary.ignored.iter().sum();
    println!(
        "split {name}: {} samples at {}x{}, {positives} positive labels, {ignored} ignored entries",
        summary.samples, split.side, split.side
    );
}

fn print_eval_report(
    eval: &VocSplit,
    aps: &[Option<f32>],
    map: Option<f32>,
    rng: &mut StdRng,
) {
    // Diagnostic baselines: random scores and the labels themselves.
    let c = eval.num_classes;
    let random: Vec<f32> = (0..eval.labels.len()).map(|_| rng.gen::<f32>()).collect();
    let random_map = mean_ap(&average_precision(&eval.labels, &random, &eval.weights, c));
    let gt_map = mean_ap(&average_precision(&eval.labels, &eval.labels, &eval.weights, c));

    println!("random mAP {}", fmt_ap(random_map));
    println!("ground-truth mAP {}", fmt_ap(gt_map));
    println!("obtained mAP {}", fmt_ap(map));
    println!(
        "localization score {:.4}",
        localization_score(&eval.labels, &eval.labels)
    );
    for (class, ap) in CLASS_NAMES.iter().zip(aps.iter()).take(c) {
        println!("  {class}: {}", fmt_ap(*ap));
    }
}

fn fmt_ap(ap: Option<f32>) -> String {
    ap.map_or_else(|| "undefined".to_string(), |v| format!("{v:.4}"))
}

fn write_history_csv(path: &Path, history: &[EvalPoint]) -> anyhow::Result<()> {
    let mut out = String::from("step,mean_ap\n");
    for point in history {
        out.push_str(&format!("{},{}\n", point.step, point.mean_ap));
    }
    fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))
}

fn save_checkpoint<M, O>(
    model: &M,
    optim: &O,
    meta: &CheckpointMeta,
    paths: &CheckpointPaths,
) -> anyhow::Result<()>
where
    M: AutodiffModule<ADBackend>,
    O: Optimizer<M, ADBackend>,
{
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(paths.model_path(), &recorder)
        .map_err(|e| anyhow!("failed to save model checkpoint: {e}"))?;
    recorder
        .record(optim.to_record(), paths.optim_path())
        .map_err(|e| anyhow!("failed to save optimizer state: {e}"))?;
    save_meta(&paths.meta_path(), meta)
}

fn load_checkpoint<M, O>(
    model: M,
    optim: O,
    paths: &CheckpointPaths,
    device: &<ADBackend as Backend>::Device,
) -> anyhow::Result<(M, O, CheckpointMeta)>
where
    M: AutodiffModule<ADBackend>,
    O: Optimizer<M, ADBackend>,
{
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = model
        .load_file(paths.model_path(), &recorder, device)
        .map_err(|e| anyhow!("cannot resume model from {:?}: {e}", paths.model_path()))?;
    let record = recorder
        .load(paths.optim_path(), device)
        .map_err(|e| anyhow!("cannot resume optimizer from {:?}: {e}", paths.optim_path()))?;
    let optim = optim.load_record(record);
    let meta = load_meta(&paths.meta_path())?;
    Ok((model, optim, meta))
}

/// Load a model checkpoint for inference-only use (no optimizer state).
pub fn load_model_checkpoint<B, M>(
    model: M,
    prefix: impl Into<PathBuf>,
    device: &B::Device,
) -> anyhow::Result<M>
where
    B: Backend,
    M: burn::module::Module<B>,
{
    let paths = CheckpointPaths::new(prefix);
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(paths.model_path(), &recorder, device)
        .map_err(|e| anyhow!("cannot load checkpoint {:?}: {e}", paths.model_path()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_schedule_ignores_progress() {
        let s = LrSchedule::Fixed { lr: 0.001 };
        assert_eq!(s.lr_at(0, 0), 0.001);
        assert_eq!(s.lr_at(99_999, 40), 0.001);
    }

    #[test]
    fn exponential_decay_halves_at_interval() {
        let s = LrSchedule::ExpDecayPerStep {
            base: 0.001,
            interval: 10_000,
            factor: 0.5,
        };
        assert!((s.lr_at(0, 0) - 0.001).abs() < 1e-12);
        assert!((s.lr_at(10_000, 0) - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn stepped_decay_drops_every_thirty_epochs() {
        let s = LrSchedule::SteppedPerEpoch {
            base: 0.1,
            every: 30,
            factor: 0.1,
        };
        assert!((s.lr_at(0, 29) - 0.1).abs() < 1e-12);
        assert!((s.lr_at(0, 30) - 0.01).abs() < 1e-12);
        assert!((s.lr_at(0, 60) - 0.001).abs() < 1e-12);
    }
}
