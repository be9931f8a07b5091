use std::path::Path;

use clap::Parser;
use models::{
    load_safetensors, ScratchNet, ScratchNetConfig, Vgg16, Vgg16Config, Vgg16Localizer,
    Vgg16LocalizerConfig,
};
use training::trainer::{evaluate, load_model_checkpoint, ModelKind};
use training::{localization_score, TrainBackend};
use voc_dataset::{load_split, LoadMode, VocSplit, CLASS_NAMES};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a classifier checkpoint on a VOC split (per-class AP and mAP)"
)]
struct Args {
    /// Path to the VOC dataset root (contains ImageSets/ and JPEGImages/).
    #[arg(long, default_value = "data/VOC2007")]
    data_dir: String,
    /// Model variant to evaluate.
    #[arg(long, value_enum, default_value_t = ModelKind::Scratch)]
    model: ModelKind,
    /// Split to evaluate on.
    #[arg(long, default_value = "test")]
    split: String,
    /// Evaluation batch size.
    #[arg(long, default_value_t = 10)]
    batch_size: usize,
    /// Image decode worker threads (0 lets rayon pick).
    #[arg(long, default_value_t = 0)]
    workers: usize,
    /// Checkpoint prefix to load (e.g. checkpoints/vgg_best). Omitted means a
    /// freshly initialized model.
    #[arg(long)]
    checkpoint: Option<String>,
    /// Pretrained safetensors archive, applied when no checkpoint is given.
    #[arg(long)]
    pretrained: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut pipeline = args.model.pipeline_config();
    pipeline.workers = args.workers;
    let split = load_split(
        Path::new(&args.data_dir),
        &args.split,
        &pipeline,
        LoadMode::Eval,
        args.model.label_policy(),
    )?;
    println!(
        "split {}: {} samples at {}x{}",
        args.split,
        split.len(),
        split.side,
        split.side
    );

    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();

    let (aps, map) = match args.model {
        ModelKind::Scratch => {
            let mut model =
                ScratchNet::<TrainBackend>::new(ScratchNetConfig::default(), &device);
            if let Some(prefix) = &args.checkpoint {
                model = load_model_checkpoint::<TrainBackend, _>(model, prefix, &device)?;
            }
            evaluate(&model, &split, args.batch_size, &device)?
        }
        ModelKind::Vgg => {
            let cfg = Vgg16Config::default();
            let mut model = match (&args.checkpoint, &args.pretrained) {
                (None, Some(path)) => {
                    let archive = load_safetensors(Path::new(path))?;
                    Vgg16::<TrainBackend>::from_pretrained(cfg, &archive, &device)?
                }
                _ => Vgg16::<TrainBackend>::new(cfg, &device),
            };
            if let Some(prefix) = &args.checkpoint {
                model = load_model_checkpoint::<TrainBackend, _>(model, prefix, &device)?;
            }
            evaluate(&model, &split, args.batch_size, &device)?
        }
        ModelKind::VggLocalizer => {
            let mut model =
                Vgg16Localizer::<TrainBackend>::new(Vgg16LocalizerConfig::default(), &device);
            if let (None, Some(path)) = (&args.checkpoint, &args.pretrained) {
                let archive = load_safetensors(Path::new(path))?;
                let (initialized, _) = model.with_pretrained_features(&archive);
                model = initialized;
            }
            if let Some(prefix) = &args.checkpoint {
                model = load_model_checkpoint::<TrainBackend, _>(model, prefix, &device)?;
            }
            evaluate(&model, &split, args.batch_size, &device)?
        }
    };

    print_report(&split, &aps, map);
    Ok(())
}

fn print_report(split: &VocSplit, aps: &[Option<f32>], map: Option<f32>) {
    for (class, ap) in CLASS_NAMES.iter().zip(aps.iter()).take(split.num_classes) {
        println!("  {class}: {}", fmt_ap(*ap));
    }
    println!("mAP {}", fmt_ap(map));
    println!(
        "localization score {:.4}",
        localization_score(&split.labels, &split.labels)
    );
}

fn fmt_ap(ap: Option<f32>) -> String {
    ap.map_or_else(|| "undefined".to_string(), |v| format!("{v:.4}"))
}
