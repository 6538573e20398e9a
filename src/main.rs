use std::{env, fs};

use anyhow::{anyhow, Context};
use burn::{
    backend::{Autodiff, NdArray},
    config::Config,
    module::Module,
    record::CompactRecorder,
};
use lenet::{AdamConfig, Classifier, Image, ImageDataset, ImageItem, Splits, TrainingConfig};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

const ARTIFACT_DIR: &str = "/tmp/lenet";
const NUM_CLASSES: usize = 4;
const IMAGE_SHAPE: [usize; 3] = [32, 32, 3];
const NOISE_LEVEL: f32 = 0.1;

type TrainBackend = Autodiff<NdArray>;

/// A colour tint plus stripes whose orientation and frequency depend on the class.
fn synthetic_image(class: usize, rng: &mut StdRng) -> lenet::Result<Image> {
    let [height, width, channels] = IMAGE_SHAPE;
    let horizontal = class % 2 == 0;
    let period = 2 * (class / 2 + 2);
    let mut pixels = Vec::with_capacity(height * width * channels);

    for row in 0..height {
        for col in 0..width {
            let position = if horizontal { row } else { col };
            let stripe = if (position / (period / 2)) % 2 == 0 { 0.5 } else { -0.5 };
            for channel in 0..channels {
                let tint = if channel == class % channels { 0.5 } else { 0.0 };
                let noise: f32 = rng.sample(StandardNormal);
                pixels.push(tint + stripe + noise * NOISE_LEVEL);
            }
        }
    }

    Image::new(IMAGE_SHAPE, pixels)
}

fn synthetic_split(count: usize, rng: &mut StdRng) -> lenet::Result<ImageDataset> {
    let items = (0..count)
        .map(|index| {
            let label = index % NUM_CLASSES;
            synthetic_image(label, rng).map(|image| ImageItem { image, label })
        })
        .collect::<lenet::Result<Vec<_>>>()?;

    Ok(ImageDataset::new(items))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => TrainingConfig::load(&path)
            .map_err(|err| anyhow!("failed to load config {path}: {err:?}"))?,
        None => TrainingConfig::new(AdamConfig::new()),
    };

    fs::create_dir_all(ARTIFACT_DIR).context("failed to create the artifact directory")?;
    config
        .save(format!("{ARTIFACT_DIR}/config.json"))
        .context("failed to save the training config")?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let splits = Splits {
        train: synthetic_split(512, &mut rng)?,
        valid: synthetic_split(128, &mut rng)?,
        test: synthetic_split(128, &mut rng)?,
    };
    let (samples, expected): (Vec<_>, Vec<_>) = splits
        .test
        .items()
        .iter()
        .take(8)
        .map(|item| (item.image.clone(), item.label))
        .unzip();

    let device = Default::default();
    let mut classifier = Classifier::<TrainBackend>::new(splits, config, device)?;
    let report = classifier.train(classifier.config().num_epochs)?;
    log::info!("Stopped: {:?}", report.stop_reason);
    if let Some(last) = report.history.last() {
        log::info!("Last epoch: {:?}", last);
    }

    let report_json =
        serde_json::to_string_pretty(&report).context("failed to serialize the report")?;
    fs::write(format!("{ARTIFACT_DIR}/report.json"), report_json)
        .context("failed to save the training report")?;

    classifier
        .model()
        .clone()
        .save_file(format!("{ARTIFACT_DIR}/model"), &CompactRecorder::new())
        .map_err(|err| anyhow!("failed to save the model: {err:?}"))?;

    let predicted = classifier.predict(&samples)?;
    println!("predicted = {predicted:?}");
    println!("expected  = {expected:?}");

    Ok(())
}
