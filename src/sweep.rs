/****************************************************************
 * $ID: sweep.rs  	Fri 16 Oct 2026 09:40:51+0800               *
 *                                                              *
 * Maintainer: 范美辉 (MeiHui FAN) <mhfan@ustc.edu>              *
 * Copyright (c) 2026 M.H.Fan, All rights reserved.             *
 ****************************************************************/

use std::{path::PathBuf, sync::Arc};
use burn::{config::Config, tensor::backend::AutodiffBackend,
    data::dataset::{Dataset, vision::MnistItem},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use crate::{dataset::{MnistDataset, StridedDataset}, error::{Error, Result},
    mnist::training::{train, Evaluation, ExperimentConfig},
    tracker::{FileTracker, NoopTracker, Tracker},
};

/// Launch `runs` experiments, each with a dropout rate drawn uniformly from
/// `[dropout_min, dropout_max)`.
#[derive(Config)] pub struct SweepConfig {
    pub project: String,
    /// template of each run, its dropout gets overwritten
    pub experiment: ExperimentConfig,
    #[config(default = 5)] pub runs: usize,
    #[config(default = 0.01)] pub dropout_min: f64,
    #[config(default = 0.80)] pub dropout_max: f64,
    #[config(default = 42)] pub seed: u64,
}

impl SweepConfig {
    pub fn sample_dropouts(&self) -> Result<Vec<f64>> {
        let (min, max) = (self.dropout_min, self.dropout_max);
        if !(0.0 <= min && min < max && max < 1.0) {
            return Err(Error::Config(format!("dropout range [{min}, {max}) not within [0, 1)")))
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        Ok((0..self.runs).map(|_| rng.gen_range(min..max)).collect())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)] pub enum TrackerMode {
    /// record runs under the tracker directory
    #[value(alias = "dryrun")] Offline,
    /// keep metrics in memory only
    Disabled,
}

/// Process-level locations, usually from `TORCH_HUB`, `WANDB_DIR` and `WANDB_MODE`.
#[derive(Clone, Debug)] pub struct Settings {
    pub data_dir: PathBuf,
    pub tracker_dir: PathBuf,
    pub mode: TrackerMode,
}

impl Settings {
    pub fn tracker_root(&self) -> PathBuf { self.tracker_dir.join("mnist_exp") }

    pub fn open_tracker<C: Serialize>(&self, project: &str, config: &C)
        -> Result<Box<dyn Tracker>> { Ok(match self.mode {
        TrackerMode::Offline  => Box::new(FileTracker::init(&self.tracker_root(), project, config)?),
        TrackerMode::Disabled => Box::new(NoopTracker::new()),
    }) }
}

#[derive(Clone, Debug)] pub struct RunSummary {
    pub dropout: f64,
    pub evaluation: Evaluation,
    pub dir: Option<PathBuf>,
}

/// Load both MNIST splits once, then train every run of the sweep on their strided subsets.
pub fn run<B: AutodiffBackend>(sweep: &SweepConfig, settings: &Settings, device: B::Device)
    -> Result<Vec<RunSummary>> {
    let step = sweep.experiment.subset_step;
    let dataset_train = StridedDataset::new(MnistDataset::train(&settings.data_dir)?, step)?;
    let dataset_valid = StridedDataset::new(MnistDataset::test (&settings.data_dir)?, step)?;

    run_with::<B, _, _>(sweep, settings, Arc::new(dataset_train), Arc::new(dataset_valid), device)
}

pub fn run_with<B, DT, DV>(sweep: &SweepConfig, settings: &Settings,
    dataset_train: Arc<DT>, dataset_valid: Arc<DV>, device: B::Device) -> Result<Vec<RunSummary>>
    where B: AutodiffBackend, DT: Dataset<MnistItem> + 'static, DV: Dataset<MnistItem> + 'static {
    sweep.sample_dropouts()?.into_iter().enumerate().map(|(i, dropout)| {
        let mut config = sweep.experiment.clone();
        config.model.dropout = dropout;
        config.seed = sweep.experiment.seed.wrapping_add(i as u64);

        let mut tracker = settings.open_tracker(&sweep.project, &config)?;
        log::info!("{} version: {} (git {}, built {})", env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"), env!("BUILD_GIT_HASH"), env!("BUILD_TIMESTAMP"));
        log::info!("Computing device: {} {device:?}", B::name());
        log::info!("Dataset location: {}", settings.data_dir.display());
        log::info!("Generated file location by tracker: {}", tracker.dir()
            .map_or_else(|| "<disabled>".into(), |dir| dir.display().to_string()));
        log::info!("Run {}/{} config: {config}", i + 1, sweep.runs);

        let evaluation = train::<B, _, _>(&config, dataset_train.clone(),
            dataset_valid.clone(), device.clone(), tracker.as_mut())?;
        // the validation split is the MNIST test split
        tracker.set_summary("test_accuracy", serde_json::json!(evaluation.accuracy))?;
        tracker.finish()?;

        Ok(RunSummary { dropout, evaluation, dir: tracker.dir().map(PathBuf::from) })
    }).collect()
}
