/****************************************************************
 * $ID: mnist.rs  	Tue 21 Nov 2023 15:27:08+0800               *
 *                                                              *
 * Maintainer: 范美辉 (MeiHui FAN) <mhfan@ustc.edu>              *
 * Copyright (c) 2023 M.H.Fan, All rights reserved.             *
 ****************************************************************/

//  https://github.com/Tracel-AI/burn/tree/main/examples/custom-training-loop

pub mod model {

use burn::{config::Config, module::Module, tensor::{backend::Backend, Tensor},
    nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu},
};
use crate::dataset::{HEIGHT, WIDTH};

/// A simple MLP: flatten, linear, batch norm, ReLU, dropout, linear.
#[derive(Module, Debug)] pub struct Model<B: Backend> {
    fc1: Linear<B>,
    norm: BatchNorm<B, 0>,
    activation: Relu,
    dropout: Dropout,
    fc2: Linear<B>,
}

impl<B: Backend> Model<B> {
    /// # Shapes
    ///   - Images [batch_size, height, width]
    ///   - Output [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch_size, height, width] = images.dims();

        let x = images.reshape([batch_size, height * width]);
        let x = self.fc1.forward(x);    // [batch_size, hidden_size]
        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.fc2.forward(x)
    }
}

#[derive(Config, Debug)] pub struct ModelConfig {
    pub dropout: f64,
    #[config(default = 256)] pub hidden_size: usize,
    #[config(default =  10)] pub num_classes: usize,
}

impl ModelConfig {  // Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> { Model {
        fc1: LinearConfig::new(WIDTH * HEIGHT, self.hidden_size).init(device),
        norm: BatchNormConfig::new(self.hidden_size).init(device), activation: Relu::new(),
        dropout: DropoutConfig::new(self.dropout).init(),
        fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
    } }
}

impl Default for ModelConfig { fn default() -> Self { Self::new(0.5) } }

}

pub mod data {

use burn::{tensor::{backend::Backend, ElementConversion, Int, Tensor, TensorData},
    data::{dataloader::batcher::Batcher, dataset::vision::MnistItem},
};
use crate::dataset::{HEIGHT, WIDTH};

#[derive(Clone)] pub struct MnistBatcher<B: Backend> { device: B::Device, }

impl<B: Backend> MnistBatcher<B> { pub fn new(device: B::Device) -> Self { Self { device } } }

impl<B: Backend> Batcher<MnistItem, MnistBatch<B>> for MnistBatcher<B> {
    fn batch(&self, items: Vec<MnistItem>) -> MnistBatch<B> {
        let images = items.iter().map(|item|
            TensorData::from(item.image).convert::<B::FloatElem>()).map(|data|
            Tensor::<B, 2>::from_data(data, &self.device)).map(|tensor|
            tensor.reshape([1, HEIGHT, WIDTH])).map(|tensor|
            tensor / 255).collect();    // scale into [0, 1], no standardization

        let targets = items.iter()
            .map(|item| Tensor::<B, 1, Int>::from_data(
                [(item.label as i64).elem::<B::IntElem>()], &self.device)).collect();

        MnistBatch { images: Tensor::cat( images, 0).to_device(&self.device),
                    targets: Tensor::cat(targets, 0).to_device(&self.device) }
    }
}

#[derive(Clone, Debug)] pub struct MnistBatch<B: Backend> {
    pub targets: Tensor<B, 1, Int>,
    pub  images: Tensor<B, 3>,
}

}

pub mod training {

use super::{model::{Model, ModelConfig}, data::{MnistBatch, MnistBatcher}};
use crate::{row, dataset::{HEIGHT, WIDTH}, error::{Error, Result},
    tracker::{Cell, Image, Table, Tracker}};
use burn::{config::Config, module::{AutodiffModule, Module}, record::CompactRecorder,
    tensor::{activation::softmax, backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor},
    nn::loss::CrossEntropyLossConfig, optim::{AdamConfig, GradientsParams, Optimizer},
    data::{dataloader::{DataLoader, DataLoaderBuilder}, dataset::{Dataset, vision::MnistItem}},
};

#[derive(Config)] pub struct ExperimentConfig {
    pub model: ModelConfig,
    pub optimizer: AdamConfig,
    #[config(default =   5)] pub epochs: usize,
    #[config(default = 128)] pub batch_size: usize,
    #[config(default = 1.0e-3)] pub learning_rate: f64,
    /// keep every n-th image of both splits
    #[config(default =   5)] pub subset_step: usize,
    #[config(default =   2)] pub num_workers: usize,
    #[config(default =  42)] pub seed: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)] pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

pub(crate) fn burn_error<E: std::fmt::Debug>(err: E) -> Error { Error::Burn(format!("{err:?}")) }

/// Train one experiment, committing metrics to `tracker`, and return the last validation.
/// The trained model is saved into the tracker's run directory, if any.
pub fn train<B, DT, DV>(config: &ExperimentConfig, dataset_train: DT, dataset_valid: DV,
    device: B::Device, tracker: &mut dyn Tracker) -> Result<Evaluation>
    where B: AutodiffBackend, DT: Dataset<MnistItem> + 'static, DV: Dataset<MnistItem> + 'static {
    if config.batch_size == 0 { return Err(Error::Config("batch size must be positive".into())) }
    if dataset_train.is_empty() || dataset_valid.is_empty() {
        return Err(Error::Config("empty train or validation dataset".into()))
    }
    B::seed(config.seed);

    log::info!("Define dataloaders...");
    let n_steps_per_epoch = dataset_train.len().div_ceil(config.batch_size);
    log::info!("  #train samples: {}", dataset_train.len());
    log::info!("  #valid samples: {}", dataset_valid.len());
    log::info!("  n_steps_per_epoch: {n_steps_per_epoch}");

    let dataloader_train = DataLoaderBuilder::new(MnistBatcher::<B>::new(device.clone()))
        .batch_size(config.batch_size).shuffle(config.seed)
        .num_workers(config.num_workers).build(dataset_train);
    // single threaded, so that batch 0 always holds the first validation items
    let dataloader_valid = DataLoaderBuilder::new(
        MnistBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(2 * config.batch_size).build(dataset_valid);

    let mut model = config.model.init::<B>(&device);
    let mut optim = config.optimizer.init();
    let loss_fn = CrossEntropyLossConfig::new().init::<B>(&device);
    log::info!("Model: MLP {} -> {} -> {}, dropout {:.3}, {} parameters",
        WIDTH * HEIGHT, config.model.hidden_size,
        config.model.num_classes, config.model.dropout, model.num_params());
    log::info!("Loss function: cross entropy");
    log::info!("Optimizer: Adam {}", config.optimizer);

    let (mut example_ct, mut step_ct) = (0usize, 0usize);
    let mut evaluation = Evaluation::default();
    for epoch in 0..config.epochs {
        let (mut metrics, mut train_loss) = (row!{}, 0f64);

        let mut batches = dataloader_train.iter().peekable();
        while let Some(batch) = batches.next() {
            let batch_len = batch.targets.dims()[0];
            let output = model.forward(batch.images);
            let loss = loss_fn.forward(output, batch.targets);
            train_loss = loss.clone().into_scalar().elem::<f64>();

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.learning_rate, model, grads);

            example_ct += batch_len;
            metrics = row!{
                "train/train_loss" => train_loss,
                "train/epoch" => epoch,
                "train/example_ct" => example_ct,
                "train/step_ct" => step_ct,
            };

            // the last step of an epoch is committed along with the validation metrics
            if batches.peek().is_some() { tracker.log(metrics.clone())?; }
            step_ct += 1;
        }

        let table_batch = (epoch + 1 == config.epochs).then_some(0);
        let (valid, table) = validate(&model.valid(), dataloader_valid.as_ref(), table_batch)?;
        if let Some(table) = table { tracker.log_table("predictions_table", &table)?; }

        metrics.extend(row!{ "val/val_loss" => valid.loss, "val/val_accuracy" => valid.accuracy });
        tracker.log(metrics)?;

        log::info!("Epoch: {epoch}");
        log::info!("  Train Loss: {train_loss:.3}");
        log::info!("  Valid Loss: {:.3}", valid.loss);
        log::info!("  Accuracy: {:.3}", valid.accuracy);
        evaluation = valid;
    }

    if let Some(dir) = tracker.dir() {
        model.valid().save_file(dir.join("model"), &CompactRecorder::new())
            .map_err(burn_error)?;
    }   Ok(evaluation)
}

/// Loss and accuracy over the whole loader; with `table_batch` the predictions of that
/// batch are returned as an (image, pred, target, score_0..) table.
pub fn validate<B: Backend>(model: &Model<B>, dataloader: &dyn DataLoader<MnistBatch<B>>,
    table_batch: Option<usize>) -> Result<(Evaluation, Option<Table>)> {
    let (mut loss_sum, mut correct, mut total) = (0f64, 0usize, 0usize);
    let mut table = None;

    for (i, batch) in dataloader.iter().enumerate() {
        let batch_len = batch.targets.dims()[0];
        let output = model.forward(batch.images.clone());
        let loss = CrossEntropyLossConfig::new().init::<B>(&output.device())
            .forward(output.clone(), batch.targets.clone());
        loss_sum += loss.into_scalar().elem::<f64>() * batch_len as f64;

        let predicted = output.clone().argmax(1).squeeze::<1>(1);
        correct += predicted.clone().equal(batch.targets.clone())
            .int().sum().into_scalar().elem::<i64>() as usize;
        total += batch_len;

        if table_batch == Some(i) {
            table = Some(prediction_table(batch.images, predicted,
                batch.targets, softmax(output, 1))?);
        }
    }

    if total == 0 { return Err(Error::Config("empty validation dataset".into())) }
    Ok((Evaluation { loss: loss_sum / total as f64, accuracy: correct as f64 / total as f64 },
        table))
}

fn prediction_table<B: Backend>(images: Tensor<B, 3>, predicted: Tensor<B, 1, Int>,
    targets: Tensor<B, 1, Int>, probs: Tensor<B, 2>) -> Result<Table> {
    let ([_, height, width], [_, classes]) = (images.dims(), probs.dims());
    let pixels: Vec<u8> = images.into_data().iter::<f32>()
        .map(|value| (value * 255.0).round().clamp(0.0, 255.0) as u8).collect();
    let predicted: Vec<i64> = predicted.into_data().iter::<i64>().collect();
    let   targets: Vec<i64> =   targets.into_data().iter::<i64>().collect();
    let     probs: Vec<f32> =     probs.into_data().iter::<f32>().collect();

    let mut table = Table::new(["image", "pred", "target"].map(String::from)
        .into_iter().chain((0..classes).map(|i| format!("score_{i}"))));
    for (((image, pred), target), scores) in pixels.chunks_exact(height * width)
        .zip(predicted).zip(targets).zip(probs.chunks_exact(classes)) {
        let mut row = vec![Image::new(width as u32, height as u32, image.to_vec())?.into(),
            Cell::Int(pred), Cell::Int(target)];
        row.extend(scores.iter().map(|&score| Cell::from(score)));
        table.add_row(row)?;
    }   Ok(table)
}

}

use std::path::Path;
use burn::{tensor::{activation::softmax, backend::Backend}, data::dataset::vision::MnistItem};
use crate::error::Result;

#[derive(Clone, Debug, PartialEq)] pub struct Prediction {
    pub predicted: usize,
    pub expected: usize,
    pub probabilities: Vec<f32>,
}

/// Classify one item with the model saved in a tracker run directory.
pub fn infer<B: Backend>(run_dir: &Path, device: B::Device, item: MnistItem)
    -> Result<Prediction> {
    use self::{data::MnistBatcher, training::{burn_error, ExperimentConfig}};
    use burn::{config::Config, module::Module, data::dataloader::batcher::Batcher,
        record::CompactRecorder,
    };

    let config = ExperimentConfig::load(run_dir.join("config.json")).map_err(burn_error)?;
    let model = config.model.init::<B>(&device)
        .load_file(run_dir.join("model"), &CompactRecorder::new(), &device)
        .map_err(burn_error)?;

    let expected = item.label as usize;
    let batch = MnistBatcher::<B>::new(device).batch(vec![item]);
    let probabilities: Vec<f32> = softmax(model.forward(batch.images), 1)
        .into_data().iter::<f32>().collect();
    let predicted = probabilities.iter().enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1)).map_or(0, |(i, _)| i);

    Ok(Prediction { predicted, expected, probabilities })
}
