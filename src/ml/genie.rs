// ============================================================
// Layer 5 — Genie Model Orchestrator
// ============================================================
// Wraps an ArgumentGenerator together with its tokenizer and
// exposes the lifecycle the training and evaluation drivers call:
//
//   forward                 delegate to the model
//   training_step           batch → mean loss, "train/loss"
//   validation_step         batch → mean loss
//   validation_epoch_end    mean of step losses, "val/loss"
//   test_step               batch → decoded predictions
//   test_epoch_end          predictions.jsonl in ckpt_dir
//   configure_optimizers    grouped AdamW + linear schedule
//
// The variant (gen / pointer) is the type parameter M; the run
// configuration is only read, never updated.

use anyhow::{anyhow, bail, Result};
use burn::{
    module::AutodiffModule,
    optim::{AdamWConfig, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{collections::BTreeMap, marker::PhantomData, path::Path, sync::Arc};
use tokenizers::Tokenizer;

use crate::data::batcher::ArgumentBatch;
use crate::domain::{config::RunConfig, prediction::PredictionRecord};
use crate::infra::{
    predictions::{write_predictions, PREDICTIONS_FILE},
    pretrained::PretrainedDir,
    tokenizer_store::{add_marker_tokens, TokenizerStore},
};
use crate::ml::{
    bart::BartConfig,
    generation::{generate, DecodingPolicy, GenerationConfig},
    optim::{
        GroupedOptimizer, LinearWarmupDecay, ParamGroups, SchedulerDescriptor, StepInterval,
        TrainingPlan,
    },
    seq2seq::{ArgumentGenerator, Seq2SeqInput, Seq2SeqOutput, TASK_GENERATION},
};

/// Argument and trigger markers added to the pretrained vocabulary.
pub const MARKER_TOKENS: [&str; 2] = [" <arg>", " <tgr>"];

pub const SCHEDULER_NAME: &str = "linear-schedule";

/// A scalar loss plus the named values to log with it.
#[derive(Debug, Clone)]
pub struct StepOutput<B: Backend> {
    /// [1]
    pub loss: Tensor<B, 1>,
    pub log:  BTreeMap<String, Tensor<B, 1>>,
}

impl<B: Backend> StepOutput<B> {
    fn logged(key: &str, loss: Tensor<B, 1>) -> Self {
        let mut log = BTreeMap::new();
        log.insert(key.to_string(), loss.clone());
        Self { loss, log }
    }
}

pub struct OptimizerSetup<O> {
    pub plan:      TrainingPlan,
    pub optimizer: GroupedOptimizer<O>,
    pub scheduler: SchedulerDescriptor,
}

pub struct GenieModel<B: Backend, M: ArgumentGenerator<B>> {
    model:      M,
    tokenizer:  Arc<Tokenizer>,
    hparams:    RunConfig,
    generation: GenerationConfig,
    rng:        StdRng,
    _backend:   PhantomData<B>,
}

impl<B: Backend, M: ArgumentGenerator<B>> GenieModel<B, M> {
    /// Build from `<pretrained_dir>`: tokenizer.json, config.json and,
    /// when present, pytorch_model.bin.
    pub fn new(hparams: RunConfig, device: &B::Device) -> Result<Self> {
        check_variant::<B, M>(&hparams)?;

        let tokenizer  = TokenizerStore::new(&hparams.pretrained_dir).load()?;
        let pretrained = PretrainedDir::new(&hparams.pretrained_dir);
        let bart_cfg   = pretrained.load_config()?;

        let mut model = M::init(&bart_cfg, device);
        match pretrained.load_backbone::<B>(device)? {
            Some(record) => model = model.load_backbone(record),
            None => tracing::warn!(
                "No pretrained weights in '{}', starting from random initialisation",
                pretrained.path().display()
            ),
        }

        Self::from_parts(hparams, &bart_cfg, model, tokenizer)
    }

    /// Register the marker tokens and resize the model to the
    /// extended vocabulary.
    pub fn from_parts(
        hparams:       RunConfig,
        bart_cfg:      &BartConfig,
        model:         M,
        mut tokenizer: Tokenizer,
    ) -> Result<Self> {
        check_variant::<B, M>(&hparams)?;

        add_marker_tokens(&mut tokenizer, &MARKER_TOKENS);
        let vocab_size = tokenizer.get_vocab_size(true);
        let model = model.resize_token_embeddings(vocab_size);
        tracing::info!("Model '{}' ready, vocabulary size {}", M::VARIANT, vocab_size);

        let generation = GenerationConfig::new(
            DecodingPolicy::from_flag(hparams.sample_gen),
            bart_cfg.decoder_start_token_id,
            bart_cfg.eos_token_id,
            bart_cfg.pad_token_id,
        );

        Ok(Self {
            model,
            tokenizer: Arc::new(tokenizer),
            rng: StdRng::seed_from_u64(hparams.seed),
            hparams,
            generation,
            _backend: PhantomData,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn hparams(&self) -> &RunConfig {
        &self.hparams
    }

    pub fn pad_token_id(&self) -> u32 {
        self.model.pad_token_id() as u32
    }

    /// Replace the wrapped model, e.g. after an optimizer step.
    pub fn map_model(mut self, f: impl FnOnce(M) -> M) -> Self {
        self.model = f(self.model);
        self
    }

    pub fn try_map_model(mut self, f: impl FnOnce(M) -> Result<M>) -> Result<Self> {
        self.model = f(self.model)?;
        Ok(self)
    }

    pub fn forward(&self, inputs: Seq2SeqInput<B>) -> Result<Seq2SeqOutput<B>> {
        self.model.forward(inputs)
    }

    fn batch_loss(&self, batch: &ArgumentBatch<B>) -> Result<Tensor<B, 1>> {
        let output = self.forward(Seq2SeqInput {
            input_ids:              batch.input_token_ids.clone(),
            attention_mask:         batch.input_attn_mask.clone(),
            decoder_input_ids:      batch.tgt_token_ids.clone(),
            decoder_attention_mask: batch.tgt_attn_mask.clone(),
            task:                   TASK_GENERATION,
        })?;
        Ok(output.loss.mean())
    }

    pub fn training_step(&self, batch: &ArgumentBatch<B>) -> Result<StepOutput<B>> {
        Ok(StepOutput::logged("train/loss", self.batch_loss(batch)?))
    }

    pub fn validation_step(&self, batch: &ArgumentBatch<B>) -> Result<Tensor<B, 1>> {
        self.batch_loss(batch)
    }

    pub fn validation_epoch_end(&self, outputs: Vec<Tensor<B, 1>>) -> Result<StepOutput<B>> {
        if outputs.is_empty() {
            bail!("validation produced no batches");
        }
        let loss = Tensor::cat(outputs, 0).mean();
        Ok(StepOutput::logged("val/loss", loss))
    }

    /// Decode every example of the batch from its input ids alone.
    pub fn test_step(&mut self, batch: &ArgumentBatch<B>) -> Result<Vec<PredictionRecord>> {
        let batch_size = batch.doc_keys.len();
        let sequences  = self.generation.num_return_sequences;

        let output = generate(&self.model, batch.input_token_ids.clone(), &self.generation, &mut self.rng)?;
        let [rows, len] = output.dims();
        if rows != batch_size * sequences {
            bail!("decoder returned {rows} rows for {batch_size} documents");
        }
        let output = output.reshape([batch_size, sequences, len]);

        let predicted = token_rows(output.reshape([rows, len]).into_data().iter::<i64>().collect(), len);
        let src_len = batch.input_token_ids.dims()[1];
        let inputs  = token_rows(batch.input_token_ids.clone().into_data().iter::<i64>().collect(), src_len);

        let mut records = Vec::with_capacity(batch_size);
        for (idx, doc_key) in batch.doc_keys.iter().enumerate() {
            // first returned sequence of each document
            let predicted = self.decode(&predicted[idx * sequences])?;
            let input     = self.decode(&inputs[idx])?;
            records.push(PredictionRecord::new(doc_key.clone(), predicted, input));
        }
        Ok(records)
    }

    pub fn test_epoch_end(&self, outputs: Vec<Vec<PredictionRecord>>) -> Result<()> {
        let path = Path::new(&self.hparams.ckpt_dir).join(PREDICTIONS_FILE);
        write_predictions(&path, outputs.into_iter().flatten())?;
        Ok(())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| anyhow!("Cannot decode token ids: {e}"))
    }
}

impl<B, M> GenieModel<B, M>
where
    B: AutodiffBackend,
    M: ArgumentGenerator<B> + AutodiffModule<B>,
    M::InnerModule: ArgumentGenerator<B::InnerBackend>,
{
    /// Optimizer, schedule and step budget for `train_len` batches per epoch.
    pub fn configure_optimizers(&self, train_len: usize) -> Result<OptimizerSetup<impl Optimizer<M, B>>> {
        let h = &self.hparams;
        let plan = TrainingPlan::new(h.max_steps, train_len, h.accumulate_grad_batches, h.num_train_epochs)?;

        let groups   = ParamGroups::partition(self.model.named_parameters(), h.weight_decay);
        let decay    = self.adamw(groups.decay.weight_decay).init::<B, M>();
        let no_decay = self.adamw(groups.no_decay.weight_decay).init::<B, M>();
        Ok(OptimizerSetup {
            plan,
            optimizer: GroupedOptimizer::new(decay, no_decay, groups),
            scheduler: SchedulerDescriptor {
                schedule: LinearWarmupDecay::new(h.learning_rate, h.warmup_steps, plan.total_steps),
                interval: StepInterval::Step,
                name:     SCHEDULER_NAME,
            },
        })
    }

    /// Gradient clipping is applied by the trainer over the global norm,
    /// not per parameter here.
    fn adamw(&self, weight_decay: f64) -> AdamWConfig {
        AdamWConfig::new()
            .with_epsilon(self.hparams.adam_epsilon as f32)
            .with_weight_decay(weight_decay as f32)
    }

    /// Same orchestrator on the inner backend, dropout disabled.
    pub fn valid(&self) -> GenieModel<B::InnerBackend, M::InnerModule> {
        GenieModel {
            model:      self.model.valid(),
            tokenizer:  self.tokenizer.clone(),
            hparams:    self.hparams.clone(),
            generation: self.generation.clone(),
            rng:        self.rng.clone(),
            _backend:   PhantomData,
        }
    }
}

fn check_variant<B: Backend, M: ArgumentGenerator<B>>(hparams: &RunConfig) -> Result<()> {
    if hparams.model != M::VARIANT {
        bail!("configured model '{}' does not match variant '{}'", hparams.model, M::VARIANT);
    }
    Ok(())
}

fn token_rows(flat: Vec<i64>, width: usize) -> Vec<Vec<u32>> {
    flat.chunks(width.max(1))
        .map(|row| row.iter().map(|&t| t as u32).collect())
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::{batcher::ArgumentBatcher, dataset::ArgumentSample};
    use crate::domain::config::ModelVariant;
    use crate::infra::tokenizer_store::write_test_tokenizer;
    use crate::ml::{bart::tests::tiny_config, bart_gen::BartGen, pointer_gen::BartPointerGen};
    use burn::{
        backend::{Autodiff, NdArray},
        data::dataloader::batcher::Batcher,
    };

    type TB = NdArray;
    type AB = Autodiff<NdArray>;

    pub(crate) fn sample(key: &str) -> ArgumentSample {
        ArgumentSample {
            doc_key:         key.to_string(),
            input_token_ids: vec![0, 4, 5, 6, 7, 2],
            input_attn_mask: vec![1; 6],
            tgt_token_ids:   vec![0, 10, 7, 2],
            tgt_attn_mask:   vec![1; 4],
        }
    }

    pub(crate) fn test_tokenizer() -> Tokenizer {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_tokenizer(dir.path());
        Tokenizer::from_file(path).unwrap()
    }

    pub(crate) fn genie<B: Backend, M: ArgumentGenerator<B>>(hparams: RunConfig) -> GenieModel<B, M> {
        let device = Default::default();
        let cfg = tiny_config(10);
        GenieModel::from_parts(hparams, &cfg, M::init(&cfg, &device), test_tokenizer()).unwrap()
    }

    fn batch<B: Backend>(keys: &[&str]) -> ArgumentBatch<B> {
        ArgumentBatcher::<B>::new(Default::default(), 1).batch(keys.iter().map(|k| sample(k)).collect())
    }

    #[test]
    fn construction_extends_vocabulary() {
        let model = genie::<TB, BartGen<TB>>(RunConfig::default());
        assert_eq!(model.model().vocab_size(), 12);
        assert!(model.tokenizer.token_to_id(" <tgr>").is_some());
    }

    #[test]
    fn mismatched_variant_is_rejected() {
        let cfg = tiny_config(10);
        let hparams = RunConfig { model: ModelVariant::Pointer, ..Default::default() };
        let model = BartGen::<TB>::init(&cfg, &Default::default());
        assert!(GenieModel::from_parts(hparams, &cfg, model, test_tokenizer()).is_err());
    }

    #[test]
    fn training_step_logs_scalar_loss() {
        let model = genie::<TB, BartGen<TB>>(RunConfig::default());
        let out = model.training_step(&batch(&["a", "b"])).unwrap();
        assert_eq!(out.loss.dims(), [1]);
        assert!(out.log.contains_key("train/loss"));
        assert_eq!(model.validation_step(&batch(&["a"])).unwrap().dims(), [1]);
    }

    #[test]
    fn validation_epoch_end_averages_losses() {
        let model = genie::<TB, BartGen<TB>>(RunConfig::default());
        let device = Default::default();
        let outputs = [2.0f32, 4.0, 6.0]
            .iter()
            .map(|&v| Tensor::<TB, 1>::from_floats([v], &device))
            .collect();

        let out = model.validation_epoch_end(outputs).unwrap();
        let loss: f32 = out.loss.into_scalar();
        assert!((loss - 4.0).abs() < 1e-6);
        assert!(out.log.contains_key("val/loss"));
        assert!(model.validation_epoch_end(Vec::new()).is_err());
    }

    #[test]
    fn test_step_returns_one_record_per_document() {
        for sample_gen in [false, true] {
            let hparams = RunConfig { model: ModelVariant::Pointer, sample_gen, ..Default::default() };
            let mut model = genie::<TB, BartPointerGen<TB>>(hparams);
            let records = model.test_step(&batch(&["d1", "d2", "d3"])).unwrap();

            let keys: Vec<&str> = records.iter().map(|r| r.doc_key.as_str()).collect();
            assert_eq!(keys, vec!["d1", "d2", "d3"]);
            assert_eq!(records[0].input, "the attack killed people");
        }
    }

    #[test]
    fn test_epoch_end_writes_predictions_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let hparams = RunConfig { ckpt_dir: dir.path().to_string_lossy().into_owned(), ..Default::default() };
        let model = genie::<TB, BartGen<TB>>(hparams);

        model.test_epoch_end(vec![
            vec![PredictionRecord::new("a", "p1", "i1"), PredictionRecord::new("b", "p2", "i2")],
            vec![PredictionRecord::new("c", "p3", "i3")],
        ]).unwrap();

        let text = std::fs::read_to_string(dir.path().join("predictions.jsonl")).unwrap();
        let rows: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["doc_key"], "c");
        assert_eq!(rows[0].as_object().unwrap().len(), 3);
    }

    #[test]
    fn configure_optimizers_trains_one_step() {
        let hparams = RunConfig { max_steps: 100, accumulate_grad_batches: 2, learning_rate: 1e-3, ..Default::default() };
        let model = genie::<AB, BartGen<AB>>(hparams);

        let setup = model.configure_optimizers(20).unwrap();
        assert_eq!(setup.plan.num_train_epochs, 3);
        assert_eq!(setup.plan.total_steps, 100);
        assert_eq!(setup.scheduler.name, "linear-schedule");
        assert_eq!(setup.scheduler.interval, StepInterval::Step);
        assert!(!setup.optimizer.groups().no_decay.params.is_empty());

        let mut optimizer = setup.optimizer;
        let step = model.training_step(&batch(&["a", "b"])).unwrap();
        let before: f32 = step.loss.clone().into_scalar();
        let grads = optimizer.split::<AB, _>(step.loss.backward(), model.model());
        let model = model.map_model(|m| optimizer.step::<AB, _>(1e-3, m, grads));

        let after: f32 = model.training_step(&batch(&["a", "b"])).unwrap().loss.into_scalar();
        assert!(after.is_finite());
        assert!(after != before);

        let valid = model.valid();
        assert_eq!(valid.validation_step(&batch(&["a"])).unwrap().dims(), [1]);
    }
}
