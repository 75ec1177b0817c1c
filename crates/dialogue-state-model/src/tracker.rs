//! End-to-end tracker: encoder → classifier → aggregator → decoder.

use candle_core::Tensor;
use candle_nn::VarBuilder;
use dialogue_state_core::{
    truncate_at_eos, BeliefState, BeliefStateUpdater, Operation, SlotCatalog, TrackerConfig,
    ValueDecoder,
};
use rand::Rng;
use tracing::{debug, info};

use crate::aggregator::StateAggregator;
use crate::classifier::{OpSelection, OperationClassifier};
use crate::context::{ExecutionContext, TurnBatch, TurnLabels};
use crate::decoder::{DecodeMode, DecoderInputs, PointerGeneratorDecoder, TeacherForcingSchedule};
use crate::encoder::{ContextualEncoder, LookupEncoder};
use crate::error::{ModelError, ModelResult};
use crate::loss::{LossComponents, TrackerLoss};

/// Per-call switches for [`DialogueStateTracker::forward`].
#[derive(Debug, Clone, Copy)]
pub struct ForwardOptions<'a> {
    pub op_selection: OpSelection<'a>,
    /// Decoder batch width; `None` uses the largest update count in the batch.
    pub max_update: Option<usize>,
    /// Generation steps per update slot.
    pub max_value: usize,
    pub mode: DecodeMode<'a>,
}

impl<'a> ForwardOptions<'a> {
    /// Predicted operations, greedy decoding.
    pub fn inference(max_value: usize) -> Self {
        Self {
            op_selection: OpSelection::Predicted,
            max_update: None,
            max_value,
            mode: DecodeMode::Greedy,
        }
    }

    /// Gold operations and label dimensions; `mode` picks the next-input source.
    pub fn supervised(labels: &'a TurnLabels, mode: DecodeMode<'a>) -> Self {
        Self {
            op_selection: OpSelection::Gold(&labels.op_ids),
            max_update: Some(labels.max_update()),
            max_value: labels.max_value(),
            mode,
        }
    }
}

/// Everything one forward pass produces.
#[derive(Debug, Clone)]
pub struct TrackerOutput {
    /// [B, n_domain]
    pub domain_scores: Tensor,
    /// [B, S, n_op]
    pub op_scores: Tensor,
    /// [B, max_update, max_value, V]
    pub gen_scores: Tensor,
    pub domain_ids: Vec<u32>,
    /// Operation ids used for aggregation (predicted or gold).
    pub op_ids: Vec<Vec<u32>>,
    /// Catalog indices of each row's update slots.
    pub update_slots: Vec<Vec<usize>>,
    /// Argmax ids [B][max_update][max_value].
    pub token_ids: Vec<Vec<Vec<u32>>>,
}

/// Decisions for one turn, ready for the belief-state updater.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnPrediction {
    pub domain_id: u32,
    /// One per catalog slot.
    pub operations: Vec<Operation>,
    /// Catalog indices of the UPDATE slots.
    pub update_slots: Vec<usize>,
    /// Generated ids per UPDATE slot, truncated at EOS.
    pub generated: Vec<Vec<u32>>,
}

/// Full tracking model over a contextual encoder.
#[derive(Debug, Clone)]
pub struct DialogueStateTracker<E: ContextualEncoder = LookupEncoder> {
    encoder: E,
    classifier: OperationClassifier,
    aggregator: StateAggregator,
    decoder: PointerGeneratorDecoder,
    updater: BeliefStateUpdater,
    loss: TrackerLoss,
    config: TrackerConfig,
}

impl DialogueStateTracker<LookupEncoder> {
    /// Deterministically initialized model.
    pub fn new(config: TrackerConfig, ctx: &ExecutionContext) -> ModelResult<Self> {
        config.validate()?;
        let encoder = LookupEncoder::new(&config.model, ctx.device())?;
        Self::with_encoder(encoder, config, ctx)
    }

    /// Load `encoder.bert.*`, `encoder.{domain,op}_classifier.*` and `decoder.*`.
    pub fn load(vb: VarBuilder, config: TrackerConfig) -> ModelResult<Self> {
        config.validate()?;
        let encoder = LookupEncoder::load(vb.pp("encoder.bert"), &config.model)?;
        let classifier = OperationClassifier::load(vb.pp("encoder"), &config.model)?;
        let decoder = PointerGeneratorDecoder::load(vb.pp("decoder"), config.model.hidden_size)?;
        Ok(Self::assemble(encoder, classifier, decoder, config))
    }
}

impl<E: ContextualEncoder> DialogueStateTracker<E> {
    /// Wrap an existing encoder; classifier and decoder are freshly initialized.
    pub fn with_encoder(encoder: E, config: TrackerConfig, ctx: &ExecutionContext) -> ModelResult<Self> {
        config.validate()?;
        if encoder.hidden_size() != config.model.hidden_size {
            return Err(ModelError::shape(
                "encoder hidden size",
                config.model.hidden_size,
                encoder.hidden_size(),
            ));
        }
        let classifier = OperationClassifier::new(&config.model, ctx.device())?;
        let decoder = PointerGeneratorDecoder::new(config.model.hidden_size, ctx.device())?;
        Ok(Self::assemble(encoder, classifier, decoder, config))
    }

    fn assemble(
        encoder: E,
        classifier: OperationClassifier,
        decoder: PointerGeneratorDecoder,
        config: TrackerConfig,
    ) -> Self {
        Self {
            aggregator: StateAggregator::new(config.model.op_set.update_id()),
            updater: BeliefStateUpdater::new(config.updater.clone()),
            loss: TrackerLoss::default(),
            encoder,
            classifier,
            decoder,
            config,
        }
    }

    pub fn with_loss(mut self, loss: TrackerLoss) -> Self {
        self.loss = loss;
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn forward(
        &self,
        batch: &TurnBatch,
        options: ForwardOptions<'_>,
        ctx: &ExecutionContext,
    ) -> ModelResult<TrackerOutput> {
        let encoded = self.encoder.encode(batch, ctx)?;
        let classified = self
            .classifier
            .forward(&encoded, batch, options.op_selection, ctx)?;
        let aggregated = self.aggregator.aggregate(
            &classified.state_output,
            &classified.op_ids,
            options.max_update,
            ctx,
        )?;

        let inputs = DecoderInputs {
            embeddings: self.encoder.word_embeddings(),
            sequence_output: &encoded.sequence_output,
            input_ids: &batch.input_ids,
            attention_mask: &batch.attention_mask,
            slot_inputs: &aggregated.slot_inputs,
            initial_hidden: &encoded.pooled_output,
        };
        let decoded = self.decoder.decode(&inputs, options.max_value, options.mode)?;

        Ok(TrackerOutput {
            domain_scores: classified.domain_scores,
            op_scores: classified.op_scores,
            gen_scores: decoded.scores,
            domain_ids: classified.domain_ids,
            op_ids: classified.op_ids,
            update_slots: aggregated.update_slots,
            token_ids: decoded.token_ids,
        })
    }

    /// Gold-operation forward pass plus loss. Teacher forcing is drawn from
    /// `schedule` with the caller's RNG.
    pub fn supervised_forward<R: Rng + ?Sized>(
        &self,
        batch: &TurnBatch,
        labels: &TurnLabels,
        schedule: &TeacherForcingSchedule,
        rng: &mut R,
        ctx: &ExecutionContext,
    ) -> ModelResult<(TrackerOutput, Tensor, LossComponents)> {
        if labels.pad_id() != self.config.decoder.pad_id {
            return Err(ModelError::InvalidInput(format!(
                "labels padded with {} but decoder.pad_id is {}",
                labels.pad_id(),
                self.config.decoder.pad_id
            )));
        }
        labels.check_update_targets(self.config.model.op_set.update_id())?;
        let targets = labels.target_tensor(ctx)?;
        let mode = schedule.mode(rng, &targets);
        let output = self.forward(batch, ForwardOptions::supervised(labels, mode), ctx)?;
        let (loss, components) = self.compute_loss(&output, labels, ctx)?;

        debug!(
            teacher_forced = mode.is_teacher_forced(),
            generation = components.generation,
            operation = components.operation,
            domain = components.domain,
            total = components.total,
            "Supervised forward"
        );

        Ok((output, loss, components))
    }

    /// Fails if a row's gold UPDATE count differs from its target count.
    pub fn compute_loss(
        &self,
        output: &TrackerOutput,
        labels: &TurnLabels,
        ctx: &ExecutionContext,
    ) -> ModelResult<(Tensor, LossComponents)> {
        labels.check_update_targets(self.config.model.op_set.update_id())?;
        self.loss.compute(
            &output.domain_scores,
            &output.op_scores,
            &output.gen_scores,
            labels,
            ctx,
        )
    }

    /// Inference decisions per turn of the batch.
    pub fn predict_turn(&self, batch: &TurnBatch, ctx: &ExecutionContext) -> ModelResult<Vec<TurnPrediction>> {
        let output = self.forward(
            batch,
            ForwardOptions::inference(self.config.decoder.max_value),
            ctx,
        )?;
        let op_set = self.config.model.op_set;
        let eos_id = self.config.decoder.eos_id;

        let mut predictions = Vec::with_capacity(batch.batch_size());
        for (row, op_ids) in output.op_ids.iter().enumerate() {
            let update_slots = output.update_slots.get(row).cloned().unwrap_or_default();
            let generated = output
                .token_ids
                .get(row)
                .map(|slots| {
                    slots
                        .iter()
                        .take(update_slots.len())
                        .map(|ids| truncate_at_eos(ids, eos_id).to_vec())
                        .collect()
                })
                .unwrap_or_default();
            predictions.push(TurnPrediction {
                domain_id: output.domain_ids.get(row).copied().unwrap_or_default(),
                operations: op_set.decode_ids(op_ids)?,
                update_slots,
                generated,
            });
        }
        Ok(predictions)
    }

    /// Predict a batch of turns and apply the decisions to `previous`, one
    /// belief state per batch row.
    pub fn track_turn(
        &self,
        batch: &TurnBatch,
        previous: &[BeliefState],
        catalog: &SlotCatalog,
        value_decoder: &dyn ValueDecoder,
        ctx: &ExecutionContext,
    ) -> ModelResult<Vec<BeliefState>> {
        if previous.len() != batch.batch_size() {
            return Err(ModelError::shape(
                "previous belief states",
                batch.batch_size(),
                previous.len(),
            ));
        }
        if catalog.len() != batch.n_slots() {
            return Err(ModelError::shape("slot catalog", batch.n_slots(), catalog.len()));
        }

        let predictions = self.predict_turn(batch, ctx)?;
        let states = predictions
            .iter()
            .zip(previous)
            .map(|(prediction, prev)| {
                self.updater
                    .apply(
                        catalog,
                        prev,
                        &prediction.operations,
                        &prediction.generated,
                        value_decoder,
                    )
                    .map_err(ModelError::from)
            })
            .collect::<ModelResult<Vec<_>>>()?;

        info!(
            batch = batch.batch_size(),
            updates = predictions.iter().map(|p| p.update_slots.len()).sum::<usize>(),
            "Tracked turn batch"
        );
        Ok(states)
    }
}
