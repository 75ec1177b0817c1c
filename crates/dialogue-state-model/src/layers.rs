//! Learned building blocks: dense projections and the recurrent generation cell.
//!
//! Weights use the PyTorch `[out, in]` layout so checkpoints exported from
//! a training run load without reshaping. Without a checkpoint, weights get
//! a deterministic low-discrepancy initialization scaled like Xavier.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::error::{ModelError, ModelResult};

/// Deterministic Xavier-scaled weights `[rows, cols]`.
///
/// `phase` decorrelates layers of identical shape.
pub fn init_weight(rows: usize, cols: usize, phase: f32, device: &Device) -> ModelResult<Tensor> {
    let std = (2.0 / (rows + cols) as f64).sqrt() as f32;
    let data: Vec<f32> = (0..rows * cols)
        .map(|i| ((i as f32 * 0.618_034 + phase) % 1.0 * 2.0 - 1.0) * std)
        .collect();
    Tensor::from_vec(data, (rows, cols), device).map_err(map_candle)
}

/// Affine projection `x · Wᵀ + b`.
#[derive(Debug, Clone)]
pub struct Dense {
    /// [out_dim, in_dim]
    weight: Tensor,
    /// [out_dim]
    bias: Tensor,
}

impl Dense {
    pub fn new(in_dim: usize, out_dim: usize, phase: f32, device: &Device) -> ModelResult<Self> {
        Ok(Self {
            weight: init_weight(out_dim, in_dim, phase, device)?,
            bias: Tensor::zeros((out_dim,), DType::F32, device).map_err(map_candle)?,
        })
    }

    /// Load `weight` and `bias` under the builder's current prefix.
    pub fn load(vb: VarBuilder, in_dim: usize, out_dim: usize) -> ModelResult<Self> {
        let weight = vb.get((out_dim, in_dim), "weight").map_err(map_candle)?;
        let bias = vb.get((out_dim,), "bias").map_err(map_candle)?;
        Ok(Self { weight, bias })
    }

    pub fn from_tensors(weight: Tensor, bias: Tensor) -> ModelResult<Self> {
        let (out_dim, _) = weight.dims2().map_err(map_candle)?;
        if bias.dims() != &[out_dim] {
            return Err(ModelError::shape("dense bias", [out_dim], bias.dims()));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_dim(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn out_dim(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Apply to [N, in] or [B, T, in].
    pub fn forward(&self, x: &Tensor) -> ModelResult<Tensor> {
        let w_t = self.weight.t().map_err(map_candle)?;
        match x.dims() {
            [_, _] => x
                .matmul(&w_t)
                .map_err(map_candle)?
                .broadcast_add(&self.bias)
                .map_err(map_candle),
            &[b, t, h] => {
                // Flatten to [B*T, in] for matmul
                let flat = x.reshape((b * t, h)).map_err(map_candle)?;
                flat.matmul(&w_t)
                    .map_err(map_candle)?
                    .broadcast_add(&self.bias)
                    .map_err(map_candle)?
                    .reshape((b, t, self.out_dim()))
                    .map_err(map_candle)
            }
            other => Err(ModelError::shape("dense input", "[N, in] or [B, T, in]", other)),
        }
    }
}

/// One step of a recurrent cell: `(input, hidden) -> hidden'`.
pub trait RecurrentCell {
    fn input_size(&self) -> usize;

    fn hidden_size(&self) -> usize;

    /// Advance the state. `input` is [B, input_size], `hidden` is [B, hidden_size].
    fn step(&self, input: &Tensor, hidden: &Tensor) -> ModelResult<Tensor>;
}

/// Single-layer GRU cell with PyTorch gate order (reset, update, new).
#[derive(Debug, Clone)]
pub struct GruCell {
    /// [3H, I]
    weight_ih: Tensor,
    /// [3H, H]
    weight_hh: Tensor,
    /// [3H]
    bias_ih: Tensor,
    /// [3H]
    bias_hh: Tensor,
    input_size: usize,
    hidden_size: usize,
}

impl GruCell {
    pub fn new(input_size: usize, hidden_size: usize, device: &Device) -> ModelResult<Self> {
        let zeros = Tensor::zeros((3 * hidden_size,), DType::F32, device).map_err(map_candle)?;
        Ok(Self {
            weight_ih: init_weight(3 * hidden_size, input_size, 0.31, device)?,
            weight_hh: init_weight(3 * hidden_size, hidden_size, 0.73, device)?,
            bias_ih: zeros.clone(),
            bias_hh: zeros,
            input_size,
            hidden_size,
        })
    }

    /// Load `weight_ih_l0`, `weight_hh_l0`, `bias_ih_l0`, `bias_hh_l0`.
    pub fn load(vb: VarBuilder, input_size: usize, hidden_size: usize) -> ModelResult<Self> {
        let gates = 3 * hidden_size;
        Ok(Self {
            weight_ih: vb.get((gates, input_size), "weight_ih_l0").map_err(map_candle)?,
            weight_hh: vb.get((gates, hidden_size), "weight_hh_l0").map_err(map_candle)?,
            bias_ih: vb.get((gates,), "bias_ih_l0").map_err(map_candle)?,
            bias_hh: vb.get((gates,), "bias_hh_l0").map_err(map_candle)?,
            input_size,
            hidden_size,
        })
    }
}

impl RecurrentCell for GruCell {
    fn input_size(&self) -> usize {
        self.input_size
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn step(&self, input: &Tensor, hidden: &Tensor) -> ModelResult<Tensor> {
        let h = self.hidden_size;

        let gi = input
            .matmul(&self.weight_ih.t().map_err(map_candle)?)
            .map_err(map_candle)?
            .broadcast_add(&self.bias_ih)
            .map_err(map_candle)?;
        let gh = hidden
            .matmul(&self.weight_hh.t().map_err(map_candle)?)
            .map_err(map_candle)?
            .broadcast_add(&self.bias_hh)
            .map_err(map_candle)?;

        let chunk = |t: &Tensor, i: usize| t.narrow(1, i * h, h).map_err(map_candle);

        let reset = candle_nn::ops::sigmoid(&(chunk(&gi, 0)? + chunk(&gh, 0)?).map_err(map_candle)?)
            .map_err(map_candle)?;
        let update = candle_nn::ops::sigmoid(&(chunk(&gi, 1)? + chunk(&gh, 1)?).map_err(map_candle)?)
            .map_err(map_candle)?;
        let candidate = (chunk(&gi, 2)? + (reset * chunk(&gh, 2)?).map_err(map_candle)?)
            .map_err(map_candle)?
            .tanh()
            .map_err(map_candle)?;

        // h' = n + z * (h - n)
        let delta = (hidden - &candidate).map_err(map_candle)?;
        (&candidate + (update * delta).map_err(map_candle)?).map_err(map_candle)
    }
}

fn map_candle(e: candle_core::Error) -> ModelError {
    ModelError::Tensor {
        message: format!("Layer error: {}", e),
    }
}
