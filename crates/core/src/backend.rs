//! Inference backend capability: weight loading and per-tile forward passes.
//!
//! The core only ever talks to [`EngineLoader`] / [`InferenceEngine`], so
//! tests can substitute a deterministic stub without real weights or a GPU.
//! The production implementation is [`OrtEngineLoader`], which builds an
//! `ort::Session` with the CUDA execution provider when requested.

use std::path::Path;

use ndarray::Array4;
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use tracing::{debug, warn};

use crate::error::UpscaleError;

/// Architecture parameters handed to the backend alongside the weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchParams {
    pub scale: u32,
    pub num_blocks: u32,
}

/// Inference device selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Device {
    Cpu,
    #[default]
    Cuda,
}

impl Device {
    /// Parse from string (case-insensitive). Returns `Cuda` for unknown values.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Self::Cpu,
            _ => Self::Cuda,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

/// One loaded model, able to run forward passes on image tiles.
///
/// Input and output are NCHW `[1,3,H,W]` float32 in the 0–255 range; the
/// output spatial dimensions are the input's multiplied by the model scale.
pub trait InferenceEngine: Send {
    fn infer(&mut self, tile: &Array4<f32>) -> Result<Array4<f32>, UpscaleError>;

    /// Return per-call scratch memory to the device allocator's free pool.
    /// Called after every inference attempt, success or failure.
    fn release_scratch(&mut self) {}
}

impl std::fmt::Debug for dyn InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn InferenceEngine")
    }
}

/// Capability to construct an [`InferenceEngine`] from a weight file.
pub trait EngineLoader: Send + Sync {
    fn load(
        &self,
        weights: &Path,
        params: &ArchParams,
    ) -> Result<Box<dyn InferenceEngine>, UpscaleError>;
}

/// ONNX Runtime implementation of the backend capability.
pub struct OrtEngineLoader {
    device: Device,
}

impl OrtEngineLoader {
    pub fn new(device: Device) -> Self {
        Self { device }
    }
}

impl EngineLoader for OrtEngineLoader {
    fn load(
        &self,
        weights: &Path,
        params: &ArchParams,
    ) -> Result<Box<dyn InferenceEngine>, UpscaleError> {
        let fail = |reason: String| UpscaleError::InferenceFailed(reason);

        debug!(
            weights = %weights.display(),
            device = %self.device,
            scale = params.scale,
            num_blocks = params.num_blocks,
            "Loading ONNX model"
        );

        let builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .map_err(|e| fail(format!("cannot create session builder: {e}")))?;

        let session = match self.device {
            Device::Cuda => {
                let cuda = CUDAExecutionProvider::default();
                if !cuda.is_available().unwrap_or(false) {
                    warn!("CUDA EP is not available — inference will fall back to CPU");
                }
                builder
                    .with_execution_providers([CUDAExecutionProvider::default().build()])
                    .map_err(|e| fail(format!("cannot register CUDA EP: {e}")))?
                    .commit_from_file(weights)
                    .map_err(|e| {
                        fail(format!("cannot load ONNX model {}: {e}", weights.display()))
                    })?
            }
            Device::Cpu => builder.commit_from_file(weights).map_err(|e| {
                fail(format!("cannot load ONNX model {}: {e}", weights.display()))
            })?,
        };

        let input_name = session.inputs()[0].name().to_string();
        let output_name = session.outputs()[0].name().to_string();
        debug!(%input_name, %output_name, "Model loaded");

        Ok(Box::new(OrtEngine {
            session,
            input_name,
            output_name,
        }))
    }
}

struct OrtEngine {
    session: Session,
    input_name: String,
    output_name: String,
}

impl InferenceEngine for OrtEngine {
    fn infer(&mut self, tile: &Array4<f32>) -> Result<Array4<f32>, UpscaleError> {
        let fail = |reason: String| UpscaleError::InferenceFailed(reason);

        let input_tensor =
            Tensor::from_array(tile.clone()).map_err(|e| fail(format!("bad input tensor: {e}")))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => &input_tensor])
            .map_err(|e| fail(format!("forward pass failed: {e}")))?;
        let output_view = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| fail(format!("cannot extract output tensor: {e}")))?;

        output_view
            .to_owned()
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|e| fail(format!("unexpected output rank: {e}")))
    }

    // ORT's arena keeps per-call scratch inside the session allocator and
    // frees it with the session; there is no per-call release hook.
    fn release_scratch(&mut self) {}
}
