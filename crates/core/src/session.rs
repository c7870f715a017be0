//! Upscale session: owns one inference backend across a unit of work and
//! guarantees its teardown.
//!
//! Construction is cheap; weights are resolved and the backend is built on
//! the first `run`. The state machine makes busy rejection and disposal
//! ordering explicit:
//!
//! `Idle → Ready → Ready | Failed`, with `Disposed` terminal on all paths.

use std::path::PathBuf;
use std::sync::{Mutex, TryLockError};

use tracing::{debug, info, warn};

use crate::backend::{ArchParams, Device, EngineLoader, InferenceEngine};
use crate::error::UpscaleError;
use crate::resolver::WeightResolver;
use crate::tiling;

/// One unit of work: upscale one input file to one output destination.
#[derive(Debug, Clone)]
pub struct UpscaleRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub outscale: f32,
}

/// Tuning for a session: which model, how to tile, where to run.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    pub tile: u32,
    pub tile_pad: u32,
    pub pre_pad: u32,
    pub device: Device,
}

enum SessionState {
    /// No backend yet; first `run` will build one.
    Idle,
    /// Backend loaded and reusable across runs.
    Ready {
        engine: Box<dyn InferenceEngine>,
        model_scale: u32,
    },
    /// Backend construction failed; the session cannot recover.
    Failed,
    /// Engine released; the session is unusable.
    Disposed,
}

/// Owns at most one backend instance at a time. At most one upscale may run
/// on a session concurrently; a second call is rejected with `SessionBusy`
/// rather than queued. Sharing a device across *different* sessions remains
/// the caller's responsibility.
pub struct UpscaleSession {
    options: SessionOptions,
    resolver: WeightResolver,
    loader: Box<dyn EngineLoader>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for UpscaleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpscaleSession")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl UpscaleSession {
    /// Cheap: no weights are resolved and no backend is built here.
    pub fn new(
        options: SessionOptions,
        resolver: WeightResolver,
        loader: Box<dyn EngineLoader>,
    ) -> Self {
        Self {
            options,
            resolver,
            loader,
            state: Mutex::new(SessionState::Idle),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Upscale one image. Transient pixel buffers live only for the duration
    /// of this call, and device scratch memory is released after every
    /// inference attempt, so repeated calls do not accumulate memory.
    pub fn run(&self, request: &UpscaleRequest) -> Result<(), UpscaleError> {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(UpscaleError::SessionBusy),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        match &*state {
            SessionState::Disposed => return Err(UpscaleError::SessionDisposed),
            SessionState::Failed => {
                return Err(UpscaleError::InferenceFailed(
                    "backend previously failed to load".into(),
                ))
            }
            SessionState::Idle | SessionState::Ready { .. } => {}
        }

        // Decode before touching the backend: an unreadable input must not
        // force a model download.
        let img = crate::pixels::decode_image(&request.input)?;
        info!(
            input = %request.input.display(),
            width = img.width(),
            height = img.height(),
            outscale = request.outscale,
            "Upscaling image"
        );

        if let SessionState::Idle = &*state {
            match self.build_engine() {
                Ok((engine, model_scale)) => {
                    *state = SessionState::Ready {
                        engine,
                        model_scale,
                    };
                }
                Err(err) => {
                    warn!(model = %self.options.model, error = %err, "Backend construction failed");
                    *state = SessionState::Failed;
                    return Err(err);
                }
            }
        }

        let SessionState::Ready {
            engine,
            model_scale,
        } = &mut *state
        else {
            unreachable!("state is Ready after successful engine construction");
        };

        let result = tiling::upscale_image(
            &img,
            engine.as_mut(),
            *model_scale,
            request.outscale,
            self.options.tile,
            self.options.tile_pad,
            self.options.pre_pad,
        )
        .and_then(|out| crate::pixels::encode_image(&out, &request.output));

        // Scratch goes back to the device pool whether or not the call
        // succeeded; the pixel buffers drop with this activation record.
        engine.release_scratch();

        match &result {
            Ok(()) => info!(output = %request.output.display(), "Upscaled image saved"),
            Err(err) => warn!(input = %request.input.display(), error = %err, "Upscale failed"),
        }
        result
    }

    fn build_engine(&self) -> Result<(Box<dyn InferenceEngine>, u32), UpscaleError> {
        let handle = self.resolver.resolve(&self.options.model)?;
        let descriptor = self
            .resolver
            .catalog()
            .get(&self.options.model)
            .ok_or_else(|| UpscaleError::UnknownModel(self.options.model.clone()))?;

        debug!(
            model = %self.options.model,
            device = %self.options.device,
            tile = self.options.tile,
            "Building inference backend"
        );

        let engine = self.loader.load(
            &handle.path,
            &ArchParams {
                scale: descriptor.scale,
                num_blocks: descriptor.num_blocks,
            },
        )?;
        Ok((engine, descriptor.scale))
    }

    /// Release the backend and any device memory it holds. Idempotent;
    /// the session rejects all further `run` calls afterwards.
    pub fn dispose(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !matches!(&*state, SessionState::Disposed) {
            debug!(model = %self.options.model, "Disposing upscale session");
            *state = SessionState::Disposed;
        }
    }
}

impl Drop for UpscaleSession {
    fn drop(&mut self) {
        // Scoped-acquisition guarantee: teardown happens on every exit path,
        // including panic unwind, even if `dispose` was never called.
        self.dispose();
    }
}
