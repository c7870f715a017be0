//! Batch orchestration: sequences multiple images through one shared
//! session, reporting progress and collecting per-item failures without
//! aborting the batch.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::UpscaleError;
use crate::session::{UpscaleRequest, UpscaleSession};

/// Outcome of one batch. Frozen once `run_batch` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub success_count: usize,
    pub total_count: usize,
    /// Display names of the items that failed, in attempt order.
    pub failed: Vec<String>,
}

/// Receives progress notifications: integer percent plus status text.
pub trait ProgressSink {
    fn progress(&self, percent: u8, message: &str);
}

/// Sink that discards all notifications.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn progress(&self, _percent: u8, _message: &str) {}
}

/// Output path convention: `{stem}_upscaled{extension}` under `output_dir`.
pub fn batch_output_path(output_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let ext = input
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    output_dir.join(format!("{stem}_upscaled{ext}"))
}

fn display_name(input: &Path) -> String {
    input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string())
}

/// Process `inputs` strictly in order through one shared session.
///
/// A single item's failure is recorded and the batch continues; only a
/// failure to create the output directory aborts before any item runs.
/// The session is consumed and disposed on every exit path.
pub fn run_batch(
    session: UpscaleSession,
    inputs: &[PathBuf],
    output_dir: &Path,
    outscale: f32,
    sink: &dyn ProgressSink,
) -> Result<BatchResult, UpscaleError> {
    // The session is owned here; dropping it disposes it, so teardown also
    // covers the error return and panic unwind paths.
    fs::create_dir_all(output_dir).map_err(|e| UpscaleError::EncodeFailed {
        path: output_dir.to_path_buf(),
        reason: format!("cannot create output directory: {e}"),
    })?;

    let total = inputs.len();
    let mut success_count = 0;
    let mut failed = Vec::new();

    for (idx, input) in inputs.iter().enumerate() {
        let name = display_name(input);
        let percent = if total == 0 { 0 } else { (idx * 100 / total) as u8 };
        sink.progress(
            percent,
            &format!("Processing {}/{}: {}", idx + 1, total, name),
        );

        let request = UpscaleRequest {
            input: input.clone(),
            output: batch_output_path(output_dir, input),
            outscale,
        };

        match session.run(&request) {
            Ok(()) => {
                success_count += 1;
            }
            Err(err) => {
                warn!(item = %name, error = %err, "Batch item failed; continuing");
                failed.push(name);
            }
        }
    }

    sink.progress(100, "Batch processing completed");
    info!(success_count, total, "Batch finished");

    session.dispose();

    Ok(BatchResult {
        success_count,
        total_count: total,
        failed,
    })
}
