//! Static catalog of the supported super-resolution models.

use serde::{Deserialize, Serialize};

/// Metadata for one pretrained model: where the weights come from and the
/// architecture parameters the inference backend needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    /// Weight file name inside the cache directory.
    pub filename: String,
    pub url: String,
    /// Expected SHA256 of the weight file. `None` skips verification.
    pub sha256: Option<String>,
    /// Intrinsic upscale factor of the architecture.
    pub scale: u32,
    /// RRDB block count (23 for the full model, 6 for the anime variant).
    pub num_blocks: u32,
    pub description: String,
}

fn builtin_descriptors() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            name: "RealESRGAN_x4plus".into(),
            filename: "RealESRGAN_x4plus.onnx".into(),
            url: "https://huggingface.co/deepghs/imgutils-models/resolve/main/onnx/realesrgan/RealESRGAN_x4plus.onnx".into(),
            sha256: None,
            scale: 4,
            num_blocks: 23,
            description: "RealESRGAN x4 general-purpose model (23-block variant)".into(),
        },
        ModelDescriptor {
            name: "RealESRGAN_x4plus_anime_6B".into(),
            filename: "RealESRGAN_x4plus_anime_6B.onnx".into(),
            url: "https://huggingface.co/deepghs/imgutils-models/resolve/main/onnx/realesrgan/RealESRGAN_x4plus_anime_6B.onnx".into(),
            sha256: None,
            scale: 4,
            num_blocks: 6,
            description: "RealESRGAN x4 anime-optimized model (6-block variant, 17.9 MB)".into(),
        },
    ]
}

/// Immutable model lookup table, fixed at process start.
pub struct ModelCatalog {
    entries: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        Self {
            entries: builtin_descriptors(),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_entries(entries: Vec<ModelDescriptor>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn list(&self) -> &[ModelDescriptor] {
        &self.entries
    }

    /// Model names in catalog order, for CLI help text and validation.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}
