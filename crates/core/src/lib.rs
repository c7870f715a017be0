//! Core crate for the superimage upscaling engine: model catalog, weight
//! resolution, ONNX inference, tiled upscaling, and batch orchestration.

pub mod backend;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod error;
pub mod pixels;
pub mod resolver;
pub mod session;
pub mod tiling;
