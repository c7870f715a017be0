//! Tiled forward-pass execution: splits an image into padded tiles sized to
//! bound peak memory, runs the backend per tile, and stitches the scaled
//! outputs back into one image.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{s, Array4};
use tracing::debug;

use crate::backend::InferenceEngine;
use crate::error::UpscaleError;
use crate::pixels::{nchw_to_rgb, rgb_to_nchw};

/// One tile of the working image: the core region plus the clamped padding
/// carried into inference and trimmed back off afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSpec {
    pub origin_x: usize,
    pub origin_y: usize,
    pub width: usize,
    pub height: usize,
    pub pad_left: usize,
    pub pad_top: usize,
    pub pad_right: usize,
    pub pad_bottom: usize,
}

impl TileSpec {
    /// Top-left corner of the padded region.
    pub fn padded_origin(&self) -> (usize, usize) {
        (self.origin_x - self.pad_left, self.origin_y - self.pad_top)
    }

    /// Dimensions of the padded region handed to the backend.
    pub fn padded_size(&self) -> (usize, usize) {
        (
            self.width + self.pad_left + self.pad_right,
            self.height + self.pad_top + self.pad_bottom,
        )
    }
}

/// Deterministic tile grid for an image.
///
/// `tile == 0` treats the whole image as a single tile. Otherwise the core
/// regions partition the image exactly, and each tile is extended by
/// `tile_pad` on every side, clamped to the image bounds.
pub fn tile_grid(width: usize, height: usize, tile: usize, tile_pad: usize) -> Vec<TileSpec> {
    if tile == 0 {
        return vec![TileSpec {
            origin_x: 0,
            origin_y: 0,
            width,
            height,
            pad_left: 0,
            pad_top: 0,
            pad_right: 0,
            pad_bottom: 0,
        }];
    }

    let mut specs = Vec::new();
    let mut y = 0;
    while y < height {
        let h = tile.min(height - y);
        let mut x = 0;
        while x < width {
            let w = tile.min(width - x);
            specs.push(TileSpec {
                origin_x: x,
                origin_y: y,
                width: w,
                height: h,
                pad_left: tile_pad.min(x),
                pad_top: tile_pad.min(y),
                pad_right: tile_pad.min(width - (x + w)),
                pad_bottom: tile_pad.min(height - (y + h)),
            });
            x += tile;
        }
        y += tile;
    }
    specs
}

/// Upscale `img` through `engine`, tiling to bound peak memory.
///
/// The stitched result is exactly `model_scale ×` the input; when `outscale`
/// differs from the model's intrinsic factor the result is resampled to
/// `round(outscale·W) × round(outscale·H)`. Backend failures propagate
/// unchanged; there is no internal retry.
pub fn upscale_image(
    img: &RgbImage,
    engine: &mut dyn InferenceEngine,
    model_scale: u32,
    outscale: f32,
    tile: u32,
    tile_pad: u32,
    pre_pad: u32,
) -> Result<RgbImage, UpscaleError> {
    let orig_w = img.width() as usize;
    let orig_h = img.height() as usize;
    let scale = model_scale as usize;

    let mut input = rgb_to_nchw(img);

    // Reflection pre-padding cannot exceed the image extent.
    let pre_pad = (pre_pad as usize).min(orig_w - 1).min(orig_h - 1);
    if pre_pad > 0 {
        input = reflect_pad_bottom_right(&input, pre_pad);
    }
    let work_h = orig_h + pre_pad;
    let work_w = orig_w + pre_pad;

    let specs = tile_grid(work_w, work_h, tile as usize, tile_pad as usize);
    debug!(
        width = work_w,
        height = work_h,
        tile,
        tile_pad,
        pre_pad,
        tiles = specs.len(),
        "Starting tiled inference"
    );

    let mut output = Array4::<f32>::zeros((1, 3, work_h * scale, work_w * scale));

    for spec in &specs {
        let (px0, py0) = spec.padded_origin();
        let (pw, ph) = spec.padded_size();

        let tile_input = input
            .slice(s![.., .., py0..py0 + ph, px0..px0 + pw])
            .to_owned();
        let tile_output = engine.infer(&tile_input)?;

        let expected = [1, 3, ph * scale, pw * scale];
        if tile_output.shape() != expected {
            return Err(UpscaleError::InferenceFailed(format!(
                "backend returned shape {:?}, expected {:?}",
                tile_output.shape(),
                expected
            )));
        }

        // Trim the scaled padding and write the core region. Core regions
        // partition the image, so every output pixel is written exactly once.
        let crop_y0 = spec.pad_top * scale;
        let crop_x0 = spec.pad_left * scale;
        let out_y0 = spec.origin_y * scale;
        let out_x0 = spec.origin_x * scale;
        let out_h = spec.height * scale;
        let out_w = spec.width * scale;

        output
            .slice_mut(s![.., .., out_y0..out_y0 + out_h, out_x0..out_x0 + out_w])
            .assign(&tile_output.slice(s![
                ..,
                ..,
                crop_y0..crop_y0 + out_h,
                crop_x0..crop_x0 + out_w
            ]));
    }

    // Trim the pre-padding off the scaled result.
    let stitched = if pre_pad > 0 {
        output
            .slice(s![.., .., ..orig_h * scale, ..orig_w * scale])
            .to_owned()
    } else {
        output
    };

    let stitched = nchw_to_rgb(&stitched);

    let target_w = (outscale * orig_w as f32).round() as u32;
    let target_h = (outscale * orig_h as f32).round() as u32;
    if (target_w, target_h) == stitched.dimensions() {
        Ok(stitched)
    } else {
        debug!(target_w, target_h, "Resampling to requested output scale");
        Ok(image::imageops::resize(
            &stitched,
            target_w,
            target_h,
            FilterType::Lanczos3,
        ))
    }
}

/// Reflection-pad the bottom and right edges by `pad` pixels, matching the
/// original Real-ESRGAN pre-padding.
fn reflect_pad_bottom_right(arr: &Array4<f32>, pad: usize) -> Array4<f32> {
    let h = arr.shape()[2];
    let w = arr.shape()[3];
    let new_h = h + pad;
    let new_w = w + pad;

    let mut padded = Array4::<f32>::zeros((1, 3, new_h, new_w));
    padded
        .slice_mut(s![.., .., ..h, ..w])
        .assign(&arr.slice(s![.., .., ..h, ..w]));

    // Reflection excludes the edge pixel: rows [0,1,2] pad to [0,1,2,1,0].
    for y in 0..pad {
        let src_y = h - 2 - y;
        for c in 0..3 {
            for x in 0..w {
                padded[[0, c, h + y, x]] = arr[[0, c, src_y, x]];
            }
        }
    }

    for x in 0..pad {
        let src_x = w - 2 - x;
        for c in 0..3 {
            for y in 0..new_h {
                let src_y = if y < h { y } else { h - 2 - (y - h) };
                padded[[0, c, y, w + x]] = arr[[0, c, src_y, src_x]];
            }
        }
    }

    padded
}
