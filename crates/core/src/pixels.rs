//! Pixel buffer I/O and layout conversion between interleaved RGB and the
//! NCHW float tensors the inference backend consumes.

use std::fs;
use std::path::Path;

use image::RgbImage;
use ndarray::Array4;

use crate::error::UpscaleError;

/// Decode an image from storage into an RGB8 buffer.
///
/// Missing, unreadable, and unrecognized files all surface as
/// [`UpscaleError::DecodeFailed`].
pub fn decode_image(path: &Path) -> Result<RgbImage, UpscaleError> {
    let img = image::open(path).map_err(|e| UpscaleError::DecodeFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(img.to_rgb8())
}

/// Encode an image to `path` in the format implied by its extension,
/// creating the parent directory if needed.
pub fn encode_image(img: &RgbImage, path: &Path) -> Result<(), UpscaleError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| UpscaleError::EncodeFailed {
                path: path.to_path_buf(),
                reason: format!("cannot create output directory {}: {e}", parent.display()),
            })?;
        }
    }

    img.save(path).map_err(|e| UpscaleError::EncodeFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Convert interleaved RGB8 → NCHW `[1,3,H,W]` float32 in the 0–255 range
/// Real-ESRGAN expects.
pub fn rgb_to_nchw(img: &RgbImage) -> Array4<f32> {
    let w = img.width() as usize;
    let h = img.height() as usize;
    let hw = h * w;
    let data = img.as_raw();

    let mut nchw = Array4::<f32>::zeros((1, 3, h, w));
    let slice = nchw.as_slice_mut().expect("freshly allocated array is contiguous");
    for i in 0..hw {
        let src = i * 3;
        slice[i] = data[src] as f32;
        slice[hw + i] = data[src + 1] as f32;
        slice[2 * hw + i] = data[src + 2] as f32;
    }
    nchw
}

/// Convert NCHW `[1,3,H,W]` float32 → interleaved RGB8, clamping to 0–255.
pub fn nchw_to_rgb(arr: &Array4<f32>) -> RgbImage {
    let h = arr.shape()[2];
    let w = arr.shape()[3];
    let hw = h * w;

    let owned_contig;
    let slice = if let Some(s) = arr.as_slice() {
        s
    } else {
        owned_contig = arr.as_standard_layout().into_owned();
        owned_contig.as_slice().expect("standard layout is contiguous")
    };

    let mut rgb = vec![0u8; hw * 3];
    for i in 0..hw {
        rgb[i * 3] = slice[i].clamp(0.0, 255.0) as u8;
        rgb[i * 3 + 1] = slice[hw + i].clamp(0.0, 255.0) as u8;
        rgb[i * 3 + 2] = slice[2 * hw + i].clamp(0.0, 255.0) as u8;
    }

    RgbImage::from_raw(w as u32, h as u32, rgb).expect("buffer sized for dimensions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_nchw_basic() {
        let img = RgbImage::from_raw(
            2,
            2,
            vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 128, 128, 128],
        )
        .unwrap();
        let arr = rgb_to_nchw(&img);
        assert_eq!(arr.shape(), &[1, 3, 2, 2]);
        assert_eq!(arr[[0, 0, 0, 0]], 255.0);
        assert_eq!(arr[[0, 1, 0, 0]], 0.0);
        assert_eq!(arr[[0, 1, 0, 1]], 255.0);
        assert_eq!(arr[[0, 2, 1, 0]], 255.0);
        assert_eq!(arr[[0, 0, 1, 1]], 128.0);
    }

    #[test]
    fn test_nchw_to_rgb_clamping() {
        let mut arr = Array4::<f32>::zeros((1, 3, 1, 1));
        arr[[0, 0, 0, 0]] = 300.0;
        arr[[0, 1, 0, 0]] = -10.0;
        arr[[0, 2, 0, 0]] = 128.5;

        let img = nchw_to_rgb(&arr);
        let px = img.get_pixel(0, 0);
        assert_eq!(px.0, [255, 0, 128]);
    }

    #[test]
    fn test_roundtrip_conversion() {
        let mut data = vec![0u8; 4 * 4 * 3];
        for (i, v) in data.iter_mut().enumerate() {
            *v = (i * 5) as u8;
        }
        let img = RgbImage::from_raw(4, 4, data.clone()).unwrap();
        let restored = nchw_to_rgb(&rgb_to_nchw(&img));
        assert_eq!(restored.as_raw(), &data);
    }

    #[test]
    fn test_decode_missing_file() {
        let err = decode_image(Path::new("/nonexistent/input.png")).unwrap_err();
        assert!(matches!(err, UpscaleError::DecodeFailed { .. }));
    }

    #[test]
    fn test_decode_rejects_non_image_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.png");
        fs::write(&path, b"this is not a png").unwrap();
        let err = decode_image(&path).unwrap_err();
        assert!(matches!(err, UpscaleError::DecodeFailed { .. }));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.png");

        let img = RgbImage::from_fn(8, 6, |x, y| image::Rgb([x as u8, y as u8, 7]));
        encode_image(&img, &path).unwrap();

        let back = decode_image(&path).unwrap();
        assert_eq!(back.dimensions(), (8, 6));
        assert_eq!(back.as_raw(), img.as_raw());
    }

    #[test]
    fn test_encode_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.notaformat");
        let img = RgbImage::new(2, 2);
        let err = encode_image(&img, &path).unwrap_err();
        assert!(matches!(err, UpscaleError::EncodeFailed { .. }));
    }
}
