//! Cropping detected faces out of a capture.

use std::io::Cursor;

use image::ImageFormat;
use thiserror::Error;

use crate::types::{FaceBox, Photo};

const CROP_MIME_TYPE: &str = "image/png";

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("face box covers no pixels")]
    EmptyRegion,
}

/// Cut the region under `face_box` out of `photo`, re-encoded as PNG.
pub fn crop(photo: &Photo, face_box: &FaceBox) -> Result<Photo, ImagingError> {
    let img = image::load_from_memory(&photo.data)?;
    let (width, height) = (img.width(), img.height());
    let b = face_box.normalized();

    let x0 = (b.left * width as f32).floor() as u32;
    let x1 = ((b.right * width as f32).ceil() as u32).min(width);
    let y0 = (b.top * height as f32).floor() as u32;
    let y1 = ((b.bottom * height as f32).ceil() as u32).min(height);
    if x1 <= x0 || y1 <= y0 {
        return Err(ImagingError::EmptyRegion);
    }

    let face = img.crop_imm(x0, y0, x1 - x0, y1 - y0);
    let mut out = Cursor::new(Vec::new());
    face.write_to(&mut out, ImageFormat::Png)?;
    tracing::debug!(x0, y0, w = x1 - x0, h = y1 - y0, "face cropped");

    Ok(Photo::new(CROP_MIME_TYPE, out.into_inner()))
}
