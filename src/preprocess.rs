use std::str::FromStr;

use image::{imageops, ColorType, DynamicImage, GrayImage, Luma, RgbImage};
use ndarray::Array4;

use crate::error::ServiceError;

/// Spatial resolution the classifier was trained on.
pub const IMAGE_SIZE: u32 = 80;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResizeFilter {
    /// Bilinear sampling matching OpenCV's `INTER_LINEAR`, used at training time.
    #[default]
    Linear,
    Nearest,
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl ResizeFilter {
    fn filter_type(self) -> Option<imageops::FilterType> {
        match self {
            ResizeFilter::Linear => None,
            ResizeFilter::Nearest => Some(imageops::FilterType::Nearest),
            ResizeFilter::Triangle => Some(imageops::FilterType::Triangle),
            ResizeFilter::CatmullRom => Some(imageops::FilterType::CatmullRom),
            ResizeFilter::Gaussian => Some(imageops::FilterType::Gaussian),
            ResizeFilter::Lanczos3 => Some(imageops::FilterType::Lanczos3),
        }
    }
}

impl FromStr for ResizeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(ResizeFilter::Linear),
            "nearest" => Ok(ResizeFilter::Nearest),
            "triangle" => Ok(ResizeFilter::Triangle),
            "catmullrom" => Ok(ResizeFilter::CatmullRom),
            "gaussian" => Ok(ResizeFilter::Gaussian),
            "lanczos3" => Ok(ResizeFilter::Lanczos3),
            other => Err(format!("unknown resize filter `{}`", other)),
        }
    }
}

pub fn decode_grayscale(image_data: &[u8]) -> Result<GrayImage, ServiceError> {
    let img = image::load_from_memory(image_data)?;
    let gray = to_gray(&img);

    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Err(ServiceError::EmptyImage { width, height });
    }

    Ok(gray)
}

/// Single-channel inputs keep their luma; colour inputs use BT.601 weights in
/// 14-bit fixed point, the same conversion OpenCV applies on grayscale decode.
/// Alpha is dropped.
fn to_gray(img: &DynamicImage) -> GrayImage {
    match img.color() {
        ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16 => img.to_luma8(),
        _ => rgb_to_gray(&img.to_rgb8()),
    }
}

fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;

    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = (r as u32 * R + g as u32 * G + b as u32 * B + (1 << (SHIFT - 1))) >> SHIFT;
        Luma([luma as u8])
    })
}

pub fn resize(image: &GrayImage, width: u32, height: u32, filter: ResizeFilter) -> GrayImage {
    match filter.filter_type() {
        Some(filter_type) => imageops::resize(image, width, height, filter_type),
        None => resize_linear(image, width, height),
    }
}

/// Half-pixel centred bilinear resize without antialiasing. Source coordinates
/// are clamped to the image edge, results are rounded to the nearest integer.
fn resize_linear(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (src_width, src_height) = image.dimensions();
    let scale_x = src_width as f32 / width as f32;
    let scale_y = src_height as f32 / height as f32;

    let xs: Vec<(u32, u32, f32)> = (0..width)
        .map(|dx| sample_coords(dx, scale_x, src_width))
        .collect();

    let mut output = GrayImage::new(width, height);
    for dy in 0..height {
        let (y0, y1, wy) = sample_coords(dy, scale_y, src_height);
        for (dx, &(x0, x1, wx)) in xs.iter().enumerate() {
            let p = |x, y| image.get_pixel(x, y)[0] as f32;
            let top = p(x0, y0) * (1.0 - wx) + p(x1, y0) * wx;
            let bottom = p(x0, y1) * (1.0 - wx) + p(x1, y1) * wx;
            let value = top * (1.0 - wy) + bottom * wy;
            output.put_pixel(dx as u32, dy, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }

    output
}

fn sample_coords(dst: u32, scale: f32, src_len: u32) -> (u32, u32, f32) {
    let f = (dst as f32 + 0.5) * scale - 0.5;
    let mut i = f.floor();
    let mut weight = f - i;

    if i < 0.0 {
        i = 0.0;
        weight = 0.0;
    }
    let last = src_len - 1;
    if i as u32 >= last {
        return (last, last, 0.0);
    }

    let i = i as u32;
    (i, i + 1, weight)
}

/// Lays a grayscale image out as `(batch=1, height, width, channel=1)` in `[0, 1]`.
pub fn to_tensor(image: &GrayImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    Array4::from_shape_fn(
        (1, height as usize, width as usize, 1),
        |(_, y, x, _)| image.get_pixel(x as u32, y as u32)[0] as f32 / 255.0,
    )
}

pub fn preprocess_image(image_data: &[u8], filter: ResizeFilter) -> Result<Array4<f32>, ServiceError> {
    let gray = decode_grayscale(image_data)?;
    let resized = resize(&gray, IMAGE_SIZE, IMAGE_SIZE, filter);
    Ok(to_tensor(&resized))
}
