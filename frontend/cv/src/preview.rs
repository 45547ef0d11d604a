//! Dashboard previews: a 2x2 grid of the pipeline stages, shipped as a JPEG data URI.

use anyhow::Context;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::frame::Frame;
use crate::line::Line;
use crate::line_tracker::{TrackingMasks, TrackingResult};

pub const JPEG_QUALITY: u8 = 50;

const BOUNDARY: Rgb<u8> = Rgb([0, 255, 0]);
const CENTER: Rgb<u8> = Rgb([0, 0, 255]);
const AXIS: Rgb<u8> = Rgb([255, 255, 255]);

fn draw_line(image: &mut RgbImage, line: &Line, color: Rgb<u8>) {
    draw_line_segment_mut(
        image,
        (line.start.x as f32, line.start.y as f32),
        (line.end.x as f32, line.end.y as f32),
        color,
    );
}

fn annotate(image: &mut RgbImage, result: &TrackingResult) {
    let (width, height) = image.dimensions();
    let axis = width as f32 / 2.0;
    draw_line_segment_mut(image, (axis, 0.0), (axis, height as f32), AXIS);

    for line in [result.lines.left, result.lines.right].iter().flatten() {
        draw_line(image, line, BOUNDARY);
    }
    if let Some(center) = &result.lines.center {
        draw_line(image, center, CENTER);
    }
}

fn to_rgb(mask: &GrayImage) -> RgbImage {
    DynamicImage::ImageLuma8(mask.clone()).to_rgb8()
}

fn grid(tiles: [&RgbImage; 4], width: u32, height: u32) -> RgbImage {
    let mut out = RgbImage::new(width * 2, height * 2);
    for (i, tile) in tiles.into_iter().enumerate() {
        let x = (i as u32 % 2) * width;
        let y = (i as u32 / 2) * height;
        imageops::replace(&mut out, tile, x as i64, y as i64);
    }
    out
}

/// Frame | threshold mask / cleaned mask with lines | frame with lines
pub fn compose(frame: &Frame, result: &TrackingResult, masks: &TrackingMasks) -> RgbImage {
    let (width, height) = (frame.width(), frame.height());

    let threshold = to_rgb(&masks.threshold);
    let mut cleaned = to_rgb(&masks.cleaned);
    annotate(&mut cleaned, result);

    let mut annotated = frame.image.clone();
    annotate(&mut annotated, result);

    grid([&frame.image, &threshold, &cleaned, &annotated], width, height)
}

pub fn encode_jpeg(image: &RgbImage) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode_image(image)
        .context("Encode preview")?;
    Ok(buffer)
}

pub fn encode_data_uri(image: &RgbImage) -> anyhow::Result<String> {
    let jpeg = encode_jpeg(image)?;
    Ok(format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(jpeg)
    ))
}
