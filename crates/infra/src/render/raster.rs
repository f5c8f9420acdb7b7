//! Random abstract PNG images.

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use rand::Rng;

use super::RenderError;

pub const DEFAULT_WIDTH: u32 = 400;
pub const DEFAULT_HEIGHT: u32 = 300;
pub const SHAPE_COUNT: usize = 15;

fn random_color<R: Rng + ?Sized>(rng: &mut R) -> Rgb<u8> {
    Rgb([rng.r#gen(), rng.r#gen(), rng.r#gen()])
}

fn fill_rect(img: &mut RgbImage, (x0, y0): (u32, u32), (x1, y1): (u32, u32), color: Rgb<u8>) {
    for y in y0.min(y1)..=y0.max(y1).min(img.height() - 1) {
        for x in x0.min(x1)..=x0.max(x1).min(img.width() - 1) {
            img.put_pixel(x, y, color);
        }
    }
}

fn fill_ellipse(img: &mut RgbImage, (x0, y0): (u32, u32), (x1, y1): (u32, u32), color: Rgb<u8>) {
    let (left, right) = (x0.min(x1) as f32, x0.max(x1) as f32);
    let (top, bottom) = (y0.min(y1) as f32, y0.max(y1) as f32);
    let (cx, cy) = ((left + right) / 2.0, (top + bottom) / 2.0);
    let (rx, ry) = (((right - left) / 2.0).max(1.0), ((bottom - top) / 2.0).max(1.0));

    for y in top as u32..=(bottom as u32).min(img.height() - 1) {
        for x in left as u32..=(right as u32).min(img.width() - 1) {
            let dx = (x as f32 - cx) / rx;
            let dy = (y as f32 - cy) / ry;
            if dx * dx + dy * dy <= 1.0 {
                img.put_pixel(x, y, color);
            }
        }
    }
}

fn draw_line(
    img: &mut RgbImage,
    (x0, y0): (u32, u32),
    (x1, y1): (u32, u32),
    thickness: u32,
    color: Rgb<u8>,
) {
    let steps = x0.abs_diff(x1).max(y0.abs_diff(y1)).max(1);
    let half = thickness / 2;
    for step in 0..=steps {
        let t = step as f32 / steps as f32;
        let x = (x0 as f32 + (x1 as f32 - x0 as f32) * t).round() as u32;
        let y = (y0 as f32 + (y1 as f32 - y0 as f32) * t).round() as u32;
        fill_rect(
            img,
            (x.saturating_sub(half), y.saturating_sub(half)),
            (x + half, y + half),
            color,
        );
    }
}

/// Background plus [`SHAPE_COUNT`] random rectangles, ellipses and lines, PNG-encoded.
pub fn render_png<R: Rng + ?Sized>(rng: &mut R, width: u32, height: u32) -> Result<Vec<u8>, RenderError> {
    if width == 0 || height == 0 {
        return Err(RenderError::InvalidRequest(format!(
            "image size {width}x{height}"
        )));
    }

    let mut img = RgbImage::from_pixel(width, height, random_color(rng));
    let point = |rng: &mut R| (rng.gen_range(0..width), rng.gen_range(0..height));

    for _ in 0..SHAPE_COUNT {
        let color = random_color(rng);
        let a = point(rng);
        let b = point(rng);
        match rng.gen_range(0..3) {
            0 => fill_rect(&mut img, a, b, color),
            1 => fill_ellipse(&mut img, a, b, color),
            _ => {
                let thickness = rng.gen_range(1..=5);
                draw_line(&mut img, a, b, thickness, color);
            }
        }
    }

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}
