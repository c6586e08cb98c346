//! Overlay rendering: a thin output sink turning a frame report into an RGB
//! image for operators (keypoint markers, measurement segments, placement
//! guide).

use std::path::Path;

use garment_qc_core::GrayImage;
use garment_qc_track::{AnnotationSet, LiveMeasurement, Role};
use image::{Rgb, RgbImage};
use nalgebra::Point2;

const COLOR_CORNER: Rgb<u8> = Rgb([255, 200, 0]);
const COLOR_PERP: Rgb<u8> = Rgb([255, 0, 255]);
const COLOR_NORMAL: Rgb<u8> = Rgb([0, 220, 0]);
const COLOR_UNSTABLE: Rgb<u8> = Rgb([255, 255, 0]);
const COLOR_PASS: Rgb<u8> = Rgb([0, 200, 0]);
const COLOR_FAIL: Rgb<u8> = Rgb([220, 0, 0]);
const COLOR_PIXEL_ONLY: Rgb<u8> = Rgb([255, 0, 255]);
const COLOR_GUIDE: Rgb<u8> = Rgb([0, 255, 0]);

const MARKER_RADIUS: i32 = 6;

/// Draw the per-frame overlay: placement guide, measurement segments
/// (colored by QC outcome), and role-colored keypoint markers.
pub fn render_overlay(
    frame: &GrayImage,
    annotation: &AnnotationSet,
    points: &[Option<Point2<f32>>],
    measurements: &[LiveMeasurement],
    stabilized: bool,
) -> RgbImage {
    let mut canvas = gray_to_rgb(frame);

    if let Some([x1, y1, x2, y2]) = annotation.placement_box {
        draw_rect(
            &mut canvas,
            x1 as i32,
            y1 as i32,
            x2 as i32,
            y2 as i32,
            COLOR_GUIDE,
        );
    }

    for m in measurements {
        let i = (m.pair_id as usize - 1) * 2;
        let (Some(Some(p1)), Some(Some(p2))) = (points.get(i), points.get(i + 1)) else {
            continue;
        };
        let color = match m.real_cm {
            Some(_) if m.qc_passed => COLOR_PASS,
            Some(_) => COLOR_FAIL,
            None => COLOR_PIXEL_ONLY,
        };
        draw_segment(
            &mut canvas,
            p1.x as i32,
            p1.y as i32,
            p2.x as i32,
            p2.y as i32,
            color,
        );
    }

    for (i, point) in points.iter().enumerate() {
        let Some(p) = point else { continue };
        let role = annotation.roles.get(i).copied().unwrap_or(Role::Normal);
        let color = match role {
            Role::Corner => COLOR_CORNER,
            Role::Perpendicular => COLOR_PERP,
            Role::Normal if stabilized => COLOR_NORMAL,
            Role::Normal => COLOR_UNSTABLE,
        };
        draw_disc(&mut canvas, p.x as i32, p.y as i32, MARKER_RADIUS, color);
    }

    canvas
}

/// Save an overlay; wraps the `image` crate so binaries need no direct
/// image dependency.
pub fn save_overlay(path: &Path, overlay: &RgbImage) -> std::io::Result<()> {
    overlay
        .save(path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

fn gray_to_rgb(frame: &GrayImage) -> RgbImage {
    let mut out = RgbImage::new(frame.width as u32, frame.height as u32);
    for y in 0..frame.height {
        for x in 0..frame.width {
            let v = frame.get(x, y);
            out.put_pixel(x as u32, y as u32, Rgb([v, v, v]));
        }
    }
    out
}

fn put(canvas: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_disc(canvas: &mut RgbImage, cx: i32, cy: i32, radius: i32, color: Rgb<u8>) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put(canvas, cx + dx, cy + dy, color);
            }
        }
    }
}

/// Bresenham segment.
fn draw_segment(canvas: &mut RgbImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb<u8>) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x0, y0);
    loop {
        put(canvas, x, y, color);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_rect(canvas: &mut RgbImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb<u8>) {
    draw_segment(canvas, x0, y0, x1, y0, color);
    draw_segment(canvas, x1, y0, x1, y1, color);
    draw_segment(canvas, x1, y1, x0, y1, color);
    draw_segment(canvas, x0, y1, x0, y0, color);
}
