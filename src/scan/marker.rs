use image::{GrayImage, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use imageproc::geometry::min_area_rect;
use imageproc::point::Point;

use crate::overview::morphology::{dilate, gradient};

pub const OVERVIEW_MARK_RADIUS: i32 = 20;
pub const OVERVIEW_MARK_THICKNESS: i32 = 3;

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);

/// Height of a label digit in pixels; digits are half as wide.
const DIGIT_HEIGHT: f32 = 16.0;

/// Copy of `overview` with a green ring centred on `center`.
///
/// With a `label`, its digits are written in red starting at the centre.
/// Centres outside the image still draw whatever part is visible.
pub fn mark_on_overview(overview: &RgbImage, center: (i64, i64), label: Option<u32>) -> RgbImage {
    let mut marked = overview.clone();
    let (cx, cy) = (clamp_i32(center.0), clamp_i32(center.1));
    let half = OVERVIEW_MARK_THICKNESS / 2;
    for radius in (OVERVIEW_MARK_RADIUS - half)..=(OVERVIEW_MARK_RADIUS + half) {
        draw_hollow_circle_mut(&mut marked, (cx, cy), radius, GREEN);
    }
    if let Some(label) = label {
        draw_number(&mut marked, (cx as f32, cy as f32), label, RED);
    }
    marked
}

/// Copy of `image` with the flake outlined in red and boxed in green.
///
/// The outline is the morphological gradient of the mask after two 3x3
/// dilations, so it sits just outside the flake. The box is the minimum-area
/// rotated rectangle around the mask after three 7x7 dilations.
pub fn mark_flake(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut marked = image.clone();
    let outline = gradient(&dilate(mask, 3, 2), 3);
    for (x, y, pixel) in outline.enumerate_pixels() {
        if pixel[0] > 0 && x < marked.width() && y < marked.height() {
            marked.put_pixel(x, y, RED);
        }
    }

    if let Some(corners) = rotated_box(mask) {
        draw_closed_polygon(&mut marked, &corners, GREEN);
    }
    marked
}

/// Corners of the minimum-area rectangle around the flake's outer contour.
pub fn rotated_box(mask: &GrayImage) -> Option<[Point<i32>; 4]> {
    let padded = dilate(mask, 7, 3);
    let contour = find_contours::<i32>(&padded)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .max_by_key(|c| c.points.len())?;
    Some(min_area_rect(&contour.points))
}

/// Two-pixel polygon: the outline plus a copy pulled one pixel inwards.
fn draw_closed_polygon(canvas: &mut RgbImage, corners: &[Point<i32>; 4], color: Rgb<u8>) {
    let cx = corners.iter().map(|p| p.x as f32).sum::<f32>() / 4.0;
    let cy = corners.iter().map(|p| p.y as f32).sum::<f32>() / 4.0;
    for inset in [0.0f32, 1.0] {
        let points: Vec<(f32, f32)> = corners
            .iter()
            .map(|p| {
                let (x, y) = (p.x as f32, p.y as f32);
                (x + inset * (cx - x).signum(), y + inset * (cy - y).signum())
            })
            .collect();
        for i in 0..points.len() {
            draw_line_segment_mut(canvas, points[i], points[(i + 1) % points.len()], color);
        }
    }
}

// =============================================================================
// Labels
// =============================================================================

/// Seven-segment layout per digit: a, b, c, d, e, f, g.
const SEGMENTS: [[bool; 7]; 10] = [
    [true, true, true, true, true, true, false],
    [false, true, true, false, false, false, false],
    [true, true, false, true, true, false, true],
    [true, true, true, true, false, false, true],
    [false, true, true, false, false, true, true],
    [true, false, true, true, false, true, true],
    [true, false, true, true, true, true, true],
    [true, true, true, false, false, false, false],
    [true, true, true, true, true, true, true],
    [true, true, true, true, false, true, true],
];

/// Draw `number` with its bottom-left corner at `origin`.
fn draw_number(canvas: &mut RgbImage, origin: (f32, f32), number: u32, color: Rgb<u8>) {
    let width = DIGIT_HEIGHT / 2.0;
    let advance = width + 4.0;
    for (i, digit) in number.to_string().bytes().enumerate() {
        let left = origin.0 + i as f32 * advance;
        draw_digit(canvas, (left, origin.1), (digit - b'0') as usize, color);
    }
}

fn draw_digit(canvas: &mut RgbImage, origin: (f32, f32), digit: usize, color: Rgb<u8>) {
    let (x0, x1) = (origin.0, origin.0 + DIGIT_HEIGHT / 2.0);
    let (top, middle, bottom) = (origin.1 - DIGIT_HEIGHT, origin.1 - DIGIT_HEIGHT / 2.0, origin.1);
    let strokes = [
        ((x0, top), (x1, top)),
        ((x1, top), (x1, middle)),
        ((x1, middle), (x1, bottom)),
        ((x0, bottom), (x1, bottom)),
        ((x0, middle), (x0, bottom)),
        ((x0, top), (x0, middle)),
        ((x0, middle), (x1, middle)),
    ];
    for (on, (start, end)) in SEGMENTS[digit].iter().zip(strokes) {
        if *on {
            draw_line_segment_mut(canvas, start, end, color);
            draw_line_segment_mut(canvas, (start.0 + 1.0, start.1), (end.0 + 1.0, end.1), color);
        }
    }
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}
