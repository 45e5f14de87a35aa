use std::io::Write;

use flate2::{write::ZlibEncoder, Compression};
use float_ord::FloatOrd;
use geo::{BoundingRect, Coord, Intersects, LineString, Rect};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, RgbImage};

pub const POINTS_PER_INCH: f32 = 72.0;

pub(crate) fn quad_rect(points: &[Coord<f32>]) -> Option<Rect<f32>> {
    if points.is_empty() {
        return None;
    }
    LineString::new(points.to_vec()).bounding_rect()
}

/// Inclusive containment, so a center lying exactly on a region edge still
/// counts as inside that region.
pub(crate) fn rect_contains(rect: &Rect<f32>, point: Coord<f32>) -> bool {
    rect.intersects(&point)
}

/// Axis-aligned `[x1, y1, x2, y2]` into a normalized `Rect`.
pub(crate) fn corners_rect([x1, y1, x2, y2]: [f32; 4]) -> Rect<f32> {
    Rect::new(Coord { x: x1, y: y1 }, Coord { x: x2, y: y2 })
}

/// Integer pixel rectangle `(x, y, width, height)` clipped to the image.
/// `None` when nothing of the region lies on the image.
pub(crate) fn pixel_rect(rect: &Rect<f32>, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = rect.min().x.floor().max(0.0) as u32;
    let y0 = rect.min().y.floor().max(0.0) as u32;
    let x1 = (rect.max().x.ceil().max(0.0) as u32).min(width);
    let y1 = (rect.max().y.ceil().max(0.0) as u32).min(height);
    if x0 >= x1 || y0 >= y1 {
        log::trace!("Region {rect:?} lies outside the {width}x{height} image");
        return None;
    }
    Some((x0, y0, x1 - x0, y1 - y0))
}

pub(crate) fn median(values: impl IntoIterator<Item = f32>) -> Option<f32> {
    let mut values = values.into_iter().collect::<Vec<_>>();
    if values.is_empty() {
        return None;
    }
    values.sort_by_key(|value| FloatOrd(*value));
    Some(values[values.len() / 2])
}

/// First `max_chars` characters, for log lines.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head = chars.by_ref().take(max_chars).collect::<String>();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    encoder.encode_image(image)?;
    Ok(bytes)
}

pub(crate) fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub(crate) fn encode_png(image: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_rect_of_empty_is_none() {
        assert!(quad_rect(&[]).is_none());
    }

    #[test]
    fn containment_includes_edges() {
        let rect = corners_rect([0.0, 0.0, 200.0, 200.0]);
        assert!(rect_contains(&rect, Coord { x: 50.0, y: 50.0 }));
        assert!(rect_contains(&rect, Coord { x: 200.0, y: 100.0 }));
        assert!(!rect_contains(&rect, Coord { x: 500.0, y: 500.0 }));
    }

    #[test]
    fn pixel_rect_clips_to_image() {
        let rect = corners_rect([-10.0, 5.5, 50.2, 120.0]);
        assert_eq!(pixel_rect(&rect, 40, 100), Some((0, 5, 40, 95)));
        let outside = corners_rect([50.0, 50.0, 60.0, 60.0]);
        assert_eq!(pixel_rect(&outside, 40, 40), None);
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn median_picks_middle() {
        assert_eq!(median([3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(Vec::<f32>::new()), None);
    }
}
