//! Raster side of translation: blank out recognized text and draw the
//! translated text back into the same regions.

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use geo::Rect;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_text_mut, text_size},
    rect::Rect as PixelRect,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    error::RenderError,
    result::TranslatedBlock,
    util::{median, pixel_rect, truncate},
};

pub const MIN_RENDER_SIZE: f32 = 12.0;
const RENDER_HEIGHT_RATIO: f32 = 0.8;
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EraseMode {
    /// Flat RGB fill.
    Fill([u8; 3]),
    /// Fill with the median colour of the pixels just outside the region.
    BorderSample,
}

impl Default for EraseMode {
    fn default() -> Self {
        EraseMode::Fill([255, 255, 255])
    }
}

/// Returns a copy of `image` with every region erased.
#[instrument(level = "debug", skip_all)]
pub fn erase_regions(
    image: &DynamicImage,
    regions: impl IntoIterator<Item = Rect<f32>>,
    mode: EraseMode,
) -> DynamicImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();
    let mut erased = 0;
    for region in regions {
        let Some((x, y, w, h)) = pixel_rect(&region, width, height) else {
            continue;
        };
        let color = match mode {
            EraseMode::Fill(rgb) => Rgb(rgb),
            EraseMode::BorderSample => border_color(&canvas, x, y, w, h),
        };
        draw_filled_rect_mut(&mut canvas, PixelRect::at(x as i32, y as i32).of_size(w, h), color);
        erased += 1;
    }
    log::trace!("Erased {erased} regions");
    DynamicImage::ImageRgb8(canvas)
}

/// Per-channel median of the one-pixel ring around the region, white when
/// the region covers the whole image.
fn border_color(canvas: &RgbImage, x: u32, y: u32, w: u32, h: u32) -> Rgb<u8> {
    let (width, height) = canvas.dimensions();
    let (left, top) = (x as i64 - 1, y as i64 - 1);
    let (right, bottom) = ((x + w) as i64, (y + h) as i64);
    let mut ring = Vec::new();
    for px in left..=right {
        for py in [top, bottom] {
            ring.push((px, py));
        }
    }
    for py in y as i64..bottom {
        for px in [left, right] {
            ring.push((px, py));
        }
    }
    let samples = ring
        .into_iter()
        .filter(|&(px, py)| px >= 0 && py >= 0 && px < width as i64 && py < height as i64)
        .map(|(px, py)| *canvas.get_pixel(px as u32, py as u32))
        .collect::<Vec<_>>();

    let channel = |c: usize| {
        median(samples.iter().map(|pixel| pixel[c] as f32))
            .map(|value| value as u8)
            .unwrap_or(255)
    };
    Rgb([channel(0), channel(1), channel(2)])
}

/// Font size for a translated block of the given region height.
pub fn render_size(region_height: f32) -> f32 {
    (region_height * RENDER_HEIGHT_RATIO).max(MIN_RENDER_SIZE)
}

/// Greedy character wrap: a line grows while it still fits `max_width`.
/// Every line holds at least one character.
pub fn wrap_text(text: &str, font: &FontArc, scale: PxScale, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for c in paragraph.chars() {
            line.push(c);
            if line.chars().count() > 1 && text_size(scale, font, &line).0 as f32 > max_width {
                line.pop();
                lines.push(std::mem::take(&mut line));
                line.push(c);
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

/// Returns a copy of `image` with each block's translation drawn top-down
/// inside its region. Lines that would run past the region's bottom edge are
/// dropped; the first line is always drawn.
#[instrument(level = "debug", skip_all, fields(blocks = blocks.len()))]
pub fn render_translations(image: &DynamicImage, blocks: &[TranslatedBlock], font: &FontArc) -> DynamicImage {
    let mut canvas = image.to_rgb8();
    for block in blocks {
        let Some(rect) = block.rect() else {
            continue;
        };
        let text = block.translated_text.trim();
        if text.is_empty() {
            continue;
        }
        let size = render_size(rect.height());
        let scale = PxScale::from(size);
        let lines = wrap_text(text, font, scale, rect.width());
        let bottom = rect.max().y;
        let mut y = rect.min().y;
        for (index, line) in lines.iter().enumerate() {
            if index > 0 && y + size > bottom {
                log::debug!(
                    "Dropped {} overflowing lines of \"{}\"",
                    lines.len() - index,
                    truncate(text, 20)
                );
                break;
            }
            draw_text_mut(&mut canvas, TEXT_COLOR, rect.min().x as i32, y as i32, scale, font, line);
            y += size;
        }
    }
    DynamicImage::ImageRgb8(canvas)
}

#[rustfmt::skip]
const CJK_FONT_PATHS: &[&str] = &[
    "/System/Library/Fonts/PingFang.ttc",
    "/System/Library/Fonts/STHeiti Light.ttc",
    "/System/Library/Fonts/Hiragino Sans GB.ttc",
    "/Library/Fonts/Arial Unicode.ttf",
    "C:\\Windows\\Fonts\\msjh.ttc",
    "C:\\Windows\\Fonts\\msyh.ttc",
    "C:\\Windows\\Fonts\\simsun.ttc",
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/google-noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/truetype/wqy/wqy-zenhei.ttc",
    "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc",
    "/usr/share/fonts/truetype/droid/DroidSansFallbackFull.ttf",
];

const GENERIC_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Helvetica.ttc",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Finds a font for translated text: the user's file, then CJK-capable
/// system fonts, then a generic sans. The first font that parses is kept.
pub struct FontResolver {
    candidates: Vec<PathBuf>,
    resolved: Option<FontArc>,
}

impl FontResolver {
    pub fn new(user_font: Option<&Path>) -> Self {
        let candidates = user_font
            .map(Path::to_path_buf)
            .into_iter()
            .chain(CJK_FONT_PATHS.iter().chain(GENERIC_FONT_PATHS).map(PathBuf::from))
            .collect();
        Self {
            candidates,
            resolved: None,
        }
    }

    /// Only the given paths, in order.
    pub fn with_candidates(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            resolved: None,
        }
    }

    pub fn resolve(&mut self) -> Result<FontArc, RenderError> {
        if let Some(font) = &self.resolved {
            return Ok(font.clone());
        }
        for path in &self.candidates {
            let Ok(data) = std::fs::read(path) else {
                continue;
            };
            match FontArc::try_from_vec(data) {
                Ok(font) => {
                    log::debug!("Rendering translations with {}", path.display());
                    self.resolved = Some(font.clone());
                    return Ok(font);
                }
                Err(_) => log::warn!("{}", RenderError::InvalidFont { path: path.clone() }),
            }
        }
        Err(RenderError::NoFont {
            tried: self.candidates.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::corners_rect;

    fn gray_page() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 60, Rgb([90, 90, 90])))
    }

    #[test]
    fn fill_erases_only_the_region() {
        let source = gray_page();
        let erased = erase_regions(&source, [corners_rect([10.0, 10.0, 30.0, 20.0])], EraseMode::default()).to_rgb8();
        assert_eq!(*erased.get_pixel(15, 15), Rgb([255, 255, 255]));
        assert_eq!(*erased.get_pixel(50, 50), Rgb([90, 90, 90]));
        assert_eq!(*source.to_rgb8().get_pixel(15, 15), Rgb([90, 90, 90]));
    }

    #[test]
    fn border_sample_matches_surroundings() {
        let mut page = RgbImage::from_pixel(100, 60, Rgb([200, 180, 160]));
        for x in 20..40 {
            for y in 20..30 {
                page.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        let erased = erase_regions(
            &DynamicImage::ImageRgb8(page),
            [corners_rect([20.0, 20.0, 40.0, 30.0])],
            EraseMode::BorderSample,
        )
        .to_rgb8();
        assert_eq!(*erased.get_pixel(30, 25), Rgb([200, 180, 160]));
    }

    #[test]
    fn regions_off_the_image_are_ignored() {
        let erased = erase_regions(&gray_page(), [corners_rect([500.0, 500.0, 600.0, 600.0])], EraseMode::default());
        assert_eq!(erased.to_rgb8(), gray_page().to_rgb8());
    }

    #[test]
    fn render_size_has_a_floor() {
        assert_eq!(render_size(5.0), MIN_RENDER_SIZE);
        assert_eq!(render_size(50.0), 40.0);
    }

    #[test]
    fn erase_mode_reads_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: EraseMode,
        }
        let wrapper: Wrapper = toml::from_str("mode = \"border_sample\"").unwrap();
        assert_eq!(wrapper.mode, EraseMode::BorderSample);
        let wrapper: Wrapper = toml::from_str("mode = { fill = [0, 0, 0] }").unwrap();
        assert_eq!(wrapper.mode, EraseMode::Fill([0, 0, 0]));
    }

    #[test]
    fn missing_fonts_are_reported() {
        let mut resolver = FontResolver::with_candidates(vec![PathBuf::from("/nonexistent/font.ttf")]);
        assert!(matches!(resolver.resolve(), Err(RenderError::NoFont { tried: 1 })));
    }

    #[test]
    fn wraps_and_renders_with_a_system_font() {
        // Rendering needs a real font; hosts without one skip this check.
        let Ok(font) = FontResolver::new(None).resolve() else {
            return;
        };
        let scale = PxScale::from(20.0);
        let lines = wrap_text("a fairly long sentence to wrap", &font, scale, 60.0);
        assert!(lines.len() > 1);
        assert_eq!(lines.concat(), "a fairly long sentence to wrap");
        for line in &lines[..lines.len() - 1] {
            assert!(text_size(scale, &font, line).0 as f32 <= 60.0);
        }

        let block = TranslatedBlock {
            original_text: "x".into(),
            translated_text: "Hi".into(),
            bbox: crate::result::corners_to_quad([10.0, 10.0, 90.0, 50.0]),
        };
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 60, Rgb([255, 255, 255])));
        let rendered = render_translations(&source, &[block], &font).to_rgb8();
        assert!(rendered.pixels().any(|pixel| pixel[0] < 128));
        assert!(source.to_rgb8().pixels().all(|pixel| pixel[0] == 255));
    }

    #[test]
    fn overflowing_lines_stay_inside_the_region() {
        let Ok(font) = FontResolver::new(None).resolve() else {
            return;
        };
        // 30 px tall region: one 24 px line fits, a second would end at 58.
        let block = TranslatedBlock {
            original_text: "x".into(),
            translated_text: "translated text that keeps going and going".into(),
            bbox: crate::result::corners_to_quad([10.0, 10.0, 60.0, 40.0]),
        };
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb([255, 255, 255])));
        let rendered = render_translations(&source, &[block], &font).to_rgb8();

        assert!(rendered
            .enumerate_pixels()
            .any(|(_, y, pixel)| (10..40).contains(&y) && pixel[0] < 128));
        assert!(rendered
            .enumerate_pixels()
            .filter(|(_, y, _)| *y >= 40)
            .all(|(_, _, pixel)| *pixel == Rgb([255, 255, 255])));
    }
}
