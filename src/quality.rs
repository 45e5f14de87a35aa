//! Guesses whether a PDF is scanned from its first few pages and recommends a
//! rasterization DPI.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::source::{PageProfile, PageSource};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub sample_pages: usize,
    /// Average characters per page below which a page counts as scanned.
    pub scanned_text_chars: f32,
    pub blurry_text_chars: f32,
    pub min_images_per_page: f32,
    pub scanned_dpi: u32,
    pub blurry_dpi: u32,
    pub normal_dpi: u32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            sample_pages: 3,
            scanned_text_chars: 50.0,
            blurry_text_chars: 200.0,
            min_images_per_page: 1.0,
            scanned_dpi: 300,
            blurry_dpi: 200,
            normal_dpi: 150,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfKind {
    Scanned,
    PartiallyScanned,
    Digital,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PdfQuality {
    pub kind: PdfKind,
    pub sampled_pages: usize,
    pub avg_text_chars: f32,
    pub avg_images: f32,
    pub recommended_dpi: u32,
    pub is_scanned: bool,
    pub has_text: bool,
}

pub fn assess(profiles: &[PageProfile], thresholds: &QualityThresholds) -> PdfQuality {
    let sampled = profiles.len();
    let (avg_text_chars, avg_images) = if sampled == 0 {
        (0.0, 0.0)
    } else {
        let text = profiles.iter().map(|p| p.text_chars).sum::<usize>() as f32;
        let images = profiles.iter().map(|p| p.image_count).sum::<usize>() as f32;
        (text / sampled as f32, images / sampled as f32)
    };
    let has_images = avg_images >= thresholds.min_images_per_page;

    let (kind, recommended_dpi) = if sampled > 0 && avg_text_chars < thresholds.scanned_text_chars && has_images {
        (PdfKind::Scanned, thresholds.scanned_dpi)
    } else if sampled > 0 && avg_text_chars < thresholds.blurry_text_chars && has_images {
        (PdfKind::PartiallyScanned, thresholds.blurry_dpi)
    } else {
        (PdfKind::Digital, thresholds.normal_dpi)
    };

    PdfQuality {
        kind,
        sampled_pages: sampled,
        avg_text_chars,
        avg_images,
        recommended_dpi,
        is_scanned: kind == PdfKind::Scanned,
        has_text: avg_text_chars > 0.0,
    }
}

/// Profiles up to `sample_pages` leading pages. Pages that fail to profile
/// are left out of the averages.
#[instrument(level = "debug", skip_all)]
pub fn detect_quality(source: &dyn PageSource, thresholds: &QualityThresholds) -> PdfQuality {
    let sample = source.page_count().min(thresholds.sample_pages);
    let profiles = (0..sample)
        .filter_map(|page| match source.profile(page) {
            Ok(profile) => Some(profile),
            Err(err) => {
                log::warn!("Could not profile page {}: {err}", page + 1);
                None
            }
        })
        .collect::<Vec<_>>();
    let quality = assess(&profiles, thresholds);
    log::info!(
        "PDF quality: {:?} (avg {:.0} chars, {:.1} images per page), recommended DPI {}",
        quality.kind,
        quality.avg_text_chars,
        quality.avg_images,
        quality.recommended_dpi
    );
    quality
}

/// The caller's DPI wins unless it is still the default and the heuristic
/// asks for more.
pub fn effective_dpi(requested: u32, default_dpi: u32, quality: &PdfQuality) -> u32 {
    if requested == default_dpi && quality.recommended_dpi > requested {
        quality.recommended_dpi
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(text_chars: usize, image_count: usize, count: usize) -> Vec<PageProfile> {
        vec![
            PageProfile {
                text_chars,
                image_count,
            };
            count
        ]
    }

    #[test]
    fn image_only_pages_are_scanned() {
        let quality = assess(&pages(0, 1, 3), &QualityThresholds::default());
        assert_eq!(quality.recommended_dpi, 300);
        assert!(quality.is_scanned);
        assert!(!quality.has_text);
    }

    #[test]
    fn text_pages_are_digital() {
        let quality = assess(&pages(500, 0, 3), &QualityThresholds::default());
        assert_eq!(quality.recommended_dpi, 150);
        assert_eq!(quality.kind, PdfKind::Digital);
        assert!(quality.has_text);
    }

    #[test]
    fn sparse_text_over_images_is_partially_scanned() {
        let quality = assess(&pages(120, 2, 3), &QualityThresholds::default());
        assert_eq!(quality.kind, PdfKind::PartiallyScanned);
        assert_eq!(quality.recommended_dpi, 200);
    }

    #[test]
    fn thresholds_are_configurable() {
        let thresholds = QualityThresholds {
            scanned_text_chars: 10.0,
            ..Default::default()
        };
        let quality = assess(&pages(30, 1, 3), &thresholds);
        assert_eq!(quality.kind, PdfKind::PartiallyScanned);
    }

    #[test]
    fn empty_sample_is_digital() {
        let quality = assess(&[], &QualityThresholds::default());
        assert_eq!(quality.kind, PdfKind::Digital);
        assert_eq!(quality.sampled_pages, 0);
    }

    #[test]
    fn explicit_dpi_is_respected() {
        let scanned = assess(&pages(0, 1, 3), &QualityThresholds::default());
        assert_eq!(effective_dpi(150, 150, &scanned), 300);
        assert_eq!(effective_dpi(96, 150, &scanned), 96);
        let digital = assess(&pages(500, 0, 3), &QualityThresholds::default());
        assert_eq!(effective_dpi(150, 150, &digital), 150);
    }
}
