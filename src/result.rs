use geo::{Coord, Rect};

use crate::util::quad_rect;

/// One recognized text span with its quadrilateral box in image space.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrResult {
    pub text: String,
    pub confidence: f32,
    /// Clockwise from top-left for engine output. Validation drops anything
    /// that does not have exactly four points.
    pub bbox: Vec<Coord<f32>>,
}

impl OcrResult {
    pub fn new(text: impl Into<String>, confidence: f32, bbox: Vec<Coord<f32>>) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox,
        }
    }

    /// Expands an axis-aligned `[x1, y1, x2, y2]` box into four corners.
    pub fn from_corners(text: impl Into<String>, confidence: f32, corners: [f32; 4]) -> Self {
        Self::new(text, confidence, corners_to_quad(corners))
    }

    pub fn rect(&self) -> Option<Rect<f32>> {
        quad_rect(&self.bbox)
    }

    pub fn x(&self) -> f32 {
        self.rect().map_or(0.0, |rect| rect.min().x)
    }

    pub fn y(&self) -> f32 {
        self.rect().map_or(0.0, |rect| rect.min().y)
    }

    pub fn width(&self) -> f32 {
        self.rect().map_or(0.0, |rect| rect.width())
    }

    pub fn height(&self) -> f32 {
        self.rect().map_or(0.0, |rect| rect.height())
    }

    pub fn center(&self) -> Option<Coord<f32>> {
        self.rect().map(|rect| rect.center())
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Scales every point in place, e.g. `72.0 / dpi` to go from raster pixels
    /// to PDF points.
    pub fn rescale(&mut self, factor: f32) {
        for point in self.bbox.iter_mut() {
            point.x *= factor;
            point.y *= factor;
        }
    }

    pub fn bbox_array(&self) -> Vec<[f32; 2]> {
        self.bbox.iter().map(|point| [point.x, point.y]).collect()
    }
}

/// A recognized region paired with its translation.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedBlock {
    pub original_text: String,
    pub translated_text: String,
    pub bbox: Vec<Coord<f32>>,
}

impl TranslatedBlock {
    pub fn new(result: &OcrResult, translated_text: impl Into<String>) -> Self {
        Self {
            original_text: result.text.clone(),
            translated_text: translated_text.into(),
            bbox: result.bbox.clone(),
        }
    }

    pub fn rect(&self) -> Option<Rect<f32>> {
        quad_rect(&self.bbox)
    }

    pub fn x(&self) -> f32 {
        self.rect().map_or(0.0, |rect| rect.min().x)
    }

    pub fn y(&self) -> f32 {
        self.rect().map_or(0.0, |rect| rect.min().y)
    }

    pub fn width(&self) -> f32 {
        self.rect().map_or(0.0, |rect| rect.width())
    }

    pub fn height(&self) -> f32 {
        self.rect().map_or(0.0, |rect| rect.height())
    }
}

pub fn corners_to_quad([x1, y1, x2, y2]: [f32; 4]) -> Vec<Coord<f32>> {
    vec![
        Coord { x: x1, y: y1 },
        Coord { x: x2, y: y1 },
        Coord { x: x2, y: y2 },
        Coord { x: x1, y: y2 },
    ]
}
