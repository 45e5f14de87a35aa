//! Normalizes the several result shapes PaddleOCR pipelines produce into a
//! flat list of [`OcrResult`].
//!
//! Raw output is classified once into a [`RawOcrShape`] and then routed to the
//! extractor for that shape. Adding a new engine output format means adding a
//! variant and an extractor, nothing else.

use float_ord::FloatOrd;
use geo::Coord;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::instrument;

use crate::{
    error::ParseError,
    result::{corners_to_quad, OcrResult},
    util::median,
};

/// Typed per-image OCR output with parallel arrays.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcrRecord {
    #[serde(default)]
    pub rec_texts: Vec<String>,
    #[serde(default)]
    pub rec_scores: Vec<f32>,
    #[serde(default, alias = "rec_polys")]
    pub dt_polys: Vec<BoxValue>,
    #[serde(default)]
    pub rec_boxes: Vec<BoxValue>,
}

/// A text box as engines emit it: a polygon of points, or flat numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BoxValue {
    Points(Vec<[f32; 2]>),
    Flat(Vec<f32>),
}

/// One entry of a layout engine's `parsing_res_list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsingBlock {
    #[serde(alias = "block_bbox")]
    pub bbox: Vec<f32>,
    #[serde(default, alias = "block_content")]
    pub content: String,
    #[serde(default, alias = "block_label")]
    pub label: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RawOcrShape {
    /// Deserialized directly into [`OcrRecord`].
    Attribute(OcrRecord),
    /// Same keys as [`OcrRecord`] but loosely typed, read field by field.
    Dict(Map<String, Value>),
    /// A layout result carrying the full-page OCR pass under `overall_ocr_res`.
    LayoutOverall(Box<RawOcrShape>),
    /// A layout result carrying only region blocks with their content.
    LayoutParsingList(Vec<ParsingBlock>),
}

impl RawOcrShape {
    /// Classifies one engine result (or an array of them).
    pub fn classify(value: Value) -> Result<Vec<RawOcrShape>, ParseError> {
        match value {
            Value::Array(items) => {
                let mut shapes = Vec::with_capacity(items.len());
                for item in items {
                    shapes.extend(Self::classify(item)?);
                }
                Ok(shapes)
            }
            Value::Object(mut map) => {
                if let Some(pruned) = map.remove("prunedResult") {
                    return Self::classify(pruned);
                }
                if let Some(overall) = map.remove("overall_ocr_res") {
                    if !overall.is_null() {
                        let inner = Self::classify(overall)?
                            .into_iter()
                            .next()
                            .ok_or_else(|| ParseError::UnknownShape("empty overall_ocr_res".into()))?;
                        return Ok(vec![RawOcrShape::LayoutOverall(Box::new(inner))]);
                    }
                }
                if let Some(list) = map.remove("parsing_res_list") {
                    let blocks = serde_json::from_value::<Vec<Value>>(list)
                        .map_err(|_| ParseError::FieldType { field: "parsing_res_list" })?
                        .into_iter()
                        .filter_map(|block| serde_json::from_value::<ParsingBlock>(block).ok())
                        .collect();
                    return Ok(vec![RawOcrShape::LayoutParsingList(blocks)]);
                }
                if map.contains_key("rec_texts") {
                    return Ok(vec![
                        match serde_json::from_value::<OcrRecord>(Value::Object(map.clone())) {
                            Ok(record) => RawOcrShape::Attribute(record),
                            Err(_) => RawOcrShape::Dict(map),
                        },
                    ]);
                }
                Err(ParseError::UnknownShape(format!(
                    "object with keys {:?}",
                    map.keys().collect::<Vec<_>>()
                )))
            }
            other => Err(ParseError::UnknownShape(format!("{other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadingOrder {
    #[default]
    TopToBottom,
    LeftToRight,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultParser {
    strict: bool,
}

impl ResultParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// In strict mode the first malformed item aborts parsing.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[instrument(level = "debug", skip(self, raw), fields(shapes = raw.len()))]
    pub fn parse(&self, raw: &[RawOcrShape]) -> Result<Vec<OcrResult>, ParseError> {
        let mut results = Vec::new();
        for shape in raw {
            self.parse_shape(shape, &mut results)?;
        }
        log::debug!("Parsed {} OCR results", results.len());
        Ok(results)
    }

    /// Classifies a JSON engine response and parses it. Array elements are
    /// classified one at a time so an unrecognized element only costs itself.
    pub fn parse_value(&self, value: Value) -> Result<Vec<OcrResult>, ParseError> {
        if let Value::Array(items) = value {
            let mut results = Vec::new();
            for item in items {
                results.extend(self.parse_value(item)?);
            }
            return Ok(results);
        }
        match RawOcrShape::classify(value) {
            Ok(shapes) => self.parse(&shapes),
            Err(err) if self.strict => Err(err),
            Err(err) => {
                log::warn!("Skipping unrecognized OCR output: {err}");
                Ok(Vec::new())
            }
        }
    }

    fn parse_shape(&self, shape: &RawOcrShape, out: &mut Vec<OcrResult>) -> Result<(), ParseError> {
        match shape {
            RawOcrShape::Attribute(record) => self.extract_record(record, out),
            RawOcrShape::Dict(map) => self.extract_dict(map, out),
            RawOcrShape::LayoutOverall(inner) => self.parse_shape(inner, out),
            RawOcrShape::LayoutParsingList(blocks) => self.extract_parsing_list(blocks, out),
        }
    }

    fn extract_record(&self, record: &OcrRecord, out: &mut Vec<OcrResult>) -> Result<(), ParseError> {
        for (index, text) in record.rec_texts.iter().enumerate() {
            let item = record
                .dt_polys
                .get(index)
                .or_else(|| record.rec_boxes.get(index))
                .ok_or(ParseError::BadBox { index, points: 0 })
                .and_then(|value| box_to_quad(value, index));
            match item {
                Ok(bbox) => {
                    let confidence = record.rec_scores.get(index).copied().unwrap_or(1.0);
                    out.push(OcrResult::new(text.clone(), confidence, bbox));
                }
                Err(err) => self.skip_or_fail(err)?,
            }
        }
        Ok(())
    }

    fn extract_dict(&self, map: &Map<String, Value>, out: &mut Vec<OcrResult>) -> Result<(), ParseError> {
        let texts = match map.get("rec_texts").and_then(Value::as_array) {
            Some(texts) => texts,
            None => return self.skip_or_fail(ParseError::FieldType { field: "rec_texts" }),
        };
        let scores = map.get("rec_scores").and_then(Value::as_array);
        let polys = ["dt_polys", "rec_polys", "rec_boxes"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array));

        for (index, text) in texts.iter().enumerate() {
            let item = text
                .as_str()
                .ok_or(ParseError::MissingText { index })
                .and_then(|text| {
                    let value = polys
                        .and_then(|polys| polys.get(index))
                        .ok_or(ParseError::BadBox { index, points: 0 })?;
                    let bbox = serde_json::from_value::<BoxValue>(value.clone())
                        .map_err(|_| ParseError::BadBox { index, points: 0 })
                        .and_then(|value| box_to_quad(&value, index))?;
                    Ok((text, bbox))
                });
            match item {
                Ok((text, bbox)) => {
                    let confidence = scores
                        .and_then(|scores| scores.get(index))
                        .and_then(Value::as_f64)
                        .map_or(1.0, |score| score as f32);
                    out.push(OcrResult::new(text, confidence, bbox));
                }
                Err(err) => self.skip_or_fail(err)?,
            }
        }
        Ok(())
    }

    fn extract_parsing_list(&self, blocks: &[ParsingBlock], out: &mut Vec<OcrResult>) -> Result<(), ParseError> {
        for (index, block) in blocks.iter().enumerate() {
            if block.content.trim().is_empty() {
                continue;
            }
            match box_to_quad(&BoxValue::Flat(block.bbox.clone()), index) {
                // Parsing blocks carry no recognition score.
                Ok(bbox) => out.push(OcrResult::new(block.content.clone(), 1.0, bbox)),
                Err(err) => self.skip_or_fail(err)?,
            }
        }
        Ok(())
    }

    fn skip_or_fail(&self, err: ParseError) -> Result<(), ParseError> {
        if self.strict {
            Err(err)
        } else {
            log::debug!("Skipping OCR item: {err}");
            Ok(())
        }
    }
}

pub fn box_to_quad(value: &BoxValue, index: usize) -> Result<Vec<Coord<f32>>, ParseError> {
    match value {
        BoxValue::Points(points) if points.len() == 4 => {
            Ok(points.iter().map(|&[x, y]| Coord { x, y }).collect())
        }
        BoxValue::Points(points) if points.len() == 2 => {
            let [[x1, y1], [x2, y2]] = [points[0], points[1]];
            Ok(corners_to_quad([x1, y1, x2, y2]))
        }
        BoxValue::Flat(numbers) if numbers.len() == 4 => {
            Ok(corners_to_quad([numbers[0], numbers[1], numbers[2], numbers[3]]))
        }
        BoxValue::Flat(numbers) if numbers.len() == 8 => Ok(numbers
            .chunks_exact(2)
            .map(|pair| Coord { x: pair[0], y: pair[1] })
            .collect()),
        BoxValue::Points(points) => Err(ParseError::BadBox {
            index,
            points: points.len(),
        }),
        BoxValue::Flat(numbers) => Err(ParseError::BadBox {
            index,
            points: numbers.len() / 2,
        }),
    }
}

/// Drops blank or malformed results and clamps confidence into `[0, 1]`.
pub fn validate_results(results: Vec<OcrResult>) -> Vec<OcrResult> {
    let before = results.len();
    let valid = results
        .into_iter()
        .filter(|result| !result.is_blank())
        .filter(|result| {
            result.bbox.len() == 4
                && result
                    .bbox
                    .iter()
                    .all(|point| point.x.is_finite() && point.y.is_finite())
        })
        .map(|mut result| {
            result.confidence = if result.confidence.is_nan() {
                0.0
            } else {
                result.confidence.clamp(0.0, 1.0)
            };
            result
        })
        .collect::<Vec<_>>();
    if valid.len() != before {
        log::debug!("Validation dropped {} of {before} results", before - valid.len());
    }
    valid
}

pub fn filter_by_confidence(results: Vec<OcrResult>, min_confidence: f32) -> Vec<OcrResult> {
    results
        .into_iter()
        .filter(|result| result.confidence >= min_confidence)
        .collect()
}

/// Stable sort on the top-left corner of each box.
pub fn sort_by_position(mut results: Vec<OcrResult>, order: ReadingOrder) -> Vec<OcrResult> {
    match order {
        ReadingOrder::TopToBottom => {
            results.sort_by_key(|result| (FloatOrd(result.y()), FloatOrd(result.x())))
        }
        ReadingOrder::LeftToRight => {
            results.sort_by_key(|result| (FloatOrd(result.x()), FloatOrd(result.y())))
        }
    }
    results
}

/// Top-to-bottom sort that treats boxes whose tops lie within
/// `tolerance * median line height` of the current line's first box as one
/// line, ordered left to right.
pub fn sort_reading_order(results: Vec<OcrResult>, tolerance: f32) -> Vec<OcrResult> {
    let sorted = sort_by_position(results, ReadingOrder::TopToBottom);
    let band = match median(sorted.iter().map(OcrResult::height)) {
        Some(height) if tolerance > 0.0 => height * tolerance,
        _ => return sorted,
    };

    let mut ordered = Vec::with_capacity(sorted.len());
    let mut line: Vec<OcrResult> = Vec::new();
    let mut line_top = f32::NEG_INFINITY;
    for result in sorted {
        if !line.is_empty() && result.y() - line_top > band {
            line.sort_by_key(|result| FloatOrd(result.x()));
            ordered.append(&mut line);
        }
        if line.is_empty() {
            line_top = result.y();
        }
        line.push(result);
    }
    line.sort_by_key(|result| FloatOrd(result.x()));
    ordered.append(&mut line);
    ordered
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn texts(results: &[OcrResult]) -> Vec<&str> {
        results.iter().map(|result| result.text.as_str()).collect()
    }

    #[test]
    fn parses_attribute_shape() {
        let shapes = RawOcrShape::classify(json!({
            "rec_texts": ["Hello", "World"],
            "rec_scores": [0.98, 0.87],
            "dt_polys": [
                [[0, 0], [50, 0], [50, 20], [0, 20]],
                [[0, 30], [60, 30], [60, 50], [0, 50]]
            ]
        }))
        .unwrap();
        assert!(matches!(shapes[0], RawOcrShape::Attribute(_)));

        let results = ResultParser::new().parse(&shapes).unwrap();
        assert_eq!(texts(&results), ["Hello", "World"]);
        assert!((results[1].confidence - 0.87).abs() < 1e-6);
        assert_eq!(results[1].y(), 30.0);
    }

    #[test]
    fn loosely_typed_record_falls_back_to_dict() {
        let shapes = RawOcrShape::classify(json!({
            "rec_texts": ["ok", 7, "also ok"],
            "rec_boxes": [[0, 0, 10, 10], [0, 0, 1, 1], [5, 5, 20, 15]]
        }))
        .unwrap();
        assert!(matches!(shapes[0], RawOcrShape::Dict(_)));

        let results = ResultParser::new().parse(&shapes).unwrap();
        assert_eq!(texts(&results), ["ok", "also ok"]);
        assert_eq!(results[0].confidence, 1.0);
        assert_eq!(results[1].width(), 15.0);
    }

    #[test]
    fn strict_mode_surfaces_first_failure() {
        let shapes = RawOcrShape::classify(json!({
            "rec_texts": ["a", "b"],
            "rec_scores": [0.5, 0.5],
            "dt_polys": [[[0, 0], [1, 0], [1, 1]], [[0, 0], [1, 0], [1, 1], [0, 1]]]
        }))
        .unwrap();
        assert_eq!(ResultParser::new().parse(&shapes).unwrap().len(), 1);
        let err = ResultParser::new().strict(true).parse(&shapes).unwrap_err();
        assert!(matches!(err, ParseError::BadBox { index: 0, points: 3 }));
    }

    #[test]
    fn layout_overall_result_is_unwrapped() {
        let shapes = RawOcrShape::classify(json!([{
            "prunedResult": {
                "parsing_res_list": [{"block_bbox": [0, 0, 10, 10], "block_content": "ignored"}],
                "overall_ocr_res": {
                    "rec_texts": ["line"],
                    "rec_scores": [0.9],
                    "rec_polys": [[[1, 1], [9, 1], [9, 4], [1, 4]]]
                }
            }
        }]))
        .unwrap();
        assert!(matches!(shapes[0], RawOcrShape::LayoutOverall(_)));
        let results = ResultParser::new().parse(&shapes).unwrap();
        assert_eq!(texts(&results), ["line"]);
    }

    #[test]
    fn parsing_list_expands_corner_boxes_with_default_confidence() {
        let shapes = RawOcrShape::classify(json!({
            "parsing_res_list": [
                {"bbox": [10, 20, 110, 60], "content": "Title"},
                {"bbox": [10, 70, 110, 90], "content": "   "}
            ]
        }))
        .unwrap();
        let results = ResultParser::new().parse(&shapes).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].confidence, 1.0);
        assert_eq!(
            results[0].bbox_array(),
            vec![[10.0, 20.0], [110.0, 20.0], [110.0, 60.0], [10.0, 60.0]]
        );
    }

    #[test]
    fn unknown_shape_is_skipped_unless_strict() {
        assert!(ResultParser::new().parse_value(json!({"foo": 1})).unwrap().is_empty());
        assert!(ResultParser::new().strict(true).parse_value(json!({"foo": 1})).is_err());
    }

    #[test]
    fn unknown_array_element_keeps_its_neighbours() {
        let batch = json!([
            {
                "rec_texts": ["good"],
                "rec_scores": [0.9],
                "rec_boxes": [[0, 0, 40, 10]]
            },
            {"unexpected": 1}
        ]);

        let results = ResultParser::new().parse_value(batch.clone()).unwrap();
        assert_eq!(texts(&results), ["good"]);
        assert!(matches!(
            ResultParser::new().strict(true).parse_value(batch),
            Err(ParseError::UnknownShape(_))
        ));
    }

    #[test]
    fn validation_clamps_confidence() {
        let results = validate_results(vec![
            OcrResult::from_corners("high", 1.5, [0.0, 0.0, 1.0, 1.0]),
            OcrResult::from_corners("low", -0.3, [0.0, 0.0, 1.0, 1.0]),
        ]);
        assert_eq!(results[0].confidence, 1.0);
        assert_eq!(results[1].confidence, 0.0);
    }

    #[test]
    fn validation_drops_blank_and_malformed() {
        let malformed = OcrResult::new("tri", 0.5, corners_to_quad([0.0, 0.0, 1.0, 1.0])[..3].to_vec());
        let results = validate_results(vec![
            OcrResult::from_corners("", 0.5, [0.0, 0.0, 1.0, 1.0]),
            OcrResult::from_corners("  \n", 0.5, [0.0, 0.0, 1.0, 1.0]),
            malformed,
            OcrResult::from_corners("kept", 0.5, [0.0, 0.0, 1.0, 1.0]),
        ]);
        assert_eq!(texts(&results), ["kept"]);
    }

    #[test]
    fn confidence_filter() {
        let results = filter_by_confidence(
            vec![
                OcrResult::from_corners("a", 0.2, [0.0, 0.0, 1.0, 1.0]),
                OcrResult::from_corners("b", 0.8, [0.0, 0.0, 1.0, 1.0]),
            ],
            0.5,
        );
        assert_eq!(texts(&results), ["b"]);
    }

    #[test]
    fn sorts_top_to_bottom() {
        let results = sort_by_position(
            vec![
                OcrResult::from_corners("Bottom", 1.0, [0.0, 100.0, 10.0, 110.0]),
                OcrResult::from_corners("Top", 1.0, [0.0, 0.0, 10.0, 10.0]),
            ],
            ReadingOrder::TopToBottom,
        );
        assert_eq!(texts(&results), ["Top", "Bottom"]);
    }

    #[test]
    fn sorts_left_to_right() {
        let results = sort_by_position(
            vec![
                OcrResult::from_corners("right", 1.0, [100.0, 0.0, 110.0, 10.0]),
                OcrResult::from_corners("left", 1.0, [0.0, 50.0, 10.0, 60.0]),
            ],
            ReadingOrder::LeftToRight,
        );
        assert_eq!(texts(&results), ["left", "right"]);
    }

    #[test]
    fn reading_order_groups_slightly_offset_boxes_into_lines() {
        let results = sort_reading_order(
            vec![
                OcrResult::from_corners("second", 1.0, [200.0, 10.0, 300.0, 30.0]),
                OcrResult::from_corners("first", 1.0, [0.0, 12.0, 100.0, 32.0]),
                OcrResult::from_corners("next line", 1.0, [0.0, 50.0, 100.0, 70.0]),
            ],
            0.5,
        );
        assert_eq!(texts(&results), ["first", "second", "next line"]);
    }
}
