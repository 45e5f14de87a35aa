use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::{
    error::EngineError,
    layout::LayoutPage,
    parser::{OcrRecord, RawOcrShape},
    util::encode_png,
};

/// Fine-grained OCR: one call per page raster.
pub trait OcrEngine {
    fn predict(&self, image: &DynamicImage) -> Result<Vec<RawOcrShape>, EngineError>;
}

/// Layout analysis: regions and Markdown, plus the engine's own OCR pass
/// when it reports one.
pub trait LayoutEngine {
    fn predict_layout(&self, image: &DynamicImage) -> Result<LayoutPrediction, EngineError>;
}

#[derive(Debug, Clone, Default)]
pub struct LayoutPrediction {
    pub pages: Vec<LayoutPage>,
    pub ocr: Vec<RawOcrShape>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    #[default]
    Basic,
    Structure,
    Vl,
    Formula,
    Hybrid,
}

impl OcrMode {
    pub fn endpoint(self) -> &'static str {
        match self {
            OcrMode::Basic => "ocr",
            OcrMode::Structure | OcrMode::Hybrid => "layout-parsing",
            OcrMode::Vl => "paddleocr-vl",
            OcrMode::Formula => "formula-recognition",
        }
    }

    fn results_key(self) -> &'static str {
        match self {
            OcrMode::Basic => "ocrResults",
            OcrMode::Structure | OcrMode::Hybrid | OcrMode::Vl => "layoutParsingResults",
            OcrMode::Formula => "formulaRecResults",
        }
    }

    fn has_layout(self) -> bool {
        matches!(self, OcrMode::Structure | OcrMode::Hybrid | OcrMode::Vl)
    }
}

pub struct PaddleServingBuilder {
    base_url: String,
    mode: OcrMode,
    endpoint: Option<String>,
    timeout: Duration,
}

impl PaddleServingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn mode(mut self, mode: OcrMode) -> Self {
        self.mode = mode;
        self
    }

    /// Overrides the path derived from the mode.
    pub fn endpoint(mut self, path: impl Into<String>) -> Self {
        self.endpoint = Some(path.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[instrument(skip(self), fields(mode = ?self.mode))]
    pub fn build(self) -> Result<PaddleServingEngine, EngineError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|source| EngineError::Transport {
                endpoint: self.base_url.clone(),
                source,
            })?;
        let base_url = self.base_url.trim_end_matches('/').to_string();
        let path = self.endpoint.unwrap_or_else(|| self.mode.endpoint().to_string());
        let url = format!("{base_url}/{}", path.trim_start_matches('/'));
        log::debug!("PaddleOCR serving endpoint: {url}");
        Ok(PaddleServingEngine {
            client,
            base_url,
            url,
            mode: self.mode,
        })
    }
}

impl Default for PaddleServingBuilder {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            mode: OcrMode::Basic,
            endpoint: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Adapter for a PaddleX/PaddleOCR serving deployment.
pub struct PaddleServingEngine {
    client: Client,
    base_url: String,
    url: String,
    mode: OcrMode,
}

impl PaddleServingEngine {
    pub fn mode(&self) -> OcrMode {
        self.mode
    }

    pub fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        matches!(self.client.get(&url).send(), Ok(response) if response.status().is_success())
    }

    #[instrument(level = "debug", skip(self, image), fields(width = image.width(), height = image.height()))]
    fn request(&self, image: &DynamicImage) -> Result<Vec<Value>, EngineError> {
        let body = json!({
            "file": STANDARD.encode(encode_png(image)?),
            "fileType": 1,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|source| EngineError::Transport {
                endpoint: self.url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let payload = response.json::<Value>().map_err(|source| EngineError::Transport {
            endpoint: self.url.clone(),
            source,
        })?;
        extract_results(payload, self.mode)
    }
}

fn extract_results(mut payload: Value, mode: OcrMode) -> Result<Vec<Value>, EngineError> {
    if let Some(code) = payload.get("errorCode").and_then(Value::as_i64) {
        if code != 0 {
            let message = payload
                .get("errorMsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(EngineError::Response(format!("error {code}: {message}")));
        }
    }
    match payload
        .get_mut("result")
        .and_then(|result| result.get_mut(mode.results_key()))
        .map(Value::take)
    {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Ok(vec![other]),
        None => Err(EngineError::Response(format!(
            "response has no result.{}",
            mode.results_key()
        ))),
    }
}

/// Formula results carry LaTeX under `rec_formula`; they become ordinary
/// text spans.
fn formula_shape(value: &Value) -> Option<RawOcrShape> {
    let pruned = value.get("prunedResult").unwrap_or(value);
    let items = pruned.get("formula_res_list")?.as_array()?;
    let mut record = OcrRecord::default();
    for item in items {
        let (Some(formula), Some(poly)) = (
            item.get("rec_formula").and_then(Value::as_str),
            item.get("dt_polys").or_else(|| item.get("rec_polys")),
        ) else {
            continue;
        };
        let Ok(poly) = serde_json::from_value(poly.clone()) else {
            continue;
        };
        record.rec_texts.push(formula.to_string());
        record.rec_scores.push(1.0);
        record.dt_polys.push(poly);
    }
    Some(RawOcrShape::Attribute(record))
}

impl OcrEngine for PaddleServingEngine {
    fn predict(&self, image: &DynamicImage) -> Result<Vec<RawOcrShape>, EngineError> {
        let items = self.request(image)?;
        let mut shapes = Vec::with_capacity(items.len());
        for item in items {
            if self.mode == OcrMode::Formula {
                shapes.extend(formula_shape(&item));
                continue;
            }
            match RawOcrShape::classify(item) {
                Ok(classified) => shapes.extend(classified),
                Err(err) => log::warn!("Skipping unrecognized engine result: {err}"),
            }
        }
        Ok(shapes)
    }
}

impl LayoutEngine for PaddleServingEngine {
    fn predict_layout(&self, image: &DynamicImage) -> Result<LayoutPrediction, EngineError> {
        if !self.mode.has_layout() {
            return Err(EngineError::Unavailable(format!(
                "{:?} mode has no layout analysis",
                self.mode
            )));
        }
        let items = self.request(image)?;
        let mut prediction = LayoutPrediction::default();
        for item in items {
            prediction.pages.push(LayoutPage::from_value(&item));
            match RawOcrShape::classify(item) {
                Ok(shapes) => prediction.ocr.extend(
                    shapes
                        .into_iter()
                        .filter(|shape| matches!(shape, RawOcrShape::LayoutOverall(_))),
                ),
                Err(err) => log::debug!("Layout result carries no OCR pass: {err}"),
            }
        }
        Ok(prediction)
    }
}
