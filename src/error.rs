use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("result {index} has no usable text field")]
    MissingText { index: usize },
    #[error("box for result {index} has {points} points, expected 2 corners or 4 points")]
    BadBox { index: usize, points: usize },
    #[error("unrecognized result shape: {0}")]
    UnknownShape(String),
    #[error("field `{field}` has an unexpected type")]
    FieldType { field: &'static str },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine backend unavailable: {0}")]
    Unavailable(String),
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("engine returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed engine response: {0}")]
    Response(String),
    #[error("failed to encode page image: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("failed to load PDFium: {0}")]
    Bind(String),
    #[error("failed to open {path}: {message}")]
    Open { path: PathBuf, message: String },
    #[error("page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },
    #[error("failed to render page {page}: {message}")]
    Render { page: usize, message: String },
    #[error("failed to encode page image: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no usable font found (tried {tried} candidates)")]
    NoFont { tried: usize },
    #[error("font at {path} could not be parsed")]
    InvalidFont { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("translation service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed translation response: {0}")]
    Response(String),
}

/// A failure confined to one page. The orchestrator records it and moves on.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("page {}: rasterization failed: {source}", .page + 1)]
    Rasterize {
        page: usize,
        #[source]
        source: PdfError,
    },
    #[error("page {}: OCR failed: {source}", .page + 1)]
    Ocr {
        page: usize,
        #[source]
        source: EngineError,
    },
    #[error("page {}: compositing failed: {source}", .page + 1)]
    Composite {
        page: usize,
        #[source]
        source: PdfError,
    },
}

impl PageError {
    pub fn page(&self) -> usize {
        match self {
            PageError::Rasterize { page, .. }
            | PageError::Ocr { page, .. }
            | PageError::Composite { page, .. } => *page,
        }
    }
}

/// Failure to assemble the toolkit from its configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Pdf(#[from] PdfError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
