use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    compositor::CompositorOptions,
    engine::{OcrMode, PaddleServingBuilder},
    error::ConfigError,
    layout::ReconcileOptions,
    quality::QualityThresholds,
    translate::TranslateConfig,
};

/// Everything the toolkit reads from its TOML file. Every section and field
/// is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    pub engine: EngineConfig,
    pub pdf: PdfConfig,
    pub quality: QualityThresholds,
    pub reconcile: ReconcileOptions,
    pub translate: TranslateConfig,
}

impl ToolkitConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults when `path` does not exist; a file that exists must parse.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Mode of the precise OCR pass.
    pub ocr_mode: OcrMode,
    /// Mode of the layout pass; `None` runs OCR only.
    pub layout_mode: Option<OcrMode>,
    pub ocr_endpoint: Option<String>,
    pub layout_endpoint: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 120,
            ocr_mode: OcrMode::Basic,
            layout_mode: Some(OcrMode::Hybrid),
            ocr_endpoint: None,
            layout_endpoint: None,
        }
    }
}

impl EngineConfig {
    fn builder(&self, mode: OcrMode, endpoint: Option<&String>) -> PaddleServingBuilder {
        let builder = PaddleServingBuilder::new()
            .base_url(&self.base_url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .mode(mode);
        match endpoint {
            Some(endpoint) => builder.endpoint(endpoint),
            None => builder,
        }
    }

    pub fn ocr_builder(&self) -> PaddleServingBuilder {
        self.builder(self.ocr_mode, self.ocr_endpoint.as_ref())
    }

    pub fn layout_builder(&self) -> Option<PaddleServingBuilder> {
        self.layout_mode
            .map(|mode| self.builder(mode, self.layout_endpoint.as_ref()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    pub default_dpi: u32,
    /// `None` embeds page images losslessly.
    pub jpeg_quality: Option<u8>,
    pub debug_text_layer: bool,
    /// Directory holding the PDFium shared library.
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            default_dpi: 150,
            jpeg_quality: Some(85),
            debug_text_layer: false,
            pdfium_library_path: None,
        }
    }
}

impl PdfConfig {
    pub fn compositor_options(&self) -> CompositorOptions {
        CompositorOptions {
            jpeg_quality: self.jpeg_quality,
            debug: self.debug_text_layer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inpaint::EraseMode;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: ToolkitConfig = toml::from_str(
            r#"
            [engine]
            base_url = "http://gpu-box:8866"
            layout_mode = "structure"

            [pdf]
            jpeg_quality = 60

            [quality]
            scanned_text_chars = 20.0

            [translate]
            target_lang = "zh-TW"
            erase_mode = "border_sample"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.base_url, "http://gpu-box:8866");
        assert_eq!(config.engine.timeout_secs, 120);
        assert_eq!(config.engine.layout_mode, Some(OcrMode::Structure));
        assert_eq!(config.pdf.default_dpi, 150);
        assert_eq!(config.pdf.compositor_options().jpeg_quality, Some(60));
        assert_eq!(config.quality.scanned_text_chars, 20.0);
        assert_eq!(config.quality.blurry_text_chars, 200.0);
        assert!(!config.reconcile.filter_by_markdown);
        assert_eq!(config.translate.erase_mode, EraseMode::BorderSample);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolkitConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ToolkitConfig::default());
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[pdf]\ndefault_dpi = \"high\"\n").unwrap();
        assert!(matches!(
            ToolkitConfig::load_or_default(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn builders_follow_modes() {
        let config = EngineConfig {
            layout_mode: None,
            ..Default::default()
        };
        assert!(config.layout_builder().is_none());
        let engine = EngineConfig::default().ocr_builder().build().unwrap();
        assert_eq!(engine.mode(), OcrMode::Basic);
    }
}
