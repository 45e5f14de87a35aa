use std::path::Path;

use tracing::instrument;

pub mod compositor;
pub mod config;
pub mod engine;
pub mod error;
pub mod fonts;
pub mod hybrid;
pub mod inpaint;
pub mod layout;
pub mod output;
pub mod parser;
pub mod quality;
mod result;
pub mod source;
pub mod translate;
pub mod util;

pub use compositor::{CompositorOptions, PdfCompositor};
pub use config::ToolkitConfig;
pub use engine::{LayoutEngine, OcrEngine, OcrMode, PaddleServingBuilder, PaddleServingEngine};
pub use error::SetupError;
pub use hybrid::{HybridOptions, HybridPipeline, ProcessOptions, ProcessSummary};
pub use layout::{ReconcileOptions, Reconciler};
pub use parser::{RawOcrShape, ReadingOrder, ResultParser};
pub use result::*;
pub use source::{PageSource, PdfBackend, PdfiumBackend};
pub use translate::{TranslateConfig, Translator};

/// PDFium plus PaddleX serving engines, wired up from a [`ToolkitConfig`].
pub struct Toolkit {
    backend: PdfiumBackend,
    ocr: PaddleServingEngine,
    layout: Option<PaddleServingEngine>,
    options: HybridOptions,
}

impl Toolkit {
    #[instrument(skip_all)]
    pub fn from_config(config: &ToolkitConfig) -> Result<Self, SetupError> {
        let backend = PdfiumBackend::new(config.pdf.pdfium_library_path.as_deref())?;
        let ocr = config.engine.ocr_builder().build()?;
        let layout = config
            .engine
            .layout_builder()
            .map(PaddleServingBuilder::build)
            .transpose()?;
        if !ocr.is_available() {
            log::warn!("OCR service at {} is not answering health checks", config.engine.base_url);
        }
        Ok(Self {
            backend,
            ocr,
            layout,
            options: HybridOptions {
                default_dpi: config.pdf.default_dpi,
                quality: config.quality,
                reconcile: config.reconcile,
                compositor: config.pdf.compositor_options(),
            },
        })
    }

    pub fn pipeline(&self) -> HybridPipeline<'_> {
        let pipeline = HybridPipeline::new(&self.backend, &self.ocr).options(self.options);
        match &self.layout {
            Some(layout) => pipeline.layout(layout),
            None => pipeline,
        }
    }

    pub fn process_pdf(&self, path: &Path, options: &ProcessOptions) -> ProcessSummary {
        self.pipeline().process_pdf(path, options)
    }
}
