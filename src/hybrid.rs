//! Hybrid processing of whole PDFs: layout analysis for reading order, a
//! precise OCR pass for positions, and every output built from the merge.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Instant,
};

use image::DynamicImage;
use serde::Serialize;
use tracing::instrument;

use crate::{
    compositor::{CompositorOptions, PageLayer, PdfCompositor},
    engine::{LayoutEngine, LayoutPrediction, OcrEngine},
    error::{EngineError, PageError},
    inpaint::{erase_regions, EraseMode, FontResolver},
    layout::{ReconcileOptions, Reconciler},
    output::{write_html, write_json, write_markdown, JsonDocument},
    quality::{detect_quality, effective_dpi, PdfQuality, QualityThresholds},
    result::OcrResult,
    source::{PageSource, PdfBackend},
    translate::{OpenAiTranslator, PageTranslator, TranslateConfig, Translator},
    util::POINTS_PER_INCH,
};

pub const DEFAULT_DPI: u32 = 150;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridOptions {
    /// The DPI callers get when they do not ask for one. Only this value is
    /// raised by the quality heuristic.
    pub default_dpi: u32,
    pub quality: QualityThresholds,
    pub reconcile: ReconcileOptions,
    pub compositor: CompositorOptions,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            default_dpi: DEFAULT_DPI,
            quality: QualityThresholds::default(),
            reconcile: ReconcileOptions::default(),
            compositor: CompositorOptions::default(),
        }
    }
}

/// Per-call outputs and knobs for [`HybridPipeline::process_pdf`].
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Searchable PDF; defaults to `<input>_searchable.pdf` beside the input.
    pub output_path: Option<PathBuf>,
    pub markdown_output: Option<PathBuf>,
    pub json_output: Option<PathBuf>,
    pub html_output: Option<PathBuf>,
    pub dpi: u32,
    pub show_progress: bool,
    pub translate: Option<TranslateConfig>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            output_path: None,
            markdown_output: None,
            json_output: None,
            html_output: None,
            dpi: DEFAULT_DPI,
            show_progress: true,
            translate: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub input: String,
    pub mode: &'static str,
    /// Pages that went through OCR and compositing without error.
    pub pages_processed: usize,
    pub total_pages: usize,
    /// 0-based indexes of pages that failed.
    pub failed_pages: Vec<usize>,
    pub dpi: u32,
    pub quality: Option<PdfQuality>,
    pub searchable_pdf: Option<String>,
    pub erased_pdf: Option<String>,
    pub markdown_file: Option<String>,
    pub json_file: Option<String>,
    pub html_file: Option<String>,
    pub translated_pdf: Option<String>,
    pub bilingual_pdf: Option<String>,
    /// Plain text per page; empty for failed pages.
    pub text_content: Vec<String>,
    pub total_text_blocks: usize,
    pub elapsed_secs: f64,
    pub error: Option<String>,
}

impl ProcessSummary {
    fn new(input: &Path) -> Self {
        Self {
            input: input.display().to_string(),
            mode: "hybrid",
            pages_processed: 0,
            total_pages: 0,
            failed_pages: Vec::new(),
            dpi: 0,
            quality: None,
            searchable_pdf: None,
            erased_pdf: None,
            markdown_file: None,
            json_file: None,
            html_file: None,
            translated_pdf: None,
            bilingual_pdf: None,
            text_content: Vec::new(),
            total_text_blocks: 0,
            elapsed_secs: 0.0,
            error: None,
        }
    }
}

/// A page that made it through every stage.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub page: usize,
    /// Reading-order results in raster pixel coordinates.
    pub results: Vec<OcrResult>,
    pub markdown: String,
    pub text: String,
    pub layer: PageLayer,
}

/// State owned by one `process_pdf` call.
struct DocumentRun {
    dpi: u32,
    searchable: PdfCompositor,
    erased: Option<(PdfCompositor, EraseMode)>,
    layout_available: bool,
}

pub struct HybridPipeline<'a> {
    backend: &'a dyn PdfBackend,
    ocr: &'a dyn OcrEngine,
    layout: Option<&'a dyn LayoutEngine>,
    translator: Option<&'a dyn Translator>,
    options: HybridOptions,
    reconciler: Reconciler,
}

impl<'a> HybridPipeline<'a> {
    pub fn new(backend: &'a dyn PdfBackend, ocr: &'a dyn OcrEngine) -> Self {
        let options = HybridOptions::default();
        Self {
            backend,
            ocr,
            layout: None,
            translator: None,
            options,
            reconciler: Reconciler::new(options.reconcile),
        }
    }

    pub fn layout(mut self, engine: &'a dyn LayoutEngine) -> Self {
        self.layout = Some(engine);
        self
    }

    /// Used for translation instead of a client built from the translate
    /// config.
    pub fn translator(mut self, translator: &'a dyn Translator) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn options(mut self, options: HybridOptions) -> Self {
        self.options = options;
        self.reconciler = Reconciler::new(options.reconcile);
        self
    }

    /// Processes every page of `path`. Page failures are logged and recorded
    /// in the summary; only failing to open the document sets `error`.
    #[instrument(skip(self, options), fields(path = %path.display()))]
    pub fn process_pdf(&self, path: &Path, options: &ProcessOptions) -> ProcessSummary {
        let started = Instant::now();
        let mut summary = ProcessSummary::new(path);

        let source = match self.backend.open(path) {
            Ok(source) => source,
            Err(err) => {
                log::error!("Cannot open {}: {err}", path.display());
                summary.error = Some(err.to_string());
                summary.elapsed_secs = started.elapsed().as_secs_f64();
                return summary;
            }
        };
        let total_pages = source.page_count();
        let quality = detect_quality(source.as_ref(), &self.options.quality);
        let dpi = effective_dpi(options.dpi, self.options.default_dpi, &quality);
        if dpi != options.dpi {
            log::info!("Raising DPI from {} to {dpi} for a {:?} document", options.dpi, quality.kind);
        }
        summary.total_pages = total_pages;
        summary.dpi = dpi;
        summary.quality = Some(quality);

        let mut run = DocumentRun {
            dpi,
            searchable: PdfCompositor::new(self.options.compositor),
            erased: options
                .translate
                .as_ref()
                .map(|config| (PdfCompositor::new(self.options.compositor), config.erase_mode)),
            layout_available: self.layout.is_some(),
        };
        if self.layout.is_none() {
            log::warn!("No layout engine configured, ordering pages by OCR positions only");
        }

        let mut outcomes = Vec::with_capacity(total_pages);
        for page in 0..total_pages {
            if options.show_progress {
                log::info!("Processing page {}/{total_pages}", page + 1);
            }
            let outcome = self.process_page(source.as_ref(), page, &mut run);
            if let Err(err) = &outcome {
                log::error!("{err}");
            }
            outcomes.push(outcome);
        }
        // Release the source before anything is written or reopened.
        drop(source);

        let mut page_results = Vec::with_capacity(total_pages);
        let mut markdown_pages = Vec::with_capacity(total_pages);
        for outcome in outcomes {
            match outcome {
                Ok(outcome) => {
                    summary.pages_processed += 1;
                    summary.total_text_blocks += outcome.results.len();
                    summary.text_content.push(outcome.text);
                    markdown_pages.push(outcome.markdown);
                    page_results.push(outcome.results);
                }
                Err(err) => {
                    summary.failed_pages.push(err.page());
                    summary.text_content.push(String::new());
                    markdown_pages.push(String::new());
                    page_results.push(Vec::new());
                }
            }
        }

        let searchable_path = options
            .output_path
            .clone()
            .unwrap_or_else(|| derived_path(path, "searchable"));
        summary.searchable_pdf = save_compositor(run.searchable, &searchable_path);
        if let Some((erased, _)) = run.erased {
            summary.erased_pdf = save_compositor(erased, &derived_path(&searchable_path, "erased"));
        }

        if let Some(markdown_path) = &options.markdown_output {
            match write_markdown(markdown_path, &markdown_pages) {
                Ok(()) => summary.markdown_file = Some(markdown_path.display().to_string()),
                Err(err) => log::error!("Failed to write {}: {err}", markdown_path.display()),
            }
        }
        if let Some(json_path) = &options.json_output {
            let document = JsonDocument::new(summary.input.clone(), &to_pdf_points(&page_results, dpi));
            match write_json(json_path, &document) {
                Ok(()) => summary.json_file = Some(json_path.display().to_string()),
                Err(err) => log::error!("Failed to write {}: {err}", json_path.display()),
            }
        }
        if let Some(html_path) = &options.html_output {
            let title = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| summary.input.clone());
            match write_html(html_path, &title, &markdown_pages) {
                Ok(()) => summary.html_file = Some(html_path.display().to_string()),
                Err(err) => log::error!("Failed to write {}: {err}", html_path.display()),
            }
        }

        if let Some(config) = &options.translate {
            let failed = summary.failed_pages.iter().copied().collect::<BTreeSet<_>>();
            self.translate_document(path, &page_results, &failed, dpi, config, &searchable_path, &mut summary);
        }

        summary.elapsed_secs = started.elapsed().as_secs_f64();
        log::info!(
            "Processed {}/{} pages of {} in {:.1}s ({} text blocks)",
            summary.pages_processed,
            summary.total_pages,
            summary.input,
            summary.elapsed_secs,
            summary.total_text_blocks
        );
        summary
    }

    #[instrument(level = "debug", skip(self, source, run))]
    fn process_page(
        &self,
        source: &dyn PageSource,
        page: usize,
        run: &mut DocumentRun,
    ) -> Result<PageOutcome, PageError> {
        let image = source
            .rasterize(page, run.dpi)
            .map_err(|source| PageError::Rasterize { page, source })?;
        let shapes = self
            .ocr
            .predict(&image)
            .map_err(|source| PageError::Ocr { page, source })?;
        let prediction = self.layout_pass(page, &image, &mut run.layout_available);

        // The layout engine's own OCR pass stands in when the precise pass is empty.
        let shapes = if shapes.is_empty() { prediction.ocr } else { shapes };
        let reconciled = self.reconciler.reconcile(&prediction.pages, &shapes);
        log::debug!("Page {}: {} text blocks", page + 1, reconciled.results.len());

        // Both documents get the page or neither does.
        let searchable = run
            .searchable
            .prepare_page(&image, &reconciled.results)
            .map_err(|source| PageError::Composite { page, source })?;
        let erased = match &run.erased {
            Some((erased, mode)) => {
                let blank = erase_regions(&image, reconciled.results.iter().filter_map(OcrResult::rect), *mode);
                let prepared = erased
                    .prepare_page(&blank, &reconciled.results)
                    .map_err(|source| PageError::Composite { page, source })?;
                Some(prepared)
            }
            None => None,
        };
        let layer = run.searchable.commit_page(searchable);
        if let (Some((compositor, _)), Some(prepared)) = (run.erased.as_mut(), erased) {
            compositor.commit_page(prepared);
        }

        let text = reconciled
            .results
            .iter()
            .map(|result| result.text.trim())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(PageOutcome {
            page,
            results: reconciled.results,
            markdown: reconciled.markdown,
            text,
            layer,
        })
    }

    /// Empty prediction when there is no usable layout engine. An engine that
    /// reports itself unavailable is not asked again for this document.
    fn layout_pass(&self, page: usize, image: &DynamicImage, available: &mut bool) -> LayoutPrediction {
        let Some(engine) = self.layout.filter(|_| *available) else {
            return LayoutPrediction::default();
        };
        match engine.predict_layout(image) {
            Ok(prediction) => prediction,
            Err(EngineError::Unavailable(reason)) => {
                log::warn!("Layout analysis unavailable ({reason}), falling back to OCR-only ordering");
                *available = false;
                LayoutPrediction::default()
            }
            Err(err) => {
                log::warn!("Page {}: layout analysis failed, using OCR-only ordering: {err}", page + 1);
                LayoutPrediction::default()
            }
        }
    }

    /// Second pass over the document: erase, translate, and redraw every page
    /// that was processed. The source is reopened for this pass.
    #[allow(clippy::too_many_arguments)]
    #[instrument(level = "debug", skip_all, fields(target = %config.target_lang))]
    fn translate_document(
        &self,
        path: &Path,
        page_results: &[Vec<OcrResult>],
        failed: &BTreeSet<usize>,
        dpi: u32,
        config: &TranslateConfig,
        searchable_path: &Path,
        summary: &mut ProcessSummary,
    ) {
        if !config.mono && !config.bilingual {
            log::warn!("Translation requested with neither mono nor bilingual output");
            return;
        }
        let client;
        let translator: &dyn Translator = match self.translator {
            Some(translator) => translator,
            None => match OpenAiTranslator::new(config) {
                Ok(built) => {
                    client = built;
                    &client
                }
                Err(err) => {
                    log::error!("Cannot create translator: {err}");
                    return;
                }
            },
        };
        let font = match FontResolver::new(config.font_path.as_deref()).resolve() {
            Ok(font) => font,
            Err(err) => {
                log::error!("Cannot render translations: {err}");
                return;
            }
        };
        let page_translator = PageTranslator::new(translator, font, config);

        let source = match self.backend.open(path) {
            Ok(source) => source,
            Err(err) => {
                log::error!("Cannot reopen {} for translation: {err}", path.display());
                return;
            }
        };
        let mut mono = config.mono.then(|| PdfCompositor::new(self.options.compositor));
        let mut bilingual = config.bilingual.then(|| PdfCompositor::new(self.options.compositor));

        for (page, results) in page_results.iter().enumerate() {
            if failed.contains(&page) {
                continue;
            }
            let image = match source.rasterize(page, dpi) {
                Ok(image) => image,
                Err(err) => {
                    log::error!("Page {}: cannot rasterize for translation: {err}", page + 1);
                    continue;
                }
            };
            log::debug!("Translating page {}", page + 1);
            let translated = page_translator.translate_page(&image, results);
            if let Some(mono) = mono.as_mut() {
                if let Err(err) = mono.add_page_from_pixmap(&translated.image, &translated.layer) {
                    log::error!("Page {}: failed to add translated page: {err}", page + 1);
                }
            }
            if let Some(bilingual) = bilingual.as_mut() {
                let added = bilingual
                    .add_page_from_pixmap(&image, results)
                    .and_then(|_| bilingual.add_page_from_pixmap(&translated.image, &translated.layer));
                if let Err(err) = added {
                    log::error!("Page {}: failed to add bilingual pages: {err}", page + 1);
                }
            }
        }
        drop(source);

        if let Some(mono) = mono {
            summary.translated_pdf = save_compositor(mono, &derived_path(searchable_path, "translated"));
        }
        if let Some(bilingual) = bilingual {
            summary.bilingual_pdf = save_compositor(bilingual, &derived_path(searchable_path, "bilingual"));
        }
    }
}

/// `<dir>/<stem>_<suffix>.pdf` next to `path`.
fn derived_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!("{stem}_{suffix}.pdf"))
}

fn save_compositor(compositor: PdfCompositor, path: &Path) -> Option<String> {
    match compositor.save(path) {
        Ok(true) => Some(path.display().to_string()),
        Ok(false) => None,
        Err(err) => {
            log::error!("Failed to write {}: {err}", path.display());
            None
        }
    }
}

/// Copies of the page results rescaled from raster pixels to PDF points.
fn to_pdf_points(pages: &[Vec<OcrResult>], dpi: u32) -> Vec<Vec<OcrResult>> {
    let factor = POINTS_PER_INCH / dpi as f32;
    pages
        .iter()
        .map(|results| {
            results
                .iter()
                .cloned()
                .map(|mut result| {
                    result.rescale(factor);
                    result
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_sit_beside_the_input() {
        assert_eq!(
            derived_path(Path::new("/data/report.pdf"), "searchable"),
            PathBuf::from("/data/report_searchable.pdf")
        );
        assert_eq!(
            derived_path(Path::new("out/report_searchable.pdf"), "erased"),
            PathBuf::from("out/report_searchable_erased.pdf")
        );
    }

    #[test]
    fn json_coordinates_are_in_points() {
        let pages = vec![vec![OcrResult::from_corners("a", 1.0, [0.0, 0.0, 300.0, 150.0])]];
        let points = to_pdf_points(&pages, 300);
        assert_eq!(points[0][0].width(), 72.0);
        assert_eq!(points[0][0].height(), 36.0);
        assert_eq!(pages[0][0].width(), 300.0);
    }

    #[test]
    fn summary_serializes_mode_and_nulls() {
        let value = serde_json::to_value(ProcessSummary::new(Path::new("a.pdf"))).unwrap();
        assert_eq!(value["mode"], "hybrid");
        assert_eq!(value["input"], "a.pdf");
        assert!(value["error"].is_null());
        assert_eq!(value["pages_processed"], 0);
    }
}
