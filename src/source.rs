//! Read side of PDF handling: opening a source document, profiling pages for
//! the quality heuristic, and rasterizing pages for OCR.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::instrument;

use crate::{error::PdfError, util::POINTS_PER_INCH};

/// What the quality heuristic needs to know about one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageProfile {
    /// Non-whitespace characters in the page's extractable text layer.
    pub text_chars: usize,
    pub image_count: usize,
}

/// An open source document. Dropping it releases the underlying handle.
pub trait PageSource {
    fn page_count(&self) -> usize;
    fn profile(&self, page: usize) -> Result<PageProfile, PdfError>;
    fn rasterize(&self, page: usize, dpi: u32) -> Result<DynamicImage, PdfError>;
}

pub trait PdfBackend {
    fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn PageSource + 'a>, PdfError>;
}

pub struct PdfiumBackend {
    pdfium: Pdfium,
}

impl PdfiumBackend {
    /// Binds to libpdfium from `library_dir` when given, otherwise from the
    /// working directory, the usual install prefixes, or the system loader.
    pub fn new(library_dir: Option<&Path>) -> Result<Self, PdfError> {
        let mut candidates = library_dir.map(Path::to_path_buf).into_iter().collect::<Vec<_>>();
        candidates.extend(
            ["./", "/usr/lib", "/usr/local/lib", "/opt/homebrew/lib"]
                .iter()
                .map(PathBuf::from),
        );

        let bindings = candidates
            .iter()
            .find_map(|dir| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)).ok()
            })
            .map(Ok)
            .unwrap_or_else(Pdfium::bind_to_system_library)
            .map_err(|err| PdfError::Bind(format!("could not find the PDFium library: {err:?}")))?;

        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }
}

impl PdfBackend for PdfiumBackend {
    #[instrument(level = "debug", skip(self))]
    fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn PageSource + 'a>, PdfError> {
        let document = self
            .pdfium
            .load_pdf_from_file(path, None)
            .map_err(|err| PdfError::Open {
                path: path.to_path_buf(),
                message: format!("{err:?}"),
            })?;
        log::debug!("Opened {} ({} pages)", path.display(), document.pages().len());
        Ok(Box::new(PdfiumSource { document }))
    }
}

struct PdfiumSource<'a> {
    document: PdfDocument<'a>,
}

impl PdfiumSource<'_> {
    fn page(&self, page: usize) -> Result<PdfPage<'_>, PdfError> {
        let count = self.page_count();
        if page >= count {
            return Err(PdfError::PageOutOfRange { page, count });
        }
        self.document
            .pages()
            .get(page as PdfPageIndex)
            .map_err(|err| PdfError::Render {
                page,
                message: format!("{err:?}"),
            })
    }
}

impl PageSource for PdfiumSource<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn profile(&self, page: usize) -> Result<PageProfile, PdfError> {
        let pdf_page = self.page(page)?;
        let text_chars = pdf_page
            .text()
            .map(|text| text.all().chars().filter(|c| !c.is_whitespace()).count())
            .unwrap_or(0);
        let image_count = pdf_page
            .objects()
            .iter()
            .filter(|object| object.object_type() == PdfPageObjectType::Image)
            .count();
        Ok(PageProfile {
            text_chars,
            image_count,
        })
    }

    #[instrument(level = "debug", skip(self))]
    fn rasterize(&self, page: usize, dpi: u32) -> Result<DynamicImage, PdfError> {
        let pdf_page = self.page(page)?;
        let config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / POINTS_PER_INCH)
            .render_form_data(true)
            .render_annotations(true);
        let bitmap = pdf_page
            .render_with_config(&config)
            .map_err(|err| PdfError::Render {
                page,
                message: format!("{err:?}"),
            })?;
        let image = bitmap.as_image();
        log::trace!("Rasterized page {} to {}x{}", page + 1, image.width(), image.height());
        Ok(image)
    }
}
