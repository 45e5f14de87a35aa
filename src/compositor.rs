//! Searchable PDF output: every page is a raster image with a text layer laid
//! over the recognized regions.
//!
//! A page is sized to its image in pixels (1 px = 1 pt), so OCR coordinates
//! are used as-is and only the y axis is flipped.

use std::{collections::HashMap, fs, path::Path};

use image::DynamicImage;
use pdf_writer::{
    types::{CidFontType, FontFlags, SystemInfo, TextRenderingMode},
    Content, Filter, Finish, Name, Pdf, Rect, Ref, Str,
};
use tracing::instrument;

use crate::{
    error::PdfError,
    fonts::{
        baseline_offset, fit_text, identity_to_unicode_cmap, LayerFont, CJK_NARROW_WIDTH,
        CJK_WIDE_START, CJK_WIDE_WIDTH,
    },
    result::OcrResult,
    util::{deflate, encode_jpeg, truncate},
};

const IMAGE_NAME: &[u8] = b"Im0";
const DEBUG_COLOR: [f32; 3] = [1.0, 0.41, 0.71];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositorOptions {
    /// JPEG quality for the page background; `None` embeds lossless Flate.
    pub jpeg_quality: Option<u8>,
    /// Paint the text layer in pink instead of leaving it invisible.
    pub debug: bool,
}

impl Default for CompositorOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: Some(85),
            debug: false,
        }
    }
}

/// What happened to the text layer of one added page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageLayer {
    pub spans_written: usize,
    pub spans_skipped: usize,
}

/// A page ready to be appended with [`PdfCompositor::commit_page`].
pub struct PreparedPage {
    pixels: (u32, u32),
    width: f32,
    height: f32,
    data: Vec<u8>,
    filter: Filter,
    spans: Vec<PlacedSpan>,
    layer: PageLayer,
}

impl PreparedPage {
    pub fn layer(&self) -> PageLayer {
        self.layer
    }
}

struct PlacedSpan {
    font: LayerFont,
    size: f32,
    x: f32,
    y: f32,
    bytes: Vec<u8>,
}

/// One output document under construction. Pages are appended in call order;
/// `save` consumes the session so a written document cannot be reused.
pub struct PdfCompositor {
    pdf: Pdf,
    options: CompositorOptions,
    next_ref: i32,
    catalog_ref: Ref,
    page_tree_ref: Ref,
    page_refs: Vec<Ref>,
    fonts: HashMap<LayerFont, Ref>,
}

impl PdfCompositor {
    pub fn new(options: CompositorOptions) -> Self {
        let mut compositor = Self {
            pdf: Pdf::new(),
            options,
            next_ref: 1,
            catalog_ref: Ref::new(1),
            page_tree_ref: Ref::new(1),
            page_refs: Vec::new(),
            fonts: HashMap::new(),
        };
        compositor.catalog_ref = compositor.alloc();
        compositor.page_tree_ref = compositor.alloc();
        compositor
    }

    pub fn page_count(&self) -> usize {
        self.page_refs.len()
    }

    /// Loads the background from an image file.
    pub fn add_page(&mut self, image_path: &Path, results: &[OcrResult]) -> Result<PageLayer, PdfError> {
        let image = image::open(image_path)?;
        self.add_page_from_pixmap(&image, results)
    }

    pub fn add_page_from_pixmap(
        &mut self,
        image: &DynamicImage,
        results: &[OcrResult],
    ) -> Result<PageLayer, PdfError> {
        let page = self.prepare_page(image, results)?;
        Ok(self.commit_page(page))
    }

    /// Encodes the background and places the text layer without touching the
    /// document. Only [`commit_page`](Self::commit_page) appends it.
    pub fn prepare_page(&self, image: &DynamicImage, results: &[OcrResult]) -> Result<PreparedPage, PdfError> {
        let (width, height) = (image.width() as f32, image.height() as f32);
        let rgb = image.to_rgb8();
        let (data, filter) = match self.options.jpeg_quality {
            Some(quality) => (encode_jpeg(&rgb, quality)?, Filter::DctDecode),
            None => (deflate(rgb.as_raw())?, Filter::FlateDecode),
        };

        let mut layer = PageLayer::default();
        let mut spans = Vec::with_capacity(results.len());
        for result in results {
            if result.is_blank() {
                continue;
            }
            match place_span(result, height) {
                Some(span) => {
                    spans.push(span);
                    layer.spans_written += 1;
                }
                None => {
                    log::warn!("Could not place text \"{}\" on the text layer", truncate(&result.text, 20));
                    layer.spans_skipped += 1;
                }
            }
        }
        Ok(PreparedPage {
            pixels: (image.width(), image.height()),
            width,
            height,
            data,
            filter,
            spans,
            layer,
        })
    }

    #[instrument(level = "debug", skip_all, fields(page = self.page_refs.len() + 1))]
    pub fn commit_page(&mut self, page: PreparedPage) -> PageLayer {
        let PreparedPage {
            pixels,
            width,
            height,
            data,
            filter,
            spans,
            layer,
        } = page;

        let mut used = spans.iter().map(|span| span.font).collect::<Vec<_>>();
        used.sort_by_key(|font| font.resource_name());
        used.dedup();
        let font_refs = used
            .into_iter()
            .map(|font| (font, self.font_ref(font)))
            .collect::<Vec<_>>();

        let page_ref = self.alloc();
        let content_ref = self.alloc();
        let image_ref = self.alloc();

        let mut image_xobject = self.pdf.image_xobject(image_ref, &data);
        image_xobject.filter(filter);
        image_xobject.width(pixels.0 as i32);
        image_xobject.height(pixels.1 as i32);
        image_xobject.color_space().device_rgb();
        image_xobject.bits_per_component(8);
        image_xobject.finish();

        let mut content = Content::new();
        content.save_state();
        content.transform([width, 0.0, 0.0, height, 0.0, 0.0]);
        content.x_object(Name(IMAGE_NAME));
        content.restore_state();
        if !spans.is_empty() {
            content.begin_text();
            if self.options.debug {
                content.set_text_rendering_mode(TextRenderingMode::Fill);
                let [r, g, b] = DEBUG_COLOR;
                content.set_fill_rgb(r, g, b);
            } else {
                content.set_text_rendering_mode(TextRenderingMode::Invisible);
                content.set_fill_rgb(0.0, 0.0, 0.0);
            }
            for span in &spans {
                content.set_font(Name(span.font.resource_name()), span.size);
                content.set_text_matrix([1.0, 0.0, 0.0, 1.0, span.x, span.y]);
                content.show(Str(&span.bytes));
            }
            content.end_text();
        }
        self.pdf.stream(content_ref, &content.finish());

        let mut page = self.pdf.page(page_ref);
        page.media_box(Rect::new(0.0, 0.0, width, height));
        page.parent(self.page_tree_ref);
        page.contents(content_ref);
        let mut resources = page.resources();
        resources.x_objects().pair(Name(IMAGE_NAME), image_ref);
        if !font_refs.is_empty() {
            let mut fonts = resources.fonts();
            for (font, font_ref) in &font_refs {
                fonts.pair(Name(font.resource_name()), *font_ref);
            }
        }
        resources.finish();
        page.finish();

        self.page_refs.push(page_ref);
        log::debug!(
            "Added {}x{} page with {} text spans ({} skipped)",
            pixels.0,
            pixels.1,
            layer.spans_written,
            layer.spans_skipped
        );
        layer
    }

    /// The finished document, or `None` when no page was added.
    pub fn into_bytes(mut self) -> Option<Vec<u8>> {
        if self.page_refs.is_empty() {
            return None;
        }
        self.pdf.catalog(self.catalog_ref).pages(self.page_tree_ref);
        let count = self.page_refs.len() as i32;
        self.pdf
            .pages(self.page_tree_ref)
            .kids(self.page_refs.iter().copied())
            .count(count);
        Some(self.pdf.finish())
    }

    /// Writes the document. `Ok(false)` when there was nothing to write.
    pub fn save(self, path: &Path) -> Result<bool, PdfError> {
        let Some(bytes) = self.into_bytes() else {
            log::warn!("No pages added, not writing {}", path.display());
            return Ok(false);
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        log::info!("Wrote {}", path.display());
        Ok(true)
    }

    fn alloc(&mut self) -> Ref {
        let id = Ref::new(self.next_ref);
        self.next_ref += 1;
        id
    }

    fn font_ref(&mut self, font: LayerFont) -> Ref {
        if let Some(id) = self.fonts.get(&font) {
            return *id;
        }
        let id = self.alloc();
        match font {
            LayerFont::Helvetica | LayerFont::Courier => {
                self.pdf
                    .type1_font(id)
                    .base_font(Name(font.base_font()))
                    .encoding_predefined(Name(b"WinAnsiEncoding"));
            }
            LayerFont::Cjk => self.write_glyphless_font(id),
        }
        self.fonts.insert(font, id);
        id
    }

    fn write_glyphless_font(&mut self, type0_ref: Ref) {
        let cid_ref = self.alloc();
        let descriptor_ref = self.alloc();
        let cmap_ref = self.alloc();
        let name = Name(LayerFont::Cjk.base_font());

        self.pdf
            .type0_font(type0_ref)
            .base_font(name)
            .encoding_predefined(Name(b"Identity-H"))
            .descendant_font(cid_ref)
            .to_unicode(cmap_ref);

        let mut cid_font = self.pdf.cid_font(cid_ref);
        cid_font.subtype(CidFontType::Type2);
        cid_font.base_font(name);
        cid_font.system_info(SystemInfo {
            registry: Str(b"Adobe"),
            ordering: Str(b"Identity"),
            supplement: 0,
        });
        cid_font.font_descriptor(descriptor_ref);
        cid_font.default_width(CJK_WIDE_WIDTH);
        cid_font
            .widths()
            .same(0, (CJK_WIDE_START - 1) as u16, CJK_NARROW_WIDTH);
        cid_font.cid_to_gid_map_predefined(Name(b"Identity"));
        cid_font.finish();

        self.pdf
            .font_descriptor(descriptor_ref)
            .name(name)
            .flags(FontFlags::SYMBOLIC)
            .bbox(Rect::new(0.0, -200.0, 1000.0, 800.0))
            .italic_angle(0.0)
            .ascent(800.0)
            .descent(-200.0)
            .cap_height(700.0)
            .stem_v(80.0);

        self.pdf.stream(cmap_ref, &identity_to_unicode_cmap());
    }
}

fn place_span(result: &OcrResult, page_height: f32) -> Option<PlacedSpan> {
    let rect = result.rect()?;
    let (width, height) = (rect.width(), rect.height());
    if !(width > 0.0 && height > 0.0) {
        return None;
    }
    let text = result.text.trim();
    let fitted = fit_text(text, width, height)?;
    let bytes = fitted.font.encode(text)?;
    let baseline = rect.min().y + baseline_offset(height, fitted.size);
    Some(PlacedSpan {
        font: fitted.font,
        size: fitted.size,
        x: rect.min().x,
        y: page_height - baseline,
        bytes,
    })
}
