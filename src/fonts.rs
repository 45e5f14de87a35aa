//! Fonts for the searchable text layer.
//!
//! The layer is never painted outside debug mode, so no glyph programs are
//! embedded. What matters is that the text is encodable, that widths are
//! known for fitting, and that viewers can map codes back to Unicode.

use std::fmt::Write;

/// Units per em for all width tables below.
const UNITS_PER_EM: f32 = 1000.0;

/// Descender depth as a fraction of the font size, used to lift the baseline
/// off the bottom of the box.
pub const DESCENT: f32 = 0.2;

pub const MIN_FONT_SIZE: f32 = 4.0;
pub const MAX_FONT_SIZE: f32 = 100.0;

/// Helvetica advance widths for ASCII 0x20..=0x7E.
#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556,
    278, 278, 584, 584, 584, 556, 1015,
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833,
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611,
    278, 278, 278, 469, 556, 333,
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833,
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500,
    334, 260, 334, 584,
];

const HELVETICA_DEFAULT_WIDTH: u16 = 556;
const COURIER_WIDTH: u16 = 600;

/// First code point treated as full width by the CJK layer font.
pub const CJK_WIDE_START: u32 = 0x2E80;
pub const CJK_NARROW_WIDTH: f32 = 500.0;
pub const CJK_WIDE_WIDTH: f32 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerFont {
    /// Standard-14 Helvetica, WinAnsi encoded.
    Helvetica,
    /// Glyphless Type0 font addressed by Unicode code point (Identity-H).
    Cjk,
    /// Standard-14 Courier. Never fails: unencodable characters become `?`.
    Courier,
}

impl LayerFont {
    pub const CANDIDATES: [LayerFont; 3] = [LayerFont::Helvetica, LayerFont::Cjk, LayerFont::Courier];

    pub fn resource_name(self) -> &'static [u8] {
        match self {
            LayerFont::Helvetica => b"Helv",
            LayerFont::Cjk => b"Cjk",
            LayerFont::Courier => b"Cour",
        }
    }

    pub fn base_font(self) -> &'static [u8] {
        match self {
            LayerFont::Helvetica => b"Helvetica",
            LayerFont::Cjk => b"GlyphLessFont",
            LayerFont::Courier => b"Courier",
        }
    }

    /// Content-stream bytes for `text`, or `None` if this font cannot carry it.
    pub fn encode(self, text: &str) -> Option<Vec<u8>> {
        match self {
            LayerFont::Helvetica => text.chars().map(win_ansi_byte).collect(),
            LayerFont::Cjk => {
                let mut bytes = Vec::with_capacity(text.len() * 2);
                for c in text.chars() {
                    let code = u16::try_from(c as u32).ok()?;
                    bytes.extend_from_slice(&code.to_be_bytes());
                }
                Some(bytes)
            }
            LayerFont::Courier => Some(
                text.chars()
                    .map(|c| win_ansi_byte(c).unwrap_or(b'?'))
                    .collect(),
            ),
        }
    }

    /// Advance width of `text` at `size` in user-space units.
    pub fn text_width(self, text: &str, size: f32) -> Option<f32> {
        let units = match self {
            LayerFont::Helvetica => {
                let mut units = 0.0;
                for c in text.chars() {
                    win_ansi_byte(c)?;
                    units += helvetica_width(c) as f32;
                }
                units
            }
            LayerFont::Cjk => {
                let mut units = 0.0;
                for c in text.chars() {
                    u16::try_from(c as u32).ok()?;
                    units += cjk_width(c);
                }
                units
            }
            LayerFont::Courier => text.chars().count() as f32 * COURIER_WIDTH as f32,
        };
        Some(units * size / UNITS_PER_EM)
    }
}

fn win_ansi_byte(c: char) -> Option<u8> {
    match c as u32 {
        code @ 0x20..=0x7E | code @ 0xA0..=0xFF => Some(code as u8),
        _ => None,
    }
}

fn helvetica_width(c: char) -> u16 {
    match c as u32 {
        code @ 0x20..=0x7E => HELVETICA_WIDTHS[(code - 0x20) as usize],
        _ => HELVETICA_DEFAULT_WIDTH,
    }
}

fn cjk_width(c: char) -> f32 {
    if (c as u32) < CJK_WIDE_START {
        CJK_NARROW_WIDTH
    } else {
        CJK_WIDE_WIDTH
    }
}

/// Size and font for one text span fitted into a `width` x `height` box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedText {
    pub font: LayerFont,
    pub size: f32,
    pub encoded_width: f32,
}

/// Tries each candidate font in order: start at 70% of the box height, scale
/// by the width ratio, then cap at 90% of the height. Always within
/// [`MIN_FONT_SIZE`, `MAX_FONT_SIZE`].
pub fn fit_text(text: &str, width: f32, height: f32) -> Option<FittedText> {
    LayerFont::CANDIDATES.iter().find_map(|&font| {
        let initial = (height * 0.7).clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        let measured = font.text_width(text, initial)?;
        let mut size = initial;
        if measured > 0.0 && width > 0.0 {
            size *= width / measured;
        }
        let size = size.min(height * 0.9).clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        Some(FittedText {
            font,
            size,
            encoded_width: font.text_width(text, size)?,
        })
    })
}

/// Baseline offset from the top of a box of `height` for text at `size`:
/// near the bottom, lifted by the descender, never above 80% of the height.
pub fn baseline_offset(height: f32, size: f32) -> f32 {
    let offset = height - size * DESCENT;
    offset.clamp(height * 0.8, height.max(0.0))
}

/// ToUnicode CMap for the Identity-H CJK layer font: every BMP code maps to
/// itself. Surrogate codes are left unmapped.
pub fn identity_to_unicode_cmap() -> Vec<u8> {
    let ranges = (0u32..=0xFF)
        .filter(|high| !(0xD8..=0xDF).contains(high))
        .map(|high| {
            let start = high << 8;
            format!("<{start:04X}> <{:04X}> <{start:04X}>", start | 0xFF)
        })
        .collect::<Vec<_>>();

    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    for chunk in ranges.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfrange", chunk.len());
        for range in chunk {
            let _ = writeln!(cmap, "{range}");
        }
        cmap.push_str("endbfrange\n");
    }
    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap.into_bytes()
}
