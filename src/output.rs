//! Markdown, JSON, and HTML renditions of a processed document.

use std::{fs, io, path::Path};

use geo::Coord;
use serde::{Deserialize, Serialize};

use crate::{layout::clean_markdown_line, result::OcrResult};

pub const PAGE_SEPARATOR: &str = "\n\n---\n\n";

fn page_title(page: usize) -> String {
    format!("第 {} 頁", page + 1)
}

/// Pages joined by a horizontal rule, each under a `## 第 N 頁` heading.
pub fn combine_markdown(pages: &[String]) -> String {
    pages
        .iter()
        .enumerate()
        .map(|(index, markdown)| format!("## {}\n\n{}", page_title(index), markdown.trim_end()))
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

pub fn write_markdown(path: &Path, pages: &[String]) -> io::Result<()> {
    write_file(path, combine_markdown(pages).as_bytes())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonTextBlock {
    pub text: String,
    pub bbox: Vec<[f32; 2]>,
    pub confidence: f32,
}

impl From<&OcrResult> for JsonTextBlock {
    fn from(result: &OcrResult) -> Self {
        Self {
            text: result.text.clone(),
            bbox: result.bbox_array(),
            confidence: result.confidence,
        }
    }
}

impl From<JsonTextBlock> for OcrResult {
    fn from(block: JsonTextBlock) -> Self {
        let bbox = block.bbox.into_iter().map(|[x, y]| Coord { x, y }).collect();
        OcrResult::new(block.text, block.confidence, bbox)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPage {
    /// 1-based.
    pub page_num: usize,
    pub text_blocks: Vec<JsonTextBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDocument {
    pub source: String,
    pub total_pages: usize,
    pub pages: Vec<JsonPage>,
}

impl JsonDocument {
    pub fn new(source: impl Into<String>, pages: &[Vec<OcrResult>]) -> Self {
        Self {
            source: source.into(),
            total_pages: pages.len(),
            pages: pages
                .iter()
                .enumerate()
                .map(|(index, results)| JsonPage {
                    page_num: index + 1,
                    text_blocks: results.iter().map(JsonTextBlock::from).collect(),
                })
                .collect(),
        }
    }

    /// Results per page, in page order.
    pub fn into_results(self) -> Vec<Vec<OcrResult>> {
        self.pages
            .into_iter()
            .map(|page| page.text_blocks.into_iter().map(OcrResult::from).collect())
            .collect()
    }
}

pub fn write_json(path: &Path, document: &JsonDocument) -> io::Result<()> {
    write_file(path, &serde_json::to_vec_pretty(document)?)
}

pub fn read_json(path: &Path) -> io::Result<JsonDocument> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

const HTML_STYLE: &str = "body { font-family: sans-serif; max-width: 960px; margin: 2em auto; line-height: 1.6; }
.page { border: 1px solid #ddd; border-radius: 6px; padding: 1em 1.5em; margin-bottom: 2em; }
.page h2 { color: #555; border-bottom: 1px solid #eee; padding-bottom: 0.3em; }
.text-block { margin: 0.4em 0; }";

/// One `div.page` per page with a `div.text-block` per non-blank line.
pub fn render_html(title: &str, pages: &[String]) -> String {
    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{HTML_STYLE}\n</style>\n</head>\n<body>\n",
        html_escape::encode_text(title)
    );
    for (index, markdown) in pages.iter().enumerate() {
        html.push_str("<div class=\"page\">\n");
        html.push_str(&format!("<h2>{}</h2>\n", page_title(index)));
        for line in markdown.lines() {
            let text = clean_markdown_line(line);
            if text.is_empty() {
                continue;
            }
            html.push_str(&format!(
                "<div class=\"text-block\">{}</div>\n",
                html_escape::encode_text(&text)
            ));
        }
        html.push_str("</div>\n");
    }
    html.push_str("</body>\n</html>\n");
    html
}

pub fn write_html(path: &Path, title: &str, pages: &[String]) -> io::Result<()> {
    write_file(path, render_html(title, pages).as_bytes())
}

fn write_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_pages_are_titled_and_separated() {
        let combined = combine_markdown(&["# Intro\nHello".to_string(), String::new()]);
        assert_eq!(combined, "## 第 1 頁\n\n# Intro\nHello\n\n---\n\n## 第 2 頁\n\n");
    }

    #[test]
    fn html_escapes_and_skips_blank_lines() {
        let html = render_html("a<b", &["Tom & Jerry\n\n   \n**bold**".to_string()]);
        assert!(html.contains("<title>a&lt;b</title>"));
        assert_eq!(html.matches("<div class=\"page\">").count(), 1);
        assert_eq!(html.matches("<div class=\"text-block\">").count(), 2);
        assert!(html.contains("<div class=\"text-block\">Tom &amp; Jerry</div>"));
        assert!(html.contains("<div class=\"text-block\">bold</div>"));
        assert!(html.contains("<h2>第 1 頁</h2>"));
    }

    #[test]
    fn json_uses_one_based_page_numbers() {
        let pages = vec![vec![OcrResult::from_corners("a", 0.5, [0.0, 0.0, 1.0, 1.0])], vec![]];
        let document = JsonDocument::new("in.pdf", &pages);
        let value = serde_json::to_value(&document).unwrap();
        assert_eq!(value["total_pages"], 2);
        assert_eq!(value["pages"][0]["page_num"], 1);
        assert_eq!(value["pages"][1]["page_num"], 2);
        assert_eq!(value["pages"][0]["text_blocks"][0]["bbox"][2][0], 1.0);
    }
}
