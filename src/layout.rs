//! Layout-analysis output and its reconciliation with the precise OCR pass.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::{
    parser::{sort_reading_order, validate_results, RawOcrShape, ResultParser},
    result::OcrResult,
    util::{corners_rect, rect_contains},
};

/// A region reported by the layout engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBlock {
    pub bbox: [f32; 4],
    pub label: Option<String>,
    pub content: Option<String>,
}

impl LayoutBlock {
    pub fn new(bbox: [f32; 4]) -> Self {
        Self {
            bbox,
            label: None,
            content: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkdownField {
    Text(String),
    Map(Map<String, Value>),
    List(Vec<Value>),
}

impl MarkdownField {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(Self::Text(text.clone())),
            Value::Object(map) => Some(Self::Map(map.clone())),
            Value::Array(items) => Some(Self::List(items.clone())),
            _ => None,
        }
    }

    pub fn fragments(&self) -> Vec<String> {
        match self {
            MarkdownField::Text(text) => vec![text.clone()],
            MarkdownField::Map(map) => ["markdown_texts", "text", "markdown"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(|text| vec![text.to_string()])
                .unwrap_or_default(),
            MarkdownField::List(items) => items
                .iter()
                .flat_map(|item| match MarkdownField::from_value(item) {
                    Some(field) => field.fragments(),
                    None => Vec::new(),
                })
                .collect(),
        }
    }
}

/// One page of layout-engine output. Both parts are optional; engines differ
/// in what they report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutPage {
    pub markdown: Option<MarkdownField>,
    pub blocks: Option<Vec<LayoutBlock>>,
}

impl LayoutPage {
    /// Reads a layout result tolerantly; anything unreadable is left out.
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            log::debug!("Layout result is not an object, ignoring");
            return Self::default();
        };
        let pruned = map.get("prunedResult").and_then(Value::as_object).unwrap_or(map);

        let markdown = map
            .get("markdown")
            .or_else(|| pruned.get("markdown"))
            .and_then(MarkdownField::from_value);

        let blocks = ["layout_blocks", "blocks", "parsing_res_list"]
            .iter()
            .find_map(|key| pruned.get(*key).and_then(Value::as_array))
            .or_else(|| {
                pruned
                    .get("layout_det_res")
                    .and_then(|det| det.get("boxes"))
                    .and_then(Value::as_array)
            })
            .map(|items| items.iter().filter_map(parse_block).collect::<Vec<_>>());

        Self { markdown, blocks }
    }

    pub fn markdown_fragments(&self) -> Vec<String> {
        self.markdown
            .as_ref()
            .map(MarkdownField::fragments)
            .unwrap_or_default()
    }
}

fn parse_block(value: &Value) -> Option<LayoutBlock> {
    let map = value.as_object()?;
    let bbox = ["bbox", "block_bbox", "coordinate"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array))?;
    if bbox.len() != 4 {
        log::debug!("Skipping layout block with {}-value bbox", bbox.len());
        return None;
    }
    let mut corners = [0.0f32; 4];
    for (slot, number) in corners.iter_mut().zip(bbox) {
        *slot = number.as_f64()? as f32;
    }
    let text_field = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string)
    };
    Some(LayoutBlock {
        bbox: corners,
        label: text_field(&["label", "block_label"]),
        content: text_field(&["content", "block_content", "text"]),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    /// Keep only OCR results that substring-match a line of the layout
    /// engine's Markdown.
    pub filter_by_markdown: bool,
    /// Same-line band as a fraction of the median box height. `0` disables
    /// line grouping.
    pub line_tolerance: f32,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            filter_by_markdown: false,
            line_tolerance: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub results: Vec<OcrResult>,
    pub markdown: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    parser: ResultParser,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self {
            parser: ResultParser::new(),
            options,
        }
    }

    /// Merges layout regions and precise OCR boxes into one reading-order
    /// sequence. Never fails: unreadable parts are logged and left out.
    #[instrument(level = "debug", skip_all, fields(layout_pages = layout.len()))]
    pub fn reconcile(&self, layout: &[LayoutPage], ocr: &[RawOcrShape]) -> Reconciled {
        let results = match self.parser.parse(ocr) {
            Ok(results) => validate_results(results),
            Err(err) => {
                log::warn!("Failed to parse OCR pass: {err}");
                Vec::new()
            }
        };

        let fragments = layout
            .iter()
            .flat_map(LayoutPage::markdown_fragments)
            .filter(|fragment| !fragment.trim().is_empty())
            .collect::<Vec<_>>();
        let blocks = layout
            .iter()
            .filter_map(|page| page.blocks.as_deref())
            .flatten()
            .collect::<Vec<_>>();

        let results = if self.options.filter_by_markdown && !fragments.is_empty() {
            filter_by_markdown(results, &fragments)
        } else {
            results
        };

        let results = if blocks.is_empty() {
            sort_reading_order(results, self.options.line_tolerance)
        } else {
            self.order_by_blocks(results, &blocks)
        };

        let markdown = if fragments.is_empty() {
            results
                .iter()
                .map(|result| result.text.trim())
                .collect::<Vec<_>>()
                .join("\n\n")
        } else {
            fragments.join("\n\n")
        };

        Reconciled { results, markdown }
    }

    fn order_by_blocks(&self, results: Vec<OcrResult>, blocks: &[&LayoutBlock]) -> Vec<OcrResult> {
        let regions = blocks
            .iter()
            .map(|block| corners_rect(block.bbox))
            .collect::<Vec<_>>();
        let mut buckets = vec![Vec::new(); regions.len()];
        let mut unassigned = Vec::new();

        for result in results {
            let slot = result
                .center()
                .and_then(|center| regions.iter().position(|region| rect_contains(region, center)));
            match slot {
                Some(index) => buckets[index].push(result),
                None => unassigned.push(result),
            }
        }
        log::debug!(
            "Assigned OCR results to {} layout blocks, {} unassigned",
            regions.len(),
            unassigned.len()
        );

        buckets
            .into_iter()
            .chain(std::iter::once(unassigned))
            .flat_map(|bucket| sort_reading_order(bucket, self.options.line_tolerance))
            .collect()
    }
}

/// Keeps results whose text and some cleaned Markdown line contain one
/// another.
pub fn filter_by_markdown(results: Vec<OcrResult>, fragments: &[String]) -> Vec<OcrResult> {
    let lines = fragments
        .iter()
        .flat_map(|fragment| fragment.lines())
        .map(clean_markdown_line)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return results;
    }

    let before = results.len();
    let kept = results
        .into_iter()
        .filter(|result| {
            let text = result.text.trim();
            lines
                .iter()
                .any(|line| line.contains(text) || text.contains(line.as_str()))
        })
        .collect::<Vec<_>>();
    log::debug!("Markdown filter kept {} of {before} results", kept.len());
    kept
}

/// Strips headers, emphasis, inline code, HTML tags, and link/image syntax
/// (keeping the visible text). Delimiters inside words and `<` that does not
/// start a tag are kept as text.
pub fn clean_markdown_line(line: &str) -> String {
    let line = line.trim_start().trim_start_matches('#').trim_start();
    let line = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("> "))
        .unwrap_or(line);

    let chars = line.chars().collect::<Vec<_>>();
    let delimiters = delimiter_mask(&chars);
    let visible = |range: std::ops::Range<usize>| {
        range
            .filter(|&j| !delimiters[j])
            .map(|j| chars[j])
            .collect::<String>()
    };
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '!' if chars.get(i + 1) == Some(&'[') => i += 1,
            '[' => {
                if let Some(close) = find_from(&chars, i + 1, ']') {
                    out.push_str(&visible(i + 1..close));
                    i = close + 1;
                    if chars.get(i) == Some(&'(') {
                        i = find_from(&chars, i, ')').map_or(chars.len(), |end| end + 1);
                    }
                } else {
                    out.push('[');
                    i += 1;
                }
            }
            '<' if starts_tag(chars.get(i + 1)) => match find_from(&chars, i, '>') {
                Some(close) => i = close + 1,
                None => {
                    out.push('<');
                    i += 1;
                }
            },
            _ if delimiters[i] => i += 1,
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out.trim().to_string()
}

fn starts_tag(next: Option<&char>) -> bool {
    next.is_some_and(|c| c.is_ascii_alphabetic() || *c == '/' || *c == '!')
}

struct DelimiterRun {
    start: usize,
    end: usize,
    delimiter: char,
    opens: bool,
    closes: bool,
}

/// Marks `*`, `_`, `` ` `` and `~` runs that open a span closed by a later
/// run of the same character. Runs inside a word or surrounded by spaces
/// never open or close.
fn delimiter_mask(chars: &[char]) -> Vec<bool> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let delimiter = chars[i];
        if !matches!(delimiter, '*' | '_' | '`' | '~') {
            i += 1;
            continue;
        }
        let start = i;
        while chars.get(i) == Some(&delimiter) {
            i += 1;
        }
        let before = start.checked_sub(1).map(|j| chars[j]);
        let after = chars.get(i).copied();
        runs.push(DelimiterRun {
            start,
            end: i,
            delimiter,
            opens: after.is_some_and(|c| !c.is_whitespace()) && !before.is_some_and(char::is_alphanumeric),
            closes: before.is_some_and(|c| !c.is_whitespace()) && !after.is_some_and(char::is_alphanumeric),
        });
    }

    let mut mask = vec![false; chars.len()];
    let mut used = vec![false; runs.len()];
    for open in 0..runs.len() {
        if used[open] || !runs[open].opens {
            continue;
        }
        let close = (open + 1..runs.len())
            .find(|&k| !used[k] && runs[k].closes && runs[k].delimiter == runs[open].delimiter);
        if let Some(close) = close {
            used[open] = true;
            used[close] = true;
            mask[runs[open].start..runs[open].end].fill(true);
            mask[runs[close].start..runs[close].end].fill(true);
        }
    }
    mask
}

fn find_from(chars: &[char], start: usize, target: char) -> Option<usize> {
    chars[start..]
        .iter()
        .position(|&c| c == target)
        .map(|offset| start + offset)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::parser::OcrRecord;

    fn record(items: &[(&str, [f32; 4])]) -> Vec<RawOcrShape> {
        let mut record = OcrRecord::default();
        for (text, [x1, y1, x2, y2]) in items {
            record.rec_texts.push(text.to_string());
            record.rec_scores.push(0.9);
            record
                .dt_polys
                .push(crate::parser::BoxValue::Flat(vec![*x1, *y1, *x2, *y2]));
        }
        vec![RawOcrShape::Attribute(record)]
    }

    fn texts(reconciled: &Reconciled) -> Vec<&str> {
        reconciled.results.iter().map(|r| r.text.as_str()).collect()
    }

    #[test]
    fn contained_results_come_before_unassigned() {
        let layout = vec![LayoutPage {
            markdown: None,
            blocks: Some(vec![LayoutBlock::new([0.0, 0.0, 200.0, 200.0])]),
        }];
        let ocr = record(&[("outside", [490.0, 490.0, 510.0, 510.0]), ("inside", [40.0, 40.0, 60.0, 60.0])]);
        let reconciled = Reconciler::default().reconcile(&layout, &ocr);
        assert_eq!(texts(&reconciled), ["inside", "outside"]);
    }

    #[test]
    fn blocks_keep_layout_order_over_position() {
        let layout = vec![LayoutPage {
            markdown: None,
            blocks: Some(vec![
                LayoutBlock::new([300.0, 0.0, 600.0, 800.0]),
                LayoutBlock::new([0.0, 0.0, 290.0, 800.0]),
            ]),
        }];
        let ocr = record(&[
            ("left column", [10.0, 10.0, 280.0, 30.0]),
            ("right column", [310.0, 10.0, 590.0, 30.0]),
            ("right below", [310.0, 50.0, 590.0, 70.0]),
        ]);
        let reconciled = Reconciler::default().reconcile(&layout, &ocr);
        assert_eq!(texts(&reconciled), ["right column", "right below", "left column"]);
    }

    #[test]
    fn reconciliation_is_deterministic() {
        let layout = vec![LayoutPage {
            markdown: None,
            blocks: Some(vec![LayoutBlock::new([0.0, 0.0, 100.0, 100.0])]),
        }];
        let ocr = record(&[
            ("b", [50.0, 10.0, 60.0, 20.0]),
            ("a", [10.0, 10.0, 20.0, 20.0]),
            ("c", [300.0, 300.0, 310.0, 310.0]),
            ("d", [10.0, 60.0, 20.0, 70.0]),
        ]);
        let reconciler = Reconciler::default();
        let first = reconciler.reconcile(&layout, &ocr);
        for _ in 0..10 {
            assert_eq!(reconciler.reconcile(&layout, &ocr), first);
        }
        assert_eq!(texts(&first), ["a", "b", "d", "c"]);
    }

    #[test]
    fn without_blocks_falls_back_to_position_sort_and_synthesized_markdown() {
        let ocr = record(&[("Bottom", [0.0, 100.0, 50.0, 110.0]), ("Top", [0.0, 0.0, 50.0, 10.0])]);
        let reconciled = Reconciler::default().reconcile(&[], &ocr);
        assert_eq!(texts(&reconciled), ["Top", "Bottom"]);
        assert_eq!(reconciled.markdown, "Top\n\nBottom");
    }

    #[test]
    fn extracted_markdown_wins_when_present() {
        let layout = vec![
            LayoutPage {
                markdown: Some(MarkdownField::Text("# Title".into())),
                blocks: None,
            },
            LayoutPage {
                markdown: Some(MarkdownField::List(vec![json!("  "), json!({"text": "Body"})])),
                blocks: None,
            },
        ];
        let ocr = record(&[("Title", [0.0, 0.0, 50.0, 10.0])]);
        let reconciled = Reconciler::default().reconcile(&layout, &ocr);
        assert_eq!(reconciled.markdown, "# Title\n\nBody");
    }

    #[test]
    fn markdown_filter_drops_noise() {
        let layout = vec![LayoutPage {
            markdown: Some(MarkdownField::Text(
                "## Quarterly **report**\n\nSee [the appendix](a.md) for details".into(),
            )),
            blocks: None,
        }];
        let ocr = record(&[
            ("Quarterly report", [0.0, 0.0, 100.0, 10.0]),
            ("the appendix", [0.0, 20.0, 100.0, 30.0]),
            ("%%noise%%", [0.0, 40.0, 100.0, 50.0]),
        ]);
        let reconciler = Reconciler::new(ReconcileOptions {
            filter_by_markdown: true,
            ..Default::default()
        });
        let reconciled = reconciler.reconcile(&layout, &ocr);
        assert_eq!(texts(&reconciled), ["Quarterly report", "the appendix"]);
    }

    #[test]
    fn cleans_markdown_syntax() {
        assert_eq!(clean_markdown_line("### *Hello* _there_"), "Hello there");
        assert_eq!(clean_markdown_line("![figure](img/1.png) caption"), "figure caption");
        assert_eq!(clean_markdown_line("<div align=\"center\">Table</div>"), "Table");
        assert_eq!(clean_markdown_line("- `code` item"), "code item");
    }

    #[test]
    fn keeps_literal_symbols_in_text() {
        assert_eq!(clean_markdown_line("user_id"), "user_id");
        assert_eq!(clean_markdown_line("a < b and c > d"), "a < b and c > d");
        assert_eq!(clean_markdown_line("2 * 3 = 6"), "2 * 3 = 6");
        assert_eq!(clean_markdown_line("**snake_case** field"), "snake_case field");
        assert_eq!(clean_markdown_line("~approx"), "~approx");
    }

    #[test]
    fn markdown_filter_matches_text_with_symbols() {
        let results = vec![
            OcrResult::from_corners("user_id", 0.9, [0.0, 0.0, 50.0, 10.0]),
            OcrResult::from_corners("a < b and c > d", 0.9, [0.0, 20.0, 80.0, 30.0]),
            OcrResult::from_corners("stray", 0.9, [0.0, 40.0, 30.0, 50.0]),
        ];
        let fragments = vec!["Columns: user_id\n\nwhen a < b and c > d holds".to_string()];

        let kept = filter_by_markdown(results, &fragments);
        assert_eq!(
            kept.iter().map(|result| result.text.as_str()).collect::<Vec<_>>(),
            ["user_id", "a < b and c > d"]
        );
    }

    #[test]
    fn reads_paddlex_layout_result() {
        let page = LayoutPage::from_value(&json!({
            "prunedResult": {
                "parsing_res_list": [
                    {"block_bbox": [0, 0, 100, 50], "block_label": "title", "block_content": "Intro"},
                    {"block_bbox": [0, 0, 1], "block_label": "broken"}
                ]
            },
            "markdown": {"text": "# Intro", "images": {}}
        }));
        let blocks = page.blocks.as_ref().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].label.as_deref(), Some("title"));
        assert_eq!(page.markdown_fragments(), ["# Intro"]);
    }

    #[test]
    fn missing_block_list_is_tolerated() {
        let page = LayoutPage::from_value(&json!({"markdown": "only text"}));
        assert!(page.blocks.is_none());
        assert!(LayoutPage::from_value(&json!(42)).markdown.is_none());
    }
}
