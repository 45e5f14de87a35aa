//! Translation of recognized text and the per-page raster work that puts the
//! translation back onto the page.

use std::{path::PathBuf, time::Duration};

use ab_glyph::FontArc;
use image::DynamicImage;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;

use crate::{
    error::TranslateError,
    inpaint::{erase_regions, render_translations, EraseMode},
    result::{OcrResult, TranslatedBlock},
};

/// Batch translation. Implementations return exactly one entry per input, in
/// order, falling back to the input text for entries they cannot translate.
pub trait Translator {
    fn translate_batch(&self, texts: &[String], source_lang: &str, target_lang: &str) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`.
    pub api_base: String,
    /// Environment variable holding the API key. No key means no auth header.
    pub api_key_env: String,
    pub model: String,
    pub timeout_secs: u64,
    pub font_path: Option<PathBuf>,
    pub source_lang: String,
    pub target_lang: String,
    /// Write the translated-only PDF.
    pub mono: bool,
    /// Write the PDF interleaving original and translated pages.
    pub bilingual: bool,
    pub erase_mode: EraseMode,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
            font_path: None,
            source_lang: "auto".to_string(),
            target_lang: "en".to_string(),
            mono: true,
            bilingual: false,
            erase_mode: EraseMode::default(),
        }
    }
}

/// Chat-completions client that translates a whole page per request.
pub struct OpenAiTranslator {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiTranslator {
    pub fn new(config: &TranslateConfig) -> Result<Self, TranslateError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = std::env::var(&config.api_key_env).ok().filter(|key| !key.is_empty());
        if api_key.is_none() {
            log::debug!("{} is not set, sending unauthenticated requests", config.api_key_env);
        }
        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
        })
    }

    fn complete(&self, system: &str, user: &str) -> Result<String, TranslateError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TranslateError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        let payload = response.json::<Value>()?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TranslateError::Response("no choices[0].message.content".to_string()))
    }

    fn request_batch(&self, texts: &[String], source_lang: &str, target_lang: &str) -> Result<Vec<String>, TranslateError> {
        let system = format!(
            "Translate each string of the JSON array from {} to {target_lang}. \
             Reply with only a JSON array of the same length and order.",
            language_name(source_lang)
        );
        let user = serde_json::to_string(texts).map_err(|err| TranslateError::Response(err.to_string()))?;
        let reply = self.complete(&system, &user)?;
        let translated = parse_json_array(&reply)?;
        if translated.len() != texts.len() {
            return Err(TranslateError::Response(format!(
                "expected {} translations, got {}",
                texts.len(),
                translated.len()
            )));
        }
        Ok(translated)
    }

    fn translate_one(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String, TranslateError> {
        let system = format!(
            "Translate the user's text from {} to {target_lang}. Reply with only the translation.",
            language_name(source_lang)
        );
        Ok(self.complete(&system, text)?.trim().to_string())
    }
}

impl Translator for OpenAiTranslator {
    #[instrument(level = "debug", skip(self, texts), fields(count = texts.len()))]
    fn translate_batch(&self, texts: &[String], source_lang: &str, target_lang: &str) -> Vec<String> {
        if texts.is_empty() {
            return Vec::new();
        }
        match self.request_batch(texts, source_lang, target_lang) {
            Ok(translated) => return translated,
            Err(err) => log::warn!("Batch translation failed, translating entries one by one: {err}"),
        }
        texts
            .iter()
            .map(|text| {
                if text.trim().is_empty() {
                    return text.clone();
                }
                self.translate_one(text, source_lang, target_lang)
                    .unwrap_or_else(|err| {
                        log::warn!("Keeping original text: {err}");
                        text.clone()
                    })
            })
            .collect()
    }
}

fn language_name(code: &str) -> &str {
    if code.eq_ignore_ascii_case("auto") {
        "the source language"
    } else {
        code
    }
}

/// Accepts a bare array or one wrapped in a Markdown code fence.
fn parse_json_array(reply: &str) -> Result<Vec<String>, TranslateError> {
    let trimmed = reply.trim();
    let start = trimmed.find('[');
    let end = trimmed.rfind(']');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err(TranslateError::Response("reply is not a JSON array".to_string())),
    };
    serde_json::from_str(body).map_err(|err| TranslateError::Response(err.to_string()))
}

/// One translated page: the rendered raster and the translated spans for its
/// text layer.
pub struct TranslatedPage {
    pub image: DynamicImage,
    pub layer: Vec<OcrResult>,
}

/// Erases, translates, and re-renders pages with one resolved font.
pub struct PageTranslator<'a> {
    translator: &'a dyn Translator,
    font: FontArc,
    config: &'a TranslateConfig,
}

impl<'a> PageTranslator<'a> {
    pub fn new(translator: &'a dyn Translator, font: FontArc, config: &'a TranslateConfig) -> Self {
        Self {
            translator,
            font,
            config,
        }
    }

    #[instrument(level = "debug", skip_all, fields(spans = results.len()))]
    pub fn translate_page(&self, image: &DynamicImage, results: &[OcrResult]) -> TranslatedPage {
        let sources = results.iter().filter(|result| !result.is_blank()).collect::<Vec<_>>();
        let texts = sources.iter().map(|result| result.text.clone()).collect::<Vec<_>>();
        let mut translations = self
            .translator
            .translate_batch(&texts, &self.config.source_lang, &self.config.target_lang);
        if translations.len() != texts.len() {
            log::warn!(
                "Translator returned {} entries for {} texts, keeping originals",
                translations.len(),
                texts.len()
            );
            translations = texts;
        }

        let blocks = sources
            .iter()
            .zip(translations)
            .map(|(result, translated)| TranslatedBlock::new(result, translated))
            .collect::<Vec<_>>();

        let erased = erase_regions(
            image,
            blocks.iter().filter_map(TranslatedBlock::rect),
            self.config.erase_mode,
        );
        let rendered = render_translations(&erased, &blocks, &self.font);
        let layer = blocks
            .into_iter()
            .map(|block| OcrResult::new(block.translated_text, 1.0, block.bbox))
            .collect();
        TranslatedPage { image: rendered, layer }
    }
}
