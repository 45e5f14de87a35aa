use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use paddle_hybrid::{ProcessOptions, Toolkit, ToolkitConfig};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Parser)]
#[command(name = "paddle-hybrid")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Searchable PDFs, Markdown, and translations from PaddleOCR layout + OCR passes", long_about = None)]
struct Cli {
    /// PDF to process
    input: PathBuf,

    /// Searchable PDF output (default: <input>_searchable.pdf)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Combined Markdown output
    #[arg(long)]
    markdown: Option<PathBuf>,

    /// Per-page text blocks as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Simple HTML rendition
    #[arg(long)]
    html: Option<PathBuf>,

    /// Rasterization DPI (default from the config file); when not given,
    /// scanned documents are rendered at a higher DPI
    #[arg(long)]
    dpi: Option<u32>,

    /// TOML configuration file
    #[arg(long, default_value = "paddle-hybrid.toml", env = "PADDLE_HYBRID_CONFIG")]
    config: PathBuf,

    /// Paint the text layer pink instead of hiding it
    #[arg(long)]
    debug_layer: bool,

    /// Translate into this language and write translated PDFs
    #[arg(long = "translate-to")]
    translate_to: Option<String>,

    /// Also write a bilingual PDF (original and translated pages interleaved)
    #[arg(long, requires = "translate_to")]
    bilingual: bool,

    /// Do not log per-page progress
    #[arg(long)]
    no_progress: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paddle_hybrid=info")),
        )
        .init();

    let cli = Cli::parse();
    if !cli.input.is_file() {
        bail!("{} is not a file", cli.input.display());
    }

    let mut config = ToolkitConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.debug_layer {
        config.pdf.debug_text_layer = true;
    }
    let translate = cli.translate_to.map(|target| {
        let mut translate = config.translate.clone();
        translate.target_lang = target;
        translate.bilingual |= cli.bilingual;
        translate
    });

    let toolkit = Toolkit::from_config(&config).context("setting up PDFium and the OCR engine")?;
    let options = ProcessOptions {
        output_path: cli.output,
        markdown_output: cli.markdown,
        json_output: cli.json,
        html_output: cli.html,
        dpi: cli.dpi.unwrap_or(config.pdf.default_dpi),
        show_progress: !cli.no_progress,
        translate,
    };
    let summary = toolkit.process_pdf(&cli.input, &options);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(error) = summary.error {
        bail!("processing {} failed: {error}", cli.input.display());
    }
    Ok(())
}
