use clap::Parser;
use invoice_extract::config::Config;
use invoice_extract::normalize::normalize;
use invoice_extract::ocr::{OcrSession, TesseractFactory};
use invoice_extract::{ExtractionOrchestrator, SourceDocument, TextAcquisition};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, error, info, info_span};
use tracing_subscriber::EnvFilter;

/// Extract structured data from invoice PDFs and images.
#[derive(Debug, Parser)]
#[command(name = "invoice-extract", version)]
struct Args {
    /// TOML config file; defaults apply when it does not exist
    #[arg(long, default_value = "invoice-extract.toml")]
    config: PathBuf,

    /// Declared MIME type for every input
    #[arg(long)]
    mime: Option<String>,

    /// Per-file time limit
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print recovered text instead of structured data
    #[arg(long)]
    text_only: bool,

    #[arg(long)]
    pretty: bool,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    let args = Args::parse();
    let cfg = Config::load_or_default(&args.config)?;
    let session = Arc::new(OcrSession::new(Arc::new(TesseractFactory::from_config(&cfg.ocr))));

    let orchestrator = ExtractionOrchestrator::from_config(&cfg, Arc::clone(&session)).await;
    let acquisition = TextAcquisition::new(&cfg, Arc::clone(&session));

    let mut failures = 0usize;
    for path in &args.files {
        let span = info_span!("file", path = %path.display());
        let work = async {
            if args.text_only {
                let document = SourceDocument::from_path(path, args.mime.as_deref()).await?;
                let acquired = acquisition.acquire(&document).await?;
                info!(used_ocr = acquired.used_ocr, pages = acquired.page_count, "Text acquired");
                Ok::<String, Box<dyn std::error::Error>>(normalize(&acquired.text))
            } else {
                let outcome = orchestrator.extract_path(path, args.mime.as_deref()).await?;
                let json = if args.pretty {
                    serde_json::to_string_pretty(&outcome)?
                } else {
                    serde_json::to_string(&outcome)?
                };
                Ok(json)
            }
        }
        .instrument(span);

        let result = match args.timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), work).await {
                Ok(r) => r,
                Err(_) => Err(format!("timed out after {secs}s").into()),
            },
            None => work.await,
        };

        match result {
            Ok(output) => println!("{output}"),
            Err(e) => {
                failures += 1;
                error!(path = %path.display(), error = %e, "Extraction failed");
            }
        }
    }

    session.shutdown().await;
    info!(files = args.files.len(), failures, "Done");

    if failures > 0 {
        return Err(format!("{failures} file(s) failed").into());
    }
    Ok(())
}
