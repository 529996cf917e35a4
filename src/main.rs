use clap::{Parser, Subcommand};
use std::io::{BufReader, Cursor};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use typebleed_codec::{Lexicon, ReconstructionEngine, TemplateCatalog};
use typebleed_core::journal::replay;
use typebleed_core::{unix_millis, CodepointRegistry, SessionStore, TypeBleedConfig, TypeBleedError};
use typebleed_transport::TypeBleedServer;

#[derive(Parser, Debug)]
#[command(name = "typebleed")]
#[command(version, about = "Glyph-fetch capture and text reconstruction", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the page, stylesheet, capture ingress and API (default)
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Reconstruct every session from a JSON-lines journal or a live server
    Reconstruct {
        /// Journal file, as exported by `/api/log.jsonl`
        #[arg(short, long, required_unless_present = "api", conflicts_with = "api")]
        log: Option<PathBuf>,

        /// Base URL of a running server, e.g. http://127.0.0.1:8080
        #[arg(short, long)]
        api: Option<String>,

        /// Template name; the first configured template when omitted
        #[arg(short, long)]
        template: Option<String>,

        /// Only this session
        #[arg(short, long)]
        session: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => TypeBleedConfig::load(path)?,
        None => TypeBleedConfig::default(),
    };

    match cli.command.unwrap_or(Command::Serve { host: None, port: None }) {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config)
        }
        Command::Reconstruct { log, api, template, session } => {
            let source = match (log, api) {
                (Some(path), _) => JournalSource::File(path),
                (None, Some(url)) => JournalSource::Api(url),
                (None, None) => return Err("reconstruct needs --log or --api".into()),
            };
            reconstruct(&config, &source, template.as_deref(), session.as_deref())
        }
    }
}

fn serve(config: TypeBleedConfig) -> Result<(), Box<dyn std::error::Error>> {
    let server = TypeBleedServer::from_config(&config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.threads)
        .thread_name("typebleed-worker")
        .enable_all()
        .build()?;
    runtime.block_on(server.start())?;
    Ok(())
}

enum JournalSource {
    File(PathBuf),
    Api(String),
}

/// Downloads the live journal export of a running server.
fn fetch_journal(base_url: &str) -> Result<String, Box<dyn std::error::Error>> {
    let url = format!("{}/api/log.jsonl", base_url.trim_end_matches('/'));
    tracing::info!("Fetching capture journal from {}", url);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let body = runtime.block_on(async {
        reqwest::get(&url).await?.error_for_status()?.text().await
    })?;
    Ok(body)
}

fn reconstruct(
    config: &TypeBleedConfig,
    source: &JournalSource,
    template: Option<&str>,
    session: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let registry = CodepointRegistry::with_alphabet(config.alphabet_set())?;
    let catalog = TemplateCatalog::from_config(config, &registry)?;
    let template = catalog.resolve(template).ok_or_else(|| {
        TypeBleedError::config(format!("unknown template {:?}", template.unwrap_or_default()))
    })?;
    let engine = ReconstructionEngine::from_config(&config.reconstruction)
        .with_lexicon(Lexicon::from_config(config));

    // Offline analysis keeps every journalled session regardless of age.
    let store = SessionStore::new(Duration::MAX);
    let applied = match source {
        JournalSource::File(path) => {
            replay(BufReader::new(std::fs::File::open(path)?), &registry, &store)?
        }
        JournalSource::Api(url) => replay(Cursor::new(fetch_journal(url)?), &registry, &store)?,
    };
    tracing::info!("Replayed {} captures into {} sessions", applied, store.len());

    for snapshot in store.snapshots_at(unix_millis()) {
        if session.is_some_and(|wanted| wanted != snapshot.id.as_str()) {
            continue;
        }
        let result = engine.reconstruct(&snapshot, &template, registry.alphabet());
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}
