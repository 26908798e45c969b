//! `tryon`: run one virtual try-on session from the command line.
//!
//! Usage:
//!   tryon --subject me.jpg --garment shirt.png
//!   tryon --subject me.jpg --describe "a red floral summer dress"
//!   tryon --subject me.jpg --catalog-id item-42 --catalog-image static/catalog/jeans.jpg --category "Lower body"
//!   tryon --subject me.jpg --garment shirt.png --config tryon.yaml --no-fallback --json

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tryon_core::{
    CatalogItem, Category, GarmentSelection, LocalFile, Session, SessionStateMachine, Step,
    TryOnConfig,
};

#[derive(Parser, Debug)]
#[command(name = "tryon")]
#[command(about = "Run one virtual try-on session against the try-on services")]
#[command(group(
    ArgGroup::new("garment_source")
        .required(true)
        .args(["garment", "describe", "catalog_id"]),
))]
struct Args {
    /// Photo of the person
    #[arg(short, long)]
    subject: PathBuf,

    /// Garment image to upload
    #[arg(short, long)]
    garment: Option<PathBuf>,

    /// Optional description of the uploaded garment, used for classification
    #[arg(long, requires = "garment")]
    garment_description: Option<String>,

    /// Generate the garment from a text description
    #[arg(short, long)]
    describe: Option<String>,

    /// Catalog item identifier
    #[arg(long, requires = "catalog_image")]
    catalog_id: Option<String>,

    /// Server path of the catalog item's image
    #[arg(long, requires = "catalog_id")]
    catalog_image: Option<String>,

    /// Category of the catalog item ("Upper body", "Lower body", "Dress")
    #[arg(long, requires = "catalog_id", value_parser = parse_category)]
    category: Option<Category>,

    /// YAML config file; TRYON_* variables override it
    #[arg(short, long, env = "TRYON_CONFIG")]
    config: Option<PathBuf>,

    /// Make primary failures terminal
    #[arg(long)]
    no_fallback: bool,

    /// Print the final session as JSON
    #[arg(long)]
    json: bool,
}

fn parse_category(raw: &str) -> std::result::Result<Category, String> {
    Category::from_wire_label(&raw.replace(['_', '-'], " "))
        .ok_or_else(|| format!("unknown category {raw:?}; use \"Upper body\", \"Lower body\" or \"Dress\""))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tryon=info,tryon_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(args.config.as_deref(), args.no_fallback)?;
    let machine = SessionStateMachine::from_config(&config)?;

    if let Some(availability) = machine.refresh_availability().await {
        info!(
            primary = availability.primary,
            fallback = availability.fallback,
            "engine availability"
        );
    }

    let selection = garment_selection(&args).await?;
    if let Err(e) = machine.select_garment(selection).await {
        return Ok(report_failure(&machine, &e.to_string()).await);
    }
    let subject = read_local_file(&args.subject).await?;
    if let Err(e) = machine.upload_subject(subject).await {
        return Ok(report_failure(&machine, &e.to_string()).await);
    }

    let session = machine.generate().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    }
    Ok(print_outcome(&session))
}

fn load_config(path: Option<&Path>, no_fallback: bool) -> Result<TryOnConfig> {
    let mut config = match path {
        Some(path) => {
            let mut config = TryOnConfig::load_from_file(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config.validate()?;
            config
        }
        None => TryOnConfig::from_env()?,
    };
    if no_fallback {
        config.fallback_enabled = false;
    }
    Ok(config)
}

async fn garment_selection(args: &Args) -> Result<GarmentSelection> {
    if let Some(path) = &args.garment {
        return Ok(GarmentSelection::Upload {
            file: read_local_file(path).await?,
            description: args.garment_description.clone(),
        });
    }
    if let Some(text) = &args.describe {
        return Ok(GarmentSelection::Describe(text.clone()));
    }
    match (&args.catalog_id, &args.catalog_image) {
        (Some(item_id), Some(image_path)) => Ok(GarmentSelection::Catalog(CatalogItem {
            item_id: item_id.clone(),
            name: item_id.clone(),
            image_path: image_path.clone(),
            category: args.category,
        })),
        _ => anyhow::bail!("one of --garment, --describe or --catalog-id is required"),
    }
}

async fn read_local_file(path: &Path) -> Result<LocalFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(LocalFile::new(file_name, content_type_for(path), bytes))
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

async fn report_failure(machine: &SessionStateMachine, fallback_text: &str) -> ExitCode {
    let message = machine
        .snapshot()
        .await
        .last_error
        .map(|e| e.user_message())
        .unwrap_or_else(|| fallback_text.to_string());
    eprintln!("{message}");
    ExitCode::FAILURE
}

fn print_outcome(session: &Session) -> ExitCode {
    match (session.step, &session.result, &session.last_error) {
        (Step::Done, Some(result), _) => {
            println!("{}", result.result_ref);
            if result.via_fallback() {
                eprintln!("Completed via the fallback engine.");
            }
            ExitCode::SUCCESS
        }
        (_, _, Some(error)) => {
            eprintln!("{}", error.user_message());
            ExitCode::FAILURE
        }
        (step, _, _) => {
            eprintln!("Session ended in unexpected step {step}");
            ExitCode::FAILURE
        }
    }
}
