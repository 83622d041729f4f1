use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchestrator::{
    FilePointerStore, GenerationOutcome, GenerationRequest, JobKind, Orchestrator, TrailerChain,
};
use providers::{
    FalProvider, HttpPromptAdjuster, MediaProvider, PromptAdjuster, ProviderConfig,
    ReplicateProvider,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "showrunner")]
#[command(about = "Showrunner generation CLI - Headless media generation jobs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Where the durable trailer pointer is kept
    #[arg(long, global = true, default_value = "trailer_pointer.json")]
    pointer_file: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a character portrait
    Portrait {
        /// Show id
        #[arg(short, long)]
        show: String,

        /// Character id
        #[arg(short, long)]
        character: String,

        /// Generation prompt
        prompt: String,

        /// Character sheet reference image URL
        #[arg(long)]
        reference: Option<String>,
    },

    /// Generate a character intro video
    Video {
        /// Show id
        #[arg(short, long)]
        show: String,

        /// Character id
        #[arg(short, long)]
        character: String,

        /// Generation prompt
        prompt: String,

        /// Portrait reference image URL
        #[arg(long)]
        reference: Option<String>,
    },

    /// Generate the show key-art poster
    Poster {
        /// Show id
        #[arg(short, long)]
        show: String,

        /// Generation prompt
        prompt: String,

        /// Composite reference image URL
        #[arg(long)]
        reference: Option<String>,
    },

    /// Generate the show trailer through the fallback chain
    Trailer {
        /// Show id
        #[arg(short, long)]
        show: String,

        /// Generation prompt
        prompt: String,

        /// Poster/composite reference image URL
        #[arg(long)]
        reference: Option<String>,
    },

    /// Resume a trailer left in flight by a previous session
    Resume,

    /// Check that the configured providers are reachable
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let engine = build_engine(&cli.pointer_file);

    match cli.command {
        Commands::Portrait {
            show,
            character,
            prompt,
            reference,
        } => {
            let provider = image_provider()?;
            generate_command(
                &engine,
                provider,
                GenerationRequest {
                    kind: JobKind::Portrait,
                    show_id: show,
                    subject_id: character,
                    prompt,
                    reference_image_url: reference,
                    step_number: 2,
                },
            )
            .await
        }
        Commands::Video {
            show,
            character,
            prompt,
            reference,
        } => {
            let provider = video_provider()?;
            generate_command(
                &engine,
                provider,
                GenerationRequest {
                    kind: JobKind::Video,
                    show_id: show,
                    subject_id: character,
                    prompt,
                    reference_image_url: reference,
                    step_number: 3,
                },
            )
            .await
        }
        Commands::Poster {
            show,
            prompt,
            reference,
        } => {
            let provider = image_provider()?;
            generate_command(
                &engine,
                provider,
                GenerationRequest {
                    kind: JobKind::Poster,
                    show_id: show.clone(),
                    subject_id: show,
                    prompt,
                    reference_image_url: reference,
                    step_number: 8,
                },
            )
            .await
        }
        Commands::Trailer {
            show,
            prompt,
            reference,
        } => trailer_command(&engine, show, prompt, reference).await,
        Commands::Resume => resume_command(&engine).await,
        Commands::Check => check_command().await,
    }
}

fn build_engine(pointer_file: &PathBuf) -> Orchestrator {
    // The adjuster endpoint is optional; without one, adjustment calls
    // fail as transport errors and the engine keeps the original prompt.
    let adjuster = HttpPromptAdjuster::new(
        std::env::var("SHOWRUNNER_ADJUSTER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8787/adjust".to_string()),
        std::env::var("SHOWRUNNER_ADJUSTER_KEY").ok(),
    );
    let store = FilePointerStore::new(pointer_file.clone());
    Orchestrator::new(
        Arc::new(adjuster) as Arc<dyn PromptAdjuster>,
        Arc::new(store),
    )
}

fn image_provider() -> Result<Arc<dyn MediaProvider>> {
    let token = std::env::var("REPLICATE_API_TOKEN")
        .context("REPLICATE_API_TOKEN must be set for image generation")?;
    let model = std::env::var("REPLICATE_IMAGE_MODEL")
        .unwrap_or_else(|_| "black-forest-labs/flux-1.1-pro".to_string());
    let config = ProviderConfig::new("https://api.replicate.com", model).with_api_key(token);
    Ok(Arc::new(ReplicateProvider::new(config)?))
}

fn video_provider() -> Result<Arc<dyn MediaProvider>> {
    let key =
        std::env::var("FAL_KEY").context("FAL_KEY must be set for video generation")?;
    let model = std::env::var("FAL_VIDEO_MODEL")
        .unwrap_or_else(|_| "fal-ai/kling-video/v1.6/standard/image-to-video".to_string());
    let config = ProviderConfig::new("https://queue.fal.run", model).with_api_key(key);
    Ok(Arc::new(FalProvider::new(config)?))
}

fn trailer_fallback_provider() -> Result<Arc<dyn MediaProvider>> {
    let token = std::env::var("REPLICATE_API_TOKEN")
        .context("REPLICATE_API_TOKEN must be set for the trailer fallback")?;
    let model = std::env::var("REPLICATE_VIDEO_MODEL")
        .unwrap_or_else(|_| "kwaivgi/kling-v1.6-standard".to_string());
    let config = ProviderConfig::new("https://api.replicate.com", model).with_api_key(token);
    Ok(Arc::new(ReplicateProvider::new(config)?))
}

async fn generate_command(
    engine: &Orchestrator,
    provider: Arc<dyn MediaProvider>,
    request: GenerationRequest,
) -> Result<()> {
    info!(
        "Generating {} for {} on {}",
        request.kind,
        request.subject_id,
        provider.name()
    );

    let outcome = engine.generate(provider, request).await?;
    report_outcome(outcome);
    Ok(())
}

async fn trailer_command(
    engine: &Orchestrator,
    show: String,
    prompt: String,
    reference: Option<String>,
) -> Result<()> {
    let primary = video_provider()?;
    let fallback = trailer_fallback_provider()?;
    let chain = TrailerChain::standard(primary, fallback);

    info!("Generating trailer for show {}", show);

    let outcome = engine
        .generate_trailer(
            &chain,
            GenerationRequest {
                kind: JobKind::Trailer,
                show_id: show.clone(),
                subject_id: show,
                prompt,
                reference_image_url: reference,
                step_number: 9,
            },
        )
        .await?;
    report_outcome(outcome);
    Ok(())
}

async fn resume_command(engine: &Orchestrator) -> Result<()> {
    let provider = video_provider()?;

    match engine.resume_trailer(provider).await? {
        None => {
            info!("No in-flight trailer to resume");
            Ok(())
        }
        Some(outcome) => {
            report_outcome(outcome);
            Ok(())
        }
    }
}

async fn check_command() -> Result<()> {
    for build in [image_provider, video_provider, trailer_fallback_provider] {
        match build() {
            Err(e) => warn!("Not configured: {}", e),
            Ok(provider) => match provider.is_available().await {
                Ok(true) => info!("{} ({}) reachable", provider.name(), provider.model()),
                Ok(false) => warn!("{} answered but looks unavailable", provider.name()),
                Err(e) => warn!("{} unreachable: {}", provider.name(), e),
            },
        }
    }
    Ok(())
}

fn report_outcome(outcome: GenerationOutcome) {
    match outcome {
        GenerationOutcome::Succeeded {
            output_url,
            model_used,
            attempts,
            used_adjustment,
        } => {
            info!(
                "Done in {} attempt(s) on {}{}",
                attempts,
                model_used,
                if used_adjustment {
                    " (prompt was adjusted)"
                } else {
                    ""
                }
            );
            println!("{}", output_url);
        }
        GenerationOutcome::Superseded => {
            warn!("Request was superseded by a newer one for the same subject");
        }
    }
}
