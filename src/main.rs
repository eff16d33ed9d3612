// src/main.rs
// POSTCHAT CORE
// Persona extraction over live-stream chat transcripts: CLI runs and the REST API server.

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Modules
mod aggregator;
mod api;
mod batch_inference;
mod comparator;
mod config;
mod error;
mod gateway;
mod persona;
mod persona_extractor;
mod pipeline;
mod prompts;
mod reporter;
mod similarity;
mod transcript;

use batch_inference::BatchOrchestrator;
use config::{Config, TaxonomyMode};
use error::PipelineError;
use gateway::OpenAiGateway;
use persona_extractor::{ExtractorSettings, PersonaExtractor};
use reporter::Reporter;

#[derive(Parser)]
#[command(name = "postchat", version, about = "Viewer persona analysis for live-stream chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the REST API server
    Serve {
        /// Bind host [default: HOST or 127.0.0.1]
        #[arg(long)]
        host: Option<String>,

        /// Bind port [default: PORT or 8080]
        #[arg(long)]
        port: Option<u16>,
    },

    /// Analyze one chat transcript CSV and export the persona set
    Analyze {
        /// Transcript CSV (message_id,text,timestamp,time_in_seconds,author_name,author_id)
        input: PathBuf,

        /// Video id used in export file names [default: input file stem]
        #[arg(long)]
        video_id: Option<String>,

        /// Directory receiving personas/ and summaries/
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Drop known bot accounts and messages without an author id
        #[arg(long)]
        filter_bots: bool,

        /// Personas requested per batch and kept after aggregation
        #[arg(long)]
        personas: Option<usize>,

        /// Messages per model call
        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long, value_enum)]
        taxonomy: Option<TaxonomyMode>,

        /// Also write the persona set as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Compare two exported persona files
    Compare {
        a: PathBuf,
        b: PathBuf,

        #[arg(long, default_value_t = comparator::DEFAULT_SIMILARITY_THRESHOLD)]
        threshold: f64,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config)?;
        }
        Command::Analyze {
            input,
            video_id,
            output_dir,
            filter_bots,
            personas,
            batch_size,
            taxonomy,
            csv,
        } => {
            if let Some(count) = personas {
                config.pipeline.max_personas = count;
            }
            if let Some(size) = batch_size {
                config.pipeline.batch_size = size;
            }
            if let Some(taxonomy) = taxonomy {
                config.pipeline.taxonomy = taxonomy;
            }
            let video_id = video_id.unwrap_or_else(|| {
                input
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or("video")
                    .to_string()
            });

            let extractor = build_extractor(&config)?;
            let orchestrator = BatchOrchestrator::new(extractor, &config.pipeline);

            let mut messages = transcript::load_csv(&input)?;
            if filter_bots {
                messages = transcript::filter_bots(messages);
            }

            let analysis =
                pipeline::analyze_transcript(&video_id, &messages, &config.pipeline, &orchestrator)?;
            Reporter::export_json(&output_dir, &analysis)?;
            if let Some(path) = csv {
                Reporter::export_csv(&path, &analysis.personas.personas)?;
            }
            Reporter::print_summary(&analysis);
        }
        Command::Compare { a, b, threshold } => {
            let personas_a = Reporter::load_personas(&a)?;
            let personas_b = Reporter::load_personas(&b)?;
            let result = comparator::compare(&personas_a, &personas_b, threshold);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

fn build_extractor(config: &Config) -> Result<Arc<PersonaExtractor>, PipelineError> {
    config.pipeline.validate()?;
    let gateway = OpenAiGateway::new(config.gateway.clone())?;
    tracing::info!(model = %gateway.model(), taxonomy = %config.pipeline.taxonomy, "Model gateway ready");

    let settings = ExtractorSettings {
        temperature: config.pipeline.temperature,
        max_output_tokens: config.pipeline.max_output_tokens,
    };
    Ok(Arc::new(PersonaExtractor::new(Arc::new(gateway), settings)))
}

fn serve(config: Config) -> Result<(), Box<dyn Error>> {
    // Fails fast on a missing API key before the server binds.
    let extractor = build_extractor(&config)?;
    let app_state = web::Data::new(api::AppState::new(extractor, config.pipeline.clone()));
    let bind_addr = config.bind_addr();

    tracing::info!(addr = %bind_addr, "Starting API server");

    actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(app_state.clone())
                .configure(api::configure)
        })
        .bind(bind_addr)?
        .run()
        .await
    })?;

    Ok(())
}
