use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use clap::Parser;
use cli::{is_exit_command, render_answer, Cli, Command};
use common::{
    error::AppError,
    storage::{dataset::load_verses, types::verse_record::VerseRecord},
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
    },
};
use retrieval_pipeline::{AnswerSynthesizer, IndexBuilder, IndexOrigin, SearchService};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = get_config()?;
    if let Some(dataset) = &cli.dataset {
        config.dataset_path = dataset.display().to_string();
    }

    let records = load_verses(&config.dataset_path)
        .await
        .with_context(|| format!("loading dataset {}", config.dataset_path))?;
    let service = Arc::new(build_service(&config).await?);

    match cli.command {
        Command::Index { out } => {
            let path = out
                .or_else(|| config.index_path.as_ref().map(PathBuf::from))
                .ok_or_else(|| anyhow!("no snapshot destination; pass --out or set INDEX_PATH"))?;
            service.rebuild(records).await?;
            service.save_index(&path).await?;
            println!(
                "Indexed {} slokas into {}",
                service.indexed_len().await,
                path.display()
            );
        }
        Command::Ask { question, k } => {
            prepare_index(&service, records, &config).await?;
            let k = k.unwrap_or(config.top_k);
            let result = service.answer_question_with_k(&question.join(" "), k).await?;
            print!("{}", render_answer(&result));
        }
        Command::Chat { k } => {
            prepare_index(&service, records, &config).await?;
            chat_loop(&service, k.unwrap_or(config.top_k)).await?;
        }
        Command::Serve { port } => {
            prepare_index(&service, records, &config).await?;
            serve(service, &config, port.unwrap_or(config.http_port)).await?;
        }
    }

    Ok(())
}

/// Wires the configured embedding backend and answer model into an unbuilt service.
async fn build_service(config: &AppConfig) -> Result<SearchService, AppError> {
    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider =
        EmbeddingProvider::from_config(config, Some(openai_client.clone())).await?;
    info!(
        embedding_backend = ?config.embedding_backend,
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let synthesizer = AnswerSynthesizer::from_config(config, openai_client);

    Ok(SearchService::new(
        Arc::new(embedding_provider),
        synthesizer,
        IndexBuilder::from_config(config),
        config.top_k,
    ))
}

async fn prepare_index(
    service: &SearchService,
    records: Vec<VerseRecord>,
    config: &AppConfig,
) -> Result<IndexOrigin, AppError> {
    let snapshot = config.index_path.as_deref().map(Path::new);
    let origin = service.build_or_restore(records, snapshot).await?;
    info!(
        ?origin,
        verses = service.indexed_len().await,
        "Index ready"
    );
    Ok(origin)
}

async fn chat_loop(service: &SearchService, k: usize) -> anyhow::Result<()> {
    println!("Ask about the Bhagavad Gita (type \"exit\" to quit).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if is_exit_command(&line) {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        match service.answer_question_with_k(&line, k).await {
            Ok(result) => println!("{}", render_answer(&result)),
            Err(e) => eprintln!("{e}"),
        }
    }
    Ok(())
}

async fn serve(service: Arc<SearchService>, config: &AppConfig, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .nest("/api/v1", api_routes_v1())
        .with_state(ApiState::new(service, config));

    let serve_address = format!("0.0.0.0:{port}");
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(&serve_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
