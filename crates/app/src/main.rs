use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use webowl_core::{
    load_snapshot_dir, save_snapshot_dir, AnswerService, CancellationToken,
    CharacterNgramEmbedder, ChatCompletionClient, ChunkStore, ConversationContext, Embedder,
    EngineConfig, IndexSnapshot, Neo4jStore, OllamaEmbedder, PipelineResult, SearchCoordinator,
    SearchMode, SearchResult, DEFAULT_EMBEDDING_DIMENSIONS,
};

#[derive(Parser)]
#[command(name = "webowl", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory of JSON snapshot files. When set, Neo4j is not contacted.
    #[arg(long, env = "WEBOWL_SNAPSHOT_DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Neo4j HTTP base URL
    #[arg(long, env = "NEO4J_URL", default_value = "http://localhost:7474")]
    neo4j_url: String,

    /// Neo4j database name
    #[arg(long, env = "NEO4J_DATABASE", default_value = "neo4j")]
    neo4j_db: String,

    /// Neo4j username
    #[arg(long, env = "NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    /// Neo4j password
    #[arg(long, env = "NEO4J_PASSWORD", default_value = "password")]
    neo4j_password: String,

    /// OpenAI-compatible completion API base URL
    #[arg(long, env = "WEBOWL_COMPLETION_URL", default_value = "https://api.groq.com/openai/v1")]
    completion_url: String,

    /// Completion model name
    #[arg(long, env = "WEBOWL_COMPLETION_MODEL", default_value = "llama3-70b-8192")]
    completion_model: String,

    /// Sampling temperature for the answer stages
    #[arg(long, env = "WEBOWL_COMPLETION_TEMPERATURE", default_value = "0.2")]
    completion_temperature: f32,

    /// Completion API key
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    completion_api_key: Option<String>,

    /// Ollama base URL for query embeddings. Without it, the offline n-gram embedder is used.
    #[arg(long, env = "OLLAMA_URL")]
    embedding_url: Option<String>,

    /// Ollama embedding model
    #[arg(long, env = "WEBOWL_EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    embedding_model: String,

    /// Embedding dimensions. Defaults to the dimension found in the index.
    #[arg(long)]
    embedding_dimensions: Option<usize>,

    /// Directory holding one conversation file per `--session`.
    #[arg(long, env = "WEBOWL_HISTORY_DIR", default_value = ".webowl/sessions")]
    history_dir: PathBuf,

    /// Engine configuration file (JSON). Missing fields keep their defaults.
    #[arg(long, env = "WEBOWL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question about the site.
    Ask {
        /// Question text
        #[arg(long)]
        query: String,
        /// SEMANTIC, GRAPH_WALK, HYBRID or MULTIMODAL
        #[arg(long, default_value = "HYBRID")]
        mode: String,
        /// Evidence chunks handed to the answer stages.
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Print the full result as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Continue a named conversation; earlier turns inform the answer.
        #[arg(long)]
        session: Option<String>,
    },
    /// Show the recorded turns of a conversation.
    History {
        #[arg(long)]
        session: String,
    },
    /// Delete a conversation.
    Forget {
        #[arg(long)]
        session: String,
    },
    /// Rank evidence without running the answer stages.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "HYBRID")]
        mode: String,
        #[arg(long, default_value = "10")]
        top_k: usize,
        /// Show per-signal scores for each hit.
        #[arg(long, default_value_t = false)]
        explain: bool,
    },
    /// List the available search modes.
    Modes,
    /// Summarise the loaded site graph.
    Stats,
    /// Show a chunk with its sibling chunks and directly linked pages.
    Context {
        #[arg(long)]
        chunk_id: String,
        #[arg(long, default_value = "2")]
        window: usize,
    },
    /// Load a snapshot directory and write it to Neo4j.
    Import {
        #[arg(long)]
        folder: PathBuf,
    },
    /// Write the loaded index (Neo4j by default) to a snapshot directory.
    Export {
        #[arg(long)]
        folder: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "webowl boot"
    );

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match &cli.command {
        Command::Modes => {
            for mode in SearchMode::ALL {
                println!("{:<11} {}", mode.as_str(), mode.description());
            }
        }
        Command::Import { folder } => {
            let snapshot = load_snapshot_dir(folder)
                .with_context(|| format!("reading snapshot from {}", folder.display()))?;
            let graph = neo4j(&cli)?;
            graph.upsert_snapshot(&snapshot).await?;
            println!(
                "{} chunks and {} edges imported at {}",
                snapshot.all_chunk_count(),
                snapshot.edge_count(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Export { folder } => {
            let snapshot = load_index(&cli).await?;
            let path = save_snapshot_dir(&snapshot, folder)
                .with_context(|| format!("writing snapshot to {}", folder.display()))?;
            println!(
                "{} chunks and {} edges exported to {}",
                snapshot.all_chunk_count(),
                snapshot.edge_count(),
                path.display()
            );
        }
        Command::History { session } => {
            let conversation = load_session(&cli.history_dir, session).await?;
            if conversation.is_empty() {
                println!("no turns recorded for {session}");
            }
            for turn in conversation.turns() {
                println!("[{}] Q: {}", turn.asked_at.to_rfc3339(), turn.query);
                println!("A: {}\n", turn.answer);
            }
        }
        Command::Forget { session } => {
            if forget_session(&cli.history_dir, session).await? {
                println!("forgot {session}");
            } else {
                println!("no conversation named {session}");
            }
        }
        Command::Stats => {
            let snapshot = load_index(&cli).await?;
            let summary = snapshot.site_summary();
            println!("pages:          {}", summary.total_pages);
            println!("chunks:         {}", summary.total_chunks);
            println!("entities:       {}", summary.total_entities);
            println!("edges:          {}", summary.total_edges);
            println!("max link depth: {}", summary.max_depth);
            println!("links per page: {:.2}", summary.avg_links_per_page);
            println!("entry pages:");
            for entry in &summary.entry_points {
                println!("  {entry}");
            }
        }
        Command::Context { chunk_id, window } => {
            let snapshot = load_index(&cli).await?;
            let context = snapshot.context_window(chunk_id, *window)?;
            println!(
                "[{}] {} ({})",
                context.chunk.chunk_id, context.chunk.source_url, context.chunk.content_type
            );
            println!("{}", context.chunk.text);
            for sibling in &context.siblings {
                println!("\n  sibling [{}] {}", sibling.chunk_id, sibling.text);
            }
            for page in &context.linked_pages {
                println!("\n  links to {} ({} chunks)", page.url, page.chunk_ids.len());
            }
        }
        Command::Search {
            query,
            mode,
            top_k,
            explain,
        } => {
            let mode: SearchMode = mode.parse()?;
            let snapshot = Arc::new(load_index(&cli).await?);
            let embedder = embedder(&cli, &snapshot);
            let search = SearchCoordinator::new(snapshot, embedder, config);
            let result = search
                .search(query, mode, *top_k, &CancellationToken::new())
                .await?;
            print_search(&result, *explain);
        }
        Command::Ask {
            query,
            mode,
            top_k,
            json,
            session,
        } => {
            let snapshot = Arc::new(load_index(&cli).await?);
            let embedder = embedder(&cli, &snapshot);
            if cli.completion_api_key.is_none() {
                warn!("no completion API key set; stages will fall back if the endpoint requires one");
            }
            let completion = Arc::new(
                ChatCompletionClient::new(
                    &cli.completion_url,
                    &cli.completion_model,
                    cli.completion_api_key.clone(),
                )
                .with_temperature(cli.completion_temperature),
            );
            let service = AnswerService::new(snapshot, embedder, completion, config);

            let result = match session {
                Some(session) => {
                    let mut conversation = load_session(&cli.history_dir, session).await?;
                    let result = service
                        .answer_query_in_conversation(query, mode, *top_k, &conversation)
                        .await?;
                    conversation.record_result(&result);
                    save_session(&cli.history_dir, session, &conversation).await?;
                    result
                }
                None => service.answer_query(query, mode, *top_k).await?,
            };

            if *json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_answer(&result);
            }
        }
    }

    Ok(())
}

fn session_path(dir: &Path, session: &str) -> anyhow::Result<PathBuf> {
    let valid = !session.is_empty()
        && session
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if !valid {
        anyhow::bail!("session names may only use letters, digits, '-' and '_': {session:?}");
    }
    Ok(dir.join(format!("{session}.json")))
}

async fn load_session(dir: &Path, session: &str) -> anyhow::Result<ConversationContext> {
    let path = session_path(dir, session)?;
    match tokio::fs::read_to_string(&path).await {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("reading conversation {}", path.display())),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(ConversationContext::new()),
        Err(error) => Err(error).with_context(|| format!("opening {}", path.display())),
    }
}

async fn save_session(
    dir: &Path,
    session: &str,
    conversation: &ConversationContext,
) -> anyhow::Result<()> {
    let path = session_path(dir, session)?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, serde_json::to_string_pretty(conversation)?)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

async fn forget_session(dir: &Path, session: &str) -> anyhow::Result<bool> {
    let path = session_path(dir, session)?;
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error).with_context(|| format!("removing {}", path.display())),
    }
}

fn neo4j(cli: &Cli) -> anyhow::Result<Neo4jStore> {
    Ok(Neo4jStore::new(
        &cli.neo4j_url,
        &cli.neo4j_db,
        &cli.neo4j_user,
        &cli.neo4j_password,
    )?)
}

async fn load_index(cli: &Cli) -> anyhow::Result<IndexSnapshot> {
    let snapshot = match &cli.snapshot_dir {
        Some(folder) => load_snapshot_dir(folder)
            .with_context(|| format!("reading snapshot from {}", folder.display()))?,
        None => neo4j(cli)?
            .load_snapshot()
            .await
            .with_context(|| format!("loading graph from {}", cli.neo4j_url))?,
    };
    if snapshot.all_chunk_count() == 0 {
        warn!("index is empty; queries will fail with EmptyIndex");
    }
    Ok(snapshot)
}

fn embedder(cli: &Cli, snapshot: &IndexSnapshot) -> Arc<dyn Embedder> {
    let dimensions = cli
        .embedding_dimensions
        .or(snapshot.dimensions())
        .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS);
    match &cli.embedding_url {
        Some(url) => Arc::new(OllamaEmbedder::new(url, &cli.embedding_model, dimensions)),
        None => Arc::new(CharacterNgramEmbedder { dimensions }),
    }
}

fn print_search(result: &SearchResult, explain: bool) {
    println!("query: {} ({})", result.query, result.mode);
    let weights: Vec<String> = result
        .signal_weights
        .iter()
        .map(|(signal, weight)| format!("{signal}={weight:.2}"))
        .collect();
    println!("weights: {}", weights.join(" "));
    for failure in &result.unavailable_signals {
        println!("unavailable: {failure}");
    }

    for (rank, hit) in result.hits.iter().enumerate() {
        println!(
            "{}. [{}] score={:.4} {} ({})",
            rank + 1,
            hit.chunk.chunk_id,
            hit.fused_score,
            hit.chunk.source_url,
            hit.chunk.content_type
        );
        if explain {
            let show = |value: Option<f64>| {
                value.map_or_else(|| "-".to_string(), |score| format!("{score:.4}"))
            };
            println!(
                "   semantic={} graph={} modality_boost={}",
                show(hit.scores.semantic),
                show(hit.scores.graph),
                show(hit.scores.modality_boost)
            );
        }
        let preview: String = hit.chunk.text.chars().take(160).collect();
        println!("   {preview}");
    }
}

fn print_answer(result: &PipelineResult) {
    println!("{}\n", result.answer());
    println!("confidence: {:.2}", result.confidence);
    if !result.navigation_path.is_empty() {
        println!("path: {}", result.navigation_path.join(" > "));
    }
    if !result.sources_used.is_empty() {
        println!("sources: {}", result.sources_used.join(", "));
    }
    if !result.related_content.is_empty() {
        println!("related: {}", result.related_content.join(", "));
    }
    for step in &result.actionable_steps {
        println!("- {step}");
    }
    for suggestion in &result.follow_up_suggestions {
        println!("? {suggestion}");
    }
    if result.degraded {
        for degradation in &result.degradations {
            println!("degraded {}: {}", degradation.stage, degradation.reason);
        }
    }
    for failure in &result.unavailable_signals {
        println!("unavailable: {failure}");
    }
}
