//! Subcommand handlers.

use anyhow::{Context as _, bail};
use dossier_core::AppConfig;
use dossier_core::config::{PlannerKind, config_search_paths, data_dir, load_config};
use dossier_core::embeddings::{Embedder, create_embedder};
use dossier_core::providers::create_provider;
use dossier_core::research::{
    BriefStore, CachingFetcher, ContentCache, EmbeddingRanker, EngineLimits, HeuristicPlanner,
    LlmPlanner, LlmSynthesizer, MemoryContentCache, OutputFormat, Planner, ResearchConfig,
    ResearchEngine, ResearchObserver, ResearchStage, SqliteContentCache, create_search_provider,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::render;
use crate::{BriefsAction, CacheAction, Commands, ConfigAction, ResearchArgs};

/// Settings shared by every subcommand.
pub struct Context {
    pub workspace: PathBuf,
    pub config_path: Option<PathBuf>,
    pub quiet: bool,
}

impl Context {
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let config = load_config(Some(&self.workspace), self.config_path.as_deref())
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, ctx: &Context) -> anyhow::Result<()> {
    match command {
        Commands::Research(args) => handle_research(args, ctx).await,
        Commands::Briefs { action } => handle_briefs(action, ctx),
        Commands::Cache { action } => handle_cache(action, ctx).await,
        Commands::Config { action } => handle_config(action, ctx),
    }
}

/// Merge command-line overrides into the configured run parameters.
fn run_config(args: &ResearchArgs, config: &AppConfig) -> anyhow::Result<ResearchConfig> {
    let mut run = ResearchConfig::from_app_config(config)?;
    if let Some(n) = args.max_sources {
        run.max_sources = n;
    }
    if let Some(since) = &args.since {
        run.since = Some(since.parse()?);
    }
    if let Some(model) = &args.model {
        run.model = model.clone();
    }
    if let Some(search) = &args.search {
        run.search_backend = search.parse()?;
    }
    if let Some(format) = &args.format {
        run.output_format = format.parse()?;
    }
    run.use_js = args.js;
    run.refresh = args.refresh;
    run.validate()?;
    Ok(run)
}

fn open_cache(config: &AppConfig) -> anyhow::Result<Arc<dyn ContentCache>> {
    if config.cache.in_memory {
        return Ok(Arc::new(MemoryContentCache::new()));
    }
    let path = config.cache_path();
    let cache = SqliteContentCache::open(&path)
        .with_context(|| format!("Failed to open content cache at {}", path.display()))?;
    Ok(Arc::new(cache))
}

/// Wire the engine's collaborators from configuration.
async fn build_engine(
    config: &AppConfig,
    run: &ResearchConfig,
    quiet: bool,
) -> anyhow::Result<ResearchEngine> {
    let search = create_search_provider(run.search_backend, &config.search)
        .with_context(|| format!("Failed to set up the {} search backend", run.search_backend))?;

    #[allow(unused_mut)]
    let mut fetcher = CachingFetcher::from_config(open_cache(config)?, &config.fetch)?;
    #[cfg(feature = "browser")]
    if run.use_js {
        match dossier_core::research::fetch::BrowserPageLoader::launch(&config.fetch).await {
            Ok(browser) => fetcher = fetcher.with_renderer(Arc::new(browser)),
            Err(e) => tracing::warn!(error = %e, "Headless browser unavailable; using plain HTTP"),
        }
    }
    #[cfg(not(feature = "browser"))]
    if run.use_js {
        tracing::warn!("Built without the `browser` feature; --js has no effect");
    }

    let llm = create_provider(&config.llm).context("Failed to set up the generation provider")?;
    let model = Some(run.model.clone());

    let planner: Arc<dyn Planner> = match config.research.planner {
        PlannerKind::Llm => Arc::new(
            LlmPlanner::new(llm.clone())
                .with_max_sub_queries(config.research.max_sub_queries)
                .with_model(model.clone())
                .with_temperature(config.llm.temperature),
        ),
        PlannerKind::Heuristic => Arc::new(
            HeuristicPlanner::new().with_max_sub_queries(config.research.max_sub_queries),
        ),
    };

    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embeddings)?);
    let ranker = EmbeddingRanker::new(embedder).with_max_embed_chars(config.research.max_embed_chars);

    let synthesizer = LlmSynthesizer::new(llm)
        .with_model(model)
        .with_max_excerpt_chars(config.research.max_excerpt_chars)
        .with_max_tokens(config.llm.max_tokens)
        .with_temperature(config.llm.temperature);

    Ok(ResearchEngine::new(
        planner,
        search,
        Arc::new(fetcher),
        Arc::new(ranker),
        Arc::new(synthesizer),
    )
    .with_limits(EngineLimits {
        search_concurrency: config.search.concurrency,
        fetch_concurrency: config.fetch.concurrency,
    })
    .with_language(Some(config.search.language.clone()))
    .with_observer(Arc::new(ProgressObserver { quiet })))
}

async fn handle_research(args: ResearchArgs, ctx: &Context) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let run = run_config(&args, &config)?;
    let engine = build_engine(&config, &run, ctx.quiet).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            on_signal.cancel();
        }
    });

    let brief = engine
        .research(&args.topic, &run, &cancel)
        .await
        .context("Research failed")?;

    let rendered = render::render(&brief, run.output_format)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !ctx.quiet {
                eprintln!("Wrote brief to {}", path.display());
            }
        }
        None => println!("{}", rendered),
    }

    if !args.no_save {
        let store = BriefStore::new(config.briefs_dir());
        let path = store.save(&brief).context("Failed to save brief")?;
        if !ctx.quiet {
            eprintln!("Saved brief {} to {}", brief.id, path.display());
        }
    }
    Ok(())
}

fn handle_briefs(action: BriefsAction, ctx: &Context) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let store = BriefStore::new(config.briefs_dir());
    match action {
        BriefsAction::List => {
            let briefs = store.list().context("Failed to list briefs")?;
            if briefs.is_empty() {
                println!("No saved briefs in {}", store.dir().display());
                return Ok(());
            }
            for b in briefs {
                let id = b.id.to_string();
                println!(
                    "{}  {}  {:>3} sources  {}",
                    &id[..8],
                    b.generated_at.format("%Y-%m-%d %H:%M"),
                    b.source_count,
                    b.topic
                );
            }
            Ok(())
        }
        BriefsAction::Show { id, format } => {
            let Some(brief) = store.find(&id).context("Failed to read briefs")? else {
                bail!("No brief matches '{}'", id);
            };
            let format = match format {
                Some(f) => f.parse()?,
                None => OutputFormat::Markdown,
            };
            println!("{}", render::render(&brief, format)?);
            Ok(())
        }
    }
}

async fn handle_cache(action: CacheAction, ctx: &Context) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    match action {
        CacheAction::Prune { older_than_hours } => {
            let hours = older_than_hours.unwrap_or(config.fetch.freshness_hours);
            let cache = open_cache(&config)?;
            let removed = cache
                .prune_older_than(chrono::Duration::hours(hours as i64))
                .await
                .context("Failed to prune cache")?;
            println!("Removed {} cached page(s) older than {}h", removed, hours);
            Ok(())
        }
    }
}

fn handle_config(action: ConfigAction, ctx: &Context) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = ctx.load_config()?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Path => {
            let mut paths = config_search_paths(Some(&ctx.workspace));
            paths.extend(ctx.config_path.clone());
            for path in &paths {
                println!("{}  {}", marker(path), path.display());
            }
            let config = ctx.load_config()?;
            println!("data     {}", data_dir().display());
            println!("cache    {}", config.cache_path().display());
            println!("briefs   {}", config.briefs_dir().display());
            Ok(())
        }
    }
}

fn marker(path: &Path) -> &'static str {
    if path.exists() { "found  " } else { "missing" }
}

/// Prints stage progress to stderr.
struct ProgressObserver {
    quiet: bool,
}

impl ResearchObserver for ProgressObserver {
    fn on_stage(&self, stage: ResearchStage) {
        if self.quiet {
            return;
        }
        let label = match stage {
            ResearchStage::Planning => "Planning sub-queries",
            ResearchStage::Searching => "Searching",
            ResearchStage::Fetching => "Fetching sources",
            ResearchStage::Ranking => "Ranking by relevance",
            ResearchStage::Synthesizing => "Writing brief",
            ResearchStage::Complete => "Done",
        };
        eprintln!("> {}", label);
    }

    fn on_sub_queries(&self, queries: &[String]) {
        if self.quiet {
            return;
        }
        for q in queries {
            eprintln!("    - {}", q);
        }
    }

    fn on_search_failed(&self, query: &str, error: &str) {
        if !self.quiet {
            eprintln!("    search skipped for '{}': {}", query, error);
        }
    }

    fn on_fetch_failed(&self, url: &str, error: &str) {
        if !self.quiet {
            eprintln!("    skipped {}: {}", url, error);
        }
    }

    fn on_sources_ranked(&self, kept: usize, dropped: usize) {
        if !self.quiet {
            eprintln!("    kept {} source(s), dropped {} over budget", kept, dropped);
        }
    }
}
