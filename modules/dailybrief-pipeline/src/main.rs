use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAiCompatible;
use dailybrief_common::Config;
use dailybrief_fetch::sources::{
    AnthropicRedFetcher, ArxivFetcher, AtumBlogFetcher, BlogFetcher, DblpFetcher, GithubFetcher,
    HuggingfaceFetcher, HunyuanFetcher, KevFetcher, NvdFetcher, PwcFetcher, RssFetcher,
};
use dailybrief_fetch::{ContentProcessor, Fetcher, FetcherManager, GithubStateStore};
use dailybrief_pipeline::{
    Enricher, IdentitySelector, LarkClient, Messenger, PipelineDeps, PriorityScorer, Scheduler,
    TieredPusher,
};
use dailybrief_qa::{EmbeddingClient, KnowledgeBase, SnapshotIndex};
use dailybrief_store::{ArticleStore, CheckpointManager};

#[derive(Parser)]
#[command(name = "dailybrief", about = "Daily article aggregation pipeline")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline on the daily schedule (or once with --once).
    Run {
        #[arg(long)]
        once: bool,
    },
    /// Report per-source article counts, enrichment coverage and push rate.
    Evaluate,
    /// Show the current fetch/process checkpoint state.
    CheckpointStatus,
    /// Remove both checkpoint files.
    ClearCheckpoint,
    /// Rebuild the vector index from every stored article.
    InitKb,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("dailybrief=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(Some(cli.config.as_path()))?;
    config.log_redacted();

    match cli.command {
        Command::Run { once } => {
            let deps = build_deps(&config).await?;
            let scheduler = Scheduler::new(deps, &config.schedule.time, &config.schedule.timezone);
            if once {
                let stats = scheduler.run_once().await?;
                info!(?stats, "Run finished");
            } else {
                scheduler.run_daily().await?;
            }
        }
        Command::Evaluate => evaluate(&config).await?,
        Command::CheckpointStatus => {
            let manager = checkpoint_manager(&config);
            let status = manager.status();
            println!("fetch:   {}", status.fetch.as_deref().unwrap_or("(none)"));
            println!("process: {}", status.process.as_deref().unwrap_or("(none)"));
        }
        Command::ClearCheckpoint => {
            checkpoint_manager(&config).clear();
            println!("Checkpoints cleared");
        }
        Command::InitKb => init_kb(&config).await?,
    }

    Ok(())
}

fn checkpoint_manager(config: &Config) -> CheckpointManager {
    CheckpointManager::new(
        &config.checkpoint.dir,
        config.checkpoint.max_age_hours,
        config.checkpoint.save_interval,
    )
}

/// Wire the pipeline from config: store, checkpoints, fetchers, enricher,
/// scorer, pusher, messenger.
async fn build_deps(config: &Config) -> Result<PipelineDeps> {
    let store = ArticleStore::open(&config.store.path)
        .await
        .context("Failed to open article store")?;

    let checkpoints = config
        .checkpoint
        .enabled
        .then(|| Arc::new(checkpoint_manager(config)));

    let fetchers = &config.fetchers;
    let rss = fetchers
        .rss
        .enabled
        .then(|| Arc::new(RssFetcher::new(fetchers.rss.clone())));

    let mut manager = FetcherManager::new(fetchers.max_workers.unwrap_or(5));
    let registered: Vec<Arc<dyn Fetcher>> = vec![
        Arc::new(ArxivFetcher::new(fetchers.arxiv.clone())),
        Arc::new(DblpFetcher::new(fetchers.dblp.clone())),
        Arc::new(NvdFetcher::new(fetchers.nvd.clone())),
        Arc::new(KevFetcher::new(fetchers.kev.clone())),
        Arc::new(HuggingfaceFetcher::new(fetchers.huggingface.clone())),
        Arc::new(PwcFetcher::new(fetchers.pwc.clone())),
        Arc::new(BlogFetcher::new(fetchers.blogs.clone())),
        Arc::new(GithubFetcher::new(
            fetchers.github.clone(),
            GithubStateStore::new(&config.store.github_state_path),
        )),
        Arc::new(HunyuanFetcher::new(fetchers.hunyuan.clone())),
        Arc::new(AnthropicRedFetcher::new(fetchers.anthropic_red.clone())),
        Arc::new(AtumBlogFetcher::new(fetchers.atum_blog.clone())),
    ];
    manager.register_all(registered);

    let content = Some(Arc::new(ContentProcessor::new(
        &config.push.http_proxy,
        30,
        config.push.max_content_length,
    )));

    let enricher = (!config.ai.api_key.is_empty()).then(|| {
        let agent = OpenAiCompatible::with_timeout(
            &config.ai.api_key,
            &config.ai.model,
            Duration::from_secs(config.ai.timeout_secs),
        )
        .with_base_url(&config.ai.api_base);
        Arc::new(Enricher::new(Arc::new(agent)))
    });

    let scorer = Some(Arc::new(PriorityScorer::new(
        &config.push.source_weights,
        config.push.enable_ai_scoring,
        enricher.clone(),
    )));

    let messenger: Option<Arc<dyn Messenger>> = (!config.lark.app_id.is_empty()
        && config.push.enabled)
        .then(|| Arc::new(LarkClient::new(&config.lark)) as Arc<dyn Messenger>);

    Ok(PipelineDeps {
        store,
        checkpoints,
        rss,
        manager,
        content,
        enricher,
        scorer,
        selector: Arc::new(IdentitySelector),
        pusher: TieredPusher::new(
            config.push.batch_size,
            config.push.high_threshold,
            config.push.mid_threshold,
        ),
        messenger,
        chat_id: config.lark.chat_id.clone(),
        process_workers: 10,
    })
}

/// Subscription-source quality report from the store.
async fn evaluate(config: &Config) -> Result<()> {
    let store = ArticleStore::open(&config.store.path).await?;
    let stats = store.source_stats().await?;

    println!("{:<16} {:>8} {:>10} {:>8}", "source", "total", "enriched", "pushed");
    for stat in &stats {
        println!(
            "{:<16} {:>8} {:>9.0}% {:>7.0}%",
            stat.source_type,
            stat.total,
            percentage(stat.enriched, stat.total),
            percentage(stat.pushed, stat.total),
        );
    }
    if stats.is_empty() {
        println!("(store is empty)");
    }
    Ok(())
}

fn percentage(part: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

/// Rebuild the vector collection from every article in the store.
async fn init_kb(config: &Config) -> Result<()> {
    let qa = &config.knowledge_qa;
    let store = ArticleStore::open(&config.store.path).await?;
    let index = Arc::new(SnapshotIndex::open(&qa.vector.path, &qa.vector.collection_name)?);
    let embedder = Arc::new(EmbeddingClient::new(&qa.embedding));
    let kb = KnowledgeBase::new(index, embedder, &qa.chunking)?;

    kb.rebuild().await?;
    let articles = store.all_articles().await?;
    info!(articles = articles.len(), "Rebuilding knowledge base");
    let chunks = kb.add_articles(&articles).await?;
    println!("Indexed {chunks} chunks from {} articles", articles.len());
    Ok(())
}
