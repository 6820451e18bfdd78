use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use gleaner::config::Config;
use gleaner::feed::{http_client, HttpItemSource, ItemSource};
use gleaner::registration::Registrar;
use gleaner::scheduler::{IngestionWorker, Scheduler};
use gleaner::storage::{Database, DatabaseError, Feed, FeedStore, Post};

/// Get the config directory path (~/.config/gleaner/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("gleaner"))
}

#[derive(Parser, Debug)]
#[command(name = "gleaner", version, about = "Polls RSS/Atom feeds and stores new posts")]
struct Args {
    /// Config file (default: ~/.config/gleaner/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll feeds until interrupted
    Run,
    /// Register a feed and check it once
    Add {
        url: String,
        /// ID of the registering user
        #[arg(long, default_value_t = 0)]
        owner: i64,
    },
    /// List registered feeds
    Feeds {
        #[arg(long)]
        json: bool,
    },
    /// List stored posts, newest first
    Posts {
        #[arg(long, conflicts_with = "owner")]
        feed: Option<i64>,
        #[arg(long)]
        owner: Option<i64>,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
}

/// What `run` and `add` need on top of the database
struct Services {
    config: Config,
    db: Database,
    store: Arc<dyn FeedStore>,
    source: Arc<dyn ItemSource>,
    scheduler: Scheduler,
}

impl Services {
    fn build(config: Config, db: Database) -> Result<Self> {
        let client = http_client(&config.user_agent).context("Failed to build HTTP client")?;
        let source: Arc<dyn ItemSource> =
            Arc::new(HttpItemSource::new(client).with_max_feed_size(config.max_feed_bytes));
        let store: Arc<dyn FeedStore> = Arc::new(db.clone());

        let worker = IngestionWorker::new(Arc::clone(&store), Arc::clone(&source))
            .with_fetch_timeout(config.fetch_timeout())
            .with_worker_timeout(config.worker_timeout());
        let scheduler = Scheduler::new(Arc::clone(&store), worker, config.scheduler_config());

        Ok(Self {
            config,
            db,
            store,
            source,
            scheduler,
        })
    }
}

async fn open_database(db_path: &Path) -> Result<Database> {
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(db_path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            anyhow::bail!(
                "Database {} is locked by another process. Close it and try again.",
                db_path.display()
            );
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

fn load_config(explicit: Option<&Path>, config_dir: &Path) -> Result<Config> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config_dir.join("config.toml"));

    let mut config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gleaner=info")),
        )
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config = load_config(args.config.as_deref(), &config_dir)?;

    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => {
            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)
                    .context("Failed to create config directory")?;
            }
            config_dir.join("gleaner.db")
        }
    };

    let db = open_database(&db_path).await?;
    execute(args.command, config, db).await
}

/// Listing commands only read the database; the HTTP client and scheduler
/// are built for the commands that fetch.
async fn execute(command: Command, config: Config, db: Database) -> Result<()> {
    match command {
        Command::Run => run(Services::build(config, db)?).await,
        Command::Add { url, owner } => add(Services::build(config, db)?, &url, owner).await,
        Command::Feeds { json } => {
            let feeds = db.list_feeds().await.context("Failed to list feeds")?;
            print_feeds(&feeds, json)
        }
        Command::Posts {
            feed,
            owner,
            offset,
            limit,
            json,
        } => {
            let posts = match (feed, owner) {
                (Some(feed_id), _) => db.get_posts_for_feed(feed_id, offset, limit).await,
                (None, Some(owner_id)) => db.get_posts_for_owner(owner_id, offset, limit).await,
                (None, None) => anyhow::bail!("Specify --feed ID or --owner ID"),
            }
            .context("Failed to list posts")?;
            print_posts(&posts, json)
        }
    }
}

async fn run(services: Services) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = services.scheduler.start(shutdown_rx);

    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let state = handle.subscribe();
    handle.stopped().await.context("Scheduler task failed")?;
    tracing::debug!(state = ?*state.borrow(), "Scheduler task exited");
    println!("Stopped.");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn add(services: Services, url: &str, owner: i64) -> Result<()> {
    let registrar = Registrar::new(
        Arc::clone(&services.store),
        Arc::clone(&services.source),
        services.scheduler.clone(),
        services.config.registration_timeout(),
    );

    let registration = registrar.register(url, owner).await?;
    println!(
        "Added feed {}: {} ({})",
        registration.feed.id, registration.feed.title, registration.feed.url
    );

    // The process exits after this command, so wait for the first check here
    registration
        .first_check
        .await
        .context("First check of the new feed panicked")?;
    let posts = services
        .db
        .count_posts_for_feed(registration.feed.id)
        .await
        .context("Failed to count posts")?;
    println!("Stored {} posts.", posts);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn format_millis(millis: Option<i64>, fmt: &str) -> Option<String> {
    millis
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|dt| dt.format(fmt).to_string())
}

fn print_feeds(feeds: &[Feed], json: bool) -> Result<()> {
    if json {
        return print_json(&feeds);
    }
    if feeds.is_empty() {
        println!("No feeds registered. Add one with: gleaner add <URL>");
        return Ok(());
    }
    for feed in feeds {
        let checked = format_millis(feed.last_fetched_at, "%Y-%m-%d %H:%M")
            .unwrap_or_else(|| "never".to_string());
        print!("{:>5}  {}  {}  (checked: {})", feed.id, feed.title, feed.url, checked);
        match &feed.last_error {
            Some(err) => println!("  [{} failures: {}]", feed.consecutive_failures, err),
            None => println!(),
        }
    }
    Ok(())
}

fn print_posts(posts: &[Post], json: bool) -> Result<()> {
    if json {
        return print_json(&posts);
    }
    for post in posts {
        let date = format_millis(post.publish_date, "%Y-%m-%d")
            .unwrap_or_else(|| "----------".to_string());
        println!("{}  {}  {}", date, post.title, post.url);
    }
    Ok(())
}
