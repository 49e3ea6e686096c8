use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, anyhow, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use volley_sync::config::{self, AppConfig};
use volley_sync::league::api::LeagueApi;
use volley_sync::league::cache::Cache;
use volley_sync::league::client::HttpLeagueApi;
use volley_sync::league::date::parse_time;
use volley_sync::league::store::CacheRepository;
use volley_sync::logging;
use volley_sync::render::aggregate::{Partition, aggregate_matches};
use volley_sync::render::calendar::{CalendarOptions, CalendarScope, calendar_for_matches};
use volley_sync::render::feed::{FeedFormat, FeedItem, FeedMeta, generate_feed};
use volley_sync::render::ranking::ranking_tables;
use volley_sync::render::{Document, resolve_teams};
use volley_sync::sync::{SyncOptions, SyncScheduler, TriggerOutcome};

#[derive(Parser)]
#[command(name = "volley-sync")]
#[command(version, about = "Volleyball league sync with calendar and news feed generation")]
struct Cli {
    /// Config file, defaults to config.json in the data directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync now
    Sync {
        /// Only sync these teams (uuid, id or slug), including inactive ones
        #[arg(long = "team")]
        teams: Vec<String>,
    },
    /// Sync once a day until interrupted
    Daemon {
        /// Also run right away instead of waiting for the first slot
        #[arg(long)]
        now: bool,
    },
    /// Write an iCalendar document for the club or selected teams
    Calendar {
        #[arg(long = "team")]
        teams: Vec<String>,
        #[arg(long, conflicts_with = "future")]
        past: bool,
        #[arg(long)]
        future: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print ranking tables as JSON
    Rankings {
        #[arg(long = "team")]
        teams: Vec<String>,
    },
    /// Print cached seasons as JSON
    Seasons,
    /// Render news items (JSON array) as a feed
    Feed {
        #[arg(long)]
        items: PathBuf,
        #[arg(long, default_value = "rss")]
        format: FeedFormat,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

struct Context {
    config: AppConfig,
    cache: Arc<Cache>,
}

impl Context {
    fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = config_path.unwrap_or_else(config::config_path);
        let config = AppConfig::load(&config_path)?;
        let cache = Cache::new(&config::db_path()).context("Failed to open cache database")?;
        Ok(Self {
            config,
            cache: Arc::new(cache),
        })
    }

    fn club_id(&self) -> anyhow::Result<&str> {
        match self.config.club.id.as_str() {
            "" => bail!("club.id is not configured"),
            id => Ok(id),
        }
    }

    fn api(&self) -> anyhow::Result<Arc<dyn LeagueApi>> {
        let api = &self.config.api;
        let client = HttpLeagueApi::new(
            &api.base_url,
            &api.api_key,
            Duration::from_millis(api.timeout_ms),
        )
        .with_context(|| format!("Invalid api.baseUrl {:?}", api.base_url))?;
        Ok(Arc::new(client))
    }

    fn sync_options(&self) -> SyncOptions {
        SyncOptions::from_config(
            &self.config.sync,
            Duration::from_millis(self.config.api.timeout_ms),
        )
    }

    fn scheduler(&self) -> anyhow::Result<SyncScheduler<Cache>> {
        Ok(SyncScheduler::new(
            Arc::clone(&self.cache),
            self.api()?,
            self.club_id()?,
            self.sync_options(),
            self.config.sync.min_interval_ms,
            self.config.sync.lease_timeout_ms,
        ))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&config::data_dir(), "info")?;
    let ctx = Context::load(cli.config)?;

    match cli.command {
        Command::Sync { teams } => runtime()?.block_on(run_sync(&ctx, &teams)),
        Command::Daemon { now } => runtime()?.block_on(run_daemon(&ctx, now)),
        Command::Calendar {
            teams,
            past,
            future,
            output,
        } => {
            let partition = match (past, future) {
                (true, _) => Some(Partition::Past),
                (_, true) => Some(Partition::Future),
                _ => None,
            };
            write_calendar(&ctx, &teams, partition, output)
        }
        Command::Rankings { teams } => print_rankings(&ctx, &teams),
        Command::Seasons => print_json(&ctx.cache.seasons()?),
        Command::Feed {
            items,
            format,
            output,
        } => write_feed(&ctx, items, format, output),
    }
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

async fn run_sync(ctx: &Context, teams: &[String]) -> anyhow::Result<()> {
    let scheduler = ctx.scheduler()?;
    let outcome = if teams.is_empty() {
        scheduler.trigger().await?
    } else {
        scheduler.trigger_teams(teams).await?
    };

    match outcome {
        TriggerOutcome::Completed(report) if !report.failed.is_empty() => {
            bail!("{} series failed to sync", report.failed.len())
        }
        TriggerOutcome::Completed(_) => Ok(()),
        TriggerOutcome::SkippedInFlight => {
            info!("Another sync is running, nothing to do");
            Ok(())
        }
        TriggerOutcome::SkippedTooSoon { next_allowed } => {
            info!("Last sync is too recent, next run allowed at {}", next_allowed);
            Ok(())
        }
    }
}

async fn run_daemon(ctx: &Context, run_now: bool) -> anyhow::Result<()> {
    let daily_at = parse_time(&ctx.config.sync.daily_at)
        .ok_or_else(|| anyhow!("Invalid sync.dailyAt {:?}", ctx.config.sync.daily_at))?;
    let scheduler = ctx.scheduler()?;

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    };
    scheduler.run_daily(daily_at, run_now, shutdown).await;
    Ok(())
}

fn write_calendar(
    ctx: &Context,
    keys: &[String],
    partition: Option<Partition>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let teams = resolve_teams(&*ctx.cache, ctx.club_id()?, keys)?;
    let scope = match teams.as_slice() {
        [team] if !keys.is_empty() => CalendarScope::team(team),
        _ => {
            let club_name = teams
                .first()
                .map_or(ctx.config.club.id.as_str(), |t| t.club_name.as_str());
            CalendarScope::all_matches(club_name)
        }
    };

    let uuids: Vec<String> = teams.into_iter().map(|t| t.uuid).collect();
    let view = aggregate_matches(&*ctx.cache, &uuids, partition)?;
    info!(
        "Calendar {}: {} past, {} upcoming matches",
        scope.key,
        view.past.len(),
        view.future.len()
    );

    let options = CalendarOptions::from_config(&ctx.config.calendar);
    let doc = calendar_for_matches(&scope, &view, &options, Utc::now());
    write_document(&doc, output)
}

fn print_rankings(ctx: &Context, keys: &[String]) -> anyhow::Result<()> {
    let teams = resolve_teams(&*ctx.cache, ctx.club_id()?, keys)?;
    let uuids: Vec<String> = teams.into_iter().map(|t| t.uuid).collect();
    print_json(&ranking_tables(&*ctx.cache, &uuids)?)
}

fn write_feed(
    ctx: &Context,
    items: PathBuf,
    format: FeedFormat,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&items)
        .with_context(|| format!("Failed to read {}", items.display()))?;
    let items: Vec<FeedItem> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid feed items in {}", items.display()))?;

    let meta = FeedMeta::from_config(&ctx.config.feed)
        .with_context(|| format!("Invalid feed.baseUrl {:?}", ctx.config.feed.base_url))?;
    let doc = generate_feed(&meta, &items, format, Utc::now())?;
    write_document(&doc, output)
}

/// Write the body to `output`, or stdout when no path is given
fn write_document(doc: &Document, output: Option<PathBuf>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(&path, &doc.body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} ({})", path.display(), doc.content_type);
        }
        None => std::io::stdout().write_all(doc.body.as_bytes())?,
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
