use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nowfeed::analytics::{AnalyticsHelper, NoOpAnalyticsHelper, TracingAnalyticsHelper};
use nowfeed::config::Config;
use nowfeed::data::{
    ChangeSet, DarkThemeConfig, PreferenceStore, RecentSearchRepository, SearchContentsRepository,
    Synchronizer, ThemeBrand, TopicsRepository, UserContentItem, UserContentRepository,
    UserDataRepository,
};
use nowfeed::feature::{
    AppState, ManualNetworkMonitor, SearchResultUiState, SearchThresholds, SearchViewModel,
};
use nowfeed::storage::{ContentQuery, Database, DatabaseError};
use nowfeed::timezone::{SystemTimeZoneSource, TimeZoneMonitor, TimeZoneSource};

/// Get the config directory path (~/.config/nowfeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("nowfeed"))
}

#[derive(Parser, Debug)]
#[command(name = "nowfeed", about = "Offline-first news cache: sync, browse, bookmark and search")]
struct Args {
    /// Database file (default: from config, else ~/.config/nowfeed/nowfeed.db)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Config file (default: ~/.config/nowfeed/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Reset database (delete and recreate)
    #[arg(long, global = true)]
    reset_db: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply a change set (JSON) to the cache
    Sync { file: PathBuf },

    /// List content, newest first
    Feed {
        /// Only bookmarked content
        #[arg(long, conflicts_with = "followed")]
        bookmarked: bool,

        /// Only content from followed topics
        #[arg(long)]
        followed: bool,

        /// Only content tagged with this topic (repeatable)
        #[arg(long = "topic", value_name = "ID")]
        topics: Vec<String>,
    },

    /// List topics with their follow state
    Topics,

    /// Follow a topic
    Follow {
        id: String,
        /// Unfollow instead
        #[arg(long)]
        off: bool,
    },

    /// Bookmark a content item
    Bookmark {
        id: String,
        /// Remove the bookmark instead
        #[arg(long)]
        off: bool,
    },

    /// Mark a content item as viewed
    Viewed {
        id: String,
        /// Mark as not viewed instead
        #[arg(long)]
        off: bool,
    },

    /// Search topics and content, and remember the query
    Search { query: String },

    /// List recent search queries
    Recent,

    /// Forget all recent search queries
    ClearRecent,

    /// Show the system time zone
    Timezone {
        /// Keep running and print each change
        #[arg(long)]
        watch: bool,
    },

    /// Show or change display preferences
    Theme {
        #[command(subcommand)]
        setting: Option<ThemeSetting>,
    },
}

#[derive(Subcommand, Debug)]
enum ThemeSetting {
    /// Colour brand: default or android
    Brand { brand: ThemeBrand },
    /// Dark mode: follow-system, light or dark
    Dark { mode: DarkThemeConfig },
    /// Use dynamic colour
    DynamicColor {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
    /// Hide onboarding
    Onboarding {
        #[arg(action = ArgAction::Set)]
        hidden: bool,
    },
}

/// Everything a command may need, built once.
struct Services {
    config: Config,
    db: Database,
    preferences: Arc<PreferenceStore>,
    user_data: UserDataRepository,
    analytics: Arc<dyn AnalyticsHelper>,
}

impl Services {
    fn content(&self) -> UserContentRepository {
        UserContentRepository::new(self.db.clone(), self.user_data.clone())
    }

    fn topics(&self) -> TopicsRepository {
        TopicsRepository::new(self.db.clone(), self.user_data.clone())
    }

    fn recent_searches(&self) -> RecentSearchRepository {
        RecentSearchRepository::new(self.db.clone(), self.config.recent_search_limit)
    }

    fn search(&self) -> SearchContentsRepository {
        SearchContentsRepository::new(self.db.clone(), self.user_data.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    // User-only access on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args
        .db
        .clone()
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(|| config_dir.join("nowfeed.db"));

    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        eprintln!("Database reset.");
    }

    let services = open_services(config, &db_path).await?;
    let result = run(&args, &services).await;
    services.db.close().await;
    result
}

async fn open_services(config: Config, db_path: &Path) -> Result<Services> {
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of nowfeed appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let preferences = Arc::new(
        PreferenceStore::open(db.clone())
            .await
            .context("Failed to load preferences")?,
    );
    let analytics: Arc<dyn AnalyticsHelper> = if config.analytics_enabled {
        Arc::new(TracingAnalyticsHelper)
    } else {
        Arc::new(NoOpAnalyticsHelper)
    };
    let user_data = UserDataRepository::new(Arc::clone(&preferences), Arc::clone(&analytics));

    Ok(Services {
        config,
        db,
        preferences,
        user_data,
        analytics,
    })
}

async fn run(args: &Args, services: &Services) -> Result<()> {
    match &args.command {
        Command::Sync { file } => {
            let change_set = ChangeSet::load(file)
                .with_context(|| format!("Failed to read change set {}", file.display()))?;
            let report = Synchronizer::new(services.db.clone(), Arc::clone(&services.preferences))
                .apply(&change_set)
                .await
                .context("Failed to apply change set")?;
            if args.json {
                print_json(&report)?;
            } else {
                println!(
                    "Topics: {} upserted, {} deleted{}",
                    report.topics_upserted,
                    report.topics_deleted,
                    if report.topics_stale { " (stale, skipped)" } else { "" }
                );
                println!(
                    "Content: {} upserted, {} deleted{}",
                    report.content_upserted,
                    report.content_deleted,
                    if report.content_stale { " (stale, skipped)" } else { "" }
                );
                if report.links_skipped > 0 {
                    println!("Skipped {} links to unknown topics", report.links_skipped);
                }
                println!("Search index: {} entities", report.indexed_entities);
            }
        }

        Command::Feed {
            bookmarked,
            followed,
            topics,
        } => {
            let content = services.content();
            let mut stream = if *bookmarked {
                content.observe_all_bookmarked()
            } else if *followed {
                content.observe_all_for_followed_topics()
            } else if !topics.is_empty() {
                content.observe_all(ContentQuery::with_topic_ids(topics.iter()))
            } else {
                content.observe_all(ContentQuery::all())
            };
            let items = first(&mut stream).await?.context("Failed to load content")?;
            if args.json {
                print_json(&items)?;
            } else {
                print_content(&items);
            }
        }

        Command::Topics => {
            let mut stream = services.topics().observe_followable_topics();
            let topics = first(&mut stream).await?.context("Failed to load topics")?;
            if args.json {
                print_json(&topics)?;
            } else if topics.is_empty() {
                println!("No topics. Run `nowfeed sync <file>` first.");
            } else {
                for t in &topics {
                    let mark = if t.is_followed { "*" } else { " " };
                    println!("{mark} {:<24} {}", t.topic.id, t.topic.name);
                }
            }
        }

        Command::Follow { id, off } => {
            services
                .user_data
                .set_topic_id_followed(id, !off)
                .await
                .context("Failed to update follow")?;
            println!("{} {id}", if *off { "Unfollowed" } else { "Following" });
        }

        Command::Bookmark { id, off } => {
            services
                .user_data
                .set_content_bookmarked(id, !off)
                .await
                .context("Failed to update bookmark")?;
            println!("{} {id}", if *off { "Removed bookmark" } else { "Bookmarked" });
        }

        Command::Viewed { id, off } => {
            services
                .user_data
                .set_content_viewed(id, !off)
                .await
                .context("Failed to update viewed state")?;
            println!("Marked {id} as {}", if *off { "not viewed" } else { "viewed" });
        }

        Command::Search { query } => search(args, services, query).await?,

        Command::Recent => {
            let mut stream = services.recent_searches().observe_recent_search_queries();
            let queries = first(&mut stream)
                .await?
                .context("Failed to load recent searches")?;
            if args.json {
                print_json(&queries)?;
            } else {
                for q in &queries {
                    let when = chrono::DateTime::from_timestamp_millis(q.queried_date)
                        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    println!("{when}  {}", q.query);
                }
            }
        }

        Command::ClearRecent => {
            services
                .recent_searches()
                .clear_recent_searches()
                .await
                .context("Failed to clear recent searches")?;
            println!("Recent searches cleared.");
        }

        Command::Timezone { watch } => {
            let source = Arc::new(
                SystemTimeZoneSource::new(services.config.timezone_poll_interval()).await,
            );
            let system_default = source.system_default();
            let monitor = TimeZoneMonitor::new(source, services.config.share_grace());
            let app = AppState::new(
                Arc::new(ManualNetworkMonitor::new(true)),
                monitor,
                system_default,
                services.config.share_grace(),
            );

            let mut zones = app.current_time_zone();
            let zone = zones
                .next()
                .await
                .context("Time zone stream ended unexpectedly")?;
            println!("{zone}");

            if *watch {
                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        next = zones.next() => match next {
                            Some(zone) => println!("{zone}"),
                            None => break,
                        },
                    }
                }
            }
            app.close();
        }

        Command::Theme { setting } => {
            let user_data = &services.user_data;
            let updated = match setting {
                Some(ThemeSetting::Brand { brand }) => user_data.set_theme_brand(*brand).await,
                Some(ThemeSetting::Dark { mode }) => user_data.set_dark_theme_config(*mode).await,
                Some(ThemeSetting::DynamicColor { enabled }) => {
                    user_data.set_dynamic_color_preference(*enabled).await
                }
                Some(ThemeSetting::Onboarding { hidden }) => {
                    user_data.set_should_hide_onboarding(*hidden).await
                }
                None => Ok(()),
            };
            updated.context("Failed to update display preferences")?;

            let current = user_data.current();
            if args.json {
                print_json(&current)?;
            } else {
                println!("brand:          {}", current.theme_brand);
                println!("dark theme:     {}", current.dark_theme_config);
                println!("dynamic colour: {}", current.use_dynamic_color);
                println!("hide onboarding: {}", current.should_hide_onboarding);
            }
        }
    }

    Ok(())
}

async fn search(args: &Args, services: &Services, query: &str) -> Result<()> {
    let vm = SearchViewModel::new(
        services.search(),
        services.recent_searches(),
        services.user_data.clone(),
        Arc::clone(&services.analytics),
        SearchThresholds::from(&services.config),
        services.config.share_grace(),
    );
    vm.on_search_query_changed(query);
    vm.on_search_triggered(query)
        .await
        .context("Failed to record search")?;

    let mut states = vm.search_result_ui_state();
    let state = loop {
        match states.next().await {
            Some(SearchResultUiState::Loading) => continue,
            Some(state) => break state,
            None => anyhow::bail!("Search ended without a result"),
        }
    };
    vm.close();

    if args.json {
        return print_json(&state);
    }
    match state {
        SearchResultUiState::SearchNotReady => {
            println!("Search is not ready yet. Run `nowfeed sync <file>` first.")
        }
        SearchResultUiState::EmptyQuery => println!(
            "Query too short (minimum {} characters).",
            services.config.min_search_query_length
        ),
        SearchResultUiState::LoadFailed => anyhow::bail!("Search failed"),
        SearchResultUiState::Success { topics, content } => {
            if !topics.is_empty() {
                println!("Topics:");
                for t in &topics {
                    let mark = if t.is_followed { "*" } else { " " };
                    println!("{mark} {:<24} {}", t.topic.id, t.topic.name);
                }
            }
            if !content.is_empty() {
                println!("Content:");
                print_content(&content);
            }
            if topics.is_empty() && content.is_empty() {
                println!("No results.");
            }
        }
        SearchResultUiState::Loading => {}
    }
    Ok(())
}

/// The first value of a live stream.
async fn first<S, T>(stream: &mut S) -> Result<T>
where
    S: futures::Stream<Item = T> + Unpin,
{
    stream
        .next()
        .await
        .context("Stream ended before producing a value")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_content(items: &[UserContentItem]) {
    if items.is_empty() {
        println!("Nothing here.");
        return;
    }
    for item in items {
        let date = chrono::DateTime::from_timestamp(item.publish_date, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let flags = format!(
            "{}{}",
            if item.is_saved { "B" } else { " " },
            if item.has_been_viewed { " " } else { "N" }
        );
        println!("{flags} {date}  {:<20} {}", item.id, item.title);
    }
}
