use anyhow::Context;
use clap::{Parser, Subcommand};
use hindsight::config::{self, HindsightConfig};
use hindsight::index::{build, update, MemoryPaths};
use hindsight::refresh::{self, HookOutcome, RefreshController, RefreshTiming, UpdateFn};
use hindsight::search::{Engine, SearchOptions};
use hindsight::{hook, usage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hindsight", version, about = "Search your past agent conversations")]
struct Cli {
    /// Custom memory directory (index files, usage log)
    #[arg(long, global = true)]
    memory_dir: Option<PathBuf>,

    /// Custom sessions directory (transcripts)
    #[arg(long, global = true)]
    sessions_dir: Option<PathBuf>,

    /// Path to config file (default: ~/.hindsight/hindsight.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the inverted index and session summaries from scratch
    Build,

    /// Incrementally index new messages from one session transcript
    Update {
        /// Session identifier
        session_id: String,

        /// Path to the session transcript (.jsonl)
        transcript: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search past conversations
    Search {
        /// Search query
        query: Vec<String>,

        /// Maximum number of results
        #[arg(long)]
        max_results: Option<usize>,

        /// Don't auto-build a missing or stale index
        #[arg(long)]
        no_auto_index: bool,

        /// Skip the coarse filter tier
        #[arg(long)]
        legacy: bool,

        /// Don't record this search in the usage log
        #[arg(long)]
        no_log: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Handle a transcript-update event from the host process
    Hook {
        /// Event type (session:transcript:update)
        #[arg(long, short)]
        event: String,

        /// Session identifier
        #[arg(long, short)]
        session_id: Option<String>,

        /// Path to the session transcript
        #[arg(long, short)]
        file_path: Option<PathBuf>,

        /// JSON payload (alternative to the individual flags)
        #[arg(long, short)]
        payload: Option<String>,

        /// Execute immediately, bypassing the cooldown
        #[arg(long, short)]
        immediate: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Watch the sessions directory and keep the index fresh
    Watch {
        /// Poll interval in seconds
        #[arg(long, default_value = "2")]
        interval: u64,
    },

    /// Show usage-log statistics
    Stats,

    /// Write a default config file to ~/.hindsight/hindsight.toml
    Init,
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("hindsight: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Init => run_init(),
        Commands::Build => run_build(&cli, &cfg),
        Commands::Update {
            ref session_id,
            ref transcript,
            json,
        } => run_update(&cli, &cfg, session_id, transcript, json),
        Commands::Search {
            ref query,
            max_results,
            no_auto_index,
            legacy,
            no_log,
            json,
        } => run_search(&cli, &cfg, query, max_results, no_auto_index, legacy, no_log, json),
        Commands::Hook {
            ref event,
            ref session_id,
            ref file_path,
            ref payload,
            immediate,
            json,
        } => run_hook(&cli, &cfg, event, session_id, file_path, payload, immediate, json),
        Commands::Watch { interval } => run_watch(&cli, &cfg, interval),
        Commands::Stats => run_stats(&cli, &cfg),
    }
}

/// Tracing goes up as early as possible, but after the config load: the
/// config supplies the default filter, and `RUST_LOG` overrides it.
fn init_tracing(cfg: &HindsightConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.resolved_log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

const CONFIG_TEMPLATE: &str = r#"# hindsight configuration
# memory_dir = "~/.hindsight"
# sessions_dir = "~/.hindsight/sessions"
# log_level = "info"

[index]
# lock_timeout_secs = 30

[search]
# max_results = 10
# recent_session_limit = 30
# stale_after_secs = 7200

[refresh]
# debounce_secs = 5
# cooldown_secs = 30
# queue_capacity = 100
# indexer_timeout_secs = 60
"#;

fn run_init() -> anyhow::Result<()> {
    let path = config::default_config_path();
    anyhow::ensure!(
        !path.exists(),
        "config file already exists: {}",
        path.display()
    );

    let parent = path
        .parent()
        .context("config path has no parent directory")?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating {}", parent.display()))?;
    std::fs::write(&path, CONFIG_TEMPLATE)
        .with_context(|| format!("writing {}", path.display()))?;

    println!("wrote default config to {}", path.display());
    Ok(())
}

fn resolve_memory_paths(cli: &Cli, cfg: &HindsightConfig) -> MemoryPaths {
    MemoryPaths::new(
        cli.memory_dir
            .clone()
            .unwrap_or_else(|| cfg.resolved_memory_dir()),
    )
}

fn resolve_sessions_dir(cli: &Cli, cfg: &HindsightConfig) -> PathBuf {
    cli.sessions_dir
        .clone()
        .unwrap_or_else(|| cfg.resolved_sessions_dir())
}

fn lock_timeout(cfg: &HindsightConfig) -> Duration {
    Duration::from_secs(cfg.index.lock_timeout_secs)
}

fn run_build(cli: &Cli, cfg: &HindsightConfig) -> anyhow::Result<()> {
    let paths = resolve_memory_paths(cli, cfg);
    let sessions_dir = resolve_sessions_dir(cli, cfg);

    let report = build::build_index(&sessions_dir, &paths, lock_timeout(cfg))
        .context("index build failed")?;
    print!("{report}");
    Ok(())
}

fn run_update(
    cli: &Cli,
    cfg: &HindsightConfig,
    session_id: &str,
    transcript: &Path,
    json: bool,
) -> anyhow::Result<()> {
    let paths = resolve_memory_paths(cli, cfg);

    let outcome = update::update_index(&paths, session_id, transcript, lock_timeout(cfg))
        .with_context(|| format!("updating session {session_id}"))?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "session_id": outcome.session_id,
                "messages_added": outcome.messages_added,
                "postings_added": outcome.postings_added,
                "new_terms": outcome.new_terms,
                "last_msg_idx": outcome.last_msg_idx,
                "time_ms": outcome.time_ms,
                "per_message_ms": outcome.per_message_ms(),
            })
        );
    } else if outcome.messages_added > 0 {
        println!(
            "indexed {} messages ({} postings) in {:.1}ms ({:.2}ms/msg)",
            outcome.messages_added,
            outcome.postings_added,
            outcome.time_ms,
            outcome.per_message_ms()
        );
    } else {
        println!("no new messages for {session_id}");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_search(
    cli: &Cli,
    cfg: &HindsightConfig,
    query_words: &[String],
    max_results: Option<usize>,
    no_auto_index: bool,
    legacy: bool,
    no_log: bool,
    json: bool,
) -> anyhow::Result<()> {
    let query = query_words.join(" ");
    anyhow::ensure!(!query.trim().is_empty(), "usage: hindsight search <query>");

    let mut search_cfg = cfg.search.clone();
    if let Some(n) = max_results {
        search_cfg.max_results = n;
    }
    let paths = resolve_memory_paths(cli, cfg);
    let engine = Engine::with_paths(
        paths,
        resolve_sessions_dir(cli, cfg),
        search_cfg,
        lock_timeout(cfg),
    );

    let opts = SearchOptions {
        max_results,
        use_three_tier: !legacy,
        auto_index: !no_auto_index,
        ..SearchOptions::default()
    };
    let result = engine.search(&query, &opts);

    if !no_log {
        if let Err(e) = usage::log_usage(
            &engine.paths().usage_log(),
            &query,
            result.results.len(),
            result.sessions_searched,
            result.exact_phrase_count(),
        ) {
            tracing::warn!("failed to log usage: {e}");
        }
    }

    if json {
        let out =
            serde_json::to_string_pretty(&result).context("serializing search result")?;
        println!("{out}");
        return Ok(());
    }

    if let Some(issue) = &result.error {
        // A degraded query with results is worth showing; a dead one isn't
        anyhow::ensure!(
            !result.results.is_empty(),
            "search failed ({}): {}",
            issue.kind,
            issue.message
        );
        eprintln!("warning ({}): {}", issue.kind, issue.message);
    }

    println!(
        "searched {}/{} sessions via {:?} in {:.1}ms",
        result.sessions_searched,
        result.sessions_total,
        result.search_path,
        result.total_time_ms
    );
    if let Some(t) = &result.temporal {
        println!("time filter: {} ({} to {})", t.matched, t.start, t.end);
    }
    if result.results.is_empty() {
        println!("no matches found");
        return Ok(());
    }
    for row in &result.results {
        let marker = if row.exact_phrase { " *" } else { "" };
        println!("----------------------------------------------------------------");
        println!(
            "[{}] {} (score {:.1}){}",
            row.date, row.role, row.match_score, marker
        );
        println!("{}", row.text_snippet);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_hook(
    cli: &Cli,
    cfg: &HindsightConfig,
    event: &str,
    session_id: &Option<String>,
    file_path: &Option<PathBuf>,
    payload: &Option<String>,
    immediate: bool,
    json: bool,
) -> anyhow::Result<()> {
    let paths = resolve_memory_paths(cli, cfg);
    let timing = RefreshTiming::from(&cfg.refresh);

    let payload_value = match payload {
        Some(raw) => serde_json::from_str(raw).context("invalid JSON payload")?,
        None => serde_json::json!({
            "session_id": session_id.clone().unwrap_or_default(),
            "file_path": file_path.clone().unwrap_or_default(),
            "immediate": immediate,
        }),
    };

    match hook::handle_event(&paths, &timing, lock_timeout(cfg), event, &payload_value) {
        Ok(outcome) => {
            let (status, detail) = match &outcome {
                HookOutcome::Updated(o) => (
                    "updated",
                    format!("{} messages, {} postings", o.messages_added, o.postings_added),
                ),
                HookOutcome::NoNewMessages(_) => ("no_new_messages", String::new()),
                HookOutcome::Cooldown { session_id } => {
                    ("cooldown", format!("session {session_id}"))
                }
            };
            if json {
                println!("{}", serde_json::json!({"status": status, "detail": detail}));
            } else if detail.is_empty() {
                println!("{status}");
            } else {
                println!("{status}: {detail}");
            }
            Ok(())
        }
        Err(e) => {
            if json {
                // Hook consumers parse stdout even on failure
                println!(
                    "{}",
                    serde_json::json!({"status": "error", "kind": e.kind(), "error": e.to_string()})
                );
            }
            Err(e.into())
        }
    }
}

fn run_watch(cli: &Cli, cfg: &HindsightConfig, interval_secs: u64) -> anyhow::Result<()> {
    let paths = resolve_memory_paths(cli, cfg);
    let sessions_dir = resolve_sessions_dir(cli, cfg);
    let timing = RefreshTiming::from(&cfg.refresh);
    let timeout = lock_timeout(cfg);

    let rt = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    rt.block_on(watch_loop(paths, sessions_dir, timing, timeout, interval_secs))
}

async fn watch_loop(
    paths: MemoryPaths,
    sessions_dir: PathBuf,
    timing: RefreshTiming,
    timeout: Duration,
    interval_secs: u64,
) -> anyhow::Result<()> {
    let update_paths = paths.clone();
    let update: UpdateFn = Arc::new(move |session_id, path| {
        update::update_index(&update_paths, session_id, path, timeout).map(|_| ())
    });
    let controller = RefreshController::spawn(timing.clone(), update);

    tracing::info!(
        "watching {} (poll every {interval_secs}s)",
        sessions_dir.display()
    );

    let mut known_mtimes: std::collections::HashMap<PathBuf, std::time::SystemTime> =
        std::collections::HashMap::new();
    loop {
        match build::transcript_files(&sessions_dir) {
            Ok(files) => {
                for file in files {
                    let Ok(mtime) = std::fs::metadata(&file).and_then(|m| m.modified()) else {
                        continue;
                    };
                    let changed = known_mtimes
                        .get(&file)
                        .map(|prev| *prev < mtime)
                        .unwrap_or(true);
                    if changed {
                        known_mtimes.insert(file.clone(), mtime);
                        let session_id = file
                            .file_stem()
                            .map(|s| s.to_string_lossy().to_string())
                            .unwrap_or_default();
                        if let Err(e) = controller.on_transcript_update(&session_id, &file, false)
                        {
                            tracing::warn!("failed to queue update: {e}");
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("scan failed: {e}"),
        }

        // Session summaries refresh on the same debounce/cooldown rules
        if let Err(e) = refresh::poll_sessions_dir(&paths, &sessions_dir, &timing) {
            tracing::warn!("summary refresh failed: {e}");
        }

        tokio::time::sleep(Duration::from_secs(interval_secs)).await;
    }
}

fn run_stats(cli: &Cli, cfg: &HindsightConfig) -> anyhow::Result<()> {
    let stats = usage::read_stats(&resolve_memory_paths(cli, cfg).usage_log())
        .context("reading usage stats")?;
    print!("{stats}");
    Ok(())
}
