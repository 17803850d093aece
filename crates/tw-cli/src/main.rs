//! TabWarden CLI
//!
//! CLI tool for validating engine configuration and replaying recorded
//! host event traces.

use std::fs;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};

use tw_config::{build_engine_config, BuildStats, ConfigSources};
use tw_core::services::{MemorySettings, Services};
use tw_core::{Engine, EngineConfig, EngineHandle, EngineMessage, EngineReply, HostEvent, Notice, Outcome, TabSnapshot};

#[derive(Parser)]
#[command(name = "tw-cli")]
#[command(about = "TabWarden configuration and event replay tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Privacy configuration JSON
    #[arg(short, long)]
    config: String,

    /// Tracker data set JSON
    #[arg(short, long)]
    trackers: Option<String>,

    /// HTTPS-upgradable hosts, one per line
    #[arg(long)]
    https_hosts: Option<String>,

    /// public_suffix_list.dat
    #[arg(long)]
    psl: Option<String>,

    /// Host mode: blocking or declarative
    #[arg(long)]
    host_mode: Option<String>,

    /// The host offers the topics permissions policy
    #[arg(long)]
    topics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the configuration sources and print what they contain
    Validate {
        #[command(flatten)]
        sources: SourceArgs,
    },

    /// Replay a JSON-lines host event trace through the engine
    Replay {
        #[command(flatten)]
        sources: SourceArgs,

        /// Trace file, one host event per line
        #[arg(short, long)]
        input: String,

        /// Settings JSON object; settings are treated as still loading without it
        #[arg(short, long)]
        settings: Option<String>,

        /// Print the final state of every tab
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { sources } => cmd_validate(&sources),
        Commands::Replay {
            sources,
            input,
            settings,
            verbose,
        } => cmd_replay(&sources, &input, settings.as_deref(), verbose),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn read_file(path: &str) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))
}

fn read_optional(path: Option<&str>) -> Result<Option<String>, String> {
    path.map(read_file).transpose()
}

fn compile(args: &SourceArgs) -> Result<(EngineConfig, BuildStats), String> {
    let privacy_config = read_file(&args.config)?;
    let tracker_data = read_optional(args.trackers.as_deref())?;
    let https_hosts = read_optional(args.https_hosts.as_deref())?;
    let public_suffix_list = read_optional(args.psl.as_deref())?;

    let sources = ConfigSources {
        privacy_config: &privacy_config,
        tracker_data: tracker_data.as_deref(),
        https_hosts: https_hosts.as_deref(),
        public_suffix_list: public_suffix_list.as_deref(),
        host_mode: args.host_mode.as_deref(),
        topics_available: args.topics,
    };
    build_engine_config(&sources).map_err(|e| format!("Invalid configuration: {}", e))
}

fn cmd_validate(args: &SourceArgs) -> Result<(), String> {
    let start = Instant::now();
    let (config, stats) = compile(args)?;
    let elapsed = start.elapsed();

    println!("Configuration '{}' is valid", args.config);
    println!("  Host mode:     {:?}", config.host_mode);
    println!("  Features:      {} enabled", stats.features_enabled);
    println!("  Exceptions:    {} (unprotected sites: {})", stats.exceptions, stats.unprotected);
    println!("  Trackers:      {} (entity domains: {})", stats.trackers, stats.entity_domains);
    println!("  Cookie excl.:  {}", stats.cookie_exclusions);
    println!("  Link formats:  {}", stats.link_formats);
    println!("  Upgrade hosts: {}", stats.upgrade_hosts);
    println!(
        "  Domains:       {} -> {} (deduped {}, invalid {})",
        stats.domains.before, stats.domains.after, stats.domains.deduped, stats.domains.invalid
    );
    println!("  Suffix list:   {}", if stats.has_suffix_list { "loaded" } else { "heuristic" });
    if !stats.unknown_features.is_empty() {
        println!("  Unknown:       {}", stats.unknown_features.join(", "));
    }
    println!("  Time:          {:.1}ms", elapsed.as_secs_f64() * 1000.0);

    Ok(())
}

fn cmd_replay(args: &SourceArgs, input: &str, settings: Option<&str>, verbose: bool) -> Result<(), String> {
    let (config, _stats) = compile(args)?;

    let settings = match settings {
        Some(path) => {
            let text = read_file(path)?;
            let values: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&text).map_err(|e| format!("Invalid settings '{}': {}", path, e))?;
            MemorySettings::with_values(values)
        }
        None => MemorySettings::not_ready(),
    };

    let trace = read_file(input)?;
    let mut events = Vec::new();
    for (index, line) in trace.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let event: HostEvent = serde_json::from_str(line)
            .map_err(|e| format!("{}:{}: invalid event: {}", input, index + 1, e))?;
        events.push(event);
    }

    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start runtime: {}", e))?;
    let engine = Engine::new(config, Services::with_settings(settings));

    let start = Instant::now();
    let replayed = runtime.block_on(replay(engine, events, |outcome| {
        let line = serde_json::to_string(outcome).map_err(|e| e.to_string())?;
        println!("{}", line);
        Ok(())
    }))?;
    let elapsed = start.elapsed();

    let counts = &replayed.counts;
    let upgrades = replayed.engine.upgrade_counts();
    eprintln!("Replayed {} events from '{}'", counts.events, input);
    eprintln!("  Blocked:       {}", counts.blocked);
    eprintln!("  Redirected:    {}", counts.redirected);
    eprintln!("  Header edits:  {}", counts.header_edits);
    eprintln!("  Notices:       {}", counts.notices);
    eprintln!("  Upgrades:      {} (failed {})", upgrades.total_upgrades, upgrades.failed_upgrades);
    eprintln!("  Time:          {:.1}ms", elapsed.as_secs_f64() * 1000.0);

    if verbose {
        for tab in &replayed.tabs {
            let line = serde_json::to_string(tab).map_err(|e| e.to_string())?;
            eprintln!("  {}", line);
        }
    }

    Ok(())
}

struct Replay {
    engine: Engine,
    counts: ReplayCounts,
    /// Tab states just before shutdown
    tabs: Vec<TabSnapshot>,
}

/// Drive `events` through an actor-owned engine, then shut it down.
async fn replay(
    engine: Engine,
    events: Vec<HostEvent>,
    mut on_outcome: impl FnMut(&Outcome) -> Result<(), String>,
) -> Result<Replay, String> {
    let (handle, task) = EngineHandle::spawn(engine);
    let mut counts = ReplayCounts::default();

    for event in events {
        let outcome = handle.handle_event(event).await.map_err(|e| e.to_string())?;
        counts.record(&outcome.response, &outcome.notices);
        on_outcome(&outcome)?;
    }

    let tabs = match handle.send(EngineMessage::ListTabs).await.map_err(|e| e.to_string())? {
        EngineReply::Tabs(tabs) => tabs,
        other => return Err(format!("Unexpected engine reply: {:?}", other)),
    };

    handle.shutdown().map_err(|e| e.to_string())?;
    let engine = task.await.map_err(|e| format!("Engine task failed: {}", e))?;
    Ok(Replay { engine, counts, tabs })
}

#[derive(Default)]
struct ReplayCounts {
    events: usize,
    blocked: usize,
    redirected: usize,
    header_edits: usize,
    notices: usize,
}

impl ReplayCounts {
    fn record(&mut self, response: &tw_core::BlockingResponse, notices: &[Notice]) {
        self.events += 1;
        if response.cancel {
            self.blocked += 1;
        }
        if response.redirect_url.is_some() {
            self.redirected += 1;
        }
        if response.request_headers.is_some() || response.response_headers.is_some() {
            self.header_edits += 1;
        }
        self.notices += notices.len();
    }
}
