use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use worksync::cache::{CacheStore, FileCacheStore};
use worksync::deps::{CancelFlag, DependencyLoader, PreloadOptions};
use worksync::model::{SyncProfile, TimeRangePreset};
use worksync::providers::TrackerClient;
use worksync::ratelimit::RateLimiter;
use worksync::reconcile::JsonRecordStore;
use worksync::sync::StrategyResolver;
use worksync::{SyncEngine, SyncError, SyncOptions};

use crate::config::{self, AppConfig};

/// Containers listed by `preload --all`.
const MAX_PRELOAD_CONTAINERS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Sync {
        profile: String,
        range: Option<TimeRangePreset>,
        factor: f64,
        dry_run: bool,
    },
    Estimate {
        profile: String,
        range: Option<TimeRangePreset>,
        factor: f64,
    },
    Query {
        profile: String,
        range: Option<TimeRangePreset>,
    },
    Preload {
        profile: String,
        all: bool,
    },
    CacheClear,
    Help,
}

/// Parse everything after the binary name.
pub fn parse_args(args: &[String]) -> Result<Command> {
    let Some((command, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };

    match command.as_str() {
        "sync" => {
            let flags = Flags::parse(rest, &["--range", "--factor", "--dry-run"])?;
            Ok(Command::Sync {
                profile: flags.profile("sync")?,
                range: flags.range,
                factor: flags.factor,
                dry_run: flags.dry_run,
            })
        }
        "estimate" => {
            let flags = Flags::parse(rest, &["--range", "--factor"])?;
            Ok(Command::Estimate {
                profile: flags.profile("estimate")?,
                range: flags.range,
                factor: flags.factor,
            })
        }
        "query" => {
            let flags = Flags::parse(rest, &["--range"])?;
            Ok(Command::Query {
                profile: flags.profile("query")?,
                range: flags.range,
            })
        }
        "preload" => {
            let flags = Flags::parse(rest, &["--all"])?;
            Ok(Command::Preload {
                profile: flags.profile("preload")?,
                all: flags.all,
            })
        }
        "cache" => match rest.first().map(String::as_str) {
            Some("clear") if rest.len() == 1 => Ok(Command::CacheClear),
            _ => bail!("Usage: worksync cache clear"),
        },
        "help" | "-h" | "--help" => Ok(Command::Help),
        other => bail!("Unknown command '{other}'. Run `worksync help` for usage."),
    }
}

#[derive(Debug)]
struct Flags {
    positional: Vec<String>,
    range: Option<TimeRangePreset>,
    factor: f64,
    dry_run: bool,
    all: bool,
}

impl Flags {
    fn parse(args: &[String], allowed: &[&str]) -> Result<Self> {
        let mut flags = Flags {
            positional: Vec::new(),
            range: None,
            factor: 1.0,
            dry_run: false,
            all: false,
        };
        let mut i = 0;

        while i < args.len() {
            let arg = args[i].as_str();
            if arg.starts_with("--") && !allowed.contains(&arg) {
                bail!("Unknown flag {arg}");
            }
            match arg {
                "--range" => {
                    i += 1;
                    let Some(value) = args.get(i) else {
                        bail!("Missing value for --range");
                    };
                    flags.range = Some(value.parse()?);
                }
                "--factor" => {
                    i += 1;
                    let Some(value) = args.get(i) else {
                        bail!("Missing value for --factor");
                    };
                    let factor: f64 = value
                        .parse()
                        .with_context(|| format!("Invalid --factor '{value}'"))?;
                    if !factor.is_finite() || factor <= 0.0 {
                        bail!("--factor must be a positive number");
                    }
                    flags.factor = factor;
                }
                "--dry-run" => flags.dry_run = true,
                "--all" => flags.all = true,
                _ => flags.positional.push(args[i].clone()),
            }
            i += 1;
        }

        Ok(flags)
    }

    fn profile(&self, command: &str) -> Result<String> {
        match self.positional.as_slice() {
            [profile] => Ok(profile.clone()),
            [] => bail!("Usage: worksync {command} <profile>"),
            [_, extra, ..] => bail!("Unexpected argument '{extra}'"),
        }
    }
}

pub async fn run(command: Command) -> Result<()> {
    if command == Command::Help {
        print_help();
        return Ok(());
    }

    let config = config::load_config()?;
    match command {
        Command::Sync {
            profile,
            range,
            factor,
            dry_run,
        } => handle_sync(&config, &profile, range, factor, dry_run).await,
        Command::Estimate {
            profile,
            range,
            factor,
        } => handle_estimate(&config, &profile, range, factor).await,
        Command::Query { profile, range } => handle_query(&config, &profile, range).await,
        Command::Preload { profile, all } => handle_preload(&config, &profile, all).await,
        Command::CacheClear => handle_cache_clear(),
        Command::Help => Ok(()),
    }
}

type Loader = DependencyLoader<Arc<dyn TrackerClient>, FileCacheStore>;

fn loader_for(client: &Arc<dyn TrackerClient>) -> Loader {
    DependencyLoader::new(Arc::clone(client), FileCacheStore::new(config::cache_dir()))
}

/// Load sub-group dependencies for every container that names some, so the
/// query builder reads them from cache.
async fn warm_dependencies(loader: &Loader, profile: &SyncProfile, concurrency: usize) {
    let ids: Vec<String> = profile
        .containers
        .iter()
        .filter(|c| !c.sub_groups.is_empty())
        .map(|c| c.id.clone())
        .collect();
    if ids.is_empty() {
        return;
    }
    for (id, result) in loader.load_many(&ids, concurrency).await {
        if let Err(e) = result {
            tracing::debug!("Could not load dependencies for {}: {}", id, e);
        }
    }
}

async fn handle_sync(
    config: &AppConfig,
    name: &str,
    range: Option<TimeRangePreset>,
    factor: f64,
    dry_run: bool,
) -> Result<()> {
    let profile = config.profile(name)?;
    let preset = range.unwrap_or(profile.time_range.default);
    let client = config.client(profile.provider)?;
    let loader = loader_for(&client);
    warm_dependencies(&loader, &profile, config.sync.concurrency).await;

    let records = JsonRecordStore::open(config::records_path())?;
    let engine = SyncEngine::new(client, &loader, &records);
    let options = SyncOptions {
        scaling_factor: factor,
        dry_run,
        capabilities: config.sync.capabilities(),
        policy: config.sync.conflict_policy,
        ..SyncOptions::default()
    };

    let report = engine.run(&profile, preset, &options).await?;
    if !report.validation.safe {
        return Err(SyncError::Blocked {
            blockers: report.validation.blockers,
        }
        .into());
    }

    let result = &report.result;
    if dry_run {
        println!("Dry run, nothing was written.");
    }
    println!("{}: {}", profile.display_name, result.summary());
    for conflict in &result.conflicts {
        println!(
            "  conflict {} {}: external '{}' / local '{}' -> kept {}",
            conflict.item_id,
            conflict.field,
            conflict.external_value,
            conflict.local_value,
            conflict.resolution
        );
    }
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    for error in &result.errors {
        println!("  error: {error}");
    }
    Ok(())
}

async fn handle_estimate(
    config: &AppConfig,
    name: &str,
    range: Option<TimeRangePreset>,
    factor: f64,
) -> Result<()> {
    let profile = config.profile(name)?;
    let preset = range.unwrap_or(profile.time_range.default);
    let client = config.client(profile.provider)?;
    let loader = loader_for(&client);
    let records = JsonRecordStore::open(config::records_path())?;
    let engine = SyncEngine::new(client, &loader, &records);

    let (estimate, validation) = engine.assess(&profile, preset, factor).await;
    println!("{} ({preset})", profile.display_name);
    println!("  {}", RateLimiter::format_estimate(&estimate));
    for warning in &validation.warnings {
        println!("  warning: {warning}");
    }
    for blocker in &validation.blockers {
        println!("  blocked: {blocker}");
    }
    println!(
        "  safe to sync: {}",
        if validation.safe { "yes" } else { "no" }
    );
    Ok(())
}

async fn handle_query(
    config: &AppConfig,
    name: &str,
    range: Option<TimeRangePreset>,
) -> Result<()> {
    let profile = config.profile(name)?;
    let preset = range.unwrap_or(profile.time_range.default);
    let client = config.client(profile.provider)?;
    let loader = loader_for(&client);
    warm_dependencies(&loader, &profile, config.sync.concurrency).await;

    let resolver = StrategyResolver::new(&client, &loader);
    let built = resolver.build_query(&profile, preset, Utc::now()).await?;
    println!("{}", built.query);
    for warning in &built.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

async fn handle_preload(config: &AppConfig, name: &str, all: bool) -> Result<()> {
    let profile = config.profile(name)?;
    let client = config.client(profile.provider)?;
    let loader = loader_for(&client);

    let ids: Vec<String> = if all {
        loader
            .load_metadata(MAX_PRELOAD_CONTAINERS)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect()
    } else {
        profile.containers.iter().map(|c| c.id.clone()).collect()
    };
    if ids.is_empty() {
        bail!("Profile '{name}' has no containers to preload. Use --all to preload every container.");
    }

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current container...");
            on_signal.cancel();
        }
    });

    let options = PreloadOptions::for_provider(profile.provider)
        .with_cancel(cancel)
        .on_progress(|p| eprintln!("  {}/{} ({})", p.completed, p.total, p.container))
        .on_save_state(|s| {
            eprintln!(
                "Stopped at {}/{}: {} loaded, {} failed",
                s.completed,
                s.total,
                s.loaded,
                s.failed.len()
            )
        });

    let summary = loader.preload_all(&ids, &options).await?;
    println!(
        "Preloaded {}/{} containers ({} failed)",
        summary.loaded,
        summary.total,
        summary.failed.len()
    );
    for failure in &summary.failed {
        println!("  {failure}");
    }
    Ok(())
}

fn handle_cache_clear() -> Result<()> {
    let cache = FileCacheStore::new(config::cache_dir());
    let removed = cache.clear()?;
    println!("Removed {removed} cache entries from {}", cache.dir().display());
    Ok(())
}

pub fn print_help() {
    println!("worksync: sync work items from Azure DevOps, Jira and GitHub\n");
    println!("USAGE:");
    println!("  worksync sync <profile> [--range R] [--factor F] [--dry-run]");
    println!("  worksync estimate <profile> [--range R] [--factor F]");
    println!("  worksync query <profile> [--range R]");
    println!("  worksync preload <profile> [--all]");
    println!("  worksync cache clear");
    println!();
    println!("OPTIONS:");
    println!("  --range R    Time range: 1W, 2W, 1M, 3M, 6M, 1Y or ALL (default: the profile's)");
    println!("  --factor F   Scale the item estimate, e.g. 2.5 for a busy project");
    println!("  --dry-run    Reconcile without writing to the tracker or the record store");
    println!("  --all        Preload every container the credentials can see");
    println!();
    println!("Profiles and credentials live in ~/.worksync/config.toml (or $WORKSYNC_CONFIG).");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_args_is_help() {
        assert_eq!(parse_args(&[]).unwrap(), Command::Help);
        assert_eq!(parse_args(&args(&["--help"])).unwrap(), Command::Help);
    }

    #[test]
    fn parse_sync_with_flags() {
        let command =
            parse_args(&args(&["sync", "platform", "--range", "3m", "--factor", "2.5", "--dry-run"]))
                .unwrap();
        assert_eq!(
            command,
            Command::Sync {
                profile: "platform".into(),
                range: Some(TimeRangePreset::ThreeMonths),
                factor: 2.5,
                dry_run: true,
            }
        );
    }

    #[test]
    fn flags_may_precede_the_profile() {
        let command = parse_args(&args(&["estimate", "--range", "ALL", "platform"])).unwrap();
        assert_eq!(
            command,
            Command::Estimate {
                profile: "platform".into(),
                range: Some(TimeRangePreset::All),
                factor: 1.0,
            }
        );
    }

    #[test]
    fn parse_query_and_preload() {
        assert_eq!(
            parse_args(&args(&["query", "mine"])).unwrap(),
            Command::Query {
                profile: "mine".into(),
                range: None,
            }
        );
        assert_eq!(
            parse_args(&args(&["preload", "mine", "--all"])).unwrap(),
            Command::Preload {
                profile: "mine".into(),
                all: true,
            }
        );
        assert_eq!(
            parse_args(&args(&["cache", "clear"])).unwrap(),
            Command::CacheClear
        );
    }

    #[test]
    fn missing_profile_shows_usage() {
        let err = parse_args(&args(&["sync", "--dry-run"])).unwrap_err();
        assert!(err.to_string().contains("Usage: worksync sync <profile>"));
    }

    #[test]
    fn extra_positional_is_rejected() {
        let err = parse_args(&args(&["query", "a", "b"])).unwrap_err();
        assert!(err.to_string().contains("Unexpected argument 'b'"));
    }

    #[test]
    fn flags_are_checked_per_command() {
        let err = parse_args(&args(&["query", "mine", "--dry-run"])).unwrap_err();
        assert!(err.to_string().contains("Unknown flag --dry-run"));
    }

    #[test]
    fn bad_range_and_factor_fail() {
        let err = parse_args(&args(&["sync", "p", "--range", "5D"])).unwrap_err();
        assert!(err.to_string().contains("unknown time range"));

        let err = parse_args(&args(&["sync", "p", "--factor", "-1"])).unwrap_err();
        assert!(err.to_string().contains("positive"));

        let err = parse_args(&args(&["sync", "p", "--factor"])).unwrap_err();
        assert!(err.to_string().contains("Missing value"));
    }

    #[test]
    fn unknown_command_fails() {
        let err = parse_args(&args(&["push"])).unwrap_err();
        assert!(err.to_string().contains("Unknown command 'push'"));
    }

    #[test]
    fn cache_requires_clear() {
        assert!(parse_args(&args(&["cache"])).is_err());
        assert!(parse_args(&args(&["cache", "purge"])).is_err());
    }
}
