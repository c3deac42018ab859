use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use wikipulse_core::config::{DEFAULT_CONFIG_PATH, PulseConfig, load_config};
use wikipulse_core::handler::{
    BodyShape, InvocationEvent, InvocationResponse, handle_event, summarize_store,
};
use wikipulse_core::stats::iso_timestamp;
use wikipulse_core::store::open_store;

#[derive(Debug, Parser)]
#[command(
    name = "wikipulse",
    version,
    about = "Track recent edit activity of Wikipedia articles"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Config file (default: .wikipulse/config.toml)"
    )]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
    #[command(flatten)]
    track: TrackArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Args)]
struct TrackArgs {
    #[arg(long, help = "Title for Wikipedia search")]
    title: Option<String>,
    #[command(flatten)]
    target: TargetArgs,
    #[arg(long, help = "Fold mean/sum into the stats object instead of an envelope")]
    flat_body: bool,
}

impl Cli {
    /// Tracker flags given before a subcommand would be silently dropped.
    fn check_tracker_flags(&self) -> Result<(), clap::Error> {
        let track = &self.track;
        let tracker_flags_set = track.title.is_some()
            || track.flat_body
            || track.target.local
            || track.target.filename.is_some();
        if self.command.is_some() && tracker_flags_set {
            return Err(Self::command().error(
                ErrorKind::ArgumentConflict,
                "--title, --local, --filename and --flat-body cannot be used before a \
                 subcommand; pass target flags after `summary`",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
struct TargetArgs {
    #[arg(long, help = "Use a local JSON file instead of the object store")]
    local: bool,
    #[arg(
        long,
        value_name = "NAME",
        help = "Name of the stats JSON file (default: parsed_wiki.json)"
    )]
    filename: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the handler on an invocation event JSON file (`-` for stdin)")]
    Invoke(InvokeArgs),
    #[command(about = "Print the aggregate of the stored stats without fetching")]
    Summary(TargetArgs),
}

#[derive(Debug, Args)]
struct InvokeArgs {
    event: String,
    #[arg(long, help = "Fold mean/sum into the stats object instead of an envelope")]
    flat_body: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    None,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    if let Err(error) = cli.check_tracker_flags() {
        error.exit();
    }
    dotenvy::dotenv().ok();
    init_logging(cli.log_level);
    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Invoke(args)) => run_invoke(&config, &args),
        Some(Commands::Summary(args)) => run_summary(&config, &args),
        None => run_track(&config, &cli.track),
    }
}

fn run_track(config: &PulseConfig, args: &TrackArgs) -> Result<ExitCode> {
    if args.title.is_none() {
        log::warn!("no --title given, fetching the history of an empty title");
    }
    let event = InvocationEvent::for_title(
        args.title.clone().unwrap_or_default(),
        args.target.local,
        args.target.filename.clone(),
    );
    print_response(&handle_event(&event, config, body_shape(args.flat_body)))
}

fn run_invoke(config: &PulseConfig, args: &InvokeArgs) -> Result<ExitCode> {
    let raw = if args.event == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read event from stdin")?;
        buffer
    } else {
        fs::read_to_string(&args.event)
            .with_context(|| format!("failed to read event file {}", args.event))?
    };
    let event: InvocationEvent =
        serde_json::from_str(&raw).context("failed to parse invocation event JSON")?;
    print_response(&handle_event(&event, config, body_shape(args.flat_body)))
}

fn run_summary(config: &PulseConfig, args: &TargetArgs) -> Result<ExitCode> {
    let key = args
        .filename
        .clone()
        .unwrap_or_else(|| config.default_filename().to_string());
    let store = open_store(args.local, config)?;
    let (document, aggregate) = summarize_store(store.as_ref(), &key)?;

    println!("stats summary");
    println!("source: {}", store.describe(&key));
    println!("articles: {}", document.len());
    println!("active_articles: {}", aggregate.count);
    println!("sum: {}", aggregate.sum);
    println!(
        "mean: {}",
        aggregate
            .mean
            .map(|mean| format!("{mean:.3}"))
            .unwrap_or_else(|| "n/a".to_string())
    );
    for (title, stat) in document.iter() {
        let latest = stat
            .latest_update_time
            .map(|value| iso_timestamp::format(&value))
            .unwrap_or_else(|| "<none>".to_string());
        println!(
            "article.{title}: {} edits, latest {latest}",
            stat.number_update_time
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_response(response: &InvocationResponse) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if response.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn resolve_config(explicit: Option<&Path>) -> Result<PulseConfig> {
    let path = explicit.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    if let Some(explicit) = explicit
        && !explicit.exists()
    {
        anyhow::bail!("config file not found: {}", explicit.display());
    }
    let config = load_config(path)?;
    log::debug!("config: {config:?}");
    Ok(config)
}

fn body_shape(flat: bool) -> BodyShape {
    if flat { BodyShape::Flat } else { BodyShape::Envelope }
}

fn init_logging(log_level: LogLevel) {
    let level = match log_level {
        LogLevel::None => return,
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", level);
    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(matches!(log_level, LogLevel::Debug | LogLevel::Trace))
        .init();
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;
    use clap::{CommandFactory, Parser};

    use super::{Cli, Commands, LogLevel};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn top_level_flags_run_the_tracker() {
        let cli = Cli::parse_from([
            "wikipulse",
            "--local",
            "--filename",
            "stats.json",
            "--title",
            "Ukraine",
        ]);
        assert!(cli.command.is_none());
        assert!(cli.track.target.local);
        assert_eq!(cli.track.target.filename.as_deref(), Some("stats.json"));
        assert_eq!(cli.track.title.as_deref(), Some("Ukraine"));
        assert_eq!(cli.log_level, LogLevel::Warn);
    }

    #[test]
    fn summary_subcommand_takes_target_flags() {
        let cli = Cli::parse_from(["wikipulse", "--log-level", "debug", "summary", "--local"]);
        assert_eq!(cli.log_level, LogLevel::Debug);
        match cli.command {
            Some(Commands::Summary(args)) => {
                assert!(args.local);
                assert!(args.filename.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn tracker_flags_before_a_subcommand_are_rejected() {
        let cli = Cli::parse_from(["wikipulse", "--title", "Ukraine", "summary"]);
        let error = cli.check_tracker_flags().expect_err("must conflict");
        assert_eq!(error.kind(), ErrorKind::ArgumentConflict);

        let cli = Cli::parse_from(["wikipulse", "--local", "invoke", "event.json"]);
        assert!(cli.check_tracker_flags().is_err());
    }

    #[test]
    fn global_flags_before_a_subcommand_are_accepted() {
        let cli = Cli::parse_from(["wikipulse", "--config", "cfg.toml", "summary", "--local"]);
        assert!(cli.check_tracker_flags().is_ok());
        let cli = Cli::parse_from(["wikipulse", "--title", "Ukraine"]);
        assert!(cli.check_tracker_flags().is_ok());
    }

    #[test]
    fn invoke_subcommand_accepts_stdin_marker() {
        let cli = Cli::parse_from(["wikipulse", "invoke", "-"]);
        match cli.command {
            Some(Commands::Invoke(args)) => assert_eq!(args.event, "-"),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
