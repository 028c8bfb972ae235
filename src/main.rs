use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weiser::engine::compile_checks;
use weiser::{open_store, Config, Runner};

#[derive(Parser, Debug)]
#[command(name = "weiser")]
#[command(version, about = "Weiser - declarative data-quality engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute all checks and record every evaluation in the metric store
    Run {
        /// Path to the configuration file
        config: PathBuf,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Disable mirroring of the embedded store to object storage
        #[arg(short = 's')]
        skip_export: bool,

        /// Env file for template expansion (file values win when passed)
        #[arg(short = 'e', long = "env-file", value_name = "PATH")]
        env_file: Option<PathBuf>,
    },

    /// Parse, expand, and print each leaf's SQL without executing
    Compile {
        /// Path to the configuration file
        config: PathBuf,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Env file for template expansion (file values win when passed)
        #[arg(short = 'e', long = "env-file", value_name = "PATH")]
        env_file: Option<PathBuf>,
    },

    /// Execute one named check and print the returned rows
    Sample {
        /// Path to the configuration file
        config: PathBuf,

        /// Name of the check to execute
        #[arg(long)]
        check: String,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Env file for template expansion (file values win when passed)
        #[arg(short = 'e', long = "env-file", value_name = "PATH")]
        env_file: Option<PathBuf>,
    },
}

/// Initialize tracing: env filter first, `-v` as the fallback default,
/// optional daily-rolling file layer via WEISER_LOG_FILE.
fn init_tracing(verbose: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);

    if let Ok(log_file) = std::env::var("WEISER_LOG_FILE") {
        let log_path = std::path::Path::new(&log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("weiser.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
        Some(guard)
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        None
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, verbose, skip_export, env_file } => {
            let _guard = init_tracing(verbose);
            let config = Config::load(&config, env_file.as_deref())?;

            let store_config = config.metric_store()?.clone();
            let store = open_store(&store_config, !skip_export).await?;

            let runner = Runner::new(config, Arc::clone(&store));
            let summary = runner.run().await?;

            for record in &summary.records {
                let status = if record.success { "PASS" } else { "FAIL" };
                let actual = record
                    .actual_value
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "NULL".to_string());
                println!("{}  {}  actual={}", status, record.name, actual);
            }
            println!(
                "run {}: {} passed, {} failed, {} errored",
                summary.run_id, summary.passed, summary.failed, summary.errored
            );

            if let Err(e) = store.close().await {
                tracing::error!("metric store shutdown: {}", e);
            }

            if !summary.all_passed() {
                std::process::exit(1);
            }
        },

        Command::Compile { config, verbose, env_file } => {
            let _guard = init_tracing(verbose);
            let config = Config::load(&config, env_file.as_deref())?;

            let (leaves, errors) = compile_checks(&config);
            for leaf in &leaves {
                match &leaf.sql {
                    Some(sql) => println!("-- {} ({})\n{}\n", leaf.name, leaf.check_id, sql),
                    None => println!(
                        "-- {} ({})\n-- anomaly: analyzed from metric store history\n",
                        leaf.name, leaf.check_id
                    ),
                }
            }
            if !errors.is_empty() {
                for error in &errors {
                    eprintln!("error: {}", error);
                }
                std::process::exit(1);
            }
        },

        Command::Sample { config, check, verbose, env_file } => {
            let _guard = init_tracing(verbose);
            let config = Config::load(&config, env_file.as_deref())?;

            let store_config = config.metric_store()?.clone();
            let store = open_store(&store_config, false).await?;

            let runner = Runner::new(config, store);
            for (leaf, rows) in runner.sample(&check).await? {
                println!("-- {} ({} rows)", leaf.name, rows.len());
                for row in rows {
                    let rendered: Vec<String> =
                        row.iter().map(ToString::to_string).collect();
                    println!("{}", rendered.join(" | "));
                }
            }
        },
    }

    Ok(())
}
