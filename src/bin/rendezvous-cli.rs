//! CLI рандеву.
//!
//! Позволяет вызвать `sync` из скриптов и shell-воркеров, а также сбросить
//! счётчик тега для повторного запуска.

use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rendezvous::{
    BarrierConfig, BarrierContext, BarrierDescriptor, LogFormat, LoggingConfig, Settings,
};
use serde_json::json;
use tokio::time::Instant;
use tracing::debug;

/// Код выхода, если рандеву не состоялось вовремя.
const EXIT_TIMEOUT: u8 = 2;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// Основная структура CLI аргументов
#[derive(Parser)]
#[command(name = "rendezvous-cli")]
#[command(version = env!("CARGO_PKG_VERSION"), long_version = LONG_VERSION)]
#[command(about = "Distributed rendezvous barrier over a pub/sub broker", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// URL брокера
    #[arg(long, env = "RENDEZVOUS_BROKER_URL", help = "Broker URL, redis://[:password@]host[:port][/db]")]
    url: Option<String>,
    /// Файл настроек (TOML)
    #[arg(long, help = "Settings file (TOML)")]
    config: Option<PathBuf>,
    /// Квант опроса помпы
    #[arg(long, help = "Pump poll quantum in milliseconds")]
    quantum_ms: Option<u64>,
    /// Включить подробный вывод (debug)
    #[arg(short, long, help = "Enable debug logging")]
    verbose: bool,
    /// Подавить большинство логов (только warn/error)
    #[arg(short = 'q', long, conflicts_with = "verbose", help = "Only warnings and errors")]
    quiet: bool,
    /// Формат логов
    #[arg(long, value_enum, help = "Log format")]
    log_format: Option<LogFormatArg>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LogFormatArg {
    Json,
    Pretty,
    Compact,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
        }
    }
}

/// Подкоманды CLI
#[derive(Subcommand)]
enum Commands {
    /// Дождаться остальных участников и напечатать сообщение релиза
    Sync {
        #[arg(long, required_unless_present = "descriptor")]
        tag: Option<String>,
        #[arg(long, required_unless_present = "descriptor")]
        count: Option<i64>,
        #[arg(long, required_unless_present = "descriptor")]
        message: Option<String>,
        /// Таймаут в секундах
        #[arg(long)]
        timeout: Option<f64>,
        /// Компактная форма tag:count:message[:timeout]
        #[arg(long, conflicts_with_all = ["tag", "count", "message", "timeout"])]
        descriptor: Option<BarrierDescriptor>,
    },
    /// Удалить счётчик тега
    Reset {
        #[arg(long)]
        tag: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let settings = Settings::load_from(cli.config.as_deref()).context("Failed to load settings")?;
    let _logging = init_logging(&cli, settings.logging_config())?;

    let config = barrier_config(&cli, &settings);
    debug!(?config, "CLI configuration");

    match cli.command {
        Commands::Sync {
            tag,
            count,
            message,
            timeout,
            descriptor,
        } => {
            let descriptor = match descriptor {
                Some(d) => d,
                None => BarrierDescriptor {
                    tag: tag.unwrap_or_default(),
                    count: count.unwrap_or_default(),
                    message: message.unwrap_or_default(),
                    timeout,
                },
            };
            run_sync(&config, descriptor).await
        }
        Commands::Reset { tag } => {
            let ctx = BarrierContext::connect(&config).await?;
            let existed = ctx
                .scope(|barrier| async move { barrier.reset(&tag).await })
                .await?;
            println!("{}", json!({ "reset": existed }));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_sync(
    config: &BarrierConfig,
    descriptor: BarrierDescriptor,
) -> Result<ExitCode> {
    let timeout = descriptor.timeout()?;
    let ctx = BarrierContext::connect(config)
        .await
        .context("Failed to open barrier context")?;

    let start = Instant::now();
    let tag = descriptor.tag.clone();
    let synced = ctx
        .scope(|barrier| async move {
            barrier
                .sync(&descriptor.tag, descriptor.count, descriptor.message, timeout)
                .await
        })
        .await;
    let wait_time = start.elapsed();

    match synced {
        Ok(release_message) => {
            println!(
                "{}",
                json!({
                    "tag": tag,
                    "release_message": release_message,
                    "wait_time": wait_time.as_secs_f64(),
                })
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_timeout() => {
            eprintln!("Error: {e}");
            Ok(ExitCode::from(EXIT_TIMEOUT))
        }
        Err(e) => Err(e.into()),
    }
}

fn barrier_config(
    cli: &Cli,
    settings: &Settings,
) -> BarrierConfig {
    let mut config = settings.barrier_config();
    if let Some(url) = &cli.url {
        config.broker_url = url.clone();
    }
    if let Some(ms) = cli.quantum_ms {
        config.quantum = Duration::from_millis(ms.max(1));
    }
    config
}

fn init_logging(
    cli: &Cli,
    mut config: LoggingConfig,
) -> Result<rendezvous::LoggingHandle> {
    if cli.verbose {
        config.level = "debug".to_string();
    } else if cli.quiet {
        config.level = "warn".to_string();
    }
    if let Some(format) = cli.log_format {
        config.format = format.into();
    }
    rendezvous::init_logging(config).map_err(|e| anyhow::anyhow!(e))
}
