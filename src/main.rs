use clap::Parser;
use reflip::cli::{self, Cli, Commands};
use reflip::error::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            text,
            live,
            auto_approve,
        } => {
            init_logging();
            cli::run_command_mode(&text, !live, auto_approve).await?;
        }
        Commands::Parse { text } => {
            init_logging_simple();
            cli::parse_mode(&text).await?;
        }
        Commands::Counter {
            their,
            our,
            max,
            round,
            max_rounds,
        } => {
            init_logging_simple();
            cli::counter_mode(their, our, max, round, max_rounds);
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reflip=debug,sqlx=warn"));

    // Check if we should write to file (prefer REFLIP_LOG_DIR, fallback to LOG_DIR).
    let log_dir = std::env::var("REFLIP_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .unwrap_or_else(|_| "/var/log/reflip".to_string());

    // Try to create log directory.
    //
    // Important: `tracing_appender::rolling::daily` will panic (and in our release build,
    // abort) if it can't create the initial log file. So we must preflight writability.
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let test_path = std::path::Path::new(&log_dir).join(".reflip_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                // Daily rotating file appender
                let file_appender = tracing_appender::rolling::daily(&log_dir, "reflip.log");
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(file_appender)
                        .with_ansi(false),
                )
            }
            Err(_) => None,
        }
    } else {
        None
    };

    let stdout_layer = tracing_subscriber::fmt::layer();

    match file_layer {
        Some(file_layer) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .init();
        }
    }
}

fn init_logging_simple() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
