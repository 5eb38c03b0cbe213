use anyhow::Result;
use clap::Parser;
use stars_testnet::{
    TestnetArgs, TestnetConfig,
    execute::{self, SystemClock},
    modules::ModuleBasics,
};
use std::{fs, path::Path};
use tracing::{Level, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Initialize files for a Stargaze testnet", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, env = "STARS_TESTNET_DEBUG")]
    debug: bool,

    /// Log file path (optional)
    #[arg(short, long, env = "STARS_TESTNET_LOG_FILE")]
    log_file: Option<String>,

    #[command(flatten)]
    testnet: TestnetArgs,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { Level::DEBUG } else { Level::INFO };

    // Keep the appender guard alive until the run finishes so buffered lines are flushed.
    let _guard = if let Some(log_file_path) = &args.log_file {
        if let Some(parent) = Path::new(log_file_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file_appender = tracing_appender::rolling::never("", log_file_path);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(non_blocking)
            .with_ansi(false)
            .init();

        info!("Logging to file: {}", log_file_path);
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();
        None
    };

    let config = TestnetConfig::from_args(args.testnet)?;
    let summary = execute::init_testnet(&config, &ModuleBasics::stargaze(), &SystemClock)?;

    info!(
        chain_id = %summary.chain_id,
        compose = %summary.compose_file.display(),
        "testnet files written to {}",
        summary.output_dir.display()
    );
    eprintln!("Successfully initialized {} node directories", summary.nodes.len());
    Ok(())
}
