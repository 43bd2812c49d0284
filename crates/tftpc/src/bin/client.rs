// tftpc command-line client

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tftpc::config::{load_config, validate_config, write_config};
use tftpc::logging::init_logging;
use tftpc::{
    ClientConfig, LogFormat, Result, TftpClient, TransferEvent, TransferObserver, TransferSummary,
};

/// TFTP client with blksize/tsize option negotiation
#[derive(Parser, Debug)]
#[command(name = "tftpc")]
#[command(about = "TFTP client (RFC 1350, 2347, 2348, 2349)", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "tftpc.toml")]
    config: PathBuf,

    /// Write the effective configuration to --config and exit
    #[arg(long)]
    init_config: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,

    /// TFTP server host name or IP address
    #[arg(short, long)]
    server: Option<String>,

    /// TFTP server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Block size to propose (8-65464 bytes)
    #[arg(short, long)]
    block_size: Option<u16>,

    /// Seconds to wait for each reply
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Retransmissions before giving up
    #[arg(long)]
    retries: Option<u32>,

    /// Do not send the tsize option
    #[arg(long)]
    no_tsize: bool,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a file from the server
    Get {
        /// Remote file name
        remote: String,
        /// Local destination (defaults to the remote file name)
        local: Option<PathBuf>,
    },
    /// Upload a file to the server
    Put {
        /// Local source file
        local: PathBuf,
        /// Remote file name (defaults to the local file name)
        remote: Option<String>,
    },
    /// Prompt for get/put commands until `exit`
    Interactive,
}

impl Cli {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(ref server) = self.server {
            config.server = server.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if self.no_tsize {
            config.request_tsize = false;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        ClientConfig::default()
    };
    cli.apply(&mut config);

    if cli.init_config {
        write_config(&cli.config, &config)?;
        println!("Wrote config: {}", cli.config.display());
        return Ok(());
    }

    validate_config(&config)?;

    if cli.check_config {
        println!("Config OK: {}", cli.config.display());
        return Ok(());
    }

    let _log_guard = init_logging(&config.logging);

    match cli.command.unwrap_or(Command::Interactive) {
        Command::Get { remote, local } => {
            let local = local.unwrap_or_else(|| default_local(&remote));
            get(&config, &remote, &local).await?;
        }
        Command::Put { local, remote } => {
            let remote = remote.unwrap_or_else(|| default_remote(&local));
            put(&config, &local, &remote).await?;
        }
        Command::Interactive => interactive(&config).await?,
    }

    Ok(())
}

async fn get(config: &ClientConfig, remote: &str, local: &Path) -> Result<TransferSummary> {
    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(cancel.clone());
    let client = TftpClient::new(config.clone()).with_cancellation(cancel);

    let mut progress = ProgressLogger::default();
    let result = client.get(remote, local, &mut progress).await;
    watcher.abort();

    let summary = result?;
    info!(
        "Downloaded {} to {} ({} bytes)",
        remote,
        local.display(),
        summary.bytes
    );
    Ok(summary)
}

async fn put(config: &ClientConfig, local: &Path, remote: &str) -> Result<TransferSummary> {
    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(cancel.clone());
    let client = TftpClient::new(config.clone()).with_cancellation(cancel);

    let mut progress = ProgressLogger::default();
    let result = client.put(local, remote, &mut progress).await;
    watcher.abort();

    let summary = result?;
    info!(
        "Uploaded {} as {} ({} bytes)",
        local.display(),
        remote,
        summary.bytes
    );
    Ok(summary)
}

/// Cancel the running transfer on Ctrl-C. It stops at the next reply boundary.
fn cancel_on_ctrl_c(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfer");
            cancel.cancel();
        }
    })
}

async fn interactive(config: &ClientConfig) -> Result<()> {
    println!(
        "tftpc: server {}:{} (type 'help' for commands)",
        config.server, config.port
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("tftp> ");
        std::io::stdout().flush()?;

        // Ctrl-C at the prompt leaves; during a transfer it only cancels that transfer
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let words: Vec<&str> = line.split_whitespace().collect();
        let outcome = match words.as_slice() {
            [] => continue,
            ["help"] | ["?"] => {
                print_help();
                continue;
            }
            ["exit"] | ["quit"] => break,
            ["get", remote] => get(config, remote, &default_local(remote)).await,
            ["get", remote, local] => get(config, remote, Path::new(local)).await,
            ["put", local] => {
                let local = Path::new(local);
                put(config, local, &default_remote(local)).await
            }
            ["put", local, remote] => put(config, Path::new(local), remote).await,
            _ => {
                println!("Unknown command '{}'. Type 'help' for commands.", line.trim());
                continue;
            }
        };

        match outcome {
            Ok(summary) => println!(
                "{} bytes in {:.2}s",
                summary.bytes,
                summary.elapsed.as_secs_f64()
            ),
            Err(err) => println!("Error: {}", err),
        }
    }

    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  get <remote> [local]   download a file");
    println!("  put <local> [remote]   upload a file");
    println!("  help                   show this help");
    println!("  exit                   leave");
}

fn default_local(remote: &str) -> PathBuf {
    Path::new(remote)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(remote))
}

fn default_remote(local: &Path) -> String {
    local
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| local.to_string_lossy().into_owned())
}

/// Reports transfer progress through tracing.
#[derive(Default)]
struct ProgressLogger {
    last_percent: u64,
}

impl TransferObserver for ProgressLogger {
    fn on_event(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::Negotiated {
                block_size,
                transfer_size,
                acknowledged: true,
            } => info!(
                "Server accepted options: blksize={} tsize={}",
                block_size,
                transfer_size.map_or_else(|| "unknown".to_string(), |size| size.to_string())
            ),
            TransferEvent::Negotiated { block_size, .. } => {
                info!("Server ignored options, using {}-byte blocks", block_size)
            }
            TransferEvent::Block {
                block,
                transferred,
                total: Some(total),
                ..
            } if *total > 0 => {
                let percent = transferred.saturating_mul(100) / total;
                if percent >= self.last_percent + 10 {
                    self.last_percent = percent - percent % 10;
                    info!("{}% ({}/{} bytes)", percent, transferred, total);
                }
                debug!("Block {} done", block);
            }
            TransferEvent::Block {
                block, transferred, ..
            } => debug!("Block {} done ({} bytes so far)", block, transferred),
            // The session logs retransmissions and the final outcome itself
            TransferEvent::Retransmit { .. }
            | TransferEvent::Completed(_)
            | TransferEvent::Aborted { .. } => {}
        }
    }
}
