use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use chrono::Local;
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use log::{info, warn};
use tokio::sync::watch;

use mpegts_pacer::packet::SyncPolicy;
use mpegts_pacer::pacer::{self, DeliveryConfig, IndexOptions, PlayOptions, RelayOptions, ServeOptions};
use mpegts_pacer::report::Reporter;

#[derive(Parser)]
#[clap(version, about = "MPEG-TS indexer and clock-paced UDP player")]
struct Opt {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the NDJSON seek index of a transport stream
    Index {
        input: PathBuf,

        /// Defaults to the input path with an `.idx` extension
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Stop at the first packet without sync byte instead of skipping it
        #[clap(long, default_value_t = false)]
        strict: bool,
    },

    /// Print programs, streams and clock statistics as JSON
    Probe {
        input: PathBuf,

        #[clap(long, default_value_t = false)]
        strict: bool,
    },

    /// Replay `<base>.ts` at the rate given by `<base>.aux`
    Play {
        /// Path without extension
        #[clap(short = 'f', long)]
        file: PathBuf,

        /// Host for the fan-out sessions
        #[clap(short = 'o', long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// First fan-out port; session i goes to base_port + i
        #[clap(long, default_value_t = mpegts_pacer::constants::DEFAULT_BASE_PORT)]
        base_port: u16,

        /// Fan-out sessions in addition to the monitor session
        #[clap(short = 'c', long, default_value_t = 0)]
        concurrency: u16,

        /// Monitor stream destination (UDP)
        #[clap(short = 'm', long, default_value = "127.0.0.1:3000")]
        monitor: SocketAddr,

        /// Max play duration in seconds, 0 = unbounded
        #[clap(short = 'd', long, default_value_t = 0)]
        duration: u64,

        #[clap(long, default_value_t = 1)]
        ttl: u32,
    },

    /// Forward UDP datagrams unchanged
    Relay {
        #[clap(short = 's', long)]
        source: SocketAddr,

        #[clap(short = 'o', long)]
        destination: SocketAddr,
    },

    /// Accept PLAY/TEARDOWN requests and deliver files from a media root
    Serve {
        #[clap(long, default_value = "0.0.0.0:554")]
        listen: SocketAddr,

        #[clap(long, default_value = ".")]
        media_root: PathBuf,

        #[clap(short = 'd', long, default_value_t = 0)]
        duration: u64,
    },
}

fn init_logger() {
    Builder::from_env(Env::default().filter_or("RUST_LOG", "info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

fn sync_policy(strict: bool) -> SyncPolicy {
    if strict { SyncPolicy::Abort } else { SyncPolicy::Skip }
}

/// Stop signal flipped by Ctrl-C
fn ctrl_c_stop() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping");
            let _ = tx.send(true);
        }
    });
    rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    let opt = Opt::parse();

    match opt.command {
        Command::Index { input, output, strict } => {
            pacer::index(&IndexOptions {
                input,
                output,
                sync_policy: sync_policy(strict),
            })?;
        }
        Command::Probe { input, strict } => {
            let report = pacer::probe(&IndexOptions {
                input,
                output: None,
                sync_policy: sync_policy(strict),
            })?;
            println!("{}", Reporter::generate_json_report(&report));
        }
        Command::Play {
            file,
            host,
            base_port,
            concurrency,
            monitor,
            duration,
            ttl,
        } => {
            let opts = PlayOptions {
                host,
                base_port,
                concurrency,
                delivery: DeliveryConfig::default().with_max_duration_secs(duration),
                multicast_ttl: ttl,
                ..PlayOptions::new(file, monitor)
            };
            let reports = pacer::play(opts, ctrl_c_stop()).await?;
            let bytes: u64 = reports.iter().map(|r| r.bytes_written).sum();
            info!("{} sessions done, {bytes} bytes sent", reports.len());
        }
        Command::Relay { source, destination } => {
            pacer::relay(RelayOptions { source, destination }, ctrl_c_stop()).await?;
        }
        Command::Serve {
            listen,
            media_root,
            duration,
        } => {
            pacer::serve(ServeOptions {
                listen,
                media_root,
                delivery: DeliveryConfig::default().with_max_duration_secs(duration),
            })
            .await?;
        }
    }
    Ok(())
}
