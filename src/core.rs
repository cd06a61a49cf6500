use std::fs;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use log::{error, info};
use tokio::fs::File;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::control::{self, SessionHandler, SessionManager};
use crate::deliver::{DeliveryReport, PacedSession};
use crate::index::{build_index, IndexSummary};
use crate::network::{bind_receiver, connect_sender};
use crate::report::probe as probe_reader;
use crate::types::{DeliveryConfig, IndexOptions, PlayOptions, ProbeReport, RelayOptions, ServeOptions};

/// `<base>.ts` and `<base>.aux`
pub fn media_paths(base: &Path) -> (PathBuf, PathBuf) {
    let mut ts = base.as_os_str().to_owned();
    ts.push(".ts");
    let mut aux = base.as_os_str().to_owned();
    aux.push(".aux");
    (PathBuf::from(ts), PathBuf::from(aux))
}

/// Opens the content pair and replays it to `target` at stream rate.
pub async fn play_one(
    base: &Path,
    target: SocketAddr,
    multicast_ttl: u32,
    config: DeliveryConfig,
    stop: watch::Receiver<bool>,
) -> anyhow::Result<DeliveryReport> {
    let (ts_path, aux_path) = media_paths(base);
    let content = File::open(&ts_path)
        .await
        .with_context(|| format!("opening {}", ts_path.display()))?;
    let timestamps = File::open(&aux_path)
        .await
        .with_context(|| format!("opening {}", aux_path.display()))?;
    let mut sink = connect_sender(target, multicast_ttl)?;

    info!("send stream {} to target {target}", ts_path.display());
    let report = PacedSession::new(content, timestamps, config, stop).run(&mut sink).await;
    info!("send {} bytes to {target} done", report.bytes_written);
    Ok(report)
}

/// Spawns one independent delivery task.
pub fn spawn_session(
    base: PathBuf,
    target: SocketAddr,
    multicast_ttl: u32,
    config: DeliveryConfig,
    stop: watch::Receiver<bool>,
) -> JoinHandle<anyhow::Result<DeliveryReport>> {
    tokio::spawn(async move { play_one(&base, target, multicast_ttl, config, stop).await })
}

/// Fans out `concurrency` sessions to consecutive ports and runs the monitor
/// session; returns once every session has ended.
pub async fn play(opts: PlayOptions, stop: watch::Receiver<bool>) -> anyhow::Result<Vec<DeliveryReport>> {
    let handles: Vec<(SocketAddr, JoinHandle<_>)> = opts
        .destinations()
        .into_iter()
        .map(|target| {
            let handle = spawn_session(opts.base_path.clone(), target, opts.multicast_ttl, opts.delivery, stop.clone());
            (target, handle)
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for (target, handle) in handles {
        match handle.await? {
            Ok(report) => {
                if let Some(e) = report.error() {
                    error!("session to {target} failed: {e}");
                }
                reports.push(report);
            }
            Err(e) => {
                error!("session to {target} could not start: {e:#}");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) if reports.is_empty() => Err(e),
        _ => Ok(reports),
    }
}

/// Binds the source, connects the destination and relays until stopped.
pub async fn relay(opts: RelayOptions, stop: watch::Receiver<bool>) -> anyhow::Result<crate::relay::RelayStats> {
    let source = bind_receiver(opts.source)?;
    let destination = connect_sender(opts.destination, 1)?;
    info!("relaying {} -> {}", opts.source, opts.destination);
    Ok(crate::relay::forward(&source, &destination, stop).await?)
}

/// Index file written next to the input when no output is given
pub fn default_index_path(input: &Path) -> PathBuf {
    input.with_extension("idx")
}

/// Demultiplexes `opts.input` and writes its NDJSON index.
pub fn index(opts: &IndexOptions) -> anyhow::Result<IndexSummary> {
    let output = opts.output.clone().unwrap_or_else(|| default_index_path(&opts.input));
    let input = fs::File::open(&opts.input).with_context(|| format!("opening {}", opts.input.display()))?;
    let writer = fs::File::create(&output).with_context(|| format!("creating {}", output.display()))?;

    info!("indexing {} -> {}", opts.input.display(), output.display());
    let summary = build_index(input, BufWriter::new(writer), opts.sync_policy)
        .with_context(|| format!("indexing {}", opts.input.display()))?;
    info!(
        "{} records, {} ns, {} clock anomalies, {} bytes",
        summary.records, summary.duration, summary.anomalies, summary.bytes
    );
    Ok(summary)
}

pub fn probe(opts: &IndexOptions) -> anyhow::Result<ProbeReport> {
    let input = fs::File::open(&opts.input).with_context(|| format!("opening {}", opts.input.display()))?;
    Ok(probe_reader(input, opts.sync_policy)?)
}

/// Runs the control listener with its session manager.
pub async fn serve(opts: ServeOptions) -> anyhow::Result<()> {
    let listener = TcpListener::bind(opts.listen)
        .await
        .with_context(|| format!("binding {}", opts.listen))?;
    let (manager, commands) = SessionManager::new(1);
    tokio::spawn(manager.run());
    let handler = Arc::new(SessionHandler::new(opts.media_root, opts.delivery, commands));
    control::serve(listener, handler).await?;
    Ok(())
}
