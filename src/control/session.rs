//! PLAY/TEARDOWN handling on top of the delivery engine.
//!
//! The handler only validates requests and turns them into
//! [`SessionCommand`]s; the [`SessionManager`] task owns every running
//! session and its stop signal.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::request::{Method, Request, Response};
use super::Handler;
use crate::core::{media_paths, spawn_session};
use crate::deliver::DeliveryReport;
use crate::error::{PacerError, Result};
use crate::types::DeliveryConfig;

const PUBLIC_METHODS: &str = "OPTIONS, PLAY, TEARDOWN";

#[derive(Debug)]
pub enum SessionCommand {
    Start {
        id: String,
        base: PathBuf,
        target: SocketAddr,
        config: DeliveryConfig,
        reply: oneshot::Sender<bool>,
    },
    Stop {
        id: String,
        reply: oneshot::Sender<bool>,
    },
}

struct Running {
    stop: watch::Sender<bool>,
    task: JoinHandle<anyhow::Result<DeliveryReport>>,
    target: SocketAddr,
}

/// Owns the running sessions; driven by [`SessionCommand`]s.
pub struct SessionManager {
    commands: mpsc::Receiver<SessionCommand>,
    sessions: HashMap<String, Running>,
    multicast_ttl: u32,
}

impl SessionManager {
    pub fn new(multicast_ttl: u32) -> (Self, mpsc::Sender<SessionCommand>) {
        let (tx, rx) = mpsc::channel(64);
        let manager = Self {
            commands: rx,
            sessions: HashMap::new(),
            multicast_ttl,
        };
        (manager, tx)
    }

    /// Runs until every command sender is gone, then stops what is left.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.reap();
            match command {
                SessionCommand::Start {
                    id,
                    base,
                    target,
                    config,
                    reply,
                } => {
                    let started = !self.sessions.contains_key(&id);
                    if started {
                        info!("session {id}: {} -> {target}", base.display());
                        let (stop, stop_rx) = watch::channel(false);
                        let task = spawn_session(base, target, self.multicast_ttl, config, stop_rx);
                        self.sessions.insert(id, Running { stop, task, target });
                    } else {
                        warn!("session {id} already running");
                    }
                    let _ = reply.send(started);
                }
                SessionCommand::Stop { id, reply } => {
                    let found = match self.sessions.remove(&id) {
                        Some(running) => {
                            info!("session {id}: stopping delivery to {}", running.target);
                            let _ = running.stop.send(true);
                            true
                        }
                        None => false,
                    };
                    let _ = reply.send(found);
                }
            }
        }

        for (id, running) in self.sessions.drain() {
            info!("session {id}: shutting down");
            let _ = running.stop.send(true);
            if let Ok(Err(e)) = running.task.await {
                error!("session {id}: {e:#}");
            }
        }
    }

    /// Drops finished sessions so their ids can be reused.
    fn reap(&mut self) {
        self.sessions.retain(|id, running| {
            let done = running.task.is_finished();
            if done {
                info!("session {id} finished");
            }
            !done
        });
    }
}

/// Destination from a `Transport` header: `destination=` (defaults to the
/// peer address) and the first port of `client_port=`.
pub fn transport_target(transport: &str, peer: IpAddr) -> Option<SocketAddr> {
    let mut ip = peer;
    let mut port = None;
    for param in transport.split(';').map(str::trim) {
        if let Some(v) = param.strip_prefix("destination=") {
            ip = v.parse().ok()?;
        } else if let Some(v) = param.strip_prefix("client_port=") {
            port = v.split('-').next().and_then(|p| p.parse().ok());
        }
    }
    port.map(|p| SocketAddr::new(ip, p))
}

/// Path part of a request URI, relative to the media root. `None` if it
/// tries to leave the root.
pub fn media_path(uri: &str) -> Option<PathBuf> {
    let path = match uri.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, p)| p),
        None => uri,
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let rel = Path::new(path.trim_start_matches('/'));
    if rel.as_os_str().is_empty() || rel.components().any(|c| !matches!(c, Component::Normal(_))) {
        return None;
    }
    Some(rel.to_path_buf())
}

/// Control handler serving files under `media_root`.
pub struct SessionHandler {
    media_root: PathBuf,
    delivery: DeliveryConfig,
    commands: mpsc::Sender<SessionCommand>,
    next_id: AtomicU64,
}

impl SessionHandler {
    pub fn new(media_root: PathBuf, delivery: DeliveryConfig, commands: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            media_root,
            delivery,
            commands,
            next_id: AtomicU64::new(1),
        }
    }

    async fn command(&self, make: impl FnOnce(oneshot::Sender<bool>) -> SessionCommand) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| PacerError::InvalidData("session manager is gone".into()))?;
        rx.await
            .map_err(|_| PacerError::InvalidData("session manager dropped the request".into()))
    }

    async fn play(&self, request: &Request, peer: SocketAddr) -> Result<Response> {
        let Some(rel) = media_path(&request.uri) else {
            return Ok(Response::new(403).with_body(format!("bad media path {}", request.uri)));
        };
        let base = self.media_root.join(rel);
        let (ts, aux) = media_paths(&base);
        if !tokio::fs::try_exists(&ts).await? || !tokio::fs::try_exists(&aux).await? {
            return Ok(Response::new(404));
        }

        let transport = request.header("Transport").unwrap_or_default();
        let Some(target) = transport_target(transport, peer.ip()) else {
            return Ok(Response::new(461).with_body("Transport needs client_port"));
        };

        let id = match request.header("Session") {
            Some(id) => id.to_string(),
            None => format!("{:08X}", self.next_id.fetch_add(1, Ordering::Relaxed)),
        };
        let config = self.delivery;
        let started = self
            .command(|reply| SessionCommand::Start {
                id: id.clone(),
                base,
                target,
                config,
                reply,
            })
            .await?;
        if !started {
            return Ok(Response::new(455).with_header("Session", id));
        }
        Ok(Response::ok()
            .with_header("Session", id)
            .with_header("Transport", transport))
    }

    async fn teardown(&self, request: &Request) -> Result<Response> {
        let Some(id) = request.header("Session").map(str::to_string) else {
            return Ok(Response::new(454));
        };
        let found = self.command(|reply| SessionCommand::Stop { id, reply }).await?;
        Ok(if found { Response::ok() } else { Response::new(454) })
    }
}

impl Handler for SessionHandler {
    async fn handle(&self, request: &Request, peer: SocketAddr) -> Result<Response> {
        match request.method {
            Method::Options => Ok(Response::ok().with_header("Public", PUBLIC_METHODS)),
            Method::Play => self.play(request, peer).await,
            Method::Teardown => self.teardown(request).await,
            _ => Ok(Response::new(501)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CHUNK_SIZE;
    use crate::network::bind_receiver;
    use pretty_assertions::assert_eq;

    fn request(method: Method, uri: &str, headers: &[(&str, &str)]) -> Request {
        Request {
            method,
            uri: uri.to_string(),
            version: "RTSP/1.0".to_string(),
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            cseq: 1,
        }
    }

    #[test]
    fn transport_target_defaults_to_peer() {
        let peer: IpAddr = "10.0.0.5".parse().unwrap();
        assert_eq!(
            transport_target("RTP/AVP;unicast;client_port=5000-5001", peer),
            Some("10.0.0.5:5000".parse().unwrap())
        );
        assert_eq!(
            transport_target("MP2T/UDP;destination=239.1.1.1;client_port=1234", peer),
            Some("239.1.1.1:1234".parse().unwrap())
        );
        assert_eq!(transport_target("RTP/AVP;unicast", peer), None);
    }

    #[test]
    fn media_path_stays_under_root() {
        assert_eq!(media_path("rtsp://host:554/movies/a"), Some(PathBuf::from("movies/a")));
        assert_eq!(media_path("/movies/a?x=1"), Some(PathBuf::from("movies/a")));
        assert_eq!(media_path("rtsp://host/../etc/passwd"), None);
        assert_eq!(media_path("rtsp://host"), None);
    }

    #[tokio::test]
    async fn play_then_teardown() {
        let dir = std::env::temp_dir().join(format!("mpegts_pacer_session_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        // one chunk per second of stream time, so the session is still pacing at TEARDOWN
        std::fs::write(dir.join("clip.ts"), vec![0x47u8; 20 * CHUNK_SIZE]).unwrap();
        let aux: Vec<u8> = (0..20u64).flat_map(|k| (k * 27_000_000).to_be_bytes()).collect();
        std::fs::write(dir.join("clip.aux"), aux).unwrap();

        let rx = bind_receiver("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = rx.local_addr().unwrap().port().to_string();
        let transport = format!("MP2T/UDP;client_port={port}");
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        let (manager, commands) = SessionManager::new(1);
        let manager = tokio::spawn(manager.run());
        let handler = SessionHandler::new(dir.clone(), DeliveryConfig::default(), commands);

        let resp = handler
            .handle(&request(Method::Play, "rtsp://h/clip", &[("Transport", &transport), ("Session", "S1")]), peer)
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.headers[0], ("Session".to_string(), "S1".to_string()));

        let mut buf = [0u8; 2048];
        assert_eq!(rx.recv(&mut buf).await.unwrap(), CHUNK_SIZE);

        let resp = handler.handle(&request(Method::Teardown, "rtsp://h/clip", &[("Session", "S1")]), peer).await.unwrap();
        assert_eq!(resp.status, 200);
        let resp = handler.handle(&request(Method::Teardown, "rtsp://h/clip", &[("Session", "S1")]), peer).await.unwrap();
        assert_eq!(resp.status, 454);

        let resp = handler.handle(&request(Method::Play, "rtsp://h/missing", &[("Transport", &transport)]), peer).await.unwrap();
        assert_eq!(resp.status, 404);
        let resp = handler.handle(&request(Method::Describe, "rtsp://h/clip", &[]), peer).await.unwrap();
        assert_eq!(resp.status, 501);

        drop(handler);
        manager.await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}
