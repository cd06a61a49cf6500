//! Session control front end: a TCP listener that parses text requests and
//! hands them to a [`Handler`].

pub mod request;
pub mod session;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;

use crate::error::{PacerError, Result};
pub use request::{Method, Request, Response};
pub use session::{SessionCommand, SessionHandler, SessionManager};

/// Answers one validated request.
///
/// An `Err` is turned into a 500 response carrying the error text.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &Request, peer: SocketAddr) -> impl Future<Output = Result<Response>> + Send;
}

/// Maps a request-level fault to the status it is answered with
fn rejection_status(err: &PacerError) -> u16 {
    match err {
        PacerError::UnsupportedMethod(_) => 501,
        _ => 400,
    }
}

/// Serves requests on `stream` until the peer hangs up or the framing breaks.
pub async fn process<S, H>(stream: S, peer: SocketAddr, handler: &H) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    while let Some(head) = request::read_head(&mut reader).await? {
        let request = match Request::parse(&head) {
            Ok(request) => request,
            Err(e) => {
                warn!("rejecting request from {peer}: {e}");
                let cseq = head.cseq().unwrap_or(1);
                Response::new(rejection_status(&e))
                    .with_body(e.to_string())
                    .write_to(&mut write_half, cseq)
                    .await?;
                continue;
            }
        };

        debug!("{peer}: {} {} (CSeq {})", request.method, request.uri, request.cseq);
        let response = match handler.handle(&request, peer).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} {} failed: {e}", request.method, request.uri);
                Response::new(500).with_body(e.to_string())
            }
        };
        response.write_to(&mut write_half, request.cseq).await?;
    }
    Ok(())
}

/// Accepts connections forever, one task per connection.
pub async fn serve<H: Handler>(listener: TcpListener, handler: Arc<H>) -> Result<()> {
    info!("control listener on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("control connection from {peer}");
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            if let Err(e) = process(stream, peer, handler.as_ref()).await {
                warn!("control connection {peer} ended: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Echo;

    impl Handler for Echo {
        async fn handle(&self, request: &Request, _peer: SocketAddr) -> Result<Response> {
            match request.method {
                Method::Options => Ok(Response::ok().with_header("Public", "OPTIONS")),
                _ => Err(PacerError::InvalidData("boom".into())),
            }
        }
    }

    async fn exchange(input: &str) -> String {
        let (mut client, server) = tokio::io::duplex(4096);
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let task = tokio::spawn(async move { process(server, peer, &Echo).await });
        client.write_all(input.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        task.await.unwrap().unwrap();
        out
    }

    #[tokio::test]
    async fn answers_each_request_with_its_cseq() {
        let out = exchange("OPTIONS * RTSP/1.0\r\nCSeq: 2\r\n\r\nOPTIONS * RTSP/1.0\r\nCSeq: 3\r\n\r\n").await;
        assert_eq!(
            out,
            "RTSP/1.0 200 OK\r\nCSeq: 2\r\nPublic: OPTIONS\r\n\r\nRTSP/1.0 200 OK\r\nCSeq: 3\r\nPublic: OPTIONS\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn rejections_and_handler_errors() {
        let out = exchange("RECORD x RTSP/1.0\r\nCSeq: 5\r\n\r\nPLAY x RTSP/1.0\r\nCSeq: 6\r\n\r\n").await;
        assert!(out.starts_with("RTSP/1.0 501 Not Implemented\r\nCSeq: 5\r\n"));
        assert!(out.contains("RTSP/1.0 500 Internal Server Error\r\nCSeq: 6\r\n"));
        assert!(out.ends_with("invalid data: boom"));
    }

    #[tokio::test]
    async fn missing_cseq_is_bad_request() {
        let out = exchange("OPTIONS * RTSP/1.0\r\n\r\n").await;
        assert!(out.starts_with("RTSP/1.0 400 Bad Request\r\nCSeq: 1\r\n"));
        assert!(out.ends_with("missing required header: CSeq"));
    }
}
