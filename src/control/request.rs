//! Request/response framing for the text control protocol
//! (`METHOD uri VERSION` line, `Name: value` headers, blank line).

use std::fmt;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{PacerError, Result};

pub const PROTOCOL_VERSION: &str = "RTSP/1.0";

/// Upper bound for a single request line or header line
const MAX_LINE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    Announce,
    GetParameter,
    SetParameter,
    Options,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::Describe,
        Method::Setup,
        Method::Play,
        Method::Pause,
        Method::Teardown,
        Method::Announce,
        Method::GetParameter,
        Method::SetParameter,
        Method::Options,
    ];

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "DESCRIBE" => Some(Method::Describe),
            "SETUP" => Some(Method::Setup),
            "PLAY" => Some(Method::Play),
            "PAUSE" => Some(Method::Pause),
            "TEARDOWN" => Some(Method::Teardown),
            "ANNOUNCE" => Some(Method::Announce),
            "GET_PARAMETER" => Some(Method::GetParameter),
            "SET_PARAMETER" => Some(Method::SetParameter),
            "OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Describe => "DESCRIBE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
            Method::Announce => "ANNOUNCE",
            Method::GetParameter => "GET_PARAMETER",
            Method::SetParameter => "SET_PARAMETER",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason phrase for the status codes this server emits.
pub const fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Moved Temporarily",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        415 => "Unsupported Media Type",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        457 => "Invalid Range",
        461 => "Unsupported transport",
        462 => "Destination unreachable",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

/// Raw request head as read off the wire, before validation.
#[derive(Debug, Clone, Default)]
pub struct RequestHead {
    pub line: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// CSeq if present and numeric, used to answer rejected requests.
    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").and_then(|v| v.parse().ok())
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub version: String,
    /// in arrival order
    pub headers: Vec<(String, String)>,
    pub cseq: u32,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn parse(head: &RequestHead) -> Result<Self> {
        let (method, uri, version) = parse_request_line(&head.line)?;
        let cseq = head
            .header("CSeq")
            .ok_or(PacerError::MissingHeader("CSeq"))?
            .parse()
            .map_err(|_| PacerError::InvalidData(format!("bad CSeq in request for {uri}")))?;
        Ok(Self {
            method,
            uri,
            version,
            headers: head.headers.clone(),
            cseq,
        })
    }
}

/// Splits a request line into method, uri and version.
///
/// The line must carry exactly three whitespace separated tokens.
pub fn parse_request_line(line: &str) -> Result<(Method, String, String)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let [method, uri, version] = tokens.as_slice() else {
        return Err(PacerError::MalformedRequestLine(line.to_string()));
    };
    let method = Method::from_token(method).ok_or_else(|| PacerError::UnsupportedMethod(method.to_string()))?;
    Ok((method, uri.to_string(), version.to_string()))
}

fn parse_header_line(line: &str) -> Result<(String, String)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| PacerError::InvalidData(format!("header without colon: {line:?}")))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, line: &mut String) -> Result<usize> {
    line.clear();
    let n = reader.read_line(line).await?;
    if line.len() > MAX_LINE {
        return Err(PacerError::InvalidData(format!("line longer than {MAX_LINE} bytes")));
    }
    while line.ends_with(['\r', '\n']) {
        line.pop();
    }
    Ok(n)
}

/// Reads one request head. `None` when the peer closed the connection
/// between requests.
pub async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<RequestHead>> {
    let mut line = String::new();
    // tolerate blank lines between requests
    loop {
        if read_line(reader, &mut line).await? == 0 {
            return Ok(None);
        }
        if !line.is_empty() {
            break;
        }
    }

    let mut head = RequestHead {
        line: line.clone(),
        headers: Vec::new(),
    };
    loop {
        if read_line(reader, &mut line).await? == 0 {
            return Err(PacerError::ConnectionClosed);
        }
        if line.is_empty() {
            return Ok(Some(head));
        }
        head.headers.push(parse_header_line(&line)?);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn encode(&self, cseq: u32) -> String {
        let mut out = format!("{PROTOCOL_VERSION} {} {}\r\n", self.status, status_text(self.status));
        out.push_str(&format!("CSeq: {cseq}\r\n"));
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        if !self.body.is_empty() {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W, cseq: u32) -> Result<()> {
        writer.write_all(self.encode(cseq).as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}
