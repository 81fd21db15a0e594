//! ClamAV daemon client speaking the clamd INSTREAM protocol over TCP

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::ScannerConfig;
use crate::error::{Error, Result};

use super::MalwareScanner;

const INSTREAM_COMMAND: &[u8] = b"zINSTREAM\0";
const PING_COMMAND: &[u8] = b"zPING\0";
const REPLY_BUFFER: usize = 512;

pub const THREAT_UNKNOWN: &str = "UNKNOWN_THREAT";
pub const THREAT_SCAN_ERROR: &str = "SCAN_ERROR";
pub const THREAT_EMPTY_RESPONSE: &str = "EMPTY_RESPONSE";
pub const THREAT_UNEXPECTED_RESPONSE: &str = "UNEXPECTED_RESPONSE";
pub const THREAT_SCAN_FAILED: &str = "SCAN_FAILED";

/// Classification of a daemon reply
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanVerdict {
    Clean,
    Infected,
    ScanError,
    EmptyResponse,
    UnexpectedResponse,
    /// Scanning is switched off; nothing was sent
    Skipped,
}

/// Outcome of one scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub verdict: ScanVerdict,
    /// Anything other than an explicit OK is not clean
    pub is_clean: bool,
    pub threat_name: Option<String>,
    /// Reply as received, trimmed
    pub raw_response: String,
    pub scanned_at: DateTime<Utc>,
}

impl ScanResult {
    fn new(verdict: ScanVerdict, threat_name: Option<&str>, raw: &str) -> Self {
        Self {
            verdict,
            is_clean: matches!(verdict, ScanVerdict::Clean | ScanVerdict::Skipped),
            threat_name: threat_name.map(str::to_string),
            raw_response: raw.to_string(),
            scanned_at: Utc::now(),
        }
    }

    pub fn skipped() -> Self {
        Self::new(ScanVerdict::Skipped, None, "")
    }

    /// Threat name for not-clean results, "Clean" otherwise
    pub fn label(&self) -> &str {
        match &self.threat_name {
            Some(name) if !self.is_clean => name,
            _ => "Clean",
        }
    }
}

/// Classify a clamd reply.
///
/// `stream: OK` is clean; `stream: <name> FOUND` is infected with `<name>`;
/// anything else is not clean.
pub fn parse_response(raw: &str) -> ScanResult {
    let response = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());

    if response.is_empty() {
        return ScanResult::new(ScanVerdict::EmptyResponse, Some(THREAT_EMPTY_RESPONSE), response);
    }

    if response.ends_with("OK") {
        return ScanResult::new(ScanVerdict::Clean, None, response);
    }

    if let Some(found_at) = response.rfind("FOUND") {
        let before = &response[..found_at];
        let name = match before.rfind(':') {
            Some(colon) => &before[colon + 1..],
            None => before,
        }
        .trim();
        let name = if name.is_empty() { THREAT_UNKNOWN } else { name };
        return ScanResult::new(ScanVerdict::Infected, Some(name), response);
    }

    if response.contains("ERROR") {
        return ScanResult::new(ScanVerdict::ScanError, Some(THREAT_SCAN_ERROR), response);
    }

    ScanResult::new(
        ScanVerdict::UnexpectedResponse,
        Some(THREAT_UNEXPECTED_RESPONSE),
        response,
    )
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> Error {
    Error::ScannerUnavailable(format!("{}: {}", context, err))
}

/// Client for a clamd daemon
pub struct ClamAvScanner {
    config: ScannerConfig,
}

impl ClamAvScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Stream everything `reader` yields to the daemon and classify the reply.
    ///
    /// Connection failures and timeouts surface as [`Error::ScannerUnavailable`];
    /// callers must treat that as not clean.
    pub async fn scan_reader<R>(&self, reader: R) -> Result<ScanResult>
    where
        R: AsyncRead + Unpin + Send,
    {
        if !self.config.enabled {
            tracing::debug!("Virus scanning disabled, skipping scan");
            return Ok(ScanResult::skipped());
        }

        let secs = self.config.timeout_secs;
        match timeout(Duration::from_secs(secs), self.instream(reader)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ScannerUnavailable(format!(
                "no verdict from {} within {}s",
                self.address(),
                secs
            ))),
        }
    }

    async fn instream<R>(&self, mut reader: R) -> Result<ScanResult>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut stream = TcpStream::connect(self.address())
            .await
            .map_err(|e| unavailable(&format!("connect to {}", self.address()), e))?;

        stream
            .write_all(INSTREAM_COMMAND)
            .await
            .map_err(|e| unavailable("send INSTREAM", e))?;

        let chunk_size = self.config.stream_chunk_size;
        let mut buf = vec![0u8; chunk_size];
        let mut frame = BytesMut::with_capacity(chunk_size + 4);
        let mut total = 0usize;

        loop {
            let n = read_full(&mut reader, &mut buf).await?;
            if n == 0 {
                break;
            }

            frame.clear();
            frame.put_u32(n as u32);
            frame.extend_from_slice(&buf[..n]);

            if let Err(e) = stream.write_all(&frame).await {
                // clamd closes the socket early when a limit is hit but still
                // leaves its reason in the receive buffer
                return match read_reply(&mut stream).await {
                    Ok(reply) if !reply.trim().is_empty() => Ok(parse_response(&reply)),
                    _ => Err(unavailable("stream payload", e)),
                };
            }
            total += n;
        }

        frame.clear();
        frame.put_u32(0);
        stream
            .write_all(&frame)
            .await
            .map_err(|e| unavailable("terminate stream", e))?;
        stream.flush().await.map_err(|e| unavailable("flush", e))?;

        let reply = read_reply(&mut stream)
            .await
            .map_err(|e| unavailable("read reply", e))?;

        tracing::debug!("clamd reply for {} bytes: {}", total, reply.trim());
        Ok(parse_response(&reply))
    }

    /// Probe the daemon with PING. Never errors.
    pub async fn ping(&self) -> bool {
        let deadline = Duration::from_secs(self.config.ping_timeout_secs);
        let probe = async {
            let mut stream = TcpStream::connect(self.address()).await?;
            stream.write_all(PING_COMMAND).await?;
            read_reply(&mut stream).await
        };

        match timeout(deadline, probe).await {
            Ok(Ok(reply)) => reply.contains("PONG"),
            Ok(Err(e)) => {
                tracing::warn!("ClamAV not reachable at {}: {}", self.address(), e);
                false
            }
            Err(_) => {
                tracing::warn!(
                    "ClamAV at {} did not answer PING within {}s",
                    self.address(),
                    deadline.as_secs()
                );
                false
            }
        }
    }
}

#[async_trait]
impl MalwareScanner for ClamAvScanner {
    async fn scan_bytes(&self, data: &[u8]) -> Result<ScanResult> {
        self.scan_reader(data).await
    }

    async fn scan_file(&self, path: &Path) -> Result<ScanResult> {
        if !self.config.enabled {
            return Ok(ScanResult::skipped());
        }
        let file = tokio::fs::File::open(path).await?;
        self.scan_reader(file).await
    }

    async fn is_available(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        self.ping().await
    }

    fn name(&self) -> &str {
        "clamav"
    }
}

/// Fill `buf` unless the reader ends first; returns bytes read
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read one reply: up to a NUL, a newline, EOF or the reply buffer size
async fn read_reply(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut reply = Vec::with_capacity(REPLY_BUFFER);
    let mut buf = [0u8; REPLY_BUFFER];

    while reply.len() < REPLY_BUFFER {
        let n = stream.read(&mut buf[..REPLY_BUFFER - reply.len()]).await?;
        if n == 0 {
            break;
        }
        reply.extend_from_slice(&buf[..n]);
        if reply.iter().any(|b| *b == 0 || *b == b'\n') {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&reply).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_clean() {
        let result = parse_response("stream: OK\0");
        assert_eq!(result.verdict, ScanVerdict::Clean);
        assert!(result.is_clean);
        assert_eq!(result.label(), "Clean");
    }

    #[test]
    fn test_parse_found() {
        let result = parse_response("stream: Eicar-Test-Signature FOUND");
        assert_eq!(result.verdict, ScanVerdict::Infected);
        assert!(!result.is_clean);
        assert_eq!(result.threat_name.as_deref(), Some("Eicar-Test-Signature"));
    }

    #[test]
    fn test_parse_found_uses_last_colon() {
        let result = parse_response("1: stream: Win.Test.Sample:1 FOUND");
        assert_eq!(result.threat_name.as_deref(), Some("1"));

        let result = parse_response("stream:  FOUND");
        assert_eq!(result.threat_name.as_deref(), Some(THREAT_UNKNOWN));
    }

    #[test]
    fn test_parse_not_clean_variants() {
        let error = parse_response("stream: ERROR");
        assert_eq!(error.verdict, ScanVerdict::ScanError);
        assert!(!error.is_clean);
        assert_eq!(error.threat_name.as_deref(), Some(THREAT_SCAN_ERROR));

        let empty = parse_response("");
        assert_eq!(empty.verdict, ScanVerdict::EmptyResponse);
        assert!(!empty.is_clean);

        let odd = parse_response("what is this");
        assert_eq!(odd.verdict, ScanVerdict::UnexpectedResponse);
        assert!(!odd.is_clean);
    }

    /// Accept one connection, decode the INSTREAM framing and answer with `reply`
    async fn fake_clamd(reply: &'static str) -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = [0u8; 10];
            socket.read_exact(&mut command).await.unwrap();
            assert_eq!(&command, INSTREAM_COMMAND);

            let mut payload = Vec::new();
            loop {
                let len = socket.read_u32().await.unwrap() as usize;
                if len == 0 {
                    break;
                }
                assert!(len <= 2048);
                let mut chunk = vec![0u8; len];
                socket.read_exact(&mut chunk).await.unwrap();
                payload.extend_from_slice(&chunk);
            }

            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.write_all(b"\0").await.unwrap();
            payload
        });

        (port, handle)
    }

    fn config(port: u16) -> ScannerConfig {
        ScannerConfig {
            host: "127.0.0.1".to_string(),
            port,
            timeout_secs: 5,
            ..ScannerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_instream_round_trip() {
        let (port, server) = fake_clamd("stream: OK").await;
        let scanner = ClamAvScanner::new(config(port));

        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let result = scanner.scan_bytes(&data).await.unwrap();

        assert!(result.is_clean);
        assert_eq!(server.await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_infected_reply() {
        let (port, _server) = fake_clamd("stream: Eicar-Test-Signature FOUND").await;
        let scanner = ClamAvScanner::new(config(port));

        let result = scanner.scan_bytes(b"X5O!P%@AP").await.unwrap();
        assert_eq!(result.verdict, ScanVerdict::Infected);
        assert_eq!(result.label(), "Eicar-Test-Signature");
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_an_error() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let scanner = ClamAvScanner::new(config(port));

        let result = scanner.scan_bytes(b"data").await;
        assert!(matches!(result, Err(Error::ScannerUnavailable(_))));
        assert!(!scanner.ping().await);
    }

    #[tokio::test]
    async fn test_disabled_scanner_never_connects() {
        let scanner = ClamAvScanner::new(ScannerConfig {
            enabled: false,
            port: 1,
            ..ScannerConfig::default()
        });

        let result = scanner.scan_bytes(b"anything").await.unwrap();
        assert!(result.is_clean);
        assert_eq!(result.verdict, ScanVerdict::Skipped);
        assert!(scanner.is_available().await);
    }

    #[tokio::test]
    async fn test_ping() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = [0u8; 6];
            socket.read_exact(&mut command).await.unwrap();
            assert_eq!(&command, PING_COMMAND);
            socket.write_all(b"PONG\0").await.unwrap();
        });

        let scanner = ClamAvScanner::new(config(port));
        assert!(scanner.ping().await);
    }
}
