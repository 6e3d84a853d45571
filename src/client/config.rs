//! Client options

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::cipher::SharedEncryptionProvider;
use crate::protocol::constants::RTMP_PORT;
use crate::protocol::handshake::{HandshakeConfig, SwfVerification, DEFAULT_CLIENT_VERSION};
use crate::registry::PublishMode;
use crate::session::request::{PLAY_LENGTH_UNBOUNDED, PLAY_START_LIVE};

/// Everything a client run needs to know
#[derive(Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub app: String,
    /// Name to play or publish
    pub stream_name: Option<String>,

    /// Save played media as FLV here
    pub save_as: Option<PathBuf>,
    /// FLV file to publish
    pub file_to_publish: Option<PathBuf>,
    /// Publish instead of play
    pub publish: Option<PublishMode>,

    /// Request an encrypted transport (rtmpe)
    pub encrypted: bool,

    /// Play start (ms); -2 continues from the live edge
    pub start: i32,
    /// Play length (ms); -1 plays to the end
    pub length: i32,
    /// Buffer hint sent with play (ms)
    pub buffer: u32,

    pub swf: Option<SwfVerification>,
    /// C1 version bytes; all zero selects the simple handshake
    pub client_version: [u8; 4],

    /// Concurrent players for a load run
    pub load: usize,
    /// Times a file is published back to back
    pub loop_count: usize,
    /// Upper bound on players running at once
    pub threads: usize,

    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub tcp_nodelay: bool,
    pub flash_ver: String,

    pub encryption: Option<SharedEncryptionProvider>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: RTMP_PORT,
            app: "vod".to_string(),
            stream_name: None,
            save_as: None,
            file_to_publish: None,
            publish: None,
            encrypted: false,
            start: PLAY_START_LIVE,
            length: PLAY_LENGTH_UNBOUNDED,
            buffer: 100,
            swf: None,
            client_version: DEFAULT_CLIENT_VERSION,
            load: 1,
            loop_count: 1,
            threads: 10,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            tcp_nodelay: true,
            flash_ver: "WIN 9,0,124,2".to_string(),
            encryption: None,
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("app", &self.app)
            .field("stream_name", &self.stream_name)
            .field("publish", &self.publish)
            .field("encrypted", &self.encrypted)
            .field("start", &self.start)
            .field("length", &self.length)
            .field("buffer", &self.buffer)
            .field("load", &self.load)
            .field("loop_count", &self.loop_count)
            .finish_non_exhaustive()
    }
}

impl ClientOptions {
    pub fn new(host: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            app: app.into(),
            ..Default::default()
        }
    }

    /// Parse `(rtmp|rtmpe)://host[:port]/app[/name]`
    pub fn parse_url(url: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid url: {}", url));

        let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
        let encrypted = match scheme.to_ascii_lowercase().as_str() {
            "rtmp" => false,
            "rtmpe" => true,
            _ => return Err(invalid()),
        };

        let (host_port, path) = rest.split_once('/').ok_or_else(invalid)?;
        let (host, port) = match host_port.split_once(':') {
            Some((h, p)) => (h, p.parse().map_err(|_| invalid())?),
            None => (host_port, RTMP_PORT),
        };
        if host.is_empty() {
            return Err(invalid());
        }

        let (app, name) = match path.split_once('/') {
            Some((a, n)) => (a, Some(n)),
            None => (path, None),
        };
        if app.is_empty() {
            return Err(invalid());
        }

        tracing::debug!(host = host, port = port, app = app, name = ?name, encrypted = encrypted, "Parsed url");
        Ok(Self {
            host: host.to_string(),
            port,
            app: app.to_string(),
            stream_name: name.filter(|n| !n.is_empty()).map(str::to_string),
            encrypted,
            ..Default::default()
        })
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = Some(name.into());
        self
    }

    pub fn save_as(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_as = Some(path.into());
        self
    }

    pub fn publish_file(mut self, path: impl Into<PathBuf>, mode: PublishMode) -> Self {
        self.file_to_publish = Some(path.into());
        self.publish = Some(mode);
        self
    }

    pub fn range(mut self, start: i32, length: i32) -> Self {
        self.start = start;
        self.length = length;
        self
    }

    pub fn buffer(mut self, buffer_ms: u32) -> Self {
        self.buffer = buffer_ms;
        self
    }

    pub fn load(mut self, load: usize, threads: usize) -> Self {
        self.load = load;
        self.threads = threads;
        self
    }

    pub fn loop_count(mut self, count: usize) -> Self {
        self.loop_count = count;
        self
    }

    pub fn client_version(mut self, version: [u8; 4]) -> Self {
        self.client_version = version;
        self
    }

    pub fn encryption(mut self, provider: SharedEncryptionProvider) -> Self {
        self.encryption = Some(provider);
        self
    }

    /// Compute SWF verification data from a local SWF file
    pub async fn swf_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let swf = SwfVerification::from_swf(&bytes)?;
        tracing::info!(path = %path.display(), size = swf.size, "SWF verification initialized");
        self.swf = Some(swf);
        Ok(self)
    }

    /// Reject option combinations a run cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.publish.is_some() && self.load > 1 {
            return Err(Error::Config("cannot publish in load testing mode".into()));
        }
        if self.publish.is_none() && self.loop_count > 1 {
            return Err(Error::Config("cannot loop when not in publish mode".into()));
        }
        if self.load == 0 || self.threads == 0 || self.loop_count == 0 {
            return Err(Error::Config("load, threads and loop must be positive".into()));
        }
        if self.encrypted && self.encryption.is_none() {
            return Err(Error::Config("rtmpe requires an encryption provider".into()));
        }
        Ok(())
    }

    pub fn tc_url(&self) -> String {
        let scheme = if self.encrypted { "rtmpe" } else { "rtmp" };
        format!("{}://{}:{}/{}", scheme, self.host, self.port, self.app)
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            client_version: Some(self.client_version),
            encrypted: self.encrypted,
            swf: self.swf.clone(),
            validate_peer_digest: false,
            encryption: self.encryption.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_parsing() {
        let options = ClientOptions::parse_url("rtmp://localhost/live/test").unwrap();
        assert_eq!(options.host, "localhost");
        assert_eq!(options.port, 1935);
        assert_eq!(options.app, "live");
        assert_eq!(options.stream_name, Some("test".into()));
        assert!(!options.encrypted);

        let options = ClientOptions::parse_url("rtmpe://example.com:1936/app").unwrap();
        assert_eq!(options.host, "example.com");
        assert_eq!(options.port, 1936);
        assert_eq!(options.app, "app");
        assert_eq!(options.stream_name, None);
        assert!(options.encrypted);
        assert_eq!(options.tc_url(), "rtmpe://example.com:1936/app");
    }

    #[test]
    fn test_url_rejections() {
        assert!(ClientOptions::parse_url("http://host/app").is_err());
        assert!(ClientOptions::parse_url("rtmp://host").is_err());
        assert!(ClientOptions::parse_url("rtmp://host:port/app").is_err());
        assert!(ClientOptions::parse_url("rtmp:///app").is_err());
    }

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.start, -2);
        assert_eq!(options.length, -1);
        assert_eq!(options.buffer, 100);
        assert_eq!(options.load, 1);
        assert_eq!(options.loop_count, 1);
        assert_eq!(options.threads, 10);
        assert_eq!(options.client_version, [0x09, 0x00, 0x7C, 0x02]);
        assert_eq!(options.tc_url(), "rtmp://localhost:1935/vod");
    }

    #[test]
    fn test_validation() {
        let publish = ClientOptions::default().publish_file("a.flv", PublishMode::Live);
        assert!(publish.clone().validate().is_ok());
        assert!(publish.load(2, 10).validate().is_err());
        assert!(ClientOptions::default().loop_count(3).validate().is_err());
        let mut rtmpe = ClientOptions::default();
        rtmpe.encrypted = true;
        assert!(rtmpe.validate().is_err());
    }

    #[tokio::test]
    async fn test_swf_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.swf");
        tokio::fs::write(&path, b"FWS-not-really-a-movie").await.unwrap();
        let options = ClientOptions::default().swf_file(&path).await.unwrap();
        let swf = options.swf.unwrap();
        assert_eq!(swf.size, 22);
        assert_eq!(swf, SwfVerification::from_swf(b"FWS-not-really-a-movie").unwrap());
    }
}
