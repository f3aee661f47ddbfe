//! Decoder input sources
//!
//! Lines come from stdin, a file, a dump1090 network port or a decoder
//! process we spawn ourselves. `aircraft.json` snapshots come from a file
//! or are polled over HTTP.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adsb::InputFormat;

/// Where decoder output is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// `-`
    Stdin,
    /// A path
    File(PathBuf),
    /// `tcp://host:port`
    Tcp(String),
    /// `exec:program args…`
    Exec { program: String, args: Vec<String> },
    /// `http://…` or `https://…`
    Http(String),
}

impl FromStr for SourceSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("empty source");
        }
        if s == "-" {
            return Ok(Self::Stdin);
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.is_empty() || !addr.contains(':') {
                bail!("tcp source needs host:port, got {:?}", s);
            }
            return Ok(Self::Tcp(addr.to_string()));
        }
        if let Some(cmd) = s.strip_prefix("exec:") {
            let mut words = cmd.split_whitespace().map(str::to_string);
            let program = words
                .next()
                .with_context(|| format!("exec source without a program: {:?}", s))?;
            return Ok(Self::Exec {
                program,
                args: words.collect(),
            });
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(Self::Http(s.to_string()));
        }
        Ok(Self::File(PathBuf::from(s)))
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Exec { program, args } => write!(f, "exec:{} {}", program, args.join(" ")),
            Self::Http(url) => write!(f, "{}", url),
        }
    }
}

type Reader = Box<dyn AsyncBufRead + Unpin + Send>;

enum Inner {
    Lines(Reader),
    Document(Option<String>),
    Poll {
        client: reqwest::Client,
        url: String,
        ticker: Interval,
    },
}

/// An open input, yielding lines or whole documents depending on the format
pub struct Source {
    inner: Inner,
    child: Option<Child>,
    stderr_task: Option<JoinHandle<()>>,
    buf: Vec<u8>,
}

impl Source {
    pub async fn open(spec: &SourceSpec, format: InputFormat, poll_interval: Duration) -> Result<Self> {
        let mut child = None;
        let mut stderr_task = None;

        let reader: Reader = match spec {
            SourceSpec::Http(url) => {
                if format != InputFormat::Json {
                    bail!("{} input cannot be polled over HTTP, use the json format", format);
                }
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(30))
                    .build()
                    .context("Failed to build HTTP client")?;
                let mut ticker = interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                info!("Polling {} every {:?}", url, poll_interval);
                return Ok(Self::with(Inner::Poll {
                    client,
                    url: url.clone(),
                    ticker,
                }));
            }
            SourceSpec::Stdin => Box::new(BufReader::new(tokio::io::stdin())),
            SourceSpec::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                Box::new(BufReader::new(file))
            }
            SourceSpec::Tcp(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .with_context(|| format!("Failed to connect to {}", addr))?;
                info!("Connected to {}", addr);
                Box::new(BufReader::new(stream))
            }
            SourceSpec::Exec { program, args } => {
                info!("Starting decoder: {} {}", program, args.join(" "));
                let mut process = Command::new(program)
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()
                    .with_context(|| format!("Failed to spawn {}", program))?;

                let stdout = process
                    .stdout
                    .take()
                    .context("Failed to capture decoder stdout")?;
                let stderr = process
                    .stderr
                    .take()
                    .context("Failed to capture decoder stderr")?;

                // Decoders chat on stderr; that is informational, not an error
                let name = program.clone();
                stderr_task = Some(tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if !line.is_empty() {
                            info!("{}: {}", name, line);
                        }
                    }
                }));
                child = Some(process);
                Box::new(BufReader::new(stdout))
            }
        };

        let inner = if format.is_line_oriented() {
            Inner::Lines(reader)
        } else {
            if matches!(spec, SourceSpec::Tcp(_) | SourceSpec::Exec { .. }) {
                bail!("json input needs a file, stdin or an http(s) URL, not {}", spec);
            }
            let mut reader = reader;
            let mut doc = String::new();
            reader
                .read_to_string(&mut doc)
                .await
                .with_context(|| format!("Failed to read {}", spec))?;
            Inner::Document(Some(doc))
        };

        let mut source = Self::with(inner);
        source.child = child;
        source.stderr_task = stderr_task;
        Ok(source)
    }

    /// Line source over any buffered reader
    #[cfg(test)]
    pub(crate) fn from_lines<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        Self::with(Inner::Lines(Box::new(reader)))
    }

    fn with(inner: Inner) -> Self {
        Self {
            inner,
            child: None,
            stderr_task: None,
            buf: Vec::new(),
        }
    }

    /// Next line or document; `None` once the input is exhausted.
    ///
    /// Cancel safe: a line interrupted by another `select!` branch is
    /// completed by the next call. Read errors are fatal. Invalid UTF-8 is
    /// not: the line is passed on lossily and left for the parser to reject.
    pub async fn next_chunk(&mut self) -> Result<Option<String>> {
        match &mut self.inner {
            Inner::Lines(reader) => {
                // `buf` keeps whatever a cancelled call had already read
                let n = reader
                    .read_until(b'\n', &mut self.buf)
                    .await
                    .context("Failed to read decoder input")?;
                if n == 0 && self.buf.is_empty() {
                    self.finish().await?;
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                Ok(Some(line))
            }
            Inner::Document(doc) => Ok(doc.take()),
            Inner::Poll {
                client,
                url,
                ticker,
            } => {
                ticker.tick().await;
                debug!("GET {}", url);
                let body = client
                    .get(url.as_str())
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .with_context(|| format!("Failed to fetch {}", url))?
                    .text()
                    .await
                    .with_context(|| format!("Failed to read response from {}", url))?;
                Ok(Some(body))
            }
        }
    }

    /// Reap a spawned decoder; a failing decoder means we lost our input
    async fn finish(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let status = child.wait().await.context("Failed to wait for decoder")?;
            if let Some(task) = self.stderr_task.take() {
                let _ = task.await;
            }
            if !status.success() {
                bail!("decoder exited with {}", status);
            }
            info!("Decoder exited cleanly");
        }
        Ok(())
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        if self.child.is_some() {
            warn!("Stopping decoder process");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_parse_source_spec() {
        assert_eq!("-".parse::<SourceSpec>().unwrap(), SourceSpec::Stdin);
        assert_eq!(
            "capture.txt".parse::<SourceSpec>().unwrap(),
            SourceSpec::File(PathBuf::from("capture.txt"))
        );
        assert_eq!(
            "tcp://raspberrypi.local:30003".parse::<SourceSpec>().unwrap(),
            SourceSpec::Tcp("raspberrypi.local:30003".to_string())
        );
        assert_eq!(
            "exec:dump1090 --net --quiet".parse::<SourceSpec>().unwrap(),
            SourceSpec::Exec {
                program: "dump1090".to_string(),
                args: vec!["--net".to_string(), "--quiet".to_string()],
            }
        );
        assert_eq!(
            "http://pi/dump1090/data/aircraft.json".parse::<SourceSpec>().unwrap(),
            SourceSpec::Http("http://pi/dump1090/data/aircraft.json".to_string())
        );
    }

    #[test]
    fn test_parse_source_spec_errors() {
        assert!("".parse::<SourceSpec>().is_err());
        assert!("tcp://".parse::<SourceSpec>().is_err());
        assert!("tcp://nohost".parse::<SourceSpec>().is_err());
        assert!("exec:".parse::<SourceSpec>().is_err());
    }

    #[tokio::test]
    async fn test_file_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"first\r\nsecond\nthi\xffrd").unwrap();
        let spec = SourceSpec::File(file.path().to_path_buf());

        let mut source = Source::open(&spec, InputFormat::Sbs, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(source.next_chunk().await.unwrap().as_deref(), Some("first\r\n"));
        assert_eq!(source.next_chunk().await.unwrap().as_deref(), Some("second\n"));
        assert_eq!(source.next_chunk().await.unwrap().as_deref(), Some("thi\u{fffd}rd"));
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\n  \"aircraft\": []\n}\n").unwrap();
        let spec = SourceSpec::File(file.path().to_path_buf());

        let mut source = Source::open(&spec, InputFormat::Json, Duration::from_secs(1))
            .await
            .unwrap();
        let doc = source.next_chunk().await.unwrap().unwrap();
        assert!(doc.contains("\"aircraft\""));
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let spec = SourceSpec::File(PathBuf::from("/nonexistent/adsb/capture.txt"));
        assert!(Source::open(&spec, InputFormat::Sbs, Duration::from_secs(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_http_needs_json() {
        let spec = SourceSpec::Http("http://localhost/aircraft.json".to_string());
        assert!(Source::open(&spec, InputFormat::Sbs, Duration::from_secs(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_interrupted_read_keeps_partial_line() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut source = Source::from_lines(BufReader::new(rx));

        tx.write_all(b"MSG,3,1,1,4840D6,1,,,,,,37000,").await.unwrap();
        // Another select! branch wins while the line is half read
        let interrupted = tokio::time::timeout(Duration::from_millis(50), source.next_chunk()).await;
        assert!(interrupted.is_err());

        tx.write_all(b",,51.6,-0.5,,,0,0,0,0\n").await.unwrap();
        assert_eq!(
            source.next_chunk().await.unwrap().as_deref(),
            Some("MSG,3,1,1,4840D6,1,,,,,,37000,,,51.6,-0.5,,,0,0,0,0\n")
        );

        // A trailing partial line is still delivered at end of input
        tx.write_all(b"MSG,1").await.unwrap();
        let _ = tokio::time::timeout(Duration::from_millis(50), source.next_chunk()).await;
        drop(tx);
        assert_eq!(source.next_chunk().await.unwrap().as_deref(), Some("MSG,1"));
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_reads_decoder_stdout() {
        let spec: SourceSpec = "exec:echo *8D4840D6202CC371C32CE0576098;".parse().unwrap();
        let mut source = Source::open(&spec, InputFormat::Raw, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            source.next_chunk().await.unwrap().as_deref(),
            Some("*8D4840D6202CC371C32CE0576098;\n")
        );
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_decoder_is_fatal() {
        let spec: SourceSpec = "exec:false".parse().unwrap();
        let mut source = Source::open(&spec, InputFormat::Sbs, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(source.next_chunk().await.is_err());
    }
}
