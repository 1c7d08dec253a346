//! Step execution: local commands and fetched remote scripts.
//!
//! Both primitives write one capture file per step and tee everything they
//! write to stdout unless the runner is quiet.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::step::RemoteScript;
use vpntest_core::{Result, RunConfig, VpnTestError};

/// Interpreter that receives fetched scripts on stdin.
pub const INTERPRETER: &str = "bash";

/// Result of running one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Step name.
    pub step_name: String,

    /// Capture file the output went to.
    pub capture: PathBuf,

    /// Last non-zero exit code, 0 when everything succeeded, -1 when a
    /// process could not be started or the fetch failed.
    pub exit_code: i32,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether every command (or the fetch and the script) succeeded.
    pub success: bool,

    /// First failure, if any.
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// Executes steps. `HostRunner` talks to the real host; tests substitute
/// their own implementation.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run `commands` in order, appending each to `capture`.
    async fn run_local(
        &self,
        step: &str,
        capture: &Path,
        commands: &[Vec<String>],
    ) -> Result<StepOutcome>;

    /// Fetch `script.url` and execute the body with `script.args`.
    async fn run_remote(
        &self,
        step: &str,
        capture: &Path,
        script: &RemoteScript,
    ) -> Result<StepOutcome>;

    /// Whether a tool is installed.
    fn tool_available(&self, tool: &str) -> bool {
        vpntest_core::command_available(tool)
    }
}

/// Runs steps on the local host.
pub struct HostRunner {
    client: reqwest::Client,
    connect_timeout: Duration,
    total_timeout: Duration,
    echo: bool,
}

impl HostRunner {
    /// Build a runner whose fetches are bounded by the configured timeouts.
    pub fn new(config: &RunConfig) -> Result<Self> {
        let connect_timeout = config.connect_timeout();
        let total_timeout = config.total_timeout();
        let client = reqwest::Client::builder()
            .user_agent(format!("vpn-test/{}", vpntest_core::VERSION))
            .connect_timeout(connect_timeout)
            .timeout(total_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| VpnTestError::Http(e.to_string()))?;

        Ok(Self {
            client,
            connect_timeout,
            total_timeout,
            echo: !config.quiet,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    /// Fetch the raw script body. The bytes are neither decoded nor transcoded.
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let describe = |e: reqwest::Error| {
            if e.is_timeout() {
                format!(
                    "fetch {url}: timed out (connect {}s, total {}s)",
                    self.connect_timeout.as_secs(),
                    self.total_timeout.as_secs()
                )
            } else {
                format!("fetch {url}: {e}")
            }
        };
        let response = self.client.get(url).send().await.map_err(describe)?;
        let response = response.error_for_status().map_err(describe)?;
        let body = response.bytes().await.map_err(describe)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl StepExecutor for HostRunner {
    async fn run_local(
        &self,
        step: &str,
        capture_path: &Path,
        commands: &[Vec<String>],
    ) -> Result<StepOutcome> {
        let start = Instant::now();
        let mut capture = Capture::open(capture_path, self.echo).await?;
        let mut exit_code = 0;
        let mut error: Option<String> = None;

        for command in commands {
            let line = shell_join(command);
            capture.header(step, &[format!("# cmd: {line}")]).await?;

            let Some((exe, args)) = command.split_first() else {
                capture.line("# error: empty command").await?;
                exit_code = -1;
                error.get_or_insert_with(|| "empty command".to_string());
                capture.end_section().await?;
                continue;
            };

            let spawned = Command::new(exe)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn();

            match spawned {
                Ok(mut child) => {
                    pump(&mut child, &mut capture).await?;
                    let code = child.wait().await?.code().unwrap_or(-1);
                    capture.line(&format!("# exit: {code}")).await?;
                    if code != 0 {
                        exit_code = code;
                        error.get_or_insert_with(|| format!("`{line}` exited with code {code}"));
                    }
                }
                Err(e) => {
                    let reason = format!("failed to start {exe}: {e}");
                    capture.line(&format!("# error: {reason}")).await?;
                    exit_code = -1;
                    error.get_or_insert(reason);
                }
            }
            capture.end_section().await?;
        }
        capture.close().await?;

        Ok(StepOutcome {
            step_name: step.to_string(),
            capture: capture_path.to_path_buf(),
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
            success: error.is_none(),
            error,
        })
    }

    async fn run_remote(
        &self,
        step: &str,
        capture_path: &Path,
        script: &RemoteScript,
    ) -> Result<StepOutcome> {
        let start = Instant::now();
        let mut capture = Capture::open(capture_path, self.echo).await?;

        let mut invocation = vec![INTERPRETER.to_string(), "-s".to_string(), "--".to_string()];
        invocation.extend(script.args.iter().cloned());
        let mut header = vec![
            format!("# url: {}", script.url),
            format!("# cmd: {}", shell_join(&invocation)),
        ];

        let outcome = |exit_code: i32, error: Option<String>| StepOutcome {
            step_name: step.to_string(),
            capture: capture_path.to_path_buf(),
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
            success: error.is_none(),
            error,
        };

        let body = match self.fetch(&script.url).await {
            Ok(body) => body,
            Err(reason) => {
                capture.header(step, &header).await?;
                capture.line(&format!("# failed: {reason}")).await?;
                capture.end_section().await?;
                capture.close().await?;
                return Ok(outcome(-1, Some(reason)));
            }
        };

        header.push(format!("# script-sha256: {}", sha256_hex(&body)));
        capture.header(step, &header).await?;

        let spawned = Command::new(INTERPRETER)
            .args(&invocation[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("failed to start {INTERPRETER}: {e}");
                capture.line(&format!("# failed: {reason}")).await?;
                capture.end_section().await?;
                capture.close().await?;
                return Ok(outcome(-1, Some(reason)));
            }
        };

        // Feed the script from its own task so a chatty script cannot stall on a full pipe.
        let feeder = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let _ = stdin.write_all(&body).await;
                let _ = stdin.shutdown().await;
            })
        });

        pump(&mut child, &mut capture).await?;
        let code = child.wait().await?.code().unwrap_or(-1);
        if let Some(feeder) = feeder {
            let _ = feeder.await;
        }
        capture.line(&format!("# exit: {code}")).await?;

        let error = (code != 0).then(|| format!("script exited with code {code}"));
        if let Some(reason) = &error {
            capture.line(&format!("# failed: {reason}")).await?;
        }
        capture.end_section().await?;
        capture.close().await?;

        Ok(outcome(code, error))
    }
}

/// Capture file writer that optionally echoes to stdout.
struct Capture {
    file: File,
    echo: bool,
    at_line_start: bool,
}

impl Capture {
    async fn open(path: &Path, echo: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file,
            echo,
            at_line_start: true,
        })
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        if self.echo {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(bytes).await?;
            stdout.flush().await?;
        }
        self.at_line_start = bytes.ends_with(b"\n");
        Ok(())
    }

    async fn line(&mut self, line: &str) -> Result<()> {
        if !self.at_line_start {
            self.write(b"\n").await?;
        }
        self.write(format!("{line}\n").as_bytes()).await
    }

    async fn header(&mut self, step: &str, lines: &[String]) -> Result<()> {
        self.line(&format!("===== {step} =====")).await?;
        self.line(&format!("# time: {}", chrono::Local::now().to_rfc3339()))
            .await?;
        for line in lines {
            self.line(line).await?;
        }
        Ok(())
    }

    async fn end_section(&mut self) -> Result<()> {
        if !self.at_line_start {
            self.write(b"\n").await?;
        }
        self.write(b"\n").await
    }

    async fn close(mut self) -> Result<()> {
        self.file.flush().await?;
        Ok(())
    }
}

const READ_CHUNK: usize = 8 * 1024;

/// Output forwarded from a child pipe.
enum Chunk {
    Data(Vec<u8>),
    ReadError(String),
}

/// Merge stdout and stderr of `child` into `capture` in arrival order.
async fn pump(child: &mut Child, capture: &mut Capture) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Chunk>();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward(stderr, tx.clone()));
    }
    drop(tx);

    drain(&mut rx, capture).await?;
    for reader in readers {
        let _ = reader.await;
    }
    Ok(())
}

/// Write forwarded chunks in arrival order until every sender is gone.
async fn drain(rx: &mut mpsc::UnboundedReceiver<Chunk>, capture: &mut Capture) -> Result<()> {
    while let Some(chunk) = rx.recv().await {
        match chunk {
            Chunk::Data(bytes) => capture.write(&bytes).await?,
            Chunk::ReadError(e) => capture.line(&format!("# error: read failed: {e}")).await?,
        }
    }
    Ok(())
}

fn forward<R>(mut reader: R, tx: mpsc::UnboundedSender<Chunk>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        // Forward what is available; `\r`-only progress must not wait for a newline.
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let chunk = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => Chunk::Data(buf[..n].to_vec()),
                Err(e) => Chunk::ReadError(e.to_string()),
            };
            let stop = matches!(chunk, Chunk::ReadError(_));
            if tx.send(chunk).is_err() || stop {
                break;
            }
        }
    })
}

/// Hex SHA-256 of a fetched script body.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Render an argv as a copy-pasteable shell command line.
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=+,@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
