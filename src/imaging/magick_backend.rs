//! ImageMagick backend.
//!
//! Runs `convert - <steps> -quiet <format> <fmt>:-`, feeding the source on
//! stdin and streaming stdout back to the caller as it is produced.
//!
//! - Local sources are opened here and handed to `convert` as its stdin.
//! - Remote sources are fetched by a `curl -sfL` child whose stdout is piped
//!   straight into `convert`; nothing is buffered in this process.
//!
//! Anything `convert` writes to stderr is logged at error level. Both
//! children are killed when the output stream is dropped (client went away)
//! or when the configured timeout elapses.

use super::backend::{BackendError, ByteStream, ConvertBackend};
use super::pipeline::Pipeline;
use crate::config::ConvertConfig;
use crate::source::Source;
use bytes::{Bytes, BytesMut};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::Instant;

/// Read size for converter output.
const CHUNK_SIZE: usize = 64 * 1024;

/// Runs conversions through the ImageMagick `convert` CLI.
#[derive(Debug, Clone)]
pub struct MagickBackend {
    convert_path: String,
    curl_path: String,
    timeout: Duration,
}

impl MagickBackend {
    pub fn new(
        convert_path: impl Into<String>,
        curl_path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            convert_path: convert_path.into(),
            curl_path: curl_path.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ConvertConfig) -> Self {
        Self::new(&config.convert_path, &config.curl_path, config.timeout())
    }

    /// Start `curl` for a remote source and return it with its stdout as a
    /// ready-to-use stdin for `convert`.
    fn fetch(&self, url: &url::Url) -> Result<(Child, Stdio), BackendError> {
        let mut curl = Command::new(&self.curl_path)
            .args(["-sfL", "--proto-redir", "=http,https", url.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: self.curl_path.clone(),
                source,
            })?;
        let stdout = curl
            .stdout
            .take()
            .ok_or_else(|| BackendError::ProcessingFailed("curl stdout not captured".into()))?;
        let stdin: Stdio = stdout.try_into()?;
        Ok((curl, stdin))
    }
}

impl ConvertBackend for MagickBackend {
    fn convert(&self, source: &Source, pipeline: &Pipeline) -> Result<ByteStream, BackendError> {
        let cmdline = pipeline.command_line(&self.convert_path);
        tracing::debug!(%source, "CONVERT {}", cmdline.join(" "));

        let (feeder, stdin) = match source {
            Source::Local { path, .. } => (None, Stdio::from(std::fs::File::open(path)?)),
            Source::Remote { url } => {
                let (curl, stdin) = self.fetch(url)?;
                (Some(curl), stdin)
            }
        };

        let (program, args) = cmdline
            .split_first()
            .ok_or_else(|| BackendError::ProcessingFailed("empty command line".into()))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::ProcessingFailed("convert stdout not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr, source.to_string()));
        }

        let conversion = Conversion {
            child,
            feeder,
            stdout,
            deadline: Instant::now() + self.timeout,
            done: false,
        };
        Ok(Box::pin(futures_util::stream::unfold(
            conversion,
            |mut conversion| async move {
                let item = conversion.next_chunk().await?;
                Some((item, conversion))
            },
        )))
    }
}

/// A running `convert` (and optional `curl` feeding it).
struct Conversion {
    child: Child,
    feeder: Option<Child>,
    stdout: ChildStdout,
    deadline: Instant,
    done: bool,
}

impl Conversion {
    async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if self.done {
            return None;
        }
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let read = tokio::time::timeout_at(self.deadline, self.stdout.read_buf(&mut buf)).await;
        match read {
            Ok(Ok(0)) => {
                self.done = true;
                self.finish().await.err().map(Err)
            }
            Ok(Ok(_)) => Some(Ok(buf.freeze())),
            Ok(Err(e)) => {
                self.abort();
                Some(Err(e))
            }
            Err(_) => {
                self.abort();
                Some(Err(timed_out()))
            }
        }
    }

    /// Reap both children once stdout is exhausted.
    async fn finish(&mut self) -> io::Result<()> {
        let status = self.wait_child().await?;
        if let Some(feeder) = self.feeder.as_mut() {
            let fetched = tokio::time::timeout_at(self.deadline, feeder.wait())
                .await
                .map_err(|_| timed_out())??;
            check_status("curl", fetched)?;
        }
        check_status("convert", status)
    }

    async fn wait_child(&mut self) -> io::Result<ExitStatus> {
        match tokio::time::timeout_at(self.deadline, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                self.abort();
                Err(timed_out())
            }
        }
    }

    fn abort(&mut self) {
        self.done = true;
        let _ = self.child.start_kill();
        if let Some(feeder) = self.feeder.as_mut() {
            let _ = feeder.start_kill();
        }
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "conversion timed out")
}

fn check_status(program: &str, status: ExitStatus) -> io::Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("{program} exited with {status}")))
    }
}

async fn log_stderr(stderr: ChildStderr, source: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            tracing::error!(%source, "Conversion error: {line}");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::source::resolve_local;
    use futures_util::StreamExt;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    /// Write an executable shell script standing in for `convert`.
    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn local_source(dir: &Path) -> Source {
        fs::create_dir_all(dir.join("img")).unwrap();
        fs::write(dir.join("img/in.jpg"), b"source bytes").unwrap();
        resolve_local(&dir.join("img"), "in.jpg").unwrap()
    }

    async fn collect(stream: ByteStream) -> Vec<io::Result<Bytes>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn streams_stdout_of_converter() {
        let tmp = TempDir::new().unwrap();
        let convert = script(tmp.path(), "convert", "cat");
        let backend = MagickBackend::new(convert, "curl", Duration::from_secs(10));

        let out = collect(
            backend
                .convert(&local_source(tmp.path()), &Pipeline::new())
                .unwrap(),
        )
        .await;
        let bytes: Vec<u8> = out
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect();
        assert_eq!(bytes, b"source bytes");
    }

    #[tokio::test]
    async fn passes_pipeline_arguments() {
        let tmp = TempDir::new().unwrap();
        let convert = script(tmp.path(), "convert", "cat >/dev/null\nprintf '%s\\n' \"$@\"");
        let backend = MagickBackend::new(convert, "curl", Duration::from_secs(10));
        let mut pipeline = Pipeline::new();
        pipeline.normalize();

        let out = collect(backend.convert(&local_source(tmp.path()), &pipeline).unwrap()).await;
        let text: String = out
            .into_iter()
            .map(|chunk| String::from_utf8(chunk.unwrap().to_vec()).unwrap())
            .collect();
        let args: Vec<&str> = text.lines().collect();
        assert_eq!(args[..3], ["-", "-normalize", "-quiet"]);
        assert_eq!(args.last(), Some(&"jpeg:-"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_stream_error() {
        let tmp = TempDir::new().unwrap();
        let convert = script(tmp.path(), "convert", "cat\nexit 3");
        let backend = MagickBackend::new(convert, "curl", Duration::from_secs(10));

        let out = collect(
            backend
                .convert(&local_source(tmp.path()), &Pipeline::new())
                .unwrap(),
        )
        .await;
        assert!(out[0].is_ok());
        let err = out.last().unwrap().as_ref().unwrap_err();
        assert!(err.to_string().contains("convert exited"), "{err}");
    }

    #[tokio::test]
    async fn timeout_kills_conversion() {
        let tmp = TempDir::new().unwrap();
        let convert = script(tmp.path(), "convert", "sleep 5");
        let backend = MagickBackend::new(convert, "curl", Duration::from_millis(200));

        let out = collect(
            backend
                .convert(&local_source(tmp.path()), &Pipeline::new())
                .unwrap(),
        )
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].as_ref().unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );
    }

    // =========================================================================
    // Remote sources
    // =========================================================================

    fn remote_source() -> Source {
        Source::Remote {
            url: url::Url::parse("http://images.example.com/a.jpg").unwrap(),
        }
    }

    fn joined(out: Vec<io::Result<Bytes>>) -> String {
        out.into_iter()
            .map(|chunk| String::from_utf8(chunk.unwrap().to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn remote_fetch_is_piped_into_converter() {
        let tmp = TempDir::new().unwrap();
        let curl = script(tmp.path(), "curl", "printf data");
        let convert = script(tmp.path(), "convert", "cat");
        let backend = MagickBackend::new(convert, curl, Duration::from_secs(10));

        let out = collect(backend.convert(&remote_source(), &Pipeline::new()).unwrap()).await;
        assert_eq!(joined(out), "data");
    }

    #[tokio::test]
    async fn curl_receives_url_and_redirect_limits() {
        let tmp = TempDir::new().unwrap();
        let curl = script(tmp.path(), "curl", "printf '%s\\n' \"$@\"");
        let convert = script(tmp.path(), "convert", "cat");
        let backend = MagickBackend::new(convert, curl, Duration::from_secs(10));

        let out = collect(backend.convert(&remote_source(), &Pipeline::new()).unwrap()).await;
        let text = joined(out);
        let args: Vec<&str> = text.lines().collect();
        assert_eq!(
            args,
            [
                "-sfL",
                "--proto-redir",
                "=http,https",
                "http://images.example.com/a.jpg"
            ]
        );
    }

    #[tokio::test]
    async fn failed_fetch_is_stream_error() {
        let tmp = TempDir::new().unwrap();
        let curl = script(tmp.path(), "curl", "exit 22");
        let convert = script(tmp.path(), "convert", "cat");
        let backend = MagickBackend::new(convert, curl, Duration::from_secs(10));

        let out = collect(backend.convert(&remote_source(), &Pipeline::new()).unwrap()).await;
        let err = out.last().unwrap().as_ref().unwrap_err();
        assert!(err.to_string().contains("curl exited"), "{err}");
    }

    #[tokio::test]
    async fn missing_curl_is_spawn_error() {
        let tmp = TempDir::new().unwrap();
        let convert = script(tmp.path(), "convert", "cat");
        let backend = MagickBackend::new(
            convert,
            tmp.path().join("no-such-curl").to_string_lossy(),
            Duration::from_secs(1),
        );
        let result = backend.convert(&remote_source(), &Pipeline::new());
        assert!(
            matches!(result, Err(BackendError::Spawn { ref program, .. }) if program.ends_with("no-such-curl"))
        );
    }

    /// Wait for a stand-in to record its pid.
    #[cfg(target_os = "linux")]
    async fn read_pid(path: &Path) -> u32 {
        for _ in 0..100 {
            if let Ok(text) = fs::read_to_string(path)
                && let Ok(pid) = text.trim().parse()
            {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no pid written to {}", path.display());
    }

    /// Running and not yet a zombie.
    #[cfg(target_os = "linux")]
    fn alive(pid: u32) -> bool {
        match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => false,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropping_stream_kills_both_children() {
        let tmp = TempDir::new().unwrap();
        let curl_pid = tmp.path().join("curl.pid");
        let convert_pid = tmp.path().join("convert.pid");
        let curl = script(
            tmp.path(),
            "curl",
            &format!("echo $$ > {}\nexec sleep 30", curl_pid.display()),
        );
        let convert = script(
            tmp.path(),
            "convert",
            &format!("echo $$ > {}\nexec sleep 30", convert_pid.display()),
        );
        let backend = MagickBackend::new(convert, curl, Duration::from_secs(60));

        let stream = backend.convert(&remote_source(), &Pipeline::new()).unwrap();
        let pids = [read_pid(&curl_pid).await, read_pid(&convert_pid).await];
        assert!(pids.iter().all(|pid| alive(*pid)));

        drop(stream);
        for _ in 0..100 {
            if !pids.iter().any(|pid| alive(*pid)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("children still running after drop: {pids:?}");
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let tmp = TempDir::new().unwrap();
        let backend = MagickBackend::new(
            tmp.path().join("no-such-convert").to_string_lossy(),
            "curl",
            Duration::from_secs(1),
        );
        let result = backend.convert(&local_source(tmp.path()), &Pipeline::new());
        assert!(matches!(result, Err(BackendError::Spawn { .. })));
    }
}
