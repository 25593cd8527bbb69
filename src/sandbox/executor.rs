//! Isolated, time-bounded execution of candidate scripts.
//!
//! Each call writes the script into its own empty working directory and runs
//! the configured interpreter as a child process whose current directory is
//! that working directory. Output is captured line by line while the process
//! runs so partial output survives a timeout kill.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::result::{AttemptResult, Verdict};
use super::signature::ErrorSignature;
use crate::config::WeaverConfig;
use crate::error::SandboxError;
use crate::utils::tail_chars;

/// Captured log file names written next to the script.
pub const STDOUT_LOG: &str = "stdout.log";
pub const STDERR_LOG: &str = "stderr.log";

const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;
const ERROR_TEXT_CHARS: usize = 4000;

/// Configuration for the sandbox executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Interpreter binary, e.g. `python3` or `sh`.
    pub interpreter: String,
    /// Arguments placed before the script path.
    pub interpreter_args: Vec<String>,
    /// File name of the script inside the working directory.
    pub script_file_name: String,
    /// Files that must exist after a clean exit.
    pub required_artifacts: Vec<String>,
    /// Per-stream capture limit; further output is dropped.
    pub max_capture_bytes: usize,
}

impl SandboxConfig {
    pub fn new(interpreter: impl Into<String>, script_file_name: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            interpreter_args: Vec::new(),
            script_file_name: script_file_name.into(),
            required_artifacts: Vec::new(),
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }

    pub fn from_config(config: &WeaverConfig) -> Self {
        Self::new(config.interpreter.clone(), config.script_file_name.clone())
            .with_args(config.interpreter_args.clone())
            .with_required_artifacts(config.required_artifacts.clone())
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.interpreter_args = args;
        self
    }

    pub fn with_required_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.required_artifacts = artifacts;
        self
    }

    pub fn with_max_capture_bytes(mut self, bytes: usize) -> Self {
        self.max_capture_bytes = bytes;
        self
    }
}

/// Runs candidate scripts in isolated working directories.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    config: SandboxConfig,
}

/// Bounded accumulator for one output stream.
struct Capture {
    text: String,
    limit: usize,
    dropped_lines: usize,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            dropped_lines: 0,
        }
    }

    fn push_line(&mut self, line: &str) {
        if self.text.len() + line.len() + 1 > self.limit {
            self.dropped_lines += 1;
            return;
        }
        self.text.push_str(line);
        self.text.push('\n');
    }

    fn finish(mut self) -> String {
        if self.dropped_lines > 0 {
            self.text
                .push_str(&format!("...[{} lines dropped]\n", self.dropped_lines));
        }
        self.text
    }
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `script` inside `working_dir` with a hard wall-clock `timeout`.
    ///
    /// The directory is created if missing and must be empty otherwise.
    /// Script failures are reported through the returned [`Verdict`]; an
    /// `Err` means the sandbox itself could not run the script.
    pub async fn execute(
        &self,
        script: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<AttemptResult, SandboxError> {
        prepare_working_dir(working_dir).await?;

        let script_path = working_dir.join(&self.config.script_file_name);
        tokio::fs::write(&script_path, script).await?;

        let started_at = Utc::now();
        let mut command = Command::new(&self.config.interpreter);
        command
            .args(&self.config.interpreter_args)
            .arg(&self.config.script_file_name)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| SandboxError::Spawn {
            interpreter: self.config.interpreter.clone(),
            reason: e.to_string(),
        })?;
        // Dropping this (on return or cancellation) kills everything the script spawned.
        let mut group = ProcessGroup::of(&child);

        let stdout = child.stdout.take().ok_or_else(|| SandboxError::Spawn {
            interpreter: self.config.interpreter.clone(),
            reason: "stdout not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| SandboxError::Spawn {
            interpreter: self.config.interpreter.clone(),
            reason: "stderr not captured".to_string(),
        })?;

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stdout_capture = Capture::new(self.config.max_capture_bytes);
        let mut stderr_capture = Capture::new(self.config.max_capture_bytes);

        let run = tokio::time::timeout(timeout, async {
            let mut stdout_done = false;
            let mut stderr_done = false;

            while !(stdout_done && stderr_done) {
                tokio::select! {
                    line = stdout_lines.next_line(), if !stdout_done => match line {
                        Ok(Some(l)) => {
                            debug!("[sandbox stdout] {}", l);
                            stdout_capture.push_line(&l);
                        }
                        Ok(None) => stdout_done = true,
                        Err(e) => {
                            warn!("Error reading sandbox stdout: {}", e);
                            stdout_done = true;
                        }
                    },
                    line = stderr_lines.next_line(), if !stderr_done => match line {
                        Ok(Some(l)) => {
                            debug!("[sandbox stderr] {}", l);
                            stderr_capture.push_line(&l);
                        }
                        Ok(None) => stderr_done = true,
                        Err(e) => {
                            warn!("Error reading sandbox stderr: {}", e);
                            stderr_done = true;
                        }
                    },
                }
            }

            child.wait().await
        })
        .await;

        let status = match run {
            Ok(Ok(status)) => {
                group.kill();
                Some(status)
            }
            Ok(Err(e)) => return Err(SandboxError::Io(e)),
            Err(_) => {
                warn!(
                    working_dir = %working_dir.display(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Script exceeded time limit, killing"
                );
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out script: {}", e);
                }
                None
            }
        };

        let stdout = stdout_capture.finish();
        let stderr = stderr_capture.finish();

        let verdict = match status {
            None => Verdict::Timeout {
                limit_ms: timeout.as_millis() as u64,
            },
            Some(status) => self.judge(status, &stdout, &stderr, working_dir).await,
        };
        let finished_at = Utc::now();

        tokio::fs::write(working_dir.join(STDOUT_LOG), &stdout).await?;
        tokio::fs::write(working_dir.join(STDERR_LOG), &stderr).await?;

        info!(
            working_dir = %working_dir.display(),
            verdict = %verdict,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "Sandbox run finished"
        );

        Ok(AttemptResult {
            exit_code: status.and_then(|s| s.code()),
            verdict,
            stdout,
            stderr,
            working_dir: working_dir.to_path_buf(),
            script_path,
            started_at,
            finished_at,
        })
    }

    async fn judge(
        &self,
        status: ExitStatus,
        stdout: &str,
        stderr: &str,
        working_dir: &Path,
    ) -> Verdict {
        if status.success() {
            for name in &self.config.required_artifacts {
                let present = tokio::fs::metadata(working_dir.join(name))
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false);
                if !present {
                    let mut error_text = format!(
                        "The script ran without raising an error but did not create the required output file '{}'.",
                        name
                    );
                    if !stderr.trim().is_empty() {
                        error_text.push_str("\nstderr:\n");
                        error_text.push_str(&tail_chars(stderr, ERROR_TEXT_CHARS));
                    }
                    return Verdict::Failure {
                        signature: ErrorSignature::missing_artifact(name),
                        error_text,
                    };
                }
            }

            return Verdict::Success {
                artifacts: self.collect_artifacts(working_dir),
            };
        }

        let Some(code) = status.code() else {
            let signal = termination_signal(&status);
            return Verdict::Failure {
                signature: ErrorSignature::crashed(signal),
                error_text: format!(
                    "The process terminated abnormally{}.\n{}",
                    signal.map(|s| format!(" (signal {})", s)).unwrap_or_default(),
                    tail_chars(stderr, ERROR_TEXT_CHARS)
                ),
            };
        };

        let error_source = if stderr.trim().is_empty() { stdout } else { stderr };
        let signature = ErrorSignature::from_error_text(error_source)
            .unwrap_or_else(|| ErrorSignature::exit_code(code));

        Verdict::Failure {
            signature,
            error_text: tail_chars(error_source, ERROR_TEXT_CHARS),
        }
    }

    /// Every file the script left in its working directory, except the script itself.
    fn collect_artifacts(&self, working_dir: &Path) -> Vec<PathBuf> {
        let mut artifacts: Vec<PathBuf> = WalkDir::new(working_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy();
                name != self.config.script_file_name.as_str()
                    && name != STDOUT_LOG
                    && name != STDERR_LOG
            })
            .map(|entry| entry.into_path())
            .collect();
        artifacts.sort();
        artifacts
    }
}

/// Process group led by a sandboxed interpreter.
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self {
            pgid: child.id().and_then(|id| i32::try_from(id).ok()),
        }
    }

    /// SIGKILL every process left in the group. Idempotent.
    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: i32) {
    // SAFETY: killpg only sends a signal; it touches no memory.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, error = %err, "Failed to kill sandbox process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: i32) {}

async fn prepare_working_dir(working_dir: &Path) -> Result<(), SandboxError> {
    tokio::fs::create_dir_all(working_dir)
        .await
        .map_err(|source| SandboxError::Workspace {
            path: working_dir.to_path_buf(),
            source,
        })?;

    let mut entries = tokio::fs::read_dir(working_dir).await?;
    if entries.next_entry().await?.is_some() {
        return Err(SandboxError::WorkspaceNotEmpty(working_dir.to_path_buf()));
    }
    Ok(())
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Instant;
    use tempfile::TempDir;

    fn sh_executor(required: &[&str]) -> SandboxExecutor {
        SandboxExecutor::new(
            SandboxConfig::new("sh", "script.sh")
                .with_required_artifacts(required.iter().map(|s| s.to_string()).collect()),
        )
    }

    #[tokio::test]
    async fn test_success_collects_artifacts() {
        let tmp = TempDir::new().expect("tempdir");
        let dir = tmp.path().join("run");
        let executor = sh_executor(&["out.svg"]);

        let result = executor
            .execute("echo hello\necho '<svg/>' > out.svg\n", &dir, Duration::from_secs(10))
            .await
            .expect("executes");

        assert!(result.is_success());
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.artifacts(), &[dir.join("out.svg")]);
        assert!(dir.join(STDOUT_LOG).exists());
        assert!(dir.join("script.sh").exists());
    }

    #[tokio::test]
    async fn test_failure_signature_from_stderr() {
        let tmp = TempDir::new().expect("tempdir");
        let executor = sh_executor(&[]);

        let result = executor
            .execute(
                "echo 'Traceback' >&2\necho \"NameError: name 'R2' is not defined\" >&2\nexit 1\n",
                &tmp.path().join("run"),
                Duration::from_secs(10),
            )
            .await
            .expect("executes");

        assert_eq!(result.exit_code, Some(1));
        match &result.verdict {
            Verdict::Failure { signature, error_text } => {
                assert_eq!(signature.normalized, "NameError: name '<id>' is not defined");
                assert!(error_text.contains("Traceback"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_artifact_is_failure() {
        let tmp = TempDir::new().expect("tempdir");
        let executor = sh_executor(&["diagram.svg"]);

        let result = executor
            .execute("echo done\n", &tmp.path().join("run"), Duration::from_secs(10))
            .await
            .expect("executes");

        let signature = result.verdict.signature().expect("failure signature");
        assert_eq!(signature.error_kind(), "MissingArtifact");
    }

    #[tokio::test]
    async fn test_silent_nonzero_exit() {
        let tmp = TempDir::new().expect("tempdir");
        let result = sh_executor(&[])
            .execute("exit 3\n", &tmp.path().join("run"), Duration::from_secs(10))
            .await
            .expect("executes");

        let signature = result.verdict.signature().expect("signature");
        assert_eq!(signature.error_kind(), "ExitStatus");
    }

    #[tokio::test]
    async fn test_timeout_kills_and_keeps_partial_output() {
        let tmp = TempDir::new().expect("tempdir");
        let executor = sh_executor(&[]);
        let limit = Duration::from_millis(500);

        let started = Instant::now();
        let result = executor
            .execute("echo before-sleep\nexec sleep 5\n", &tmp.path().join("run"), limit)
            .await
            .expect("executes");
        let elapsed = started.elapsed();

        assert_eq!(result.verdict, Verdict::Timeout { limit_ms: 500 });
        assert!(result.exit_code.is_none());
        assert!(result.stdout.contains("before-sleep"));
        assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
    }

    /// Whether `pid` is still a live (non-zombie) process.
    #[cfg(target_os = "linux")]
    fn process_alive(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid.trim())) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .map(|(_, rest)| !rest.starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_spawned_processes() {
        let tmp = TempDir::new().expect("tempdir");
        let dir = tmp.path().join("run");

        let result = sh_executor(&[])
            .execute(
                "sleep 7 > /dev/null 2>&1 &\necho $! > bg.pid\nsleep 7\n",
                &dir,
                Duration::from_millis(300),
            )
            .await
            .expect("executes");
        assert_eq!(result.verdict, Verdict::Timeout { limit_ms: 300 });

        tokio::time::sleep(Duration::from_millis(200)).await;
        let pid = std::fs::read_to_string(dir.join("bg.pid")).expect("pid file");
        assert!(!process_alive(&pid), "background process {} survived", pid.trim());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancelled_run_kills_spawned_processes() {
        let tmp = TempDir::new().expect("tempdir");
        let dir = tmp.path().join("run");
        let executor = sh_executor(&[]);

        let run_dir = dir.clone();
        let task = tokio::spawn(async move {
            executor
                .execute(
                    "sleep 7 > /dev/null 2>&1 &\necho $! > bg.pid\nsleep 7\n",
                    &run_dir,
                    Duration::from_secs(30),
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        task.abort();
        let _ = task.await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        let pid = std::fs::read_to_string(dir.join("bg.pid")).expect("pid file");
        assert!(!process_alive(&pid), "background process {} survived", pid.trim());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_clean_exit_reaps_background_processes() {
        let tmp = TempDir::new().expect("tempdir");
        let dir = tmp.path().join("run");

        let result = sh_executor(&[])
            .execute(
                "sleep 7 > /dev/null 2>&1 < /dev/null &\necho $! > bg.pid\n",
                &dir,
                Duration::from_secs(10),
            )
            .await
            .expect("executes");
        assert!(result.is_success());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let pid = std::fs::read_to_string(dir.join("bg.pid")).expect("pid file");
        assert!(!process_alive(&pid), "background process {} survived", pid.trim());
    }

    #[tokio::test]
    async fn test_rejects_non_empty_dir() {
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(tmp.path().join("stale.txt"), "x").expect("write");

        let result = sh_executor(&[])
            .execute("true\n", tmp.path(), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(SandboxError::WorkspaceNotEmpty(_))));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_error() {
        let tmp = TempDir::new().expect("tempdir");
        let executor = SandboxExecutor::new(SandboxConfig::new(
            "definitely-not-an-interpreter-xyz",
            "script.sh",
        ));
        let result = executor
            .execute("true\n", &tmp.path().join("run"), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(SandboxError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_capture_limit_drops_lines() {
        let tmp = TempDir::new().expect("tempdir");
        let executor = SandboxExecutor::new(
            SandboxConfig::new("sh", "script.sh").with_max_capture_bytes(64),
        );
        let result = executor
            .execute(
                "i=0\nwhile [ $i -lt 50 ]; do echo line-$i; i=$((i+1)); done\n",
                &tmp.path().join("run"),
                Duration::from_secs(10),
            )
            .await
            .expect("executes");

        assert!(result.stdout.len() < 200);
        assert!(result.stdout.contains("lines dropped"));
    }

    #[tokio::test]
    async fn test_concurrent_runs_never_share_files() {
        let tmp = TempDir::new().expect("tempdir");
        let executor = sh_executor(&["out.txt"]);

        let runs = (0..50).map(|i| {
            let executor = executor.clone();
            let dir = tmp.path().join(format!("attempt_{:03}", i));
            tokio::spawn(async move {
                let script = format!("echo {} > out.txt\nsleep 0.05\ncat out.txt\n", i);
                let result = executor
                    .execute(&script, &dir, Duration::from_secs(30))
                    .await
                    .expect("executes");
                (i, result)
            })
        });

        let results = futures::future::join_all(runs).await;
        let mut seen = HashSet::new();
        for joined in results {
            let (i, result) = joined.expect("task joins");
            assert!(result.is_success(), "run {} failed: {:?}", i, result.verdict);
            assert_eq!(result.stdout.trim(), i.to_string());
            for artifact in result.artifacts() {
                assert!(seen.insert(artifact.clone()), "shared path {:?}", artifact);
                let content = std::fs::read_to_string(artifact).expect("read");
                assert_eq!(content.trim(), i.to_string());
            }
        }
        assert_eq!(seen.len(), 50);
    }
}
