//! Shell 步骤：sh -c / cmd /C 执行，带超时、输出截断与拒绝列表
//!
//! stdout / stderr 边读边截断，内存占用不超过 output_cap。
//! 超时后子进程随 future 一起被丢弃并 kill；拒绝列表只是粗粒度的防误操作，不是沙箱。

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::process::Command;

use super::{capped_text, read_capped, StepFailure, StepResult};

async fn read_pipe<R>(pipe: Option<R>, cap: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(pipe) => read_capped(pipe, cap).await,
        None => Ok((Vec::new(), false)),
    }
}

pub struct ShellRunner {
    workdir: PathBuf,
    timeout: Duration,
    output_cap: usize,
    /// 已转为小写
    denied_patterns: Vec<String>,
}

impl ShellRunner {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration, output_cap: usize) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            output_cap,
            denied_patterns: Vec::new(),
        }
    }

    pub fn with_denied_patterns(mut self, patterns: Vec<String>) -> Self {
        self.denied_patterns = patterns
            .into_iter()
            .map(|p| p.to_lowercase())
            .filter(|p| !p.trim().is_empty())
            .collect();
        self
    }

    fn denied_by(&self, command: &str) -> Option<&str> {
        let lower = command.to_lowercase();
        self.denied_patterns
            .iter()
            .find(|p| lower.contains(p.as_str()))
            .map(String::as_str)
    }

    fn build_command(&self, command: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub async fn run(&self, command: &str) -> StepResult {
        let command = command.trim();
        if command.is_empty() {
            return StepResult::failed(StepFailure::Spawn("empty command".into()), "", None);
        }
        if let Some(pattern) = self.denied_by(command) {
            tracing::warn!(command = %command, pattern = %pattern, "shell step blocked");
            return StepResult::failed(StepFailure::Blocked(pattern.to_string()), "", None);
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.workdir).await {
            return StepResult::failed(StepFailure::Io(e.to_string()), "", None);
        }

        tracing::info!(command = %command, "shell step execute");
        let mut child = match self.build_command(command).spawn() {
            Ok(child) => child,
            Err(e) => return StepResult::failed(StepFailure::Spawn(e.to_string()), "", None),
        };

        let cap = self.output_cap;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let collect = async {
            tokio::try_join!(
                read_pipe(stdout_pipe, cap),
                read_pipe(stderr_pipe, cap),
                child.wait()
            )
        };

        let (stdout, stderr, status) = match tokio::time::timeout(self.timeout, collect).await {
            Ok(Ok(collected)) => collected,
            Ok(Err(e)) => return StepResult::failed(StepFailure::Io(e.to_string()), "", None),
            Err(_) => {
                return StepResult::failed(StepFailure::TimedOut(self.timeout.as_secs()), "", None)
            }
        };

        let stdout = capped_text(&stdout.0, stdout.1);
        let stderr = capped_text(&stderr.0, stderr.1).trim().to_string();
        if status.success() {
            let mut result = StepResult::ok(stdout);
            if !stderr.is_empty() {
                result.error = Some(stderr);
            }
            result
        } else {
            StepResult::failed(StepFailure::NonZeroExit(status.code()), stdout, Some(stderr))
        }
    }
}
