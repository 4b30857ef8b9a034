use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::{MediaError, Result};

/// Runs external media tool processes, enforcing a maximum number of
/// concurrent processes and an optional wall-clock timeout.
pub struct ToolRunner {
    active_count: Arc<AtomicUsize>,
    max_processes: usize,
    timeout: Option<Duration>,
}

/// Decrements the active counter however the invocation ends
struct ActiveSlot<'a>(&'a AtomicUsize);

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ToolRunner {
    const POLL_INTERVAL: Duration = Duration::from_millis(20);

    pub fn new(max_processes: usize, timeout: Option<Duration>) -> Self {
        Self {
            active_count: Arc::new(AtomicUsize::new(0)),
            max_processes: max_processes.max(1),
            timeout,
        }
    }

    /// Execute a command, returning an error if we're at the limit.
    /// A non-zero exit status is reported as `Unknown`, failure to launch as `SystemError`.
    pub fn execute(&self, mut command: Command) -> Result<Output> {
        let previous = self.active_count.fetch_add(1, Ordering::SeqCst);
        let _slot = ActiveSlot(&self.active_count);

        if previous >= self.max_processes {
            return Err(MediaError::SystemError(format!(
                "cannot execute {:?}: {} processes already running (max: {})",
                command.get_program(),
                previous,
                self.max_processes
            )));
        }

        log::debug!("Executing {:?} {:?}, active count: {}",
            command.get_program(), command.get_args().collect::<Vec<_>>(), previous + 1);

        let output = match self.timeout {
            None => command.output().map_err(|e| {
                MediaError::SystemError(format!("failed to invoke {:?}: {}", command.get_program(), e))
            })?,
            Some(timeout) => Self::output_with_timeout(&mut command, timeout)?,
        };

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::Unknown(format!(
                "{:?} exited with {}: {}",
                command.get_program(),
                output.status,
                error.trim()
            )));
        }

        Ok(output)
    }

    fn output_with_timeout(command: &mut Command, timeout: Duration) -> Result<Output> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MediaError::SystemError(format!("failed to invoke {:?}: {}", command.get_program(), e)))?;

        // Drain pipes on their own threads so a chatty tool can't block on a full pipe
        let stdout_reader = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                log::warn!("{:?} exceeded {:?}, killing it", command.get_program(), timeout);
                let _ = child.kill();
                let _ = child.wait();
                return Err(MediaError::SystemError(format!(
                    "{:?} timed out after {:?}",
                    command.get_program(),
                    timeout
                )));
            }
            thread::sleep(Self::POLL_INTERVAL);
        };

        let stdout = stdout_reader.and_then(|h| h.join().ok()).unwrap_or_default();
        let stderr = stderr_reader.and_then(|h| h.join().ok()).unwrap_or_default();

        Ok(Output { status, stdout, stderr })
    }

    /// Get current active process count
    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[test]
    fn test_successful_command_returns_stdout() {
        let runner = ToolRunner::new(2, None);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hello");
        let output = runner.execute(cmd).unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
        assert_eq!(runner.active_count(), 0);
    }

    #[test]
    fn test_failing_command_is_unknown() {
        let runner = ToolRunner::new(2, None);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo broken >&2; exit 3");
        let err = runner.execute(cmd).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.to_string().contains("broken"));
        assert_eq!(runner.active_count(), 0);
    }

    #[test]
    fn test_missing_program_is_system_error() {
        let runner = ToolRunner::new(2, None);
        let err = runner.execute(Command::new("definitely-not-a-real-tool-xyz")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SystemError);
    }

    #[test]
    fn test_saturated_runner_rejects_with_system_error() {
        let runner = Arc::new(ToolRunner::new(1, None));
        let busy_runner = runner.clone();
        let long_run = thread::spawn(move || {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg("sleep 0.5");
            busy_runner.execute(cmd)
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while runner.active_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runner.active_count(), 1);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo second");
        let err = runner.execute(cmd).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SystemError);
        assert!(err.to_string().contains("already running"));

        assert!(long_run.join().unwrap().is_ok());
        assert_eq!(runner.active_count(), 0);
    }

    #[test]
    fn test_timeout_kills_process() {
        let runner = ToolRunner::new(2, Some(Duration::from_millis(100)));
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let started = Instant::now();
        let err = runner.execute(cmd).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SystemError);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_timeout_path_still_collects_output() {
        let runner = ToolRunner::new(2, Some(Duration::from_secs(5)));
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo fast");
        let output = runner.execute(cmd).unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "fast");
    }
}
