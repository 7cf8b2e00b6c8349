use std::fs::File;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::app::error::AppError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct StreamedOutput {
    pub stderr: String,
    pub exit_code: Option<i32>,
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::<u8>::new();
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&chunk[..count]),
                Err(_) => break,
            }
        }
        buffer
    })
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::system(format!("Failed to spawn {program}: {err}"), trace_id))?;

    // Drain stdout/stderr on their own threads; a chatty child blocks once
    // the pipe buffer fills and would otherwise turn into a bogus timeout.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stdout_handle = drain(stdout);
    let stderr_handle = drain(stderr);

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AppError::bridge(
                        format!("{program} timed out after {}s", timeout.as_secs()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll {program}: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

/// Run a command with its stdout handed directly to `sink`.
///
/// Used for raw partition copies: the bytes never pass through this
/// process's memory, and the call blocks until the child exits. No timeout
/// applies; a large partition legitimately streams for minutes.
pub fn run_command_to_file(
    program: &str,
    args: &[String],
    sink: File,
    trace_id: &str,
) -> Result<StreamedOutput, AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(sink))
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::system(format!("Failed to spawn {program}: {err}"), trace_id))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stderr_handle = drain(stderr);

    let status = child
        .wait()
        .map_err(|err| AppError::system(format!("Failed to wait for {program}: {err}"), trace_id))?;
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(StreamedOutput {
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code: status.code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_with_timeout_does_not_deadlock_on_large_stdout() {
        // If stdout/stderr are piped but not drained, the child can block once
        // the pipe buffer fills, causing an otherwise-fast command to "hang"
        // until the timeout fires.
        let trace_id = "test-trace-large-output";

        let (program, args, min_stdout_len) = if cfg!(windows) {
            (
                "cmd.exe".to_string(),
                vec![
                    "/C".to_string(),
                    "for /L %i in (1,1,100000) do @echo 1234567890".to_string(),
                ],
                1_000_000usize,
            )
        } else {
            (
                "sh".to_string(),
                vec![
                    "-c".to_string(),
                    "i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done"
                        .to_string(),
                ],
                1_000_000usize,
            )
        };

        let output = run_command_with_timeout(&program, &args, Duration::from_secs(10), trace_id)
            .expect("expected large-output command to complete without timing out");

        assert_eq!(output.exit_code, Some(0));
        assert!(
            output.stdout.len() >= min_stdout_len,
            "expected stdout >= {min_stdout_len}, got {}",
            output.stdout.len()
        );
    }

    #[cfg(unix)]
    #[test]
    fn run_command_with_timeout_kills_hung_child() {
        let args = vec!["-c".to_string(), "sleep 30".to_string()];
        let err = run_command_with_timeout("sh", &args, Duration::from_millis(200), "test-trace")
            .expect_err("expected timeout");
        assert_eq!(err.code, "ERR_BRIDGE");
        assert!(err.error.contains("timed out"));
    }

    #[test]
    fn run_command_with_timeout_reports_spawn_failure() {
        let err = run_command_with_timeout(
            "blockdump-no-such-binary",
            &[],
            Duration::from_secs(1),
            "test-trace",
        )
        .expect_err("expected spawn failure");
        assert_eq!(err.code, "ERR_SYSTEM");
    }

    #[cfg(unix)]
    #[test]
    fn run_command_to_file_streams_stdout_to_disk() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let path = dir.path().join("out.bin");
        let sink = File::create(&path).expect("create sink");

        let args = vec!["-c".to_string(), "printf 'raw-bytes'".to_string()];
        let streamed =
            run_command_to_file("sh", &args, sink, "test-trace").expect("streamed command");

        assert_eq!(streamed.exit_code, Some(0));
        assert_eq!(std::fs::read(&path).expect("read sink"), b"raw-bytes");
    }
}
