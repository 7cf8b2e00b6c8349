use std::fs::File;
use std::time::Duration;

use crate::app::adb::locator::resolve_adb_program;
use crate::app::adb::parse::parse_adb_devices;
use crate::app::adb::runner::{
    run_command_to_file, run_command_with_timeout, CommandOutput, StreamedOutput,
};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::models::{AdbInfo, DeviceSummary};

/// The single seam to the device: one adb installation, at most one target
/// device, one blocking invocation at a time.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    program: String,
    serial: Option<String>,
    timeout: Duration,
}

impl AdbBridge {
    pub fn new(program: impl Into<String>, serial: Option<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            serial: serial
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            timeout,
        }
    }

    /// Serial precedence: CLI flag, then `ANDROID_SERIAL`, then the
    /// configured default. Empty means "whatever single device adb picks".
    pub fn from_config(config: &AppConfig, cli_adb: Option<&str>, cli_serial: Option<&str>) -> Self {
        let program = resolve_adb_program(cli_adb, &config.adb.command_path);
        let serial = cli_serial
            .map(str::to_string)
            .or_else(|| {
                std::env::var("ANDROID_SERIAL")
                    .ok()
                    .filter(|value| !value.trim().is_empty())
            })
            .or_else(|| Some(config.adb.serial.clone()));
        Self::new(
            program,
            serial,
            Duration::from_secs(config.adb.command_timeout_secs),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn device_args(&self, args: &[&str]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(serial) = &self.serial {
            full.push("-s".to_string());
            full.push(serial.clone());
        }
        full.extend(args.iter().map(|value| value.to_string()));
        full
    }

    /// Run a device-targeted adb invocation and require a zero exit code.
    pub fn run(&self, args: &[&str], trace_id: &str) -> Result<CommandOutput, AppError> {
        let full = self.device_args(args);
        let output = run_command_with_timeout(&self.program, &full, self.timeout, trace_id)?;
        if output.exit_code != Some(0) {
            return Err(AppError::bridge(
                format!(
                    "adb {} exited with {:?}: {}",
                    args.first().copied().unwrap_or_default(),
                    output.exit_code,
                    output.stderr.trim()
                ),
                trace_id,
            ));
        }
        Ok(output)
    }

    /// Remote shell pass-through for the fixed interrogation scripts.
    pub fn run_shell(&self, script: &str, trace_id: &str) -> Result<CommandOutput, AppError> {
        self.run(&["shell", script], trace_id)
    }

    /// Stream a device command's stdout straight into `sink`. No timeout.
    pub fn run_to_file(
        &self,
        args: &[&str],
        sink: File,
        trace_id: &str,
    ) -> Result<StreamedOutput, AppError> {
        let full = self.device_args(args);
        run_command_to_file(&self.program, &full, sink, trace_id)
    }

    pub fn check_adb(&self, trace_id: &str) -> AdbInfo {
        let args = vec!["version".to_string()];
        match run_command_with_timeout(&self.program, &args, self.timeout, trace_id) {
            Ok(output) if output.exit_code == Some(0) => AdbInfo {
                available: true,
                version_output: output.stdout.trim().to_string(),
                command_path: self.program.clone(),
                error: None,
            },
            Ok(output) => AdbInfo {
                available: false,
                version_output: output.stdout.trim().to_string(),
                command_path: self.program.clone(),
                error: Some(format!("adb version exited with {:?}", output.exit_code)),
            },
            Err(err) => AdbInfo {
                available: false,
                version_output: String::new(),
                command_path: self.program.clone(),
                error: Some(err.error),
            },
        }
    }

    pub fn list_devices(&self, trace_id: &str) -> Result<Vec<DeviceSummary>, AppError> {
        let args = vec!["devices".to_string(), "-l".to_string()];
        let output = run_command_with_timeout(&self.program, &args, self.timeout, trace_id)?;
        if output.exit_code != Some(0) {
            return Err(AppError::bridge(
                format!(
                    "adb devices exited with {:?}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
                trace_id,
            ));
        }
        Ok(parse_adb_devices(&output.stdout))
    }
}
