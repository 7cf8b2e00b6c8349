use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const DEFAULT_OUTPUT_DIR: &str = "./dumped";

/// Resolve the destination directory for dump artifacts.
///
/// Accepts relative paths, `~`/`~/...` shortcuts and `$VAR` references, and
/// absolutizes against the current directory. An empty value falls back to
/// `fallback`, then to [`DEFAULT_OUTPUT_DIR`].
pub fn resolve_output_dir(raw: &str, fallback: &str) -> PathBuf {
    let mut value = raw.trim().to_string();
    if value.is_empty() {
        value = fallback.trim().to_string();
    }
    if value.is_empty() {
        value = DEFAULT_OUTPUT_DIR.to_string();
    }
    let expanded = expand_path(&value);
    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(expanded)
    }
}

fn expand_path(value: &str) -> PathBuf {
    let with_vars = expand_env_vars(value);
    if with_vars == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = with_vars.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(with_vars)
}

fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(current) = chars.next() {
        if current != '$' {
            out.push(current);
            continue;
        }
        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                name.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            out.push('$');
            continue;
        }
        match std::env::var(&name) {
            Ok(resolved) => out.push_str(&resolved),
            Err(_) => {
                // Unknown variables are kept literally rather than erased.
                out.push('$');
                out.push_str(&name);
            }
        }
    }
    out
}

/// Fail closed: a destination that cannot be created aborts the whole dump
/// batch before any partition is attempted.
pub fn ensure_output_dir(path: &Path, trace_id: &str) -> Result<(), AppError> {
    std::fs::create_dir_all(path).map_err(|err| {
        AppError::system(
            format!("Failed to create output directory {}: {err}", path.display()),
            trace_id,
        )
    })
}
