// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! shmfs shell: mounts an in-memory volume and runs path-based commands
//! against it.
//!
//! Commands come from `--script`, from the trailing arguments, or from
//! stdin when neither is given. Each command prints its output; a failing
//! command is reported and the remaining commands still run.

mod script;

use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use shmfs_core::{DetachedVnodeTable, MountParams, Volume, VolumeConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use script::Shell;

#[derive(Parser)]
#[command(name = "shmfs-shell", version, about)]
struct Args {
    /// Volume configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `shmfs_core=trace`. Overrides RUST_LOG.
    #[arg(long, env = "SHMFS_LOG_LEVEL")]
    log_level: Option<String>,

    /// File with one command per line
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Device string acknowledged at mount time
    #[arg(long)]
    device: Option<String>,

    /// Commands to run, one per argument (e.g. "mkdir /a")
    commands: Vec<String>,
}

fn load_config(config_path: Option<&PathBuf>) -> Result<VolumeConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: VolumeConfig = serde_json::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(VolumeConfig::default()),
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn collect_commands(args: &Args) -> Result<Vec<String>> {
    if let Some(path) = &args.script {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        return Ok(text.lines().map(str::to_string).collect());
    }
    if !args.commands.is_empty() {
        return Ok(args.commands.clone());
    }
    io::stdin()
        .lock()
        .lines()
        .collect::<io::Result<Vec<_>>>()
        .context("reading commands from stdin")
}

/// Run every command, printing output, and return how many failed.
fn run_commands(shell: &Shell, commands: &[String]) -> usize {
    let mut failures = 0;
    for line in commands {
        match shell.run_line(line) {
            Ok(out) => print!("{out}"),
            Err(err) => {
                failures += 1;
                error!("{err:#}");
                eprintln!("error: {err:#}");
            }
        }
    }
    failures
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let config = load_config(args.config.as_ref())?;
    info!(volume_name = %config.volume_name, content = ?config.content, "mounting volume");
    let params = MountParams {
        device: args.device.clone(),
        ..MountParams::default()
    };
    let volume = Volume::mount(config, params, Arc::new(DetachedVnodeTable))
        .context("mounting volume")?;
    let shell = Shell::new(volume);

    let commands = collect_commands(&args)?;
    let failures = run_commands(&shell, &commands);
    info!(
        volume = shell.volume().id().0,
        commands = commands.len(),
        failures,
        "script finished"
    );
    shell.finish();

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmfs_core::ContentStoreKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_loading_default() {
        let config = load_config(None).unwrap();
        assert_eq!(config.volume_name, "shmfs");
        assert_eq!(config.content, ContentStoreKind::Flat);
    }

    #[test]
    fn test_config_loading_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let config_json = r#"{
            "volume_name": "scratch",
            "content": { "kind": "paged", "page_size": 8192 },
            "track_events": false
        }"#;
        temp_file.write_all(config_json.as_bytes()).unwrap();

        let config = load_config(Some(&temp_file.path().to_path_buf())).unwrap();
        assert_eq!(config.volume_name, "scratch");
        assert_eq!(config.content, ContentStoreKind::Paged { page_size: 8192 });
        assert!(!config.track_events);
        assert_eq!(config.block_size, 512);
    }

    #[test]
    fn test_config_loading_rejects_bad_json() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"{ not json").unwrap();
        assert!(load_config(Some(&temp_file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_script_file_commands() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "mkdir /a\nwrite /a/f hi\n# done").unwrap();
        let args = Args::parse_from([
            "shmfs-shell",
            "--script",
            temp_file.path().to_str().unwrap(),
        ]);
        let commands = collect_commands(&args).unwrap();
        assert_eq!(commands.len(), 3);
    }

    #[test]
    fn test_failures_are_counted_and_later_commands_run() {
        let volume = Volume::mount(
            VolumeConfig::default(),
            MountParams::default(),
            Arc::new(DetachedVnodeTable),
        )
        .unwrap();
        let shell = Shell::new(volume);
        let commands: Vec<String> = ["rmdir /missing", "mkdir /a", "mkdir /a"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(run_commands(&shell, &commands), 2);
        assert_eq!(shell.run_line("ls /").unwrap(), "a/\n");
    }
}
