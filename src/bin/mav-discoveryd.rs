//! `mav-discoveryd` binary entry point: CLI parsing, logging setup, config
//! loading, and daemon lifecycle (spec §6).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use mav_discovery::config::{PackageConfig, RpcConfig};
use mav_discovery::Runtime;

#[derive(Parser)]
#[command(name = "mav-discoveryd", about = "MAVLink device discovery daemon")]
struct Cli {
    /// Path to the RPC (broker) configuration file.
    #[arg(long = "rpc-config", alias = "rpc_config")]
    rpc_config: PathBuf,

    /// Path to the package configuration file.
    #[arg(long = "package-config", alias = "package_config")]
    package_config: PathBuf,
}

/// Rewrites the single-dash `-rpc_config`/`-package_config` spellings into
/// their `--rpc-config`/`--package-config` equivalents before clap sees
/// them: clap's long options only ever match a `--` prefix, but these
/// single-dash forms are accepted spellings too.
fn normalize_args(args: impl Iterator<Item = String>) -> Vec<String> {
    args.map(|arg| match arg.as_str() {
        "-rpc_config" => "--rpc-config".to_string(),
        "-package_config" => "--package-config".to_string(),
        _ => arg,
    })
    .collect()
}

fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args()));

    let package_config = match PackageConfig::load(&cli.package_config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load package config {}: {e}", cli.package_config.display());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&package_config) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let rpc_config = match RpcConfig::load(&cli.rpc_config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load RPC config {}: {e}", cli.rpc_config.display());
            return ExitCode::FAILURE;
        }
    };

    let runtime = match Runtime::start(package_config, rpc_config) {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    wait_for_shutdown_signal();
    log::info!("shutdown signal received, stopping");
    runtime.shutdown();
    log::info!("shutdown complete");

    ExitCode::SUCCESS
}

fn init_logging(config: &PackageConfig) -> Result<(), fern::InitError> {
    let level = match config.log_level.to_ascii_uppercase().as_str() {
        "DEBUG" => log::LevelFilter::Debug,
        "WARNING" => log::LevelFilter::Warn,
        "ERROR" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(log_file) = &config.log_file {
        dispatch = dispatch.chain(fern::log_file(log_file)?);
    }

    dispatch.apply().map_err(fern::InitError::SetLoggerError)
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Blocks until SIGINT/SIGTERM or a `Ctrl+C` equivalent is observed.
#[cfg(unix)]
fn wait_for_shutdown_signal() {
    extern "C" fn handle(_signum: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    unsafe {
        libc::signal(libc::SIGINT, handle as usize as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle as usize as libc::sighandler_t);
    }

    while !INTERRUPTED.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
}

#[cfg(not(unix))]
fn wait_for_shutdown_signal() {
    while !INTERRUPTED.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_dash_spellings_are_rewritten() {
        let args = normalize_args(
            vec!["mav-discoveryd", "-rpc_config", "rpc.json", "-package_config", "pkg.json"]
                .into_iter()
                .map(str::to_string),
        );
        assert_eq!(args, vec!["mav-discoveryd", "--rpc-config", "rpc.json", "--package-config", "pkg.json"]);
    }

    #[test]
    fn double_dash_spellings_pass_through_unchanged() {
        let args = normalize_args(vec!["mav-discoveryd", "--rpc-config", "rpc.json"].into_iter().map(str::to_string));
        assert_eq!(args, vec!["mav-discoveryd", "--rpc-config", "rpc.json"]);
    }
}
