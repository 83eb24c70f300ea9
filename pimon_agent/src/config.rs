//! Agent configuration: command-line flags first, then environment, then
//! defaults.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::bus::DEFAULT_SUBSCRIBER_BUFFER;
use crate::relay::AppCommand;
use crate::sampler::{DEFAULT_PERIOD, DEFAULT_SNAPSHOT_TIMEOUT};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);
pub const DEFAULT_STATIC_DIR: &str = "public";

pub const USAGE: &str = "Usage: pimon_agent [--port PORT|-p PORT] [--host ADDR] \
[--interval-ms MS] [--snapshot-timeout-ms MS] [--buffer N] [--keepalive-ms MS] \
[--app \"PROGRAM ARGS...\"] [--app-dir DIR] [--static-dir DIR]";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("unexpected argument {0:?}")]
    UnexpectedArgument(String),
}

/// Raw flag values as given on the command line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedArgs {
    pub help: bool,
    pub port: Option<String>,
    pub host: Option<String>,
    pub interval_ms: Option<String>,
    pub snapshot_timeout_ms: Option<String>,
    pub buffer: Option<String>,
    pub keepalive_ms: Option<String>,
    pub app: Option<String>,
    pub app_dir: Option<String>,
    pub static_dir: Option<String>,
}

pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, ConfigError> {
    let mut it = args.into_iter();
    let _ = it.next(); // program name
    let mut out = ParsedArgs::default();
    while let Some(arg) = it.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let slot = match flag.as_str() {
            "-h" | "--help" => {
                out.help = true;
                continue;
            }
            "--port" | "-p" => &mut out.port,
            "--host" => &mut out.host,
            "--interval-ms" => &mut out.interval_ms,
            "--snapshot-timeout-ms" => &mut out.snapshot_timeout_ms,
            "--buffer" => &mut out.buffer,
            "--keepalive-ms" => &mut out.keepalive_ms,
            "--app" => &mut out.app,
            "--app-dir" => &mut out.app_dir,
            "--static-dir" => &mut out.static_dir,
            _ => return Err(ConfigError::UnexpectedArgument(arg)),
        };
        let value = match inline {
            Some(v) => v,
            None => it.next().ok_or(ConfigError::MissingValue(flag))?,
        };
        *slot = Some(value);
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub host: IpAddr,
    pub port: u16,
    pub interval: Duration,
    pub snapshot_timeout: Duration,
    pub subscriber_buffer: usize,
    pub keep_alive: Duration,
    pub app: Option<AppCommand>,
    pub static_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            interval: DEFAULT_PERIOD,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            keep_alive: DEFAULT_KEEPALIVE,
            app: None,
            static_dir: Some(PathBuf::from(DEFAULT_STATIC_DIR)),
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let ms: u64 = parse_value(key, value)?;
    if ms == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}

impl AgentConfig {
    /// Merges flags over environment values (looked up through `env`) over
    /// defaults.
    pub fn resolve<F>(args: ParsedArgs, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |flag: Option<String>, key: &str| flag.or_else(|| env(key));
        let mut cfg = AgentConfig::default();

        if let Some(v) = pick(args.port, "PORT") {
            cfg.port = parse_value("port", &v)?;
        }
        if let Some(v) = pick(args.host, "PIMON_AGENT_HOST") {
            cfg.host = parse_value("host", &v)?;
        }
        if let Some(v) = pick(args.interval_ms, "PIMON_AGENT_INTERVAL_MS") {
            cfg.interval = millis("interval-ms", &v)?;
        }
        if let Some(v) = pick(args.snapshot_timeout_ms, "PIMON_AGENT_SNAPSHOT_TIMEOUT_MS") {
            cfg.snapshot_timeout = millis("snapshot-timeout-ms", &v)?;
        }
        if let Some(v) = pick(args.buffer, "PIMON_AGENT_SUBSCRIBER_BUFFER") {
            let n: usize = parse_value("buffer", &v)?;
            if n == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "buffer",
                    value: v,
                });
            }
            cfg.subscriber_buffer = n;
        }
        if let Some(v) = pick(args.keepalive_ms, "PIMON_AGENT_KEEPALIVE_MS") {
            cfg.keep_alive = millis("keepalive-ms", &v)?;
        }
        let app_dir = pick(args.app_dir, "PIMON_AGENT_APP_DIR");
        cfg.app = pick(args.app, "PIMON_AGENT_APP_CMD")
            .as_deref()
            .and_then(AppCommand::parse)
            .map(|app| match app_dir {
                Some(dir) => app.current_dir(dir),
                None => app,
            });
        if let Some(dir) = pick(args.static_dir, "PIMON_AGENT_STATIC_DIR") {
            cfg.static_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        std::iter::once("pimon_agent")
            .chain(v.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn flags_accept_separate_and_inline_values() {
        let parsed = parse_args(args(&["-p", "9002", "--interval-ms=500"])).unwrap();
        assert_eq!(parsed.port.as_deref(), Some("9002"));
        assert_eq!(parsed.interval_ms.as_deref(), Some("500"));
    }

    #[test]
    fn missing_flag_value_is_an_error() {
        assert_eq!(
            parse_args(args(&["--port"])),
            Err(ConfigError::MissingValue("--port".into()))
        );
    }
}
