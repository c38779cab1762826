//! Provides the CLI option parser
//!
//! Used to parse the argv, the environment and an optional config file into
//! a struct that the collector or agent can consume as configuration data.
//! Sources are layered: built-in defaults, then the config file, then
//! command-line flags, then environment variables.

use crate::constants;
use clap::{App, Arg, ArgMatches};
use std::env;
use std::error;
use std::fmt;
use std::fs::File;
use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");

fn default_version() -> String {
    VERSION.unwrap_or("unknown").to_string()
}

fn default_file_storage_path() -> PathBuf {
    Path::new("/tmp/metrics-db.json").to_path_buf()
}

/// Why configuration could not be assembled.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(PathBuf, io::Error),
    /// The config file is not valid TOML.
    Parse(toml::de::Error),
    /// A setting had the wrong type or an unusable value.
    Invalid {
        /// Where the setting came from: a config key, flag or variable.
        setting: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid<S: Into<String>, R: Into<String>>(setting: S, reason: R) -> ConfigError {
        ConfigError::Invalid {
            setting: setting.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ConfigError::Io(ref path, ref e) => {
                write!(f, "could not read {}: {}", path.display(), e)
            }
            ConfigError::Parse(ref e) => write!(f, "could not parse config file: {}", e),
            ConfigError::Invalid {
                ref setting,
                ref reason,
            } => write!(f, "invalid {}: {}", setting, reason),
        }
    }
}

impl error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            ConfigError::Io(_, ref e) => Some(e),
            ConfigError::Parse(ref e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> ConfigError {
        ConfigError::Parse(e)
    }
}

/// Configuration of the collector, `tally-server`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerArgs {
    /// The `host:port` to listen on.
    pub address: String,
    /// Seconds between snapshots of the in-memory store. Zero snapshots
    /// after every write.
    pub store_interval: u64,
    /// Where the in-memory store is snapshotted to.
    pub file_storage_path: PathBuf,
    /// Whether to load the snapshot at startup.
    pub restore: bool,
    /// When set, metrics live in the SQLite database at this path instead of
    /// in memory.
    pub database_dsn: Option<String>,
    /// Shared secret for request and response signatures.
    pub key: Option<String>,
    /// The verbosity setting. The higher the value the more chatty we get.
    pub verbose: u64,
    /// Version string. This is set automatically.
    pub version: String,
}

impl Default for ServerArgs {
    fn default() -> Self {
        ServerArgs {
            address: constants::DEFAULT_ADDRESS.to_string(),
            store_interval: 300,
            file_storage_path: default_file_storage_path(),
            restore: true,
            database_dsn: None,
            key: None,
            verbose: 0,
            version: default_version(),
        }
    }
}

impl ServerArgs {
    /// The snapshot period, `None` when snapshotting after every write.
    pub fn snapshot_interval(&self) -> Option<Duration> {
        if self.store_interval == 0 {
            None
        } else {
            Some(Duration::from_secs(self.store_interval))
        }
    }
}

/// Configuration of the agent, `tally-agent`.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentArgs {
    /// The collector's `host:port` or base URL.
    pub address: String,
    /// Seconds between delivery attempts.
    pub report_interval: u64,
    /// Seconds between samples.
    pub poll_interval: u64,
    /// How many sampled batches may wait for delivery before the sampler
    /// blocks.
    pub rate_limit: usize,
    /// Shared secret for request signatures.
    pub key: Option<String>,
    /// The verbosity setting. The higher the value the more chatty we get.
    pub verbose: u64,
    /// Version string. This is set automatically.
    pub version: String,
}

impl Default for AgentArgs {
    fn default() -> Self {
        AgentArgs {
            address: constants::DEFAULT_ADDRESS.to_string(),
            report_interval: 10,
            poll_interval: 2,
            rate_limit: 1,
            key: None,
            verbose: 0,
            version: default_version(),
        }
    }
}

impl AgentArgs {
    fn validate(self) -> Result<AgentArgs, ConfigError> {
        if self.report_interval == 0 {
            return Err(ConfigError::invalid("report-interval", "must be positive"));
        }
        if self.poll_interval == 0 {
            return Err(ConfigError::invalid("poll-interval", "must be positive"));
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::invalid("rate-limit", "must be positive"));
        }
        Ok(self)
    }
}

fn parse<T>(setting: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(setting, format!("'{}': {}", raw, e)))
}

fn toml_str(value: &toml::Value, key: &str) -> Result<Option<String>, ConfigError> {
    match value.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| ConfigError::invalid(key, "must be a string")),
    }
}

fn toml_uint(value: &toml::Value, key: &str) -> Result<Option<u64>, ConfigError> {
    match value.get(key) {
        None => Ok(None),
        Some(v) => match v.as_integer() {
            Some(i) if i >= 0 => Ok(Some(i as u64)),
            _ => Err(ConfigError::invalid(key, "must be a non-negative integer")),
        },
    }
}

fn toml_bool(value: &toml::Value, key: &str) -> Result<Option<bool>, ConfigError> {
    match value.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(key, "must be a boolean")),
    }
}

fn read_file(path: &str) -> Result<String, ConfigError> {
    let mut buffer = String::new();
    File::open(path)
        .and_then(|mut fp| fp.read_to_string(&mut buffer))
        .map_err(|e| ConfigError::Io(Path::new(path).to_path_buf(), e))?;
    Ok(buffer)
}

fn verbosity(matches: &ArgMatches) -> u64 {
    if matches.is_present("verbose") {
        matches.occurrences_of("verbose")
    } else {
        0
    }
}

fn common_args<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    app.version(VERSION.unwrap_or("unknown"))
        .arg(
            Arg::with_name("config-file")
                .long("config")
                .short("C")
                .value_name("config")
                .help("The config file to feed in.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Turn on verbose output."),
        )
        .arg(
            Arg::with_name("address")
                .long("address")
                .short("a")
                .value_name("host:port")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("key")
                .long("key")
                .short("k")
                .value_name("secret")
                .help("Shared secret for body signatures.")
                .takes_value(true),
        )
}

/// The collector's command line.
pub fn server_app<'a, 'b>() -> App<'a, 'b> {
    common_args(App::new("tally-server"))
        .about("collects gauges and counters pushed by tally agents")
        .arg(
            Arg::with_name("store-interval")
                .long("store-interval")
                .short("i")
                .value_name("seconds")
                .help("Seconds between snapshots, 0 for every write.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("file-storage-path")
                .long("file-storage-path")
                .short("f")
                .value_name("path")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("restore")
                .long("restore")
                .short("r")
                .value_name("bool")
                .help("Load the snapshot at startup.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("database-dsn")
                .long("database-dsn")
                .short("d")
                .value_name("path")
                .help("Keep metrics in this SQLite database.")
                .takes_value(true),
        )
}

/// The agent's command line.
pub fn agent_app<'a, 'b>() -> App<'a, 'b> {
    common_args(App::new("tally-agent"))
        .about("samples host telemetry and pushes it to a tally collector")
        .arg(
            Arg::with_name("report-interval")
                .long("report-interval")
                .short("r")
                .value_name("seconds")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("poll-interval")
                .long("poll-interval")
                .short("p")
                .value_name("seconds")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("rate-limit")
                .long("rate-limit")
                .short("l")
                .value_name("batches")
                .help("Batches allowed to queue before sampling blocks.")
                .takes_value(true),
        )
}

/// Parse the collector configuration file.
///
/// Keys are the kebab-case names of the `ServerArgs` fields. Absent keys
/// keep their defaults.
pub fn parse_server_config(buffer: &str) -> Result<ServerArgs, ConfigError> {
    let mut args = ServerArgs::default();
    let value: toml::Value = toml::from_str(buffer)?;

    args.address = toml_str(&value, "address")?.unwrap_or(args.address);
    args.store_interval = toml_uint(&value, "store-interval")?.unwrap_or(args.store_interval);
    args.file_storage_path = toml_str(&value, "file-storage-path")?
        .map(PathBuf::from)
        .unwrap_or(args.file_storage_path);
    args.restore = toml_bool(&value, "restore")?.unwrap_or(args.restore);
    args.database_dsn = toml_str(&value, "database-dsn")?.or(args.database_dsn);
    args.key = toml_str(&value, "key")?.or(args.key);
    Ok(args)
}

/// Parse the agent configuration file.
///
/// Keys are the kebab-case names of the `AgentArgs` fields. Absent keys
/// keep their defaults.
pub fn parse_agent_config(buffer: &str) -> Result<AgentArgs, ConfigError> {
    let mut args = AgentArgs::default();
    let value: toml::Value = toml::from_str(buffer)?;

    args.address = toml_str(&value, "address")?.unwrap_or(args.address);
    args.report_interval = toml_uint(&value, "report-interval")?.unwrap_or(args.report_interval);
    args.poll_interval = toml_uint(&value, "poll-interval")?.unwrap_or(args.poll_interval);
    args.rate_limit = toml_uint(&value, "rate-limit")?
        .map(|n| n as usize)
        .unwrap_or(args.rate_limit);
    args.key = toml_str(&value, "key")?.or(args.key);
    Ok(args)
}

/// Assemble collector configuration from parsed flags and an environment
/// lookup.
pub fn server_args_from<F>(matches: &ArgMatches, getenv: F) -> Result<ServerArgs, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut args = match matches.value_of("config-file") {
        Some(path) => parse_server_config(&read_file(path)?)?,
        None => ServerArgs::default(),
    };
    args.verbose = verbosity(matches);

    if let Some(v) = matches.value_of("address") {
        args.address = v.to_string();
    }
    if let Some(v) = matches.value_of("store-interval") {
        args.store_interval = parse("--store-interval", v)?;
    }
    if let Some(v) = matches.value_of("file-storage-path") {
        args.file_storage_path = PathBuf::from(v);
    }
    if let Some(v) = matches.value_of("restore") {
        args.restore = parse("--restore", v)?;
    }
    if let Some(v) = matches.value_of("database-dsn") {
        args.database_dsn = Some(v.to_string());
    }
    if let Some(v) = matches.value_of("key") {
        args.key = Some(v.to_string());
    }

    if let Some(v) = getenv("ADDRESS") {
        args.address = v;
    }
    if let Some(v) = getenv("STORE_INTERVAL") {
        args.store_interval = parse("STORE_INTERVAL", &v)?;
    }
    if let Some(v) = getenv("FILE_STORAGE_PATH") {
        args.file_storage_path = PathBuf::from(v);
    }
    if let Some(v) = getenv("RESTORE") {
        args.restore = parse("RESTORE", &v)?;
    }
    if let Some(v) = getenv("DATABASE_DSN") {
        args.database_dsn = Some(v);
    }
    if let Some(v) = getenv("KEY") {
        args.key = Some(v);
    }

    if args.database_dsn.as_ref().map_or(false, |d| d.is_empty()) {
        args.database_dsn = None;
    }
    Ok(args)
}

/// Assemble agent configuration from parsed flags and an environment lookup.
pub fn agent_args_from<F>(matches: &ArgMatches, getenv: F) -> Result<AgentArgs, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut args = match matches.value_of("config-file") {
        Some(path) => parse_agent_config(&read_file(path)?)?,
        None => AgentArgs::default(),
    };
    args.verbose = verbosity(matches);

    if let Some(v) = matches.value_of("address") {
        args.address = v.to_string();
    }
    if let Some(v) = matches.value_of("report-interval") {
        args.report_interval = parse("--report-interval", v)?;
    }
    if let Some(v) = matches.value_of("poll-interval") {
        args.poll_interval = parse("--poll-interval", v)?;
    }
    if let Some(v) = matches.value_of("rate-limit") {
        args.rate_limit = parse("--rate-limit", v)?;
    }
    if let Some(v) = matches.value_of("key") {
        args.key = Some(v.to_string());
    }

    if let Some(v) = getenv("ADDRESS") {
        args.address = v;
    }
    if let Some(v) = getenv("REPORT_INTERVAL") {
        args.report_interval = parse("REPORT_INTERVAL", &v)?;
    }
    if let Some(v) = getenv("POLL_INTERVAL") {
        args.poll_interval = parse("POLL_INTERVAL", &v)?;
    }
    if let Some(v) = getenv("RATE_LIMIT") {
        args.rate_limit = parse("RATE_LIMIT", &v)?;
    }
    if let Some(v) = getenv("KEY") {
        args.key = Some(v);
    }
    args.validate()
}

/// Parse the collector configuration from this process's argv and
/// environment.
///
/// `--help` and `--version` print and exit, as does a malformed command
/// line.
pub fn parse_server_args() -> Result<ServerArgs, ConfigError> {
    let matches = server_app().get_matches();
    server_args_from(&matches, |k| env::var(k).ok())
}

/// Parse the agent configuration from this process's argv and environment.
///
/// `--help` and `--version` print and exit, as does a malformed command
/// line.
pub fn parse_agent_args() -> Result<AgentArgs, ConfigError> {
    let matches = agent_app().get_matches();
    agent_args_from(&matches, |k| env::var(k).ok())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn server(argv: &[&str]) -> ArgMatches<'static> {
        let mut full = vec!["tally-server"];
        full.extend_from_slice(argv);
        server_app().get_matches_from_safe(full).unwrap()
    }

    fn agent(argv: &[&str]) -> ArgMatches<'static> {
        let mut full = vec!["tally-agent"];
        full.extend_from_slice(argv);
        agent_app().get_matches_from_safe(full).unwrap()
    }

    #[test]
    fn server_defaults() {
        let args = server_args_from(&server(&[]), no_env).unwrap();
        assert_eq!("localhost:8080", args.address);
        assert_eq!(300, args.store_interval);
        assert_eq!(Path::new("/tmp/metrics-db.json"), args.file_storage_path);
        assert!(args.restore);
        assert_eq!(None, args.database_dsn);
        assert_eq!(None, args.key);
        assert_eq!(Some(Duration::from_secs(300)), args.snapshot_interval());
    }

    #[test]
    fn config_file_server() {
        let config = r#"
address = "0.0.0.0:9000"
store-interval = 0
file-storage-path = "/var/lib/tally/db.json"
restore = false
database-dsn = "/var/lib/tally/metrics.sqlite"
"#;
        let args = parse_server_config(config).unwrap();
        assert_eq!("0.0.0.0:9000", args.address);
        assert_eq!(0, args.store_interval);
        assert_eq!(None, args.snapshot_interval());
        assert_eq!(Path::new("/var/lib/tally/db.json"), args.file_storage_path);
        assert!(!args.restore);
        assert_eq!(Some("/var/lib/tally/metrics.sqlite".to_string()), args.database_dsn);
    }

    #[test]
    fn config_file_wrong_types() {
        assert!(parse_server_config("store-interval = \"soon\"").is_err());
        assert!(parse_server_config("store-interval = -1").is_err());
        assert!(parse_server_config("restore = 1").is_err());
        assert!(parse_agent_config("address = 8080").is_err());
        assert!(parse_agent_config("this is not toml").is_err());
    }

    #[test]
    fn config_file_agent() {
        let config = r#"
address = "collector:8080"
report-interval = 20
poll-interval = 5
rate-limit = 4
key = "s3cret"
"#;
        let args = parse_agent_config(config).unwrap();
        assert_eq!("collector:8080", args.address);
        assert_eq!(20, args.report_interval);
        assert_eq!(5, args.poll_interval);
        assert_eq!(4, args.rate_limit);
        assert_eq!(Some("s3cret".to_string()), args.key);
    }

    #[test]
    fn env_beats_flag_beats_file() {
        let dir = tempdir::TempDir::new("tally-config").unwrap();
        let path = dir.path().join("agent.toml");
        let mut fp = File::create(&path).unwrap();
        fp.write_all(b"address = \"file:1\"\npoll-interval = 7\nrate-limit = 3\n")
            .unwrap();
        let path = path.to_str().unwrap().to_string();

        let matches = agent(&["-C", &path, "-a", "flag:2", "-p", "8", "-vv"]);
        let mut env = HashMap::new();
        env.insert("ADDRESS", "env:3".to_string());
        let args = agent_args_from(&matches, |k| env.get(k).cloned()).unwrap();

        assert_eq!("env:3", args.address);
        assert_eq!(8, args.poll_interval);
        assert_eq!(3, args.rate_limit);
        assert_eq!(10, args.report_interval);
        assert_eq!(2, args.verbose);
    }

    #[test]
    fn server_env_overrides() {
        let mut env = HashMap::new();
        env.insert("STORE_INTERVAL", "0".to_string());
        env.insert("RESTORE", "false".to_string());
        env.insert("FILE_STORAGE_PATH", "/srv/db.json".to_string());
        env.insert("KEY", "k".to_string());
        env.insert("DATABASE_DSN", "".to_string());
        let matches = server(&["-i", "30", "-d", "/srv/metrics.sqlite"]);
        let args = server_args_from(&matches, |k| env.get(k).cloned()).unwrap();
        assert_eq!(0, args.store_interval);
        assert!(!args.restore);
        assert_eq!(Path::new("/srv/db.json"), args.file_storage_path);
        assert_eq!(Some("k".to_string()), args.key);
        assert_eq!(None, args.database_dsn);
    }

    #[test]
    fn bad_values_are_reported() {
        let mut env = HashMap::new();
        env.insert("RATE_LIMIT", "lots".to_string());
        let err = agent_args_from(&agent(&[]), |k| env.get(k).cloned()).unwrap_err();
        match err {
            ConfigError::Invalid { setting, .. } => assert_eq!("RATE_LIMIT", setting),
            other => panic!("unexpected error: {}", other),
        }
        assert!(agent_args_from(&agent(&["-p", "0"]), no_env).is_err());
        assert!(server_args_from(&server(&["-r", "maybe"]), no_env).is_err());
    }

    #[test]
    fn missing_config_file() {
        let err = server_args_from(&server(&["-C", "/nonexistent/tally.toml"]), no_env).unwrap_err();
        match err {
            ConfigError::Io(path, _) => assert_eq!(Path::new("/nonexistent/tally.toml"), path),
            other => panic!("unexpected error: {}", other),
        }
    }
}
