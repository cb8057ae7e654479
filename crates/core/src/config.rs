use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::actor::Role;
use crate::policy::{self, MarginClass, TierPolicy, TierRule};
use crate::pricing::RoundingMode;

/// Process-wide engine configuration: loaded once at startup and
/// treated as read-only afterwards. Policy changes require a controlled
/// reload, never a live edit.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub thresholds: ThresholdConfig,
    pub rounding: RoundingMode,
    pub policy: PolicyConfig,
    pub escalation: EscalationConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ThresholdConfig {
    pub high_margin_threshold_pct: Decimal,
    pub min_margin_buffer_pct: Decimal,
}

#[derive(Clone, Debug)]
pub struct PolicyConfig {
    pub tiers: Vec<TierRule>,
    pub unrestricted_roles: Vec<Role>,
}

#[derive(Clone, Debug)]
pub struct EscalationConfig {
    pub case_timeout_secs: u64,
    pub reservation_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub rounding_mode: Option<RoundingMode>,
    pub high_margin_threshold_pct: Option<Decimal>,
    pub min_margin_buffer_pct: Option<Decimal>,
    pub case_timeout_secs: Option<u64>,
    pub reservation_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig {
                high_margin_threshold_pct: Decimal::from(30),
                min_margin_buffer_pct: Decimal::from(5),
            },
            rounding: RoundingMode::HalfUp,
            policy: PolicyConfig {
                tiers: policy::default_rules(),
                unrestricted_roles: vec![Role::Admin],
            },
            escalation: EscalationConfig {
                case_timeout_secs: 14_400,
                reservation_timeout_secs: 900,
            },
            database: DatabaseConfig {
                url: "sqlite://tillgate.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl EngineConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tillgate.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Builds the immutable tier policy resolver this configuration
    /// describes.
    pub fn tier_policy(&self) -> Result<TierPolicy, ConfigError> {
        TierPolicy::new(
            self.thresholds.high_margin_threshold_pct,
            self.policy.tiers.clone(),
            self.policy.unrestricted_roles.clone(),
        )
        .map_err(|error| ConfigError::Validation(error.to_string()))
    }

    pub fn case_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            i64::try_from(self.escalation.case_timeout_secs).unwrap_or(i64::MAX),
        )
    }

    pub fn reservation_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            i64::try_from(self.escalation.reservation_timeout_secs).unwrap_or(i64::MAX),
        )
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(thresholds) = patch.thresholds {
            if let Some(value) = thresholds.high_margin_threshold_pct {
                self.thresholds.high_margin_threshold_pct =
                    decimal_from_toml("thresholds.high_margin_threshold_pct", value)?;
            }
            if let Some(value) = thresholds.min_margin_buffer_pct {
                self.thresholds.min_margin_buffer_pct =
                    decimal_from_toml("thresholds.min_margin_buffer_pct", value)?;
            }
        }

        if let Some(rounding) = patch.rounding {
            if let Some(mode) = rounding.mode {
                self.rounding = mode;
            }
        }

        if let Some(policy_patch) = patch.policy {
            if let Some(unrestricted_roles) = policy_patch.unrestricted_roles {
                self.policy.unrestricted_roles = unrestricted_roles;
            }
            if let Some(tiers) = policy_patch.tiers {
                let mut rules = Vec::with_capacity(tiers.len());
                for tier in tiers {
                    rules.push(TierRule {
                        role: tier.role,
                        margin_class: tier.margin_class,
                        max_discount_pct: decimal_from_toml(
                            "policy.tiers.max_discount_pct",
                            tier.max_discount_pct,
                        )?,
                    });
                }
                self.policy.tiers = rules;
            }
        }

        if let Some(escalation) = patch.escalation {
            if let Some(case_timeout_secs) = escalation.case_timeout_secs {
                self.escalation.case_timeout_secs = case_timeout_secs;
            }
            if let Some(reservation_timeout_secs) = escalation.reservation_timeout_secs {
                self.escalation.reservation_timeout_secs = reservation_timeout_secs;
            }
        }

        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TILLGATE_HIGH_MARGIN_THRESHOLD_PCT") {
            self.thresholds.high_margin_threshold_pct =
                parse_decimal("TILLGATE_HIGH_MARGIN_THRESHOLD_PCT", &value)?;
        }
        if let Some(value) = read_env("TILLGATE_MIN_MARGIN_BUFFER_PCT") {
            self.thresholds.min_margin_buffer_pct =
                parse_decimal("TILLGATE_MIN_MARGIN_BUFFER_PCT", &value)?;
        }

        if let Some(value) = read_env("TILLGATE_ROUNDING_MODE") {
            self.rounding = value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                key: "TILLGATE_ROUNDING_MODE".to_string(),
                value,
            })?;
        }

        if let Some(value) = read_env("TILLGATE_CASE_TIMEOUT_SECS") {
            self.escalation.case_timeout_secs = parse_u64("TILLGATE_CASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TILLGATE_RESERVATION_TIMEOUT_SECS") {
            self.escalation.reservation_timeout_secs =
                parse_u64("TILLGATE_RESERVATION_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TILLGATE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TILLGATE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("TILLGATE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TILLGATE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TILLGATE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("TILLGATE_LOGGING_LEVEL").or_else(|| read_env("TILLGATE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TILLGATE_LOGGING_FORMAT").or_else(|| read_env("TILLGATE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(rounding_mode) = overrides.rounding_mode {
            self.rounding = rounding_mode;
        }
        if let Some(high_margin_threshold_pct) = overrides.high_margin_threshold_pct {
            self.thresholds.high_margin_threshold_pct = high_margin_threshold_pct;
        }
        if let Some(min_margin_buffer_pct) = overrides.min_margin_buffer_pct {
            self.thresholds.min_margin_buffer_pct = min_margin_buffer_pct;
        }
        if let Some(case_timeout_secs) = overrides.case_timeout_secs {
            self.escalation.case_timeout_secs = case_timeout_secs;
        }
        if let Some(reservation_timeout_secs) = overrides.reservation_timeout_secs {
            self.escalation.reservation_timeout_secs = reservation_timeout_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_thresholds(&self.thresholds)?;
        self.tier_policy().map(|_| ())?;
        validate_escalation(&self.escalation)?;
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tillgate.toml"), PathBuf::from("config/tillgate.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_thresholds(thresholds: &ThresholdConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("thresholds.high_margin_threshold_pct", thresholds.high_margin_threshold_pct),
        ("thresholds.min_margin_buffer_pct", thresholds.min_margin_buffer_pct),
    ] {
        if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Validation(format!(
                "{name} must be in range 0..=100, got {value}"
            )));
        }
    }
    Ok(())
}

fn validate_escalation(escalation: &EscalationConfig) -> Result<(), ConfigError> {
    if escalation.case_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "escalation.case_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if escalation.reservation_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "escalation.reservation_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    value.parse::<Decimal>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn decimal_from_toml(field: &str, value: f64) -> Result<Decimal, ConfigError> {
    Decimal::try_from(value)
        .map_err(|_| ConfigError::Validation(format!("{field} is not a representable number")))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    thresholds: Option<ThresholdsPatch>,
    rounding: Option<RoundingPatch>,
    policy: Option<PolicyPatch>,
    escalation: Option<EscalationPatch>,
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ThresholdsPatch {
    high_margin_threshold_pct: Option<f64>,
    min_margin_buffer_pct: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RoundingPatch {
    mode: Option<RoundingMode>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyPatch {
    unrestricted_roles: Option<Vec<Role>>,
    tiers: Option<Vec<TierRulePatch>>,
}

#[derive(Debug, Deserialize)]
struct TierRulePatch {
    role: Role,
    margin_class: MarginClass,
    max_discount_pct: f64,
}

#[derive(Debug, Default, Deserialize)]
struct EscalationPatch {
    case_timeout_secs: Option<u64>,
    reservation_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use tempfile::TempDir;

    use super::{ConfigError, ConfigOverrides, EngineConfig, LoadOptions, LogFormat};
    use crate::domain::actor::Role;
    use crate::pricing::RoundingMode;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_the_retail_policy_table() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = EngineConfig::default();
        config.validate().map_err(|err| format!("default config should validate: {err}"))?;

        let policy = config.tier_policy().map_err(|err| err.to_string())?;
        let staff_high = policy.resolve(Role::Staff, Decimal::from(32));
        ensure(
            staff_high.max_discount_pct == Some(Decimal::from(10)),
            "staff high-margin ceiling should default to 10%",
        )?;
        ensure(
            policy.resolve(Role::Admin, Decimal::from(32)).unrestricted,
            "admin should default to unrestricted",
        )?;
        ensure(
            config.rounding == RoundingMode::HalfUp,
            "default rounding mode should be half-up",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TILLGATE_DB_URL", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tillgate.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_TILLGATE_DB_URL}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = EngineConfig::load(LoadOptions {
                config_path: Some(path),
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://interpolated.db",
                "database url should be loaded from environment",
            )
        })();

        clear_vars(&["TEST_TILLGATE_DB_URL"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TILLGATE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("TILLGATE_CASE_TIMEOUT_SECS", "600");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tillgate.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[escalation]
case_timeout_secs = 7200

[rounding]
mode = "half_even"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = EngineConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(
                config.escalation.case_timeout_secs == 600,
                "env case timeout should win over file",
            )?;
            ensure(
                config.rounding == RoundingMode::HalfEven,
                "file rounding mode should win over defaults",
            )
        })();

        clear_vars(&["TILLGATE_DATABASE_URL", "TILLGATE_CASE_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn policy_table_from_file_must_stay_complete() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("tillgate.toml");
        fs::write(
            &path,
            r#"
[policy]
unrestricted_roles = []

[[policy.tiers]]
role = "staff"
margin_class = "standard"
max_discount_pct = 5.0
"#,
        )
        .map_err(|err| err.to_string())?;

        let error = match EngineConfig::load(LoadOptions {
            config_path: Some(path),
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure for incomplete table".to_string()),
            Err(error) => error,
        };

        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("missing policy row")),
            "validation failure should mention the missing policy row",
        )
    }

    #[test]
    fn validation_rejects_zero_timeouts_from_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TILLGATE_CASE_TIMEOUT_SECS", "0");

        let result = (|| -> Result<(), String> {
            let error = match EngineConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message) if message.contains("case_timeout_secs")
                ),
                "validation failure should mention case_timeout_secs",
            )
        })();

        clear_vars(&["TILLGATE_CASE_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn invalid_env_override_is_rejected_with_key_and_value() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TILLGATE_DATABASE_MAX_CONNECTIONS", "many");

        let result = (|| -> Result<(), String> {
            let error = match EngineConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected invalid override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, ref value }
                        if key == "TILLGATE_DATABASE_MAX_CONNECTIONS" && value == "many"
                ),
                "invalid override should surface key and value",
            )
        })();

        clear_vars(&["TILLGATE_DATABASE_MAX_CONNECTIONS"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TILLGATE_LOG_LEVEL", "warn");
        env::set_var("TILLGATE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = EngineConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "log level should come from the alias var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "log format should come from the alias var",
            )
        })();

        clear_vars(&["TILLGATE_LOG_LEVEL", "TILLGATE_LOG_FORMAT"]);
        result
    }
}
