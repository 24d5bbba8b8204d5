use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::engine::RetryPolicy;

const DEFAULT_SCHEDULE_GRADER_CRON: &str = "0 */5 * * * *";
const DEFAULT_DAILY_GRADER_CRON: &str = "0 0 0 * * *";

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    server: ServerSettings,
    runtime: RuntimeSettings,
    api: ApiSettings,
    database: DatabaseSettings,
    s3: S3Settings,
    email: EmailSettings,
    grading: GradingSettings,
    orchestration: OrchestrationSettings,
    telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerSettings {
    host: ServerHost,
    port: ServerPort,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiSettings {
    pub(crate) project_name: String,
    pub(crate) version: String,
    pub(crate) api_v1_str: String,
    pub(crate) public_base_url: String,
    pub(crate) admin_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct DatabaseSettings {
    pub(crate) postgres_server: String,
    pub(crate) postgres_port: u16,
    pub(crate) postgres_user: String,
    pub(crate) postgres_password: String,
    pub(crate) postgres_db: String,
    pub(crate) database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct S3Settings {
    pub(crate) endpoint: String,
    pub(crate) access_key: String,
    pub(crate) secret_key: String,
    pub(crate) region: String,
    pub(crate) report_bucket: String,
    pub(crate) result_bucket: String,
}

#[derive(Debug, Clone)]
pub(crate) struct EmailSettings {
    pub(crate) smtp_host: String,
    pub(crate) smtp_port: u16,
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) from_address: String,
    pub(crate) from_name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct GradingSettings {
    pub(crate) grader_timeout_seconds: u64,
    pub(crate) schedule_grader_cron: String,
    pub(crate) daily_grader_cron: String,
}

#[derive(Debug, Clone)]
pub(crate) struct OrchestrationSettings {
    pub(crate) persist_max_attempts: u32,
    pub(crate) persist_retry_interval_seconds: u64,
    pub(crate) instance_retention_hours: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Test => "test",
        }
    }

    fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerHost(String);

#[derive(Debug, Clone, Copy)]
pub(crate) struct ServerPort(u16);

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid server host: {0}")]
    InvalidHost(String),
    #[error("invalid server port: {0}")]
    InvalidPort(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("ORCHESTRATOR_HOST", "0.0.0.0");
        let port = env_or_default("ORCHESTRATOR_PORT", "8000");

        let environment = parse_environment(
            env_optional("ORCHESTRATOR_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("ORCHESTRATOR_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Grading Orchestrator");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");
        let admin_api_key = env_optional("ADMIN_API_KEY");

        let server_host = ServerHost::parse(host)?;
        let server_port = ServerPort::parse(port)?;
        let public_base_url = env_optional("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", server_port.value()));

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "grader");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "grading_db");
        let database_url = env_optional("DATABASE_URL");

        let s3_endpoint = env_or_default("S3_ENDPOINT", "");
        let s3_access_key = env_or_default("S3_ACCESS_KEY", "");
        let s3_secret_key = env_or_default("S3_SECRET_KEY", "");
        let s3_region = env_or_default("S3_REGION", "us-east-1");
        let report_bucket = env_or_default("S3_REPORT_BUCKET", "report");
        let result_bucket = env_or_default("S3_RESULT_BUCKET", "testresult");

        let smtp_host = env_or_default("EMAIL_SMTP", "");
        let smtp_port = parse_u16("EMAIL_SMTP_PORT", env_or_default("EMAIL_SMTP_PORT", "587"))?;
        let email_username = env_or_default("EMAIL_USER_NAME", "");
        let email_password = env_or_default("EMAIL_PASSWORD", "");
        let from_address = env_or_default("EMAIL_FROM_ADDRESS", "");
        let from_name = env_or_default("EMAIL_FROM_NAME", "Automatic Grading Engine");

        let grader_timeout_seconds =
            parse_u64("GRADER_TIMEOUT_SECONDS", env_or_default("GRADER_TIMEOUT_SECONDS", "480"))?;
        if grader_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GRADER_TIMEOUT_SECONDS",
                value: grader_timeout_seconds.to_string(),
            });
        }
        let schedule_grader_cron =
            env_or_default("SCHEDULE_GRADER_CRON", DEFAULT_SCHEDULE_GRADER_CRON);
        let daily_grader_cron = env_or_default("DAILY_GRADER_CRON", DEFAULT_DAILY_GRADER_CRON);

        let persist_max_attempts =
            parse_u32("PERSIST_MAX_ATTEMPTS", env_or_default("PERSIST_MAX_ATTEMPTS", "2"))?;
        if persist_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PERSIST_MAX_ATTEMPTS",
                value: persist_max_attempts.to_string(),
            });
        }
        let persist_retry_interval_seconds = parse_u64(
            "PERSIST_RETRY_INTERVAL_SECONDS",
            env_or_default("PERSIST_RETRY_INTERVAL_SECONDS", "5"),
        )?;
        let instance_retention_hours =
            parse_u32("INSTANCE_RETENTION_HOURS", env_or_default("INSTANCE_RETENTION_HOURS", "24"))?;

        let log_level = env_or_default("LOG_LEVEL", "info");
        let log_json = env_optional("LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(true);

        if strict_config {
            if s3_access_key.is_empty() || s3_secret_key.is_empty() {
                return Err(ConfigError::MissingSecret("S3_ACCESS_KEY/S3_SECRET_KEY"));
            }
            if smtp_host.is_empty() || email_password.is_empty() {
                return Err(ConfigError::MissingSecret("EMAIL_SMTP/EMAIL_PASSWORD"));
            }
        }

        Ok(Self {
            server: ServerSettings { host: server_host, port: server_port },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str, public_base_url, admin_api_key },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            s3: S3Settings {
                endpoint: s3_endpoint,
                access_key: s3_access_key,
                secret_key: s3_secret_key,
                region: s3_region,
                report_bucket,
                result_bucket,
            },
            email: EmailSettings {
                smtp_host,
                smtp_port,
                username: email_username,
                password: email_password,
                from_address,
                from_name,
            },
            grading: GradingSettings {
                grader_timeout_seconds,
                schedule_grader_cron,
                daily_grader_cron,
            },
            orchestration: OrchestrationSettings {
                persist_max_attempts,
                persist_retry_interval_seconds,
                instance_retention_hours,
            },
            telemetry: TelemetrySettings {
                log_level,
                json: log_json,
                prometheus_enabled,
            },
        })
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.as_str(), self.server.port.value())
    }

    pub(crate) fn server_host(&self) -> &str {
        self.server.host.as_str()
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.value()
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn s3(&self) -> &S3Settings {
        &self.s3
    }

    pub(crate) fn email(&self) -> &EmailSettings {
        &self.email
    }

    pub(crate) fn grading(&self) -> &GradingSettings {
        &self.grading
    }

    pub(crate) fn orchestration(&self) -> &OrchestrationSettings {
        &self.orchestration
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }
}

impl DatabaseSettings {
    pub(crate) fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_server,
            self.postgres_port,
            self.postgres_db
        )
    }
}

impl EmailSettings {
    pub(crate) fn is_configured(&self) -> bool {
        !self.smtp_host.is_empty() && !self.from_address.is_empty()
    }
}

impl GradingSettings {
    pub(crate) fn grader_timeout(&self) -> Duration {
        Duration::from_secs(self.grader_timeout_seconds)
    }
}

impl OrchestrationSettings {
    pub(crate) fn persist_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.persist_max_attempts,
            Duration::from_secs(self.persist_retry_interval_seconds),
        )
    }

    /// How long finished instances stay queryable before they are dropped.
    pub(crate) fn instance_retention(&self) -> time::Duration {
        time::Duration::hours(i64::from(self.instance_retention_hours))
    }
}

impl ServerHost {
    fn parse(value: String) -> Result<Self, ConfigError> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidHost(value));
        }
        Ok(Self(trimmed.to_string()))
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

impl ServerPort {
    fn parse(value: String) -> Result<Self, ConfigError> {
        match value.trim().parse::<u16>() {
            Ok(port) if port > 0 => Ok(Self(port)),
            _ => Err(ConfigError::InvalidPort(value)),
        }
    }

    fn value(self) -> u16 {
        self.0
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_u16(field: &'static str, value: String) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|val| val.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn parse_environment_variants() {
        assert_eq!(parse_environment(Some("prod".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("production".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("staging".to_string())), Environment::Staging);
        assert_eq!(parse_environment(Some("testing".to_string())), Environment::Test);
        assert_eq!(parse_environment(None), Environment::Development);
    }

    #[test]
    fn server_port_rejects_zero_and_garbage() {
        assert!(ServerPort::parse("0".to_string()).is_err());
        assert!(ServerPort::parse("http".to_string()).is_err());
        assert_eq!(ServerPort::parse(" 8080 ".to_string()).expect("port").value(), 8080);
    }

    #[test]
    fn database_url_is_built_from_parts() {
        let database = DatabaseSettings {
            postgres_server: "db".to_string(),
            postgres_port: 5433,
            postgres_user: "u".to_string(),
            postgres_password: "p".to_string(),
            postgres_db: "grading".to_string(),
            database_url: None,
        };
        assert_eq!(database.database_url(), "postgresql://u:p@db:5433/grading");
    }

    #[test]
    fn load_uses_defaults() {
        let _guard = test_support::env_lock();
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.grading().grader_timeout_seconds, 480);
        assert_eq!(settings.grading().schedule_grader_cron, DEFAULT_SCHEDULE_GRADER_CRON);
        assert_eq!(settings.s3().report_bucket, "report");
        assert_eq!(settings.s3().result_bucket, "testresult");

        let policy = settings.orchestration().persist_retry_policy();
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.first_retry_interval(), Duration::from_secs(5));
        assert_eq!(settings.orchestration().instance_retention(), time::Duration::DAY);
    }

    #[test]
    fn load_rejects_zero_attempts() {
        let _guard = test_support::env_lock();
        test_support::set_test_env();
        env::set_var("PERSIST_MAX_ATTEMPTS", "0");

        let result = Settings::load();
        env::remove_var("PERSIST_MAX_ATTEMPTS");

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "PERSIST_MAX_ATTEMPTS", .. })
        ));
    }

    #[test]
    fn strict_config_requires_secrets() {
        let _guard = test_support::env_lock();
        test_support::set_test_env();
        env::set_var("ORCHESTRATOR_STRICT_CONFIG", "1");

        let result = Settings::load();
        env::remove_var("ORCHESTRATOR_STRICT_CONFIG");

        assert!(matches!(result, Err(ConfigError::MissingSecret(_))));
    }
}
