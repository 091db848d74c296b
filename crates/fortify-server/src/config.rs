use anyhow::ensure;
use fortify_analytics::predictive::{HeuristicConfig, MAX_WINDOW_DAYS, MIN_READINGS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Allowed CORS origins; empty allows any origin (development)
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub compliance: ComplianceConfig,
    /// Predictive-maintenance tunables
    #[serde(default)]
    pub predictive: HeuristicConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SeaORM connection URL; derived from `data_dir` when omitted
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            data_dir: default_data_dir(),
        }
    }
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite://{}/fortify.db?mode=rwc",
                self.data_dir.trim_end_matches('/')
            ),
        }
    }

    /// Connection URL with any password replaced, for logs.
    pub fn redacted_url(&self) -> String {
        let url = self.connection_url();
        let Some((scheme, rest)) = url.split_once("://") else {
            return url;
        };
        match rest.split_once('@') {
            Some((credentials, host)) => {
                let user = credentials.split(':').next().unwrap_or_default();
                format!("{scheme}://{user}:***@{host}")
            }
            None => url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret; a random one is generated when omitted
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_token_expire_secs")]
    pub token_expire_secs: u64,
    #[serde(default = "default_admin_email")]
    pub default_admin_email: String,
    #[serde(default = "default_admin_password")]
    pub default_admin_password: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_expire_secs: default_token_expire_secs(),
            default_admin_email: default_admin_email(),
            default_admin_password: default_admin_password(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Minimum audit score for a mill certificate
    #[serde(default = "default_certificate_min_score")]
    pub certificate_min_score: f64,
    #[serde(default = "default_certificate_validity_days")]
    pub certificate_validity_days: i64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            certificate_min_score: default_certificate_min_score(),
            certificate_validity_days: default_certificate_validity_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Passing score for courses created without one
    #[serde(default = "default_passing_score")]
    pub default_passing_score: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            default_passing_score: default_passing_score(),
        }
    }
}

// ---- Seed file types (used by `init-templates` CLI subcommand) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesSeedFile {
    #[serde(default)]
    pub templates: Vec<SeedTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTemplate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub sections: serde_json::Value,
    pub scoring_rules: serde_json::Value,
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_token_expire_secs() -> u64 {
    86400
}

fn default_admin_email() -> String {
    "admin@fortify.local".to_string()
}

fn default_admin_password() -> String {
    "changeme".to_string()
}

fn default_certificate_min_score() -> f64 {
    75.0
}

fn default_certificate_validity_days() -> i64 {
    365
}

fn default_passing_score() -> f64 {
    70.0
}

/// Longest certificate lifetime accepted from config.
const MAX_CERTIFICATE_VALIDITY_DAYS: i64 = 3650;

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings outside the ranges the handlers and the heuristic
    /// can work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.auth.token_expire_secs > 0, "[auth] token_expire_secs must be positive");

        let compliance = &self.compliance;
        ensure!(
            is_percentage(compliance.certificate_min_score),
            "[compliance] certificate_min_score must be within 0..=100"
        );
        ensure!(
            (1..=MAX_CERTIFICATE_VALIDITY_DAYS).contains(&compliance.certificate_validity_days),
            "[compliance] certificate_validity_days must be within 1..={MAX_CERTIFICATE_VALIDITY_DAYS}"
        );

        let p = &self.predictive;
        ensure!(
            (1..=MAX_WINDOW_DAYS).contains(&p.window_days),
            "[predictive] window_days must be within 1..={MAX_WINDOW_DAYS}"
        );
        ensure!(
            p.min_readings >= MIN_READINGS,
            "[predictive] min_readings must be at least {MIN_READINGS}"
        );
        ensure!(
            p.near_max_ratio > 0.0 && p.near_max_ratio <= 1.0,
            "[predictive] near_max_ratio must be within (0, 1]"
        );
        ensure!(
            is_positive(p.cv_threshold_pct) && is_positive(p.drift_threshold_pct),
            "[predictive] cv_threshold_pct and drift_threshold_pct must be positive"
        );
        ensure!(
            p.high_drift_threshold_pct.is_finite() && p.high_drift_threshold_pct >= p.drift_threshold_pct,
            "[predictive] high_drift_threshold_pct must not be below drift_threshold_pct"
        );
        ensure!(
            p.imminent_breach_days.is_finite() && p.imminent_breach_days >= 0.0,
            "[predictive] imminent_breach_days must not be negative"
        );
        ensure!(is_positive(p.drift_epsilon), "[predictive] drift_epsilon must be positive");

        ensure!(
            is_percentage(self.training.default_passing_score),
            "[training] default_passing_score must be within 0..=100"
        );
        Ok(())
    }
}

fn is_percentage(v: f64) -> bool {
    (0.0..=100.0).contains(&v)
}

fn is_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            cors_allowed_origins: Vec::new(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            compliance: ComplianceConfig::default(),
            predictive: HeuristicConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.compliance.certificate_min_score, 75.0);
        assert_eq!(config.predictive.window_days, 7);
        assert_eq!(
            config.database.connection_url(),
            "sqlite://data/fortify.db?mode=rwc"
        );
    }

    #[test]
    fn sections_override_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            http_port = 9000

            [database]
            url = "sqlite::memory:"

            [compliance]
            certificate_min_score = 80.0

            [predictive]
            window_days = 14
            min_readings = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.database.connection_url(), "sqlite::memory:");
        assert_eq!(config.compliance.certificate_min_score, 80.0);
        assert_eq!(config.compliance.certificate_validity_days, 365);
        assert_eq!(config.predictive.window_days, 14);
        assert_eq!(config.predictive.min_readings, 12);
        assert_eq!(config.predictive.cv_threshold_pct, 30.0);
        config.validate().unwrap();
    }

    #[test]
    fn defaults_are_valid() {
        ServerConfig::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_settings_are_rejected() {
        let cases: [fn(&mut ServerConfig); 6] = [
            |c| c.predictive.min_readings = 5,
            |c| c.predictive.window_days = 0,
            |c| c.predictive.window_days = i64::MAX,
            |c| c.predictive.near_max_ratio = 1.5,
            |c| c.compliance.certificate_validity_days = i64::MAX,
            |c| c.compliance.certificate_min_score = 120.0,
        ];
        for mutate in cases {
            let mut config = ServerConfig::default();
            mutate(&mut config);
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn load_rejects_low_min_readings() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[predictive]\nmin_readings = 5\n").unwrap();
        let err = ServerConfig::load(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("min_readings"));
    }

    #[test]
    fn redacts_password() {
        let db = DatabaseConfig {
            url: Some("postgres://fortify:secret@db:5432/fortify".into()),
            data_dir: "data".into(),
        };
        assert_eq!(db.redacted_url(), "postgres://fortify:***@db:5432/fortify");
    }
}
