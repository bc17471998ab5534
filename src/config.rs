use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::path::PathBuf;

use crate::api::ServiceSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub email: EmailConfig,
    pub payments: PaymentsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    pub jwt_expiry_days: i64,
    pub temp_token_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub resend_api_key: Option<SecretString>,
    pub from: String,
    pub frontend_url: String,
    pub attachment_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

const DEFAULT_EMAIL_FROM: &str = "Courtside Basketball <noreply@courtside.local>";

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let server = ServerConfig {
            host: or("HOST", "0.0.0.0"),
            port: or("PORT", "8080")
                .parse()
                .context("PORT must be a valid number")?,
            environment: or("ENVIRONMENT", "development"),
        };

        let database = DatabaseConfig {
            url: var("DATABASE_URL")
                .or_else(|| var("MONGO_URI"))
                .context("DATABASE_URL not set")?,
            max_connections: or("DATABASE_MAX_CONNECTIONS", "20")
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let auth = AuthConfig {
            jwt_secret: SecretString::from(var("JWT_SECRET").context("JWT_SECRET not set")?),
            jwt_expiry_days: or("JWT_EXPIRY_DAYS", "7")
                .parse()
                .context("JWT_EXPIRY_DAYS must be a valid number")?,
            temp_token_ttl_minutes: or("TEMP_TOKEN_TTL_MINUTES", "60")
                .parse()
                .context("TEMP_TOKEN_TTL_MINUTES must be a valid number")?,
        };

        let email = EmailConfig {
            resend_api_key: var("RESEND_API_KEY")
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
            from: or("EMAIL_FROM", DEFAULT_EMAIL_FROM),
            frontend_url: or("FRONTEND_URL", "http://localhost:3000"),
            attachment_root: PathBuf::from(or("EMAIL_ATTACHMENT_ROOT", "./public")),
        };

        let payments = PaymentsConfig {
            http_timeout_secs: or("PAYMENT_HTTP_TIMEOUT_SECS", "30")
                .parse()
                .context("PAYMENT_HTTP_TIMEOUT_SECS must be a valid number")?,
        };

        let logging = LoggingConfig {
            format: match or("LOG_FORMAT", "pretty").to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => return Err(anyhow!("LOG_FORMAT must be 'json' or 'pretty', got {}", other)),
            },
        };

        let config = Config {
            server,
            database,
            auth,
            email,
            payments,
            logging,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Validate port range
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        // Validate environment
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.auth.jwt_secret.expose_secret().trim().is_empty() {
            return Err(anyhow!("JWT_SECRET cannot be empty"));
        }

        if self.auth.jwt_expiry_days <= 0 {
            return Err(anyhow!("JWT_EXPIRY_DAYS must be greater than 0"));
        }

        if self.auth.temp_token_ttl_minutes <= 0 {
            return Err(anyhow!("TEMP_TOKEN_TTL_MINUTES must be greater than 0"));
        }

        url::Url::parse(&self.email.frontend_url)
            .with_context(|| format!("FRONTEND_URL is not a valid URL: {}", self.email.frontend_url))?;

        if self.email.from.trim().is_empty() {
            return Err(anyhow!("EMAIL_FROM cannot be empty"));
        }

        if self.payments.http_timeout_secs == 0 {
            return Err(anyhow!("PAYMENT_HTTP_TIMEOUT_SECS must be greater than 0"));
        }

        Ok(())
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            environment: self.server.environment.clone(),
            email_from: self.email.from.clone(),
            frontend_url: self.email.frontend_url.trim_end_matches('/').to_string(),
            attachment_root: self.email.attachment_root.clone(),
            temp_token_ttl: chrono::Duration::minutes(self.auth.temp_token_ttl_minutes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/courtside"),
        ("JWT_SECRET", "dev-secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.environment, "development");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.auth.jwt_expiry_days, 7);
        assert_eq!(config.auth.temp_token_ttl_minutes, 60);
        assert!(config.email.resend_api_key.is_none());
        assert_eq!(config.email.frontend_url, "http://localhost:3000");
        assert_eq!(config.email.attachment_root, PathBuf::from("./public"));
        assert_eq!(config.payments.http_timeout_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_jwt_secret_is_required() {
        let err = load(&[("DATABASE_URL", "postgres://localhost/courtside")]).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));

        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/courtside"),
            ("JWT_SECRET", "  "),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_mongo_uri_alias() {
        let config = load(&[("MONGO_URI", "postgres://db/courtside"), ("JWT_SECRET", "s")]).unwrap();
        assert_eq!(config.database.url, "postgres://db/courtside");
    }

    #[test]
    fn test_rejects_low_port_and_unknown_environment() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "80"));
        assert!(load(&pairs).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ENVIRONMENT", "qa"));
        assert!(load(&pairs).is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        for (key, value) in [
            ("DATABASE_MAX_CONNECTIONS", "0"),
            ("JWT_EXPIRY_DAYS", "0"),
            ("PAYMENT_HTTP_TIMEOUT_SECS", "abc"),
            ("FRONTEND_URL", "not a url"),
            ("LOG_FORMAT", "xml"),
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((key, value));
            assert!(load(&pairs).is_err(), "{}={} should be rejected", key, value);
        }
    }

    #[test]
    fn test_optional_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("RESEND_API_KEY", "re_123"),
            ("LOG_FORMAT", "JSON"),
            ("FRONTEND_URL", "https://club.example.com/"),
        ]);
        let config = load(&pairs).unwrap();
        assert!(config.email.resend_api_key.is_some());
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.service_settings().frontend_url, "https://club.example.com");
    }
}
