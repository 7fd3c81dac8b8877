use std::path::{Path, PathBuf};

use anyhow::bail;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Secret used to sign bearer tokens
    pub jwt_secret: String,
    /// Lifetime of an issued token in hours
    pub token_ttl_hours: i64,
    /// Frontend origin, used for CORS and checkout redirect URLs
    pub client_url: String,
    /// Extra origins allowed by CORS
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    pub tls: Option<TlsConfig>,
    pub payment: PaymentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub currency: String,
    /// Accepted age of a signed webhook, in seconds
    pub webhook_tolerance_secs: i64,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("api_base", &self.api_base)
            .field("currency", &self.currency)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_hours: 24,
            client_url: String::new(),
            allowed_origins: vec!["http://localhost:5173".to_string()],
            request_timeout_secs: 30,
            tls: None,
            payment: PaymentConfig::default(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.stripe.com".to_string(),
            secret_key: String::new(),
            webhook_secret: String::new(),
            currency: "usd".to_string(),
            webhook_tolerance_secs: 300,
        }
    }
}

impl Config {
    /// Read the config file if one is given, then let the environment override secrets.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("read config {} failed: {}", path.display(), e))?;
                toml::from_str::<Config>(&content)?
            }
            None => Config::default(),
        };
        dotenv_loaded(dotenvy::dotenv())?;
        config.apply_env(|key| dotenvy::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = var("JWT_SECRET") {
            self.jwt_secret = secret;
        }
        if let Some(url) = var("CLIENT_URL") {
            self.client_url = url;
        }
        if let Some(key) = var("STRIPE_SECRET_KEY") {
            self.payment.secret_key = key;
        }
        if let Some(secret) = var("STRIPE_WEBHOOK_SECRET") {
            self.payment.webhook_secret = secret;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut missing = Vec::new();
        if self.jwt_secret.is_empty() {
            missing.push("JWT_SECRET");
        }
        if self.client_url.is_empty() {
            missing.push("CLIENT_URL");
        }
        if !missing.is_empty() {
            bail!("missing required settings: {}", missing.join(", "));
        }
        if self.token_ttl_hours <= 0 {
            bail!("token_ttl_hours must be positive");
        }
        Ok(())
    }

    /// Every origin the browser client may call from.
    pub fn cors_origins(&self) -> Vec<String> {
        let mut origins = self.allowed_origins.clone();
        if !self.client_url.is_empty() && !origins.contains(&self.client_url) {
            origins.push(self.client_url.clone());
        }
        origins
    }
}

/// A missing `.env` file is fine, a broken one is not.
fn dotenv_loaded(result: Result<PathBuf, dotenvy::Error>) -> anyhow::Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => bail!("load .env failed: {}", e),
    }
}
