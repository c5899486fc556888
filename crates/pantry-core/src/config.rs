//! Gateway configuration: defaults, then an optional TOML file, then `PANTRY_*` environment.
//!
//! | Key (env) | Default | Description |
//! |-----|---------|-------------|
//! | bind_addr (PANTRY_BIND_ADDR) | 127.0.0.1:8000 | Listener address. |
//! | completion_base_url (PANTRY_COMPLETION_BASE_URL) | https://api.openai.com/v1 | Completion endpoint base. |
//! | text_model (PANTRY_TEXT_MODEL) | gpt-3.5-turbo | Model for recipe operations. |
//! | vision_model (PANTRY_VISION_MODEL) | gpt-4-vision-preview | Model for image identification. |
//! | template_dir (PANTRY_TEMPLATE_DIR) | crates/pantry-gateway/templates | One `{template_id}.txt` per operation. |
//! | template_cache (PANTRY_TEMPLATE_CACHE) | false | Keep templates for the process lifetime. |
//! | entitlement_db (PANTRY_ENTITLEMENT_DB) | ./data/entitlements | Sled path of the ledger. |
//! | max_image_bytes (PANTRY_MAX_IMAGE_BYTES) | 20 MiB | Body limit for `POST /getIngredients`. |
//! | auth.issuer (PANTRY_AUTH__ISSUER) | required | Expected `iss`. |
//! | auth.audience (PANTRY_AUTH__AUDIENCE) | unset | Expected `aud`. |
//! | auth.hs256_secret / auth.rs256_pem | one required | Token verification key. |
//!
//! The completion API key is `OPENAI_API_KEY`, falling back to `OPENAI_LOCALKEY`.

use std::path::Path;

use serde::Deserialize;

use crate::completion::DEFAULT_BASE_URL;
use crate::principal::VerificationKey;

/// Where the instruction templates ship, relative to the workspace root.
pub const DEFAULT_TEMPLATE_DIR: &str = "crates/pantry-gateway/templates";
/// Fits a base64-encoded phone photo.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config: {0}")]
    Load(#[from] config::ConfigError),
    #[error("config: {0} is not set")]
    Missing(&'static str),
    #[error("config: invalid verification key: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),
    #[error("config: entitlement ledger: {0}")]
    Ledger(#[from] sled::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub hs256_secret: Option<String>,
    #[serde(default)]
    pub rs256_pem: Option<String>,
}

impl AuthSettings {
    pub fn issuer(&self) -> Result<&str, ConfigError> {
        non_blank(self.issuer.as_deref()).ok_or(ConfigError::Missing("auth.issuer"))
    }

    pub fn verification_key(&self) -> Result<VerificationKey, ConfigError> {
        if let Some(pem) = non_blank(self.rs256_pem.as_deref()) {
            return Ok(VerificationKey::Rs256Pem(pem.to_string()));
        }
        non_blank(self.hs256_secret.as_deref())
            .map(|s| VerificationKey::Hs256Secret(s.to_string()))
            .ok_or(ConfigError::Missing("auth.hs256_secret or auth.rs256_pem"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub completion_base_url: String,
    pub text_model: String,
    pub vision_model: String,
    pub template_dir: String,
    pub template_cache: bool,
    pub entitlement_db: String,
    pub max_image_bytes: usize,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl GatewayConfig {
    /// Load from `PANTRY_CONFIG` (default `config/gateway.toml`, skipped when absent) and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("PANTRY_CONFIG").unwrap_or_else(|_| "config/gateway.toml".to_string());
        let builder = config::Config::builder()
            .set_default("bind_addr", "127.0.0.1:8000")?
            .set_default("completion_base_url", DEFAULT_BASE_URL)?
            .set_default("text_model", "gpt-3.5-turbo")?
            .set_default("vision_model", "gpt-4-vision-preview")?
            .set_default("template_dir", DEFAULT_TEMPLATE_DIR)?
            .set_default("template_cache", false)?
            .set_default("entitlement_db", "./data/entitlements")?
            .set_default("max_image_bytes", DEFAULT_MAX_IMAGE_BYTES as i64)?;

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("PANTRY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: GatewayConfig = built.try_deserialize()?;
        cfg.api_key = env_opt_string("OPENAI_API_KEY").or_else(|| env_opt_string("OPENAI_LOCALKEY"));
        Ok(cfg)
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        non_blank(self.api_key.as_deref()).ok_or(ConfigError::Missing("OPENAI_API_KEY"))
    }
}
