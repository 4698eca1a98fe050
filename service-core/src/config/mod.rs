use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every service binary.
///
/// Read from an optional `configuration` file, then `APP__*` environment
/// variables (`APP__PORT=8080`, `APP__INSTANCE_ID=billing-a`).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Stable name of this process among its replicas. Generated when unset.
    #[serde(default)]
    pub instance_id: Option<String>,
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            instance_id: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// The configured instance id, or a fresh `<prefix>-<uuid>` one.
    pub fn instance_id_or(&self, prefix: &str) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", prefix, uuid::Uuid::new_v4()))
    }
}
