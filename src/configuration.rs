use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, File};
use secrecy::Secret;
use serde_aux::field_attributes::{
    deserialize_bool_from_anything, deserialize_number_from_string,
};

use crate::domain::SubscriberEmail;

const DEFAULT_SMTP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HELO_NAME: &str = "localhost";

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub smtp: SmtpSettings,
    pub message: MessageSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    /// Scheme and host the tracking URL embedded in every message points at.
    pub public_host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub public_port: u16,
    pub template_path: PathBuf,
    #[serde(default)]
    pub tracking_image_path: Option<PathBuf>,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub username: String,
    pub password: Secret<String>,
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub timeout_seconds: u64,
    #[serde(default, deserialize_with = "deserialize_bool_from_anything")]
    pub tls_enabled: bool,
    #[serde(default)]
    pub helo_name: Option<String>,
}

impl SmtpSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("smtp.host must not be empty.".into());
        }
        if self.username.trim().is_empty() {
            return Err("smtp.username must not be empty.".into());
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        match self.timeout_seconds {
            0 => DEFAULT_SMTP_TIMEOUT,
            seconds => Duration::from_secs(seconds),
        }
    }

    pub fn helo_name(&self) -> &str {
        self.helo_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_HELO_NAME)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct MessageSettings {
    pub subject: String,
    pub from: String,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
}

impl MessageSettings {
    pub fn sender(&self) -> Result<SubscriberEmail, String> {
        SubscriberEmail::parse(self.from.clone())
    }

    pub fn carbon_copies(&self) -> Result<Vec<SubscriberEmail>, String> {
        self.cc
            .iter()
            .map(|address| SubscriberEmail::parse(address.clone()))
            .collect()
    }
}

#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local` or `production`."
            )),
        }
    }
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| ConfigError::Message(format!("Failed to determine the current directory: {e}")))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = Config::builder()
        .add_source(File::from(configuration_directory.join("base.yaml")))
        .add_source(File::from(configuration_directory.join(environment_filename)))
        // APP_SMTP__PASSWORD=... sets `smtp.password`
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
