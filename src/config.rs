//! Configuration file handling for contactmail.

use crate::error::Error;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Which outbound transport relays accepted submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherKind {
    Mailgun,
    Smtp,
}

/// Contactmail configuration, read from the `[params]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "Config::default_cooldown_window_secs")]
    pub cooldown_window_secs: u64,
    #[serde(default = "Config::default_cooldown_set_key")]
    pub cooldown_set_key: String,
    #[serde(default)]
    pub cooldown_fail_open: bool,
    pub redis_url: Option<String>,
    #[serde(default = "Config::default_max_name_len")]
    pub max_name_len: usize,
    #[serde(default = "Config::default_max_email_len")]
    pub max_email_len: usize,
    #[serde(default = "Config::default_max_message_len")]
    pub max_message_len: usize,
    #[serde(default = "Config::default_dispatcher")]
    dispatcher: String,
    #[serde(default = "Config::default_mailgun_host")]
    pub mailgun_host: String,
    pub mailgun_key: Option<String>,
    pub mailgun_domain: Option<String>,
    pub mail_to: Option<String>,
    pub mail_from: Option<String>,
    #[serde(default = "Config::default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "Config::default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "Config::default_dispatch_attempts")]
    pub dispatch_attempts: u32,
    #[serde(default = "Config::default_dispatch_backoff_ms")]
    pub dispatch_backoff_ms: u64,
    #[serde(default)]
    pub captcha_enabled: bool,
    pub captcha_secret: Option<String>,
    #[serde(default = "Config::default_captcha_verify_url")]
    pub captcha_verify_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigWrapper {
    // The whole actual config is under `params` section.
    pub params: Config,
}

impl Config {
    /// Load configuration from a file and apply secrets from the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_ini(&content)?.with_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_ini(content: &str) -> Result<Self, Error> {
        let wrapped_config: ConfigWrapper = serini::from_str(content)?;
        Ok(wrapped_config.params)
    }

    /// Override secrets with values found by `lookup`.
    ///
    /// Empty values are ignored so an exported but blank variable does not wipe a file setting.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MAILGUN_KEY") {
            self.mailgun_key = Some(v);
        }
        if let Some(v) = get("MAILGUN_DOMAIN") {
            self.mailgun_domain = Some(v);
        }
        if let Some(v) = get("MAIL_TO").or_else(|| get("MAILGUN_TO")) {
            self.mail_to = Some(v);
        }
        if let Some(v) = get("CAPTCHA_SECRET") {
            self.captcha_secret = Some(v);
        }
        if let Some(v) = get("REDIS_URL") {
            self.redis_url = Some(v);
        }
        self
    }

    /// Check that every collaborator selected by the config has what it needs.
    pub fn validate(&self) -> Result<(), Error> {
        if self.mail_to.is_none() {
            return Err(Error::MissingSetting("mail_to"));
        }
        match self.dispatcher_kind()? {
            DispatcherKind::Mailgun => {
                if self.mailgun_key.is_none() {
                    return Err(Error::MissingSetting("mailgun_key"));
                }
                if self.mailgun_domain.is_none() {
                    return Err(Error::MissingSetting("mailgun_domain"));
                }
            }
            DispatcherKind::Smtp => {
                if self.mail_from.is_none() {
                    return Err(Error::MissingSetting("mail_from"));
                }
            }
        }
        if self.captcha_enabled && self.captcha_secret.is_none() {
            return Err(Error::MissingSetting("captcha_secret"));
        }
        if self.dispatch_attempts == 0 {
            return Err(Error::InvalidSetting {
                name: "dispatch_attempts",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn dispatcher_kind(&self) -> Result<DispatcherKind, Error> {
        match self.dispatcher.trim().to_lowercase().as_str() {
            "mailgun" => Ok(DispatcherKind::Mailgun),
            "smtp" => Ok(DispatcherKind::Smtp),
            other => Err(Error::InvalidSetting {
                name: "dispatcher",
                value: other.to_string(),
            }),
        }
    }

    /// Lifetime of one cooldown batch.
    pub fn cooldown_window(&self) -> Duration {
        Duration::from_secs(self.cooldown_window_secs)
    }

    pub fn dispatch_backoff(&self) -> Duration {
        Duration::from_millis(self.dispatch_backoff_ms)
    }

    // Following are needed since serde does not support default literals.

    fn default_listen_addr() -> String {
        "127.0.0.1:8080".to_string()
    }
    const fn default_cooldown_window_secs() -> u64 {
        2 * 60 * 60
    }
    fn default_cooldown_set_key() -> String {
        "mail-clients".to_string()
    }
    const fn default_max_name_len() -> usize {
        100
    }
    const fn default_max_email_len() -> usize {
        100
    }
    const fn default_max_message_len() -> usize {
        500
    }
    fn default_dispatcher() -> String {
        "mailgun".to_string()
    }
    fn default_mailgun_host() -> String {
        "https://api.mailgun.net".to_string()
    }
    fn default_smtp_host() -> String {
        "localhost".to_string()
    }
    const fn default_smtp_port() -> u16 {
        25
    }
    const fn default_dispatch_attempts() -> u32 {
        3
    }
    const fn default_dispatch_backoff_ms() -> u64 {
        500
    }
    fn default_captcha_verify_url() -> String {
        "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string()
    }
}
