//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default response system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Below is an email to which you need to compose a polite professional response.\n\
Focus on the content of the email and provide specific information if possible.\n\
Check for spam and advertisements and respond with only one word: 'SPAM' if it is spam/advertisement.\n\
Check again for advertisements and spam, no mistakes are allowed.";

/// Sender tokens that are never answered, whatever the ignore list holds.
pub const DEFAULT_IGNORE_SEED: &[&str] = &["noreply", "donotreply", "mailer-daemon"];

/// Mailbox account and server settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Account address: login default, `From` of replies, self-mail check.
    pub address: String,
    pub username: String,
    pub password: SecretString,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub mailbox: String,
}

impl EmailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let address = required("EMAIL_ADDRESS")?;
        let password = SecretString::from(required("EMAIL_PASSWORD")?);
        let username = optional("EMAIL_USERNAME").unwrap_or_else(|| address.clone());
        let imap_host = required("EMAIL_IMAP_HOST")?;
        let smtp_host =
            optional("EMAIL_SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));

        Ok(Self {
            address,
            username,
            password,
            imap_port: parsed("EMAIL_IMAP_PORT", 993)?,
            smtp_port: parsed("EMAIL_SMTP_PORT", 465)?,
            imap_host,
            smtp_host,
            mailbox: optional("EMAIL_MAILBOX").unwrap_or_else(|| "INBOX".to_string()),
        })
    }
}

/// Text-generation service settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    /// Endpoint root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    /// Read the completion as server-sent events instead of one JSON body.
    pub stream: bool,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: SecretString::from(required("LLM_API_KEY")?),
            base_url: optional("LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: optional("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            stream: flag("LLM_STREAM", false)?,
            timeout: Duration::from_secs(parsed("LLM_TIMEOUT_SECS", 60)?),
        })
    }
}

/// Poll-loop settings.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Sleep between cycles.
    pub poll_interval: Duration,
    /// Messages handled per cycle.
    pub page_size: usize,
    /// How many of the latest unread ids are considered each cycle.
    pub unread_window: usize,
    pub ignore_capacity: usize,
    /// Initial ignore-list tokens; also the fixed automated-sender markers.
    pub ignore_seed: Vec<String>,
    pub retention_days: u32,
    pub history_path: PathBuf,
    /// Body text is truncated to this many characters.
    pub max_body_chars: usize,
    pub system_prompt: String,
    /// Flag answered messages `\Seen` after a confirmed send.
    pub mark_answered_seen: bool,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            page_size: 8,
            unread_window: 100,
            ignore_capacity: 50,
            ignore_seed: DEFAULT_IGNORE_SEED.iter().map(|s| s.to_string()).collect(),
            retention_days: 30,
            history_path: PathBuf::from("response_history.json"),
            max_body_chars: 4000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            mark_answered_seen: true,
        }
    }
}

impl ResponderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let page_size = parsed("AUTORESPONDER_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AUTORESPONDER_PAGE_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        let ignore_seed = optional("AUTORESPONDER_IGNORE_SEED")
            .map(|raw| split_list(&raw))
            .unwrap_or(defaults.ignore_seed);

        Ok(Self {
            poll_interval: Duration::from_secs(parsed(
                "AUTORESPONDER_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            page_size,
            unread_window: parsed("AUTORESPONDER_UNREAD_WINDOW", defaults.unread_window)?,
            ignore_capacity: parsed("AUTORESPONDER_IGNORE_CAPACITY", defaults.ignore_capacity)?,
            ignore_seed,
            retention_days: parsed("AUTORESPONDER_RETENTION_DAYS", defaults.retention_days)?,
            history_path: optional("AUTORESPONDER_HISTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.history_path),
            max_body_chars: parsed("AUTORESPONDER_MAX_BODY_CHARS", defaults.max_body_chars)?,
            system_prompt: optional("AUTORESPONDER_SYSTEM_PROMPT")
                .unwrap_or(defaults.system_prompt),
            mark_answered_seen: flag(
                "AUTORESPONDER_MARK_ANSWERED_SEEN",
                defaults.mark_answered_seen,
            )?,
        })
    }
}

/// Split a comma-separated list, trimming and lower-casing entries.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &str) -> Result<String, ConfigError> {
    optional(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parsed<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn flag(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{v}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_settings() {
        let config = ResponderConfig::default();
        assert_eq!(config.page_size, 8);
        assert_eq!(config.unread_window, 100);
        assert_eq!(config.ignore_capacity, 50);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.max_body_chars, 4000);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(
            config.ignore_seed,
            vec!["noreply", "donotreply", "mailer-daemon"]
        );
    }

    #[test]
    fn split_list_trims_and_lowercases() {
        assert_eq!(
            split_list(" NoReply , ,Mailer-Daemon,"),
            vec!["noreply", "mailer-daemon"]
        );
    }

    #[test]
    fn split_list_empty() {
        assert!(split_list("").is_empty());
    }

    #[test]
    fn parsed_falls_back_to_default_when_unset() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::remove_var("AUTORESPONDER_TEST_UNSET_PORT") };
        assert_eq!(parsed("AUTORESPONDER_TEST_UNSET_PORT", 993_u16).unwrap(), 993);
    }

    #[test]
    fn parsed_rejects_garbage() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("AUTORESPONDER_TEST_BAD_PORT", "not-a-port") };
        let err = parsed("AUTORESPONDER_TEST_BAD_PORT", 993_u16).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn flag_accepts_common_spellings() {
        // SAFETY: no other test reads or writes these variables.
        unsafe {
            std::env::set_var("AUTORESPONDER_TEST_FLAG_ON", "Yes");
            std::env::set_var("AUTORESPONDER_TEST_FLAG_OFF", "0");
            std::env::set_var("AUTORESPONDER_TEST_FLAG_BAD", "maybe");
        }
        assert!(flag("AUTORESPONDER_TEST_FLAG_ON", false).unwrap());
        assert!(!flag("AUTORESPONDER_TEST_FLAG_OFF", true).unwrap());
        assert!(flag("AUTORESPONDER_TEST_FLAG_BAD", true).is_err());
    }

    #[test]
    fn required_reports_missing_variable() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::remove_var("AUTORESPONDER_TEST_REQUIRED") };
        match required("AUTORESPONDER_TEST_REQUIRED") {
            Err(ConfigError::MissingEnvVar(key)) => assert_eq!(key, "AUTORESPONDER_TEST_REQUIRED"),
            other => panic!("expected MissingEnvVar, got {other:?}"),
        }
    }
}
