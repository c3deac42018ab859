use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Url;
use reqwest::blocking::Client;

use crate::config::PulseConfig;
use crate::error::PulseError;

/// Source of rendered history pages.
pub trait HistorySource {
    /// Raw markup of the history page for `title`.
    fn fetch_history(&mut self, title: &str) -> Result<String, PulseError>;
}

#[derive(Debug, Clone)]
pub struct HistoryClientConfig {
    pub url_template: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl HistoryClientConfig {
    pub fn from_config(config: &PulseConfig) -> Self {
        Self {
            url_template: config.history_url(),
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
        }
    }
}

/// Blocking HTTP client for a wiki's `action=history` view.
pub struct HistoryClient {
    client: Client,
    config: HistoryClientConfig,
}

impl HistoryClient {
    pub fn new(config: HistoryClientConfig) -> Result<Self, PulseError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|error| PulseError::Setup(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { client, config })
    }

    pub fn from_config(config: &PulseConfig) -> Result<Self, PulseError> {
        Self::new(HistoryClientConfig::from_config(config))
    }
}

impl HistorySource for HistoryClient {
    fn fetch_history(&mut self, title: &str) -> Result<String, PulseError> {
        let url = history_url(&self.config.url_template, title)?;
        log::debug!("fetching history page {url}");
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.config.user_agent.clone())
            .send()
            .map_err(|error| PulseError::Transport {
                title: title.to_string(),
                message: error.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PulseError::InvalidTopic {
                title: title.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().map_err(|error| PulseError::Transport {
            title: title.to_string(),
            message: format!("failed to read response body: {error}"),
        })
    }
}

/// Substitute `title` into the `{title}` placeholder of `template`.
pub fn history_url(template: &str, title: &str) -> Result<Url, PulseError> {
    if !template.contains("{title}") {
        return Err(PulseError::Setup(format!(
            "history URL template has no {{title}} placeholder: {template}"
        )));
    }
    let rendered = template.replace("{title}", &encode_title(title));
    Url::parse(&rendered)
        .map_err(|error| PulseError::Setup(format!("invalid history URL {rendered}: {error}")))
}

/// Characters left as-is in a title query value, as MediaWiki links render them.
const TITLE_QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b',')
    .remove(b':')
    .remove(b'(')
    .remove(b')')
    .remove(b'!')
    .remove(b'\'')
    .remove(b'*')
    .remove(b'/');

/// Wiki title form (underscores for spaces), percent-encoded for a query value.
fn encode_title(title: &str) -> String {
    utf8_percent_encode(&title.trim().replace(' ', "_"), TITLE_QUERY).to_string()
}
