use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::PulseConfig;
use crate::error::PulseError;
use crate::history::{HistoryClient, HistorySource};
use crate::parser::summarize_history;
use crate::stats::{AggregateResult, StatsDocument};
use crate::store::{StatsStore, open_store};

/// Function-call-style invocation: `{local, filename, queryStringParameters: {title}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationEvent {
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub query_string_parameters: Option<QueryParameters>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParameters {
    #[serde(default)]
    pub title: Option<String>,
}

impl InvocationEvent {
    pub fn for_title(title: impl Into<String>, local: bool, filename: Option<String>) -> Self {
        Self {
            local,
            filename,
            query_string_parameters: Some(QueryParameters {
                title: Some(title.into()),
            }),
        }
    }

    pub fn title(&self) -> &str {
        self.query_string_parameters
            .as_ref()
            .and_then(|params| params.title.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status_code: u16,
    /// JSON text of the response body.
    pub body: String,
}

impl InvocationResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    fn from_error(error: &PulseError) -> Self {
        Self {
            status_code: error.status_code(),
            body: error.to_body().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BodyShape {
    /// `{"items": {...}, "aggregate": {...}, "persisted": bool}`
    #[default]
    Envelope,
    /// Stats with `mean` and `sum` folded in at the top level.
    Flat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    pub window_days: u32,
    pub default_filename: String,
    pub require_persist: bool,
    pub body_shape: BodyShape,
}

impl HandlerSettings {
    pub fn from_config(config: &PulseConfig, body_shape: BodyShape) -> Self {
        Self {
            window_days: config.window_days(),
            default_filename: config.default_filename().to_string(),
            require_persist: config.require_persist(),
            body_shape,
        }
    }
}

/// Result of one successful tracking run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOutcome {
    pub title: String,
    pub document: StatsDocument,
    pub aggregate: AggregateResult,
    pub persisted: bool,
}

impl TrackOutcome {
    pub fn to_body(&self, shape: BodyShape) -> Value {
        match shape {
            BodyShape::Envelope => json!({
                "items": self.document,
                "aggregate": self.aggregate,
                "persisted": self.persisted,
            }),
            BodyShape::Flat => {
                let mut body = match serde_json::to_value(&self.document) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                body.insert("mean".to_string(), json!(self.aggregate.mean));
                body.insert("sum".to_string(), json!(self.aggregate.sum));
                Value::Object(body)
            }
        }
    }
}

/// Run one invocation against the live wiki and the store the event selects.
pub fn handle_event(
    event: &InvocationEvent,
    config: &PulseConfig,
    body_shape: BodyShape,
) -> InvocationResponse {
    let settings = HandlerSettings::from_config(config, body_shape);
    let prepared = HistoryClient::from_config(config)
        .and_then(|client| open_store(event.local, config).map(|store| (client, store)));
    let (mut client, store) = match prepared {
        Ok(prepared) => prepared,
        Err(error) => {
            log::error!("{error}");
            return InvocationResponse::from_error(&error);
        }
    };
    handle_event_with(
        event,
        &settings,
        &mut client,
        store.as_ref(),
        Utc::now().naive_utc(),
    )
}

/// Run one invocation with explicit collaborators; every failure becomes a
/// structured error response.
pub fn handle_event_with<H: HistorySource>(
    event: &InvocationEvent,
    settings: &HandlerSettings,
    source: &mut H,
    store: &dyn StatsStore,
    now: NaiveDateTime,
) -> InvocationResponse {
    match track_title(event, settings, source, store, now) {
        Ok(outcome) => InvocationResponse {
            status_code: 200,
            body: outcome.to_body(settings.body_shape).to_string(),
        },
        Err(error) => {
            log::error!("{error}");
            InvocationResponse::from_error(&error)
        }
    }
}

/// Read, fetch, merge, aggregate, persist.
///
/// Nothing is written unless the fetch and parse succeed.
pub fn track_title<H: HistorySource>(
    event: &InvocationEvent,
    settings: &HandlerSettings,
    source: &mut H,
    store: &dyn StatsStore,
    now: NaiveDateTime,
) -> Result<TrackOutcome, PulseError> {
    let key = event
        .filename
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(settings.default_filename.as_str());
    let mut document = store.read(key)?;
    log::info!(
        "loaded {} tracked articles from {}",
        document.len(),
        store.describe(key)
    );

    let title = event.title();
    let markup = source.fetch_history(title)?;
    let stat = summarize_history(title, &markup, now, settings.window_days)?;
    log::info!(
        "{title:?}: {} edits in the last {} days",
        stat.number_update_time,
        settings.window_days
    );
    document.upsert(title, stat);

    let aggregate = document.aggregate();
    let persisted = match store.write(&document, key) {
        Ok(()) => true,
        Err(error) if !settings.require_persist => {
            log::warn!("stats document not persisted: {error}");
            false
        }
        Err(error) => return Err(error),
    };

    Ok(TrackOutcome {
        title: title.to_string(),
        document,
        aggregate,
        persisted,
    })
}

/// Aggregate of the stored document, without fetching anything.
pub fn summarize_store(
    store: &dyn StatsStore,
    key: &str,
) -> Result<(StatsDocument, AggregateResult), PulseError> {
    let document = store.read(key)?;
    let aggregate = document.aggregate();
    Ok((document, aggregate))
}
