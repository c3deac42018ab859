use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Articles with this many recent edits or fewer are left out of the aggregate.
pub const ACTIVITY_THRESHOLD: u64 = 2;

/// Edit statistics for one article as of its last fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArticleStat {
    /// Most recent change; `None` when the history listed no changes.
    #[serde(with = "iso_timestamp")]
    pub latest_update_time: Option<NaiveDateTime>,
    /// Changes inside the trailing window at fetch time.
    pub number_update_time: u64,
}

/// Every tracked article, keyed by title. Serializes as one flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsDocument {
    entries: BTreeMap<String, ArticleStat>,
}

impl StatsDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the stat for `title`, returning the previous one.
    pub fn upsert(&mut self, title: impl Into<String>, stat: ArticleStat) -> Option<ArticleStat> {
        self.entries.insert(title.into(), stat)
    }

    pub fn get(&self, title: &str) -> Option<&ArticleStat> {
        self.entries.get(title)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArticleStat)> {
        self.entries
            .iter()
            .map(|(title, stat)| (title.as_str(), stat))
    }

    /// Mean and sum of update counts over the active articles.
    pub fn aggregate(&self) -> AggregateResult {
        let mut sum = 0u64;
        let mut count = 0usize;
        for stat in self.entries.values() {
            if stat.number_update_time > ACTIVITY_THRESHOLD {
                sum += stat.number_update_time;
                count += 1;
            }
        }
        let mean = if count == 0 {
            None
        } else {
            Some(sum as f64 / count as f64)
        };
        AggregateResult { mean, sum, count }
    }
}

impl FromIterator<(String, ArticleStat)> for StatsDocument {
    fn from_iter<T: IntoIterator<Item = (String, ArticleStat)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Summary over the articles above [`ACTIVITY_THRESHOLD`].
///
/// `mean` is `None` (JSON `null`) when no article qualifies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateResult {
    pub mean: Option<f64>,
    pub sum: u64,
    pub count: usize,
}

/// `YYYY-MM-DDTHH:MM:SS`, with the empty string standing for "no changes".
pub mod iso_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn format(value: &NaiveDateTime) -> String {
        value.format(FORMAT).to_string()
    }

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_str(&format(value)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(None);
        }
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(Some)
            .map_err(|error| {
                serde::de::Error::custom(format!("invalid latest_update_time {raw:?}: {error}"))
            })
    }
}
