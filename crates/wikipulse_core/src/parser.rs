use chrono::{NaiveDateTime, TimeDelta};

use crate::error::PulseError;
use crate::markup::{find_element_by_id, inner_html, scan_elements, text_content};
use crate::stats::ArticleStat;

pub const HISTORY_CONTAINER_ID: &str = "pagehistory";
pub const CHANGE_DATE_CLASS: &str = "mw-changeslist-date";
/// Change dates as rendered on the history page, e.g. `00:48, 23 July 2022`.
pub const CHANGE_DATE_FORMAT: &str = "%H:%M, %d %B %Y";

/// Change-date texts inside the history container, newest first.
///
/// `None` when the page has no history container at all.
pub fn extract_change_dates(markup: &str) -> Option<Vec<String>> {
    let container = find_element_by_id(markup, HISTORY_CONTAINER_ID)?;
    let body = inner_html(markup, &container);
    let dates = scan_elements(body)
        .into_iter()
        .filter(|element| element.has_class(CHANGE_DATE_CLASS))
        .map(|element| text_content(inner_html(body, &element)))
        .collect();
    Some(dates)
}

pub fn parse_change_date(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), CHANGE_DATE_FORMAT).ok()
}

/// Turn a history page into the stat stored for `title`.
///
/// The first listed change is the latest one. Every listed change at or after
/// `now - window_days` is counted; the page itself decides how many changes
/// are listed. A window reaching past the earliest representable date counts
/// every listed change.
pub fn summarize_history(
    title: &str,
    markup: &str,
    now: NaiveDateTime,
    window_days: u32,
) -> Result<ArticleStat, PulseError> {
    let dates = extract_change_dates(markup).ok_or_else(|| PulseError::NoHistory {
        title: title.to_string(),
    })?;
    let window_start =
        TimeDelta::try_days(i64::from(window_days)).and_then(|span| now.checked_sub_signed(span));

    let mut latest = None;
    let mut count = 0u64;
    for raw in &dates {
        let change = parse_change_date(raw).ok_or_else(|| PulseError::MalformedTimestamp {
            title: title.to_string(),
            value: raw.clone(),
        })?;
        if latest.is_none() {
            latest = Some(change);
        }
        if window_start.is_none_or(|start| change >= start) {
            count += 1;
        }
    }

    log::debug!(
        "history for {title:?}: {} changes listed, {count} within {window_days} days",
        dates.len()
    );
    Ok(ArticleStat {
        latest_update_time: latest,
        number_update_time: count,
    })
}
