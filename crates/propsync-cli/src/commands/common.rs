use std::path::PathBuf;

use chrono::Utc;
use propsync_core::util::{compact_text, normalize_text_option};
use propsync_core::{ClientConfig, HttpRemote, PropertyClient, Record, RecordId};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CliError;

/// Fields owned by the sync engine
const RESERVED_FIELDS: [&str; 4] = ["id", "archived", "isOfflineCreated", "lastModified"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordListItem {
    pub id: RecordId,
    pub summary: String,
    pub archived: bool,
    pub unsynced: bool,
    pub last_modified: Option<i64>,
    pub relative_time: Option<String>,
}

pub async fn open_client(
    db_path: Option<PathBuf>,
    api_url: Option<String>,
) -> Result<PropertyClient<HttpRemote>, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = normalize_text_option(api_url) {
        config.api_base_url = Some(api_url);
    }
    if config.api_base_url.is_none() {
        return Err(CliError::ApiNotConfigured);
    }
    config.db_path = Some(resolve_db_path(db_path.or_else(|| config.db_path.take())));

    Ok(PropertyClient::open_http(&config).await?)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path.unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("propsync")
        .join("propsync.db")
}

pub fn parse_record_id(raw: &str) -> Result<RecordId, CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyRecordId);
    }
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidRecordId(trimmed.to_string()))
}

/// Parse `key=value` arguments; values are JSON when they parse as JSON, text otherwise
pub fn parse_field_assignments(assignments: &[String]) -> Result<Map<String, Value>, CliError> {
    let mut fields = Map::new();
    for assignment in assignments {
        let Some((key, raw_value)) = assignment.split_once('=') else {
            return Err(CliError::InvalidField(assignment.clone()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::InvalidField(assignment.clone()));
        }
        if RESERVED_FIELDS.contains(&key) {
            return Err(CliError::ReservedField(key.to_string()));
        }

        let value = serde_json::from_str(raw_value.trim())
            .unwrap_or_else(|_| Value::String(raw_value.to_string()));
        fields.insert(key.to_string(), value);
    }
    Ok(fields)
}

/// Apply field assignments onto an existing record; `null` removes a field
pub fn apply_field_assignments(record: Record, fields: Map<String, Value>) -> Record {
    let mut record = record;
    for (key, value) in fields {
        if value.is_null() {
            record.fields.remove(&key);
        } else {
            record.fields.insert(key, value);
        }
    }
    record
}

pub fn record_summary(record: &Record, max_chars: usize) -> String {
    let text = ["address", "name", "title"]
        .iter()
        .find_map(|key| record.get(key).and_then(Value::as_str))
        .map_or_else(
            || Value::Object(record.fields.clone()).to_string(),
            ToString::to_string,
        );
    compact_text(&text, max_chars)
}

pub fn record_flags(record: &Record) -> String {
    let mut flags = Vec::new();
    if record.is_offline_created {
        flags.push("unsynced");
    }
    if record.archived {
        flags.push("archived");
    }
    flags.join(",")
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let id = short_id(&record.id);
            let summary = record_summary(record, 40);
            let relative_time = record
                .last_modified
                .map(|timestamp| format_relative_time(timestamp, now_ms))
                .unwrap_or_default();
            let flags = record_flags(record);

            if flags.is_empty() {
                format!("{id:<13}  {summary:<40}  {relative_time}")
            } else {
                format!("{id:<13}  {summary:<40}  {relative_time:<10}  {flags}")
            }
        })
        .collect()
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.id.clone(),
        summary: record_summary(record, 80),
        archived: record.archived,
        unsynced: record.is_offline_created,
        last_modified: record.last_modified,
        relative_time: record
            .last_modified
            .map(|timestamp| format_relative_time(timestamp, now_ms)),
    }
}

/// Temporary ids are long; keep their prefix and the first characters of the uuid
pub fn short_id(id: &RecordId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
