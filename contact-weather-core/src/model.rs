use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Status code the upstream provider reports for a complete reading.
pub const STATUS_OK: u16 = 200;

/// Identifier of the contact a snapshot belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One stored weather reading for a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub captured_at: Option<CapturedAt>,
    #[serde(default)]
    pub provider_response: Option<u16>,
}

impl Snapshot {
    /// A reading the provider answered with anything other than [`STATUS_OK`].
    pub fn is_degraded(&self) -> bool {
        self.provider_response.is_some_and(|code| code != STATUS_OK)
    }
}

/// Capture time as the backend sends it: an ISO-8601 string or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapturedAt {
    EpochMillis(i64),
    /// Epoch milliseconds sent as a JSON float, e.g. `1704067200000.0`.
    FractionalMillis(f64),
    Text(String),
}

impl CapturedAt {
    /// `None` when the value does not name a representable instant.
    ///
    /// Text without an offset is read as local time, except a bare date,
    /// which is midnight UTC.
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            CapturedAt::EpochMillis(ms) => DateTime::from_timestamp_millis(*ms),
            CapturedAt::FractionalMillis(ms) if ms.is_finite() => {
                DateTime::from_timestamp_millis(ms.trunc() as i64)
            }
            CapturedAt::FractionalMillis(_) => None,
            CapturedAt::Text(s) => parse_timestamp(s.trim()),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Offsets without a colon, e.g. "2024-01-01T00:00:00.000+0000".
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

impl From<DateTime<Utc>> for CapturedAt {
    fn from(value: DateTime<Utc>) -> Self {
        CapturedAt::Text(value.to_rfc3339())
    }
}

/// Body of the refresh call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub contact_id: String,
}

impl RefreshRequest {
    pub fn for_record(record_id: &RecordId) -> Self {
        Self {
            contact_id: record_id.as_str().to_string(),
        }
    }
}

/// A record-change notification as delivered by the change channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(default)]
    pub data: Option<ChangeEventData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEventData {
    #[serde(default)]
    pub change_event_header: Option<ChangeEventHeader>,
    #[serde(default)]
    pub payload: Option<ChangePayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEventHeader {
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub change_type: Option<String>,
    #[serde(default)]
    pub record_ids: Vec<String>,
    #[serde(default)]
    pub commit_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    #[serde(rename = "Contact__c", default)]
    pub contact: Option<String>,
}

impl ChangeEvent {
    pub fn header(&self) -> Option<&ChangeEventHeader> {
        self.data.as_ref()?.change_event_header.as_ref()
    }

    pub fn contact(&self) -> Option<&str> {
        self.data.as_ref()?.payload.as_ref()?.contact.as_deref()
    }

    /// Convenience constructor for an update event on one contact.
    pub fn for_contact(contact: &RecordId) -> Self {
        Self {
            data: Some(ChangeEventData {
                change_event_header: Some(ChangeEventHeader {
                    entity_name: Some("Weather_Snapshot__c".to_string()),
                    change_type: Some("UPDATE".to_string()),
                    ..Default::default()
                }),
                payload: Some(ChangePayload {
                    contact: Some(contact.as_str().to_string()),
                }),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Error => "error",
        }
    }
}

/// A user-facing message routed to the host's notification surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Notification {
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: Severity::Success,
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }
}
