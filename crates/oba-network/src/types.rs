use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════
// Domain types
// ═══════════════════════════════════════════════════════════════════════════

/// GTFS-RT style severity, collapsed to the three levels the client acts on.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Severe,
}

impl Severity {
    /// Case-insensitive parse of a wire value. Anything unrecognised,
    /// including GTFS-RT `UNKNOWN_SEVERITY`, is treated as `Info`.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "severe" => Severity::Severe,
            "warning" => Severity::Warning,
            _ => Severity::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Severe => "severe",
        }
    }
}

/// One agency service alert, normalized from either alert provider.
///
/// Equality and hashing cover every field, so two records with the same
/// `id` but different content are distinct values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgencyAlert {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency_id: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl AgencyAlert {
    /// `WARNING` or `SEVERE`.
    pub fn is_high_severity(&self) -> bool {
        matches!(self.severity, Severity::Warning | Severity::Severe)
    }

    /// `true` when the alert has a start date less than `window` away from `now`.
    pub fn starts_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.start_date
            .map(|start| (now - start).abs() < window)
            .unwrap_or(false)
    }
}

/// An agency served by the current region, with its coverage area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgencyWithCoverage {
    pub agency_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub lat_span: f64,
    pub lon_span: f64,
}

// ═══════════════════════════════════════════════════════════════════════════
// REST API wire types
// ═══════════════════════════════════════════════════════════════════════════

/// `{"code": 200, "text": "OK", "data": {...}}`
#[derive(Debug, Deserialize)]
pub(crate) struct RestEnvelope<D> {
    #[serde(default = "default_code")]
    pub code: u16,
    pub data: Option<D>,
}

fn default_code() -> u16 {
    200
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListData<E> {
    #[serde(default = "Vec::new")]
    pub list: Vec<E>,
    #[serde(default)]
    pub references: References,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct References {
    #[serde(default)]
    pub agencies: Vec<AgencyReference>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AgencyReference {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AgencyCoverageWire {
    pub agency_id: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub lat_span: f64,
    #[serde(default)]
    pub lon_span: f64,
}

impl AgencyCoverageWire {
    pub fn into_agency(self, references: &References) -> AgencyWithCoverage {
        let name = references
            .agencies
            .iter()
            .find(|a| a.id == self.agency_id)
            .and_then(|a| a.name.clone());
        AgencyWithCoverage {
            agency_id: self.agency_id,
            name,
            lat: self.lat,
            lon: self.lon,
            lat_span: self.lat_span,
            lon_span: self.lon_span,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TranslatedText {
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TimeWindowWire {
    /// Epoch milliseconds; 0 means unbounded.
    #[serde(default)]
    pub from: i64,
    #[serde(default)]
    pub to: i64,
}

/// A situation record from the REST alerts endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SituationWire {
    pub id: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub summary: Option<TranslatedText>,
    #[serde(default)]
    pub description: Option<TranslatedText>,
    #[serde(default)]
    pub url: Option<TranslatedText>,
    #[serde(default)]
    pub active_windows: Vec<TimeWindowWire>,
    #[serde(default)]
    pub creation_time: Option<i64>,
}

impl SituationWire {
    pub fn into_alert(self, agency_id: &str) -> AgencyAlert {
        let start_ms = self
            .active_windows
            .iter()
            .map(|w| w.from)
            .filter(|ms| *ms > 0)
            .min()
            .or(self.creation_time.filter(|ms| *ms > 0));
        let end_ms = self
            .active_windows
            .iter()
            .map(|w| w.to)
            .filter(|ms| *ms > 0)
            .max();

        AgencyAlert {
            id: self.id,
            agency_id: Some(agency_id.to_string()),
            severity: self
                .severity
                .as_deref()
                .map(Severity::from_wire)
                .unwrap_or_default(),
            start_date: start_ms.and_then(DateTime::from_timestamp_millis),
            end_date: end_ms.and_then(DateTime::from_timestamp_millis),
            title: text(self.summary),
            body: text(self.description),
            url: text(self.url),
        }
    }
}

fn text(t: Option<TranslatedText>) -> Option<String> {
    t.and_then(|t| t.value).filter(|v| !v.trim().is_empty())
}

// ═══════════════════════════════════════════════════════════════════════════
// Obaco wire types
// ═══════════════════════════════════════════════════════════════════════════

/// Obaco emits numeric ids for some regions and strings for others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireId {
    Text(String),
    Number(i64),
}

impl std::fmt::Display for WireId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireId::Text(s) => f.write_str(s),
            WireId::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ObacoAlertWire {
    pub id: WireId,
    #[serde(default)]
    pub agency_id: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

impl From<ObacoAlertWire> for AgencyAlert {
    fn from(w: ObacoAlertWire) -> Self {
        AgencyAlert {
            id: w.id.to_string(),
            agency_id: w.agency_id,
            severity: w
                .severity
                .as_deref()
                .map(Severity::from_wire)
                .unwrap_or_default(),
            start_date: w.starts_at,
            end_date: w.ends_at,
            title: w.title.filter(|v| !v.trim().is_empty()),
            body: w.body.filter(|v| !v.trim().is_empty()),
            url: w.url.filter(|v| !v.trim().is_empty()),
        }
    }
}
