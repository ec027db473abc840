//! Audit event envelope
//!
//! An [`AuditEvent`] wraps the caller's [`LogInput`] with an identifier,
//! version, subtype and timestamp. Envelopes are immutable once built; the
//! pipeline carries them inside a [`PipelineEvent`], which collects the
//! formatted bytes produced along the way.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::format_time;
use super::logical::LogInput;
use crate::error::{Error, Result};

/// The only supported envelope version
pub const EVENT_VERSION: &str = "v0.1";

/// Kind of audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subtype {
    /// Emitted before a request is handled
    #[serde(rename = "AuditRequest")]
    Request,
    /// Emitted after a response is produced
    #[serde(rename = "AuditResponse")]
    Response,
}

impl Subtype {
    /// Wire form of the subtype
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "AuditRequest",
            Self::Response => "AuditResponse",
        }
    }

    /// Value of the `type` field in formatted entries
    pub fn entry_type(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }

    /// Metric label for this subtype
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Request => "log_request",
            Self::Response => "log_response",
        }
    }
}

impl fmt::Display for Subtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subtype {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "AuditRequest" => Ok(Self::Request),
            "AuditResponse" => Ok(Self::Response),
            other => Err(Error::invalid_parameter(
                "audit.Subtype.validate",
                format!("invalid event subtype {other:?}"),
            )),
        }
    }
}

/// Output encoding of a formatted entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Plain JSON
    #[default]
    Json,
    /// JSONx (XML)
    Jsonx,
}

impl Format {
    /// Wire form of the format, also the key of the formatted bytes
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonx => "jsonx",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonx" => Ok(Self::Jsonx),
            other => Err(Error::invalid_parameter(
                "audit.Format.validate",
                format!("invalid format {other:?}"),
            )),
        }
    }
}

/// Options accepted by [`AuditEvent::new`]
///
/// Values are validated when the event is built, not when set.
#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    id: Option<String>,
    now: Option<DateTime<Utc>>,
    format: Option<String>,
    subtype: Option<String>,
}

impl EventOptions {
    /// Use a caller-supplied ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Use a caller-supplied timestamp
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Request a specific output format
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Override the subtype
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }
}

/// An audit event envelope
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    /// Unique identifier
    pub id: String,
    /// Envelope version, always [`EVENT_VERSION`]
    pub version: String,
    /// Request or response
    pub subtype: Subtype,
    /// When the event was created
    pub timestamp: DateTime<Utc>,
    /// The audited payload
    pub data: Option<LogInput>,
    required_format: Format,
}

impl AuditEvent {
    /// Build and validate a new event
    pub fn new(subtype: Subtype, opts: EventOptions) -> Result<Self> {
        const OP: &str = "audit.NewEvent";

        let id = match opts.id {
            Some(id) => {
                let id = id.trim().to_string();
                if id.is_empty() {
                    return Err(Error::invalid_parameter(OP, "id cannot be empty"));
                }
                id
            }
            None => generate_id("audit"),
        };

        let timestamp = match opts.now {
            Some(now) if is_zero_time(&now) => {
                return Err(Error::invalid_parameter(
                    OP,
                    "cannot specify a value for 'now' that is zero",
                ))
            }
            Some(now) => now,
            None => Utc::now(),
        };

        let required_format = match opts.format.as_deref().map(str::trim) {
            Some(f) if !f.is_empty() => f
                .parse::<Format>()
                .map_err(|e| Error::invalid_parameter(OP, "invalid format").with_wrapped(e))?,
            _ => Format::Json,
        };

        let subtype = match opts.subtype.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s
                .parse::<Subtype>()
                .map_err(|e| Error::invalid_parameter(OP, "invalid subtype").with_wrapped(e))?,
            _ => subtype,
        };

        let event = Self {
            id,
            version: EVENT_VERSION.to_string(),
            subtype,
            timestamp,
            data: None,
            required_format,
        };
        event.validate()?;
        Ok(event)
    }

    /// Attach the payload
    pub fn with_data(mut self, data: LogInput) -> Self {
        self.data = Some(data);
        self
    }

    /// Check the envelope invariants
    pub fn validate(&self) -> Result<()> {
        const OP: &str = "audit.AuditEvent.validate";

        if self.id.trim().is_empty() {
            return Err(Error::invalid_parameter(OP, "missing ID"));
        }
        if self.version != EVENT_VERSION {
            return Err(Error::invalid_parameter(
                OP,
                format!("event version unsupported: {:?}", self.version),
            ));
        }
        if is_zero_time(&self.timestamp) {
            return Err(Error::invalid_parameter(OP, "event timestamp cannot be the zero time"));
        }
        Ok(())
    }

    /// Format the envelope should be rendered in
    pub fn required_format(&self) -> Format {
        self.required_format
    }

    /// Timestamp rendered for the `time` field of an entry
    pub fn formatted_time(&self) -> String {
        format_time(self.timestamp)
    }
}

fn is_zero_time(t: &DateTime<Utc>) -> bool {
    *t == DateTime::<Utc>::default() || *t == DateTime::<Utc>::MIN_UTC
}

/// Generate an identifier of the form `<prefix>_<uuid>`
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4())
}

/// An event travelling through a pipeline
///
/// The envelope is shared; formatted bytes are keyed by format name.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    /// When the event entered the pipeline
    pub created_at: Instant,
    /// Envelope and payload
    pub payload: Arc<AuditEvent>,
    formatted: HashMap<String, Vec<u8>>,
}

impl PipelineEvent {
    /// Wrap an envelope
    pub fn new(payload: AuditEvent) -> Self {
        Self {
            created_at: Instant::now(),
            payload: Arc::new(payload),
            formatted: HashMap::new(),
        }
    }

    /// Formatted bytes for `format`, if a formatter produced them
    pub fn format(&self, format: &str) -> Option<&[u8]> {
        self.formatted.get(format).map(Vec::as_slice)
    }

    /// Store formatted bytes
    pub fn set_format(&mut self, format: &str, bytes: Vec<u8>) {
        self.formatted.insert(format.to_string(), bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let event = AuditEvent::new(Subtype::Request, EventOptions::default()).unwrap();
        assert!(event.id.starts_with("audit_"));
        assert_eq!(event.version, "v0.1");
        assert_eq!(event.subtype, Subtype::Request);
        assert_eq!(event.required_format(), Format::Json);
        assert!(event.data.is_none());
    }

    #[test]
    fn test_blank_id_rejected() {
        let err = AuditEvent::new(Subtype::Request, EventOptions::default().with_id("   "))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParameter);
        assert_eq!(err.message(), "id cannot be empty");
    }

    #[test]
    fn test_zero_time_rejected() {
        let opts = EventOptions::default().with_now(DateTime::<Utc>::default());
        assert!(AuditEvent::new(Subtype::Request, opts).is_err());
    }

    #[test]
    fn test_format_and_subtype_options() {
        let opts = EventOptions::default()
            .with_format("JSONX")
            .with_subtype("AuditResponse");
        let event = AuditEvent::new(Subtype::Request, opts).unwrap();
        assert_eq!(event.required_format(), Format::Jsonx);
        assert_eq!(event.subtype, Subtype::Response);

        assert!(AuditEvent::new(Subtype::Request, EventOptions::default().with_format("yaml")).is_err());
        assert!(AuditEvent::new(Subtype::Request, EventOptions::default().with_subtype("nope")).is_err());
    }

    #[test]
    fn test_validate_rejects_tampered_version() {
        let mut event = AuditEvent::new(Subtype::Response, EventOptions::default()).unwrap();
        event.version = "v0.2".into();
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_formatted_time() {
        let now = Utc.with_ymd_and_hms(2024, 3, 22, 10, 0, 5).unwrap();
        let event = AuditEvent::new(Subtype::Request, EventOptions::default().with_now(now)).unwrap();
        assert_eq!(event.formatted_time(), "2024-03-22T10:00:05Z");
    }

    #[test]
    fn test_pipeline_event_formats() {
        let event = AuditEvent::new(Subtype::Request, EventOptions::default()).unwrap();
        let mut pe = PipelineEvent::new(event);
        assert!(pe.format("json").is_none());
        pe.set_format("json", b"{}".to_vec());
        assert_eq!(pe.format("json"), Some(&b"{}"[..]));
    }

    proptest! {
        #[test]
        fn prop_envelope_well_formed(
            id in "[A-Za-z0-9_-]{1,32}",
            secs in 1i64..4_000_000_000,
            response in any::<bool>(),
        ) {
            let subtype = if response { Subtype::Response } else { Subtype::Request };
            let now = Utc.timestamp_opt(secs, 0).unwrap();
            let event = AuditEvent::new(
                subtype,
                EventOptions::default().with_id(id.clone()).with_now(now),
            ).unwrap();

            prop_assert_eq!(&event.id, &id);
            prop_assert_eq!(event.version.as_str(), EVENT_VERSION);
            prop_assert_eq!(event.subtype, subtype);
            prop_assert!(event.validate().is_ok());
            prop_assert!(event.validate().is_ok());
        }
    }
}
