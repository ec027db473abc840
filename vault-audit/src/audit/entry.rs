//! On-wire shape of formatted audit entries
//!
//! Entries are built by cloning the caller's [`LogInput`](super::logical::LogInput)
//! into owned structures, which the redaction engine then rewrites in place.
//! Every optional field is omitted from JSON when empty.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::logical::{Auth, DataMap, Headers, PolicyResults, Request, Response};
use crate::error::{Error, ErrorKind, Result};
use crate::namespace::Namespace;

/// Maximum nesting depth accepted in request and response data
pub const MAX_DATA_DEPTH: usize = 500;

/// Whole seconds of `d`, saturating at `i64::MAX`
fn duration_secs(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

fn is_zero_u16(n: &u16) -> bool {
    *n == 0
}

/// A formatted request event
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestEntry {
    /// Event time, RFC3339 with nanoseconds
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub time: String,
    /// Always `request`
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Caller auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<EntryAuth>,
    /// The request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<EntryRequest>,
    /// Error returned to the client
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Node that forwarded the request
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub forwarded_from: String,
}

/// A formatted response event
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseEntry {
    /// Event time, RFC3339 with nanoseconds
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub time: String,
    /// Always `response`
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Caller auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<EntryAuth>,
    /// The request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<EntryRequest>,
    /// The response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<EntryResponse>,
    /// Error returned to the client
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Whether the request was forwarded from another node
    #[serde(default, skip_serializing_if = "is_false")]
    pub forwarded: bool,
}

/// Auth section of an entry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryAuth {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub accessor: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub token_policies: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identity_policies: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub external_namespace_policies: HashMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "is_false")]
    pub no_default_policy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_results: Option<PolicyResults>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub num_uses: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub remaining_uses: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub entity_id: String,
    #[serde(skip_serializing_if = "is_false")]
    pub entity_created: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token_type: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub token_ttl: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token_issue_time: String,
}

impl EntryAuth {
    /// Clone an [`Auth`] into entry form
    pub fn from_auth(auth: &Auth, remaining_uses: i64) -> Self {
        Self {
            client_token: auth.client_token.clone(),
            accessor: auth.accessor.clone(),
            display_name: auth.display_name.clone(),
            policies: auth.policies.clone(),
            token_policies: auth.token_policies.clone(),
            identity_policies: auth.identity_policies.clone(),
            external_namespace_policies: auth.external_namespace_policies.clone(),
            no_default_policy: auth.no_default_policy,
            policy_results: auth.policy_results.clone(),
            metadata: auth.metadata.clone(),
            num_uses: auth.num_uses,
            remaining_uses,
            entity_id: auth.entity_id.clone(),
            entity_created: auth.entity_created,
            token_type: auth
                .token_type
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            token_ttl: duration_secs(auth.ttl),
            token_issue_time: auth
                .issue_time
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
        }
    }
}

/// Namespace section of a request entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryNamespace {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl From<&Namespace> for EntryNamespace {
    fn from(ns: &Namespace) -> Self {
        Self {
            id: ns.id.clone(),
            path: ns.path.clone(),
        }
    }
}

/// Request section of an entry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub replication_cluster: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub operation: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_point: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_accessor: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_running_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_running_sha256: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_class: String,
    #[serde(skip_serializing_if = "is_false")]
    pub mount_is_external_plugin: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_token_accessor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<EntryNamespace>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DataMap>,
    #[serde(skip_serializing_if = "is_false")]
    pub policy_override: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub remote_address: String,
    #[serde(skip_serializing_if = "is_zero_u16")]
    pub remote_port: u16,
    #[serde(skip_serializing_if = "is_zero")]
    pub wrap_ttl: i64,
    #[serde(skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_certificate_serial_number: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub request_uri: String,
}

impl EntryRequest {
    /// Clone a [`Request`] into entry form
    ///
    /// Headers are left empty; they are filled in after the allowlist runs.
    pub fn from_request(req: &Request, ns: &Namespace) -> Result<Self> {
        let connection = req.connection.clone().unwrap_or_default();
        Ok(Self {
            id: req.id.clone(),
            client_id: req.client_id.clone(),
            replication_cluster: req.replication_cluster.clone(),
            operation: req.operation.as_str().to_string(),
            mount_point: req.mount_point.clone(),
            mount_type: req.mount_type.clone(),
            mount_accessor: req.mount_accessor.clone(),
            mount_running_version: req.mount_running_version.clone(),
            mount_running_sha256: req.mount_running_sha256.clone(),
            mount_class: req.mount_class.clone(),
            mount_is_external_plugin: req.mount_is_external_plugin,
            client_token: req.client_token.clone(),
            client_token_accessor: req.client_token_accessor.clone(),
            namespace: Some(EntryNamespace::from(ns)),
            path: req.path.clone(),
            data: clone_data(req.data.as_ref())?,
            policy_override: req.policy_override,
            remote_address: connection.remote_addr,
            remote_port: connection.remote_port,
            wrap_ttl: req
                .wrap_info
                .as_ref()
                .map(|w| duration_secs(w.ttl))
                .unwrap_or(0),
            headers: Headers::new(),
            client_certificate_serial_number: connection
                .client_certificate_serial_number
                .unwrap_or_default(),
            request_uri: req.request_uri.clone(),
        })
    }
}

/// Secret section of a response entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntrySecret {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub lease_id: String,
}

/// Wrap info section of a response entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryWrapInfo {
    pub ttl: i64,
    pub token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub accessor: String,
    pub creation_time: String,
    pub creation_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub wrapped_accessor: String,
}

/// Response section of an entry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<EntryAuth>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_point: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_accessor: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_running_plugin_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_running_sha256: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mount_class: String,
    #[serde(skip_serializing_if = "is_false")]
    pub mount_is_external_plugin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<EntrySecret>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DataMap>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub redirect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_info: Option<EntryWrapInfo>,
    #[serde(skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
}

impl EntryResponse {
    /// Clone a [`Response`] into entry form
    ///
    /// Mount details are taken from the request that produced the response.
    pub fn from_response(resp: &Response, req: &Request) -> Result<Self> {
        Ok(Self {
            auth: resp.auth.as_ref().map(|a| EntryAuth::from_auth(a, 0)),
            mount_point: req.mount_point.clone(),
            mount_type: req.mount_type.clone(),
            mount_accessor: req.mount_accessor.clone(),
            mount_running_plugin_version: req.mount_running_version.clone(),
            mount_running_sha256: req.mount_running_sha256.clone(),
            mount_class: req.mount_class.clone(),
            mount_is_external_plugin: req.mount_is_external_plugin,
            secret: resp.secret.as_ref().map(|s| EntrySecret {
                lease_id: s.lease_id.clone(),
            }),
            data: clone_data(resp.data.as_ref())?,
            warnings: resp.warnings.clone(),
            redirect: resp.redirect.clone(),
            wrap_info: resp.wrap_info.as_ref().map(|w| EntryWrapInfo {
                ttl: duration_secs(w.ttl),
                token: w.token.clone(),
                accessor: w.accessor.clone(),
                creation_time: w.creation_time.map(format_time).unwrap_or_default(),
                creation_path: w.creation_path.clone(),
                wrapped_accessor: w.wrapped_accessor.clone(),
            }),
            headers: Headers::new(),
        })
    }
}

/// Clone a data map, rejecting values nested deeper than [`MAX_DATA_DEPTH`]
pub fn clone_data(data: Option<&DataMap>) -> Result<Option<DataMap>> {
    let Some(data) = data else {
        return Ok(None);
    };
    for value in data.values() {
        check_depth(value, 1)?;
    }
    Ok(Some(data.clone()))
}

fn check_depth(value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DATA_DEPTH {
        return Err(Error::new(
            "audit.clone_data",
            format!("data exceeds maximum nesting depth of {MAX_DATA_DEPTH}"),
            ErrorKind::Configuration,
        ));
    }
    match value {
        Value::Array(items) => items.iter().try_for_each(|v| check_depth(v, depth + 1)),
        Value::Object(map) => map.values().try_for_each(|v| check_depth(v, depth + 1)),
        _ => Ok(()),
    }
}

/// Format a timestamp as RFC3339 in UTC with trailing fractional zeros trimmed
///
/// `2024-03-22T10:00:05.000000010Z` renders as `2024-03-22T10:00:05.00000001Z`
/// and whole seconds render without a fractional part.
pub fn format_time(t: DateTime<Utc>) -> String {
    let base = t.format("%Y-%m-%dT%H:%M:%S").to_string();
    let nanos = t.nanosecond() % 1_000_000_000;
    if nanos == 0 {
        return format!("{base}Z");
    }
    let frac = format!("{nanos:09}");
    format!("{base}.{}Z", frac.trim_end_matches('0'))
}
