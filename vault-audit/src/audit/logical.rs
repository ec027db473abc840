//! Caller-supplied payload of an audit event
//!
//! `LogInput` is what the request handler hands to the broker. It is treated
//! as read-only: the formatter clones everything it needs before redacting.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form data attached to requests and responses
pub type DataMap = serde_json::Map<String, serde_json::Value>;

/// Multi-valued header map
pub type Headers = BTreeMap<String, Vec<String>>;

/// Operation performed by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Create a resource
    Create,
    /// Read a resource
    #[default]
    Read,
    /// Update a resource
    Update,
    /// Patch a resource
    Patch,
    /// Delete a resource
    Delete,
    /// List resources
    List,
    /// Help text request
    Help,
    /// Alias lookahead during login
    AliasLookahead,
    /// Role resolution
    #[serde(rename = "resolve-role")]
    ResolveRole,
    /// Header lookup
    Header,
    /// Rollback of a write-ahead entry
    Rollback,
    /// Periodic function call
    Periodic,
    /// Lease revocation
    Revoke,
    /// Lease renewal
    Renew,
}

impl Operation {
    /// Wire form of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Help => "help",
            Self::AliasLookahead => "alias-lookahead",
            Self::ResolveRole => "resolve-role",
            Self::Header => "header",
            Self::Rollback => "rollback",
            Self::Periodic => "periodic",
            Self::Revoke => "revoke",
            Self::Renew => "renew",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_lowercase().as_str() {
            "create" => Self::Create,
            "read" => Self::Read,
            "update" => Self::Update,
            "patch" => Self::Patch,
            "delete" => Self::Delete,
            "list" => Self::List,
            "help" => Self::Help,
            "alias-lookahead" => Self::AliasLookahead,
            "resolve-role" => Self::ResolveRole,
            "header" => Self::Header,
            "rollback" => Self::Rollback,
            "periodic" => Self::Periodic,
            "revoke" => Self::Revoke,
            "renew" => Self::Renew,
            other => return Err(format!("unknown operation {other:?}")),
        };
        Ok(op)
    }
}

/// Kind of token that authenticated the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenType {
    /// Mount default
    #[default]
    Default,
    /// Service token
    Service,
    /// Batch token
    Batch,
    /// Default, resolving to service
    DefaultService,
    /// Default, resolving to batch
    DefaultBatch,
}

impl TokenType {
    /// Wire form of the token type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Service => "service",
            Self::Batch => "batch",
            Self::DefaultService => "default-service",
            Self::DefaultBatch => "default-batch",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A policy that granted access
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyInfo {
    /// Policy name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Namespace ID holding the policy
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace_id: String,
    /// Namespace path holding the policy
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace_path: String,
    /// Policy type (acl, rgp, egp)
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub policy_type: String,
}

/// Outcome of policy evaluation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyResults {
    /// Whether the request was allowed
    pub allowed: bool,
    /// Policies that granted access
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub granting_policies: Vec<PolicyInfo>,
}

/// Authentication information attached to a request or returned by a login
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Auth {
    /// Raw client token
    pub client_token: String,
    /// Token accessor
    pub accessor: String,
    /// Display name of the token
    pub display_name: String,
    /// All policies attached to the token
    pub policies: Vec<String>,
    /// Policies from the token itself
    pub token_policies: Vec<String>,
    /// Policies from the identity system
    pub identity_policies: Vec<String>,
    /// Identity policies granted in other namespaces
    pub external_namespace_policies: HashMap<String, Vec<String>>,
    /// Whether the default policy is excluded
    pub no_default_policy: bool,
    /// Token metadata
    pub metadata: BTreeMap<String, String>,
    /// Allowed number of uses, zero for unlimited
    pub num_uses: i64,
    /// Identity entity ID
    pub entity_id: String,
    /// Whether the entity was created by this request
    pub entity_created: bool,
    /// Token type
    pub token_type: Option<TokenType>,
    /// Token TTL
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// When the token was issued
    pub issue_time: Option<DateTime<Utc>>,
    /// Policy evaluation outcome
    pub policy_results: Option<PolicyResults>,
}

/// Wrapping parameters supplied on a request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestWrapInfo {
    /// Requested wrapping TTL
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// Wrapping token format
    pub format: String,
    /// Whether the wrapped response is seal-wrapped
    pub seal_wrap: bool,
}

/// Network details of the caller
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    /// Remote address
    pub remote_addr: String,
    /// Remote port
    pub remote_port: u16,
    /// Serial number of the first peer TLS certificate, if any
    pub client_certificate_serial_number: Option<String>,
}

/// An inbound request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// Request ID
    pub id: String,
    /// Client ID used for client counting
    pub client_id: String,
    /// Cluster that replicated the request
    pub replication_cluster: String,
    /// Operation performed
    pub operation: Operation,
    /// Mount point handling the request
    pub mount_point: String,
    /// Type of the mount
    pub mount_type: String,
    /// Mount accessor
    pub mount_accessor: String,
    /// Running plugin version
    pub mount_running_version: String,
    /// Running plugin SHA-256
    pub mount_running_sha256: String,
    /// Mount class (secret, auth)
    pub mount_class: String,
    /// Whether the mount runs an external plugin
    pub mount_is_external_plugin: bool,
    /// Raw client token
    pub client_token: String,
    /// Accessor of the client token
    pub client_token_accessor: String,
    /// Remaining uses of the client token
    pub client_token_remaining_uses: i64,
    /// Request path
    pub path: String,
    /// Request data
    pub data: Option<DataMap>,
    /// Whether soft-mandatory policies were overridden
    pub policy_override: bool,
    /// Caller connection
    pub connection: Option<Connection>,
    /// Wrapping parameters
    pub wrap_info: Option<RequestWrapInfo>,
    /// Request headers
    pub headers: Headers,
    /// Raw request URI
    pub request_uri: String,
    /// Server-side consistent token presented instead of the raw token
    pub inbound_ssc_token: String,
    /// Address of the node that forwarded the request
    pub forwarded_from: String,
}

/// Secret lease details in a response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    /// Lease ID
    pub lease_id: String,
}

/// Wrapping details of a response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseWrapInfo {
    /// Wrapping token TTL
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// Wrapping token
    pub token: String,
    /// Wrapping token accessor
    pub accessor: String,
    /// When the wrapping token was created
    pub creation_time: Option<DateTime<Utc>>,
    /// Path that produced the wrapped response
    pub creation_path: String,
    /// Accessor of the wrapped token, if the response wraps a token
    pub wrapped_accessor: String,
}

/// An outbound response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Response {
    /// Auth produced by a login
    pub auth: Option<Auth>,
    /// Secret lease
    pub secret: Option<Secret>,
    /// Response data
    pub data: Option<DataMap>,
    /// Warnings returned to the client
    pub warnings: Vec<String>,
    /// Redirect target
    pub redirect: String,
    /// Wrapping details
    pub wrap_info: Option<ResponseWrapInfo>,
    /// Response headers
    pub headers: Headers,
}

/// Everything the request handler supplies for one audit call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogInput {
    /// Auth of the caller
    pub auth: Option<Auth>,
    /// The request, present for request and response events
    pub request: Option<Request>,
    /// The response, present for response events
    pub response: Option<Response>,
    /// Error returned to the client, if any
    pub outer_err: Option<String>,
    /// Caller defined input type
    #[serde(rename = "type")]
    pub input_type: String,
    /// Top-level request data keys emitted without HMAC
    pub non_hmac_req_data_keys: Vec<String>,
    /// Top-level response data keys emitted without HMAC
    pub non_hmac_resp_data_keys: Vec<String>,
}

impl LogInput {
    /// Create an input wrapping a request
    pub fn with_request(request: Request) -> Self {
        Self {
            request: Some(request),
            ..Self::default()
        }
    }
}

/// Serialize a `Duration` as whole seconds
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
