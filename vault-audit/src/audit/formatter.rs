//! Formatter node
//!
//! Turns the payload of an event into a redacted JSON (or JSONx) entry and
//! stores the bytes on the event under the configured format. The caller's
//! payload is never modified: everything is cloned into entry structures
//! before any rewriting happens.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;

use super::entry::{EntryAuth, EntryRequest, EntryResponse, RequestEntry, ResponseEntry};
use super::event::{AuditEvent, Format, PipelineEvent, Subtype};
use super::hashstructure::{hash_auth, hash_request, hash_response};
use super::headers::HeaderFormatter;
use super::jsonx::value_to_jsonx;
use super::logical::{DataMap, Headers, Operation};
use super::options::parse_bool;
use super::salt::{Salt, Salter};
use crate::context::AuditContext;
use crate::error::{Error, Result};
use crate::namespace;

/// Formatter behaviour, parsed from device options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatterConfig {
    /// Output encoding
    pub format: Format,
    /// Hash accessor fields
    pub hmac_accessor: bool,
    /// Skip redaction entirely
    pub raw: bool,
    /// Replace list response `keys` and `key_info` with their sizes
    pub elide_list_responses: bool,
    /// Leave the `time` field empty
    pub omit_time: bool,
    /// Literal prefix written before every entry
    pub prefix: String,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            format: Format::Json,
            hmac_accessor: true,
            raw: false,
            elide_list_responses: false,
            omit_time: false,
            prefix: String::new(),
        }
    }
}

impl FormatterConfig {
    /// Parse `format`, `hmac_accessor`, `log_raw`, `elide_list_responses`
    /// and `prefix`
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self> {
        const OP: &str = "audit.FormatterConfig.from_options";

        let format = match options.get("format").map(|f| f.trim()) {
            Some(f) if !f.is_empty() => f.parse::<Format>().map_err(|e| {
                Error::external_options(OP, format!("unsupported 'format': {f:?}")).with_wrapped(e)
            })?,
            _ => Format::Json,
        };

        Ok(Self {
            format,
            hmac_accessor: parse_bool(OP, options, "hmac_accessor", true)?,
            raw: parse_bool(OP, options, "log_raw", false)?,
            elide_list_responses: parse_bool(OP, options, "elide_list_responses", false)?,
            omit_time: false,
            prefix: options.get("prefix").cloned().unwrap_or_default(),
        })
    }

    /// Leave the `time` field empty
    pub fn with_omit_time(mut self, omit_time: bool) -> Self {
        self.omit_time = omit_time;
        self
    }
}

/// A pipeline node producing formatted entries
#[derive(Clone)]
pub struct EntryFormatter {
    name: String,
    config: FormatterConfig,
    salter: Arc<dyn Salter>,
    header_formatter: Option<Arc<dyn HeaderFormatter>>,
}

impl std::fmt::Debug for EntryFormatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryFormatter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("has_header_formatter", &self.header_formatter.is_some())
            .finish()
    }
}

impl EntryFormatter {
    /// Create a formatter for the device `name`
    pub fn new(
        name: &str,
        config: FormatterConfig,
        salter: Arc<dyn Salter>,
        header_formatter: Option<Arc<dyn HeaderFormatter>>,
    ) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_parameter("audit.NewEntryFormatter", "name is required"));
        }
        Ok(Self {
            name: name.to_string(),
            config,
            salter,
            header_formatter,
        })
    }

    /// Copy of this formatter using a different salter
    pub fn with_salter(&self, salter: Arc<dyn Salter>) -> Self {
        Self {
            salter,
            ..self.clone()
        }
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Formatter configuration
    pub fn config(&self) -> &FormatterConfig {
        &self.config
    }

    /// Format the event and attach the bytes
    ///
    /// A panic while formatting is caught and returned as an error.
    pub async fn process(
        &self,
        ctx: &AuditContext,
        mut event: PipelineEvent,
    ) -> Result<Option<PipelineEvent>> {
        const OP: &str = "audit.EntryFormatter.Process";
        ctx.check()?;

        let payload = Arc::clone(&event.payload);
        let formatted = std::panic::AssertUnwindSafe(self.format_event(ctx, &payload))
            .catch_unwind()
            .await;

        let bytes = match formatted {
            Ok(result) => result?,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                let request_path = payload
                    .data
                    .as_ref()
                    .and_then(|d| d.request.as_ref())
                    .map(|r| r.path.clone())
                    .unwrap_or_default();
                let stacktrace = std::backtrace::Backtrace::force_capture();
                tracing::error!(
                    request_path = %request_path,
                    device = %self.name,
                    panic = %message,
                    stacktrace = %stacktrace,
                    "panic during logging"
                );
                return Err(Error::internal_error(
                    OP,
                    format!("panic generating audit log: {message:?}"),
                ));
            }
        };

        event.set_format(self.config.format.as_str(), bytes);
        Ok(Some(event))
    }

    async fn format_event(&self, ctx: &AuditContext, event: &AuditEvent) -> Result<Vec<u8>> {
        const OP: &str = "audit.EntryFormatter.Process";

        let data = event.data.as_ref().ok_or_else(|| {
            Error::invalid_parameter(
                OP,
                format!("cannot audit event ({}) with no data", event.subtype.entry_type()),
            )
        })?;
        let request = data.request.as_ref().ok_or_else(|| {
            Error::invalid_parameter(
                OP,
                format!(
                    "request to {}-audit a nil request",
                    event.subtype.entry_type()
                ),
            )
        })?;

        let ns = namespace::from_context(ctx)?;
        let salt = if self.config.raw {
            None
        } else {
            Some(self.salter.salt(ctx).await?)
        };

        let time = if self.config.omit_time {
            String::new()
        } else {
            event.formatted_time()
        };

        let mut auth = data
            .auth
            .as_ref()
            .map(|a| EntryAuth::from_auth(a, request.client_token_remaining_uses));
        if !request.inbound_ssc_token.is_empty() {
            auth.get_or_insert_with(EntryAuth::default).client_token =
                request.inbound_ssc_token.clone();
        }

        let mut req_entry = EntryRequest::from_request(request, &ns)?;
        req_entry.headers = self.apply_headers(ctx, &request.headers).await?;

        let mut body = match event.subtype {
            Subtype::Request => {
                if let Some(ref salt) = salt {
                    self.redact_request(salt, auth.as_mut(), &mut req_entry, &data.non_hmac_req_data_keys)?;
                }
                let entry = RequestEntry {
                    time,
                    entry_type: Subtype::Request.entry_type().to_string(),
                    auth,
                    request: Some(req_entry),
                    error: data.outer_err.clone().unwrap_or_default(),
                    forwarded_from: request.forwarded_from.clone(),
                };
                encode_entry(&entry, self.config.format)
            }
            Subtype::Response => {
                let mut resp_entry = match data.response.as_ref() {
                    Some(resp) => {
                        let mut resp_entry = EntryResponse::from_response(resp, request)?;
                        if self.config.elide_list_responses && request.operation == Operation::List {
                            if let Some(ref mut data) = resp_entry.data {
                                elide_list_response(data);
                            }
                        }
                        resp_entry.headers = self.apply_headers(ctx, &resp.headers).await?;
                        Some(resp_entry)
                    }
                    None => None,
                };

                if let Some(ref salt) = salt {
                    self.redact_request(salt, auth.as_mut(), &mut req_entry, &data.non_hmac_req_data_keys)?;
                    if let Some(ref mut resp_entry) = resp_entry {
                        hash_response(
                            salt,
                            resp_entry,
                            self.config.hmac_accessor,
                            &data.non_hmac_resp_data_keys,
                        )?;
                    }
                }

                let entry = ResponseEntry {
                    time,
                    entry_type: Subtype::Response.entry_type().to_string(),
                    auth,
                    request: Some(req_entry),
                    response: resp_entry,
                    error: data.outer_err.clone().unwrap_or_default(),
                    forwarded: !request.forwarded_from.is_empty(),
                };
                encode_entry(&entry, self.config.format)
            }
        }
        .map_err(|e| Error::internal_error(OP, "unable to encode audit entry").with_upstream(e))?;

        body.push(b'\n');

        if self.config.prefix.is_empty() {
            return Ok(body);
        }
        let mut prefixed = Vec::with_capacity(self.config.prefix.len() + body.len());
        prefixed.extend_from_slice(self.config.prefix.as_bytes());
        prefixed.extend_from_slice(&body);
        Ok(prefixed)
    }

    fn redact_request(
        &self,
        salt: &Salt,
        auth: Option<&mut EntryAuth>,
        req: &mut EntryRequest,
        non_hmac_keys: &[String],
    ) -> Result<()> {
        if let Some(auth) = auth {
            hash_auth(salt, auth, self.config.hmac_accessor);
        }
        hash_request(salt, req, self.config.hmac_accessor, non_hmac_keys)
    }

    async fn apply_headers(&self, ctx: &AuditContext, headers: &Headers) -> Result<Headers> {
        match self.header_formatter {
            Some(ref formatter) => {
                formatter
                    .apply_config(ctx, headers, self.salter.as_ref())
                    .await
            }
            None => Ok(Headers::new()),
        }
    }
}

/// Encode an entry in the requested format
///
/// JSONx is rendered from the serialized value directly so deeply nested
/// data is never re-parsed.
fn encode_entry<T: Serialize>(entry: &T, format: Format) -> serde_json::Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(entry),
        Format::Jsonx => {
            let value = serde_json::to_value(entry)?;
            Ok(value_to_jsonx(&value).into_bytes())
        }
    }
}

/// Replace list response `keys` and `key_info` with their sizes
///
/// `keys` is only elided when it is a list of strings and `key_info` only
/// when it is a map; anything else is left as it is.
pub fn elide_list_response(data: &mut DataMap) {
    if let Some(keys) = data.get_mut("keys") {
        if let Value::Array(items) = keys {
            if items.iter().all(Value::is_string) {
                *keys = Value::from(items.len());
            }
        }
    }
    if let Some(key_info) = data.get_mut("key_info") {
        if let Value::Object(map) = key_info {
            *key_info = Value::from(map.len());
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::EventOptions;
    use crate::audit::headers::HeadersConfig;
    use crate::audit::logical::{Auth, Connection, LogInput, Request, RequestWrapInfo, Response, ResponseWrapInfo, TokenType};
    use crate::audit::salt::StaticSalt;
    use crate::error::ErrorKind;
    use crate::storage::InMemoryStorage;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;

    const SALT: &str = "formatter-test-salt";

    fn salt() -> Salt {
        Salt::from_value(SALT, Default::default())
    }

    fn formatter(config: FormatterConfig) -> EntryFormatter {
        EntryFormatter::new("juan", config, Arc::new(StaticSalt::new(SALT)), None).unwrap()
    }

    fn basic_input() -> LogInput {
        let mut headers = Headers::new();
        headers.insert("foo".into(), vec!["bar".into()]);
        LogInput {
            auth: Some(Auth {
                client_token: "foo".into(),
                accessor: "bar".into(),
                display_name: "testtoken".into(),
                policies: vec!["root".into()],
                token_type: Some(TokenType::Service),
                ..Auth::default()
            }),
            request: Some(Request {
                operation: Operation::Update,
                path: "/foo".into(),
                connection: Some(Connection {
                    remote_addr: "127.0.0.1".into(),
                    ..Connection::default()
                }),
                wrap_info: Some(RequestWrapInfo {
                    ttl: Duration::from_secs(60),
                    ..RequestWrapInfo::default()
                }),
                headers,
                ..Request::default()
            }),
            ..LogInput::default()
        }
    }

    fn list_input() -> LogInput {
        let data: DataMap = serde_json::from_value(json!({
            "keys": ["a", "b", "c"],
            "key_info": {"a": 1, "b": 2, "c": 3},
            "extras": "keep"
        }))
        .unwrap();
        LogInput {
            request: Some(Request {
                operation: Operation::List,
                path: "secret/".into(),
                ..Request::default()
            }),
            response: Some(Response {
                data: Some(data),
                ..Response::default()
            }),
            ..LogInput::default()
        }
    }

    fn pipeline_event(subtype: Subtype, input: LogInput) -> PipelineEvent {
        let now = Utc.with_ymd_and_hms(2024, 3, 22, 10, 0, 5).unwrap();
        let event = AuditEvent::new(subtype, EventOptions::default().with_now(now))
            .unwrap()
            .with_data(input);
        PipelineEvent::new(event)
    }

    async fn run(f: &EntryFormatter, subtype: Subtype, input: LogInput) -> serde_json::Value {
        let out = f
            .process(&AuditContext::root(), pipeline_event(subtype, input))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_slice(out.format("json").unwrap()).unwrap()
    }

    #[test]
    fn test_config_from_options() {
        let mut options = HashMap::new();
        options.insert("format".to_string(), "jsonx".to_string());
        options.insert("hmac_accessor".to_string(), "false".to_string());
        options.insert("log_raw".to_string(), "true".to_string());
        options.insert("elide_list_responses".to_string(), "true".to_string());
        options.insert("prefix".to_string(), "@cee: ".to_string());

        let cfg = FormatterConfig::from_options(&options).unwrap();
        assert_eq!(cfg.format, Format::Jsonx);
        assert!(!cfg.hmac_accessor);
        assert!(cfg.raw);
        assert!(cfg.elide_list_responses);
        assert_eq!(cfg.prefix, "@cee: ");

        options.insert("format".to_string(), "yaml".to_string());
        let err = FormatterConfig::from_options(&options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalOptions);

        assert_eq!(FormatterConfig::from_options(&HashMap::new()).unwrap(), FormatterConfig::default());
    }

    #[test]
    fn test_name_required() {
        let err = EntryFormatter::new(" ", FormatterConfig::default(), Arc::new(StaticSalt::new("s")), None)
            .unwrap_err();
        assert_eq!(err.external(), "name is required: invalid internal parameter");
    }

    #[tokio::test]
    async fn test_basic_request() {
        let out = run(&formatter(FormatterConfig::default()), Subtype::Request, basic_input()).await;
        let salt = salt();

        assert_eq!(out["type"], "request");
        assert_eq!(out["time"], "2024-03-22T10:00:05Z");
        assert_eq!(out["auth"]["client_token"], salt.identified_hmac("foo"));
        assert_eq!(out["auth"]["accessor"], salt.identified_hmac("bar"));
        assert_eq!(out["auth"]["display_name"], "testtoken");
        assert_eq!(out["auth"]["policies"], json!(["root"]));
        assert_eq!(out["auth"]["token_type"], "service");
        assert_eq!(out["request"]["path"], "/foo");
        assert_eq!(out["request"]["operation"], "update");
        assert_eq!(out["request"]["wrap_ttl"], 60);
        assert_eq!(out["request"]["remote_address"], "127.0.0.1");
        assert_eq!(out["request"]["namespace"], json!({"id": "root"}));
        assert!(out["request"].get("headers").is_none());
    }

    #[tokio::test]
    async fn test_headers_only_when_allowlisted() {
        let ctx = AuditContext::root();
        let headers = Arc::new(
            HeadersConfig::load(&ctx, Arc::new(InMemoryStorage::new()))
                .await
                .unwrap(),
        );
        let f = EntryFormatter::new(
            "juan",
            FormatterConfig::default(),
            Arc::new(StaticSalt::new(SALT)),
            Some(headers.clone() as Arc<dyn HeaderFormatter>),
        )
        .unwrap();

        let out = run(&f, Subtype::Request, basic_input()).await;
        assert!(out["request"].get("headers").is_none());

        headers.add(&ctx, "foo", false).await.unwrap();
        let out = run(&f, Subtype::Request, basic_input()).await;
        assert_eq!(out["request"]["headers"]["foo"], json!(["bar"]));
    }

    #[tokio::test]
    async fn test_raw_mode() {
        let config = FormatterConfig {
            raw: true,
            ..FormatterConfig::default()
        };
        let out = run(&formatter(config), Subtype::Request, basic_input()).await;
        assert_eq!(out["auth"]["client_token"], "foo");
        assert_eq!(out["auth"]["accessor"], "bar");
    }

    #[tokio::test]
    async fn test_hmac_accessor_false_preserves_accessors() {
        let mut input = basic_input();
        if let Some(ref mut req) = input.request {
            req.client_token_accessor = "req-accessor".into();
        }
        input.response = Some(Response {
            wrap_info: Some(ResponseWrapInfo {
                token: "wrap-token".into(),
                accessor: "wrap-accessor".into(),
                wrapped_accessor: "wrapped".into(),
                ..ResponseWrapInfo::default()
            }),
            ..Response::default()
        });

        let config = FormatterConfig {
            hmac_accessor: false,
            ..FormatterConfig::default()
        };
        let out = run(&formatter(config), Subtype::Response, input).await;

        assert_eq!(out["auth"]["accessor"], "bar");
        assert_eq!(out["request"]["client_token_accessor"], "req-accessor");
        assert_eq!(out["response"]["wrap_info"]["wrapped_accessor"], "wrapped");
        assert_eq!(out["response"]["wrap_info"]["accessor"], "wrap-accessor");
        assert_eq!(out["response"]["wrap_info"]["token"], salt().identified_hmac("wrap-token"));
        assert_eq!(out["auth"]["client_token"], salt().identified_hmac("foo"));
    }

    #[tokio::test]
    async fn test_elision_on_list() {
        let config = FormatterConfig {
            elide_list_responses: true,
            ..FormatterConfig::default()
        };
        let out = run(&formatter(config), Subtype::Response, list_input()).await;
        let data = &out["response"]["data"];
        assert_eq!(data["keys"], 3);
        assert_eq!(data["key_info"], 3);
        assert_eq!(data["extras"], salt().identified_hmac("keep"));
    }

    #[tokio::test]
    async fn test_elision_with_raw() {
        let config = FormatterConfig {
            elide_list_responses: true,
            raw: true,
            ..FormatterConfig::default()
        };
        let out = run(&formatter(config), Subtype::Response, list_input()).await;
        let data = &out["response"]["data"];
        assert_eq!(data["keys"], 3);
        assert_eq!(data["key_info"], 3);
        assert_eq!(data["extras"], "keep");
    }

    #[tokio::test]
    async fn test_no_elision_for_other_operations_or_when_disabled() {
        let mut input = list_input();
        if let Some(ref mut req) = input.request {
            req.operation = Operation::Read;
        }
        let config = FormatterConfig {
            elide_list_responses: true,
            raw: true,
            ..FormatterConfig::default()
        };
        let out = run(&formatter(config.clone()), Subtype::Response, input).await;
        assert_eq!(out["response"]["data"]["keys"], json!(["a", "b", "c"]));

        let config = FormatterConfig {
            elide_list_responses: false,
            ..config
        };
        let out = run(&formatter(config), Subtype::Response, list_input()).await;
        assert_eq!(out["response"]["data"]["keys"], json!(["a", "b", "c"]));
    }

    #[test]
    fn test_elide_leaves_mismatched_types() {
        let mut data: DataMap = serde_json::from_value(json!({
            "keys": {"a": 1},
            "key_info": ["a", "b"]
        }))
        .unwrap();
        elide_list_response(&mut data);
        assert_eq!(data["keys"], json!({"a": 1}));
        assert_eq!(data["key_info"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_non_hmac_keys() {
        let mut input = basic_input();
        if let Some(ref mut req) = input.request {
            req.data = Some(serde_json::from_value(json!({"role": "admin", "password": "x"})).unwrap());
        }
        input.non_hmac_req_data_keys = vec!["role".into()];
        let out = run(&formatter(FormatterConfig::default()), Subtype::Request, input).await;
        assert_eq!(out["request"]["data"]["role"], "admin");
        assert_eq!(out["request"]["data"]["password"], salt().identified_hmac("x"));
    }

    #[tokio::test]
    async fn test_ssc_token_replaces_client_token() {
        let mut input = basic_input();
        if let Some(ref mut req) = input.request {
            req.inbound_ssc_token = "ssct".into();
        }
        let config = FormatterConfig {
            raw: true,
            ..FormatterConfig::default()
        };
        let out = run(&formatter(config), Subtype::Request, input).await;
        assert_eq!(out["auth"]["client_token"], "ssct");
    }

    #[tokio::test]
    async fn test_omit_time_and_prefix() {
        let config = FormatterConfig {
            prefix: "@cee: ".into(),
            ..FormatterConfig::default()
        }
        .with_omit_time(true);
        let out = formatter(config)
            .process(&AuditContext::root(), pipeline_event(Subtype::Request, basic_input()))
            .await
            .unwrap()
            .unwrap();
        let bytes = out.format("json").unwrap();
        let text = std::str::from_utf8(bytes).unwrap();
        let body = text.strip_prefix("@cee: ").unwrap();
        let value: serde_json::Value = serde_json::from_str(body).unwrap();
        assert!(value.get("time").is_none());
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_jsonx_output() {
        let config = FormatterConfig {
            format: Format::Jsonx,
            ..FormatterConfig::default()
        };
        let out = formatter(config)
            .process(&AuditContext::root(), pipeline_event(Subtype::Request, basic_input()))
            .await
            .unwrap()
            .unwrap();
        assert!(out.format("json").is_none());
        let text = std::str::from_utf8(out.format("jsonx").unwrap()).unwrap();
        assert!(text.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><json:object xmlns:json="http://www.ibm.com/xmlns/prod/2009/jsonx">"#));
        assert!(text.contains(r#"<json:string name="type">request</json:string>"#));
    }

    #[tokio::test]
    async fn test_error_field() {
        let mut input = basic_input();
        input.outer_err = Some("permission denied".into());
        let out = run(&formatter(FormatterConfig::default()), Subtype::Request, input).await;
        assert_eq!(out["error"], "permission denied");
    }

    #[tokio::test]
    async fn test_missing_data_and_request() {
        let f = formatter(FormatterConfig::default());
        let ctx = AuditContext::root();

        let event = AuditEvent::new(Subtype::Request, EventOptions::default()).unwrap();
        let err = f.process(&ctx, PipelineEvent::new(event)).await.unwrap_err();
        assert_eq!(
            err.external(),
            "cannot audit event (request) with no data: invalid internal parameter"
        );

        let err = f
            .process(&ctx, pipeline_event(Subtype::Request, LogInput::default()))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "request to request-audit a nil request");

        let err = f
            .process(&ctx, pipeline_event(Subtype::Response, LogInput::default()))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "request to response-audit a nil request");
    }

    #[tokio::test]
    async fn test_missing_namespace() {
        let f = formatter(FormatterConfig::default());
        let err = f
            .process(&AuditContext::background(), pipeline_event(Subtype::Request, basic_input()))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "no namespace");
    }

    #[tokio::test]
    async fn test_does_not_mutate_input() {
        let f = formatter(FormatterConfig::default());
        let input = list_input();
        let event = pipeline_event(Subtype::Response, input.clone());
        let original = Arc::clone(&event.payload);

        let out = f.process(&AuditContext::root(), event).await.unwrap().unwrap();
        assert_eq!(original.data.as_ref(), Some(&input));
        assert_eq!(out.payload.data.as_ref(), Some(&input));
    }

    struct PanickingHeaders;

    #[async_trait]
    impl HeaderFormatter for PanickingHeaders {
        async fn apply_config(
            &self,
            _ctx: &AuditContext,
            _headers: &Headers,
            _salter: &dyn Salter,
        ) -> Result<Headers> {
            panic!("juan");
        }
    }

    #[tokio::test]
    async fn test_panic_is_recovered() {
        let f = EntryFormatter::new(
            "juan",
            FormatterConfig::default(),
            Arc::new(StaticSalt::new(SALT)),
            Some(Arc::new(PanickingHeaders) as Arc<dyn HeaderFormatter>),
        )
        .unwrap();
        let err = f
            .process(&AuditContext::root(), pipeline_event(Subtype::Request, basic_input()))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "panic generating audit log: \"juan\"");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panic_log_carries_stacktrace() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let f = EntryFormatter::new(
            "juan",
            FormatterConfig::default(),
            Arc::new(StaticSalt::new(SALT)),
            Some(Arc::new(PanickingHeaders) as Arc<dyn HeaderFormatter>),
        )
        .unwrap();
        f.process(&AuditContext::root(), pipeline_event(Subtype::Request, basic_input()))
            .await
            .unwrap_err();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|l| l.contains("panic during logging"))
            .unwrap();
        let record: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(record["fields"]["request_path"], "/foo");
        assert_eq!(record["fields"]["device"], "juan");
        assert!(!record["fields"]["stacktrace"].as_str().unwrap().is_empty());
    }

    fn nested_input(depth: usize) -> LogInput {
        let mut value = json!("leaf");
        for _ in 0..depth {
            value = json!({ "level": value });
        }
        let mut input = basic_input();
        if let Some(ref mut request) = input.request {
            let mut data = DataMap::new();
            data.insert("deep".into(), value);
            request.data = Some(data);
        }
        input
    }

    #[tokio::test]
    async fn test_deeply_nested_data_in_both_formats() {
        let ctx = AuditContext::root();
        for format in [Format::Json, Format::Jsonx] {
            let f = formatter(FormatterConfig {
                format,
                ..FormatterConfig::default()
            });
            let out = f
                .process(&ctx, pipeline_event(Subtype::Request, nested_input(200)))
                .await
                .unwrap()
                .unwrap();
            let bytes = out.format(format.as_str()).unwrap();
            assert!(!bytes.is_empty());
        }

        let jsonx = formatter(FormatterConfig {
            format: Format::Jsonx,
            ..FormatterConfig::default()
        })
        .process(&ctx, pipeline_event(Subtype::Request, nested_input(200)))
        .await
        .unwrap()
        .unwrap();
        let text = std::str::from_utf8(jsonx.format("jsonx").unwrap()).unwrap();
        assert_eq!(text.matches(r#"<json:object name="level">"#).count(), 199);
        assert!(text.ends_with("</json:object>\n"));
    }

    fn elision_input(
        operation: Operation,
        keys: &[String],
        key_info: &std::collections::BTreeMap<String, i64>,
        extras: &std::collections::BTreeMap<String, String>,
    ) -> LogInput {
        let mut data = DataMap::new();
        data.insert("keys".into(), json!(keys));
        data.insert("key_info".into(), json!(key_info));
        for (k, v) in extras {
            data.insert(k.clone(), json!(v));
        }
        LogInput {
            request: Some(Request {
                operation,
                path: "secret/".into(),
                ..Request::default()
            }),
            response: Some(Response {
                data: Some(data),
                ..Response::default()
            }),
            ..LogInput::default()
        }
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_elision_replaces_lists_with_counts(
            keys in proptest::collection::vec("[a-z]{1,6}", 0..8),
            key_info in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8),
            extras in proptest::collection::btree_map("x_[a-z]{1,5}", "[a-z]{0,6}", 0..4),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let f = formatter(FormatterConfig {
                    raw: true,
                    elide_list_responses: true,
                    ..FormatterConfig::default()
                });

                let list = run(
                    &f,
                    Subtype::Response,
                    elision_input(Operation::List, &keys, &key_info, &extras),
                )
                .await;
                let data = &list["response"]["data"];
                assert_eq!(data["keys"], json!(keys.len()));
                assert_eq!(data["key_info"], json!(key_info.len()));
                for (k, v) in &extras {
                    assert_eq!(&data[k], &json!(v));
                }

                let read = run(
                    &f,
                    Subtype::Response,
                    elision_input(Operation::Read, &keys, &key_info, &extras),
                )
                .await;
                let data = &read["response"]["data"];
                assert_eq!(data["keys"], json!(keys));
                assert_eq!(data["key_info"], json!(key_info));
            });
        }
    }
}
