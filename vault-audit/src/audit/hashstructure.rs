//! HMAC redaction of formatted entries
//!
//! Every string leaf of the auth, request and response sections is replaced
//! by its identified HMAC. Map keys, numbers and booleans are left alone.
//! Accessors are only hashed when `hmac_accessor` is set, and top-level data
//! keys named in the caller's non-HMAC keyset are emitted verbatim.

use std::collections::HashSet;

use serde_json::Value;

use super::entry::{EntryAuth, EntryRequest, EntryResponse, EntryWrapInfo, MAX_DATA_DEPTH};
use super::logical::DataMap;
use super::salt::Salt;
use crate::error::{Error, ErrorKind, Result};

/// Hash a single string
pub fn hash_string(salt: &Salt, data: &str) -> String {
    salt.identified_hmac(data)
}

/// Hash the token fields of an auth section
pub fn hash_auth(salt: &Salt, auth: &mut EntryAuth, hmac_accessor: bool) {
    if !auth.client_token.is_empty() {
        auth.client_token = hash_string(salt, &auth.client_token);
    }
    if hmac_accessor && !auth.accessor.is_empty() {
        auth.accessor = hash_string(salt, &auth.accessor);
    }
}

/// Hash a request section
pub fn hash_request(
    salt: &Salt,
    req: &mut EntryRequest,
    hmac_accessor: bool,
    non_hmac_data_keys: &[String],
) -> Result<()> {
    if !req.client_token.is_empty() {
        req.client_token = hash_string(salt, &req.client_token);
    }
    if hmac_accessor && !req.client_token_accessor.is_empty() {
        req.client_token_accessor = hash_string(salt, &req.client_token_accessor);
    }
    if let Some(ref mut data) = req.data {
        hash_data(salt, data, non_hmac_data_keys)?;
    }
    Ok(())
}

/// Hash a response section
pub fn hash_response(
    salt: &Salt,
    resp: &mut EntryResponse,
    hmac_accessor: bool,
    non_hmac_data_keys: &[String],
) -> Result<()> {
    if let Some(ref mut auth) = resp.auth {
        hash_auth(salt, auth, hmac_accessor);
    }
    if let Some(ref mut data) = resp.data {
        hash_data(salt, data, non_hmac_data_keys)?;
    }
    if let Some(ref mut wrap_info) = resp.wrap_info {
        hash_wrap_info(salt, wrap_info, hmac_accessor);
    }
    Ok(())
}

/// Hash the tokens of a wrap info section
pub fn hash_wrap_info(salt: &Salt, wrap_info: &mut EntryWrapInfo, hmac_accessor: bool) {
    if !wrap_info.token.is_empty() {
        wrap_info.token = hash_string(salt, &wrap_info.token);
    }
    if hmac_accessor {
        if !wrap_info.accessor.is_empty() {
            wrap_info.accessor = hash_string(salt, &wrap_info.accessor);
        }
        if !wrap_info.wrapped_accessor.is_empty() {
            wrap_info.wrapped_accessor = hash_string(salt, &wrap_info.wrapped_accessor);
        }
    }
}

/// Hash every string leaf of a data map, skipping the given top-level keys
pub fn hash_data(salt: &Salt, data: &mut DataMap, non_hmac_keys: &[String]) -> Result<()> {
    let skip: HashSet<&str> = non_hmac_keys.iter().map(String::as_str).collect();
    for (key, value) in data.iter_mut() {
        if skip.contains(key.as_str()) {
            continue;
        }
        hash_value(salt, value, 1)?;
    }
    Ok(())
}

fn hash_value(salt: &Salt, value: &mut Value, depth: usize) -> Result<()> {
    if depth > MAX_DATA_DEPTH {
        return Err(Error::new(
            "audit.hash_data",
            format!("data exceeds maximum nesting depth of {MAX_DATA_DEPTH}"),
            ErrorKind::Configuration,
        ));
    }
    match value {
        Value::String(s) => {
            *s = hash_string(salt, s);
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                hash_value(salt, item, depth + 1)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                hash_value(salt, item, depth + 1)?;
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}
