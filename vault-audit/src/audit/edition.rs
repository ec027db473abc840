//! Edition seam
//!
//! Filtering, fallback devices, field exclusion and the success threshold
//! depend on which edition of the server is running. The community edition
//! rejects those options and requires one sink to succeed whenever any
//! device is registered.

use std::collections::HashMap;
use std::fmt::Debug;

use super::filter::EntryFilter;
use crate::error::{Error, ErrorKind, Result};

/// Device options only some editions accept
pub const ENTERPRISE_ONLY_OPTIONS: [&str; 3] = ["exclude", "fallback", "filter"];

/// Edition-specific device and broker behaviour
pub trait Edition: Send + Sync + Debug {
    /// Short edition name
    fn name(&self) -> &'static str;

    /// Reject options this edition does not support
    fn validate_options(&self, options: &HashMap<String, String>) -> Result<()>;

    /// Build the filter for a device, if the options ask for one
    fn filter_node(&self, options: &HashMap<String, String>) -> Result<Option<EntryFilter>>;

    /// Whether a device with these options is a fallback device
    fn is_fallback(&self, options: &HashMap<String, String>) -> Result<bool>;

    /// Minimum number of completed sinks for a log call to succeed
    ///
    /// `filtered` counts the devices that carry a filter.
    fn success_threshold(&self, devices: usize, filtered: usize) -> usize;
}

fn reject(op: &str, options: &HashMap<String, String>, unsupported: &[&str]) -> Result<()> {
    for key in unsupported {
        if options.contains_key(*key) {
            return Err(Error::external_options(op, format!("option {key:?} is not supported"))
                .with_wrapped(Error::new(op, "", ErrorKind::EnterpriseOnly)));
        }
    }
    Ok(())
}

/// No filtering, no fallback, no exclusion
#[derive(Debug, Default, Clone, Copy)]
pub struct CommunityEdition;

impl Edition for CommunityEdition {
    fn name(&self) -> &'static str {
        "community"
    }

    fn validate_options(&self, options: &HashMap<String, String>) -> Result<()> {
        reject("audit.CommunityEdition.validate_options", options, &ENTERPRISE_ONLY_OPTIONS)
    }

    fn filter_node(&self, _options: &HashMap<String, String>) -> Result<Option<EntryFilter>> {
        Ok(None)
    }

    fn is_fallback(&self, _options: &HashMap<String, String>) -> Result<bool> {
        Ok(false)
    }

    fn success_threshold(&self, devices: usize, _filtered: usize) -> usize {
        usize::from(devices > 0)
    }
}

/// Accepts the `filter` option
///
/// When every registered device filters, an event may legitimately reach no
/// sink at all, so the threshold drops to zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilteringEdition;

impl Edition for FilteringEdition {
    fn name(&self) -> &'static str {
        "filtering"
    }

    fn validate_options(&self, options: &HashMap<String, String>) -> Result<()> {
        reject("audit.FilteringEdition.validate_options", options, &["exclude", "fallback"])
    }

    fn filter_node(&self, options: &HashMap<String, String>) -> Result<Option<EntryFilter>> {
        match options.get("filter") {
            Some(filter) => EntryFilter::new(filter).map(Some),
            None => Ok(None),
        }
    }

    fn is_fallback(&self, _options: &HashMap<String, String>) -> Result<bool> {
        Ok(false)
    }

    fn success_threshold(&self, devices: usize, filtered: usize) -> usize {
        usize::from(devices > filtered)
    }
}
