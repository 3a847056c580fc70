//! Built-in information-model builders
//!
//! Each submodule exports a `DESCRIPTOR` for the factory table.

pub mod bdi;
pub mod hello_world;
pub mod ioports;
pub mod simple_event;
pub mod thermal;
pub mod vinput;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;

use ua_core::{Error, LocalizedText, NodeId, QualifiedName, Result, Variant};
use ua_model::{AddressSpace, StoreResult};

/// Standard fields of a BaseEventType-derived event
pub(crate) struct EventFields<'a> {
    pub severity: u16,
    pub message: &'a str,
    pub source_name: &'a str,
}

/// Create an event of `event_type`, fill in the standard fields and trigger
/// it on `origin`
pub(crate) fn emit_event(
    engine: &dyn AddressSpace,
    event_type: &NodeId,
    origin: &NodeId,
    fields: EventFields<'_>,
) -> StoreResult<()> {
    let event = engine.create_event(event_type)?;
    let values = [
        ("Time", Variant::DateTime(Utc::now())),
        ("Severity", Variant::UInt16(fields.severity)),
        ("Message", Variant::LocalizedText(LocalizedText::new("en-US", fields.message))),
        ("SourceName", Variant::from(fields.source_name)),
    ];
    for (name, value) in values {
        engine.write_object_property(&event, &QualifiedName::new(0, name), value)?;
    }
    engine.trigger_event(&event, origin, true)
}

/// Deserialize a plugin's params, using defaults when none were given
pub(crate) fn plugin_params<T: DeserializeOwned + Default>(params: &Value) -> Result<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|e| Error::config(format!("invalid plugin params: {}", e)))
}
