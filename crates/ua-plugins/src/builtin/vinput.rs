//! Virtual inputs: 64 boolean ports plus Activate/Deactivate methods
//!
//! The virtual-input CGIs answer in XML. Responses are read by a small state
//! machine where each open element moves the parser into a named state
//! derived from its parent's state.

use async_trait::async_trait;
use parking_lot::Mutex;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, error, warn};

use ua_core::{ids, Error, LocalizedText, NodeId, Result, StatusCode, Variant};
use ua_model::{access, Argument, MethodAttributes, MethodHandler, NodeSpec, ObjectAttributes, VariableAttributes};

use crate::accessor::{PropertyAccessor, PropertyBinding};
use crate::events::{Event, EventFilter, EventService, SubscriptionId, TNS1, TNSAXIS};
use crate::plugin::{BoxedPlugin, ConstructContext, Plugin, PluginDescriptor};
use crate::vapix::{VapixError, VapixTransport};

pub const PLUGIN_NAME: &str = "opc-vinput-plugin";
pub const NAMESPACE_URI: &str = "http://www.axis.com/OpcUA/VirtualInput/";
pub const SERVICE_ACCOUNT: &str = "vapix-virtualinput-user";
pub const OBJECT_NAME: &str = "VirtualInputs";

pub const ACTIVATE_ENDPOINT: &str = "virtualinput/activate.cgi";
pub const DEACTIVATE_ENDPOINT: &str = "virtualinput/deactivate.cgi";
pub const SCHEMA_ENDPOINT: &str = "virtualinput/getschemaversions.cgi";

/// Highest port number current firmware supports
pub const MAX_PORTS: u32 = 64;
/// Port N is node `6100 + N`
pub const FIRST_NODE_ID: u32 = 6100;

pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor::new(PLUGIN_NAME, create);

fn create() -> BoxedPlugin {
    Box::new(VinputPlugin::default())
}

/// Where the parser is in a `VirtualInputResponse` document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Document,
    Response,
    Success,
    SchemaVersion,
    MajorVersion,
    StateChange,
    StateChanged,
    Error,
    ErrorDescription,
    /// Element with no meaning to us, and everything below it
    Ignored,
}

impl ParseState {
    fn enter(self, tag: &str) -> ParseState {
        use ParseState::*;
        match (self, tag) {
            (Document, "VirtualInputResponse") => Response,
            (Response, "Success") => Success,
            (Response, "Error") => Error,
            (Success, "SchemaVersion") => SchemaVersion,
            (SchemaVersion, "MajorVersion") => MajorVersion,
            (Success, "ActivateSuccess") | (Success, "DeactivateSuccess") => StateChange,
            (StateChange, "StateChanged") => StateChanged,
            (Error, "ErrorDescription") => ErrorDescription,
            // error details may be wrapped, e.g. <GeneralError>
            (Error, _) => Error,
            _ => Ignored,
        }
    }
}

/// Outcome of a virtual-input request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VinputResponse {
    Success {
        schema_version: Option<String>,
        state_changed: bool,
    },
    Error {
        description: Option<String>,
    },
}

#[derive(Default)]
struct Collected {
    saw_error: bool,
    schema_version: Option<String>,
    state_changed: bool,
    error_description: Option<String>,
}

impl Collected {
    fn finish_element(&mut self, state: ParseState, text: &str) -> std::result::Result<(), VapixError> {
        match state {
            ParseState::MajorVersion if text.is_empty() => {
                Err(VapixError::malformed("<MajorVersion>: missing value"))
            }
            ParseState::MajorVersion => {
                self.schema_version = Some(text.to_string());
                Ok(())
            }
            ParseState::ErrorDescription if text.is_empty() => {
                Err(VapixError::malformed("<ErrorDescription>: missing value"))
            }
            ParseState::ErrorDescription => {
                self.error_description = Some(text.to_string());
                Ok(())
            }
            ParseState::StateChanged => {
                self.state_changed = match text {
                    "true" => true,
                    "false" => false,
                    _ => return Err(VapixError::malformed("<StateChanged>: unexpected value")),
                };
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Parse a `VirtualInputResponse` document
pub fn parse_response(xml: &str) -> std::result::Result<VinputResponse, VapixError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut stack = vec![ParseState::Document];
    let mut text = String::new();
    let mut collected = Collected::default();

    loop {
        let current = stack.last().copied().unwrap_or(ParseState::Document);
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Start(ref e)) => {
                let name = e.local_name();
                let tag = std::str::from_utf8(name.as_ref()).unwrap_or("");
                let next = current.enter(tag);
                collected.saw_error |= next == ParseState::Error;
                stack.push(next);
                text.clear();
            }
            Ok(XmlEvent::Empty(ref e)) => {
                let name = e.local_name();
                let tag = std::str::from_utf8(name.as_ref()).unwrap_or("");
                let next = current.enter(tag);
                collected.saw_error |= next == ParseState::Error;
                collected.finish_element(next, "")?;
            }
            Ok(XmlEvent::Text(ref e)) => {
                text.push_str(&String::from_utf8_lossy(e));
            }
            Ok(XmlEvent::End(_)) => {
                let finished = stack.pop().unwrap_or(ParseState::Document);
                collected.finish_element(finished, text.trim())?;
                text.clear();
            }
            Ok(XmlEvent::Eof) => break,
            Err(e) => return Err(VapixError::malformed(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    if collected.saw_error {
        return Ok(VinputResponse::Error {
            description: collected.error_description,
        });
    }
    Ok(VinputResponse::Success {
        schema_version: collected.schema_version,
        state_changed: collected.state_changed,
    })
}

pub async fn get_schema_version(transport: &dyn VapixTransport) -> std::result::Result<String, VapixError> {
    let body = transport.get(SCHEMA_ENDPOINT).await?;
    match parse_response(&body)? {
        VinputResponse::Success {
            schema_version: Some(version),
            ..
        } => Ok(version),
        VinputResponse::Success { schema_version: None, .. } => {
            Err(VapixError::malformed("No <MajorVersion> in schema response"))
        }
        VinputResponse::Error { description } => Err(VapixError::Api {
            method: SCHEMA_ENDPOINT.to_string(),
            message: description.unwrap_or_else(|| "unknown error".to_string()),
        }),
    }
}

/// Request path for activating or deactivating `port`. Only activation takes
/// a duration, and a negative one is left out.
pub fn port_request(schema_version: &str, port: u32, active: bool, duration: i32) -> String {
    if active {
        if duration >= 0 {
            format!(
                "{}?schemaversion={}&port={}&duration={}",
                ACTIVATE_ENDPOINT, schema_version, port, duration
            )
        } else {
            format!("{}?schemaversion={}&port={}", ACTIVATE_ENDPOINT, schema_version, port)
        }
    } else {
        format!("{}?schemaversion={}&port={}", DEACTIVATE_ENDPOINT, schema_version, port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VinputProperty {
    Active,
}

/// Cached port states and the transport used to change them
pub struct VirtualInputs {
    transport: Arc<dyn VapixTransport>,
    schema_version: String,
    states: Mutex<[bool; MAX_PORTS as usize]>,
}

impl VirtualInputs {
    pub fn new(transport: Arc<dyn VapixTransport>, schema_version: impl Into<String>) -> Self {
        Self {
            transport,
            schema_version: schema_version.into(),
            states: Mutex::new([false; MAX_PORTS as usize]),
        }
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Cached state of port `port` (1-based)
    pub fn state(&self, port: u32) -> Option<bool> {
        let index = port.checked_sub(1)? as usize;
        self.states.lock().get(index).copied()
    }

    fn record(&self, port: u32, active: bool) -> bool {
        let Some(index) = port.checked_sub(1) else {
            return false;
        };
        match self.states.lock().get_mut(index as usize) {
            Some(slot) => {
                *slot = active;
                true
            }
            None => false,
        }
    }

    /// Change the state of `port` on the device, returning whether it changed
    pub async fn set_state(&self, port: u32, active: bool, duration: i32) -> std::result::Result<bool, VapixError> {
        let request = port_request(&self.schema_version, port, active, duration);
        let body = self.transport.get(&request).await?;
        match parse_response(&body)? {
            VinputResponse::Success { state_changed, .. } => {
                if state_changed {
                    self.record(port, active);
                }
                Ok(state_changed)
            }
            VinputResponse::Error { description } => Err(VapixError::Api {
                method: request,
                message: description.unwrap_or_else(|| "unknown error".to_string()),
            }),
        }
    }
}

#[async_trait]
impl PropertyAccessor for VirtualInputs {
    type Key = VinputProperty;

    async fn get(&self, instance: u32, _key: VinputProperty) -> std::result::Result<Variant, StatusCode> {
        let state = self.state(instance).ok_or(StatusCode::BadNodeIdUnknown)?;
        debug!("cached VirtualInput-{} state: {}", instance, state);
        Ok(Variant::Boolean(state))
    }

    async fn set(&self, instance: u32, _key: VinputProperty, value: &Variant) -> std::result::Result<(), StatusCode> {
        let active = value.as_bool().ok_or(StatusCode::BadTypeMismatch)?;
        debug!("vinput: {} new state: {}", instance, active);
        self.set_state(instance, active, -1).await.map(|_| ()).map_err(|e| {
            error!("Failed to set VirtualInput-{}: {}", instance, e);
            StatusCode::Bad
        })
    }
}

/// Handler of both the Activate and the Deactivate method
pub struct PortMethod {
    inputs: Arc<VirtualInputs>,
    activate: bool,
}

impl PortMethod {
    pub fn activate(inputs: Arc<VirtualInputs>) -> Self {
        Self { inputs, activate: true }
    }

    pub fn deactivate(inputs: Arc<VirtualInputs>) -> Self {
        Self { inputs, activate: false }
    }
}

#[async_trait]
impl MethodHandler for PortMethod {
    async fn call(&self, _object: &NodeId, input: &[Variant]) -> std::result::Result<Vec<Variant>, StatusCode> {
        let port = input
            .first()
            .ok_or(StatusCode::BadArgumentsMissing)?
            .as_u32()
            .ok_or(StatusCode::BadTypeMismatch)?;
        let duration = if self.activate {
            input
                .get(1)
                .ok_or(StatusCode::BadArgumentsMissing)?
                .as_i32()
                .ok_or(StatusCode::BadTypeMismatch)?
        } else {
            0
        };
        debug!("port_nr: {}, duration: {}", port, duration);

        if !(1..=MAX_PORTS).contains(&port) {
            return Err(StatusCode::BadOutOfRange);
        }

        let state_changed = self
            .inputs
            .set_state(port, self.activate, duration)
            .await
            .map_err(|e| {
                error!("Failed to set VirtualInput-{}: {}", port, e);
                StatusCode::Bad
            })?;
        debug!(
            "port_nr: {} set {}, state_changed: {}",
            port,
            if self.activate { "ACTIVE" } else { "INACTIVE" },
            state_changed
        );
        Ok(vec![Variant::Boolean(state_changed)])
    }
}

/// `tns1:topic0=Device`, `tnsaxis:topic1=IO`, `tnsaxis:topic2=VirtualInput`
pub fn vinput_filter() -> EventFilter {
    EventFilter::new()
        .with("topic0", Some(TNS1), Some("Device".into()))
        .with("topic1", Some(TNSAXIS), Some("IO".into()))
        .with("topic2", Some(TNSAXIS), Some("VirtualInput".into()))
        .with("port", None, None)
        .with("active", None, None)
}

fn on_event(inputs: &VirtualInputs, event: &Event) -> Result<()> {
    let port = event.get_int("port")?;
    let active = event.get_bool("active")?;
    // the event numbering starts from 1
    let recorded = u32::try_from(port).map(|port| inputs.record(port, active)).unwrap_or(false);
    if recorded {
        debug!("VirtualInput-{}: {}", port, active);
    } else {
        warn!("VirtualInput-{} out of range, ignoring event", port);
    }
    Ok(())
}

#[derive(Default)]
pub struct VinputPlugin {
    inputs: Option<Arc<VirtualInputs>>,
    events: Option<Arc<dyn EventService>>,
    subscription: Option<SubscriptionId>,
}

impl VinputPlugin {
    pub fn inputs(&self) -> Option<&Arc<VirtualInputs>> {
        self.inputs.as_ref()
    }
}

#[async_trait]
impl Plugin for VinputPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn construct(&mut self, ctx: &mut ConstructContext<'_>) -> Result<()> {
        let ns = ctx.add_namespace(NAMESPACE_URI);
        let transport = ctx.services().vapix.connect(SERVICE_ACCOUNT).await?;
        let schema_version = get_schema_version(transport.as_ref())
            .await
            .map_err(|e| Error::data_source(format!("Failed to get VAPIX schema version: {}", e)))?;
        debug!("schema_version: {}", schema_version);

        let inputs = Arc::new(VirtualInputs::new(transport, schema_version));
        let binding = Arc::new(PropertyBinding::new(inputs.clone()));
        let events = ctx.services().events.clone();

        let mut model = ctx.model(ns);
        let spec = NodeSpec::new(model.id(0), ids::OBJECTS_FOLDER, ids::ORGANIZES, model.name(OBJECT_NAME))
            .with_type_definition(ids::BASE_OBJECT_TYPE);
        let object = model.object(
            spec,
            ObjectAttributes {
                display_name: LocalizedText::new("en-US", OBJECT_NAME),
                description: LocalizedText::new("en-US", OBJECT_NAME),
                ..Default::default()
            },
        )?;

        for port in 1..=MAX_PORTS {
            let name = format!("VirtualInput-{}", port);
            let spec = NodeSpec::new(model.id(FIRST_NODE_ID + port), object.clone(), ids::HAS_COMPONENT, model.name(&name))
                .with_type_definition(ids::BASE_DATA_VARIABLE_TYPE);
            let node = model.variable(
                spec,
                VariableAttributes {
                    display_name: LocalizedText::plain(&name),
                    data_type: ids::BOOLEAN,
                    access_level: access::READ_WRITE,
                    source: Some(binding.clone()),
                    ..Default::default()
                },
            )?;
            binding.bind(node, port, VinputProperty::Active);
        }

        let port_arg = Argument::new("Virtual Input", ids::UINT32, "Virtual Input port number (1..64)");
        let duration_arg = Argument::new("Duration", ids::INT32, "Duration in seconds (-1 to ignore)");
        let state_changed = Argument::new("State Changed", ids::BOOLEAN, "State Changed");

        let spec = NodeSpec::new(model.id(0), object.clone(), ids::HAS_COMPONENT, model.name("Activate Method"));
        model.method(
            spec,
            MethodAttributes {
                display_name: LocalizedText::new("en-US", "Activate"),
                description: LocalizedText::new("en-US", "Activate Virtual Input"),
                executable: true,
                input_arguments: vec![port_arg.clone(), duration_arg],
                output_arguments: vec![state_changed.clone()],
                handler: Some(Arc::new(PortMethod::activate(inputs.clone()))),
            },
        )?;

        let spec = NodeSpec::new(model.id(0), object, ids::HAS_COMPONENT, model.name("Deactivate Method"));
        model.method(
            spec,
            MethodAttributes {
                display_name: LocalizedText::new("en-US", "Deactivate"),
                description: LocalizedText::new("en-US", "Deactivate Virtual Input"),
                executable: true,
                input_arguments: vec![port_arg],
                output_arguments: vec![state_changed],
                handler: Some(Arc::new(PortMethod::deactivate(inputs.clone()))),
            },
        )?;

        let callback_inputs = inputs.clone();
        let subscription = events.subscribe(
            vinput_filter(),
            Arc::new(move |_: SubscriptionId, event: Event| {
                if let Err(e) = on_event(&callback_inputs, &event) {
                    error!("VirtualInput event: {}", e);
                }
            }),
        )?;
        debug!("Device/IO/VirtualInput subscr. id: {}", subscription);

        self.subscription = Some(subscription);
        self.events = Some(events);
        self.inputs = Some(inputs);
        Ok(())
    }

    async fn destroy(&mut self) {
        if let (Some(events), Some(id)) = (self.events.as_ref(), self.subscription.take()) {
            if let Err(e) = events.unsubscribe(id) {
                error!("Failed to unsubscribe {}: {}", id, e);
            }
        }
        self.events = None;
        self.inputs = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schema_versions() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <VirtualInputResponse SchemaVersion="1.0">
              <Success>
                <SchemaVersion>
                  <MajorVersion> 1 </MajorVersion>
                  <MinorVersion>0</MinorVersion>
                </SchemaVersion>
              </Success>
            </VirtualInputResponse>"#;
        assert_eq!(
            parse_response(xml).unwrap(),
            VinputResponse::Success {
                schema_version: Some("1".to_string()),
                state_changed: false,
            }
        );
    }

    #[test]
    fn test_parse_activate_success() {
        let xml = "<VirtualInputResponse><Success><ActivateSuccess>\
                   <StateChanged>true</StateChanged></ActivateSuccess></Success></VirtualInputResponse>";
        assert_eq!(
            parse_response(xml).unwrap(),
            VinputResponse::Success {
                schema_version: None,
                state_changed: true,
            }
        );
    }

    #[test]
    fn test_parse_nested_error() {
        let xml = "<VirtualInputResponse><Error><GeneralError><ErrorCode>20</ErrorCode>\
                   <ErrorDescription>Invalid port</ErrorDescription></GeneralError></Error></VirtualInputResponse>";
        assert_eq!(
            parse_response(xml).unwrap(),
            VinputResponse::Error {
                description: Some("Invalid port".to_string())
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        let xml = "<VirtualInputResponse><Success><DeactivateSuccess>\
                   <StateChanged>maybe</StateChanged></DeactivateSuccess></Success></VirtualInputResponse>";
        assert!(parse_response(xml).unwrap_err().to_string().contains("<StateChanged>: unexpected value"));

        let xml = "<VirtualInputResponse><Success><SchemaVersion><MajorVersion></MajorVersion>\
                   </SchemaVersion></Success></VirtualInputResponse>";
        assert!(parse_response(xml).unwrap_err().to_string().contains("<MajorVersion>: missing value"));
    }

    #[test]
    fn test_state_changed_outside_success_is_ignored() {
        let xml = "<VirtualInputResponse><StateChanged>true</StateChanged></VirtualInputResponse>";
        assert_eq!(
            parse_response(xml).unwrap(),
            VinputResponse::Success {
                schema_version: None,
                state_changed: false,
            }
        );
    }

    #[test]
    fn test_port_request() {
        assert_eq!(
            port_request("1", 3, true, 10),
            "virtualinput/activate.cgi?schemaversion=1&port=3&duration=10"
        );
        assert_eq!(port_request("1", 3, true, -1), "virtualinput/activate.cgi?schemaversion=1&port=3");
        assert_eq!(port_request("1", 64, false, 10), "virtualinput/deactivate.cgi?schemaversion=1&port=64");
    }
}
