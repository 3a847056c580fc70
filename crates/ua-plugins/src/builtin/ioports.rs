//! I/O port information model
//!
//! Types, event types and one object per physical port. Port properties are
//! served from a cache that is filled from `getPorts`, kept current by system
//! events and written through with `setPorts`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, warn};

use ua_core::{ids, Error, LocalizedText, NodeId, QualifiedName, Result, StatusCode, Variant};
use ua_model::{
    access, AddressSpace, CustomDataType, DataTypeAttributes, EnumField, ModelBuilder, NodeSpec, ObjectAttributes,
    ObjectTypeAttributes, VariableAttributes,
};

use super::{emit_event, EventFields};
use crate::accessor::{PropertyAccessor, PropertyBinding};
use crate::events::{Event, EventFilter, EventService, SubscriptionId, TNS1, TNSAXIS};
use crate::plugin::{BoxedPlugin, ConstructContext, Plugin, PluginDescriptor};
use crate::vapix::{json_method, VapixError, VapixTransport};

pub const PLUGIN_NAME: &str = "opc-ioports-plugin";
pub const NAMESPACE_URI: &str = "http://www.axis.com/OpcUA/IOPorts/";
pub const SERVICE_ACCOUNT: &str = "vapix-ioports-user";
pub const ENDPOINT: &str = "io/portmanagement.cgi";
pub const API_VERSION: &str = "1.1";

const CONFIG_SERVICE: &str = "com.axis.Configuration.Legacy.IOControl1.IOPort";
const STATE_EVENT_SEVERITY: u16 = 100;
pub const ROOT_NAME: &str = "I/O Ports";

/// Numeric identifiers inside the plugin namespace
pub mod node_ids {
    pub const IOPORT_OBJ_TYPE: u32 = 1004;
    pub const IOP_EVENT_TYPE: u32 = 1005;
    pub const IOP_STATE_EVENT_TYPE: u32 = 1008;
    pub const IOP_DIRECTION_EVENT_TYPE: u32 = 1011;
    pub const IOP_NORMAL_STATE_EVENT_TYPE: u32 = 1014;
    pub const IOPORT_DIRECTION_TYPE: u32 = 3004;
    pub const IOPORT_STATE_TYPE: u32 = 3005;
    pub const IOPORTS: u32 = 5006;
    pub const IOPORT_DIRECTION_TYPE_ENUM_STRINGS: u32 = 6026;
    pub const IOPORT_STATE_TYPE_ENUM_STRINGS: u32 = 6042;
}

pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor::new(PLUGIN_NAME, create);

fn create() -> BoxedPlugin {
    Box::new(IoPortsPlugin::default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Open = 0,
    Closed = 1,
}

impl PortState {
    fn from_vapix(value: &str) -> Self {
        if value == "open" {
            PortState::Open
        } else {
            PortState::Closed
        }
    }

    fn as_vapix(self) -> &'static str {
        match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
        }
    }

    fn from_variant(value: &Variant) -> std::result::Result<Self, StatusCode> {
        match value.as_i32() {
            Some(0) => Ok(PortState::Open),
            Some(1) => Ok(PortState::Closed),
            Some(_) => Err(StatusCode::BadInvalidArgument),
            None => Err(StatusCode::BadTypeMismatch),
        }
    }

    fn label(self) -> &'static str {
        match self {
            PortState::Open => "OPEN",
            PortState::Closed => "CLOSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input = 0,
    Output = 1,
}

impl PortDirection {
    fn from_vapix(value: &str) -> Self {
        if value == "input" {
            PortDirection::Input
        } else {
            PortDirection::Output
        }
    }

    fn as_vapix(self) -> &'static str {
        match self {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
        }
    }

    fn from_variant(value: &Variant) -> std::result::Result<Self, StatusCode> {
        match value.as_i32() {
            Some(0) => Ok(PortDirection::Input),
            Some(1) => Ok(PortDirection::Output),
            Some(_) => Err(StatusCode::BadInvalidArgument),
            None => Err(StatusCode::BadTypeMismatch),
        }
    }

    /// Access level of the State property for a port in this direction
    fn state_access(self) -> u8 {
        match self {
            PortDirection::Input => access::READ,
            PortDirection::Output => access::READ_WRITE,
        }
    }
}

/// Cached view of one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoPort {
    pub configurable: bool,
    pub readonly: bool,
    pub name: String,
    pub usage: String,
    pub normal_state: PortState,
    pub state: PortState,
    pub direction: PortDirection,
}

/// State of a port given its `active` flag and configured normal state
pub fn new_state(active: bool, normal_state: PortState) -> PortState {
    match (active, normal_state) {
        (true, PortState::Open) => PortState::Closed,
        (true, PortState::Closed) => PortState::Open,
        (false, normal) => normal,
    }
}

/// Browse label of a port; the device UI numbers ports from 1
pub fn port_label(port: u32) -> String {
    format!("I/O Port {}", port + 1)
}

#[derive(Debug, Deserialize)]
struct SupportedVersions {
    #[serde(rename = "apiVersions")]
    api_versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PortList {
    #[serde(rename = "numberOfPorts")]
    number_of_ports: usize,
    items: Vec<PortItem>,
}

#[derive(Debug, Deserialize)]
struct PortItem {
    port: String,
    configurable: bool,
    usage: String,
    name: String,
    direction: String,
    state: String,
    #[serde(rename = "normalState")]
    normal_state: String,
    /// Only present when true
    #[serde(default)]
    readonly: bool,
}

pub async fn check_api_version(transport: &dyn VapixTransport) -> std::result::Result<(), VapixError> {
    let data = json_method(
        transport,
        ENDPOINT,
        "getSupportedVersions",
        &json!({"method": "getSupportedVersions"}),
    )
    .await?;
    let versions: SupportedVersions = serde_json::from_value(data)?;
    if versions.api_versions.iter().any(|v| v == API_VERSION) {
        Ok(())
    } else {
        Err(VapixError::malformed(format!(
            "{} ver. {} is not supported by the device.",
            ENDPOINT, API_VERSION
        )))
    }
}

pub fn parse_ports(data: Value) -> std::result::Result<BTreeMap<u32, IoPort>, VapixError> {
    let list: PortList = serde_json::from_value(data)?;
    if list.items.len() != list.number_of_ports {
        return Err(VapixError::malformed(format!(
            "Ports array size: {} mismatches 'numberOfPorts': {}",
            list.items.len(),
            list.number_of_ports
        )));
    }

    let mut ports = BTreeMap::new();
    for item in list.items {
        let index: u32 = item
            .port
            .trim()
            .parse()
            .map_err(|_| VapixError::malformed(format!("invalid port index: '{}'", item.port)))?;
        ports.insert(
            index,
            IoPort {
                configurable: item.configurable,
                readonly: item.readonly,
                name: item.name,
                usage: item.usage,
                normal_state: PortState::from_vapix(&item.normal_state),
                state: PortState::from_vapix(&item.state),
                direction: PortDirection::from_vapix(&item.direction),
            },
        );
    }
    Ok(ports)
}

pub async fn get_ports(transport: &dyn VapixTransport) -> std::result::Result<BTreeMap<u32, IoPort>, VapixError> {
    let data = json_method(
        transport,
        ENDPOINT,
        "getPorts",
        &json!({"apiVersion": API_VERSION, "method": "getPorts"}),
    )
    .await?;
    parse_ports(data)
}

const SETTABLE_KEYS: &[&str] = &["port", "usage", "direction", "name", "normalState", "state"];

/// Set one property of one port
pub async fn set_port(
    transport: &dyn VapixTransport,
    port: u32,
    key: &str,
    value: &str,
) -> std::result::Result<(), VapixError> {
    // the device accepts misspelled keys silently
    if !SETTABLE_KEYS.contains(&key) {
        return Err(VapixError::malformed(format!("Invalid port property: \"{}\"!", key)));
    }

    let mut entry = serde_json::Map::new();
    entry.insert("port".to_string(), Value::String(port.to_string()));
    entry.insert(key.to_string(), Value::String(value.to_string()));
    let body = json!({
        "apiVersion": API_VERSION,
        "method": "setPorts",
        "params": {"ports": [Value::Object(entry)]}
    });

    let data = json_method(transport, ENDPOINT, "setPorts", &body).await?;
    if data.is_null() {
        return Err(VapixError::malformed("No 'data' key in response"));
    }
    Ok(())
}

/// The eight properties of an I/O port object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortProperty {
    Configurable,
    Direction,
    Disabled,
    Index,
    Name,
    NormalState,
    State,
    Usage,
}

impl PortProperty {
    pub const ALL: [PortProperty; 8] = [
        PortProperty::Configurable,
        PortProperty::Direction,
        PortProperty::Disabled,
        PortProperty::Index,
        PortProperty::Name,
        PortProperty::NormalState,
        PortProperty::State,
        PortProperty::Usage,
    ];

    pub fn browse_name(self) -> &'static str {
        match self {
            PortProperty::Configurable => "Configurable",
            PortProperty::Direction => "Direction",
            PortProperty::Disabled => "Disabled",
            PortProperty::Index => "Index",
            PortProperty::Name => "Name",
            PortProperty::NormalState => "NormalState",
            PortProperty::State => "State",
            PortProperty::Usage => "Usage",
        }
    }

    fn type_node(self) -> u32 {
        6007 + self as u32
    }

    fn data_type(self, ns: u16) -> NodeId {
        match self {
            PortProperty::Configurable | PortProperty::Disabled => ids::BOOLEAN,
            PortProperty::Index => ids::INT32,
            PortProperty::Name | PortProperty::Usage => ids::STRING,
            PortProperty::Direction => NodeId::numeric(ns, node_ids::IOPORT_DIRECTION_TYPE),
            PortProperty::NormalState | PortProperty::State => NodeId::numeric(ns, node_ids::IOPORT_STATE_TYPE),
        }
    }

    /// Access level declared on the object type
    fn type_access(self) -> u8 {
        match self {
            PortProperty::Configurable | PortProperty::Disabled | PortProperty::Index => access::READ,
            _ => access::READ_WRITE,
        }
    }

    /// Access level of this property on a particular port
    fn instance_access(self, port: &IoPort) -> u8 {
        if port.readonly {
            return access::READ;
        }
        match self {
            PortProperty::Direction if port.configurable => access::READ_WRITE,
            PortProperty::Direction => access::READ,
            PortProperty::State => port.direction.state_access(),
            other => other.type_access(),
        }
    }
}

/// Port cache shared by the value sources and the event callbacks
pub struct PortTable {
    transport: Arc<dyn VapixTransport>,
    engine: Arc<dyn AddressSpace>,
    ports: Mutex<BTreeMap<u32, IoPort>>,
    state_nodes: Mutex<HashMap<u32, NodeId>>,
}

impl PortTable {
    pub fn new(transport: Arc<dyn VapixTransport>, engine: Arc<dyn AddressSpace>, ports: BTreeMap<u32, IoPort>) -> Self {
        Self {
            transport,
            engine,
            ports: Mutex::new(ports),
            state_nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn port(&self, index: u32) -> Option<IoPort> {
        self.ports.lock().get(&index).cloned()
    }

    pub fn indices(&self) -> Vec<u32> {
        self.ports.lock().keys().copied().collect()
    }

    fn update<F: FnOnce(&mut IoPort)>(&self, index: u32, f: F) -> bool {
        match self.ports.lock().get_mut(&index) {
            Some(port) => {
                f(port);
                true
            }
            None => false,
        }
    }

    async fn push(&self, index: u32, key: &str, value: &str) -> std::result::Result<(), StatusCode> {
        set_port(self.transport.as_ref(), index, key, value).await.map_err(|e| {
            error!("Failed to set '{}' of port {}: {}", key, index, e);
            StatusCode::BadInternalError
        })
    }
}

#[async_trait]
impl PropertyAccessor for PortTable {
    type Key = PortProperty;

    async fn get(&self, instance: u32, key: PortProperty) -> std::result::Result<Variant, StatusCode> {
        let port = self.port(instance).ok_or_else(|| {
            error!("port {} not in cache", instance);
            StatusCode::BadInternalError
        })?;
        Ok(match key {
            PortProperty::Configurable => Variant::Boolean(port.configurable),
            PortProperty::Direction => Variant::Int32(port.direction as i32),
            PortProperty::Disabled => Variant::Boolean(port.readonly),
            PortProperty::Index => Variant::Int32(instance as i32),
            PortProperty::Name => Variant::String(port.name),
            PortProperty::NormalState => Variant::Int32(port.normal_state as i32),
            PortProperty::State => Variant::Int32(port.state as i32),
            PortProperty::Usage => Variant::String(port.usage),
        })
    }

    async fn set(&self, instance: u32, key: PortProperty, value: &Variant) -> std::result::Result<(), StatusCode> {
        match key {
            PortProperty::Name | PortProperty::Usage => {
                let text = value.as_str().ok_or(StatusCode::BadTypeMismatch)?.to_string();
                let vapix_key = if key == PortProperty::Name { "name" } else { "usage" };
                self.push(instance, vapix_key, &text).await?;
                self.update(instance, |port| {
                    if key == PortProperty::Name {
                        port.name = text;
                    } else {
                        port.usage = text;
                    }
                });
            }
            PortProperty::Direction => {
                let direction = PortDirection::from_variant(value)?;
                self.push(instance, "direction", direction.as_vapix()).await?;
                self.update(instance, |port| port.direction = direction);

                let state_node = self.state_nodes.lock().get(&instance).cloned();
                let state_node = state_node.ok_or(StatusCode::BadInternalError)?;
                self.engine
                    .write_access_level(&state_node, direction.state_access())
                    .map_err(|status| {
                        error!("Failed to set the access level for port-{} - 'State' node: {}", instance, status);
                        status
                    })?;
            }
            PortProperty::State | PortProperty::NormalState => {
                let state = PortState::from_variant(value)?;
                let vapix_key = if key == PortProperty::State { "state" } else { "normalState" };
                self.push(instance, vapix_key, state.as_vapix()).await?;
                self.update(instance, |port| {
                    if key == PortProperty::State {
                        port.state = state;
                    } else {
                        port.normal_state = state;
                    }
                });
            }
            PortProperty::Configurable | PortProperty::Disabled | PortProperty::Index => {
                return Err(StatusCode::BadNotWritable);
            }
        }
        Ok(())
    }
}

/// Port state changes: `tns1:topic0=Device`, `tnsaxis:topic1=IO`
pub fn state_event_filter() -> EventFilter {
    EventFilter::new()
        .with("topic0", Some(TNS1), Some("Device".into()))
        .with("topic1", Some(TNSAXIS), Some("IO".into()))
        .with("port", None, None)
        .with("state", None, None)
}

/// Port configuration changes published by the legacy I/O configuration service
pub fn config_event_filter() -> EventFilter {
    EventFilter::new()
        .with("topic0", Some(TNS1), Some("Device".into()))
        .with("topic1", Some(TNSAXIS), Some("Configuration".into()))
        .with("service", None, Some(CONFIG_SERVICE.into()))
}

fn on_state_event(table: &PortTable, root: &NodeId, ns: u16, event: &Event) -> Result<()> {
    let port = event.get_int("port")?;
    let active = event.get_bool("state")?;
    let topic2 = event.get_string("topic2")?;
    debug!("I/O port: {} (\"topic2:{}\"), active: {}", port, topic2, active);

    if !matches!(topic2, "Port" | "OutputPort") {
        return Ok(());
    }
    let index = match u32::try_from(port) {
        Ok(index) => index,
        Err(_) => {
            warn!("port: {} out of range, ignoring event", port);
            return Ok(());
        }
    };

    let mut state = None;
    table.update(index, |p| {
        p.state = new_state(active, p.normal_state);
        state = Some(p.state);
    });
    let state = match state {
        Some(state) => state,
        None => {
            warn!("port: {} not found, ignoring event", index);
            return Ok(());
        }
    };
    debug!("I/O port: {}, new state: {}", index, state.label());

    let label = port_label(index);
    let origin = table.engine.find_child(root, &ids::ORGANIZES, &label)?;
    let message = format!("New state: {}", state.label());
    emit_event(
        table.engine.as_ref(),
        &NodeId::numeric(ns, node_ids::IOP_STATE_EVENT_TYPE),
        &origin,
        EventFields {
            severity: STATE_EVENT_SEVERITY,
            message: &message,
            source_name: &label,
        },
    )?;
    Ok(())
}

/// Split `"Param=value"` into its two halves, dropping surrounding quotes
pub fn parse_configuration_change(raw: &str) -> Option<(String, String)> {
    let raw = raw.trim();
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(raw);
    let (param, value) = unquoted.split_once('=')?;
    Some((param.to_string(), value.to_string()))
}

/// Port index from an id such as `/com/axis/Configuration/Legacy/IOControl/IOPort/3`
pub fn port_from_config_id(id: &str) -> Option<u32> {
    let (_, index) = id.rsplit_once('/')?;
    index.trim().parse().ok()
}

fn on_config_event(table: &PortTable, event: &Event) -> Result<()> {
    let changes = event.get_string("configuration_changes")?;
    let id = event.get_string("id")?;
    let index = port_from_config_id(id)
        .ok_or_else(|| Error::invalid_argument(format!("no port index in '{}'", id)))?;
    let (param, value) = parse_configuration_change(changes)
        .ok_or_else(|| Error::invalid_argument(format!("unexpected configuration_changes '{}'", changes)))?;
    debug!("configuration_changes: {}, id: {} ==> port: {}, param: {}, val: {}", changes, id, index, param, value);

    let found = table.update(index, |port| match param.as_str() {
        "Name" => port.name = value.clone(),
        "Usage" => port.usage = value.clone(),
        "Direction" => port.direction = PortDirection::from_vapix(&value),
        // the device reports the trigger level, the inverse of the normal state
        "Trig" | "Active" => {
            port.normal_state = match PortState::from_vapix(&value) {
                PortState::Open => PortState::Closed,
                PortState::Closed => PortState::Open,
            }
        }
        _ => {}
    });
    if !found {
        warn!("port: {} not found, ignoring event", index);
    }
    Ok(())
}

fn add_enum_type(
    model: &mut ModelBuilder<'_>,
    type_id: u32,
    name: &str,
    strings_id: u32,
    fields: &[&str],
) -> Result<NodeId> {
    let spec = NodeSpec::new(model.id(type_id), ids::ENUMERATION, ids::HAS_SUBTYPE, model.name(name));
    let data_type = model.data_type(
        spec,
        DataTypeAttributes {
            display_name: LocalizedText::plain(name),
            ..Default::default()
        },
    )?;

    let spec = NodeSpec::new(
        model.id(strings_id),
        data_type.clone(),
        ids::HAS_PROPERTY,
        QualifiedName::new(0, ids::ENUM_STRINGS),
    )
    .with_type_definition(ids::PROPERTY_TYPE);
    model.variable(
        spec,
        VariableAttributes {
            display_name: LocalizedText::plain(ids::ENUM_STRINGS),
            value: Variant::LocalizedTextArray(fields.iter().map(|f| LocalizedText::plain(*f)).collect()),
            data_type: ids::LOCALIZED_TEXT,
            value_rank: 1,
            ..Default::default()
        },
    )?;
    Ok(data_type)
}

/// Custom types, object type, event types and the root object
fn add_types(model: &mut ModelBuilder<'_>) -> Result<NodeId> {
    let ns = model.namespace();
    let types = vec![
        CustomDataType::enumeration(
            model.id(node_ids::IOPORT_STATE_TYPE),
            "IOPortStateType",
            vec![EnumField::new(0, "Open"), EnumField::new(1, "Closed")],
        ),
        CustomDataType::enumeration(
            model.id(node_ids::IOPORT_DIRECTION_TYPE),
            "IOPortDirectionType",
            vec![EnumField::new(0, "Input"), EnumField::new(1, "Output")],
        ),
    ];
    model.swap_custom_types(types);

    add_enum_type(
        model,
        node_ids::IOPORT_STATE_TYPE,
        "IOPortStateType",
        node_ids::IOPORT_STATE_TYPE_ENUM_STRINGS,
        &["Open", "Closed"],
    )?;
    add_enum_type(
        model,
        node_ids::IOPORT_DIRECTION_TYPE,
        "IOPortDirectionType",
        node_ids::IOPORT_DIRECTION_TYPE_ENUM_STRINGS,
        &["Input", "Output"],
    )?;

    let spec = NodeSpec::new(
        model.id(node_ids::IOPORT_OBJ_TYPE),
        ids::BASE_OBJECT_TYPE,
        ids::HAS_SUBTYPE,
        model.name("IOPortObjType"),
    );
    let object_type = model.object_type(
        spec,
        ObjectTypeAttributes {
            display_name: LocalizedText::plain("IOPortObjType"),
            ..Default::default()
        },
    )?;

    for property in PortProperty::ALL {
        let spec = NodeSpec::new(
            model.id(property.type_node()),
            object_type.clone(),
            ids::HAS_PROPERTY,
            model.name(property.browse_name()),
        )
        .with_type_definition(ids::PROPERTY_TYPE);
        let node = model.variable(
            spec,
            VariableAttributes {
                display_name: LocalizedText::plain(property.browse_name()),
                data_type: property.data_type(ns),
                access_level: property.type_access(),
                ..Default::default()
            },
        )?;
        model.add_reference(&node, &ids::HAS_MODELLING_RULE, &ids::MODELLING_RULE_MANDATORY, true)?;
    }

    let spec = NodeSpec::new(
        model.id(node_ids::IOP_EVENT_TYPE),
        ids::BASE_EVENT_TYPE,
        ids::HAS_SUBTYPE,
        model.name("IOPEventType"),
    );
    let event_type = model.object_type(
        spec,
        ObjectTypeAttributes {
            display_name: LocalizedText::plain("IOPEventType"),
            is_abstract: true,
            ..Default::default()
        },
    )?;
    model.add_reference(&event_type, &ids::GENERATES_EVENT, &object_type, false)?;

    let subtypes = [
        (node_ids::IOP_DIRECTION_EVENT_TYPE, "IOPDirectionEventType"),
        (node_ids::IOP_NORMAL_STATE_EVENT_TYPE, "IOPNormalStateEventType"),
        (node_ids::IOP_STATE_EVENT_TYPE, "IOPStateEventType"),
    ];
    for (id, name) in subtypes {
        let spec = NodeSpec::new(model.id(id), event_type.clone(), ids::HAS_SUBTYPE, model.name(name));
        model.object_type(
            spec,
            ObjectTypeAttributes {
                display_name: LocalizedText::plain(name),
                ..Default::default()
            },
        )?;
    }

    let spec = NodeSpec::new(model.id(node_ids::IOPORTS), ids::OBJECTS_FOLDER, ids::ORGANIZES, model.name(ROOT_NAME))
        .with_type_definition(ids::BASE_OBJECT_TYPE);
    model.object(
        spec,
        ObjectAttributes {
            display_name: LocalizedText::plain(ROOT_NAME),
            description: LocalizedText::plain(ROOT_NAME),
            event_notifier: ids::EVENT_NOTIFIER_SUBSCRIBE,
        },
    )
}

fn add_port_object(
    model: &mut ModelBuilder<'_>,
    root: &NodeId,
    index: u32,
    port: &IoPort,
    binding: &Arc<PropertyBinding<PortTable>>,
) -> Result<()> {
    let label = port_label(index);
    let spec = NodeSpec::new(model.id(0), root.clone(), ids::ORGANIZES, model.name(&label))
        .with_type_definition(model.id(node_ids::IOPORT_OBJ_TYPE));
    let object = model.object(
        spec,
        ObjectAttributes {
            display_name: LocalizedText::plain(&label),
            description: LocalizedText::plain("I/O port"),
            event_notifier: ids::EVENT_NOTIFIER_SUBSCRIBE,
        },
    )?;

    let ns = model.namespace();
    for property in PortProperty::ALL {
        let node = model.sourced_property(
            &object,
            property.browse_name(),
            property.data_type(ns),
            property.instance_access(port),
            binding.clone(),
        )?;
        binding.bind(node.clone(), index, property);
        if property == PortProperty::State {
            binding.accessor().state_nodes.lock().insert(index, node);
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct IoPortsPlugin {
    table: Option<Arc<PortTable>>,
    events: Option<Arc<dyn EventService>>,
    subscriptions: Vec<SubscriptionId>,
}

impl IoPortsPlugin {
    pub fn table(&self) -> Option<&Arc<PortTable>> {
        self.table.as_ref()
    }
}

#[async_trait]
impl Plugin for IoPortsPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn construct(&mut self, ctx: &mut ConstructContext<'_>) -> Result<()> {
        let transport = ctx.services().vapix.connect(SERVICE_ACCOUNT).await?;
        check_api_version(transport.as_ref()).await?;

        let ns = ctx.add_namespace(NAMESPACE_URI);
        let engine = ctx.engine().clone();
        let events = ctx.services().events.clone();
        self.events = Some(events.clone());

        let mut model = ctx.model(ns);
        let root = add_types(&mut model)?;

        let ports = get_ports(transport.as_ref()).await?;
        let table = Arc::new(PortTable::new(transport, engine, ports.clone()));
        let binding = Arc::new(PropertyBinding::new(table.clone()));
        for (index, port) in &ports {
            add_port_object(&mut model, &root, *index, port, &binding)?;
        }
        self.table = Some(table.clone());

        let state_table = table.clone();
        let state_root = root.clone();
        let id = events.subscribe(
            state_event_filter(),
            Arc::new(move |_: SubscriptionId, event: Event| {
                if let Err(e) = on_state_event(&state_table, &state_root, ns, &event) {
                    error!("I/O port state event: {}", e);
                }
            }),
        )?;
        self.subscriptions.push(id);

        let id = events.subscribe(
            config_event_filter(),
            Arc::new(move |_: SubscriptionId, event: Event| {
                if let Err(e) = on_config_event(&table, &event) {
                    error!("I/O port configuration event: {}", e);
                }
            }),
        )?;
        self.subscriptions.push(id);
        Ok(())
    }

    async fn destroy(&mut self) {
        if let Some(events) = self.events.take() {
            for id in self.subscriptions.drain(..) {
                if let Err(e) = events.unsubscribe(id) {
                    error!("Failed to unsubscribe {}: {}", id, e);
                }
            }
        }
        self.table = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_inverts_for_active() {
        assert_eq!(new_state(true, PortState::Open), PortState::Closed);
        assert_eq!(new_state(true, PortState::Closed), PortState::Open);
        assert_eq!(new_state(false, PortState::Open), PortState::Open);
        assert_eq!(new_state(false, PortState::Closed), PortState::Closed);
    }

    #[test]
    fn test_parse_ports() {
        let data = json!({
            "numberOfPorts": 2,
            "items": [
                {"port": "0", "configurable": true, "usage": "Door", "name": "Port 1",
                 "direction": "input", "state": "open", "normalState": "closed"},
                {"port": "1", "configurable": false, "usage": "", "name": "Port 2",
                 "direction": "output", "state": "closed", "normalState": "open", "readonly": true}
            ]
        });
        let ports = parse_ports(data).unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[&0].direction, PortDirection::Input);
        assert_eq!(ports[&0].normal_state, PortState::Closed);
        assert!(!ports[&0].readonly);
        assert!(ports[&1].readonly);
        assert_eq!(ports[&1].state, PortState::Closed);
    }

    #[test]
    fn test_parse_ports_rejects_count_mismatch() {
        let data = json!({"numberOfPorts": 3, "items": []});
        let err = parse_ports(data).unwrap_err();
        assert!(err.to_string().contains("mismatches 'numberOfPorts': 3"));
    }

    #[test]
    fn test_configuration_change_parsing() {
        assert_eq!(
            parse_configuration_change("\"Name=Port 01\""),
            Some(("Name".to_string(), "Port 01".to_string()))
        );
        assert_eq!(parse_configuration_change("Trig=open"), Some(("Trig".to_string(), "open".to_string())));
        assert_eq!(parse_configuration_change("garbage"), None);
        assert_eq!(port_from_config_id("/com/axis/Configuration/Legacy/IOControl/IOPort/3"), Some(3));
        assert_eq!(port_from_config_id("no-index"), None);
    }

    #[test]
    fn test_instance_access_levels() {
        let mut port = IoPort {
            configurable: true,
            readonly: false,
            name: "p".to_string(),
            usage: String::new(),
            normal_state: PortState::Open,
            state: PortState::Open,
            direction: PortDirection::Input,
        };
        assert_eq!(PortProperty::Direction.instance_access(&port), access::READ_WRITE);
        assert_eq!(PortProperty::State.instance_access(&port), access::READ);
        assert_eq!(PortProperty::Name.instance_access(&port), access::READ_WRITE);

        port.direction = PortDirection::Output;
        assert_eq!(PortProperty::State.instance_access(&port), access::READ_WRITE);

        port.readonly = true;
        for property in PortProperty::ALL {
            assert_eq!(property.instance_access(&port), access::READ);
        }
    }
}
