//! Thermal areas of a thermometric camera
//!
//! Area configuration is read once at construction. Temperatures and the
//! triggered flag are refreshed by a background poll task that writes straight
//! into the graph.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ua_core::{ids, Error, LocalizedText, NodeId, QualifiedName, Result, StatusCode, Variant};
use ua_model::{AddressSpace, Argument, MethodAttributes, MethodHandler, ModelBuilder, NodeSpec, ObjectAttributes};

use super::plugin_params;
use crate::plugin::{BoxedPlugin, ConstructContext, Plugin, PluginDescriptor};
use crate::vapix::{json_method, VapixError, VapixTransport};

pub const PLUGIN_NAME: &str = "opc-thermal-plugin";
pub const NAMESPACE_URI: &str = "http://www.axis.com/OpcUA/Thermal/";
pub const SERVICE_ACCOUNT: &str = "vapix-thermometry-user";
pub const ENDPOINT: &str = "thermometry.cgi";
pub const API_VERSION: &str = "1.2";
pub const OBJECT_NAME: &str = "ThermalAreas";
pub const SCALE_METHOD: &str = "Set Scale Method";

pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor::new(PLUGIN_NAME, create);

fn create() -> BoxedPlugin {
    Box::new(ThermalPlugin::default())
}

/// Plugin parameters (`[plugins.opc-thermal-plugin]`)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThermalParams {
    pub poll_interval_ms: u64,
    /// Consecutive failed polls before the task gives up
    pub max_retries: u32,
}

impl Default for ThermalParams {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_retries: 10,
        }
    }
}

/// Static configuration of one area from `listAreas`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThermalArea {
    pub id: u32,
    pub enabled: bool,
    pub name: String,
    pub detection_type: String,
    pub measurement: String,
    pub threshold: i32,
    pub preset_nbr: i32,
}

/// Live readings of one area from `getAreaStatus`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AreaStatus {
    pub id: u32,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub triggered: bool,
}

#[derive(Debug, Deserialize)]
struct AreaList<T> {
    arealist: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SupportedVersions {
    #[serde(rename = "apiVersions")]
    api_versions: Vec<String>,
}

fn split_version(version: &str) -> Option<(u32, u32)> {
    let (major, minor) = version.split_once('.')?;
    Some((major.trim().parse().ok()?, minor.trim().parse().ok()?))
}

/// True if a device offering `offered` can serve requests written against
/// `required`: same major version, equal or newer minor
pub fn version_compatible(required: &str, offered: &str) -> std::result::Result<bool, VapixError> {
    let (req_major, req_minor) =
        split_version(required).ok_or_else(|| VapixError::malformed("Invalid api version format"))?;
    let (major, minor) = split_version(offered).ok_or_else(|| VapixError::malformed("Invalid api version format"))?;
    Ok(req_major == major && req_minor <= minor)
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
    for offered in &versions.api_versions {
        if version_compatible(API_VERSION, offered)? {
            debug!("thermometry api {} accepted for {}", offered, API_VERSION);
            return Ok(());
        }
    }
    Err(VapixError::malformed(format!(
        "Api version - {} is not supported on this device.",
        API_VERSION
    )))
}

pub fn parse_areas(data: Value) -> std::result::Result<Vec<ThermalArea>, VapixError> {
    let list: AreaList<ThermalArea> = serde_json::from_value(data)?;
    Ok(list.arealist)
}

pub fn parse_area_status(data: Value) -> std::result::Result<Vec<AreaStatus>, VapixError> {
    let list: AreaList<AreaStatus> = serde_json::from_value(data)?;
    Ok(list.arealist)
}

pub async fn list_areas(transport: &dyn VapixTransport) -> std::result::Result<Vec<ThermalArea>, VapixError> {
    let body = json!({"apiVersion": API_VERSION, "method": "listAreas", "params": {"presetNbr": 0}});
    parse_areas(json_method(transport, ENDPOINT, "listAreas", &body).await?)
}

pub async fn get_area_status(transport: &dyn VapixTransport) -> std::result::Result<Vec<AreaStatus>, VapixError> {
    let body = json!({"apiVersion": API_VERSION, "method": "getAreaStatus", "params": {}});
    parse_area_status(json_method(transport, ENDPOINT, "getAreaStatus", &body).await?)
}

pub async fn set_temperature_scale(transport: &dyn VapixTransport, unit: &str) -> std::result::Result<(), VapixError> {
    let body = json!({"apiVersion": API_VERSION, "method": "setTemperatureScale", "params": {"unit": unit}});
    json_method(transport, ENDPOINT, "setTemperatureScale", &body).await?;
    Ok(())
}

/// Properties of every `Thermal<id>` object, in creation order
const AREA_PROPERTIES: [(&str, NodeId); 11] = [
    ("Id", ids::UINT32),
    ("PresetNumber", ids::INT32),
    ("TempAvg", ids::INT32),
    ("TempMax", ids::INT32),
    ("TempMin", ids::INT32),
    ("ThresholdValue", ids::INT32),
    ("Triggered", ids::BOOLEAN),
    ("Enabled", ids::BOOLEAN),
    ("Name", ids::STRING),
    ("DetectionType", ids::STRING),
    ("ThresholdMeasurement", ids::STRING),
];

pub fn area_node(ns: u16, id: u32) -> NodeId {
    NodeId::string(ns, format!("Thermal{}", id))
}

fn initial_value(area: &ThermalArea, property: &str) -> Variant {
    match property {
        "Id" => Variant::UInt32(area.id),
        "PresetNumber" => Variant::Int32(area.preset_nbr),
        "ThresholdValue" => Variant::Int32(area.threshold),
        "Enabled" => Variant::Boolean(area.enabled),
        "Name" => Variant::from(area.name.as_str()),
        "DetectionType" => Variant::from(area.detection_type.as_str()),
        "ThresholdMeasurement" => Variant::from(area.measurement.as_str()),
        // readings arrive with the first poll
        _ => Variant::Empty,
    }
}

fn add_area(model: &mut ModelBuilder<'_>, parent: &NodeId, area: &ThermalArea) -> Result<NodeId> {
    let ns = model.namespace();
    let title = format!("Thermal{}", area.id);
    let spec = NodeSpec::new(area_node(ns, area.id), parent.clone(), ids::ORGANIZES, model.name(&title))
        .with_type_definition(ids::BASE_OBJECT_TYPE);
    let object = model.object(
        spec,
        ObjectAttributes {
            display_name: LocalizedText::new("en-US", &area.name),
            description: LocalizedText::new("en-US", "Thermal Area"),
            ..Default::default()
        },
    )?;

    for (name, data_type) in AREA_PROPERTIES {
        model.static_property(&object, name, data_type, initial_value(area, name))?;
    }
    Ok(object)
}

/// Write one status reading into its area object
pub fn apply_status(engine: &dyn AddressSpace, ns: u16, status: &AreaStatus) -> std::result::Result<(), StatusCode> {
    let area = area_node(ns, status.id);
    let values = [
        ("TempMin", Variant::Int32(status.min as i32)),
        ("TempAvg", Variant::Int32(status.avg as i32)),
        ("TempMax", Variant::Int32(status.max as i32)),
        ("Triggered", Variant::Boolean(status.triggered)),
    ];
    for (name, value) in values {
        engine.write_object_property(&area, &QualifiedName::new(ns, name), value)?;
    }
    Ok(())
}

fn spawn_poller(
    transport: Arc<dyn VapixTransport>,
    engine: Arc<dyn AddressSpace>,
    ns: u16,
    params: ThermalParams,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_millis(params.poll_interval_ms);
        let mut failures = 0u32;
        loop {
            tokio::time::sleep(interval).await;

            let readings = match get_area_status(transport.as_ref()).await {
                Ok(readings) => readings,
                Err(e) => {
                    error!("getAreaStatus failed: {}", e);
                    failures += 1;
                    if failures >= params.max_retries {
                        warn!("Stopped polling thermal areas after {} failures", failures);
                        return;
                    }
                    continue;
                }
            };

            for status in &readings {
                if let Err(code) = apply_status(engine.as_ref(), ns, status) {
                    error!("Failed to update Thermal{}: {}", status.id, code);
                    return;
                }
            }
            failures = 0;
        }
    })
}

/// Handler of the "Set Scale" method
pub struct SetScale {
    transport: Arc<dyn VapixTransport>,
}

impl SetScale {
    pub fn new(transport: Arc<dyn VapixTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl MethodHandler for SetScale {
    async fn call(&self, _object: &NodeId, input: &[Variant]) -> std::result::Result<Vec<Variant>, StatusCode> {
        let scale = input
            .first()
            .and_then(Variant::as_str)
            .ok_or(StatusCode::BadInvalidArgument)?
            .to_ascii_lowercase();
        if scale != "celsius" && scale != "fahrenheit" {
            error!("Scale: {} is not supported", scale);
            return Err(StatusCode::BadInvalidArgument);
        }

        set_temperature_scale(self.transport.as_ref(), &scale).await.map_err(|e| {
            error!("setTemperatureScale failed: {}", e);
            StatusCode::BadCommunicationError
        })?;
        info!("Temperature scale set to {}", scale);
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct ThermalPlugin {
    areas: Vec<u32>,
    poller: Option<JoinHandle<()>>,
}

impl ThermalPlugin {
    /// Ids of the areas found at construction
    pub fn areas(&self) -> &[u32] {
        &self.areas
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().map(|task| !task.is_finished()).unwrap_or(false)
    }
}

#[async_trait]
impl Plugin for ThermalPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn construct(&mut self, ctx: &mut ConstructContext<'_>) -> Result<()> {
        let params: ThermalParams = plugin_params(ctx.params())?;
        let transport = ctx.services().vapix.connect(SERVICE_ACCOUNT).await?;
        check_api_version(transport.as_ref())
            .await
            .map_err(|e| Error::data_source(format!("No supported versions available for 'thermometry': {}", e)))?;

        let ns = ctx.add_namespace(NAMESPACE_URI);
        let engine = ctx.engine().clone();
        let mut model = ctx.model(ns);

        let spec = NodeSpec::new(model.id(0), ids::OBJECTS_FOLDER, ids::ORGANIZES, model.name(OBJECT_NAME))
            .with_type_definition(ids::BASE_OBJECT_TYPE);
        let parent = model.object(
            spec,
            ObjectAttributes {
                display_name: LocalizedText::new("en-US", "Thermal Areas"),
                description: LocalizedText::new("en-US", "Thermal Areas"),
                ..Default::default()
            },
        )?;

        let spec = NodeSpec::new(model.id(0), parent.clone(), ids::HAS_COMPONENT, model.name(SCALE_METHOD));
        model.method(
            spec,
            MethodAttributes {
                display_name: LocalizedText::new("en-US", "Set Scale"),
                description: LocalizedText::new("en-US", "Change Temperature Scale"),
                executable: true,
                input_arguments: vec![Argument::new(
                    "Scale",
                    ids::STRING,
                    "Temperature Scale: Celsius or Fahrenheit",
                )],
                output_arguments: Vec::new(),
                handler: Some(Arc::new(SetScale::new(transport.clone()))),
            },
        )?;

        let areas = list_areas(transport.as_ref())
            .await
            .map_err(|e| Error::data_source(format!("Failed to list thermal areas: {}", e)))?;
        for area in &areas {
            add_area(&mut model, &parent, area)?;
        }
        self.areas = areas.iter().map(|area| area.id).collect();

        self.poller = Some(spawn_poller(transport, engine, ns, params));
        Ok(())
    }

    async fn destroy(&mut self) {
        if let Some(task) = self.poller.take() {
            task.abort();
        }
        self.areas.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        assert!(version_compatible("1.2", "1.2").unwrap());
        assert!(version_compatible("1.2", "1.5").unwrap());
        assert!(!version_compatible("1.2", "1.1").unwrap());
        assert!(!version_compatible("1.2", "2.3").unwrap());
        assert!(version_compatible("1.2", "12").is_err());
    }

    #[test]
    fn test_parse_areas() {
        let data = json!({"arealist": [{
            "id": 2, "enabled": true, "name": "Hot spot", "detectionType": "above",
            "measurement": "maximum", "threshold": 80, "presetNbr": 0
        }]});
        let areas = parse_areas(data).unwrap();
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].id, 2);
        assert_eq!(areas[0].detection_type, "above");
        assert_eq!(areas[0].threshold, 80);

        assert!(parse_areas(json!({"areas": []})).is_err());
    }

    #[test]
    fn test_parse_area_status() {
        let data = json!({"arealist": [{"id": 2, "avg": 21.5, "min": 19.0, "max": 30.25, "triggered": false}]});
        let status = parse_area_status(data).unwrap();
        assert_eq!(status[0].max, 30.25);
        assert!(!status[0].triggered);
    }

    #[test]
    fn test_params_defaults() {
        let params: ThermalParams = plugin_params(&Value::Null).unwrap();
        assert_eq!(params.poll_interval_ms, 1000);
        assert_eq!(params.max_retries, 10);

        let params: ThermalParams = plugin_params(&json!({"poll_interval_ms": 50})).unwrap();
        assert_eq!(params.poll_interval_ms, 50);
        assert_eq!(params.max_retries, 10);
    }
}
