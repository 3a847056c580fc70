//! Basic device information as read-only string properties

use async_trait::async_trait;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::BTreeMap;
use tracing::debug;

use ua_core::{ids, Error, LocalizedText, Result, Variant};
use ua_model::{NodeSpec, ObjectAttributes};

use crate::plugin::{BoxedPlugin, ConstructContext, Plugin, PluginDescriptor};
use crate::vapix::{json_method, VapixError, VapixTransport};

pub const PLUGIN_NAME: &str = "opc-bdi-plugin";
pub const NAMESPACE_URI: &str = "http://www.axis.com/OpcUA/BasicDeviceInformation/";
pub const SERVICE_ACCOUNT: &str = "vapix-basicdeviceinfo-user";
pub const ENDPOINT: &str = "basicdeviceinfo.cgi";
pub const OBJECT_NAME: &str = "BasicDeviceInfo";

pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor::new(PLUGIN_NAME, create);

fn create() -> BoxedPlugin {
    Box::new(BdiPlugin::default())
}

/// Fetch every basic device property, ordered by key
pub async fn fetch_properties(transport: &dyn VapixTransport) -> std::result::Result<BTreeMap<String, String>, VapixError> {
    let request = json!({"apiVersion": "1.3", "method": "getAllProperties"});
    let data = json_method(transport, ENDPOINT, "getAllProperties", &request).await?;

    let list = data
        .get("propertyList")
        .and_then(Value::as_object)
        .ok_or_else(|| VapixError::malformed("No property called 'propertyList' in response"))?;

    let mut properties = BTreeMap::new();
    for (key, value) in list {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        debug!("got key: {}, value: {}", key, text);
        properties.insert(key.clone(), text);
    }
    Ok(properties)
}

#[derive(Default)]
pub struct BdiPlugin {
    properties: BTreeMap<String, String>,
}

impl BdiPlugin {
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

#[async_trait]
impl Plugin for BdiPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn construct(&mut self, ctx: &mut ConstructContext<'_>) -> Result<()> {
        let ns = ctx.add_namespace(NAMESPACE_URI);
        let transport = ctx.services().vapix.connect(SERVICE_ACCOUNT).await?;

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

        let properties = fetch_properties(transport.as_ref())
            .await
            .map_err(|e| Error::data_source(format!("Failed to get the basic device information: {}", e)))?;
        debug!("BasicDeviceInfo entries: {}", properties.len());

        for (key, value) in &properties {
            model.static_property(&object, key, ids::STRING, Variant::from(value.as_str()))?;
        }

        self.properties = properties;
        Ok(())
    }

    async fn destroy(&mut self) {
        self.properties.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
