//! Single read/write string variable under the Objects folder

use async_trait::async_trait;
use std::any::Any;

use ua_core::{ids, LocalizedText, NodeId, Result, Variant};
use ua_model::{access, NodeSpec, VariableAttributes};

use crate::plugin::{BoxedPlugin, ConstructContext, Plugin, PluginDescriptor};

pub const PLUGIN_NAME: &str = "opc-hello-world-plugin";
pub const NAMESPACE_URI: &str = "http://www.axis.com/OpcUA/HelloWorld/";
pub const NODE_NAME: &str = "HelloWorldNode";
const VALUE: &str = "Hello World!";

pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor::new(PLUGIN_NAME, create);

fn create() -> BoxedPlugin {
    Box::new(HelloWorldPlugin::default())
}

#[derive(Default)]
pub struct HelloWorldPlugin {
    namespace: Option<u16>,
}

impl HelloWorldPlugin {
    pub fn namespace(&self) -> Option<u16> {
        self.namespace
    }
}

#[async_trait]
impl Plugin for HelloWorldPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn construct(&mut self, ctx: &mut ConstructContext<'_>) -> Result<()> {
        let ns = ctx.add_namespace(NAMESPACE_URI);
        self.namespace = Some(ns);

        let mut model = ctx.model(ns);
        let spec = NodeSpec::new(NodeId::string(ns, NODE_NAME), ids::OBJECTS_FOLDER, ids::HAS_COMPONENT, model.name(NODE_NAME))
            .with_type_definition(ids::BASE_DATA_VARIABLE_TYPE);
        model.variable(
            spec,
            VariableAttributes {
                display_name: LocalizedText::new("en-US", NODE_NAME),
                description: LocalizedText::new("en-US", "Hello World Node"),
                value: Variant::from(VALUE),
                data_type: ids::STRING,
                access_level: access::READ_WRITE,
                ..Default::default()
            },
        )?;
        Ok(())
    }

    async fn destroy(&mut self) {
        self.namespace = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
