//! Mirrors the live-stream-accessed system event into the information model

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use ua_core::{ids, LocalizedText, NodeId, QualifiedName, Result, Variant};
use ua_model::{AddressSpace, NodeSpec, ObjectAttributes};

use super::{emit_event, EventFields};
use crate::events::{Event, EventFilter, EventService, SubscriptionId, TNS1, TNSAXIS};
use crate::plugin::{BoxedPlugin, ConstructContext, Plugin, PluginDescriptor};

pub const PLUGIN_NAME: &str = "opc-simple-event-plugin";
pub const NAMESPACE_URI: &str = "http://www.axis.com/OpcUA/SimpleEvent/";
pub const OBJECT_NAME: &str = "LiveStreamAccessed";
pub const ACCESSED_PROPERTY: &str = "Accessed";
const SEVERITY: u16 = 500;

pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor::new(PLUGIN_NAME, create);

fn create() -> BoxedPlugin {
    Box::new(SimpleEventPlugin::default())
}

#[derive(Default)]
pub struct SimpleEventPlugin {
    events: Option<Arc<dyn EventService>>,
    subscription: Option<SubscriptionId>,
    object: Option<NodeId>,
}

impl SimpleEventPlugin {
    pub fn object(&self) -> Option<&NodeId> {
        self.object.as_ref()
    }
}

/// Event filter for `tns1:topic0=VideoSource`, `tnsaxis:topic1=LiveStreamAccessed`
pub fn live_stream_filter() -> EventFilter {
    EventFilter::new()
        .with("topic0", Some(TNS1), Some("VideoSource".into()))
        .with("topic1", Some(TNSAXIS), Some(OBJECT_NAME.into()))
}

fn on_event(engine: &dyn AddressSpace, object: &NodeId, ns: u16, event: Event) {
    let topic = match event.get_string("topic1") {
        Ok(topic) => topic.to_string(),
        Err(e) => {
            error!("Event without topic1: {}", e);
            return;
        }
    };
    let accessed = match event.get_bool("accessed") {
        Ok(accessed) => accessed,
        Err(e) => {
            error!("Event without accessed flag: {}", e);
            return;
        }
    };
    debug!("{}: Accessed={}", topic, accessed);

    if accessed {
        let fields = EventFields {
            severity: SEVERITY,
            message: &topic,
            source_name: OBJECT_NAME,
        };
        match emit_event(engine, &ids::BASE_EVENT_TYPE, object, fields) {
            Ok(()) => info!("Event: {} created successfully", topic),
            Err(status) => {
                error!("Event failure: {}", status);
                return;
            }
        }
    }

    if let Err(status) =
        engine.write_object_property(object, &QualifiedName::new(ns, ACCESSED_PROPERTY), Variant::Boolean(accessed))
    {
        error!("Failed to write {}: {}", ACCESSED_PROPERTY, status);
    }
}

#[async_trait]
impl Plugin for SimpleEventPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn construct(&mut self, ctx: &mut ConstructContext<'_>) -> Result<()> {
        let ns = ctx.add_namespace(NAMESPACE_URI);
        let engine = ctx.engine().clone();
        let events = ctx.services().events.clone();

        let mut model = ctx.model(ns);
        let spec = NodeSpec::new(model.id(0), ids::OBJECTS_FOLDER, ids::ORGANIZES, model.name(OBJECT_NAME))
            .with_type_definition(ids::BASE_OBJECT_TYPE);
        let object = model.object(
            spec,
            ObjectAttributes {
                display_name: LocalizedText::new("en-US", OBJECT_NAME),
                description: LocalizedText::new("en-US", "Livestream Accessed Object"),
                event_notifier: ids::EVENT_NOTIFIER_SUBSCRIBE,
            },
        )?;
        model.static_property(&object, ACCESSED_PROPERTY, ids::BOOLEAN, Variant::Boolean(false))?;
        self.object = Some(object.clone());

        let callback_object = object.clone();
        let subscription = events.subscribe(
            live_stream_filter(),
            Arc::new(move |_: SubscriptionId, event: Event| {
                on_event(engine.as_ref(), &callback_object, ns, event);
            }),
        )?;
        self.subscription = Some(subscription);
        self.events = Some(events);
        Ok(())
    }

    async fn destroy(&mut self) {
        if let (Some(events), Some(id)) = (self.events.as_ref(), self.subscription.take()) {
            if let Err(e) = events.unsubscribe(id) {
                warn!("Failed to unsubscribe {}: {}", id, e);
            }
        }
        self.events = None;
        self.object = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
