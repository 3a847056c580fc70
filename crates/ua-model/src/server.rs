//! Request dispatcher
//!
//! Runs on the dedicated `opc_ua_server_thread` and serves Read, Write, Call
//! and Browse requests against the graph store. Starting it marks the store as
//! serving, after which rollback is refused.

use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use ua_core::{ids, Error, NodeClass, NodeId, QualifiedName, Result, StatusCode, Variant};

use crate::node::access;
use crate::space::AddressSpace;

const SERVER_THREAD_NAME: &str = "opc_ua_server_thread";
const REQUEST_QUEUE: usize = 64;

/// One hierarchical child as returned by Browse
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseEntry {
    pub node_id: NodeId,
    pub browse_name: QualifiedName,
    pub node_class: NodeClass,
}

#[derive(Debug)]
pub enum Request {
    Read {
        node: NodeId,
    },
    Write {
        node: NodeId,
        value: Variant,
    },
    Call {
        object: NodeId,
        method: NodeId,
        input: Vec<Variant>,
    },
    Browse {
        node: NodeId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Value(Variant),
    Written,
    Output(Vec<Variant>),
    Children(Vec<BrowseEntry>),
}

/// Message sent to the dispatch thread
struct DispatchMessage {
    request: Request,
    respond_to: oneshot::Sender<std::result::Result<Response, StatusCode>>,
}

/// Handle to the running dispatcher
#[derive(Clone)]
pub struct ServerHandle {
    sender: mpsc::Sender<DispatchMessage>,
}

impl ServerHandle {
    /// Send a request and wait for its response
    pub async fn request(&self, request: Request) -> std::result::Result<Response, StatusCode> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatchMessage { request, respond_to: tx })
            .await
            .map_err(|_| StatusCode::BadShutdown)?;

        rx.await.map_err(|_| StatusCode::BadShutdown)?
    }

    // === Convenience methods ===

    pub async fn read(&self, node: &NodeId) -> std::result::Result<Variant, StatusCode> {
        match self.request(Request::Read { node: node.clone() }).await? {
            Response::Value(value) => Ok(value),
            _ => Err(StatusCode::BadInternalError),
        }
    }

    pub async fn write(&self, node: &NodeId, value: Variant) -> std::result::Result<(), StatusCode> {
        match self.request(Request::Write { node: node.clone(), value }).await? {
            Response::Written => Ok(()),
            _ => Err(StatusCode::BadInternalError),
        }
    }

    pub async fn call(
        &self,
        object: &NodeId,
        method: &NodeId,
        input: Vec<Variant>,
    ) -> std::result::Result<Vec<Variant>, StatusCode> {
        match self
            .request(Request::Call { object: object.clone(), method: method.clone(), input })
            .await?
        {
            Response::Output(output) => Ok(output),
            _ => Err(StatusCode::BadInternalError),
        }
    }

    pub async fn browse(&self, node: &NodeId) -> std::result::Result<Vec<BrowseEntry>, StatusCode> {
        match self.request(Request::Browse { node: node.clone() }).await? {
            Response::Children(children) => Ok(children),
            _ => Err(StatusCode::BadInternalError),
        }
    }
}

/// The running dispatcher and its thread
pub struct Server {
    handle: ServerHandle,
    thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Start the dispatch thread and mark `space` as serving
    ///
    /// Must be called from within a tokio runtime; data-source and method
    /// callbacks are driven on that runtime.
    pub fn start(space: Arc<dyn AddressSpace>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::internal(format!("no tokio runtime for the dispatcher: {}", e)))?;
        let (sender, receiver) = mpsc::channel(REQUEST_QUEUE);

        let dispatcher = Dispatcher { space: space.clone() };
        let thread = std::thread::Builder::new()
            .name(SERVER_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(dispatcher.run(receiver)))?;

        // No request can arrive before the handle is returned
        space.set_serving(true);

        info!("Dispatcher started on {}", SERVER_THREAD_NAME);
        Ok(Self {
            handle: ServerHandle { sender },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Stop accepting requests and wait for the dispatch thread
    ///
    /// Clones of the handle keep the thread alive; drop them first.
    pub async fn shutdown(mut self) -> Result<()> {
        let thread = self.thread.take();
        drop(self);

        if let Some(thread) = thread {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| Error::internal(format!("join task failed: {}", e)))?
                .map_err(|_| Error::internal("dispatch thread panicked"))?;
        }
        info!("Dispatcher stopped");
        Ok(())
    }
}

struct Dispatcher {
    space: Arc<dyn AddressSpace>,
}

impl Dispatcher {
    async fn run(self, mut receiver: mpsc::Receiver<DispatchMessage>) {
        while let Some(message) = receiver.recv().await {
            let result = self.handle(message.request).await;
            if message.respond_to.send(result).is_err() {
                debug!("Requester went away before the response");
            }
        }
    }

    async fn handle(&self, request: Request) -> std::result::Result<Response, StatusCode> {
        match request {
            Request::Read { node } => self.read(&node).await.map(Response::Value),
            Request::Write { node, value } => self.write(&node, value).await.map(|_| Response::Written),
            Request::Call { object, method, input } => self.call(&object, &method, input).await.map(Response::Output),
            Request::Browse { node } => self.browse(&node).map(Response::Children),
        }
    }

    async fn read(&self, node: &NodeId) -> std::result::Result<Variant, StatusCode> {
        if self.space.access_level(node)? & access::READ == 0 {
            return Err(StatusCode::BadNotReadable);
        }
        match self.space.value_source(node)? {
            Some(source) => source.read(node).await,
            None => self.space.read_value(node),
        }
    }

    async fn write(&self, node: &NodeId, value: Variant) -> std::result::Result<(), StatusCode> {
        if self.space.access_level(node)? & access::WRITE == 0 {
            return Err(StatusCode::BadNotWritable);
        }
        match self.space.value_source(node)? {
            Some(source) => source.write(node, &value).await,
            None => self.space.write_value(node, value),
        }
    }

    async fn call(
        &self,
        object: &NodeId,
        method: &NodeId,
        input: Vec<Variant>,
    ) -> std::result::Result<Vec<Variant>, StatusCode> {
        if !self.space.children(object)?.contains(method) {
            return Err(StatusCode::BadMethodInvalid);
        }
        let attributes = self.space.method(method)?;
        let handler = match (&attributes.handler, attributes.executable) {
            (Some(handler), true) => handler.clone(),
            _ => return Err(StatusCode::BadMethodInvalid),
        };

        let declared = &attributes.input_arguments;
        if input.len() < declared.len() {
            return Err(StatusCode::BadArgumentsMissing);
        }
        if input.len() > declared.len() {
            return Err(StatusCode::BadTooManyArguments);
        }
        for (argument, value) in declared.iter().zip(&input) {
            if !argument_matches(&argument.data_type, value) {
                warn!("Argument {} of {} has type {}", argument.name, method, value.type_name());
                return Err(StatusCode::BadTypeMismatch);
            }
        }

        handler.call(object, &input).await
    }

    fn browse(&self, node: &NodeId) -> std::result::Result<Vec<BrowseEntry>, StatusCode> {
        self.space
            .children(node)?
            .into_iter()
            .map(|child| {
                Ok(BrowseEntry {
                    browse_name: self.space.browse_name(&child)?,
                    node_class: self.space.node_class(&child)?,
                    node_id: child,
                })
            })
            .collect()
    }
}

fn argument_matches(data_type: &NodeId, value: &Variant) -> bool {
    if *data_type == ids::BASE_DATA_TYPE {
        return true;
    }
    let expected = match value {
        Variant::Boolean(_) => ids::BOOLEAN,
        Variant::UInt16(_) => ids::UINT16,
        Variant::Int32(_) => ids::INT32,
        Variant::UInt32(_) => ids::UINT32,
        Variant::Double(_) => ids::DOUBLE,
        Variant::String(_) => ids::STRING,
        Variant::DateTime(_) => ids::DATE_TIME,
        Variant::LocalizedText(_) | Variant::LocalizedTextArray(_) => ids::LOCALIZED_TEXT,
        Variant::Empty => return false,
    };
    *data_type == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAddressSpace;
    use crate::node::{Argument, MethodAttributes, MethodHandler, NewNode, NodeAttributes, NodeSpec, VariableAttributes};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl MethodHandler for Echo {
        async fn call(&self, _object: &NodeId, input: &[Variant]) -> std::result::Result<Vec<Variant>, StatusCode> {
            Ok(input.to_vec())
        }
    }

    fn populate(space: &MemoryAddressSpace) -> (NodeId, NodeId, NodeId) {
        let ns = space.add_namespace("urn:server");
        let ro = space
            .create_node(NewNode {
                spec: NodeSpec::new(NodeId::numeric(ns, 1), ids::OBJECTS_FOLDER, ids::HAS_COMPONENT, QualifiedName::new(ns, "RO")),
                attributes: NodeAttributes::Variable(VariableAttributes {
                    value: Variant::from("fixed"),
                    data_type: ids::STRING,
                    ..Default::default()
                }),
            })
            .unwrap();
        let rw = space
            .create_node(NewNode {
                spec: NodeSpec::new(NodeId::numeric(ns, 2), ids::OBJECTS_FOLDER, ids::HAS_COMPONENT, QualifiedName::new(ns, "RW")),
                attributes: NodeAttributes::Variable(VariableAttributes {
                    value: Variant::Int32(1),
                    data_type: ids::INT32,
                    access_level: access::READ_WRITE,
                    ..Default::default()
                }),
            })
            .unwrap();
        let method = space
            .create_node(NewNode {
                spec: NodeSpec::new(NodeId::numeric(ns, 3), ids::OBJECTS_FOLDER, ids::HAS_COMPONENT, QualifiedName::new(ns, "Echo")),
                attributes: NodeAttributes::Method(MethodAttributes {
                    executable: true,
                    input_arguments: vec![Argument::new("value", ids::UINT32, "any number")],
                    handler: Some(Arc::new(Echo)),
                    ..Default::default()
                }),
            })
            .unwrap();
        (ro, rw, method)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispatch_enforces_access_and_arguments() {
        let space = Arc::new(MemoryAddressSpace::new());
        let (ro, rw, method) = populate(&space);

        let server = Server::start(space.clone()).unwrap();
        assert!(space.is_serving());
        let handle = server.handle();

        assert_eq!(handle.read(&ro).await, Ok(Variant::from("fixed")));
        assert_eq!(handle.write(&ro, Variant::from("x")).await, Err(StatusCode::BadNotWritable));
        assert_eq!(handle.write(&rw, Variant::Int32(5)).await, Ok(()));
        assert_eq!(handle.read(&rw).await, Ok(Variant::Int32(5)));

        assert_eq!(
            handle.call(&ids::OBJECTS_FOLDER, &method, vec![Variant::UInt32(7)]).await,
            Ok(vec![Variant::UInt32(7)])
        );
        assert_eq!(
            handle.call(&ids::OBJECTS_FOLDER, &method, vec![]).await,
            Err(StatusCode::BadArgumentsMissing)
        );
        assert_eq!(
            handle.call(&ids::OBJECTS_FOLDER, &method, vec![Variant::UInt32(1), Variant::UInt32(2)]).await,
            Err(StatusCode::BadTooManyArguments)
        );
        assert_eq!(
            handle.call(&ids::OBJECTS_FOLDER, &method, vec![Variant::from("one")]).await,
            Err(StatusCode::BadTypeMismatch)
        );

        let children = handle.browse(&ids::OBJECTS_FOLDER).await.unwrap();
        assert!(children.iter().any(|c| c.node_id == method && c.node_class == NodeClass::Method));

        drop(handle);
        server.shutdown().await.unwrap();
    }

    #[test]
    fn test_failed_start_leaves_store_idle() {
        let space = Arc::new(MemoryAddressSpace::new());
        assert!(Server::start(space.clone()).is_err());
        assert!(!space.is_serving());
    }
}
