//! Addressable delivery targets. Remote endpoints are bare descriptors
//! learned from digests; local endpoints carry the embedder's package
//! handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ids::{EpId, NodeId, PackageType, UNSET_ID};
use crate::package::Package;

/// Model entry for an endpoint on some node.
#[derive(Debug, Clone)]
pub struct Endpoint {
    id: EpId,
    name: String,
    node: NodeId,
}

impl Endpoint {
    pub(crate) fn remote(id: EpId, name: impl Into<String>, node: NodeId) -> Self {
        Self { id, name: name.into(), node }
    }

    pub fn id(&self) -> EpId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn set_node(&mut self, node: NodeId) {
        self.node = node;
    }
}

pub type PackageHandler = Box<dyn FnMut(&Package<'_>) + Send>;

/// A locally hosted endpoint. The embedder creates one, registers handlers
/// keyed by package type, and hands a shared handle to the node. Packages
/// addressed here are dispatched to the matching handler; types without a
/// handler are dropped with a log line.
pub struct LocalEndpoint {
    endpoint: Endpoint,
    handlers: HashMap<PackageType, PackageHandler>,
}

impl LocalEndpoint {
    pub fn new(id: EpId, name: impl Into<String>) -> Self {
        Self { endpoint: Endpoint { id, name: name.into(), node: UNSET_ID }, handlers: HashMap::new() }
    }

    /// Wrap into the shared handle form the node registers.
    pub fn into_shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> EpId {
        self.endpoint.id
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    pub fn node(&self) -> NodeId {
        self.endpoint.node
    }

    pub(crate) fn set_node(&mut self, node: NodeId) {
        self.endpoint.set_node(node);
    }

    pub fn add_package_handler(
        &mut self,
        for_type: PackageType,
        handler: impl FnMut(&Package<'_>) + Send + 'static,
    ) {
        self.handlers.insert(for_type, Box::new(handler));
    }

    pub fn remove_package_handler(&mut self, for_type: PackageType) -> bool {
        self.handlers.remove(&for_type).is_some()
    }

    pub(crate) fn handle_package(&mut self, package: &Package<'_>) -> bool {
        match self.handlers.get_mut(&package.package_type()) {
            Some(handler) => {
                handler(package);
                true
            }
            None => {
                log::debug!(
                    "endpoint {}: no handler for package type {}",
                    self.endpoint.id,
                    package.package_type()
                );
                false
            }
        }
    }
}
