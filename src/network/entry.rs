//! Ownership wrapper around model entities.
//!
//! An `Adopted` entry is owned by the network model and dropped with it;
//! remote nodes, endpoints and routes learned from peers live this way. A
//! `Bound` entry shares a handle with the embedder, who created the object
//! and keeps using it (registering endpoint handlers, closing a route's
//! connection from outside). The same underlying entity must never be held
//! both ways.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::endpoint::{Endpoint, LocalEndpoint};
use crate::ids::{EpId, NodeId, TrId};
use crate::route::{LocalTransportRoute, TransportRoute};

pub enum Managed<T, L> {
    Adopted(T),
    Bound(Arc<Mutex<L>>),
}

impl<T, L> Managed<T, L> {
    pub fn is_local(&self) -> bool {
        matches!(self, Managed::Bound(_))
    }

    /// Clone the shared handle of a bound entry.
    pub fn bound_handle(&self) -> Option<Arc<Mutex<L>>> {
        match self {
            Managed::Adopted(_) => None,
            Managed::Bound(handle) => Some(handle.clone()),
        }
    }

    fn lock_bound(handle: &Arc<Mutex<L>>) -> MutexGuard<'_, L> {
        handle.lock().unwrap()
    }
}

/// Endpoint table entry: a remote descriptor or a handle to an embedder's
/// local endpoint.
pub type EndpointEntry = Managed<Endpoint, LocalEndpoint>;

impl EndpointEntry {
    pub fn id(&self) -> EpId {
        match self {
            Managed::Adopted(endpoint) => endpoint.id(),
            Managed::Bound(handle) => Self::lock_bound(handle).id(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Managed::Adopted(endpoint) => endpoint.name().to_owned(),
            Managed::Bound(handle) => Self::lock_bound(handle).name().to_owned(),
        }
    }

    pub fn node(&self) -> NodeId {
        match self {
            Managed::Adopted(endpoint) => endpoint.node(),
            Managed::Bound(handle) => Self::lock_bound(handle).node(),
        }
    }
}

/// Route table entry: a remote edge descriptor or a handle to a live local
/// route.
pub type RouteEntry = Managed<TransportRoute, LocalTransportRoute>;

impl RouteEntry {
    pub fn id(&self) -> TrId {
        match self {
            Managed::Adopted(route) => route.id(),
            Managed::Bound(handle) => Self::lock_bound(handle).id(),
        }
    }

    pub fn nodes(&self) -> (NodeId, NodeId) {
        match self {
            Managed::Adopted(route) => route.nodes(),
            Managed::Bound(handle) => Self::lock_bound(handle).descriptor().nodes(),
        }
    }

    pub fn node1(&self) -> NodeId {
        self.nodes().0
    }

    pub fn node2(&self) -> NodeId {
        self.nodes().1
    }

    pub fn typestring(&self) -> String {
        match self {
            Managed::Adopted(route) => route.typestring().to_owned(),
            Managed::Bound(handle) => Self::lock_bound(handle).descriptor().typestring().to_owned(),
        }
    }

    pub fn infostring(&self) -> String {
        match self {
            Managed::Adopted(route) => route.infostring().to_owned(),
            Managed::Bound(handle) => Self::lock_bound(handle).descriptor().infostring().to_owned(),
        }
    }

    pub(crate) fn set_id(&mut self, id: TrId) {
        match self {
            Managed::Adopted(route) => route.set_id(id),
            Managed::Bound(handle) => Self::lock_bound(handle).descriptor_mut().set_id(id),
        }
    }

    pub(crate) fn set_node1(&mut self, node: NodeId) {
        match self {
            Managed::Adopted(route) => route.set_node1(node),
            Managed::Bound(handle) => Self::lock_bound(handle).descriptor_mut().set_node1(node),
        }
    }

    pub(crate) fn set_node2(&mut self, node: NodeId) {
        match self {
            Managed::Adopted(route) => route.set_node2(node),
            Managed::Bound(handle) => Self::lock_bound(handle).descriptor_mut().set_node2(node),
        }
    }
}
