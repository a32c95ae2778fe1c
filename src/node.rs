//! The local node: registration of endpoints and routes, the user-facing
//! send API, and the update tick that drives every route's state machine.

mod control;
mod state;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::endpoint::LocalEndpoint;
use crate::error::WeftError;
use crate::ids::{compose_tr_id, tr_id_minter, EpId, NodeId, PackageType, TrId, IAC, UNSET_ID};
use crate::network::{Managed, Network, Node};
use crate::package::Package;
use crate::route::{LocalTransportRoute, RouteState, RouteTimings};

/// Framed packages drained per route per tick, bounding forwarding latency
/// jitter and keeping one busy route from starving the others.
const READS_PER_ROUTE_PER_TICK: usize = 5;

/// A participant hosting local endpoints and driving local routes.
///
/// Single-threaded cooperative: the embedder calls [`LocalNode::update`] in
/// a loop at its chosen cadence; all I/O happens inside that call, polled
/// non-blockingly. The node has no id until the first local endpoint is
/// registered; the endpoint's id becomes the node id.
pub struct LocalNode {
    id: NodeId,
    network: Network,
    used_route_ids: HashSet<u8>,
    default_timings: RouteTimings,
}

impl Default for LocalNode {
    fn default() -> Self {
        Self::new(RouteTimings::default())
    }
}

impl LocalNode {
    pub fn new(mut default_timings: RouteTimings) -> Self {
        default_timings.clamp();

        Self {
            id: UNSET_ID,
            network: Network::new(),
            used_route_ids: HashSet::new(),
            default_timings,
        }
    }

    /// This node's id, or `UNSET_ID` before the first endpoint registration.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Read-only view of the network model.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Register an embedder-owned endpoint. The first registration fixes
    /// the node id to the endpoint's id.
    pub fn add_local_endpoint(
        &mut self,
        endpoint: &Arc<Mutex<LocalEndpoint>>,
    ) -> Result<(), WeftError> {
        let ep_id = endpoint.lock().unwrap().id();

        if self.id == UNSET_ID {
            self.id = ep_id;
            self.network.add_node(Node::local(ep_id))?;
        }

        endpoint.lock().unwrap().set_node(self.id);
        self.network.add_endpoint(Managed::Bound(endpoint.clone()))?;

        log::debug!("node {}: registered local endpoint {}", self.id, ep_id);
        Ok(())
    }

    pub fn remove_local_endpoint(&mut self, ep_id: EpId) -> Result<(), WeftError> {
        self.network.remove_endpoint(ep_id)
    }

    /// Register an embedder-owned route. Assigns the route id
    /// `(own_node_id << 8) | lowest_free_index`, clamps its timings and
    /// links it to this node. The route starts handshaking on the next
    /// update tick.
    pub fn add_local_transport_route(
        &mut self,
        route: &Arc<Mutex<LocalTransportRoute>>,
    ) -> Result<TrId, WeftError> {
        if self.id == UNSET_ID {
            return Err(WeftError::NoRegisteredEndpoints);
        }

        let index = self.claim_route_index()?;
        let tr_id = compose_tr_id(self.id, index);

        {
            let mut route = route.lock().unwrap();
            let timings = &mut route.meta_mut().timings;
            timings.merge_max(self.default_timings);
            timings.clamp();

            route.descriptor_mut().set_id(tr_id);
            route.descriptor_mut().set_node1(self.id);
        }

        self.network.add_route(Managed::Bound(route.clone()))?;

        log::debug!("node {}: registered local route {:#06x}", self.id, tr_id);
        Ok(tr_id)
    }

    pub fn remove_local_transport_route(
        &mut self,
        route: &Arc<Mutex<LocalTransportRoute>>,
    ) -> Result<(), WeftError> {
        self.close_route(route);

        let tr_id = route.lock().unwrap().id();
        if tr_id_minter(tr_id) == self.id {
            self.used_route_ids.remove(&crate::ids::tr_id_index(tr_id));
        }

        self.network.remove_route(tr_id)
    }

    /// Send a payload from a local endpoint to any endpoint in the fabric.
    /// Delivered in-process when `to` is local, otherwise forwarded on the
    /// cheapest route towards its node.
    pub fn send(
        &mut self,
        from: EpId,
        to: EpId,
        package_type: PackageType,
        payload: &[u8],
    ) -> Result<(), WeftError> {
        if to == IAC {
            return Err(WeftError::ReservedAddress);
        }

        let package = Package::new(from, to, package_type, payload);
        self.send_from_local(&package)
    }

    /// Whether an endpoint with this id is currently known, locally or via
    /// any peer.
    pub fn endpoint_connected(&self, ep_id: EpId) -> bool {
        self.network.endpoint_registered(ep_id)
    }

    pub fn endpoints_connected(&self, ep_ids: &[EpId]) -> bool {
        ep_ids.iter().all(|&ep_id| self.endpoint_connected(ep_id))
    }

    /// Whether every registered local route has completed its handshake.
    pub fn all_routes_connected(&self) -> bool {
        self.network
            .routes()
            .filter_map(|entry| entry.bound_handle())
            .all(|handle| handle.lock().unwrap().state() == RouteState::Connected)
    }

    /// One cooperative tick: drive every local route's state machine, drain
    /// inbound packages, and flood a network digest if the model changed.
    pub fn update(&mut self) -> Result<(), WeftError> {
        if self.id == UNSET_ID || self.network.endpoint_count() == 0 {
            return Err(WeftError::NoRegisteredEndpoints);
        }

        // Snapshot the handles: dispatching a CONNECT may rename route ids
        // mid-loop, but the underlying objects stay put.
        let routes: Vec<Arc<Mutex<LocalTransportRoute>>> =
            self.network.routes().filter_map(|entry| entry.bound_handle()).collect();

        for route in &routes {
            self.drive_route(route);
        }

        if self.network.is_modified() {
            self.network.reset_modified();

            for route in &routes {
                let connected = route.lock().unwrap().state() == RouteState::Connected;
                if connected {
                    if let Err(err) = self.send_network_update(route) {
                        let tr_id = route.lock().unwrap().id();
                        log::warn!(
                            "node {}: network update on route {:#06x} failed: {}",
                            self.id,
                            tr_id,
                            err
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Egress half of the dispatcher: route a locally originated package.
    fn send_from_local(&mut self, package: &Package<'_>) -> Result<(), WeftError> {
        let Some(endpoint) = self.network.endpoint(package.to()) else {
            return Err(WeftError::UnknownEndpoint(package.to()));
        };

        if endpoint.is_local() {
            self.deliver_local(package);
            return Ok(());
        }

        self.forward(package)
    }

    /// Ingress half of the dispatcher: a package framed off `route`.
    fn receive_from_route(
        &mut self,
        package: Package<'_>,
        route: &Arc<Mutex<LocalTransportRoute>>,
    ) {
        let (state, tr_id) = {
            let route = route.lock().unwrap();
            (route.state(), route.id())
        };

        if matches!(state, RouteState::Initialized | RouteState::Closed) {
            log::warn!("node {}: received package on closed route {:#06x}", self.id, tr_id);
            return;
        }

        if package.to() == IAC {
            self.receive_control(package, route, state);
            return;
        }

        if !self.network.endpoint_registered(package.to()) {
            log::error!(
                "node {}: package for unregistered endpoint {}, dropping",
                self.id,
                package.to()
            );
            return;
        }

        let is_local = self.network.endpoint(package.to()).map(|e| e.is_local()).unwrap_or(false);
        if is_local {
            self.deliver_local(&package);
            return;
        }

        if let Err(err) = self.forward(&package) {
            log::warn!(
                "node {}: forwarding package for endpoint {} failed: {}",
                self.id,
                package.to(),
                err
            );
        }
    }

    fn deliver_local(&mut self, package: &Package<'_>) {
        let Some(handle) = self.network.endpoint(package.to()).and_then(|e| e.bound_handle())
        else {
            log::error!("node {}: local endpoint {} has no handle", self.id, package.to());
            return;
        };

        handle.lock().unwrap().handle_package(package);
    }

    /// Pick the cheapest locally attached route towards the target's node
    /// and frame the package onto it.
    fn forward(&mut self, package: &Package<'_>) -> Result<(), WeftError> {
        let endpoint =
            self.network.endpoint(package.to()).ok_or(WeftError::UnknownEndpoint(package.to()))?;

        let node_id = endpoint.node();
        if node_id == UNSET_ID {
            return Err(WeftError::NoRouteToEndpoint(package.to()));
        }

        let (tr_id, _hops) = self
            .network
            .best_local_route(node_id)
            .ok_or(WeftError::NoRouteToEndpoint(package.to()))?;

        let route = self
            .network
            .route(tr_id)
            .and_then(|entry| entry.bound_handle())
            .ok_or(WeftError::UnknownRoute(tr_id))?;

        let mut route = route.lock().unwrap();
        route.stamp_out();
        package.send_over(&mut route)
    }

    fn claim_route_index(&mut self) -> Result<u8, WeftError> {
        for index in 0..u8::MAX {
            if !self.used_route_ids.contains(&index) {
                self.used_route_ids.insert(index);
                return Ok(index);
            }
        }

        log::error!("node {}: no free local route ids left", self.id);
        Err(WeftError::OutOfRouteIds)
    }
}
