//! Control packages: the handshake (CONNECT/ACK), the network digest, and
//! heartbeats. All control traffic runs `IAC -> IAC` with a reserved type.

use std::sync::{Arc, Mutex};

use super::LocalNode;
use crate::buffer::{BufferReader, BufferWriter};
use crate::endpoint::Endpoint;
use crate::error::WeftError;
use crate::ids::{ControlType, UNSET_ID};
use crate::network::{Managed, Node};
use crate::package::Package;
use crate::route::{LocalTransportRoute, RouteState, RouteTimings, TransportRoute};

impl LocalNode {
    /// Control-package gate of the ingress dispatcher. Each type is only
    /// accepted in the route state that expects it; anything else is
    /// dropped.
    pub(super) fn receive_control(
        &mut self,
        package: Package<'_>,
        route: &Arc<Mutex<LocalTransportRoute>>,
        state: RouteState,
    ) {
        match ControlType::from_wire(package.package_type()) {
            Some(ControlType::Connect) if state == RouteState::WaitConnect => {
                match self.handle_connect(&package, route) {
                    Ok(()) => route.lock().unwrap().set_state(RouteState::SendAck),
                    Err(err) => {
                        log::warn!("node {}: dropping malformed connect: {}", self.id, err)
                    }
                }
            }
            Some(ControlType::Ack) if state == RouteState::WaitAck => {
                let tr_id = route.lock().unwrap().id();
                log::debug!("node {}: route {:#06x} connected", self.id, tr_id);

                route.lock().unwrap().set_state(RouteState::Connected);
                // Force a digest broadcast at the end of this tick so the
                // new peer learns the model right away.
                self.network.set_modified();
            }
            Some(ControlType::NetworkUpdate) if state == RouteState::Connected => {
                match self.handle_network_update(&package, route) {
                    Ok(()) => {
                        if let Err(err) = self.send_heartbeat(route) {
                            log::warn!("node {}: digest heartbeat reply failed: {}", self.id, err);
                        }
                    }
                    Err(err) => {
                        log::warn!("node {}: dropping malformed network update: {}", self.id, err)
                    }
                }
            }
            Some(ControlType::Heartbeat) if state == RouteState::Connected => {
                log::trace!("node {}: heartbeat", self.id);
            }
            _ => {
                let tr_id = route.lock().unwrap().id();
                log::warn!(
                    "node {}: dropping control package type {} on route {:#06x} in state {:?}",
                    self.id,
                    package.package_type(),
                    tr_id,
                    state
                );
            }
        }
    }

    /// Peer introduction. Adopts the sender, agrees on timings (pairwise
    /// maximum) and on a single route id for both ends: whoever holds the
    /// larger id renames to the peer's smaller one, so the tie-break is
    /// deterministic from either side.
    fn handle_connect(
        &mut self,
        package: &Package<'_>,
        route: &Arc<Mutex<LocalTransportRoute>>,
    ) -> Result<(), WeftError> {
        let mut reader = BufferReader::new(package.payload());

        let sender = reader.read_u8()?;
        let other_tr_id = reader.read_u16()?;
        let peer_timings = RouteTimings::new(reader.read_u16()?, reader.read_u16()?);

        {
            let mut route = route.lock().unwrap();
            route.meta_mut().timings.merge_max(peer_timings);
            log::trace!(
                "node {}: connect timings agreed at {:?}",
                self.id,
                route.meta().timings
            );
        }

        if !self.network.node_registered(sender) {
            self.network.add_node(Node::remote(sender))?;
        }

        let current_id = route.lock().unwrap().id();
        if other_tr_id < current_id {
            log::debug!(
                "node {}: renaming route {:#06x} to peer's {:#06x}",
                self.id,
                current_id,
                other_tr_id
            );

            // The peer's id may already be in the table as a remotely
            // learned copy of this same edge, relayed through a third node
            // before the direct handshake finished. The live route
            // supersedes it.
            if self.network.route_registered(other_tr_id) {
                self.network.remove_route(other_tr_id)?;
            }

            self.network.rename_route(current_id, other_tr_id, self.id)?;
        }

        // Removing the stale copy above may have cascaded the sender node
        // away again.
        if !self.network.node_registered(sender) {
            self.network.add_node(Node::remote(sender))?;
        }

        let tr_id = route.lock().unwrap().id();
        if let Some(entry) = self.network.route_entry_mut(tr_id) {
            entry.set_node2(sender);
        }
        self.network.link_route_to_node(sender, tr_id);
        self.network.relax_local_route(sender, tr_id, 1);

        log::info!("node {}: connecting to node {}", self.id, sender);
        Ok(())
    }

    /// Merge a peer's digest into the model: unknown endpoints and routes
    /// are adopted, and every node the peer reaches is offered through the
    /// carrying route at the peer's cost plus one hop.
    fn handle_network_update(
        &mut self,
        package: &Package<'_>,
        route: &Arc<Mutex<LocalTransportRoute>>,
    ) -> Result<(), WeftError> {
        let mut reader = BufferReader::new(package.payload());
        let via = route.lock().unwrap().id();

        let endpoint_count = reader.read_u8()?;
        for _ in 0..endpoint_count {
            let ep_id = reader.read_u8()?;
            let name = reader.read_str()?;
            let node_id = reader.read_u8()?;

            if !self.network.endpoint_registered(ep_id) {
                self.network.add_endpoint(Managed::Adopted(Endpoint::remote(
                    ep_id, name, node_id,
                )))?;
            }
        }

        let route_count = reader.read_u8()?;
        for _ in 0..route_count {
            let tr_id = reader.read_u16()?;
            let node1 = reader.read_u8()?;
            let node2 = reader.read_u8()?;

            if node1 != UNSET_ID && node2 != UNSET_ID && !self.network.route_registered(tr_id) {
                self.network
                    .add_route(Managed::Adopted(TransportRoute::remote(tr_id, node1, node2)))?;
            }
        }

        let node_count = reader.read_u8()?;
        for _ in 0..node_count {
            let reported = reader.read_u8()?;
            let hops = reader.read_u8()?;

            // The peer reports its best cost towards every node it knows,
            // including this one; reaching ourselves is not a route.
            if reported == self.id {
                continue;
            }

            self.network.relax_local_route(reported, via, hops.saturating_add(1));
        }

        Ok(())
    }

    /// Build and send this node's digest on one route: every endpoint,
    /// every route except the carrying one, and the best hop count towards
    /// every node except ourselves.
    pub(super) fn send_network_update(
        &mut self,
        route: &Arc<Mutex<LocalTransportRoute>>,
    ) -> Result<(), WeftError> {
        let carrying = route.lock().unwrap().id();
        let mut writer = BufferWriter::new();

        writer.write_u8(self.network.endpoint_count() as u8);
        for endpoint in self.network.endpoints() {
            writer.write_u8(endpoint.id());
            writer.write_str(&endpoint.name())?;
            writer.write_u8(endpoint.node());
        }

        writer.write_u8((self.network.route_count() - 1) as u8);
        for entry in self.network.routes() {
            if entry.id() == carrying {
                continue;
            }

            writer.write_u16(entry.id());
            let (node1, node2) = entry.nodes();
            writer.write_u8(node1);
            writer.write_u8(node2);
        }

        writer.write_u8((self.network.node_count() - 1) as u8);
        for node in self.network.nodes() {
            if node.id() == self.id {
                continue;
            }

            let Some((_tr_id, hops)) = self.network.best_local_route(node.id()) else {
                log::error!(
                    "node {}: no local route leads to node {}, model is inconsistent: {}",
                    self.id,
                    node.id(),
                    self.network.representation(true)
                );
                panic!("network model inconsistent: unreachable node in digest");
            };

            writer.write_u8(node.id());
            writer.write_u8(hops);
        }

        log::debug!("node {}: sending network update on route {:#06x}", self.id, carrying);
        self.send_control(ControlType::NetworkUpdate, writer.into_vec(), route)
    }

    pub(super) fn send_connect(
        &mut self,
        route: &Arc<Mutex<LocalTransportRoute>>,
    ) -> Result<(), WeftError> {
        let (tr_id, timings) = {
            let route = route.lock().unwrap();
            (route.id(), route.meta().timings)
        };

        let mut writer = BufferWriter::new();
        writer
            .write_u8(self.id)
            .write_u16(tr_id)
            .write_u16(timings.heartbeat_ms)
            .write_u16(timings.dead_after_ms);

        log::debug!("node {}: sending connect on route {:#06x}", self.id, tr_id);
        self.send_control(ControlType::Connect, writer.into_vec(), route)
    }

    pub(super) fn send_ack(
        &mut self,
        route: &Arc<Mutex<LocalTransportRoute>>,
    ) -> Result<(), WeftError> {
        let tr_id = route.lock().unwrap().id();
        log::debug!("node {}: sending ack on route {:#06x}", self.id, tr_id);
        self.send_control(ControlType::Ack, Vec::new(), route)
    }

    pub(super) fn send_heartbeat(
        &mut self,
        route: &Arc<Mutex<LocalTransportRoute>>,
    ) -> Result<(), WeftError> {
        self.send_control(ControlType::Heartbeat, Vec::new(), route)
    }

    fn send_control(
        &mut self,
        control: ControlType,
        payload: Vec<u8>,
        route: &Arc<Mutex<LocalTransportRoute>>,
    ) -> Result<(), WeftError> {
        let package = Package::control(control, payload);

        let mut route = route.lock().unwrap();
        route.stamp_out();
        package.send_over(&mut route)
    }
}
