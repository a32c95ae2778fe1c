//! The per-node model of the whole network: every node heard of, the
//! endpoints they host, the routes between them, and for each reachable
//! node the cost of the cheapest locally attached route.
//!
//! All cross-references between the three tables are by id. The model keeps
//! itself consistent under the operations below; `validate` asserts the
//! invariants and is wired into every mutating operation in debug builds.

pub mod entry;

use core::fmt;
use std::collections::{HashMap, HashSet};

use crate::error::WeftError;
use crate::ids::{EpId, NodeId, TrId, UNSET_ID};

pub use entry::{EndpointEntry, Managed, RouteEntry};

/// Model entry for a participant, local or learned.
#[derive(Debug, Clone, Default)]
pub struct Node {
    id: NodeId,
    local: bool,
    endpoints: HashSet<EpId>,
    routes: HashSet<TrId>,
    local_routes: HashMap<TrId, u8>,
}

impl Node {
    pub(crate) fn local(id: NodeId) -> Self {
        Self { id, local: true, ..Default::default() }
    }

    pub(crate) fn remote(id: NodeId) -> Self {
        Self { id, local: false, ..Default::default() }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Every endpoint hosted on this node.
    pub fn endpoints(&self) -> &HashSet<EpId> {
        &self.endpoints
    }

    /// Every known route touching this node.
    pub fn routes(&self) -> &HashSet<TrId> {
        &self.routes
    }

    /// The model holder's own routes that transitively reach this node,
    /// with their hop distance. Empty for the model holder itself.
    pub fn local_routes(&self) -> &HashMap<TrId, u8> {
        &self.local_routes
    }
}

#[derive(Default)]
pub struct Network {
    nodes: HashMap<NodeId, Node>,
    endpoints: HashMap<EpId, EndpointEntry>,
    routes: HashMap<TrId, RouteEntry>,
    modified: bool,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_registered(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn endpoint_registered(&self, id: EpId) -> bool {
        self.endpoints.contains_key(&id)
    }

    pub fn route_registered(&self, id: TrId) -> bool {
        self.routes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn endpoint(&self, id: EpId) -> Option<&EndpointEntry> {
        self.endpoints.get(&id)
    }

    pub fn route(&self, id: TrId) -> Option<&RouteEntry> {
        self.routes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointEntry> {
        self.endpoints.values()
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn is_modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn set_modified(&mut self) {
        self.modified = true;
    }

    pub(crate) fn reset_modified(&mut self) {
        self.modified = false;
    }

    pub(crate) fn add_node(&mut self, node: Node) -> Result<(), WeftError> {
        if self.nodes.contains_key(&node.id) {
            return Err(WeftError::DuplicateNode(node.id));
        }

        self.nodes.insert(node.id, node);
        self.modified = true;

        self.debug_validate();
        Ok(())
    }

    /// Remove a node, its endpoints, and its end of every linked route.
    /// Routes whose both ends become unset disappear with it.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> Result<(), WeftError> {
        if !self.nodes.contains_key(&id) {
            return Err(WeftError::UnknownNode(id));
        }

        let ep_ids: Vec<EpId> = self.nodes[&id].endpoints.iter().copied().collect();
        for ep_id in ep_ids {
            self.remove_endpoint(ep_id)?;
        }

        let tr_ids: Vec<TrId> = self.nodes[&id].routes.iter().copied().collect();
        for tr_id in tr_ids {
            let node = self.nodes.get_mut(&id).ok_or(WeftError::UnknownNode(id))?;
            node.routes.remove(&tr_id);
            node.local_routes.remove(&tr_id);

            let route = self.routes.get_mut(&tr_id).ok_or(WeftError::UnknownRoute(tr_id))?;
            if route.node1() == id {
                route.set_node1(UNSET_ID);
            }
            if route.node2() == id {
                route.set_node2(UNSET_ID);
            }

            if route.nodes() == (UNSET_ID, UNSET_ID) {
                self.remove_route(tr_id)?;
            }
        }

        self.nodes.remove(&id);
        self.modified = true;

        self.debug_validate();
        Ok(())
    }

    pub(crate) fn add_endpoint(&mut self, endpoint: EndpointEntry) -> Result<(), WeftError> {
        let ep_id = endpoint.id();
        if self.endpoints.contains_key(&ep_id) {
            return Err(WeftError::DuplicateEndpoint(ep_id));
        }

        let node_id = endpoint.node();
        if node_id != UNSET_ID {
            self.adopt_node_if_missing(node_id);
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.endpoints.insert(ep_id);
            }
        }

        self.endpoints.insert(ep_id, endpoint);
        self.modified = true;

        self.debug_validate();
        Ok(())
    }

    pub(crate) fn remove_endpoint(&mut self, ep_id: EpId) -> Result<(), WeftError> {
        let endpoint = self.endpoints.get(&ep_id).ok_or(WeftError::UnknownEndpoint(ep_id))?;

        let node_id = endpoint.node();
        if node_id != UNSET_ID {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.endpoints.remove(&ep_id);
            }
        }

        self.endpoints.remove(&ep_id);
        self.modified = true;

        self.debug_validate();
        Ok(())
    }

    pub(crate) fn add_route(&mut self, route: RouteEntry) -> Result<(), WeftError> {
        let tr_id = route.id();
        if self.routes.contains_key(&tr_id) {
            return Err(WeftError::DuplicateRoute(tr_id));
        }

        let (node1, node2) = route.nodes();
        for end in [node1, node2] {
            if end != UNSET_ID {
                self.adopt_node_if_missing(end);
            }
        }

        self.routes.insert(tr_id, route);

        for end in [node1, node2] {
            if end != UNSET_ID {
                if let Some(node) = self.nodes.get_mut(&end) {
                    node.routes.insert(tr_id);
                }
            }
        }

        self.modified = true;

        self.debug_validate();
        Ok(())
    }

    /// Unlink a route from both its ends and erase it. A remote node left
    /// with no routes at all disappears; the model holder's own entry is
    /// anchored by its endpoints instead.
    pub(crate) fn remove_route(&mut self, tr_id: TrId) -> Result<(), WeftError> {
        let route = self.routes.get(&tr_id).ok_or(WeftError::UnknownRoute(tr_id))?;
        let (node1, node2) = route.nodes();

        self.routes.remove(&tr_id);

        // Unlink both ends before any cascade so no intermediate state
        // holds a dangling reference.
        for end in [node1, node2] {
            if end == UNSET_ID {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&end) {
                node.routes.remove(&tr_id);
                node.local_routes.remove(&tr_id);
            }
        }

        for end in [node1, node2] {
            if end == UNSET_ID {
                continue;
            }
            let orphaned = self
                .nodes
                .get(&end)
                .map(|node| node.routes.is_empty() && !node.local)
                .unwrap_or(false);
            if orphaned {
                self.remove_node(end)?;
            }
        }

        self.modified = true;

        self.debug_validate();
        Ok(())
    }

    /// Clear this route out of every node's local-route cost map without
    /// touching the route itself.
    pub(crate) fn disconnect_route(&mut self, tr_id: TrId) {
        for node in self.nodes.values_mut() {
            if node.local_routes.remove(&tr_id).is_some() {
                self.modified = true;
            }
        }

        self.debug_validate();
    }

    /// Move a route to a new id, relinking every reference. Hop counts at
    /// both ends restart at one; the model holder itself never appears in
    /// its own cost maps.
    pub(crate) fn rename_route(
        &mut self,
        old_id: TrId,
        new_id: TrId,
        local_node: NodeId,
    ) -> Result<(), WeftError> {
        if self.routes.contains_key(&new_id) {
            return Err(WeftError::DuplicateRoute(new_id));
        }

        let mut route = self.routes.remove(&old_id).ok_or(WeftError::UnknownRoute(old_id))?;
        let (node1, node2) = route.nodes();

        for end in [node1, node2] {
            if end == UNSET_ID {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&end) {
                node.routes.remove(&old_id);
                node.local_routes.remove(&old_id);
            }
        }

        route.set_id(new_id);
        self.routes.insert(new_id, route);

        for end in [node1, node2] {
            if end == UNSET_ID {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&end) {
                node.routes.insert(new_id);
                if end != local_node {
                    node.local_routes.insert(new_id, 1);
                }
            }
        }

        self.modified = true;

        self.debug_validate();
        Ok(())
    }

    /// Record that `tr_id` reaches `node_id` in `hops`; keeps the smaller
    /// of the existing and offered cost.
    pub(crate) fn relax_local_route(&mut self, node_id: NodeId, tr_id: TrId, hops: u8) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            log::debug!("cost update for unknown node {}", node_id);
            return;
        };

        let cheaper = node.local_routes.get(&tr_id).copied().map_or(true, |existing| hops < existing);
        if cheaper {
            node.local_routes.insert(tr_id, hops);
            self.modified = true;
        }

        self.debug_validate();
    }

    pub(crate) fn link_route_to_node(&mut self, node_id: NodeId, tr_id: TrId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            if node.routes.insert(tr_id) {
                self.modified = true;
            }
        }
    }

    pub(crate) fn unlink_route_from_node(&mut self, node_id: NodeId, tr_id: TrId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            if node.routes.remove(&tr_id) {
                self.modified = true;
            }
            node.local_routes.remove(&tr_id);
        }
    }

    /// Drop every remote node nothing local leads to anymore, cascading
    /// into their endpoints and dangling routes.
    pub(crate) fn prune_unreachable(&mut self) -> Result<(), WeftError> {
        let unreachable: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| !node.local && node.local_routes.is_empty())
            .map(|node| node.id)
            .collect();

        for node_id in unreachable {
            // A cascade from an earlier removal may have taken it already.
            if self.nodes.contains_key(&node_id) {
                self.remove_node(node_id)?;
            }
        }

        Ok(())
    }

    /// The cheapest locally attached route towards `node_id`.
    pub fn best_local_route(&self, node_id: NodeId) -> Option<(TrId, u8)> {
        self.nodes
            .get(&node_id)?
            .local_routes
            .iter()
            .map(|(&tr_id, &hops)| (tr_id, hops))
            .min_by_key(|&(tr_id, hops)| (hops, tr_id))
    }

    pub(crate) fn route_entry_mut(&mut self, id: TrId) -> Option<&mut RouteEntry> {
        self.modified = true;
        self.routes.get_mut(&id)
    }

    fn adopt_node_if_missing(&mut self, id: NodeId) {
        if !self.nodes.contains_key(&id) {
            self.nodes.insert(id, Node::remote(id));
            self.modified = true;
        }
    }

    /// Walk every entity and check the cross-reference invariants. Logs and
    /// returns `false` on the first violation.
    pub fn validate(&self) -> bool {
        for node in self.nodes.values() {
            for &ep_id in &node.endpoints {
                match self.endpoints.get(&ep_id) {
                    None => {
                        log::error!(
                            "ep {} linked to node {} not registered: {}",
                            ep_id,
                            node.id,
                            self.representation(true)
                        );
                        return false;
                    }
                    Some(endpoint) if endpoint.node() != node.id => {
                        log::error!(
                            "ep {} linked to node {} not linked back: {}",
                            ep_id,
                            node.id,
                            self.representation(true)
                        );
                        return false;
                    }
                    Some(_) => {}
                }
            }

            for &tr_id in &node.routes {
                match self.routes.get(&tr_id) {
                    None => {
                        log::error!(
                            "tr {:#06x} linked to node {} not registered: {}",
                            tr_id,
                            node.id,
                            self.representation(true)
                        );
                        return false;
                    }
                    Some(route) if route.node1() != node.id && route.node2() != node.id => {
                        log::error!(
                            "tr {:#06x} linked to node {} not linked back: {}",
                            tr_id,
                            node.id,
                            self.representation(true)
                        );
                        return false;
                    }
                    Some(_) => {}
                }
            }

            for (&tr_id, &hops) in &node.local_routes {
                if !self.routes.contains_key(&tr_id) {
                    log::error!(
                        "local tr {:#06x} of node {} not registered: {}",
                        tr_id,
                        node.id,
                        self.representation(true)
                    );
                    return false;
                }
                if hops < 1 {
                    log::error!("local tr {:#06x} of node {} has zero cost", tr_id, node.id);
                    return false;
                }
                if node.local {
                    log::error!("local node {} lists itself in its cost map", node.id);
                    return false;
                }
            }
        }

        for (&ep_id, endpoint) in &self.endpoints {
            let node_id = endpoint.node();
            if node_id == UNSET_ID {
                continue;
            }
            match self.nodes.get(&node_id) {
                Some(node) if node.endpoints.contains(&ep_id) => {}
                _ => {
                    log::error!(
                        "node {} linked to ep {} missing or not linked back: {}",
                        node_id,
                        ep_id,
                        self.representation(true)
                    );
                    return false;
                }
            }
        }

        for (&tr_id, route) in &self.routes {
            for end in [route.node1(), route.node2()] {
                if end == UNSET_ID {
                    continue;
                }
                match self.nodes.get(&end) {
                    Some(node) if node.routes.contains(&tr_id) => {}
                    _ => {
                        log::error!(
                            "node {} linked to tr {:#06x} missing or not linked back: {}",
                            end,
                            tr_id,
                            self.representation(true)
                        );
                        return false;
                    }
                }
            }
        }

        true
    }

    #[cfg(debug_assertions)]
    fn debug_validate(&self) {
        assert!(self.validate(), "network model invariant violation");
    }

    #[cfg(not(debug_assertions))]
    fn debug_validate(&self) {}

    /// Compact one-line dump of the whole model, for logs and assertion
    /// failures.
    pub fn representation(&self, include_local_routes: bool) -> String {
        let mut output = String::new();

        let mut node_ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        node_ids.sort_unstable();

        for node_id in node_ids {
            let node = &self.nodes[&node_id];
            output += &format!("{}[{}]:", node_id, if node.local { "_local" } else { "remote" });

            let mut ep_ids: Vec<EpId> = node.endpoints.iter().copied().collect();
            ep_ids.sort_unstable();
            output += "eps[ ";
            for ep_id in ep_ids {
                output += &format!("{} ", ep_id);
            }

            let mut tr_ids: Vec<TrId> = node.routes.iter().copied().collect();
            tr_ids.sort_unstable();
            output += "] trs[ ";
            for tr_id in tr_ids {
                output += &format!("{} ", tr_id);
            }

            if include_local_routes {
                let mut local: Vec<(TrId, u8)> =
                    node.local_routes.iter().map(|(&tr, &hops)| (tr, hops)).collect();
                local.sort_unstable();
                output += "] l_trs[ ";
                for (tr_id, hops) in local {
                    output += &format!("{}#{} ", tr_id, hops);
                }
            }

            output += "] ";
        }

        output
    }
}

impl fmt::Display for Network {
    /// Multi-line listing of the whole model, one block per node.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut node_ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        node_ids.sort_unstable();

        for node_id in node_ids {
            let node = &self.nodes[&node_id];
            writeln!(
                f,
                "+-- node {:#04x}{}",
                node.id,
                if node.local { " (local)" } else { "" }
            )?;

            let mut ep_ids: Vec<EpId> = node.endpoints.iter().copied().collect();
            ep_ids.sort_unstable();
            for ep_id in ep_ids {
                if let Some(endpoint) = self.endpoints.get(&ep_id) {
                    writeln!(f, "|   +-- ep {:#04x} '{}'", ep_id, endpoint.name())?;
                }
            }

            let mut tr_ids: Vec<TrId> = node.routes.iter().copied().collect();
            tr_ids.sort_unstable();
            for tr_id in tr_ids {
                if let Some(route) = self.routes.get(&tr_id) {
                    let (node1, node2) = route.nodes();
                    let far = if node1 == node_id { node2 } else { node1 };
                    let hops = node.local_routes.get(&tr_id);
                    writeln!(
                        f,
                        "|   +-- tr {:#06x} to {:#04x} type '{}' [{}]{}",
                        tr_id,
                        far,
                        route.typestring(),
                        route.infostring(),
                        hops.map(|hops| format!(" hops {}", hops)).unwrap_or_default()
                    )?;
                }
            }
        }

        Ok(())
    }
}
