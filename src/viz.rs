//! Read-only snapshot of a network model for external visualization.

pub mod http;

use serde::Serialize;

use crate::ids::{EpId, NodeId, TrId};
use crate::network::Network;

pub use http::VisualizationServer;

/// Everything a viewer needs to draw one node's view of the fabric.
#[derive(Debug, Serialize)]
pub struct NetworkSnapshot {
    pub nodes: Vec<NodeView>,
}

#[derive(Debug, Serialize)]
pub struct NodeView {
    pub id: NodeId,
    pub local: bool,
    pub endpoints: Vec<EndpointView>,
    pub routes: Vec<RouteView>,
    pub local_routes: Vec<LocalRouteView>,
}

#[derive(Debug, Serialize)]
pub struct EndpointView {
    pub id: EpId,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RouteView {
    pub id: TrId,
    pub typestring: String,
    pub infostring: String,
    pub node1: NodeId,
    pub node2: NodeId,
}

#[derive(Debug, Serialize)]
pub struct LocalRouteView {
    pub route: TrId,
    pub hops: u8,
}

impl NetworkSnapshot {
    /// Capture the model as it stands. Ids are sorted so successive
    /// snapshots of an unchanged model serialize identically.
    pub fn of(network: &Network) -> Self {
        let mut node_ids: Vec<NodeId> = network.nodes().map(|node| node.id()).collect();
        node_ids.sort_unstable();

        let nodes = node_ids
            .into_iter()
            .filter_map(|node_id| {
                let node = network.node(node_id)?;

                let mut ep_ids: Vec<EpId> = node.endpoints().iter().copied().collect();
                ep_ids.sort_unstable();
                let endpoints = ep_ids
                    .into_iter()
                    .filter_map(|ep_id| {
                        let endpoint = network.endpoint(ep_id)?;
                        Some(EndpointView { id: ep_id, name: endpoint.name() })
                    })
                    .collect();

                let mut tr_ids: Vec<TrId> = node.routes().iter().copied().collect();
                tr_ids.sort_unstable();
                let routes = tr_ids
                    .into_iter()
                    .filter_map(|tr_id| {
                        let route = network.route(tr_id)?;
                        let (node1, node2) = route.nodes();
                        Some(RouteView {
                            id: tr_id,
                            typestring: route.typestring(),
                            infostring: route.infostring(),
                            node1,
                            node2,
                        })
                    })
                    .collect();

                let mut local_routes: Vec<LocalRouteView> = node
                    .local_routes()
                    .iter()
                    .map(|(&route, &hops)| LocalRouteView { route, hops })
                    .collect();
                local_routes.sort_unstable_by_key(|view| view.route);

                Some(NodeView {
                    id: node_id,
                    local: node.is_local(),
                    endpoints,
                    routes,
                    local_routes,
                })
            })
            .collect();

        Self { nodes }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
