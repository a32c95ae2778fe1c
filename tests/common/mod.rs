//! Shared harness for the end-to-end tests: loopback-linked nodes and
//! model-equality checks.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use weft::{
    EpId, LocalEndpoint, LocalNode, LocalTransportRoute, LoopbackConnection, RouteTimings,
};

pub type RouteHandle = Arc<Mutex<LocalTransportRoute>>;
pub type EndpointHandle = Arc<Mutex<LocalEndpoint>>;

/// What an endpoint handler saw: `(from, to, type, payload)`.
pub type ReceivedLog = Arc<Mutex<Vec<(u8, u8, u8, Vec<u8>)>>>;

pub fn node_with_endpoint(id: EpId, name: &str) -> (LocalNode, EndpointHandle, ReceivedLog) {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut node = LocalNode::default();
    let endpoint = LocalEndpoint::new(id, name).into_shared();

    let log: ReceivedLog = Arc::new(Mutex::new(Vec::new()));
    let log_in_handler = log.clone();
    endpoint.lock().unwrap().add_package_handler(0, move |package| {
        log_in_handler.lock().unwrap().push((
            package.from(),
            package.to(),
            package.package_type(),
            package.payload().to_vec(),
        ));
    });

    node.add_local_endpoint(&endpoint).unwrap();
    (node, endpoint, log)
}

/// Link two nodes with an in-memory pipe; returns both route handles.
pub fn link(a: &mut LocalNode, b: &mut LocalNode) -> (RouteHandle, RouteHandle) {
    let (conn_a, conn_b) = LoopbackConnection::pair();

    let route_a =
        LocalTransportRoute::new(Box::new(conn_a), "loopback", "", RouteTimings::default())
            .into_shared();
    let route_b =
        LocalTransportRoute::new(Box::new(conn_b), "loopback", "", RouteTimings::default())
            .into_shared();

    a.add_local_transport_route(&route_a).unwrap();
    b.add_local_transport_route(&route_b).unwrap();

    (route_a, route_b)
}

pub fn update_all(nodes: &mut [&mut LocalNode]) {
    for node in nodes.iter_mut() {
        node.update().unwrap();
    }
}

/// Tick every node until all routes report connected; panics after
/// `max_ticks`.
pub fn converge(nodes: &mut [&mut LocalNode], max_ticks: usize) {
    for _ in 0..max_ticks {
        update_all(nodes);
        if nodes.iter().all(|node| node.all_routes_connected()) {
            return;
        }
    }

    panic!("nodes did not converge within {} ticks", max_ticks);
}

/// Model equality across nodes, modulo the local flag and entry order:
/// same node ids with the same endpoint and route sets, same endpoint
/// ownership, and the same unordered node pair per route.
pub fn networks_equal(nodes: &[&LocalNode]) -> bool {
    for node in nodes {
        for other in nodes {
            if std::ptr::eq(*node, *other) {
                continue;
            }

            for entry in node.network().nodes() {
                let Some(counterpart) = other.network().node(entry.id()) else {
                    eprintln!(
                        "node {} known to {} but not to {}",
                        entry.id(),
                        node.id(),
                        other.id()
                    );
                    return false;
                };

                if entry.endpoints() != counterpart.endpoints() {
                    eprintln!("endpoint sets of node {} differ", entry.id());
                    return false;
                }
                if entry.routes() != counterpart.routes() {
                    eprintln!("route sets of node {} differ", entry.id());
                    return false;
                }
            }

            for endpoint in node.network().endpoints() {
                let Some(counterpart) = other.network().endpoint(endpoint.id()) else {
                    eprintln!("endpoint {} missing on node {}", endpoint.id(), other.id());
                    return false;
                };
                if endpoint.node() != counterpart.node() {
                    eprintln!("endpoint {} owned by different nodes", endpoint.id());
                    return false;
                }
            }

            for route in node.network().routes() {
                let Some(counterpart) = other.network().route(route.id()) else {
                    eprintln!("route {:#06x} missing on node {}", route.id(), other.id());
                    return false;
                };

                let (a1, a2) = route.nodes();
                let (b1, b2) = counterpart.nodes();
                if (a1.min(a2), a1.max(a2)) != (b1.min(b2), b1.max(b2)) {
                    eprintln!("route {:#06x} links different node pairs", route.id());
                    return false;
                }
            }
        }
    }

    true
}
