//! Two-node handshake, user traffic in both directions, and the route-id
//! tie-break.

mod common;

use common::{converge, link, node_with_endpoint, update_all};
use weft::{RouteState, WeftError};

#[test]
fn handshake_connects_both_nodes() {
    let (mut n1, _ep1, _log1) = node_with_endpoint(1, "ep1");
    let (mut n2, _ep2, _log2) = node_with_endpoint(2, "ep2");

    let (route_a, route_b) = link(&mut n1, &mut n2);

    converge(&mut [&mut n1, &mut n2], 10);
    update_all(&mut [&mut n1, &mut n2]);
    update_all(&mut [&mut n1, &mut n2]);

    assert!(n1.endpoint_connected(2));
    assert!(n2.endpoint_connected(1));

    assert_eq!(route_a.lock().unwrap().state(), RouteState::Connected);
    assert_eq!(route_b.lock().unwrap().state(), RouteState::Connected);

    // Both ends agree on the id minted by the smaller node id.
    assert_eq!(route_a.lock().unwrap().id(), 0x0100);
    assert_eq!(route_b.lock().unwrap().id(), 0x0100);
}

#[test]
fn packages_deliver_in_both_directions() {
    let (mut n1, _ep1, log1) = node_with_endpoint(1, "ep1");
    let (mut n2, _ep2, log2) = node_with_endpoint(2, "ep2");

    link(&mut n1, &mut n2);
    converge(&mut [&mut n1, &mut n2], 10);
    update_all(&mut [&mut n1, &mut n2]);
    update_all(&mut [&mut n1, &mut n2]);

    n1.send(1, 2, 0, &[]).unwrap();
    update_all(&mut [&mut n1, &mut n2]);

    {
        let received = log2.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], (1, 2, 0, Vec::new()));
    }

    n2.send(2, 1, 0, &[]).unwrap();
    update_all(&mut [&mut n1, &mut n2]);

    let received = log1.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], (2, 1, 0, Vec::new()));
}

#[test]
fn payload_bytes_arrive_unchanged() {
    let (mut n1, _ep1, _log1) = node_with_endpoint(1, "ep1");
    let (mut n2, _ep2, log2) = node_with_endpoint(2, "ep2");

    link(&mut n1, &mut n2);
    converge(&mut [&mut n1, &mut n2], 10);
    update_all(&mut [&mut n1, &mut n2]);
    update_all(&mut [&mut n1, &mut n2]);

    let payload: Vec<u8> = (0..=255).collect();
    n1.send(1, 2, 0, &payload).unwrap();
    update_all(&mut [&mut n1, &mut n2]);

    let received = log2.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].3, payload);
}

#[test]
fn sends_to_unknown_or_reserved_endpoints_are_rejected() {
    let (mut n1, _ep1, _log1) = node_with_endpoint(1, "ep1");

    assert!(matches!(n1.send(1, 9, 0, &[]), Err(WeftError::UnknownEndpoint(9))));
    assert!(matches!(n1.send(1, 255, 0, &[]), Err(WeftError::ReservedAddress)));
}

#[test]
fn update_without_endpoints_is_rejected() {
    let mut node = weft::LocalNode::default();
    assert!(matches!(node.update(), Err(WeftError::NoRegisteredEndpoints)));
}

#[test]
fn colliding_route_ids_settle_on_the_smaller_one() {
    let (mut n1, _ep1, _log1) = node_with_endpoint(1, "ep1");
    let (mut n2, _ep2, _log2) = node_with_endpoint(2, "ep2");

    // Both nodes mint lower byte 0: 0x0100 on n1 and 0x0200 on n2. The
    // node holding the larger id renames.
    let (route_a, route_b) = link(&mut n1, &mut n2);

    converge(&mut [&mut n1, &mut n2], 10);
    update_all(&mut [&mut n1, &mut n2]);
    update_all(&mut [&mut n1, &mut n2]);

    assert_eq!(route_a.lock().unwrap().id(), 0x0100);
    assert_eq!(route_b.lock().unwrap().id(), 0x0100);

    for node in [&n1, &n2] {
        assert!(node.network().route_registered(0x0100));
        assert!(!node.network().route_registered(0x0200));

        let (node1, node2) = {
            let route = node.network().route(0x0100).unwrap();
            route.nodes()
        };
        assert_eq!((node1.min(node2), node1.max(node2)), (1, 2));

        // Cost maps must reference the surviving id only.
        for entry in node.network().nodes() {
            for tr_id in entry.local_routes().keys() {
                assert_eq!(*tr_id, 0x0100);
            }
        }
    }
}
