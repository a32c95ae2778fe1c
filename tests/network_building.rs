//! Four-node mesh: every model converges to the same nodes, endpoints and
//! routes, with shortest-hop costs.
//!
//! Topology:
//!
//! ```text
//!   n1 --- n2 --- n3
//!           \     |
//!            \    |
//!             -- n4
//! ```

mod common;

use common::{link, networks_equal, node_with_endpoint, update_all};

#[test]
fn mesh_models_converge_and_agree() {
    let (mut n1, _ep1, _log1) = node_with_endpoint(1, "ep1");
    let (mut n2, _ep2, _log2) = node_with_endpoint(2, "ep2");
    let (mut n3, _ep3, _log3) = node_with_endpoint(3, "ep3");
    let (mut n4, _ep4, _log4) = node_with_endpoint(4, "ep4");

    link(&mut n1, &mut n2);
    link(&mut n2, &mut n3);
    link(&mut n2, &mut n4);
    link(&mut n3, &mut n4);

    let all_endpoints_known = |nodes: &[&weft::LocalNode]| {
        nodes.iter().all(|node| node.endpoints_connected(&[1, 2, 3, 4]))
    };

    let mut done = false;
    for _ in 0..100 {
        update_all(&mut [&mut n1, &mut n2, &mut n3, &mut n4]);
        if all_endpoints_known(&[&n1, &n2, &n3, &n4])
            && [&n1, &n2, &n3, &n4].iter().all(|node| node.all_routes_connected())
        {
            done = true;
            break;
        }
    }
    assert!(done, "mesh did not converge");

    // A few quiet ticks to let the last digests flood through.
    for _ in 0..6 {
        update_all(&mut [&mut n1, &mut n2, &mut n3, &mut n4]);
    }

    for node in [&n1, &n2, &n3, &n4] {
        assert_eq!(node.network().node_count(), 4);
        assert_eq!(node.network().endpoint_count(), 4);
        assert_eq!(node.network().route_count(), 4);
    }

    assert!(networks_equal(&[&n1, &n2, &n3, &n4]));

    // Shortest-hop costs from n1: its only neighbour is n2, everything
    // else is one hop further.
    assert_eq!(n1.network().best_local_route(2).unwrap().1, 1);
    assert_eq!(n1.network().best_local_route(3).unwrap().1, 2);
    assert_eq!(n1.network().best_local_route(4).unwrap().1, 2);

    // From n3: direct to n2 and n4, two hops to n1.
    assert_eq!(n3.network().best_local_route(1).unwrap().1, 2);
    assert_eq!(n3.network().best_local_route(2).unwrap().1, 1);
    assert_eq!(n3.network().best_local_route(4).unwrap().1, 1);
}

#[test]
fn traffic_crosses_the_mesh_via_forwarding() {
    let (mut n1, _ep1, _log1) = node_with_endpoint(1, "ep1");
    let (mut n2, _ep2, _log2) = node_with_endpoint(2, "ep2");
    let (mut n3, _ep3, log3) = node_with_endpoint(3, "ep3");

    // A line: n1 - n2 - n3. Packages from n1 to endpoint 3 must hop
    // through n2.
    link(&mut n1, &mut n2);
    link(&mut n2, &mut n3);

    let mut done = false;
    for _ in 0..100 {
        update_all(&mut [&mut n1, &mut n2, &mut n3]);
        if n1.endpoint_connected(3) && n3.endpoint_connected(1) {
            done = true;
            break;
        }
    }
    assert!(done, "line topology did not converge");

    for _ in 0..6 {
        update_all(&mut [&mut n1, &mut n2, &mut n3]);
    }

    n1.send(1, 3, 0, b"across").unwrap();

    // One tick for n2 to forward, one for n3 to deliver.
    update_all(&mut [&mut n1, &mut n2, &mut n3]);
    update_all(&mut [&mut n1, &mut n2, &mut n3]);

    let received = log3.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], (1, 3, 0, b"across".to_vec()));
}
