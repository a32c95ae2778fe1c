//! Dead-route detection and automatic reconnect. Repeated cycles must not
//! leak model entities.

mod common;

use std::thread::sleep;
use std::time::Duration;

use common::{converge, link, node_with_endpoint, update_all};
use weft::RouteState;

#[test]
fn dead_routes_reconnect_without_leaking() {
    let (mut n1, _ep1, _log1) = node_with_endpoint(1, "ep1");
    let (mut n2, _ep2, _log2) = node_with_endpoint(2, "ep2");

    let (route_a, _route_b) = link(&mut n1, &mut n2);

    converge(&mut [&mut n1, &mut n2], 10);
    update_all(&mut [&mut n1, &mut n2]);
    update_all(&mut [&mut n1, &mut n2]);

    let baseline = (
        n1.network().node_count(),
        n1.network().endpoint_count(),
        n1.network().route_count(),
        n2.network().node_count(),
        n2.network().endpoint_count(),
        n2.network().route_count(),
    );
    assert_eq!(baseline, (2, 2, 1, 2, 2, 1));

    for cycle in 0..5 {
        // Outlast dead_after_ms (200 with default timings) with no traffic
        // in either direction.
        sleep(Duration::from_millis(250));

        // The first tick notices the dead peer, detaches it from the
        // model, and immediately starts a fresh handshake.
        n1.update().unwrap();
        assert!(!n1.endpoint_connected(2), "cycle {}: peer endpoint survived the close", cycle);
        assert_ne!(route_a.lock().unwrap().state(), RouteState::Connected);

        let mut reconnected = false;
        for _ in 0..50 {
            update_all(&mut [&mut n1, &mut n2]);
            if n1.endpoint_connected(2)
                && n2.endpoint_connected(1)
                && n1.all_routes_connected()
                && n2.all_routes_connected()
            {
                reconnected = true;
                break;
            }
        }
        assert!(reconnected, "cycle {}: nodes did not reconnect", cycle);

        let counts = (
            n1.network().node_count(),
            n1.network().endpoint_count(),
            n1.network().route_count(),
            n2.network().node_count(),
            n2.network().endpoint_count(),
            n2.network().route_count(),
        );
        assert_eq!(counts, baseline, "cycle {}: model entity counts drifted", cycle);
    }
}

#[test]
fn removing_a_route_detaches_the_peer() {
    let (mut n1, _ep1, _log1) = node_with_endpoint(1, "ep1");
    let (mut n2, _ep2, _log2) = node_with_endpoint(2, "ep2");

    let (route_a, _route_b) = link(&mut n1, &mut n2);

    converge(&mut [&mut n1, &mut n2], 10);
    update_all(&mut [&mut n1, &mut n2]);
    update_all(&mut [&mut n1, &mut n2]);

    n1.remove_local_transport_route(&route_a).unwrap();

    assert_eq!(route_a.lock().unwrap().state(), RouteState::Closed);
    assert_eq!(n1.network().route_count(), 0);
    assert!(!n1.endpoint_connected(2));
    assert!(n1.endpoint_connected(1));
    assert!(n1.network().validate());
}
