//! Per-route connection state machine, run once per route per update tick.
//!
//! ```text
//!  INITIALIZED      +-----------------+                 +-----------------+
//!  or CLOSED ---->  | SEND_CONNECT    | --- connect --> | SEND_ACK        |
//!                   +-----------------+                 +-----------------+
//!                           |                                   |
//!                           v                                   v
//!                   +-----------------+                 +-----------------+
//!                   | WAIT_CONNECT    |                 | WAIT_ACK        |
//!                   +-----------------+                 +-----------------+
//!                     (retransmit on                      (retransmit on
//!                      heartbeat lapse)                    heartbeat lapse)
//!                                                               |
//!                                                              ack
//!                                                               v
//!                                                       +-----------------+
//!                                                       | CONNECTED       |
//!                                                       +-----------------+
//! ```
//!
//! Transitions entered within a tick fall through into the next state's
//! body, so a freshly opened route emits its CONNECT in the same tick.

use std::sync::{Arc, Mutex};

use super::{LocalNode, READS_PER_ROUTE_PER_TICK};
use crate::clock::now_ms;
use crate::package::Package;
use crate::route::{LocalTransportRoute, RouteState};

/// Backstop for the fall-through loop; the longest legal chain is
/// open -> send connect -> wait.
const MAX_STATE_STEPS: u32 = 8;

impl LocalNode {
    pub(super) fn drive_route(&mut self, route: &Arc<Mutex<LocalTransportRoute>>) {
        let now = now_ms();

        // Dead-route detection comes first; the route then reopens below in
        // the same tick.
        let timed_out = {
            let route = route.lock().unwrap();
            !matches!(route.state(), RouteState::Initialized | RouteState::Closed)
                && now.saturating_sub(route.meta().last_in)
                    > u64::from(route.meta().timings.dead_after_ms)
        };
        if timed_out {
            let tr_id = route.lock().unwrap().id();
            log::info!("node {}: route {:#06x} assumed dead", self.id, tr_id);
            self.close_route(route);
        }

        let mut steps = 0;
        loop {
            steps += 1;
            if steps > MAX_STATE_STEPS {
                log::error!("node {}: route state machine did not settle", self.id);
                break;
            }

            let (state, tr_id, last_out, heartbeat_ms) = {
                let route = route.lock().unwrap();
                (
                    route.state(),
                    route.id(),
                    route.meta().last_out,
                    u64::from(route.meta().timings.heartbeat_ms),
                )
            };

            match state {
                RouteState::Initialized | RouteState::Closed => {
                    if !route.lock().unwrap().open_io() {
                        log::trace!("node {}: route {:#06x} failed to open", self.id, tr_id);
                        return;
                    }

                    log::debug!("node {}: opened route {:#06x}", self.id, tr_id);
                    route.lock().unwrap().set_state(RouteState::SendConnect);
                }
                RouteState::SendConnect => {
                    if let Err(err) = self.send_connect(route) {
                        log::warn!(
                            "node {}: connect on route {:#06x} failed: {}",
                            self.id,
                            tr_id,
                            err
                        );
                        return;
                    }
                    route.lock().unwrap().set_state(RouteState::WaitConnect);
                }
                RouteState::WaitConnect => {
                    // Left by the ingress path when the peer's CONNECT
                    // arrives; until then, retransmit every heartbeat.
                    if now.saturating_sub(last_out) > heartbeat_ms {
                        route.lock().unwrap().set_state(RouteState::SendConnect);
                        continue;
                    }
                    break;
                }
                RouteState::SendAck => {
                    if let Err(err) = self.send_ack(route) {
                        log::warn!(
                            "node {}: ack on route {:#06x} failed: {}",
                            self.id,
                            tr_id,
                            err
                        );
                        return;
                    }
                    route.lock().unwrap().set_state(RouteState::WaitAck);
                }
                RouteState::WaitAck => {
                    if now.saturating_sub(last_out) > heartbeat_ms {
                        route.lock().unwrap().set_state(RouteState::SendAck);
                        continue;
                    }
                    break;
                }
                RouteState::Connected => {
                    if now.saturating_sub(last_out) > heartbeat_ms {
                        if let Err(err) = self.send_heartbeat(route) {
                            log::warn!(
                                "node {}: heartbeat on route {:#06x} failed: {}",
                                self.id,
                                tr_id,
                                err
                            );
                            return;
                        }
                    }
                    break;
                }
            }
        }

        self.drain_route(route);
    }

    /// Frame up to [`READS_PER_ROUTE_PER_TICK`] packages off the route and
    /// dispatch each. A framing error beyond resync closes the route; the
    /// next tick reconnects.
    fn drain_route(&mut self, route: &Arc<Mutex<LocalTransportRoute>>) {
        for _ in 0..READS_PER_ROUTE_PER_TICK {
            let read = {
                let mut route = route.lock().unwrap();
                Package::read_from(&mut route)
            };

            match read {
                Ok(Some(package)) => {
                    route.lock().unwrap().stamp_in();
                    self.receive_from_route(package, route);
                }
                Ok(None) => break,
                Err(err) => {
                    let tr_id = route.lock().unwrap().id();
                    log::error!(
                        "node {}: framing on route {:#06x} is corrupt ({}), closing",
                        self.id,
                        tr_id,
                        err
                    );
                    self.close_route(route);
                    break;
                }
            }
        }
    }

    /// Close a route: connection down, framing state wiped, and the model
    /// detached. Peers only reachable through this route disappear.
    pub(super) fn close_route(&mut self, route: &Arc<Mutex<LocalTransportRoute>>) {
        let tr_id = {
            let mut route = route.lock().unwrap();
            route.close_io();
            route.set_state(RouteState::Closed);
            route.id()
        };

        self.network.disconnect_route(tr_id);

        // Unset the far end of the edge and unlink it there.
        let far_node = self.network.route(tr_id).map(|entry| entry.node2());
        if let Some(far_node) = far_node {
            if far_node != crate::ids::UNSET_ID {
                log::debug!("node {}: disconnecting from node {}", self.id, far_node);
                self.network.unlink_route_from_node(far_node, tr_id);
                if let Some(entry) = self.network.route_entry_mut(tr_id) {
                    entry.set_node2(crate::ids::UNSET_ID);
                }
            }
        }

        if let Err(err) = self.network.prune_unreachable() {
            log::error!("node {}: pruning after route close failed: {}", self.id, err);
        }

        log::info!("node {}: closed route {:#06x}", self.id, tr_id);
    }
}
