//! Transport routes: undirected edges of the network model. A local route
//! additionally owns a [`Connection`] and the per-route protocol state the
//! node's update tick drives.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::clock::now_ms;
use crate::connection::Connection;
use crate::ids::{NodeId, TrId, UNSET_ID};

/// Floor for the heartbeat interval; dead-after is at least twice this.
pub const MIN_HEARTBEAT_MS: u16 = 100;

/// Heartbeat and dead-route detection intervals, in milliseconds.
///
/// During the handshake both ends raise their values to the pairwise
/// maximum, so a route always runs the more conservative of the two
/// configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTimings {
    pub heartbeat_ms: u16,
    pub dead_after_ms: u16,
}

impl RouteTimings {
    pub fn new(heartbeat_ms: u16, dead_after_ms: u16) -> Self {
        Self { heartbeat_ms, dead_after_ms }
    }

    /// Raise both intervals to their minimums: heartbeat at least
    /// [`MIN_HEARTBEAT_MS`], dead-after at least twice the heartbeat.
    pub fn clamp(&mut self) {
        if self.heartbeat_ms < MIN_HEARTBEAT_MS {
            self.heartbeat_ms = MIN_HEARTBEAT_MS;
        }
        if self.dead_after_ms < self.heartbeat_ms.saturating_mul(2) {
            self.dead_after_ms = self.heartbeat_ms.saturating_mul(2);
        }
    }

    pub(crate) fn merge_max(&mut self, other: RouteTimings) {
        self.heartbeat_ms = self.heartbeat_ms.max(other.heartbeat_ms);
        self.dead_after_ms = self.dead_after_ms.max(other.dead_after_ms);
    }
}

impl Default for RouteTimings {
    fn default() -> Self {
        let mut timings = Self { heartbeat_ms: 0, dead_after_ms: 0 };
        timings.clamp();
        timings
    }
}

/// Connection state of a local route.
///
/// ```text
///  INITIALIZED/CLOSED -> SEND_CONNECT -> WAIT_CONNECT --connect--> SEND_ACK
///      SEND_ACK -> WAIT_ACK --ack--> CONNECTED --dead timeout--> CLOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Initialized,
    SendConnect,
    WaitConnect,
    SendAck,
    WaitAck,
    Connected,
    Closed,
}

/// Model entry for a route: an undirected edge between two nodes. Either
/// end may still be unset while discovery is in progress.
#[derive(Debug, Clone)]
pub struct TransportRoute {
    id: TrId,
    node1: NodeId,
    node2: NodeId,
    typestring: String,
    infostring: String,
}

impl TransportRoute {
    pub(crate) fn remote(id: TrId, node1: NodeId, node2: NodeId) -> Self {
        Self { id, node1, node2, typestring: "remote".into(), infostring: String::new() }
    }

    pub fn id(&self) -> TrId {
        self.id
    }

    pub fn node1(&self) -> NodeId {
        self.node1
    }

    pub fn node2(&self) -> NodeId {
        self.node2
    }

    pub fn nodes(&self) -> (NodeId, NodeId) {
        (self.node1, self.node2)
    }

    pub fn typestring(&self) -> &str {
        &self.typestring
    }

    pub fn infostring(&self) -> &str {
        &self.infostring
    }

    pub(crate) fn set_id(&mut self, id: TrId) {
        self.id = id;
    }

    pub(crate) fn set_node1(&mut self, node: NodeId) {
        self.node1 = node;
    }

    pub(crate) fn set_node2(&mut self, node: NodeId) {
        self.node2 = node;
    }
}

/// Per-route bookkeeping driven by the update tick.
#[derive(Debug, Clone, Copy)]
pub struct RouteMeta {
    /// Stamp of the last successfully framed inbound package.
    pub last_in: u64,
    /// Stamp of the last outbound frame.
    pub last_out: u64,
    /// Bytes that must be available before the frame parser retries after a
    /// partial read.
    pub wait_size: usize,
    pub timings: RouteTimings,
}

/// A route backed by a live [`Connection`]. Only local routes run the
/// handshake state machine and carry traffic.
///
/// The put-back queue holds prefix bytes the frame parser consumed
/// prematurely; reads drain it ahead of the connection so a partial frame
/// resumes byte-identically on the next tick.
pub struct LocalTransportRoute {
    descriptor: TransportRoute,
    connection: Box<dyn Connection>,
    put_back: VecDeque<u8>,
    state: RouteState,
    meta: RouteMeta,
}

impl LocalTransportRoute {
    pub fn new(
        connection: Box<dyn Connection>,
        typestring: impl Into<String>,
        infostring: impl Into<String>,
        timings: RouteTimings,
    ) -> Self {
        Self {
            descriptor: TransportRoute {
                id: 0,
                node1: UNSET_ID,
                node2: UNSET_ID,
                typestring: typestring.into(),
                infostring: infostring.into(),
            },
            connection,
            put_back: VecDeque::new(),
            state: RouteState::Initialized,
            meta: RouteMeta {
                last_in: 0,
                last_out: 0,
                wait_size: 0,
                timings,
            },
        }
    }

    /// Wrap into the shared handle form the node registers.
    pub fn into_shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    pub fn descriptor(&self) -> &TransportRoute {
        &self.descriptor
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut TransportRoute {
        &mut self.descriptor
    }

    pub fn id(&self) -> TrId {
        self.descriptor.id
    }

    pub fn state(&self) -> RouteState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: RouteState) {
        self.state = state;
    }

    pub fn meta(&self) -> &RouteMeta {
        &self.meta
    }

    pub(crate) fn meta_mut(&mut self) -> &mut RouteMeta {
        &mut self.meta
    }

    pub(crate) fn stamp_in(&mut self) {
        self.meta.last_in = now_ms();
    }

    pub(crate) fn stamp_out(&mut self) {
        self.meta.last_out = now_ms();
    }

    /// Try to bring the connection up; stamps both directions fresh on
    /// success so the liveness check starts from "now".
    pub(crate) fn open_io(&mut self) -> bool {
        if !self.connection.open() {
            return false;
        }

        let now = now_ms();
        self.meta.last_in = now;
        self.meta.last_out = now;

        true
    }

    /// Close the connection and drop the in-flight framing state: the
    /// put-back queue, the deferred-read size and the traffic stamps. A
    /// reopened route must never replay prefix bytes of a package from a
    /// previous incarnation; bytes still queued inside the connection are
    /// the transport's business and the resync scan copes with them.
    pub(crate) fn close_io(&mut self) {
        self.connection.close();
        self.put_back.clear();
        self.meta.wait_size = 0;
        self.meta.last_in = 0;
        self.meta.last_out = 0;
    }

    /// Read pending bytes, draining the put-back queue first.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;

        while copied < buf.len() {
            match self.put_back.pop_front() {
                Some(byte) => {
                    buf[copied] = byte;
                    copied += 1;
                }
                None => break,
            }
        }

        if copied < buf.len() {
            copied += self.connection.read(&mut buf[copied..]);
        }

        copied
    }

    pub fn write(&mut self, buf: &[u8]) -> usize {
        self.connection.write(buf)
    }

    pub fn flush(&mut self) -> bool {
        self.connection.flush()
    }

    /// Bytes readable right now, counting the put-back queue.
    pub fn available(&mut self) -> usize {
        self.put_back.len() + self.connection.available()
    }

    /// Queue bytes ahead of the next read, in the order given.
    pub(crate) fn put_back(&mut self, bytes: &[u8]) {
        self.put_back.extend(bytes.iter().copied());
    }
}
