use crate::ids::{EpId, NodeId, TrId};

/// Errors surfaced by the fabric.
///
/// Every variant here is non-fatal: operations return `Err` and leave the
/// node in a usable state. Model corruption that cannot be reasoned about
/// (a reachable node with no attached route while building a digest) is not
/// represented here; it logs a model dump and panics.
#[derive(Debug, thiserror::Error)]
pub enum WeftError {
    #[error("reader out of bounds: wanted {wanted} more bytes, {left} left")]
    ReaderOutOfBounds { wanted: usize, left: usize },

    #[error("writer out of room: wanted {wanted} more bytes, {left} left")]
    WriterOutOfRoom { wanted: usize, left: usize },

    #[error("string contains an interior NUL byte")]
    InteriorNul,

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("framing error: {0}")]
    Framing(&'static str),

    #[error("node {0} already registered")]
    DuplicateNode(NodeId),

    #[error("endpoint {0} already registered")]
    DuplicateEndpoint(EpId),

    #[error("route {0:#06x} already registered")]
    DuplicateRoute(TrId),

    #[error("node {0} not registered")]
    UnknownNode(NodeId),

    #[error("endpoint {0} not registered")]
    UnknownEndpoint(EpId),

    #[error("route {0:#06x} not registered")]
    UnknownRoute(TrId),

    #[error("package addressed to a reserved endpoint id")]
    ReservedAddress,

    #[error("node has no registered local endpoints")]
    NoRegisteredEndpoints,

    #[error("all 256 local route ids are in use")]
    OutOfRouteIds,

    #[error("no route leads to endpoint {0}")]
    NoRouteToEndpoint(EpId),
}
