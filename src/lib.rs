pub mod buffer;
pub mod clock;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod ids;
pub mod network;
pub mod node;
pub mod package;
pub mod route;
pub mod viz;

pub use crate::connection::{Connection, LoopbackConnection, TcpConnection};
pub use crate::endpoint::{Endpoint, LocalEndpoint};
pub use crate::error::WeftError;
pub use crate::ids::{ControlType, EpId, NodeId, PackageType, TrId, IAC, UNSET_ID};
pub use crate::network::{Network, Node};
pub use crate::node::LocalNode;
pub use crate::package::{Package, MAX_PAYLOAD_SIZE};
pub use crate::route::{LocalTransportRoute, RouteState, RouteTimings, TransportRoute};
pub use crate::viz::{NetworkSnapshot, VisualizationServer};
