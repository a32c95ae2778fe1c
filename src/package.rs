//! The framed unit carried on every route.
//!
//! Wire layout, little-endian:
//!
//! | offset | size | field        |
//! |--------|------|--------------|
//! | 0      | 1    | start byte `0xAA` |
//! | 1      | 2    | package size: bytes after this field, `5 + payload` |
//! | 3      | 1    | metadata     |
//! | 4      | 1    | to           |
//! | 5      | 1    | from         |
//! | 6      | 1    | type         |
//! | 7      | 1    | reserved, zero |
//! | 8..    | N    | payload, `N = package size - 5` |

use core::fmt;
use std::borrow::Cow;

use crate::error::WeftError;
use crate::ids::{ControlType, EpId, PackageType, TrId, IAC, UNSET_ID};
use crate::route::LocalTransportRoute;

pub const START_BYTE: u8 = 0xaa;

/// Start byte plus the 16-bit length field.
pub const PRE_HEADER_SIZE: usize = 3;

/// Metadata, to, from, type and the reserved byte; counted inside the
/// package size.
pub const INFO_HEADER_SIZE: usize = 5;

/// Largest payload a single frame can carry: 65 530 bytes.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - INFO_HEADER_SIZE;

/// A package: addressing header plus an opaque payload.
///
/// A borrowed payload references caller storage for the duration of a send;
/// a decoded package always owns its payload.
pub struct Package<'a> {
    from: EpId,
    to: EpId,
    package_type: PackageType,
    metadata: u8,
    payload: Cow<'a, [u8]>,
    via: Option<TrId>,
}

impl<'a> Package<'a> {
    pub fn new(from: EpId, to: EpId, package_type: PackageType, payload: &'a [u8]) -> Self {
        Self { from, to, package_type, metadata: 0, payload: Cow::Borrowed(payload), via: None }
    }

    pub fn new_owned(
        from: EpId,
        to: EpId,
        package_type: PackageType,
        payload: Vec<u8>,
    ) -> Package<'static> {
        Package { from, to, package_type, metadata: 0, payload: Cow::Owned(payload), via: None }
    }

    /// A control package: `IAC -> IAC` with a reserved type.
    pub(crate) fn control(control: ControlType, payload: Vec<u8>) -> Package<'static> {
        Package::new_owned(IAC, IAC, control.wire(), payload)
    }

    pub fn from(&self) -> EpId {
        self.from
    }

    pub fn to(&self) -> EpId {
        self.to
    }

    pub fn package_type(&self) -> PackageType {
        self.package_type
    }

    pub fn metadata(&self) -> u8 {
        self.metadata
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The route this package arrived on; `None` for locally originated
    /// packages.
    pub fn via(&self) -> Option<TrId> {
        self.via
    }

    /// Frame this package onto the route's connection and flush.
    pub fn send_over(&self, route: &mut LocalTransportRoute) -> Result<(), WeftError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WeftError::PayloadTooLarge(self.payload.len()));
        }

        let package_size = ((INFO_HEADER_SIZE + self.payload.len()) as u16).to_le_bytes();
        let header = [
            START_BYTE,
            package_size[0],
            package_size[1],
            self.metadata,
            self.to,
            self.from,
            self.package_type,
            0,
        ];

        if route.write(&header) != header.len() {
            return Err(WeftError::Framing("short header write"));
        }
        if !self.payload.is_empty() && route.write(&self.payload) != self.payload.len() {
            return Err(WeftError::Framing("short payload write"));
        }

        route.flush();

        Ok(())
    }

    /// Try to frame one package off the route.
    ///
    /// Returns `Ok(None)` when no complete frame is pending yet; the parser
    /// is re-entrant across ticks. When the frame length has been committed
    /// but the rest is not yet readable, the consumed prefix is put back and
    /// a deferred-read size recorded, so the next call resumes on identical
    /// bytes. `Err` means the byte stream is corrupt beyond resync and the
    /// route must be closed.
    pub fn read_from(
        route: &mut LocalTransportRoute,
    ) -> Result<Option<Package<'static>>, WeftError> {
        if route.meta().wait_size > 0 {
            if route.available() < route.meta().wait_size {
                return Ok(None);
            }
            route.meta_mut().wait_size = 0;
        }

        if route.available() < PRE_HEADER_SIZE {
            return Ok(None);
        }

        // Scan for the start byte. Zero bytes are keepalive pokes some
        // transports emit and are skipped silently; anything else before a
        // start byte is noise from a desync.
        let mut found = false;
        while route.available() >= PRE_HEADER_SIZE {
            let mut byte = [0u8; 1];
            if route.read(&mut byte) != 1 {
                return Err(WeftError::Framing("start byte vanished under read"));
            }

            if byte[0] == START_BYTE {
                found = true;
                break;
            }
            if byte[0] != 0 {
                log::warn!("route {:#06x}: corrupt frame start {:#04x}", route.id(), byte[0]);
            }
        }
        if !found {
            return Ok(None);
        }

        let mut size_bytes = [0u8; 2];
        if route.read(&mut size_bytes) != 2 {
            return Err(WeftError::Framing("package size vanished under read"));
        }
        let package_size = u16::from_le_bytes(size_bytes) as usize;

        if package_size < INFO_HEADER_SIZE {
            return Err(WeftError::Framing("package size smaller than its header"));
        }

        if route.available() < package_size {
            // Replay the consumed prefix on the next attempt and wait until
            // the whole frame is readable in one pass.
            route.put_back(&[START_BYTE]);
            route.put_back(&size_bytes);
            route.meta_mut().wait_size = package_size + PRE_HEADER_SIZE;
            return Ok(None);
        }

        let mut info = [0u8; INFO_HEADER_SIZE];
        if route.read(&mut info) != INFO_HEADER_SIZE {
            return Err(WeftError::Framing("info header vanished under read"));
        }

        let payload_size = package_size - INFO_HEADER_SIZE;
        let mut payload = vec![0u8; payload_size];
        if payload_size > 0 && route.read(&mut payload) != payload_size {
            return Err(WeftError::Framing("payload vanished under read"));
        }

        Ok(Some(Package {
            metadata: info[0],
            to: info[1],
            from: info[2],
            package_type: info[3],
            payload: Cow::Owned(payload),
            via: Some(route.id()),
        }))
    }
}

impl fmt::Debug for Package<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const DUMP_LIMIT: usize = 32;

        let dump = if self.payload.len() > DUMP_LIMIT {
            format!("{}..", hex::encode(&self.payload[..DUMP_LIMIT]))
        } else {
            hex::encode(&self.payload[..])
        };

        f.debug_struct("Package")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("type", &self.package_type)
            .field("metadata", &self.metadata)
            .field("payload_len", &self.payload.len())
            .field("payload", &dump)
            .field("via", &self.via)
            .finish()
    }
}

impl Default for Package<'static> {
    fn default() -> Self {
        Package::new_owned(UNSET_ID, UNSET_ID, 0, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, LoopbackConnection};
    use crate::route::RouteTimings;

    fn route_pair() -> (LocalTransportRoute, LocalTransportRoute) {
        let (a, b) = LoopbackConnection::pair();
        (
            LocalTransportRoute::new(Box::new(a), "loopback", "", RouteTimings::default()),
            LocalTransportRoute::new(Box::new(b), "loopback", "", RouteTimings::default()),
        )
    }

    #[test]
    fn frame_is_exactly_eight_bytes_plus_payload() {
        let (mut tx, mut rx) = route_pair();

        Package::new(1, 2, 3, &[9, 8, 7]).send_over(&mut tx).unwrap();
        assert_eq!(rx.available(), 8 + 3);

        let mut bytes = [0u8; 11];
        assert_eq!(rx.read(&mut bytes), 11);
        assert_eq!(bytes, [0xaa, 8, 0, 0, 2, 1, 3, 0, 9, 8, 7]);
    }

    #[test]
    fn encode_decode_round_trips() {
        let (mut tx, mut rx) = route_pair();

        Package::new(11, 22, 33, b"payload").send_over(&mut tx).unwrap();

        let package = Package::read_from(&mut rx).unwrap().unwrap();
        assert_eq!(package.from(), 11);
        assert_eq!(package.to(), 22);
        assert_eq!(package.package_type(), 33);
        assert_eq!(package.payload(), b"payload");
        assert_eq!(package.via(), Some(rx.id()));
    }

    #[test]
    fn boundary_address_values_survive_the_frame() {
        let (mut tx, mut rx) = route_pair();

        for (from, to, package_type) in [(0, 0, 0), (255, 255, 251), (1, 254, 127)] {
            Package::new(from, to, package_type, &[]).send_over(&mut tx).unwrap();
            let package = Package::read_from(&mut rx).unwrap().unwrap();
            assert_eq!((package.from(), package.to(), package.package_type()), (from, to, package_type));
        }
    }

    #[test]
    fn empty_payload_frames_and_delivers() {
        let (mut tx, mut rx) = route_pair();

        Package::new(1, 2, 0, &[]).send_over(&mut tx).unwrap();

        let package = Package::read_from(&mut rx).unwrap().unwrap();
        assert!(package.payload().is_empty());
    }

    #[test]
    fn oversized_payload_fails_cleanly() {
        let (mut tx, mut rx) = route_pair();

        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let result = Package::new(1, 2, 0, &payload).send_over(&mut tx);
        assert!(matches!(result, Err(WeftError::PayloadTooLarge(_))));
        assert_eq!(rx.available(), 0);

        let payload = vec![0u8; MAX_PAYLOAD_SIZE];
        Package::new(1, 2, 0, &payload).send_over(&mut tx).unwrap();
        let package = Package::read_from(&mut rx).unwrap().unwrap();
        assert_eq!(package.payload().len(), MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn partial_frame_waits_and_resumes_identically() {
        let (near, mut far) = LoopbackConnection::pair();
        let mut rx =
            LocalTransportRoute::new(Box::new(near), "loopback", "", RouteTimings::default());

        // Frame for payload [5, 6]: 8 header bytes plus the payload.
        let frame = [0xaa, 7, 0, 0, 2, 1, 3, 0, 5, 6];

        far.write(&frame[..4]);
        assert!(Package::read_from(&mut rx).unwrap().is_none());
        assert_eq!(rx.meta().wait_size, 7 + PRE_HEADER_SIZE);

        // Start byte and length were put back; availability counts them again.
        assert_eq!(rx.available(), 4);

        far.write(&frame[4..]);
        let package = Package::read_from(&mut rx).unwrap().unwrap();
        assert_eq!(package.payload(), &[5, 6]);
        assert_eq!(rx.meta().wait_size, 0);
    }

    #[test]
    fn resync_skips_keepalive_zeros_and_corrupt_bytes() {
        let (near, mut far) = LoopbackConnection::pair();
        let mut rx =
            LocalTransportRoute::new(Box::new(near), "loopback", "", RouteTimings::default());

        far.write(&[0x00, 0x00]);
        let mut tx_frame = vec![0xaa, 6, 0, 0, 2, 1, 3, 0, 42];
        far.write(&tx_frame);

        let package = Package::read_from(&mut rx).unwrap().unwrap();
        assert_eq!(package.payload(), &[42]);

        far.write(&[0x11]);
        tx_frame[8] = 43;
        far.write(&tx_frame);

        let package = Package::read_from(&mut rx).unwrap().unwrap();
        assert_eq!(package.payload(), &[43]);
    }
}
