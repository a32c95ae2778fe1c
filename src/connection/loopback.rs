//! In-memory bidirectional byte pipe, mainly for tests and same-process
//! node meshes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub type SharedQueue = Arc<Mutex<VecDeque<u8>>>;

/// One end of an in-memory pipe. Writing on one end makes the bytes
/// readable on the other. Both ends of a pair may live on different
/// threads.
pub struct LoopbackConnection {
    write_queue: SharedQueue,
    read_queue: SharedQueue,
}

impl LoopbackConnection {
    /// Create both ends of a pipe.
    pub fn pair() -> (Self, Self) {
        let a_to_b: SharedQueue = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a: SharedQueue = Arc::new(Mutex::new(VecDeque::new()));

        (
            Self { write_queue: a_to_b.clone(), read_queue: b_to_a.clone() },
            Self { write_queue: b_to_a, read_queue: a_to_b },
        )
    }

}

impl super::Connection for LoopbackConnection {
    fn open(&mut self) -> bool {
        true
    }

    fn close(&mut self) -> bool {
        true
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut queue = self.read_queue.lock().unwrap();
        let mut copied = 0;

        while copied < buf.len() {
            match queue.pop_front() {
                Some(byte) => {
                    buf[copied] = byte;
                    copied += 1;
                }
                None => break,
            }
        }

        copied
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        self.write_queue.lock().unwrap().extend(buf.iter().copied());
        buf.len()
    }

    fn flush(&mut self) -> bool {
        true
    }

    fn clear(&mut self) -> bool {
        self.read_queue.lock().unwrap().clear();
        true
    }

    fn available(&mut self) -> usize {
        self.read_queue.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::super::Connection;
    use super::*;

    #[test]
    fn bytes_cross_the_pair_in_order() {
        let (mut a, mut b) = LoopbackConnection::pair();

        assert_eq!(a.write(&[1, 2, 3]), 3);
        assert_eq!(b.available(), 3);

        let mut buf = [0u8; 8];
        assert_eq!(b.read(&mut buf), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(b.available(), 0);
    }

    #[test]
    fn clear_drops_pending_input_only() {
        let (mut a, mut b) = LoopbackConnection::pair();

        a.write(&[9, 9]);
        b.write(&[7]);
        b.clear();

        assert_eq!(b.available(), 0);
        assert_eq!(a.available(), 1);
    }
}
