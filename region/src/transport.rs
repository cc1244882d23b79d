//! Datagram output.
//!
//! The packet server never awaits a socket write; it hands each datagram to
//! a [`DatagramSink`], which either sends it immediately or reports an error.

use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;

pub trait DatagramSink: Send + Sync {
    fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<usize>;
}

impl DatagramSink for UdpSocket {
    /// Non-blocking; a full socket buffer surfaces as `WouldBlock`.
    fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.try_send_to(datagram, target)
    }
}

/// Records every datagram instead of sending it.
#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes later sends fail with `WouldBlock`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl DatagramSink for MemorySink {
    fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<usize> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "sink is failing"));
        }
        self.sent.lock().push((target, datagram.to_vec()));
        Ok(datagram.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_and_fails() {
        let sink = MemorySink::new();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(sink.send_to(&[1, 2, 3], addr).unwrap(), 3);
        assert_eq!(sink.len(), 1);

        sink.set_failing(true);
        assert!(sink.send_to(&[4], addr).is_err());

        let sent = sink.take();
        assert_eq!(sent, vec![(addr, vec![1, 2, 3])]);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_udp_socket_sink() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        DatagramSink::send_to(&a, b"ping", b.local_addr().unwrap()).unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }
}
