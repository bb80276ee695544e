//! UDP socket handed to the engine, counting the datagrams that cross it.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use rusty_enet::{PacketReceived, Socket, SocketOptions, MTU_MAX};
use tracing::trace;

use super::Statistics;

pub(crate) struct CountingSocket {
    socket: UdpSocket,
    statistics: Statistics,
}

impl CountingSocket {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            statistics: Statistics::default(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics
    }
}

impl Socket for CountingSocket {
    type Address = SocketAddr;
    type Error = io::Error;

    fn init(&mut self, options: SocketOptions) -> io::Result<()> {
        Socket::init(&mut self.socket, options)
    }

    fn send(&mut self, address: SocketAddr, buffer: &[u8]) -> io::Result<usize> {
        let sent = Socket::send(&mut self.socket, address, buffer)?;
        if sent > 0 {
            self.statistics.sent_data = self.statistics.sent_data.wrapping_add(sent as u32);
            self.statistics.sent_packets = self.statistics.sent_packets.wrapping_add(1);
            trace!(to = %address, len = sent, "datagram sent");
        }
        Ok(sent)
    }

    fn receive(
        &mut self,
        buffer: &mut [u8; MTU_MAX],
    ) -> io::Result<Option<(SocketAddr, PacketReceived)>> {
        let received = Socket::receive(&mut self.socket, buffer)?;
        if let Some((from, PacketReceived::Complete(len))) = &received {
            self.statistics.received_data = self.statistics.received_data.wrapping_add(*len as u32);
            self.statistics.received_packets = self.statistics.received_packets.wrapping_add(1);
            trace!(from = %from, len, "datagram received");
        }
        Ok(received)
    }
}
