//! Route netlink socket.
//!
//! Requests are synchronous: every call sends one message and reads until
//! the kernel's acknowledgement or the end of the dump.

use crate::messages::{LinkMessage, RouteMessage};
use common::{Error, Result};
use netlink_packet_core::{
    NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage, NetlinkPayload,
};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use std::io;
use tracing::{debug, trace};

const RECV_BUF_LEN: usize = 64 * 1024;

/// Netlink socket for link and bridge operations
pub struct RtnlSocket {
    socket: Socket,
    sequence: u32,
}

impl RtnlSocket {
    pub fn new() -> Result<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| Error::netlink(format!("Failed to create netlink socket: {}", e)))?;
        socket
            .bind(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("Failed to bind netlink socket: {}", e)))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("Failed to connect netlink socket: {}", e)))?;

        debug!("Route netlink socket open");
        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn send(&mut self, payload: RouteMessage, flags: u16) -> Result<u32> {
        let sequence = self.next_sequence();
        let mut message = NetlinkMessage::new(
            NetlinkHeader::default(),
            NetlinkPayload::InnerMessage(payload),
        );
        message.header.flags = flags;
        message.header.sequence_number = sequence;
        message.finalize();

        let mut buf = vec![0u8; message.buffer_len()];
        message.serialize(&mut buf);
        trace!(?message, "Sending netlink message");

        self.socket
            .send(&buf, 0)
            .map_err(|e| Error::netlink(format!("Failed to send netlink message: {}", e)))?;
        Ok(sequence)
    }

    /// Read one datagram, which may carry several messages
    fn receive(&mut self) -> Result<Vec<NetlinkMessage<RouteMessage>>> {
        let mut buf = Vec::with_capacity(RECV_BUF_LEN);
        let len = self
            .socket
            .recv(&mut buf, 0)
            .map_err(|e| Error::netlink(format!("Failed to receive netlink message: {}", e)))?;

        let mut messages = Vec::new();
        let mut offset = 0;
        while offset < len {
            let message = NetlinkMessage::<RouteMessage>::deserialize(&buf[offset..len])
                .map_err(|e| Error::netlink(format!("Failed to parse netlink message: {}", e)))?;
            let msg_len = message.header.length as usize;
            if msg_len == 0 {
                break;
            }
            trace!(?message, "Received netlink message");
            messages.push(message);
            offset += msg_len.div_ceil(4) * 4;
        }
        Ok(messages)
    }

    /// Send a request and wait for its acknowledgement
    pub fn request(&mut self, payload: RouteMessage) -> Result<()> {
        let sequence = self.send(payload, NLM_F_REQUEST | NLM_F_ACK)?;
        loop {
            for message in self.receive()? {
                if message.header.sequence_number != sequence {
                    continue;
                }
                if let NetlinkPayload::Error(err) = message.payload {
                    return match err.code {
                        None => Ok(()),
                        Some(code) => Err(Error::netlink(io::Error::from_raw_os_error(
                            -code.get(),
                        ))),
                    };
                }
            }
        }
    }

    /// Send a request expecting exactly one link in reply
    pub fn get_link(&mut self, payload: RouteMessage) -> Result<LinkMessage> {
        let sequence = self.send(payload, NLM_F_REQUEST)?;
        loop {
            for message in self.receive()? {
                if message.header.sequence_number != sequence {
                    continue;
                }
                match message.payload {
                    NetlinkPayload::InnerMessage(RouteMessage::NewLink(link)) => return Ok(link),
                    NetlinkPayload::Error(err) => {
                        return Err(Error::netlink(match err.code {
                            Some(code) => io::Error::from_raw_os_error(-code.get()).to_string(),
                            None => "empty link reply".to_string(),
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    /// Send a dump request and collect every link in the reply
    pub fn dump_links(&mut self, payload: RouteMessage) -> Result<Vec<LinkMessage>> {
        let sequence = self.send(payload, NLM_F_REQUEST | NLM_F_DUMP)?;
        let mut links = Vec::new();
        loop {
            for message in self.receive()? {
                if message.header.sequence_number != sequence {
                    continue;
                }
                match message.payload {
                    NetlinkPayload::InnerMessage(RouteMessage::NewLink(link)) => links.push(link),
                    NetlinkPayload::Done(_) => return Ok(links),
                    NetlinkPayload::Error(err) => {
                        if let Some(code) = err.code {
                            return Err(Error::netlink(io::Error::from_raw_os_error(-code.get())));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}
