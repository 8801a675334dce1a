// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Datagram fan-out to downstream consumers.
//!
//! Everything leaves on one UDP socket aimed at a fixed local endpoint. Three
//! message shapes: short control strings at lifecycle points, one
//! notification packet per spill in the default mode, and the spill payload
//! itself, chunked, when shared-memory mode is on.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use daq_common::config::parse_env;

const ENV_BROADCAST_ADDR: &str = "DAQ_BROADCAST_ADDR";

/// Where downstream consumers listen.
pub const DEFAULT_BROADCAST_ADDR: &str = "127.0.0.1:5555";

/// Largest chunk payload, in words (16200 bytes on the wire).
pub const MAX_CHUNK_WORDS: usize = 4050;

/// Pacing gap between chunk datagrams, giving the receiver a scheduling
/// window.
const CHUNK_PACING: Duration = Duration::from_micros(1);

/// Lifecycle control strings.
///
/// Each datagram is a 4-byte LE declared length followed by the ASCII
/// command. The declared lengths are part of the downstream wire contract
/// and are not derived from the string: `$OPEN_FILE` declares 12 while
/// carrying 10 characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    OpenFile,
    CloseFile,
    KillSocket,
}

impl ControlMessage {
    pub fn text(&self) -> &'static str {
        match self {
            ControlMessage::OpenFile => "$OPEN_FILE",
            ControlMessage::CloseFile => "$CLOSE_FILE",
            ControlMessage::KillSocket => "$KILL_SOCKET",
        }
    }

    pub fn declared_len(&self) -> u32 {
        match self {
            ControlMessage::OpenFile => 12,
            ControlMessage::CloseFile => 12,
            ControlMessage::KillSocket => 13,
        }
    }
}

/// UDP sender bound to an ephemeral local port.
#[derive(Debug)]
pub struct BroadcastClient {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl BroadcastClient {
    /// Client aimed at the default endpoint, or `DAQ_BROADCAST_ADDR` when
    /// set.
    pub fn new() -> io::Result<Self> {
        let addr = parse_env::str_not_empty(ENV_BROADCAST_ADDR)
            .unwrap_or_else(|| DEFAULT_BROADCAST_ADDR.to_string());
        Self::to_addr(&addr)
    }

    pub fn to_addr(addr: &str) -> io::Result<Self> {
        let dest: SocketAddr = addr
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        Ok(Self { socket, dest })
    }

    pub fn dest(&self) -> SocketAddr {
        self.dest
    }

    pub fn send_raw(&self, bytes: &[u8]) -> io::Result<usize> {
        self.socket.send_to(bytes, self.dest)
    }

    pub fn send_control(&self, message: ControlMessage) -> io::Result<()> {
        let text = message.text().as_bytes();
        let mut datagram = Vec::with_capacity(4 + text.len());
        datagram.extend_from_slice(&message.declared_len().to_le_bytes());
        datagram.extend_from_slice(text);
        self.send_raw(&datagram)?;
        Ok(())
    }

    /// Ship a whole spill as chunked datagrams. Each datagram is
    /// `[chunkIndex (1-based), totalChunks, payload words]`, all 32-bit LE.
    /// Returns the number of datagrams sent.
    pub fn send_spill(&self, words: &[u32]) -> io::Result<usize> {
        if words.is_empty() {
            return Ok(0);
        }
        let total = words.len().div_ceil(MAX_CHUNK_WORDS);
        for (index, chunk) in words.chunks(MAX_CHUNK_WORDS).enumerate() {
            if index > 0 {
                thread::sleep(CHUNK_PACING);
            }
            let mut datagram = Vec::with_capacity(8 + chunk.len() * 4);
            datagram.extend_from_slice(&((index + 1) as u32).to_le_bytes());
            datagram.extend_from_slice(&(total as u32).to_le_bytes());
            for word in chunk {
                datagram.extend_from_slice(&word.to_le_bytes());
            }
            self.send_raw(&datagram)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    fn recv(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = vec![0u8; 65536];
        let (n, _) = socket.recv_from(&mut buf).unwrap();
        buf.truncate(n);
        buf
    }

    #[test]
    fn open_file_declares_twelve_sends_ten() {
        let (socket, addr) = receiver();
        let client = BroadcastClient::to_addr(&addr).unwrap();
        client.send_control(ControlMessage::OpenFile).unwrap();

        let datagram = recv(&socket);
        assert_eq!(datagram.len(), 4 + 10);
        assert_eq!(u32::from_le_bytes(datagram[..4].try_into().unwrap()), 12);
        assert_eq!(&datagram[4..], b"$OPEN_FILE");
    }

    #[test]
    fn kill_socket_wire_layout() {
        let (socket, addr) = receiver();
        let client = BroadcastClient::to_addr(&addr).unwrap();
        client.send_control(ControlMessage::KillSocket).unwrap();

        let datagram = recv(&socket);
        assert_eq!(u32::from_le_bytes(datagram[..4].try_into().unwrap()), 13);
        assert_eq!(&datagram[4..], b"$KILL_SOCKET");
    }

    #[test]
    fn spill_chunking_framing_and_reassembly() {
        let (socket, addr) = receiver();
        let client = BroadcastClient::to_addr(&addr).unwrap();

        let words: Vec<u32> = (0..9000).collect();
        let sent = client.send_spill(&words).unwrap();
        assert_eq!(sent, 3);

        let mut reassembled = Vec::new();
        for expect_index in 1..=3u32 {
            let datagram = recv(&socket);
            let index = u32::from_le_bytes(datagram[..4].try_into().unwrap());
            let total = u32::from_le_bytes(datagram[4..8].try_into().unwrap());
            assert_eq!(index, expect_index);
            assert_eq!(total, 3);
            for bytes in datagram[8..].chunks(4) {
                reassembled.push(u32::from_le_bytes(bytes.try_into().unwrap()));
            }
        }
        assert_eq!(reassembled, words);
        // 9000 = 4050 + 4050 + 900: the final chunk carries the remainder.
        assert_eq!(reassembled.len() % MAX_CHUNK_WORDS, 900);
    }

    #[test]
    fn empty_spill_sends_nothing() {
        let (_socket, addr) = receiver();
        let client = BroadcastClient::to_addr(&addr).unwrap();
        assert_eq!(client.send_spill(&[]).unwrap(), 0);
    }
}
