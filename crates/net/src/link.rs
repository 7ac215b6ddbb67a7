//! One framed stream connection
//!
//! Pairs a [`StreamSocket`] with the receive accumulator and an outbound
//! queue. Outgoing frames are queued whole and flushed as far as the socket
//! accepts; whatever is left (would-block, partial write, connect still in
//! progress) goes out on a later flush, so frames are never interleaved or
//! cut short.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::frame::{write_frame, FrameDecoder, FrameError};
use crate::protocol::Packet;
use crate::transport::{Attempt, StreamSocket};

/// Result of one bounded receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// No data available right now
    Idle,
    /// Bytes were appended to the accumulator
    Received(usize),
    /// Peer closed or the socket failed; the link is now closed
    Closed,
}

pub struct StreamLink<S> {
    stream: Option<S>,
    decoder: FrameDecoder,
    outbound: BytesMut,
    recv_buf: Vec<u8>,
    max_backlog: usize,
}

impl<S: StreamSocket> StreamLink<S> {
    pub fn new(stream: S, recv_buffer_size: usize, max_backlog: usize) -> Self {
        Self {
            stream: Some(stream),
            decoder: FrameDecoder::new(),
            outbound: BytesMut::new(),
            recv_buf: vec![0u8; recv_buffer_size.max(1)],
            max_backlog,
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Drop the socket and everything buffered for it
    pub fn close(&mut self) {
        self.stream = None;
        self.decoder.clear();
        self.outbound.clear();
    }

    /// Unsent outbound bytes
    pub fn backlog(&self) -> usize {
        self.outbound.len()
    }

    /// Frame and queue a packet, then flush what the socket accepts
    pub fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.send_encoded(&packet.encode())
    }

    /// Queue an already encoded packet (used for fan-out)
    pub fn send_encoded(&mut self, packet: &Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }

        write_frame(&mut self.outbound, packet)?;
        self.flush()?;

        if self.outbound.len() > self.max_backlog {
            let queued = self.outbound.len();
            debug!(queued = queued, "Peer is not draining its stream");
            self.close();
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("outbound backlog of {} bytes exceeded", queued),
            )));
        }
        Ok(())
    }

    /// Push queued bytes into the socket. A hard error closes the link.
    pub fn flush(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::NotConnected);
        };

        while !self.outbound.is_empty() {
            match stream.send(&self.outbound) {
                Ok(Attempt::Ready(0)) | Ok(Attempt::WouldBlock) => break,
                Ok(Attempt::Ready(n)) => {
                    trace!(bytes = n, "Flushed");
                    self.outbound.advance(n);
                }
                Err(e) => {
                    self.close();
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// One bounded, non-blocking read into the accumulator
    pub fn receive(&mut self) -> RecvOutcome {
        let Some(stream) = self.stream.as_mut() else {
            return RecvOutcome::Closed;
        };

        match stream.recv(&mut self.recv_buf) {
            Ok(Attempt::WouldBlock) => RecvOutcome::Idle,
            Ok(Attempt::Ready(0)) => {
                debug!("Peer closed stream");
                self.close();
                RecvOutcome::Closed
            }
            Ok(Attempt::Ready(n)) => {
                self.decoder.extend(&self.recv_buf[..n]);
                RecvOutcome::Received(n)
            }
            Err(e) => {
                debug!(error = %e, "Stream receive failed");
                self.close();
                RecvOutcome::Closed
            }
        }
    }

    /// Next whole packet from the accumulator
    pub fn next_frame(&mut self) -> std::result::Result<Option<Bytes>, FrameError> {
        self.decoder.next_frame()
    }
}
