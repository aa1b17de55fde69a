//! Header compression bridge
//!
//! The connection talks to QPACK only through this adapter: header lists go
//! in and field sections come out, instruction bytes received on the peer's
//! encoder and decoder streams are fed in, and instruction bytes for the
//! local encoder and decoder streams are drained out. The bridge also owns
//! the blocked-stream bookkeeping.

use bytes::Bytes;
use tracing::debug;

use crate::error::Result;
use crate::qpack::{Decoded, Decoder, Encoder};
use crate::types::{Nv, Settings, StreamId};

/// Adapter between the connection and the QPACK codec
#[derive(Debug)]
pub struct QpackBridge {
    encoder: Encoder,
    decoder: Decoder,
}

impl QpackBridge {
    /// Create a bridge from the local settings
    pub fn new(local: &Settings) -> Self {
        Self {
            encoder: Encoder::new(local.qpack_encoder_max_dtable_capacity),
            decoder: Decoder::new(
                local.qpack_max_dtable_capacity,
                local.qpack_blocked_streams,
                local.max_field_section_size,
            ),
        }
    }

    /// Apply the peer's SETTINGS to the encoder
    pub fn apply_peer_settings(&mut self, peer: &Settings) {
        self.encoder.apply_peer_settings(peer);
        debug!(capacity = self.encoder.capacity(), "QPACK encoder configured");
    }

    /// Compress a header list for `stream_id`
    pub fn encode(&mut self, stream_id: StreamId, headers: &[Nv<'_>]) -> Result<Bytes> {
        self.encoder.encode(stream_id, headers)
    }

    /// Decompress a field section received on `stream_id`
    pub fn decode(&mut self, stream_id: StreamId, block: &[u8]) -> Result<Decoded> {
        self.decoder.decode(stream_id, block)
    }

    /// Feed bytes from the peer's encoder stream
    pub fn recv_encoder_stream(&mut self, data: &[u8]) -> Result<()> {
        self.decoder.recv_encoder_stream(data)
    }

    /// Feed bytes from the peer's decoder stream
    pub fn recv_decoder_stream(&mut self, data: &[u8]) -> Result<()> {
        self.encoder.recv_decoder_stream(data)
    }

    /// Streams whose blocking inserts have now arrived, in blocking order
    pub fn take_unblocked(&mut self) -> Vec<StreamId> {
        self.decoder.take_unblocked()
    }

    /// Number of streams currently blocked
    pub fn blocked_streams(&self) -> usize {
        self.decoder.blocked_streams()
    }

    /// Abandon any decoding state for a stream
    pub fn cancel_stream(&mut self, stream_id: StreamId) {
        self.decoder.cancel_stream(stream_id);
    }

    /// Bytes for the local encoder stream
    pub fn take_encoder_instructions(&mut self) -> Option<Bytes> {
        self.encoder.take_instructions()
    }

    /// Bytes for the local decoder stream
    pub fn take_decoder_instructions(&mut self) -> Option<Bytes> {
        self.decoder.take_instructions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HeaderField;

    fn fields(decoded: Decoded) -> Vec<HeaderField> {
        match decoded {
            Decoded::Fields(fields) => fields,
            Decoded::Blocked => panic!("unexpected block"),
        }
    }

    #[test]
    fn test_static_only_roundtrip() {
        let settings = Settings::default();
        let mut client = QpackBridge::new(&settings);
        let mut server = QpackBridge::new(&settings);

        let headers = [Nv::from((":method", "GET")), Nv::from((":path", "/index"))];
        let block = client.encode(0, &headers).unwrap();
        let decoded = fields(server.decode(0, &block).unwrap());

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].name, ":method");
        assert_eq!(decoded[1].value, "/index");
        assert!(client.take_encoder_instructions().is_none());
    }

    #[test]
    fn test_dynamic_roundtrip_through_instruction_streams() {
        let settings = Settings::default();
        let mut client = QpackBridge::new(&settings);
        let mut server = QpackBridge::new(&settings);
        client.apply_peer_settings(&settings);

        let headers = [Nv::from(("x-trace", "abc123"))];
        let block = client.encode(0, &headers).unwrap();

        // The section arrives before the inserts
        assert_eq!(server.decode(0, &block).unwrap(), Decoded::Blocked);
        assert_eq!(server.blocked_streams(), 1);

        let inserts = client.take_encoder_instructions().unwrap();
        server.recv_encoder_stream(&inserts).unwrap();
        assert_eq!(server.take_unblocked(), vec![0]);

        let decoded = fields(server.decode(0, &block).unwrap());
        assert_eq!(decoded[0].value, "abc123");

        let acks = server.take_decoder_instructions().unwrap();
        client.recv_decoder_stream(&acks).unwrap();

        // Acknowledged entries are referenced without blocking
        let again = client.encode(4, &headers).unwrap();
        let decoded = fields(server.decode(4, &again).unwrap());
        assert_eq!(decoded[0].value, "abc123");
        assert_eq!(server.blocked_streams(), 0);
    }
}
