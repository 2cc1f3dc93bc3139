use bytes::{BufMut, BytesMut};

/// Size of one fabricated acknowledgment block on the wire.
pub const ACK_BLOCK_LEN: usize = 20;

const ACK_PADDING: usize = ACK_BLOCK_LEN - 4;

/// Sequence number a fabricated ACK claims to have received:
/// `packets_sent * chunk_size * amplification`, modulo 2^32 like any TCP
/// sequence number.
pub fn predicted_seq(packets_sent: u64, chunk_size: usize, amplification: u32) -> u32 {
    packets_sent
        .wrapping_mul(chunk_size as u64)
        .wrapping_mul(u64::from(amplification)) as u32
}

/// Append one fabricated acknowledgment: big-endian sequence number followed
/// by zero padding.
pub fn encode_fabricated_ack(buf: &mut BytesMut, seq: u32) {
    buf.reserve(ACK_BLOCK_LEN);
    buf.put_u32(seq);
    buf.put_bytes(0, ACK_PADDING);
}
