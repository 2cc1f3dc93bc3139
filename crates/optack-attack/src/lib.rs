pub mod ack;
pub mod client;

pub use ack::{ACK_BLOCK_LEN, encode_fabricated_ack, predicted_seq};
pub use client::{
    AttackClient, AttackError, AttackExit, AttackOutcome, AttackSession, AttackTotals, HANDSHAKE,
};
