//! Centralized construction of signing messages.
//!
//! Every consensus signature covers a domain-separated byte string built
//! here, so signatures for one message kind can never be replayed as another.

use crate::{Hash, View};

/// Domain tag for block votes (and proposer signatures, which are votes).
pub const DOMAIN_VOTE: &[u8] = b"rondo.vote:";

/// Domain tag for timeout objects.
pub const DOMAIN_TIMEOUT: &[u8] = b"rondo.timeout:";

/// The message a replica signs when voting for `block_id` at `view`.
pub fn vote_message(view: View, block_id: &Hash) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_VOTE.len() + 8 + 32);
    message.extend_from_slice(DOMAIN_VOTE);
    message.extend_from_slice(&view.0.to_le_bytes());
    message.extend_from_slice(block_id.as_bytes());
    message
}

/// The message a replica signs when timing out `view` while knowing a QC for
/// `newest_qc_view`. Timeout certificates aggregate one such message per
/// signer.
pub fn timeout_message(view: View, newest_qc_view: View) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_TIMEOUT.len() + 16);
    message.extend_from_slice(DOMAIN_TIMEOUT);
    message.extend_from_slice(&view.0.to_le_bytes());
    message.extend_from_slice(&newest_qc_view.0.to_le_bytes());
    message
}
