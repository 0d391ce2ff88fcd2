//! Mechanism negotiation state machines.
//!
//! One request/response exchange decides, per connection, which
//! authentication mechanism both sides will use and whether credential
//! delegation is active. The client offers an ordered candidate list; the
//! server picks the first acceptable entry in the *client's* order and
//! answers with its index, or rejects with its own list for diagnostics.
//!
//! # State Machine
//!
//! Both negotiators move through the same states; each is a one-shot value
//! consumed by its `negotiate` call, so a connection can never be
//! negotiated twice.
//!
//! | State        | Meaning                                      |
//! |--------------|----------------------------------------------|
//! | Idle         | Built, nothing sent                          |
//! | Offering     | Composing/sending the local offer            |
//! | AwaitingPeer | Blocking on the peer's message               |
//! | Resolved     | Outcome produced (accepted or rejected)      |
//! | Closed       | Aborted; connection must be dropped          |
//!
//! A structural protocol violation (bad framing, malformed payload,
//! contradictory flags) moves to `Closed` and surfaces as an error. A
//! clean "no mutually acceptable mechanism" is NOT an error: it resolves
//! to a [`NegotiationOutcome`] with rejected status, after the server has
//! told the client so in a well-formed response.

mod client;
mod outcome;
mod server;

pub use client::ClientNegotiator;
pub use outcome::{NegotiationOutcome, NegotiationStatus};
pub use server::ServerNegotiator;

use crate::catalog::DelegationRequirement;
use crate::codec::{FLAG_DELEG_FORBID, FLAG_DELEG_REQUIRE};
use crate::error::{Result, SecError};

/// Where a negotiator is in its exchange. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Built, nothing sent yet.
    Idle,
    /// Composing and sending the local offer.
    Offering,
    /// Blocking on the peer's message.
    AwaitingPeer,
    /// Outcome produced.
    Resolved,
    /// Aborted after a protocol violation.
    Closed,
}

/// Wire encoding of a resolved delegation requirement.
pub(crate) fn requirement_to_flags(req: DelegationRequirement) -> u32 {
    match req {
        DelegationRequirement::Require => FLAG_DELEG_REQUIRE,
        DelegationRequirement::Forbid => FLAG_DELEG_FORBID,
    }
}

/// Decode a success response's combined flags.
///
/// Exactly one of the two delegation bits must be set; anything else means
/// the responder is broken or the stream is corrupt.
pub(crate) fn requirement_from_flags(flags: u32) -> Result<DelegationRequirement> {
    match (flags & FLAG_DELEG_REQUIRE != 0, flags & FLAG_DELEG_FORBID != 0) {
        (true, false) => Ok(DelegationRequirement::Require),
        (false, true) => Ok(DelegationRequirement::Forbid),
        _ => Err(SecError::BadPeerResponse(format!(
            "combined delegation flags {flags:#x} do not resolve delegation"
        ))),
    }
}
