//! Result of a completed negotiation exchange.

use crate::catalog::{DelegationRequirement, MechanismDescriptor};
use crate::codec::{IdentityClaim, RejectReason};
use crate::error::{Result, SecError};

/// Whether the exchange selected a mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStatus {
    /// A mechanism was selected; the connection may proceed to authenticate.
    Accepted,
    /// The peers share no acceptable mechanism. The exchange itself
    /// completed cleanly.
    Rejected,
}

/// What a finished negotiation decided.
///
/// A rejection is a normal outcome, not an error: the exchange ran to
/// completion and both sides know why it failed. Callers that treat
/// rejection as fatal can collapse it with [`require_accepted`].
///
/// [`require_accepted`]: NegotiationOutcome::require_accepted
#[derive(Debug, Clone)]
pub struct NegotiationOutcome {
    /// Accepted or rejected.
    pub status: NegotiationStatus,
    /// The selected mechanism. `Some` iff accepted.
    pub mechanism: Option<MechanismDescriptor>,
    /// Resolved delegation mode. `Some` iff accepted.
    pub delegation: Option<DelegationRequirement>,
    /// Position of the selected mechanism in the requester's offered list.
    /// `Some` iff accepted.
    pub index_into_requester_list: Option<u32>,
    /// Authorization identity the client claimed, if any. Carried through
    /// unvalidated; the selected mechanism decides whether to honor it.
    pub identity_claim: Option<IdentityClaim>,
    /// The peer's candidate list, when the peer disclosed it (rejections
    /// only). Diagnostic; never auto-retried against.
    pub peer_candidates: Vec<String>,
    /// Why the exchange was rejected. `Some` iff rejected.
    pub failure_reason: Option<RejectReason>,
}

impl NegotiationOutcome {
    pub(crate) fn accepted(
        mechanism: MechanismDescriptor,
        delegation: DelegationRequirement,
        index_into_requester_list: u32,
        identity_claim: Option<IdentityClaim>,
    ) -> Self {
        Self {
            status: NegotiationStatus::Accepted,
            mechanism: Some(mechanism),
            delegation: Some(delegation),
            index_into_requester_list: Some(index_into_requester_list),
            identity_claim,
            peer_candidates: Vec::new(),
            failure_reason: None,
        }
    }

    pub(crate) fn rejected(
        reason: RejectReason,
        peer_candidates: Vec<String>,
        identity_claim: Option<IdentityClaim>,
    ) -> Self {
        Self {
            status: NegotiationStatus::Rejected,
            mechanism: None,
            delegation: None,
            index_into_requester_list: None,
            identity_claim,
            peer_candidates,
            failure_reason: Some(reason),
        }
    }

    /// Whether a mechanism was selected.
    pub fn is_accepted(&self) -> bool {
        self.status == NegotiationStatus::Accepted
    }

    /// Collapse rejection into an error, returning the selected mechanism
    /// and delegation mode on acceptance.
    pub fn require_accepted(self) -> Result<(MechanismDescriptor, DelegationRequirement)> {
        match (self.mechanism, self.delegation) {
            (Some(mechanism), Some(delegation)) => Ok((mechanism, delegation)),
            _ => {
                let reason = self
                    .failure_reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "rejected".to_string());
                Err(SecError::NotSupported(format!(
                    "no mutually acceptable mechanism ({reason}; peer offers {:?})",
                    self.peer_candidates
                )))
            }
        }
    }
}
