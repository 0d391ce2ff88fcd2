//! Client side of the negotiation exchange.

use std::time::Duration;

use crate::catalog::{DelegationPreference, MechanismCatalog};
use crate::codec::{
    FlagGroup, IdentityClaim, NegotiationRequest, NegotiationResponse, ResponseBody, Tag,
    TokenCodec, FLAG_DELEG_FORBID, FLAG_DELEG_REQUIRE, MAX_IDENTITY_LEN, MAX_MECHANISM_LEN,
    NEGOTIATION_VERSION,
};
use crate::config::Config;
use crate::error::{Result, SecError};
use crate::transport::Connection;

use super::{requirement_from_flags, NegotiationOutcome, NegotiationState};
use crate::catalog::DelegationRequirement;

/// Drives one negotiation from the requesting side.
///
/// One-shot: [`negotiate`](Self::negotiate) consumes the value, so a
/// connection cannot be offered twice.
#[derive(Debug)]
pub struct ClientNegotiator {
    catalog: MechanismCatalog,
    preference: DelegationPreference,
    identity: Option<IdentityClaim>,
    timeout: Duration,
    codec: TokenCodec,
    state: NegotiationState,
}

impl ClientNegotiator {
    /// Build a negotiator with an explicit catalog and delegation stance.
    pub fn new(catalog: MechanismCatalog, preference: DelegationPreference) -> Self {
        Self {
            catalog,
            preference,
            identity: None,
            timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
            codec: TokenCodec::new(),
            state: NegotiationState::Idle,
        }
    }

    /// Build from configuration: catalog from environment/config/default,
    /// timeout from the config snapshot.
    pub fn from_config(config: &Config, preference: DelegationPreference) -> Result<Self> {
        let catalog = MechanismCatalog::client_catalog(config)?;
        Ok(Self::new(catalog, preference).with_timeout(config.timeout()))
    }

    /// Attach an authorization identity claim to the offer.
    pub fn with_identity(mut self, mechanism: impl Into<String>, name: impl Into<String>) -> Self {
        self.identity = Some(IdentityClaim {
            mechanism: mechanism.into(),
            name: name.into(),
        });
        self
    }

    /// Override the per-call socket timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current position in the exchange.
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Run the exchange: send the offer, block for the verdict.
    ///
    /// Returns `Ok` for both acceptance and a clean rejection; errors mean
    /// the exchange itself broke and the connection must be dropped.
    pub fn negotiate<C: Connection + ?Sized>(
        mut self,
        conn: &mut C,
    ) -> Result<NegotiationOutcome> {
        self.state = NegotiationState::Offering;

        // Hold the outgoing claim to the same bounds the parser enforces;
        // an over-long field would make every conforming peer abort the
        // exchange without answering.
        if let Some(claim) = &self.identity {
            if claim.mechanism.len() > MAX_MECHANISM_LEN {
                self.state = NegotiationState::Closed;
                return Err(SecError::Config(format!(
                    "identity mechanism {:?} exceeds {MAX_MECHANISM_LEN} bytes",
                    claim.mechanism
                )));
            }
            if claim.name.len() > MAX_IDENTITY_LEN {
                self.state = NegotiationState::Closed;
                return Err(SecError::Config(format!(
                    "identity name of {} bytes exceeds {MAX_IDENTITY_LEN}",
                    claim.name.len()
                )));
            }
        }

        let offered = self.catalog.filter_for_delegation(self.preference);
        if offered.is_empty() {
            self.state = NegotiationState::Closed;
            return Err(SecError::NotSupported(
                "no local mechanism satisfies the delegation preference".to_string(),
            ));
        }

        let request = NegotiationRequest {
            version: NEGOTIATION_VERSION,
            identity: self.identity.clone(),
            candidates: offered.ids(),
            flag_groups: vec![offer_flag_group(&offered, self.preference)],
        };
        tracing::debug!(
            candidates = ?request.candidates,
            preference = ?self.preference,
            "sending mechanism offer"
        );
        self.codec
            .send(conn, Tag::MechanismRequest, &request.encode(), self.timeout)?;

        self.state = NegotiationState::AwaitingPeer;
        let (tag, payload) = self.codec.receive(conn, self.timeout, &[])?;
        if tag != Tag::MechanismResponse {
            self.state = NegotiationState::Closed;
            return Err(SecError::BadPeerResponse(format!(
                "expected a mechanism response, got {tag:?}"
            )));
        }
        let response = NegotiationResponse::decode(&payload)?;

        let outcome = match response.body {
            ResponseBody::Accepted {
                index_into_requester_list,
                combined_flags,
            } => self.resolve_acceptance(&offered, index_into_requester_list, combined_flags)?,
            ResponseBody::Rejected {
                reason,
                candidates,
                flag_groups: _,
            } => {
                tracing::info!(%reason, peer_candidates = ?candidates, "offer rejected");
                NegotiationOutcome::rejected(reason, candidates, self.identity.clone())
            }
        };

        self.state = NegotiationState::Resolved;
        Ok(outcome)
    }

    /// Validate a success verdict against what was actually offered.
    fn resolve_acceptance(
        &mut self,
        offered: &MechanismCatalog,
        index: u32,
        combined_flags: u32,
    ) -> Result<NegotiationOutcome> {
        let descriptor = offered
            .descriptors()
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                self.state = NegotiationState::Closed;
                SecError::BadPeerResponse(format!(
                    "accepted index {index} out of range for {} offered mechanisms",
                    offered.len()
                ))
            })?;

        let delegation = requirement_from_flags(combined_flags).map_err(|e| {
            self.state = NegotiationState::Closed;
            e
        })?;

        // A verdict that contradicts our own stance, or activates
        // delegation on a mechanism we marked incapable, is a broken peer.
        let contradiction = match delegation {
            DelegationRequirement::Require => {
                self.preference == DelegationPreference::Forbid || !descriptor.can_delegate
            }
            DelegationRequirement::Forbid => self.preference == DelegationPreference::Require,
        };
        if contradiction {
            self.state = NegotiationState::Closed;
            return Err(SecError::BadPeerResponse(format!(
                "verdict {delegation:?} on {:?} contradicts local stance {:?}",
                descriptor.id, self.preference
            )));
        }

        tracing::info!(
            mechanism = %descriptor.id,
            ?delegation,
            index,
            "mechanism negotiated"
        );
        Ok(NegotiationOutcome::accepted(
            descriptor,
            delegation,
            index,
            self.identity.clone(),
        ))
    }
}

/// The single flag-group a requester emits over its offered list.
///
/// Requiring delegation covers every candidate (the list was pre-filtered
/// to delegation-capable entries); otherwise the group marks the entries
/// that cannot delegate.
pub(crate) fn offer_flag_group(
    offered: &MechanismCatalog,
    preference: DelegationPreference,
) -> FlagGroup {
    match preference {
        DelegationPreference::Require => FlagGroup {
            flags: FLAG_DELEG_REQUIRE,
            indices: (0..offered.len() as u32).collect(),
        },
        _ => FlagGroup {
            flags: FLAG_DELEG_FORBID,
            indices: offered
                .descriptors()
                .iter()
                .enumerate()
                .filter(|(_, d)| !d.can_delegate)
                .map(|(i, _)| i as u32)
                .collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MechanismDescriptor;
    use crate::codec::{RejectReason, HEADER_LEN, TOKEN_MAGIC};
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    /// Serves scripted response tokens and records everything written.
    struct MockPeer {
        serving: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl MockPeer {
        fn answering(response: &NegotiationResponse) -> Self {
            let payload = response.encode();
            let mut serving = VecDeque::new();
            serving.extend(TOKEN_MAGIC.to_be_bytes());
            serving.extend(Tag::MechanismResponse.as_u32().to_be_bytes());
            serving.extend((payload.len() as u32).to_be_bytes());
            serving.extend(payload.iter().copied());
            Self {
                serving,
                written: Vec::new(),
            }
        }

        fn sent_request(&self) -> NegotiationRequest {
            NegotiationRequest::decode(&self.written[HEADER_LEN..]).unwrap()
        }
    }

    impl Read for MockPeer {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.serving.len().min(buf.len());
            for b in buf.iter_mut().take(n) {
                *b = self.serving.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for MockPeer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connection for MockPeer {
        fn set_read_timeout(&mut self, _dur: Option<std::time::Duration>) -> io::Result<()> {
            Ok(())
        }

        fn set_write_timeout(&mut self, _dur: Option<std::time::Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    fn catalog() -> MechanismCatalog {
        MechanismCatalog::from_descriptors(vec![
            MechanismDescriptor::new("GSI", true),
            MechanismDescriptor::new("PLAIN", false),
        ])
        .unwrap()
    }

    fn accepted(index: u32, flags: u32) -> NegotiationResponse {
        NegotiationResponse {
            version: NEGOTIATION_VERSION,
            peer_options: 0,
            body: ResponseBody::Accepted {
                index_into_requester_list: index,
                combined_flags: flags,
            },
        }
    }

    #[test]
    fn test_accepted_outcome() {
        let mut peer = MockPeer::answering(&accepted(1, FLAG_DELEG_FORBID));
        let outcome = ClientNegotiator::new(catalog(), DelegationPreference::NoPreference)
            .negotiate(&mut peer)
            .unwrap();

        assert!(outcome.is_accepted());
        assert_eq!(outcome.mechanism.unwrap().id, "PLAIN");
        assert_eq!(outcome.delegation, Some(DelegationRequirement::Forbid));
        assert_eq!(outcome.index_into_requester_list, Some(1));

        // With no preference, the single emitted group marks the
        // non-delegating candidates.
        let request = peer.sent_request();
        assert_eq!(request.candidates, vec!["GSI", "PLAIN"]);
        assert_eq!(request.flag_groups.len(), 1);
        assert_eq!(request.flag_groups[0].flags, FLAG_DELEG_FORBID);
        assert_eq!(request.flag_groups[0].indices, vec![1]);
    }

    #[test]
    fn test_require_preference_filters_offer() {
        let mut peer = MockPeer::answering(&accepted(0, FLAG_DELEG_REQUIRE));
        let outcome = ClientNegotiator::new(catalog(), DelegationPreference::Require)
            .negotiate(&mut peer)
            .unwrap();

        assert_eq!(outcome.mechanism.unwrap().id, "GSI");
        assert_eq!(outcome.delegation, Some(DelegationRequirement::Require));

        let request = peer.sent_request();
        // PLAIN cannot delegate and must not have been offered.
        assert_eq!(request.candidates, vec!["GSI"]);
        assert_eq!(request.flag_groups[0].flags, FLAG_DELEG_REQUIRE);
        assert_eq!(request.flag_groups[0].indices, vec![0]);
    }

    #[test]
    fn test_empty_filtered_offer_fails_before_sending() {
        let catalog = MechanismCatalog::from_descriptors(vec![MechanismDescriptor::new(
            "PLAIN", false,
        )])
        .unwrap();
        let mut peer = MockPeer::answering(&accepted(0, FLAG_DELEG_REQUIRE));
        let err = ClientNegotiator::new(catalog, DelegationPreference::Require)
            .negotiate(&mut peer)
            .unwrap_err();
        assert!(matches!(err, SecError::NotSupported(_)));
        assert!(peer.written.is_empty());
    }

    #[test]
    fn test_out_of_range_accepted_index() {
        let mut peer = MockPeer::answering(&accepted(5, FLAG_DELEG_FORBID));
        let err = ClientNegotiator::new(catalog(), DelegationPreference::NoPreference)
            .negotiate(&mut peer)
            .unwrap_err();
        assert!(matches!(err, SecError::BadPeerResponse(_)));
    }

    #[test]
    fn test_delegation_verdict_contradicting_stance() {
        // We forbade delegation; the peer must not require it.
        let mut peer = MockPeer::answering(&accepted(0, FLAG_DELEG_REQUIRE));
        let err = ClientNegotiator::new(catalog(), DelegationPreference::Forbid)
            .negotiate(&mut peer)
            .unwrap_err();
        assert!(matches!(err, SecError::BadPeerResponse(_)));
    }

    #[test]
    fn test_delegation_required_on_incapable_mechanism() {
        // Index 1 is PLAIN, which cannot delegate.
        let mut peer = MockPeer::answering(&accepted(1, FLAG_DELEG_REQUIRE));
        let err = ClientNegotiator::new(catalog(), DelegationPreference::NoPreference)
            .negotiate(&mut peer)
            .unwrap_err();
        assert!(matches!(err, SecError::BadPeerResponse(_)));
    }

    #[test]
    fn test_rejection_is_an_outcome_not_an_error() {
        let response = NegotiationResponse {
            version: NEGOTIATION_VERSION,
            peer_options: 0,
            body: ResponseBody::Rejected {
                reason: RejectReason::NotSupported,
                candidates: vec!["KRB5".to_string()],
                flag_groups: vec![],
            },
        };
        let mut peer = MockPeer::answering(&response);
        let outcome = ClientNegotiator::new(catalog(), DelegationPreference::NoPreference)
            .negotiate(&mut peer)
            .unwrap();

        assert!(!outcome.is_accepted());
        assert_eq!(outcome.failure_reason, Some(RejectReason::NotSupported));
        assert_eq!(outcome.peer_candidates, vec!["KRB5"]);
    }

    #[test]
    fn test_over_long_identity_fails_before_sending() {
        // A 300-byte claimed name would be encoded fine but rejected by
        // every conforming decoder; refuse it locally instead of putting
        // it on the wire.
        let mut peer = MockPeer::answering(&accepted(0, FLAG_DELEG_FORBID));
        let err = ClientNegotiator::new(catalog(), DelegationPreference::NoPreference)
            .with_identity("GSI", "x".repeat(300))
            .negotiate(&mut peer)
            .unwrap_err();
        assert!(matches!(err, SecError::Config(_)));
        assert!(peer.written.is_empty());
    }

    #[test]
    fn test_over_long_identity_mechanism_fails_before_sending() {
        let mut peer = MockPeer::answering(&accepted(0, FLAG_DELEG_FORBID));
        let err = ClientNegotiator::new(catalog(), DelegationPreference::NoPreference)
            .with_identity("THIS-MECHANISM-ID-IS-FAR-TOO-LONG", "alice")
            .negotiate(&mut peer)
            .unwrap_err();
        assert!(matches!(err, SecError::Config(_)));
        assert!(peer.written.is_empty());
    }

    #[test]
    fn test_identity_claim_travels_in_request() {
        let mut peer = MockPeer::answering(&accepted(0, FLAG_DELEG_FORBID));
        let outcome = ClientNegotiator::new(catalog(), DelegationPreference::NoPreference)
            .with_identity("GSI", "/DC=org/CN=alice")
            .negotiate(&mut peer)
            .unwrap();

        let request = peer.sent_request();
        let claim = request.identity.unwrap();
        assert_eq!(claim.mechanism, "GSI");
        assert_eq!(claim.name, "/DC=org/CN=alice");
        assert_eq!(outcome.identity_claim.unwrap().name, "/DC=org/CN=alice");
    }

    #[test]
    fn test_wrong_response_tag() {
        // Peer echoes a request token where a response belongs.
        let mut peer = MockPeer::answering(&accepted(0, FLAG_DELEG_FORBID));
        // Rewrite the tag in the scripted stream.
        let mut bytes: Vec<u8> = peer.serving.iter().copied().collect();
        bytes[4..8].copy_from_slice(&Tag::MechanismRequest.as_u32().to_be_bytes());
        peer.serving = bytes.into_iter().collect();

        let err = ClientNegotiator::new(catalog(), DelegationPreference::NoPreference)
            .negotiate(&mut peer)
            .unwrap_err();
        assert!(matches!(err, SecError::BadPeerResponse(_)));
    }
}
