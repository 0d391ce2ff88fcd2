//! Server side of the negotiation exchange.

use std::net::IpAddr;
use std::time::Duration;

use crate::catalog::{
    merge_delegation, DelegationPreference, DelegationRequirement, MechanismCatalog,
    MechanismDescriptor,
};
use crate::codec::{
    NegotiationRequest, NegotiationResponse, RejectReason, ResponseBody, Tag, TokenCodec,
    NEGOTIATION_VERSION,
};
use crate::config::Config;
use crate::error::{Result, SecError};
use crate::transport::Connection;

use super::client::offer_flag_group;
use super::{requirement_to_flags, NegotiationOutcome, NegotiationState};

/// Drives one negotiation from the responding side.
///
/// One-shot like the client. The responder always answers a well-formed
/// request, acceptance or rejection alike; only a structural violation
/// aborts without a response.
#[derive(Debug)]
pub struct ServerNegotiator {
    catalog: MechanismCatalog,
    preference: DelegationPreference,
    timeout: Duration,
    codec: TokenCodec,
    state: NegotiationState,
}

impl ServerNegotiator {
    /// Build a negotiator with an explicit catalog and delegation stance.
    pub fn new(catalog: MechanismCatalog, preference: DelegationPreference) -> Self {
        Self {
            catalog,
            preference,
            timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
            codec: TokenCodec::new(),
            state: NegotiationState::Idle,
        }
    }

    /// Build from configuration, resolving the accepted-mechanism catalog
    /// for `peer`.
    pub fn from_config(
        config: &Config,
        preference: DelegationPreference,
        peer: Option<IpAddr>,
    ) -> Result<Self> {
        let catalog = MechanismCatalog::server_catalog(config, peer)?;
        Ok(Self::new(catalog, preference).with_timeout(config.timeout()))
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

    /// Run the exchange: block for the peer's offer, answer with a verdict.
    ///
    /// `prefetched` holds any bytes a dispatching caller already consumed
    /// from the connection before handing it over; the first token is
    /// reassembled around them.
    ///
    /// Returns `Ok` for both acceptance and rejection: a rejection has
    /// already been answered on the wire when this returns. Errors mean the
    /// request was structurally invalid and nothing was sent back.
    pub fn negotiate<C: Connection + ?Sized>(
        mut self,
        conn: &mut C,
        prefetched: &[u8],
    ) -> Result<NegotiationOutcome> {
        self.state = NegotiationState::AwaitingPeer;

        let (tag, payload) = self.codec.receive(conn, self.timeout, prefetched)?;
        if tag != Tag::MechanismRequest {
            self.state = NegotiationState::Closed;
            return Err(SecError::BadPeerResponse(format!(
                "expected a mechanism request, got {tag:?}"
            )));
        }
        let request = NegotiationRequest::decode(&payload)?;
        let peer_stances = request.candidate_stances().map_err(|e| {
            self.state = NegotiationState::Closed;
            e
        })?;

        let acceptable = self.catalog.filter_for_delegation(self.preference);
        tracing::debug!(
            peer_candidates = ?request.candidates,
            acceptable = ?acceptable.ids(),
            "evaluating mechanism offer"
        );

        self.state = NegotiationState::Offering;
        match select(&request.candidates, &peer_stances, &acceptable, self.preference) {
            Some((index, descriptor, delegation)) => {
                let response = NegotiationResponse {
                    version: NEGOTIATION_VERSION,
                    peer_options: 0,
                    body: ResponseBody::Accepted {
                        index_into_requester_list: index,
                        combined_flags: requirement_to_flags(delegation),
                    },
                };
                self.codec
                    .send(conn, Tag::MechanismResponse, &response.encode(), self.timeout)?;

                tracing::info!(
                    mechanism = %descriptor.id,
                    ?delegation,
                    index,
                    "mechanism negotiated"
                );
                self.state = NegotiationState::Resolved;
                Ok(NegotiationOutcome::accepted(
                    descriptor,
                    delegation,
                    index,
                    request.identity,
                ))
            }
            None => {
                // Tell the peer before reporting locally: the client must
                // never be left to diagnose a silent close. The advertised
                // list always carries the forbid group over non-delegating
                // entries, whatever this side's own stance was.
                let response = NegotiationResponse {
                    version: NEGOTIATION_VERSION,
                    peer_options: 0,
                    body: ResponseBody::Rejected {
                        reason: RejectReason::NotSupported,
                        candidates: acceptable.ids(),
                        flag_groups: vec![offer_flag_group(
                            &acceptable,
                            DelegationPreference::NoPreference,
                        )],
                    },
                };
                self.codec
                    .send(conn, Tag::MechanismResponse, &response.encode(), self.timeout)?;

                tracing::info!(peer_candidates = ?request.candidates, "offer rejected");
                self.state = NegotiationState::Resolved;
                Ok(NegotiationOutcome::rejected(
                    RejectReason::NotSupported,
                    request.candidates,
                    request.identity,
                ))
            }
        }
    }
}

/// Pick the first peer candidate (in the peer's preference order) that this
/// side accepts with a resolvable delegation mode.
fn select(
    peer_candidates: &[String],
    peer_stances: &[DelegationPreference],
    acceptable: &MechanismCatalog,
    own_preference: DelegationPreference,
) -> Option<(u32, MechanismDescriptor, DelegationRequirement)> {
    for (index, (id, &peer_stance)) in peer_candidates.iter().zip(peer_stances).enumerate() {
        for descriptor in acceptable.descriptors() {
            if descriptor.id != *id {
                continue;
            }
            let own_stance = own_stance(descriptor, own_preference);
            if let Some(delegation) = merge_delegation(peer_stance, own_stance) {
                return Some((index as u32, descriptor.clone(), delegation));
            }
            // Stances conflict for this entry; a later duplicate with a
            // different capability may still match.
        }
    }
    None
}

/// This side's delegation stance for one catalog entry.
fn own_stance(
    descriptor: &MechanismDescriptor,
    preference: DelegationPreference,
) -> DelegationPreference {
    match preference {
        DelegationPreference::Require => DelegationPreference::Require,
        DelegationPreference::Forbid => DelegationPreference::Forbid,
        DelegationPreference::NoPreference if !descriptor.can_delegate => {
            DelegationPreference::Forbid
        }
        DelegationPreference::NoPreference => DelegationPreference::NoPreference,
    }
}
