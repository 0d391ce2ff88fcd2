//! Negotiation message codec.
//!
//! Serializes and deserializes the Request/Response payloads carried inside
//! tokens. Both messages are flat field sequences (see the module docs in
//! [`crate::codec`] for the byte layout); all of it is attacker-influenced
//! input, so every count is capped, every string bounded, and every index
//! range-checked before anything is allocated or resolved.
//!
//! Delegation is expressed with per-candidate flag-groups: a bitmask plus
//! the candidate indices it applies to. Encoders here only ever emit a
//! single group, but the parser accepts any number (including zero) for
//! cross-implementation tolerance.

use bytes::BytesMut;

use super::wire::{self, WireReader};
use crate::catalog::DelegationPreference;
use crate::error::{Result, SecError};

/// Maximum length of a mechanism id, in bytes.
pub const MAX_MECHANISM_LEN: usize = 16;

/// Maximum length of an authorization identity name, in bytes.
pub const MAX_IDENTITY_LEN: usize = 256;

/// Cap on candidate-list and flag-index counts.
///
/// An untrusted length field is never allowed to drive an allocation larger
/// than this.
pub const MAX_LIST_LEN: usize = 1024;

/// Negotiation message version.
pub const NEGOTIATION_VERSION: i32 = 1;

/// Status literal carried in a success Response.
///
/// A literal string rather than a numeric code, to keep cross-implementation
/// interop simple.
pub const STATUS_ACCEPTED: &str = "OK";

/// Status literal carried in a failure Response.
pub const STATUS_REJECTED: &str = "NOK";

/// Bound on the status literal when parsing.
const MAX_STATUS_LEN: usize = 8;

/// Flag bit: delegation is required for the candidates the group covers.
pub const FLAG_DELEG_REQUIRE: u32 = 0x1;

/// Flag bit: the candidates the group covers cannot delegate.
pub const FLAG_DELEG_FORBID: u32 = 0x2;

/// Client-claimed authorization identity.
///
/// A pre-assertion carried through negotiation; never validated here. The
/// chosen mechanism's own exchange is responsible for deciding whether the
/// authenticated party may act as this identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaim {
    /// Mechanism the claimed name is expressed in.
    pub mechanism: String,
    /// Claimed identity name.
    pub name: String,
}

/// A delegation flags bitmask plus the candidate indices it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagGroup {
    /// Bitmask of `FLAG_DELEG_*` bits.
    pub flags: u32,
    /// Indices into the accompanying candidate list.
    pub indices: Vec<u32>,
}

/// Reason code carried in a failure Response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No mutually acceptable mechanism.
    NotSupported,
    /// A reason code this implementation does not know.
    Other(i32),
}

impl RejectReason {
    /// Wire encoding of the reason.
    pub fn as_i32(self) -> i32 {
        match self {
            RejectReason::NotSupported => 1,
            RejectReason::Other(code) => code,
        }
    }

    /// Decode a wire reason code. Unknown codes are preserved, not rejected:
    /// the exchange is already failing and the code is purely diagnostic.
    pub fn from_i32(code: i32) -> Self {
        match code {
            1 => RejectReason::NotSupported,
            other => RejectReason::Other(other),
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NotSupported => write!(f, "not supported"),
            RejectReason::Other(code) => write!(f, "unknown reason {code}"),
        }
    }
}

/// The Request payload: the requester's offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRequest {
    /// Message version (recorded, not enforced; only one version exists).
    pub version: i32,
    /// Optional authorization identity claim.
    pub identity: Option<IdentityClaim>,
    /// Offered mechanism ids, in preference order.
    pub candidates: Vec<String>,
    /// Delegation flag-groups over `candidates`.
    pub flag_groups: Vec<FlagGroup>,
}

impl NegotiationRequest {
    /// Serialize into a fresh payload buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64);
        wire::put_i32(&mut buf, self.version);
        match &self.identity {
            Some(claim) => {
                wire::put_i32(&mut buf, 1);
                wire::put_string(&mut buf, &claim.mechanism);
                wire::put_string(&mut buf, &claim.name);
            }
            None => wire::put_i32(&mut buf, 0),
        }
        wire::put_i32(&mut buf, self.candidates.len() as i32);
        for id in &self.candidates {
            wire::put_string(&mut buf, id);
        }
        put_flag_groups(&mut buf, &self.flag_groups);
        buf
    }

    /// Parse an untrusted Request payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);

        let version = r.read_i32()?;
        if version < 0 {
            return Err(SecError::BadPeerResponse(format!(
                "negative message version {version}"
            )));
        }

        let identity = match r.read_i32()? {
            0 => None,
            1 => Some(IdentityClaim {
                mechanism: r.read_string(MAX_MECHANISM_LEN, "identity mechanism")?,
                name: r.read_string(MAX_IDENTITY_LEN, "identity name")?,
            }),
            other => {
                return Err(SecError::BadPeerResponse(format!(
                    "identity flag must be 0 or 1, got {other}"
                )))
            }
        };

        let count = read_count(&mut r, "candidate count")?;
        let mut candidates = Vec::with_capacity(count);
        for _ in 0..count {
            candidates.push(r.read_string(MAX_MECHANISM_LEN, "mechanism id")?);
        }

        let flag_groups = read_flag_groups(&mut r, count)?;
        r.finish()?;

        Ok(Self {
            version,
            identity,
            candidates,
            flag_groups,
        })
    }

    /// Resolve the flag-groups into one delegation stance per candidate.
    ///
    /// An index flagged both REQUIRE and FORBID (in one group or across
    /// groups) is self-contradictory and rejected.
    pub fn candidate_stances(&self) -> Result<Vec<DelegationPreference>> {
        let n = self.candidates.len();
        let mut requires = vec![false; n];
        let mut forbids = vec![false; n];

        for group in &self.flag_groups {
            for &idx in &group.indices {
                // decode() already range-checked every index
                let idx = idx as usize;
                if group.flags & FLAG_DELEG_REQUIRE != 0 {
                    requires[idx] = true;
                }
                if group.flags & FLAG_DELEG_FORBID != 0 {
                    forbids[idx] = true;
                }
            }
        }

        let mut stances = Vec::with_capacity(n);
        for i in 0..n {
            stances.push(match (requires[i], forbids[i]) {
                (true, true) => {
                    return Err(SecError::BadPeerResponse(format!(
                        "contradictory delegation flags for candidate {i}"
                    )))
                }
                (true, false) => DelegationPreference::Require,
                (false, true) => DelegationPreference::Forbid,
                (false, false) => DelegationPreference::NoPreference,
            });
        }
        Ok(stances)
    }
}

/// Body of a Response: the responder's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// A mechanism was selected.
    Accepted {
        /// Index into the *requester's* candidate list, in the order it was
        /// sent. Never an index into the responder's own catalog.
        index_into_requester_list: u32,
        /// Combined delegation flags: exactly one of `FLAG_DELEG_REQUIRE` /
        /// `FLAG_DELEG_FORBID`.
        combined_flags: u32,
    },
    /// No mechanism was selected.
    Rejected {
        /// Why the responder refused.
        reason: RejectReason,
        /// The responder's own candidate list, informational only. This
        /// design does not auto-retry against it.
        candidates: Vec<String>,
        /// Delegation flag-groups over the responder's list.
        flag_groups: Vec<FlagGroup>,
    },
}

/// The Response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationResponse {
    /// Message version (recorded, not enforced).
    pub version: i32,
    /// Responder option bits. Reserved; always 0 from this implementation.
    pub peer_options: u32,
    /// Verdict.
    pub body: ResponseBody,
}

impl NegotiationResponse {
    /// Serialize into a fresh payload buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64);
        wire::put_i32(&mut buf, self.version);
        wire::put_i32(&mut buf, self.peer_options as i32);
        match &self.body {
            ResponseBody::Accepted {
                index_into_requester_list,
                combined_flags,
            } => {
                wire::put_string(&mut buf, STATUS_ACCEPTED);
                wire::put_i32(&mut buf, *index_into_requester_list as i32);
                wire::put_i32(&mut buf, *combined_flags as i32);
            }
            ResponseBody::Rejected {
                reason,
                candidates,
                flag_groups,
            } => {
                wire::put_string(&mut buf, STATUS_REJECTED);
                wire::put_i32(&mut buf, reason.as_i32());
                wire::put_i32(&mut buf, candidates.len() as i32);
                for id in candidates {
                    wire::put_string(&mut buf, id);
                }
                put_flag_groups(&mut buf, flag_groups);
            }
        }
        buf
    }

    /// Parse an untrusted Response payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);

        let version = r.read_i32()?;
        if version < 0 {
            return Err(SecError::BadPeerResponse(format!(
                "negative message version {version}"
            )));
        }
        let peer_options = r.read_i32()? as u32;

        let status = r.read_string(MAX_STATUS_LEN, "status literal")?;
        let body = match status.as_str() {
            STATUS_ACCEPTED => {
                let index = r.read_i32()?;
                if index < 0 {
                    return Err(SecError::BadPeerResponse(format!(
                        "negative accepted index {index}"
                    )));
                }
                let combined_flags = r.read_i32()? as u32;
                ResponseBody::Accepted {
                    index_into_requester_list: index as u32,
                    combined_flags,
                }
            }
            STATUS_REJECTED => {
                let reason = RejectReason::from_i32(r.read_i32()?);
                let count = read_count(&mut r, "candidate count")?;
                let mut candidates = Vec::with_capacity(count);
                for _ in 0..count {
                    candidates.push(r.read_string(MAX_MECHANISM_LEN, "mechanism id")?);
                }
                let flag_groups = read_flag_groups(&mut r, count)?;
                ResponseBody::Rejected {
                    reason,
                    candidates,
                    flag_groups,
                }
            }
            other => {
                return Err(SecError::BadPeerResponse(format!(
                    "unknown status literal {other:?}"
                )))
            }
        };
        r.finish()?;

        Ok(Self {
            version,
            peer_options,
            body,
        })
    }
}

/// Read a non-negative count capped at [`MAX_LIST_LEN`].
fn read_count(r: &mut WireReader<'_>, what: &str) -> Result<usize> {
    let v = r.read_i32()?;
    if v < 0 {
        return Err(SecError::BadPeerResponse(format!("negative {what} {v}")));
    }
    let v = v as usize;
    if v > MAX_LIST_LEN {
        return Err(SecError::BadPeerResponse(format!(
            "{what} {v} exceeds cap {MAX_LIST_LEN}"
        )));
    }
    Ok(v)
}

fn put_flag_groups(buf: &mut BytesMut, groups: &[FlagGroup]) {
    wire::put_i32(buf, groups.len() as i32);
    for group in groups {
        wire::put_i32(buf, group.flags as i32);
        wire::put_i32(buf, group.indices.len() as i32);
        for &idx in &group.indices {
            wire::put_i32(buf, idx as i32);
        }
    }
}

/// Read flag-groups, range-checking every index against `candidate_count`.
fn read_flag_groups(r: &mut WireReader<'_>, candidate_count: usize) -> Result<Vec<FlagGroup>> {
    let group_count = read_count(r, "flag-group count")?;
    let mut groups = Vec::with_capacity(group_count);
    for _ in 0..group_count {
        let flags = r.read_i32()? as u32;
        if flags & FLAG_DELEG_REQUIRE != 0 && flags & FLAG_DELEG_FORBID != 0 {
            return Err(SecError::BadPeerResponse(
                "flag-group both requires and forbids delegation".to_string(),
            ));
        }
        let index_count = read_count(r, "flag-group index count")?;
        let mut indices = Vec::with_capacity(index_count);
        for _ in 0..index_count {
            let idx = r.read_i32()?;
            if idx < 0 || idx as usize >= candidate_count {
                return Err(SecError::BadPeerResponse(format!(
                    "flag index {idx} out of range for {candidate_count} candidates"
                )));
            }
            indices.push(idx as u32);
        }
        groups.push(FlagGroup { flags, indices });
    }
    Ok(groups)
}
