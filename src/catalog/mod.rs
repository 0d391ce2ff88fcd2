//! Mechanism catalog and delegation policy.
//!
//! The catalog is the ordered list of authentication mechanisms one side is
//! willing to offer (client) or accept (server). It is resolved once per
//! negotiation from an immutable configuration snapshot: environment
//! override first, then the config-file entry, then a built-in default.
//! Order matters (it is preference order) and duplicates are preserved.
//!
//! The server-side lookup takes the peer address by contract. The shipped
//! policy ignores it, but the seam stays so a per-peer policy can be added
//! without touching callers.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::codec::message::MAX_MECHANISM_LEN;
use crate::config::Config;
use crate::error::{Result, SecError};

/// Environment override for the client's offered mechanisms.
pub const ENV_CLIENT_MECHANISMS: &str = "SECNEG_MECH";

/// Environment override for the mechanisms a server accepts from peers.
pub const ENV_SERVER_MECHANISMS: &str = "SECNEG_AUTH_MECH";

/// Built-in mechanism list used when neither environment nor config supply one.
pub const DEFAULT_MECHANISMS: &str = "GSI KRB5";

/// Mechanism ids whose built-in capability includes credential delegation.
const BUILTIN_DELEGATING: &[&str] = &["GSI", "KRB5"];

/// One named authentication mechanism known to this side.
///
/// Ids are matched exactly and case-sensitively during negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MechanismDescriptor {
    /// Short mechanism id, at most [`MAX_MECHANISM_LEN`] bytes.
    pub id: String,
    /// Whether the mechanism can delegate credentials downstream.
    pub can_delegate: bool,
}

impl MechanismDescriptor {
    /// Build a descriptor. Id bounds are enforced when lists are parsed.
    pub fn new(id: impl Into<String>, can_delegate: bool) -> Self {
        Self {
            id: id.into(),
            can_delegate,
        }
    }
}

/// What one side wants from delegation, before negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationPreference {
    /// Take whatever the peer and mechanism allow.
    #[default]
    NoPreference,
    /// Only accept an exchange with delegation active.
    Require,
    /// Only accept an exchange with delegation inactive.
    Forbid,
}

/// Delegation mode a completed negotiation resolved to.
///
/// There is no "don't care" here: once a mechanism is chosen, delegation is
/// either on or off for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationRequirement {
    /// Delegation is active.
    Require,
    /// Delegation is inactive.
    Forbid,
}

/// Merge the two sides' delegation stances.
///
/// Returns `None` when the stances are mutually exclusive (one side
/// requires, the other forbids). When neither side expresses a preference
/// the merge resolves to `Forbid`: delegation never activates implicitly.
///
/// |         | NoPref  | Require  | Forbid  |
/// |---------|---------|----------|---------|
/// | NoPref  | Forbid  | Require  | Forbid  |
/// | Require | Require | Require  | None    |
/// | Forbid  | Forbid  | None     | Forbid  |
pub fn merge_delegation(
    a: DelegationPreference,
    b: DelegationPreference,
) -> Option<DelegationRequirement> {
    use DelegationPreference::{Forbid, Require};
    match (a, b) {
        (Require, Forbid) | (Forbid, Require) => None,
        (Require, _) | (_, Require) => Some(DelegationRequirement::Require),
        _ => Some(DelegationRequirement::Forbid),
    }
}

/// Ordered set of mechanisms one side is willing to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MechanismCatalog {
    entries: Vec<MechanismDescriptor>,
}

impl MechanismCatalog {
    /// Build a catalog from an explicit descriptor list, bypassing
    /// environment and configuration. Used by callers embedding a fixed
    /// policy. Ids are held to the same bounds `parse` enforces, so a
    /// programmatic catalog can never offer an id no conforming peer
    /// would accept.
    pub fn from_descriptors(entries: Vec<MechanismDescriptor>) -> Result<Self> {
        for descriptor in &entries {
            validate_id(&descriptor.id)?;
        }
        Ok(Self { entries })
    }

    /// Resolve the client-side catalog: `SECNEG_MECH` environment override,
    /// else the `mechanisms` config entry, else the built-in default.
    pub fn client_catalog(config: &Config) -> Result<Self> {
        let (list, source) = lookup_list(
            ENV_CLIENT_MECHANISMS,
            config.negotiation.mechanisms.as_deref(),
        );
        tracing::debug!(source, mechanisms = %list, "client catalog");
        Self::parse(&list)
    }

    /// Resolve the server-side catalog of mechanisms accepted from a peer:
    /// `SECNEG_AUTH_MECH` environment override, else the
    /// `accepted_mechanisms` config entry, else the built-in default.
    ///
    /// `peer` is accepted for a future per-address policy; the current
    /// policy returns the same list for every peer.
    pub fn server_catalog(config: &Config, peer: Option<IpAddr>) -> Result<Self> {
        let (list, source) = lookup_list(
            ENV_SERVER_MECHANISMS,
            config.negotiation.accepted_mechanisms.as_deref(),
        );
        tracing::debug!(source, mechanisms = %list, ?peer, "server catalog");
        Self::parse(&list)
    }

    /// Parse a whitespace-separated mechanism list.
    ///
    /// Each entry is an id, optionally suffixed `+deleg` or `-deleg` to
    /// override the built-in delegation capability table.
    pub fn parse(list: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for raw in list.split_whitespace() {
            entries.push(parse_entry(raw)?);
        }
        Ok(Self { entries })
    }

    /// Entries in preference order, duplicates preserved.
    pub fn descriptors(&self) -> &[MechanismDescriptor] {
        &self.entries
    }

    /// Offered/accepted ids, in order.
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|d| d.id.clone()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply a delegation requirement: `Require` drops entries that cannot
    /// delegate; any other preference returns the catalog unchanged. Both
    /// sides apply this identically before offering.
    pub fn filter_for_delegation(&self, preference: DelegationPreference) -> Self {
        match preference {
            DelegationPreference::Require => Self {
                entries: self
                    .entries
                    .iter()
                    .filter(|d| d.can_delegate)
                    .cloned()
                    .collect(),
            },
            _ => self.clone(),
        }
    }
}

/// Env override, else config entry, else built-in default. Returns the list
/// and a label naming where it came from (for the catalog trace).
fn lookup_list(env_var: &str, config_entry: Option<&str>) -> (String, &'static str) {
    if let Ok(value) = std::env::var(env_var) {
        if !value.trim().is_empty() {
            return (value, "environment");
        }
    }
    if let Some(entry) = config_entry {
        if !entry.trim().is_empty() {
            return (entry.to_string(), "config");
        }
    }
    (DEFAULT_MECHANISMS.to_string(), "default")
}

fn parse_entry(raw: &str) -> Result<MechanismDescriptor> {
    let (id, delegate_override) = if let Some(id) = raw.strip_suffix("+deleg") {
        (id, Some(true))
    } else if let Some(id) = raw.strip_suffix("-deleg") {
        (id, Some(false))
    } else {
        (raw, None)
    };

    validate_id(id)?;
    let can_delegate = delegate_override.unwrap_or_else(|| BUILTIN_DELEGATING.contains(&id));
    Ok(MechanismDescriptor::new(id, can_delegate))
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(SecError::Config("empty mechanism id".to_string()));
    }
    if id.len() > MAX_MECHANISM_LEN {
        return Err(SecError::Config(format!(
            "mechanism id {id:?} exceeds {MAX_MECHANISM_LEN} bytes"
        )));
    }
    Ok(())
}
