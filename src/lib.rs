//! # secneg - Security Mechanism Negotiation
//!
//! Per-connection negotiation of an authentication mechanism between two
//! peers, plus the framed token transport the subsequent authentication
//! exchange rides on. One blocking request/response round decides which
//! mechanism both sides will use and whether credential delegation is
//! active; the mechanisms themselves (GSI, KRB5, ...) live elsewhere.
//!
//! ## Protocol Overview
//!
//! ```text
//! Client                                        Server
//!    |                                             |
//!    |-- MechanismRequest ------------------------>|
//!    |   (identity?, candidates, delegation flags) |
//!    |                                             | pick first acceptable
//!    |                                             | candidate, client order
//!    |<- MechanismResponse ------------------------|
//!    |   OK  (index, combined flags)               |
//!    |   NOK (reason, server's own list)           |
//!    |                                             |
//!    |====== chosen mechanism's exchange =========>|
//! ```
//!
//! ### Token Framing
//!
//! Every message travels inside a token: a 12-byte header (magic, tag,
//! payload length, all big-endian) followed by the payload. The magic
//! constant catches stream desynchronization early; the length is bounded
//! before any allocation. See [`codec`].
//!
//! ### State Machine
//!
//! Both negotiators are one-shot values consumed by their `negotiate`
//! call:
//!
//! ```text
//!     [Idle] ──> [Offering] ──> [AwaitingPeer] ──> [Resolved]
//!                    │                 │
//!                    └────── violation ┴──────────> [Closed]
//! ```
//!
//! A clean "no common mechanism" resolves to a rejected
//! [`NegotiationOutcome`], not an error; the server has already answered
//! the client on the wire when it reports one.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use secneg::{ClientNegotiator, DelegationPreference, MechanismCatalog};
//!
//! let config = secneg::Config::load()?;
//! let mut conn = std::net::TcpStream::connect("storage:5013")?;
//! let outcome = ClientNegotiator::from_config(&config, DelegationPreference::NoPreference)?
//!     .negotiate(&mut conn)?;
//! let (mechanism, delegation) = outcome.require_accepted()?;
//! ```
//!
//! On the server, pass any bytes a dispatcher already consumed from the
//! connection as the prefetch:
//!
//! ```rust,ignore
//! use secneg::{DelegationPreference, ServerNegotiator};
//!
//! let outcome = ServerNegotiator::from_config(&config, DelegationPreference::NoPreference, peer)?
//!     .negotiate(&mut conn, &prefetched)?;
//! ```

pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod negotiate;
pub mod transport;

pub use catalog::{
    merge_delegation, DelegationPreference, DelegationRequirement, MechanismCatalog,
    MechanismDescriptor,
};
pub use codec::{IdentityClaim, RejectReason, Tag, TokenCodec};
pub use config::Config;
pub use error::{Result, SecError};
pub use negotiate::{
    ClientNegotiator, NegotiationOutcome, NegotiationState, NegotiationStatus, ServerNegotiator,
};
pub use transport::Connection;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
