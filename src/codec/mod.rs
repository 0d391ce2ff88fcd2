//! Token framing and negotiation payload codecs.
//!
//! Everything this layer puts on the wire travels inside a *token*: a fixed
//! 12-byte header followed by a payload.
//!
//! # Wire Format
//!
//! ```text
//! offset 0  : magic   (4 bytes, big-endian, fixed constant)
//! offset 4  : tag     (4 bytes, big-endian; message kind)
//! offset 8  : length  (4 bytes, big-endian; payload byte count, never 0)
//! offset 12 : payload[length]
//! ```
//!
//! The magic constant detects stream desynchronization: if the first four
//! bytes of a token are wrong, nothing later in the stream can be trusted
//! and the connection must be dropped.
//!
//! The tag is decoded into the closed [`Tag`] enum exactly once, here at the
//! codec boundary; no raw tag integer is ever inspected past this module.
//!
//! # Payload Layouts
//!
//! Request, in order:
//!
//! ```text
//! version:i32
//! hasIdentity:i32 (0/1)  [ mechanism:string  name:string ]
//! count:i32              count x mechanismId:string
//! groupCount:i32         groupCount x (flags:i32, indexCount:i32,
//!                                      indexCount x index:i32)
//! ```
//!
//! Response, in order:
//!
//! ```text
//! version:i32  peerOptions:i32  status:string
//! success: acceptedIndex:i32  combinedFlags:i32
//! failure: reason:i32  count:i32  count x mechanismId:string
//!          groupCount:i32  groupCount x (flags, indexCount, indices)
//! ```
//!
//! Strings are `i32` length + UTF-8 bytes, each bounded by a fixed
//! configuration constant (not protocol-negotiable). See [`message`] for
//! the bounds and flag semantics.

pub mod message;
pub mod token;
pub mod wire;

pub use message::{
    FlagGroup, IdentityClaim, NegotiationRequest, NegotiationResponse, RejectReason, ResponseBody,
    FLAG_DELEG_FORBID, FLAG_DELEG_REQUIRE, MAX_IDENTITY_LEN, MAX_LIST_LEN, MAX_MECHANISM_LEN,
    NEGOTIATION_VERSION,
};
pub use token::{TokenCodec, HEADER_LEN, MAX_TOKEN_PAYLOAD, TOKEN_MAGIC};

use crate::error::{Result, SecError};

/// Kind of a framed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Tag {
    /// Carries a [`NegotiationRequest`] payload.
    MechanismRequest = 0x1,
    /// Carries a [`NegotiationResponse`] payload.
    MechanismResponse = 0x2,
}

impl Tag {
    /// Wire encoding of the tag.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Decode a wire tag value. Unknown values are malformed framing.
    pub fn from_u32(raw: u32) -> Result<Self> {
        match raw {
            0x1 => Ok(Tag::MechanismRequest),
            0x2 => Ok(Tag::MechanismResponse),
            other => Err(SecError::MalformedToken(format!(
                "unknown token tag {other:#x}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        assert_eq!(Tag::from_u32(0x1).unwrap(), Tag::MechanismRequest);
        assert_eq!(Tag::from_u32(0x2).unwrap(), Tag::MechanismResponse);
        assert_eq!(Tag::MechanismResponse.as_u32(), 0x2);
    }

    #[test]
    fn test_unknown_tag_is_malformed() {
        let err = Tag::from_u32(0x7F).unwrap_err();
        assert!(matches!(err, SecError::MalformedToken(_)));
    }
}
