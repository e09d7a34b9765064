#![deny(missing_docs)]
//! Core type definitions for the address-relay gateway and its clients.
//!
//! This crate groups together the strongly-typed values and message
//! structures used across the relay system. It provides:
//!
//! * The [`Address`] newtype, the account identifier every message is
//!   routed by, with consistent parsing, display, and serialization.
//! * Versioned wire-protocol types for client/server communication (see
//!   [`api`] module).
//!
//! Use these types to pass, store, and (de)serialize identifiers and
//! protocol frames in a type-safe way throughout your application.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod api;

/// A 20-byte account identifier.
///
/// Parses from 40 hex nibbles, optionally `0x`-prefixed, in any case.
/// Display and serialization are always the lowercase `0x`-prefixed form,
/// so two spellings of the same account compare equal after parsing and
/// the normalized form can be used directly as a routing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(alloy::primitives::Address);

impl Address {
    /// Creates a new `Address` by wrapping the raw 20-byte value.
    pub fn new(value: alloy::primitives::Address) -> Self {
        Self(value)
    }

    /// Converts the address back into the raw 20-byte value.
    pub fn into_inner(self) -> alloy::primitives::Address {
        self.0
    }
}

impl From<alloy::primitives::Address> for Address {
    fn from(value: alloy::primitives::Address) -> Self {
        Self(value)
    }
}

impl FromStr for Address {
    type Err = <alloy::primitives::Address as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", alloy::primitives::hex::encode(self.0))
    }
}
