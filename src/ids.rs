//! Identifier types shared across every component.
//!
//! Pane, storyfragment, tenant and belief-slug identifiers are externally
//! assigned (by the CMS content layer) and stay plain `String`s; fingerprint
//! and session identifiers are minted by this crate and get typed `Uuid`
//! wrappers so they can't be swapped for one another at a call site.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type TenantId = String;
pub type PaneId = String;
pub type StoryfragmentId = String;
pub type BeliefSlug = String;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

uuid_id!(FingerprintId);
uuid_id!(SessionId);
uuid_id!(VisitId);
uuid_id!(LeadId);
