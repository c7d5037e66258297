// File: src/chat/core/ids.rs

//! Identifier types for chat sessions and conversations.
//!
//! A [`SessionId`] names one browser connection's in-memory session and never
//! changes for the lifetime of that session. A [`ConversationId`] names the
//! conversation currently held by the session; it is regenerated when the
//! user starts a new conversation and is what the vector store records as the
//! source of stored exchanges.
//!
//! With the `uuid_v7` feature, conversation ids are time-ordered.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[inline]
#[must_use]
fn uuid_time_ordered() -> Uuid {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4()
    }
}

#[inline]
#[must_use]
fn uuid_random() -> Uuid {
    Uuid::new_v4()
}

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        generator = $gen:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Create a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self($gen())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            #[inline]
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_uuid_id!(
    /// Handle of one connection's in-memory session.
    ///
    /// Random (`UUIDv4`): it is handed to the browser and must not be guessable
    /// from timing.
    SessionId,
    generator = uuid_random
);

define_uuid_id!(
    /// Identifier of the conversation held by a session.
    ConversationId,
    generator = uuid_time_ordered
);

impl ConversationId {
    /// Vector-store record id for the `chunk_index`-th stored exchange.
    #[must_use]
    pub fn chunk_id(&self, chunk_index: u64) -> String {
        format!("{}_{chunk_index}", self.0)
    }

    /// Prefix shared by every vector-store record of this conversation.
    #[must_use]
    pub fn chunk_prefix(&self) -> String {
        format!("{}_", self.0)
    }
}
