//! Identifier types.
//!
//! Users are 32-byte identities (compatible with iroh public key bytes).
//! Every engine-owned record gets a random 16-byte id.

use std::fmt;

use rand::random;
use serde::{Deserialize, Serialize};

/// 32-byte user identity.
pub type UserId = [u8; 32];

/// Short hex rendering of a user id for log fields.
pub fn short_user(user: &UserId) -> String {
    hex::encode(&user[..4])
}

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 16]);

        impl $name {
            /// Generate a new random id.
            pub fn generate() -> Self {
                Self(random::<[u8; 16]>())
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}..)", stringify!($name), hex::encode(&self.0[..4]))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }
    };
}

record_id!(
    /// Identifies an intention.
    IntentionId
);
record_id!(
    /// Identifies a blessing (and the token it becomes once given).
    BlessingId
);
record_id!(
    /// Identifies a proof of service.
    ProofId
);
record_id!(
    /// Identifies an offering.
    OfferingId
);
record_id!(
    /// Identifies a shared artifact.
    ArtifactId
);
record_id!(
    /// Identifies a sub-stewardship request.
    RequestId
);
record_id!(
    /// Identifies a sub-stewardship assignment.
    AssignmentId
);
