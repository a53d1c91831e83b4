//! Claim registries shared by concurrent agents.
//!
//! Both registries are optimistic and advisory. Nothing here is a lock: two
//! processes racing through read-modify-write on the same file can both
//! believe they hold a claim. TTL expiry bounds how long a stale or
//! duplicated claim can matter.

mod claims;
mod tasks;

pub use claims::{Claim, ClaimOutcome, ClaimsFile, FileClaimRegistry};
pub use tasks::{TaskClaim, TaskClaimRegistry, TaskClaimsFile};
