//! Policy handling: reserved naming, statement builders and the merge engine.
//!
//! Nothing in this module performs I/O.

pub mod builder;
pub mod merge;
pub mod naming;

use thiserror::Error;

pub use builder::{bucket_statements, role_inline_policy, trust_policy};
pub use merge::{merge, MergeSummary};
pub use naming::{is_owned_sid, owned_sid, LEGACY_SIDS, SID_PREFIX};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A statement handed to the merge engine does not carry the reserved prefix,
    /// so a later run could not recognise it as its own.
    #[error("statement Sid {sid:?} does not carry the reserved prefix '{prefix}'", prefix = SID_PREFIX)]
    UnownedStatement { sid: Option<String> },

    #[error("duplicate owned statement Sid '{0}'")]
    DuplicateSid(String),

    /// The consuming service rejects documents without statements.
    #[error("merged policy document has no statements")]
    EmptyPolicy,
}
