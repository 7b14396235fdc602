//! Non-destructive policy merge.
//!
//! A bucket policy is shared state: other teams and tools keep their own
//! statements in it. The merge keeps every statement whose Sid lacks the
//! reserved prefix, in its original order, drops statements a previous run of
//! this tool (or the setup script it replaces) wrote, and appends the current
//! owned statements.

use std::collections::HashSet;

use super::naming::{has_reserved_prefix, is_owned_sid};
use super::PolicyError;
use crate::types::{PolicyDocument, Statement};

/// Merge `owned` into `existing`, replacing only statements this tool authored.
///
/// Merging the result again with the same `owned` statements yields the same
/// document, so re-running the tool never duplicates its statements.
pub fn merge(
    existing: Option<&PolicyDocument>,
    owned: &[Statement],
) -> Result<PolicyDocument, PolicyError> {
    validate_owned(owned)?;

    let merged = match existing {
        None => PolicyDocument::new(owned.to_vec()),
        Some(doc) => {
            let mut statement: Vec<Statement> = doc
                .statement
                .iter()
                .filter(|s| !is_owned_sid(s.sid.as_deref()))
                .cloned()
                .collect();
            statement.extend(owned.iter().cloned());
            PolicyDocument {
                version: doc.version.clone(),
                id: doc.id.clone(),
                statement,
            }
        }
    };

    if merged.statement.is_empty() {
        return Err(PolicyError::EmptyPolicy);
    }
    Ok(merged)
}

fn validate_owned(owned: &[Statement]) -> Result<(), PolicyError> {
    let mut seen = HashSet::new();
    for statement in owned {
        let sid = statement.sid.as_deref();
        if !has_reserved_prefix(sid) {
            return Err(PolicyError::UnownedStatement {
                sid: statement.sid.clone(),
            });
        }
        if let Some(sid) = sid {
            if !seen.insert(sid) {
                return Err(PolicyError::DuplicateSid(sid.to_string()));
            }
        }
    }
    Ok(())
}

/// What a merge changed, for logging and dry-run reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub existed: bool,
    pub retained_foreign: usize,
    /// Sids of previously written statements that the merge dropped.
    pub replaced: Vec<String>,
    pub added: Vec<String>,
}

impl MergeSummary {
    pub fn between(existing: Option<&PolicyDocument>, owned: &[Statement]) -> Self {
        let (retained_foreign, replaced) = existing.map_or((0, Vec::new()), |doc| {
            let (owned_before, foreign): (Vec<&Statement>, Vec<&Statement>) = doc
                .statement
                .iter()
                .partition(|s| is_owned_sid(s.sid.as_deref()));
            (
                foreign.len(),
                owned_before
                    .iter()
                    .filter_map(|s| s.sid.clone())
                    .collect(),
            )
        });
        Self {
            existed: existing.is_some(),
            retained_foreign,
            replaced,
            added: owned.iter().filter_map(|s| s.sid.clone()).collect(),
        }
    }
}
