//! Runs rule transforms in isolation.
//!
//! A rule that errors, panics or emits an unusable edit loses its
//! contribution for the pass; nothing it does can affect other rules.

use crate::edit::{Edit, EditCheck, EditError};
use crate::rules::{FixContext, FixRule};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformFailure {
    #[error("{0}")]
    FixFailed(String),

    #[error("transform panicked: {0}")]
    Panicked(String),

    #[error("produced an invalid edit: {0}")]
    InvalidEdit(#[from] EditError),
}

/// A rule's transform failed; its edits are dropped for this pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rule {rule_id} failed: {kind}")]
pub struct RuleTransformError {
    pub rule_id: String,
    pub kind: TransformFailure,
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `rule`'s transform for one matched diagnostic.
///
/// Returned edits are verified against the current text and stamped with the
/// rule's identity. Edits that are already applied are silently discarded.
pub fn apply(rule: &dyn FixRule, ctx: &FixContext<'_>) -> Result<Vec<Edit>, RuleTransformError> {
    let fail = |kind: TransformFailure| {
        warn!(rule = rule.id(), document = %ctx.document.path, error = %kind, "rule transform failed");
        RuleTransformError {
            rule_id: rule.id().to_string(),
            kind,
        }
    };

    let produced = match panic::catch_unwind(AssertUnwindSafe(|| rule.transform(ctx))) {
        Ok(Ok(edits)) => edits,
        Ok(Err(failed)) => return Err(fail(TransformFailure::FixFailed(failed.message))),
        Err(payload) => {
            return Err(fail(TransformFailure::Panicked(panic_payload_to_string(
                payload.as_ref(),
            ))))
        }
    };

    let mut edits = Vec::with_capacity(produced.len());
    for edit in produced {
        match edit.check(ctx.source()) {
            Ok(EditCheck::Applicable) => edits.push(edit.attributed_to(rule)),
            Ok(EditCheck::AlreadyApplied) => {
                debug!(rule = rule.id(), start = edit.start, "edit already applied");
            }
            Err(err) => return Err(fail(err.into())),
        }
    }
    Ok(edits)
}
