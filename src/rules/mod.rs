//! Fix rules and the registry that holds them.
//!
//! Each rule pairs a detector (used by the built-in analyzer), a matcher that
//! resolves a diagnostic to a syntax node, and a pure transform that turns the
//! matched node into edits against the current text.

pub mod advanced;
pub mod best_practice;
pub mod formatting;
pub mod security;
mod support;

use crate::analyzer::{Diagnostic, Severity};
use crate::config::RuleFilter;
use crate::document::SourceDocument;
use crate::edit::Edit;
use crate::ps::{NodeKind, SyntaxNode, SyntaxTree};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Rule family. The order of variants is the conflict-resolution rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Category {
    Security,
    BestPractice,
    Advanced,
    Formatting,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Security,
        Category::BestPractice,
        Category::Advanced,
        Category::Formatting,
    ];

    /// Lower rank wins a conflict.
    pub fn rank(self) -> u8 {
        match self {
            Category::Security => 0,
            Category::BestPractice => 1,
            Category::Advanced => 2,
            Category::Formatting => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Security => "security",
            Category::BestPractice => "best-practice",
            Category::Advanced => "advanced",
            Category::Formatting => "formatting",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a transform may look at.
pub struct FixContext<'a> {
    pub document: &'a SourceDocument,
    pub node: &'a SyntaxNode,
    pub diagnostic: &'a Diagnostic,
    /// Byte offset the diagnostic resolved to
    pub offset: usize,
}

impl<'a> FixContext<'a> {
    pub fn source(&self) -> &'a str {
        &self.document.text
    }

    pub fn tree(&self) -> &'a SyntaxTree {
        &self.document.tree
    }

    pub fn node_text(&self) -> &'a str {
        self.node.text(&self.document.text)
    }
}

/// A transform declined or failed to produce a fix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FixFailed {
    pub message: String,
}

impl FixFailed {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A registered fix rule.
pub trait FixRule: Send + Sync {
    /// Stable identifier, matching the analyzer's rule name
    fn id(&self) -> &'static str;

    fn category(&self) -> Category;

    fn description(&self) -> &'static str;

    /// Higher wins ties between edits starting at the same offset.
    fn priority(&self) -> i32 {
        0
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    /// Node kinds the default matcher accepts. Empty accepts any node.
    fn target_kinds(&self) -> &'static [NodeKind];

    /// Report every violation of this rule in `document`.
    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic>;

    /// Resolve a diagnostic at `offset` to the node the transform works on.
    fn matcher<'t>(
        &self,
        tree: &'t SyntaxTree,
        _diagnostic: &Diagnostic,
        offset: usize,
    ) -> Option<&'t SyntaxNode> {
        tree.innermost_of(offset, self.target_kinds())
    }

    /// Produce edits against the current text. An empty list means nothing to change.
    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed>;
}

/// Every built-in rule, in registration order.
pub fn all_rules() -> Vec<Box<dyn FixRule>> {
    vec![
        Box::new(security::PlainTextPassword),
        Box::new(security::CredentialType),
        Box::new(security::ConvertToSecureStringWithPlainText),
        Box::new(security::AllowUnencryptedAuthentication),
        Box::new(security::BrokenHashAlgorithms),
        Box::new(best_practice::CmdletAliases),
        Box::new(best_practice::ComparisonWithNull),
        Box::new(best_practice::WriteHost),
        Box::new(best_practice::EmptyCatchBlock),
        Box::new(best_practice::GlobalVars),
        Box::new(best_practice::DefaultValueSwitchParameter),
        Box::new(advanced::ShouldProcess),
        Box::new(advanced::CommentHelp),
        Box::new(advanced::LiteralHashtableInitializer),
        Box::new(formatting::TrailingWhitespace),
        Box::new(formatting::SemicolonLineTerminator),
        Box::new(formatting::CorrectCasing),
        Box::new(formatting::ConsistentWhitespace),
        Box::new(formatting::ConstantStringQuotes),
    ]
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("rule '{0}' is registered more than once")]
    DuplicateRule(String),
}

/// Immutable catalog of rules, shared across workers.
pub struct RuleRegistry {
    rules: Vec<Box<dyn FixRule>>,
}

impl RuleRegistry {
    pub fn new(rules: Vec<Box<dyn FixRule>>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id().to_ascii_lowercase()) {
                return Err(RegistryError::DuplicateRule(rule.id().to_string()));
            }
        }
        Ok(Self { rules })
    }

    /// Registry holding [`all_rules`].
    pub fn builtin() -> Self {
        Self { rules: all_rules() }
    }

    /// Look up a rule by id, ignoring ASCII case.
    pub fn get(&self, id: &str) -> Option<&dyn FixRule> {
        self.rules
            .iter()
            .find(|r| r.id().eq_ignore_ascii_case(id))
            .map(|r| r.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn FixRule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    /// Rules allowed by `filter`.
    pub fn enabled<'a>(&'a self, filter: &'a RuleFilter) -> impl Iterator<Item = &'a dyn FixRule> {
        self.iter().filter(move |r| filter.allows(r.id()))
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.ids())
            .finish()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Single-pass helpers for exercising one rule in isolation.

    use super::*;
    use crate::mapper::resolve_offset;
    use crate::patch::patch;
    use crate::schedule::schedule;

    /// Detect, transform and apply one pass of `rule` over `source`.
    pub fn fix_once(rule: &dyn FixRule, source: &str) -> String {
        let document = SourceDocument::parse("test.ps1", source)
            .unwrap_or_else(|e| panic!("test input must parse: {e}"));
        let mut edits = Vec::new();
        for diagnostic in rule.detect(&document) {
            let offset = resolve_offset(&document, &diagnostic.location)
                .unwrap_or_else(|| panic!("unmappable diagnostic {diagnostic:?}"));
            let node = rule
                .matcher(&document.tree, &diagnostic, offset)
                .unwrap_or_else(|| panic!("no node for {diagnostic:?}"));
            let ctx = FixContext {
                document: &document,
                node,
                diagnostic: &diagnostic,
                offset,
            };
            let produced = rule.transform(&ctx).expect("transform failed");
            edits.extend(produced.into_iter().map(|e| e.attributed_to(rule)));
        }
        let planned = schedule(edits);
        patch(source, &planned.applied).expect("patch failed").text
    }

    /// Apply `rule` until it stops changing the text.
    pub fn fix_all(rule: &dyn FixRule, source: &str) -> String {
        let mut current = source.to_string();
        for _ in 0..10 {
            let next = fix_once(rule, &current);
            if next == current {
                return next;
            }
            current = next;
        }
        panic!("rule {} did not converge", rule.id());
    }

    pub fn detect_count(rule: &dyn FixRule, source: &str) -> usize {
        let document = SourceDocument::parse("test.ps1", source).expect("test input must parse");
        rule.detect(&document).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_has_unique_ids() {
        let registry = RuleRegistry::new(all_rules()).unwrap();
        assert_eq!(registry.len(), 19);
        for category in Category::ALL {
            assert!(registry.iter().any(|r| r.category() == category));
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let rules: Vec<Box<dyn FixRule>> = vec![
            Box::new(formatting::TrailingWhitespace),
            Box::new(formatting::TrailingWhitespace),
        ];
        assert_eq!(
            RuleRegistry::new(rules).unwrap_err(),
            RegistryError::DuplicateRule("PSAvoidTrailingWhitespace".to_string())
        );
    }

    #[test]
    fn lookup_ignores_case() {
        let registry = RuleRegistry::builtin();
        assert!(registry.get("psavoidusingcmdletaliases").is_some());
        assert!(registry.get("PSNoSuchRule").is_none());
    }

    #[test]
    fn filter_narrows_enabled_rules() {
        let registry = RuleRegistry::builtin();
        let filter = RuleFilter {
            include: vec!["PSAvoidUsingCmdletAliases".into(), "PSAvoidGlobalVars".into()],
            exclude: vec!["PSAvoidGlobalVars".into()],
        };
        let ids: Vec<_> = registry.enabled(&filter).map(|r| r.id()).collect();
        assert_eq!(ids, vec!["PSAvoidUsingCmdletAliases"]);
    }

    #[test]
    fn category_rank_orders_security_first() {
        let mut categories = Category::ALL.to_vec();
        categories.reverse();
        categories.sort_by_key(|c| c.rank());
        assert_eq!(categories, Category::ALL.to_vec());
    }
}
