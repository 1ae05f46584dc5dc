//! Shared helpers for rule detectors and transforms.

use crate::analyzer::{Diagnostic, Location};
use crate::document::SourceDocument;
use crate::ps::{NodeKind, SyntaxNode};
use crate::rules::FixRule;

/// Diagnostic for `rule` at a byte offset, reported by line and column.
pub(crate) fn report(
    rule: &dyn FixRule,
    document: &SourceDocument,
    offset: usize,
    message: impl Into<String>,
) -> Diagnostic {
    let (line, column) = document.position_of(offset);
    Diagnostic::new(
        rule.id(),
        Location::LineColumn { line, column },
        rule.severity(),
        message,
    )
}

pub(crate) fn is_dash(c: char) -> bool {
    matches!(c, '-' | '\u{2013}' | '\u{2014}' | '\u{2015}')
}

/// Name node of a command, when it is a plain bare word.
pub(crate) fn command_name_node(command: &SyntaxNode) -> Option<&SyntaxNode> {
    command
        .children
        .first()
        .filter(|c| c.kind == NodeKind::CommandName)
}

pub(crate) fn command_name<'s>(command: &SyntaxNode, source: &'s str) -> Option<&'s str> {
    command_name_node(command).map(|n| n.text(source))
}

/// `-Name:value` → `Name`.
pub(crate) fn parameter_name<'s>(parameter: &SyntaxNode, source: &'s str) -> &'s str {
    let text = parameter.text(source);
    let text = text.trim_start_matches(is_dash);
    let end = text.find(':').unwrap_or(text.len());
    &text[..end]
}

pub(crate) fn parameters(command: &SyntaxNode) -> impl Iterator<Item = &SyntaxNode> {
    command.children_of(NodeKind::CommandParameter)
}

pub(crate) fn has_parameter(command: &SyntaxNode, source: &str, names: &[&str]) -> bool {
    parameters(command).any(|p| {
        let name = parameter_name(p, source);
        names.iter().any(|n| n.eq_ignore_ascii_case(name))
    })
}

/// Value bound to a parameter: the `:value` child or the following argument.
pub(crate) fn parameter_value<'n>(command: &'n SyntaxNode, parameter: &SyntaxNode) -> Option<&'n SyntaxNode> {
    let idx = command
        .children
        .iter()
        .position(|c| std::ptr::eq(c, parameter))?;
    let own = &command.children[idx];
    if let Some(value) = own.children.first() {
        return Some(value);
    }
    command
        .children
        .get(idx + 1)
        .filter(|c| !matches!(c.kind, NodeKind::CommandParameter | NodeKind::Redirection))
}

/// Leading whitespace of the line containing `offset`.
pub(crate) fn line_indent(source: &str, offset: usize) -> &str {
    let line_start = source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let rest = &source[line_start..];
    let len = rest
        .find(|c: char| c != ' ' && c != '\t')
        .unwrap_or(rest.len());
    &rest[..len]
}

/// Line ending used by the document.
pub(crate) fn newline(source: &str) -> &'static str {
    if source.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

pub(crate) fn is_string_kind(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::StringLiteral
            | NodeKind::ExpandableString
            | NodeKind::HereString
            | NodeKind::ExpandableHereString
    )
}

/// Whether `offset` lies inside a string literal or a comment.
pub(crate) fn in_string_or_comment(document: &SourceDocument, offset: usize) -> bool {
    if document
        .tree
        .comments()
        .iter()
        .any(|c| c.contains(offset))
    {
        return true;
    }
    document
        .tree
        .root()
        .path_to(offset)
        .iter()
        .any(|n| is_string_kind(n.kind))
}

/// Type name inside a `[TypeLiteral]`, lower-cased and without brackets.
pub(crate) fn type_name(type_literal: &SyntaxNode, source: &str) -> String {
    let text = type_literal.text(source);
    let text = text.strip_prefix('[').unwrap_or(text);
    let text = text.strip_suffix(']').unwrap_or(text);
    text.trim().to_ascii_lowercase()
}

const ATTRIBUTE_NAMES: &[&str] = &[
    "parameter",
    "alias",
    "allownull",
    "allowemptystring",
    "allowemptycollection",
    "supportswildcards",
    "cmdletbinding",
    "outputtype",
    "credential",
    "system.management.automation.credential",
];

/// `[Parameter]` and friends parse as type literals but are attributes.
pub(crate) fn is_attribute_name(name: &str) -> bool {
    ATTRIBUTE_NAMES.contains(&name) || name.starts_with("validate")
}

/// Declared type of a parameter, if any.
pub(crate) fn parameter_type<'n>(parameter: &'n SyntaxNode, source: &str) -> Option<&'n SyntaxNode> {
    parameter
        .children_of(NodeKind::TypeLiteral)
        .filter(|t| !is_attribute_name(&type_name(t, source)))
        .last()
}

pub(crate) fn parameter_variable(parameter: &SyntaxNode) -> Option<&SyntaxNode> {
    parameter.child(NodeKind::Variable)
}

/// Default value expression following the variable, if any.
pub(crate) fn parameter_default(parameter: &SyntaxNode) -> Option<&SyntaxNode> {
    let idx = parameter
        .children
        .iter()
        .position(|c| c.kind == NodeKind::Variable)?;
    parameter.children.get(idx + 1)
}

/// `$scope:Name` / `${Name}` → `Name`.
pub(crate) fn variable_name(text: &str) -> &str {
    let text = text.trim_start_matches(['$', '@']);
    let text = text.trim_start_matches('{').trim_end_matches('}');
    match text.rfind(':') {
        Some(idx) => &text[idx + 1..],
        None => text,
    }
}

/// Keyword at the start of `node`.
pub(crate) fn leading_word<'s>(node: &SyntaxNode, source: &'s str) -> &'s str {
    let text = node.text(source);
    let len = text
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    &text[..len]
}

/// Whether `node` is the first element of its enclosing pipeline.
pub(crate) fn is_pipeline_head(document: &SourceDocument, node: &SyntaxNode) -> bool {
    match document.tree.parent_of(node) {
        Some(parent) if parent.kind == NodeKind::Pipeline => parent
            .children
            .first()
            .is_some_and(|first| std::ptr::eq(first, node)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ps::parse;

    #[test]
    fn parameter_names_and_values() {
        let source = "Get-FileHash -Path x -Algorithm:MD5 -Verbose\n";
        let tree = parse(source).unwrap();
        let command = tree.nodes_of(NodeKind::Command).next().unwrap();
        let names: Vec<_> = parameters(command)
            .map(|p| parameter_name(p, source))
            .collect();
        assert_eq!(names, vec!["Path", "Algorithm", "Verbose"]);

        let path = parameters(command).next().unwrap();
        assert_eq!(parameter_value(command, path).unwrap().text(source), "x");
        let algorithm = parameters(command).nth(1).unwrap();
        assert_eq!(
            parameter_value(command, algorithm).unwrap().text(source),
            "MD5"
        );
        let verbose = parameters(command).nth(2).unwrap();
        assert!(parameter_value(command, verbose).is_none());
        assert!(has_parameter(command, source, &["verbose"]));
    }

    #[test]
    fn indentation_and_names() {
        let source = "if ($x) {\n    Get-Date\n}";
        let offset = source.find("Get").unwrap();
        assert_eq!(line_indent(source, offset), "    ");
        assert_eq!(variable_name("$global:Count"), "Count");
        assert_eq!(variable_name("${My Var}"), "My Var");
        assert_eq!(newline("a\r\nb"), "\r\n");
    }

    #[test]
    fn type_names_keep_array_brackets() {
        let source = "param([string[]]$Names, [int]$Count, [ValidateNotNull]$X)\n";
        let tree = parse(source).unwrap();
        let names: Vec<_> = tree
            .nodes_of(NodeKind::TypeLiteral)
            .map(|t| type_name(t, source))
            .collect();
        assert_eq!(names, vec!["string[]", "int", "validatenotnull"]);
    }

    #[test]
    fn string_and_comment_positions() {
        let doc = SourceDocument::parse("t.ps1", "'a;b' # c;d\n$x = 1\n").unwrap();
        assert!(in_string_or_comment(&doc, 2));
        assert!(in_string_or_comment(&doc, 9));
        assert!(!in_string_or_comment(&doc, 13));
    }
}
