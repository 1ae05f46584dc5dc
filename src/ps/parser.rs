//! Tree-sitter adapter for PowerShell.
//!
//! Source is parsed with the `tree-sitter-powershell` grammar and the concrete
//! tree is lowered onto [`SyntaxNode`]s. The grammar wraps every expression in
//! a long chain of single-child precedence nodes; lowering drops those and
//! keeps only the constructs the rules look at. The walk uses a
//! [`TreeCursor`] and an explicit stack so hostile nesting cannot exhaust the
//! call stack.

use crate::ps::errors::ParseError;
use crate::ps::tree::{NodeKind, SyntaxNode, SyntaxTree};
use tree_sitter::{Node, Parser, Tree, TreeCursor};

/// Deepest grammar nesting accepted before a script is rejected.
pub const MAX_NESTING: usize = 1000;

const NUMBER_SUFFIXES: &[&str] = &[
    "", "d", "l", "u", "ul", "y", "uy", "s", "us", "n", "kb", "mb", "gb", "tb", "pb", "lkb",
    "lmb", "lgb", "ltb", "lpb", "dkb", "dmb", "dgb", "dtb", "dpb",
];

/// Tree-sitter parser wrapper for PowerShell source.
pub struct PowerShellParser {
    parser: Parser,
}

impl PowerShellParser {
    pub fn new() -> Result<Self, ParseError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_powershell::LANGUAGE.into())
            .map_err(|_| ParseError::at("", 0, "failed to load the PowerShell grammar"))?;
        Ok(Self { parser })
    }

    /// Parse source into the raw tree-sitter tree.
    pub fn parse_tree(&mut self, source: &str) -> Result<Tree, ParseError> {
        self.parser
            .parse(source, None)
            .ok_or_else(|| ParseError::at(source, 0, "parser produced no tree"))
    }

    /// Parse a complete script.
    pub fn parse(&mut self, source: &str) -> Result<SyntaxTree, ParseError> {
        let tree = self.parse_tree(source)?;
        let root = tree.root_node();
        if let Some(error) = first_error(root, source) {
            return blank_script(root, source).ok_or(error);
        }
        Lowering::new(source).run(root)
    }
}

/// Parse a complete script with a fresh parser.
pub fn parse(source: &str) -> Result<SyntaxTree, ParseError> {
    PowerShellParser::new()?.parse(source)
}

/// Whether a command-mode token reads as a numeric literal (`42`, `0x1F`, `10MB`).
pub fn is_numeric_literal(token: &str) -> bool {
    let body = token.strip_prefix(['-', '+']).unwrap_or(token);
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        let digits_end = hex
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(hex.len());
        return digits_end > 0
            && NUMBER_SUFFIXES.contains(&hex[digits_end..].to_ascii_lowercase().as_str());
    }
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i;
    if i < bytes.len() && bytes[i] == b'.' {
        let frac_start = i + 1;
        let mut j = frac_start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > frac_start {
            digits += j - frac_start;
            i = j;
        }
    }
    if digits == 0 {
        return false;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    NUMBER_SUFFIXES.contains(&body[i..].to_ascii_lowercase().as_str())
}

/// Move to the next node in preorder that is not below the current one.
///
/// Returns false once the cursor is back at the node it was created on.
fn advance(cursor: &mut TreeCursor<'_>) -> bool {
    loop {
        if cursor.goto_next_sibling() {
            return true;
        }
        if !cursor.goto_parent() {
            return false;
        }
    }
}

/// The grammar cannot express an empty statement list, so `{ }` and a bare
/// `param()` come back with a zero-width `;` marked missing.
fn is_empty_statement_filler(node: Node<'_>) -> bool {
    node.kind() == ";"
        && node.start_byte() == node.end_byte()
        && node.parent().is_some_and(|p| p.kind() == "empty_statement")
}

/// First ERROR or MISSING node in document order, as a [`ParseError`].
fn first_error(root: Node<'_>, source: &str) -> Option<ParseError> {
    if !root.has_error() {
        return None;
    }
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_missing() {
            if !is_empty_statement_filler(node) {
                return Some(missing(node, source));
            }
        } else if node.is_error() {
            return Some(unexpected(node, source));
        }
        let descended = node.has_error() && cursor.goto_first_child();
        if !descended && !advance(&mut cursor) {
            return None;
        }
    }
}

/// The grammar needs at least one statement, so an empty or comment-only
/// file comes back as an error tree. Such a file is a valid empty script.
fn blank_script(root: Node<'_>, source: &str) -> Option<SyntaxTree> {
    let mut cursor = root.walk();
    let mut comments = Vec::new();
    loop {
        let node = cursor.node();
        if node.kind() == "comment" {
            comments.push(SyntaxNode::leaf(NodeKind::Comment, node.start_byte(), node.end_byte()));
        } else if node.child_count() == 0
            && !source.get(node.byte_range()).unwrap_or("").trim().is_empty()
        {
            return None;
        }
        let descended = node.kind() != "comment" && cursor.goto_first_child();
        if !descended && !advance(&mut cursor) {
            break;
        }
    }
    let root = SyntaxNode::leaf(NodeKind::ScriptBlock, 0, source.len());
    Some(SyntaxTree::new(root, comments))
}

fn missing(node: Node<'_>, source: &str) -> ParseError {
    let message = match node.kind() {
        close @ ("}" | ")" | "]") => format!("missing closing '{close}'"),
        other => format!("missing '{other}'"),
    };
    ParseError::at(source, node.start_byte(), message)
}

/// Blame the last token the parser could not place.
fn unexpected(node: Node<'_>, source: &str) -> ParseError {
    let mut cursor = node.walk();
    let mut token = None;
    loop {
        let current = cursor.node();
        if current.child_count() == 0 {
            let text = source.get(current.byte_range()).unwrap_or("");
            let trimmed = text.trim_start();
            if !trimmed.trim_end().is_empty() {
                let offset = current.start_byte() + (text.len() - trimmed.len());
                token = Some((offset, trimmed.trim_end()));
            }
        }
        if !cursor.goto_first_child() && !advance(&mut cursor) {
            break;
        }
    }
    match token {
        Some((offset, text)) => {
            let shown: String = text.lines().next().unwrap_or("").chars().take(20).collect();
            ParseError::at(source, offset, format!("unexpected '{shown}'"))
        }
        None => ParseError::at(source, node.start_byte(), "unexpected input"),
    }
}

/// Grammar nodes whose children never matter to the lowered tree.
fn is_opaque(kind: &str) -> bool {
    matches!(
        kind,
        "comment"
            | "variable"
            | "simple_name"
            | "function_name"
            | "generic_token"
            | "command_name"
            | "command_parameter"
            | "type_literal"
            | "attribute_name"
            | "verbatim_string_characters"
            | "verbatim_here_string_characters"
            | "integer_literal"
            | "real_literal"
            | "comparison_operator"
            | "assignement_operator"
            | "block_name"
            | "switch_parameters"
    )
}

fn is_binary_chain(kind: &str) -> bool {
    matches!(
        kind,
        "logical_expression"
            | "bitwise_expression"
            | "comparison_expression"
            | "additive_expression"
            | "multiplicative_expression"
            | "format_expression"
            | "range_expression"
            | "logical_argument_expression"
            | "bitwise_argument_expression"
            | "comparison_argument_expression"
            | "additive_argument_expression"
            | "multiplicative_argument_expression"
            | "format_argument_expression"
            | "range_argument_expression"
    )
}

/// A grammar node together with what its children lowered to.
struct Frame<'t> {
    node: Node<'t>,
    parts: Vec<Part>,
}

impl<'t> Frame<'t> {
    fn new(node: Node<'t>) -> Self {
        Self {
            node,
            parts: Vec::new(),
        }
    }
}

/// A lowered grammar node: its grammar kind, extent and output nodes.
///
/// Anonymous tokens such as `{` lower to a part with no nodes, which keeps
/// their position available to the parent.
struct Part {
    kind: &'static str,
    start: usize,
    end: usize,
    nodes: Vec<SyntaxNode>,
}

fn flatten(parts: Vec<Part>) -> Vec<SyntaxNode> {
    parts.into_iter().flat_map(|p| p.nodes).collect()
}

/// Node whose extent ends at its last child, dropping trailing separators
/// the grammar folds into the parent.
fn trimmed(kind: NodeKind, start: usize, end: usize, children: Vec<SyntaxNode>) -> SyntaxNode {
    let end = children.last().map(|c| c.end).unwrap_or(end);
    SyntaxNode::with_children(kind, start, end, children)
}

/// Left-associative fold of binary operands. Operator tokens lower to nothing.
fn fold_binary(operands: Vec<SyntaxNode>) -> Vec<SyntaxNode> {
    let mut operands = operands.into_iter();
    let Some(first) = operands.next() else {
        return Vec::new();
    };
    let folded = operands.fold(first, |lhs, rhs| {
        let (start, end) = (lhs.start, rhs.end);
        SyntaxNode::with_children(NodeKind::BinaryExpression, start, end, vec![lhs, rhs])
    });
    vec![folded]
}

struct Lowering<'s> {
    source: &'s str,
    comments: Vec<SyntaxNode>,
}

impl<'s> Lowering<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            comments: Vec::new(),
        }
    }

    fn run(mut self, root: Node<'_>) -> Result<SyntaxTree, ParseError> {
        let mut cursor = root.walk();
        let mut ancestors: Vec<Frame<'_>> = Vec::new();
        let mut current = Frame::new(root);
        loop {
            if !is_opaque(current.node.kind()) && cursor.goto_first_child() {
                if ancestors.len() >= MAX_NESTING {
                    return Err(ParseError::at(
                        self.source,
                        cursor.node().start_byte(),
                        "script nesting is too deep",
                    ));
                }
                ancestors.push(current);
                current = Frame::new(cursor.node());
                continue;
            }
            loop {
                let part = self.lower(current)?;
                let Some(mut parent) = ancestors.pop() else {
                    return Ok(self.finish(part));
                };
                parent.parts.push(part);
                if cursor.goto_next_sibling() {
                    ancestors.push(parent);
                    current = Frame::new(cursor.node());
                    break;
                }
                cursor.goto_parent();
                current = parent;
            }
        }
    }

    fn finish(mut self, root: Part) -> SyntaxTree {
        let root = SyntaxNode::with_children(NodeKind::ScriptBlock, 0, self.source.len(), root.nodes);
        self.comments.sort_by_key(|c| c.start);
        SyntaxTree::new(root, self.comments)
    }

    fn text(&self, start: usize, end: usize) -> &'s str {
        self.source.get(start..end).unwrap_or("")
    }

    fn lower(&mut self, frame: Frame<'_>) -> Result<Part, ParseError> {
        let Frame { node, parts } = frame;
        let kind = node.kind();
        let (start, end) = (node.start_byte(), node.end_byte());
        let leaf = |k| vec![SyntaxNode::leaf(k, start, end)];
        let wrap = |k, parts| vec![SyntaxNode::with_children(k, start, end, flatten(parts))];

        let nodes = match kind {
            "comment" => {
                self.comments
                    .push(SyntaxNode::leaf(NodeKind::Comment, start, end));
                Vec::new()
            }
            "variable" => leaf(NodeKind::Variable),
            "simple_name" | "function_name" => leaf(NodeKind::BareWord),
            "generic_token" if is_numeric_literal(self.text(start, end)) => leaf(NodeKind::Number),
            "generic_token" => leaf(NodeKind::BareWord),
            "command_name" => leaf(NodeKind::CommandName),
            "command_parameter" => leaf(NodeKind::CommandParameter),
            "type_literal" => leaf(NodeKind::TypeLiteral),
            "verbatim_string_characters" => leaf(NodeKind::StringLiteral),
            "verbatim_here_string_characters" => leaf(NodeKind::HereString),
            "expandable_string_literal" => wrap(NodeKind::ExpandableString, parts),
            "expandable_here_string_literal" => wrap(NodeKind::ExpandableHereString, parts),
            "integer_literal" | "real_literal" => leaf(NodeKind::Number),

            "function_statement" => vec![self.function(start, end, parts)],
            "function_parameter_declaration" | "param_block" => wrap(NodeKind::ParamBlock, parts),
            "script_parameter" => wrap(NodeKind::Parameter, parts),
            "attribute" if parts.iter().any(|p| p.kind == "(") => wrap(NodeKind::Attribute, parts),
            "attribute_argument" if parts.first().is_some_and(|p| p.kind == "simple_name") => {
                wrap(NodeKind::NamedArgument, parts)
            }

            "statement_block" => wrap(NodeKind::Block, parts),
            "named_block" => wrap(NodeKind::NamedBlock, parts),
            "script_block_expression" => wrap(NodeKind::ScriptBlockExpression, parts),
            "if_statement" => wrap(NodeKind::If, parts),
            "elseif_clause" => wrap(NodeKind::ElseIf, parts),
            "else_clause" => wrap(NodeKind::Else, parts),
            "foreach_statement" => wrap(NodeKind::Foreach, parts),
            "for_statement" => wrap(NodeKind::For, parts),
            "while_statement" => wrap(NodeKind::While, parts),
            "do_statement" => wrap(NodeKind::DoLoop, parts),
            "switch_statement" => wrap(NodeKind::Switch, parts),
            "switch_clause" => wrap(NodeKind::SwitchClause, parts),
            "switch_clause_condition" if parts.iter().all(|p| p.nodes.is_empty()) => {
                leaf(NodeKind::BareWord)
            }
            "try_statement" => {
                let handled = parts
                    .iter()
                    .any(|p| matches!(p.kind, "catch_clauses" | "finally_clause"));
                if !handled {
                    return Err(ParseError::at(
                        self.source,
                        end,
                        "missing catch or finally block after try",
                    ));
                }
                wrap(NodeKind::Try, parts)
            }
            "catch_clause" => wrap(NodeKind::Catch, parts),
            "finally_clause" => wrap(NodeKind::Finally, parts),
            "trap_statement" => wrap(NodeKind::Trap, parts),
            "flow_control_statement" => wrap(NodeKind::FlowControl, parts),
            "class_statement" | "enum_statement" => {
                let keyword = kind.trim_end_matches("_statement");
                return Err(ParseError::at(
                    self.source,
                    start,
                    format!("{keyword} definitions are not supported"),
                ));
            }

            "pipeline_chain" => vec![trimmed(NodeKind::Pipeline, start, end, flatten(parts))],
            "assignment_expression" => {
                vec![trimmed(NodeKind::Assignment, start, end, flatten(parts))]
            }
            "command" => vec![self.command(start, end, parts)?],
            "command_elements" => self.command_elements(parts),
            "redirection" => wrap(NodeKind::Redirection, parts),

            "hash_literal_expression" => wrap(NodeKind::HashLiteral, parts),
            "hash_entry" => vec![trimmed(NodeKind::HashEntry, start, end, flatten(parts))],
            "array_expression" => wrap(NodeKind::ArrayExpression, parts),
            "sub_expression" => wrap(NodeKind::SubExpression, parts),
            "parenthesized_expression" => wrap(NodeKind::ParenExpression, parts),
            "member_access" => wrap(NodeKind::MemberAccess, parts),
            "invokation_expression" => wrap(NodeKind::InvokeMember, parts),
            "element_access" => wrap(NodeKind::Index, parts),
            "cast_expression" => wrap(NodeKind::Convert, parts),
            "expression_with_unary_operator"
            | "pre_increment_expression"
            | "pre_decrement_expression"
            | "post_increment_expression"
            | "post_decrement_expression" => {
                let operands = flatten(parts);
                match operands.as_slice() {
                    [only] if only.start == start && only.end == end => operands,
                    _ => vec![SyntaxNode::with_children(
                        NodeKind::UnaryExpression,
                        start,
                        end,
                        operands,
                    )],
                }
            }
            "array_literal_expression" | "array_literal_argument" => {
                let elements = flatten(parts);
                if elements.len() > 1 {
                    vec![SyntaxNode::with_children(
                        NodeKind::ArrayLiteral,
                        start,
                        end,
                        elements,
                    )]
                } else {
                    elements
                }
            }
            chain if is_binary_chain(chain) => fold_binary(flatten(parts)),

            _ => flatten(parts),
        };
        Ok(Part {
            kind,
            start,
            end,
            nodes,
        })
    }

    /// `function Name (params) { body }`: the body becomes a [`NodeKind::Block`]
    /// spanning the braces.
    fn function(&self, start: usize, end: usize, parts: Vec<Part>) -> SyntaxNode {
        let mut children = Vec::new();
        let mut body = Vec::new();
        let mut open = None;
        let mut close = end;
        for part in parts {
            match part.kind {
                "{" if open.is_none() => open = Some(part.start),
                "}" => close = part.end,
                _ if open.is_some() => body.extend(part.nodes),
                _ => children.extend(part.nodes),
            }
        }
        if let Some(open) = open {
            children.push(SyntaxNode::with_children(NodeKind::Block, open, close, body));
        }
        SyntaxNode::with_children(NodeKind::FunctionDefinition, start, end, children)
    }

    fn command(&self, start: usize, end: usize, parts: Vec<Part>) -> Result<SyntaxNode, ParseError> {
        let children = flatten(parts);
        let is_configuration = children.first().is_some_and(|name| {
            name.kind == NodeKind::CommandName
                && name.text(self.source).eq_ignore_ascii_case("configuration")
        }) && children
            .iter()
            .any(|c| c.kind == NodeKind::ScriptBlockExpression);
        if is_configuration {
            return Err(ParseError::at(
                self.source,
                start,
                "configuration definitions are not supported",
            ));
        }
        Ok(trimmed(NodeKind::Command, start, end, children))
    }

    /// Command arguments, with `-Name:value` folded into the parameter node.
    fn command_elements(&self, parts: Vec<Part>) -> Vec<SyntaxNode> {
        let mut elements: Vec<SyntaxNode> = Vec::new();
        let mut bind_next = false;
        for part in parts {
            if part.kind == "command_argument_sep" {
                bind_next = self.text(part.start, part.end).contains(':')
                    && elements.last().is_some_and(|e| {
                        e.kind == NodeKind::CommandParameter
                            && e.children.is_empty()
                            && e.end == part.start
                    });
                continue;
            }
            if part.nodes.is_empty() {
                continue;
            }
            match elements.last_mut() {
                Some(parameter) if bind_next => {
                    for value in part.nodes {
                        parameter.end = value.end;
                        parameter.children.push(value);
                    }
                }
                _ => elements.extend(part.nodes),
            }
            bind_next = false;
        }
        elements
    }
}
