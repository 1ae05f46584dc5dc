//! Grammar-independent syntax tree.
//!
//! The parser adapter converts PowerShell source into this model so that the
//! rule registry and transform engine never depend on parser internals. Every
//! node carries a byte extent `[start, end)` into the text it was parsed from.

use std::fmt;
use std::ops::Range;

/// Closed set of grammatical constructs produced by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    ScriptBlock,
    Block,
    NamedBlock,
    ScriptBlockExpression,
    ParamBlock,
    Parameter,
    Attribute,
    NamedArgument,
    TypeLiteral,
    FunctionDefinition,
    Pipeline,
    Command,
    CommandName,
    CommandParameter,
    BareWord,
    Assignment,
    If,
    ElseIf,
    Else,
    Foreach,
    For,
    While,
    DoLoop,
    Switch,
    SwitchClause,
    Try,
    Catch,
    Finally,
    Trap,
    FlowControl,
    BinaryExpression,
    UnaryExpression,
    Convert,
    Variable,
    StringLiteral,
    ExpandableString,
    HereString,
    ExpandableHereString,
    Number,
    HashLiteral,
    HashEntry,
    ArrayExpression,
    SubExpression,
    ParenExpression,
    ArrayLiteral,
    MemberAccess,
    InvokeMember,
    Index,
    Redirection,
    Comment,
}

impl NodeKind {
    pub const ALL: &'static [NodeKind] = &[
        NodeKind::ScriptBlock,
        NodeKind::Block,
        NodeKind::NamedBlock,
        NodeKind::ScriptBlockExpression,
        NodeKind::ParamBlock,
        NodeKind::Parameter,
        NodeKind::Attribute,
        NodeKind::NamedArgument,
        NodeKind::TypeLiteral,
        NodeKind::FunctionDefinition,
        NodeKind::Pipeline,
        NodeKind::Command,
        NodeKind::CommandName,
        NodeKind::CommandParameter,
        NodeKind::BareWord,
        NodeKind::Assignment,
        NodeKind::If,
        NodeKind::ElseIf,
        NodeKind::Else,
        NodeKind::Foreach,
        NodeKind::For,
        NodeKind::While,
        NodeKind::DoLoop,
        NodeKind::Switch,
        NodeKind::SwitchClause,
        NodeKind::Try,
        NodeKind::Catch,
        NodeKind::Finally,
        NodeKind::Trap,
        NodeKind::FlowControl,
        NodeKind::BinaryExpression,
        NodeKind::UnaryExpression,
        NodeKind::Convert,
        NodeKind::Variable,
        NodeKind::StringLiteral,
        NodeKind::ExpandableString,
        NodeKind::HereString,
        NodeKind::ExpandableHereString,
        NodeKind::Number,
        NodeKind::HashLiteral,
        NodeKind::HashEntry,
        NodeKind::ArrayExpression,
        NodeKind::SubExpression,
        NodeKind::ParenExpression,
        NodeKind::ArrayLiteral,
        NodeKind::MemberAccess,
        NodeKind::InvokeMember,
        NodeKind::Index,
        NodeKind::Redirection,
        NodeKind::Comment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::ScriptBlock => "script_block",
            NodeKind::Block => "block",
            NodeKind::NamedBlock => "named_block",
            NodeKind::ScriptBlockExpression => "script_block_expression",
            NodeKind::ParamBlock => "param_block",
            NodeKind::Parameter => "parameter",
            NodeKind::Attribute => "attribute",
            NodeKind::NamedArgument => "named_argument",
            NodeKind::TypeLiteral => "type_literal",
            NodeKind::FunctionDefinition => "function_definition",
            NodeKind::Pipeline => "pipeline",
            NodeKind::Command => "command",
            NodeKind::CommandName => "command_name",
            NodeKind::CommandParameter => "command_parameter",
            NodeKind::BareWord => "bare_word",
            NodeKind::Assignment => "assignment",
            NodeKind::If => "if",
            NodeKind::ElseIf => "else_if",
            NodeKind::Else => "else",
            NodeKind::Foreach => "foreach",
            NodeKind::For => "for",
            NodeKind::While => "while",
            NodeKind::DoLoop => "do_loop",
            NodeKind::Switch => "switch",
            NodeKind::SwitchClause => "switch_clause",
            NodeKind::Try => "try",
            NodeKind::Catch => "catch",
            NodeKind::Finally => "finally",
            NodeKind::Trap => "trap",
            NodeKind::FlowControl => "flow_control",
            NodeKind::BinaryExpression => "binary_expression",
            NodeKind::UnaryExpression => "unary_expression",
            NodeKind::Convert => "convert",
            NodeKind::Variable => "variable",
            NodeKind::StringLiteral => "string_literal",
            NodeKind::ExpandableString => "expandable_string",
            NodeKind::HereString => "here_string",
            NodeKind::ExpandableHereString => "expandable_here_string",
            NodeKind::Number => "number",
            NodeKind::HashLiteral => "hash_literal",
            NodeKind::HashEntry => "hash_entry",
            NodeKind::ArrayExpression => "array_expression",
            NodeKind::SubExpression => "sub_expression",
            NodeKind::ParenExpression => "paren_expression",
            NodeKind::ArrayLiteral => "array_literal",
            NodeKind::MemberAccess => "member_access",
            NodeKind::InvokeMember => "invoke_member",
            NodeKind::Index => "index",
            NodeKind::Redirection => "redirection",
            NodeKind::Comment => "comment",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the generic syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    pub kind: NodeKind,
    /// Starting byte offset (inclusive)
    pub start: usize,
    /// Ending byte offset (exclusive)
    pub end: usize,
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    pub fn leaf(kind: NodeKind, start: usize, end: usize) -> Self {
        Self {
            kind,
            start,
            end,
            children: Vec::new(),
        }
    }

    pub fn with_children(
        kind: NodeKind,
        start: usize,
        end: usize,
        children: Vec<SyntaxNode>,
    ) -> Self {
        Self {
            kind,
            start,
            end,
            children,
        }
    }

    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `offset` falls inside this node's extent.
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    /// Source text covered by this node.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span()]
    }

    /// First direct child of the given kind.
    pub fn child(&self, kind: NodeKind) -> Option<&SyntaxNode> {
        self.children.iter().find(|c| c.kind == kind)
    }

    pub fn children_of(&self, kind: NodeKind) -> impl Iterator<Item = &SyntaxNode> {
        self.children.iter().filter(move |c| c.kind == kind)
    }

    /// Pre-order traversal over this node and all descendants.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// Innermost node containing `offset` whose kind passes `accept`.
    pub fn innermost_at(
        &self,
        offset: usize,
        accept: &dyn Fn(NodeKind) -> bool,
    ) -> Option<&SyntaxNode> {
        if !self.contains(offset) {
            return None;
        }
        for child in &self.children {
            if child.start > offset {
                break;
            }
            if let Some(found) = child.innermost_at(offset, accept) {
                return Some(found);
            }
        }
        accept(self.kind).then_some(self)
    }

    /// Chain of nodes from `self` down to the innermost node containing `offset`.
    pub fn path_to(&self, offset: usize) -> Vec<&SyntaxNode> {
        let mut path = Vec::new();
        let mut current = self;
        if !current.contains(offset) {
            return path;
        }
        loop {
            path.push(current);
            match current.children.iter().find(|c| c.contains(offset)) {
                Some(next) => current = next,
                None => return path,
            }
        }
    }
}

/// Pre-order iterator returned by [`SyntaxNode::descendants`].
pub struct Descendants<'a> {
    stack: Vec<&'a SyntaxNode>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a SyntaxNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// A parsed script: the root node plus the comments found while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxTree {
    root: SyntaxNode,
    comments: Vec<SyntaxNode>,
}

impl SyntaxTree {
    pub fn new(root: SyntaxNode, comments: Vec<SyntaxNode>) -> Self {
        Self { root, comments }
    }

    pub fn root(&self) -> &SyntaxNode {
        &self.root
    }

    /// Comments in document order.
    pub fn comments(&self) -> &[SyntaxNode] {
        &self.comments
    }

    pub fn descendants(&self) -> Descendants<'_> {
        self.root.descendants()
    }

    /// All nodes of `kind`, in document order.
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &SyntaxNode> {
        self.descendants().filter(move |n| n.kind == kind)
    }

    /// Innermost node at `offset` whose kind is in `kinds` (any kind when empty).
    pub fn innermost_of(&self, offset: usize, kinds: &[NodeKind]) -> Option<&SyntaxNode> {
        let accept = |kind: NodeKind| kinds.is_empty() || kinds.contains(&kind);
        self.root.innermost_at(offset, &accept)
    }

    /// Direct parent of `node`, which must belong to this tree.
    pub fn parent_of(&self, node: &SyntaxNode) -> Option<&SyntaxNode> {
        let path = self.root.path_to(node.start);
        let idx = path.iter().position(|n| std::ptr::eq(*n, node))?;
        idx.checked_sub(1).map(|parent| path[parent])
    }

    /// Whether a comment overlaps the byte range.
    pub fn has_comment_within(&self, range: Range<usize>) -> bool {
        self.comments
            .iter()
            .any(|c| c.start < range.end && range.start < c.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SyntaxNode {
        // root [0, 20): a [0, 8) { b [2, 5) }, c [10, 18)
        SyntaxNode::with_children(
            NodeKind::ScriptBlock,
            0,
            20,
            vec![
                SyntaxNode::with_children(
                    NodeKind::Pipeline,
                    0,
                    8,
                    vec![SyntaxNode::leaf(NodeKind::Variable, 2, 5)],
                ),
                SyntaxNode::leaf(NodeKind::Number, 10, 18),
            ],
        )
    }

    #[test]
    fn innermost_prefers_deepest_accepted_kind() {
        let root = sample();
        let any = |_| true;
        assert_eq!(root.innermost_at(3, &any).unwrap().kind, NodeKind::Variable);
        assert_eq!(root.innermost_at(6, &any).unwrap().kind, NodeKind::Pipeline);
        assert_eq!(root.innermost_at(9, &any).unwrap().kind, NodeKind::ScriptBlock);

        let pipelines = |k| k == NodeKind::Pipeline;
        assert_eq!(
            root.innermost_at(3, &pipelines).unwrap().kind,
            NodeKind::Pipeline
        );
        assert!(root.innermost_at(12, &pipelines).is_none());
    }

    #[test]
    fn descendants_are_preorder() {
        let root = sample();
        let kinds: Vec<_> = root.descendants().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::ScriptBlock,
                NodeKind::Pipeline,
                NodeKind::Variable,
                NodeKind::Number
            ]
        );
    }

    #[test]
    fn path_to_walks_down() {
        let root = sample();
        let path: Vec<_> = root.path_to(4).iter().map(|n| n.kind).collect();
        assert_eq!(
            path,
            vec![NodeKind::ScriptBlock, NodeKind::Pipeline, NodeKind::Variable]
        );
        assert!(root.path_to(25).is_empty());
    }

    #[test]
    fn parent_of_uses_node_identity() {
        let tree = SyntaxTree::new(sample(), Vec::new());
        let variable = tree.nodes_of(NodeKind::Variable).next().unwrap();
        assert_eq!(tree.parent_of(variable).unwrap().kind, NodeKind::Pipeline);
        assert!(tree.parent_of(tree.root()).is_none());

        let detached = SyntaxNode::leaf(NodeKind::Variable, 2, 5);
        assert!(tree.parent_of(&detached).is_none());
    }

    #[test]
    fn kind_table_is_complete() {
        let mut names: Vec<_> = NodeKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), NodeKind::ALL.len());
    }
}
