//! Advanced-function rules: ShouldProcess support, comment help and literal
//! initializers.

use crate::analyzer::Diagnostic;
use crate::document::SourceDocument;
use crate::edit::Edit;
use crate::ps::{NodeKind, SyntaxNode};
use crate::rules::support::{
    command_name, has_parameter, is_pipeline_head, line_indent, newline, report,
};
use crate::rules::{Category, FixContext, FixFailed, FixRule};

/// Name of a function definition.
fn function_name<'s>(function: &SyntaxNode, source: &'s str) -> Option<&'s str> {
    function.child(NodeKind::BareWord).map(|n| n.text(source))
}

/// Attribute name without brackets or arguments.
fn attribute_name<'s>(attribute: &SyntaxNode, source: &'s str) -> &'s str {
    let text = attribute.text(source).trim_start_matches('[');
    let end = text.find(['(', ']']).unwrap_or(text.len());
    text[..end].trim()
}

fn cmdlet_binding<'n>(param_block: &'n SyntaxNode, source: &str) -> Option<&'n SyntaxNode> {
    param_block
        .children_of(NodeKind::Attribute)
        .find(|a| attribute_name(a, source).eq_ignore_ascii_case("CmdletBinding"))
}

pub struct ShouldProcess;

impl ShouldProcess {
    const STATE_CHANGING_VERBS: &'static [&'static str] = &[
        "New", "Set", "Remove", "Start", "Stop", "Restart", "Reset", "Update",
    ];

    fn changes_state(function: &SyntaxNode, source: &str) -> bool {
        function_name(function, source)
            .and_then(|name| name.split_once('-'))
            .is_some_and(|(verb, _)| {
                Self::STATE_CHANGING_VERBS
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(verb))
            })
    }

    fn supports_should_process(binding: &SyntaxNode, source: &str) -> bool {
        binding.children_of(NodeKind::NamedArgument).any(|arg| {
            arg.child(NodeKind::BareWord)
                .is_some_and(|name| name.text(source).eq_ignore_ascii_case("SupportsShouldProcess"))
        })
    }

    /// Whether the function needs the fix and can take it.
    fn applies(function: &SyntaxNode, source: &str) -> bool {
        // `function Name($a) {}` has no room for an attribute.
        if function.child(NodeKind::ParamBlock).is_some() || !Self::changes_state(function, source) {
            return false;
        }
        let Some(body) = function.child(NodeKind::Block) else {
            return false;
        };
        match body.child(NodeKind::ParamBlock).and_then(|p| cmdlet_binding(p, source)) {
            Some(binding) => !Self::supports_should_process(binding, source),
            None => true,
        }
    }
}

impl FixRule for ShouldProcess {
    fn id(&self) -> &'static str {
        "PSUseShouldProcessForStateChangingFunctions"
    }

    fn category(&self) -> Category {
        Category::Advanced
    }

    fn description(&self) -> &'static str {
        "State-changing functions should support -WhatIf and -Confirm"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::FunctionDefinition]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .nodes_of(NodeKind::FunctionDefinition)
            .filter(|f| Self::applies(f, source))
            .map(|f| {
                report(
                    self,
                    document,
                    f.start,
                    format!(
                        "Function '{}' has verb that could change system state. Therefore, the function has to support 'ShouldProcess'.",
                        function_name(f, source).unwrap_or_default()
                    ),
                )
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        if !Self::applies(ctx.node, source) {
            return Ok(Vec::new());
        }
        let body = ctx
            .node
            .child(NodeKind::Block)
            .ok_or_else(|| FixFailed::new("function has no body"))?;
        let nl = newline(source);

        let Some(params) = body.child(NodeKind::ParamBlock) else {
            let inner = format!("{}    ", line_indent(source, ctx.node.start));
            let text = format!("{nl}{inner}[CmdletBinding(SupportsShouldProcess)]{nl}{inner}param()");
            return Ok(vec![Edit::insert(body.start + 1, text)]);
        };

        match cmdlet_binding(params, source) {
            Some(binding) => {
                let open = binding
                    .text(source)
                    .find('(')
                    .map(|i| binding.start + i + 1)
                    .ok_or_else(|| FixFailed::new("CmdletBinding attribute has no argument list"))?;
                let text = if binding.children.is_empty() {
                    "SupportsShouldProcess"
                } else {
                    "SupportsShouldProcess, "
                };
                Ok(vec![Edit::insert(open, text)])
            }
            None => {
                let indent = line_indent(source, params.start);
                let text = format!("[CmdletBinding(SupportsShouldProcess)]{nl}{indent}");
                Ok(vec![Edit::insert(params.start, text)])
            }
        }
    }
}

pub struct CommentHelp;

impl CommentHelp {
    fn has_help(document: &SourceDocument, function: &SyntaxNode) -> bool {
        let source = document.text.as_str();
        document.tree.comments().iter().any(|comment| {
            if !comment.text(source).to_ascii_lowercase().contains(".synopsis") {
                return false;
            }
            let inside = function.start <= comment.start && comment.end <= function.end;
            let directly_before = comment.end <= function.start
                && source[comment.end..function.start].trim().is_empty();
            inside || directly_before
        })
    }
}

impl FixRule for CommentHelp {
    fn id(&self) -> &'static str {
        "PSProvideCommentHelp"
    }

    fn category(&self) -> Category {
        Category::Advanced
    }

    fn description(&self) -> &'static str {
        "Functions should carry comment-based help"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::FunctionDefinition]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .nodes_of(NodeKind::FunctionDefinition)
            .filter(|f| !Self::has_help(document, f))
            .map(|f| {
                report(
                    self,
                    document,
                    f.start,
                    format!(
                        "The cmdlet '{}' does not have a help comment.",
                        function_name(f, source).unwrap_or_default()
                    ),
                )
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        if Self::has_help(ctx.document, ctx.node) {
            return Ok(Vec::new());
        }
        let source = ctx.source();
        let name = function_name(ctx.node, source)
            .ok_or_else(|| FixFailed::new("function has no name"))?;
        let body = ctx
            .node
            .child(NodeKind::Block)
            .ok_or_else(|| FixFailed::new("function has no body"))?;
        let nl = newline(source);
        let inner = format!("{}    ", line_indent(source, ctx.node.start));
        let help = format!("{nl}{inner}<#{nl}{inner}.SYNOPSIS{nl}{inner}{name}{nl}{inner}#>");
        Ok(vec![Edit::insert(body.start + 1, help)])
    }
}

pub struct LiteralHashtableInitializer;

impl LiteralHashtableInitializer {
    fn is_hashtable_type(name: &str) -> bool {
        let name = name.trim_matches(['\'', '"']);
        name.eq_ignore_ascii_case("Hashtable")
            || name.eq_ignore_ascii_case("System.Collections.Hashtable")
    }

    /// `New-Object Hashtable` or `New-Object -TypeName Hashtable`, nothing else.
    fn is_hashtable_construction(command: &SyntaxNode, source: &str) -> bool {
        if !command_name(command, source).is_some_and(|n| n.eq_ignore_ascii_case("New-Object")) {
            return false;
        }
        match command.children.get(1..).unwrap_or_default() {
            [param] if param.kind == NodeKind::CommandParameter => {
                has_parameter(command, source, &["TypeName"])
                    && param
                        .children
                        .first()
                        .is_some_and(|ty| Self::is_hashtable_type(ty.text(source)))
            }
            [ty] => Self::is_hashtable_type(ty.text(source)),
            [param, ty] => {
                param.kind == NodeKind::CommandParameter
                    && param.children.is_empty()
                    && has_parameter(command, source, &["TypeName"])
                    && Self::is_hashtable_type(ty.text(source))
            }
            _ => false,
        }
    }
}

impl FixRule for LiteralHashtableInitializer {
    fn id(&self) -> &'static str {
        "PSUseLiteralInitializerForHashtable"
    }

    fn category(&self) -> Category {
        Category::Advanced
    }

    fn description(&self) -> &'static str {
        "Create hashtables with @{} instead of New-Object"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::Command]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .nodes_of(NodeKind::Command)
            .filter(|c| Self::is_hashtable_construction(c, source))
            .map(|c| {
                report(
                    self,
                    document,
                    c.start,
                    "Create hashtables with literal initializers",
                )
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        if !Self::is_hashtable_construction(ctx.node, source)
            || !is_pipeline_head(ctx.document, ctx.node)
        {
            return Ok(Vec::new());
        }
        Ok(vec![Edit::replace(source, ctx.node.start, ctx.node.end, "@{}")])
    }
}
