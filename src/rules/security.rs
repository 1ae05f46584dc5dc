//! Security rules: credentials, secure strings, transport and hashing.

use crate::analyzer::{Diagnostic, Severity};
use crate::document::SourceDocument;
use crate::edit::Edit;
use crate::ps::{NodeKind, SyntaxNode};
use crate::rules::support::{
    command_name, is_pipeline_head, parameter_name, parameter_type,
    parameter_value, parameter_variable, parameters, report, type_name, variable_name,
};
use crate::rules::{Category, FixContext, FixFailed, FixRule};

/// Declared type of a parameter that should be hardened.
enum WeakType<'n> {
    Untyped,
    String(&'n SyntaxNode),
}

fn weak_type<'n>(parameter: &'n SyntaxNode, source: &str) -> Option<WeakType<'n>> {
    match parameter_type(parameter, source) {
        None => Some(WeakType::Untyped),
        Some(ty) => match type_name(ty, source).as_str() {
            "string" | "system.string" | "object" | "system.object" => Some(WeakType::String(ty)),
            "string[]" | "system.string[]" => Some(WeakType::String(ty)),
            _ => None,
        },
    }
}

/// Replace a weak parameter type with `replacement`, or add it if untyped.
fn harden_parameter(ctx: &FixContext<'_>, replacement: &str) -> Result<Vec<Edit>, FixFailed> {
    let source = ctx.source();
    let variable = parameter_variable(ctx.node)
        .ok_or_else(|| FixFailed::new("parameter has no variable"))?;
    Ok(match weak_type(ctx.node, source) {
        Some(WeakType::Untyped) => vec![Edit::insert(variable.start, replacement)],
        Some(WeakType::String(ty)) => {
            let array = type_name(ty, source).ends_with("[]");
            let new_type = if array {
                format!("{}[]]", replacement.trim_end_matches(']'))
            } else {
                replacement.to_string()
            };
            vec![Edit::replace(source, ty.start, ty.end, new_type)]
        }
        None => Vec::new(),
    })
}

fn script_parameters(document: &SourceDocument) -> impl Iterator<Item = &SyntaxNode> {
    document
        .tree
        .nodes_of(NodeKind::ParamBlock)
        .flat_map(|block| block.children_of(NodeKind::Parameter))
}

pub struct PlainTextPassword;

impl PlainTextPassword {
    fn is_secret_name(name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        lower.contains("password") || lower.contains("passphrase")
    }
}

impl FixRule for PlainTextPassword {
    fn id(&self) -> &'static str {
        "PSAvoidUsingPlainTextForPassword"
    }

    fn category(&self) -> Category {
        Category::Security
    }

    fn description(&self) -> &'static str {
        "Password parameters should be typed [SecureString]"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::Parameter]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        script_parameters(document)
            .filter_map(|parameter| {
                let variable = parameter_variable(parameter)?;
                let name = variable_name(variable.text(source));
                (Self::is_secret_name(name) && weak_type(parameter, source).is_some()).then(|| {
                    report(
                        self,
                        document,
                        variable.start,
                        format!("Parameter '${name}' should use SecureString, otherwise the password is exposed in plain text."),
                    )
                })
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        harden_parameter(ctx, "[SecureString]")
    }
}

pub struct CredentialType;

impl FixRule for CredentialType {
    fn id(&self) -> &'static str {
        "PSUsePSCredentialType"
    }

    fn category(&self) -> Category {
        Category::Security
    }

    fn description(&self) -> &'static str {
        "Credential parameters should be typed [PSCredential]"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::Parameter]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        script_parameters(document)
            .filter_map(|parameter| {
                let variable = parameter_variable(parameter)?;
                let name = variable_name(variable.text(source));
                let is_credential = name.to_ascii_lowercase().ends_with("credential");
                (is_credential && weak_type(parameter, source).is_some()).then(|| {
                    report(
                        self,
                        document,
                        variable.start,
                        format!("The Credential parameter '${name}' must be of type PSCredential."),
                    )
                })
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        harden_parameter(ctx, "[PSCredential]")
    }
}

pub struct ConvertToSecureStringWithPlainText;

impl FixRule for ConvertToSecureStringWithPlainText {
    fn id(&self) -> &'static str {
        "PSAvoidUsingConvertToSecureStringWithPlainText"
    }

    fn category(&self) -> Category {
        Category::Security
    }

    fn description(&self) -> &'static str {
        "Prompt for secure input instead of converting plain text"
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::Command]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .nodes_of(NodeKind::Command)
            .filter(|command| {
                command_name(command, source)
                    .is_some_and(|name| name.eq_ignore_ascii_case("ConvertTo-SecureString"))
                    && parameters(command).any(|p| {
                        parameter_name(p, source).eq_ignore_ascii_case("AsPlainText")
                    })
            })
            .map(|command| {
                report(
                    self,
                    document,
                    command.start,
                    "File uses ConvertTo-SecureString with plaintext. This will expose secure information.",
                )
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        // Read-Host takes no pipeline input, so only a pipeline head is replaceable.
        if !is_pipeline_head(ctx.document, ctx.node) {
            return Ok(Vec::new());
        }
        let replacement = "Read-Host -Prompt 'Enter secure value' -AsSecureString";
        Ok(vec![Edit::replace(
            ctx.source(),
            ctx.node.start,
            ctx.node.end,
            replacement,
        )])
    }
}

pub struct AllowUnencryptedAuthentication;

impl FixRule for AllowUnencryptedAuthentication {
    fn id(&self) -> &'static str {
        "PSAvoidUsingAllowUnencryptedAuthentication"
    }

    fn category(&self) -> Category {
        Category::Security
    }

    fn description(&self) -> &'static str {
        "Do not send credentials over unencrypted connections"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::CommandParameter]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .nodes_of(NodeKind::CommandParameter)
            .filter(|p| parameter_name(p, source).eq_ignore_ascii_case("AllowUnencryptedAuthentication"))
            .map(|p| {
                report(
                    self,
                    document,
                    p.start,
                    "The AllowUnencryptedAuthentication switch sends credentials in clear text.",
                )
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        let before = &source[..ctx.node.start];
        let start = before.trim_end_matches([' ', '\t']).len();
        Ok(vec![Edit::delete(source, start, ctx.node.end)])
    }
}

pub struct BrokenHashAlgorithms;

impl BrokenHashAlgorithms {
    const BROKEN: &'static [&'static str] = &["md5", "sha1", "mactripledes", "ripemd160"];

    fn unquoted<'s>(node: &SyntaxNode, source: &'s str) -> &'s str {
        node.text(source).trim_matches(['\'', '"'])
    }

    fn is_broken(node: &SyntaxNode, source: &str) -> bool {
        matches!(
            node.kind,
            NodeKind::BareWord | NodeKind::StringLiteral | NodeKind::ExpandableString
        ) && Self::BROKEN.contains(&Self::unquoted(node, source).to_ascii_lowercase().as_str())
    }
}

impl FixRule for BrokenHashAlgorithms {
    fn id(&self) -> &'static str {
        "PSAvoidUsingBrokenHashAlgorithms"
    }

    fn category(&self) -> Category {
        Category::Security
    }

    fn description(&self) -> &'static str {
        "Use SHA256 instead of MD5, SHA1, MACTripleDES or RIPEMD160"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[
            NodeKind::BareWord,
            NodeKind::StringLiteral,
            NodeKind::ExpandableString,
        ]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        let mut found = Vec::new();
        for command in document.tree.nodes_of(NodeKind::Command) {
            for parameter in parameters(command) {
                if !parameter_name(parameter, source).eq_ignore_ascii_case("Algorithm") {
                    continue;
                }
                if let Some(value) = parameter_value(command, parameter) {
                    if Self::is_broken(value, source) {
                        found.push(report(
                            self,
                            document,
                            value.start,
                            format!(
                                "The hash algorithm '{}' is not secure.",
                                Self::unquoted(value, source)
                            ),
                        ));
                    }
                }
            }
        }
        found
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        if !Self::is_broken(ctx.node, source) {
            return Ok(Vec::new());
        }
        let replacement = match ctx.node.kind {
            NodeKind::StringLiteral => "'SHA256'",
            NodeKind::ExpandableString => "\"SHA256\"",
            _ => "SHA256",
        };
        Ok(vec![Edit::replace(
            source,
            ctx.node.start,
            ctx.node.end,
            replacement,
        )])
    }
}
