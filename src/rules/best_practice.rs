//! Best-practice rules: aliases, null comparisons, host output, error handling,
//! global state and switch defaults.

use crate::analyzer::Diagnostic;
use crate::document::SourceDocument;
use crate::edit::Edit;
use crate::ps::NodeKind;
use crate::rules::support::{
    command_name, command_name_node, is_dash, line_indent, newline, parameter_default,
    parameter_name, parameter_type, parameter_variable, parameters, report, type_name,
};
use crate::rules::{Category, FixContext, FixFailed, FixRule};

/// Built-in aliases and the commands they resolve to.
pub const ALIASES: &[(&str, &str)] = &[
    ("%", "ForEach-Object"),
    ("?", "Where-Object"),
    ("ac", "Add-Content"),
    ("cat", "Get-Content"),
    ("cd", "Set-Location"),
    ("chdir", "Set-Location"),
    ("clc", "Clear-Content"),
    ("clear", "Clear-Host"),
    ("cls", "Clear-Host"),
    ("copy", "Copy-Item"),
    ("cp", "Copy-Item"),
    ("cpi", "Copy-Item"),
    ("del", "Remove-Item"),
    ("dir", "Get-ChildItem"),
    ("echo", "Write-Output"),
    ("erase", "Remove-Item"),
    ("fl", "Format-List"),
    ("foreach", "ForEach-Object"),
    ("ft", "Format-Table"),
    ("gal", "Get-Alias"),
    ("gc", "Get-Content"),
    ("gci", "Get-ChildItem"),
    ("gcm", "Get-Command"),
    ("gi", "Get-Item"),
    ("gl", "Get-Location"),
    ("gm", "Get-Member"),
    ("gp", "Get-ItemProperty"),
    ("gps", "Get-Process"),
    ("group", "Group-Object"),
    ("gsv", "Get-Service"),
    ("gv", "Get-Variable"),
    ("h", "Get-History"),
    ("history", "Get-History"),
    ("icm", "Invoke-Command"),
    ("iex", "Invoke-Expression"),
    ("ipmo", "Import-Module"),
    ("irm", "Invoke-RestMethod"),
    ("iwr", "Invoke-WebRequest"),
    ("kill", "Stop-Process"),
    ("ls", "Get-ChildItem"),
    ("measure", "Measure-Object"),
    ("mi", "Move-Item"),
    ("move", "Move-Item"),
    ("mv", "Move-Item"),
    ("ni", "New-Item"),
    ("popd", "Pop-Location"),
    ("ps", "Get-Process"),
    ("pushd", "Push-Location"),
    ("pwd", "Get-Location"),
    ("rd", "Remove-Item"),
    ("ri", "Remove-Item"),
    ("rm", "Remove-Item"),
    ("rmdir", "Remove-Item"),
    ("select", "Select-Object"),
    ("si", "Set-Item"),
    ("sl", "Set-Location"),
    ("sleep", "Start-Sleep"),
    ("sort", "Sort-Object"),
    ("sp", "Set-ItemProperty"),
    ("spps", "Stop-Process"),
    ("start", "Start-Process"),
    ("sv", "Set-Variable"),
    ("tee", "Tee-Object"),
    ("type", "Get-Content"),
    ("where", "Where-Object"),
    ("write", "Write-Output"),
];

pub fn resolve_alias(name: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(_, command)| *command)
}

pub struct CmdletAliases;

impl FixRule for CmdletAliases {
    fn id(&self) -> &'static str {
        "PSAvoidUsingCmdletAliases"
    }

    fn category(&self) -> Category {
        Category::BestPractice
    }

    fn description(&self) -> &'static str {
        "Replace command aliases with the full command name"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::CommandName]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .nodes_of(NodeKind::CommandName)
            .filter_map(|name| {
                let text = name.text(source);
                resolve_alias(text).map(|command| {
                    report(
                        self,
                        document,
                        name.start,
                        format!("'{text}' is an alias of '{command}'. Alias can introduce possible problems and make scripts hard to maintain."),
                    )
                })
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let Some(command) = resolve_alias(ctx.node_text()) else {
            return Ok(Vec::new());
        };
        Ok(vec![Edit::replace(
            ctx.source(),
            ctx.node.start,
            ctx.node.end,
            command,
        )])
    }
}

pub struct ComparisonWithNull;

impl ComparisonWithNull {
    fn is_null(text: &str) -> bool {
        text.eq_ignore_ascii_case("$null")
    }

    fn is_equality_operator(op: &str) -> bool {
        let op = op.trim().trim_start_matches(is_dash).to_ascii_lowercase();
        matches!(op.as_str(), "eq" | "ne" | "ceq" | "cne" | "ieq" | "ine")
    }
}

impl FixRule for ComparisonWithNull {
    fn id(&self) -> &'static str {
        "PSPossibleIncorrectComparisonWithNull"
    }

    fn category(&self) -> Category {
        Category::BestPractice
    }

    fn description(&self) -> &'static str {
        "Put $null on the left side of equality comparisons"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::BinaryExpression]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .nodes_of(NodeKind::BinaryExpression)
            .filter_map(|expr| {
                let [lhs, rhs] = expr.children.as_slice() else {
                    return None;
                };
                let op = &source[lhs.end..rhs.start];
                let flagged = rhs.kind == NodeKind::Variable
                    && Self::is_null(rhs.text(source))
                    && !Self::is_null(lhs.text(source))
                    && Self::is_equality_operator(op);
                // Reported at the right operand so the innermost comparison is matched.
                flagged.then(|| {
                    report(
                        self,
                        document,
                        rhs.start,
                        "$null should be on the left side of equality comparisons.",
                    )
                })
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        let [lhs, rhs] = ctx.node.children.as_slice() else {
            return Err(FixFailed::new("comparison must have two operands"));
        };
        let op = &source[lhs.end..rhs.start];
        if !Self::is_equality_operator(op) || !Self::is_null(rhs.text(source)) {
            return Ok(Vec::new());
        }
        let swapped = format!("{}{}{}", rhs.text(source), op, lhs.text(source));
        Ok(vec![Edit::replace(source, lhs.start, rhs.end, swapped)])
    }
}

pub struct WriteHost;

impl WriteHost {
    /// Parameters with no Write-Output equivalent.
    const HOST_ONLY: &'static [&'static str] =
        &["ForegroundColor", "BackgroundColor", "NoNewline", "Separator", "Object"];
}

impl FixRule for WriteHost {
    fn id(&self) -> &'static str {
        "PSAvoidUsingWriteHost"
    }

    fn category(&self) -> Category {
        Category::BestPractice
    }

    fn description(&self) -> &'static str {
        "Use Write-Output instead of Write-Host"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::Command]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .nodes_of(NodeKind::Command)
            .filter(|c| command_name(c, source).is_some_and(|n| n.eq_ignore_ascii_case("Write-Host")))
            .map(|c| {
                report(
                    self,
                    document,
                    c.start,
                    "Write-Host output cannot be captured or redirected. Use Write-Output.",
                )
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        let host_only = parameters(ctx.node).any(|p| {
            let name = parameter_name(p, source);
            Self::HOST_ONLY.iter().any(|h| h.eq_ignore_ascii_case(name))
        });
        if host_only {
            return Ok(Vec::new());
        }
        let Some(name) = command_name_node(ctx.node) else {
            return Ok(Vec::new());
        };
        Ok(vec![Edit::replace(
            source,
            name.start,
            name.end,
            "Write-Output",
        )])
    }
}

pub struct EmptyCatchBlock;

impl FixRule for EmptyCatchBlock {
    fn id(&self) -> &'static str {
        "PSAvoidUsingEmptyCatchBlock"
    }

    fn category(&self) -> Category {
        Category::BestPractice
    }

    fn description(&self) -> &'static str {
        "Report errors from catch blocks instead of swallowing them"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::Catch]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        document
            .tree
            .nodes_of(NodeKind::Catch)
            .filter(|catch| {
                catch.child(NodeKind::Block).is_some_and(|body| {
                    body.children.is_empty() && !document.tree.has_comment_within(body.span())
                })
            })
            .map(|catch| {
                report(
                    self,
                    document,
                    catch.start,
                    "Empty catch block is used. Please use Write-Error or throw statements in catch blocks.",
                )
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        let body = ctx
            .node
            .child(NodeKind::Block)
            .ok_or_else(|| FixFailed::new("catch clause without a body"))?;
        if !body.children.is_empty() || ctx.tree().has_comment_within(body.span()) {
            return Ok(Vec::new());
        }
        let indent = line_indent(source, ctx.node.start);
        let nl = newline(source);
        let replacement = format!("{{{nl}{indent}    Write-Error -ErrorRecord $_{nl}{indent}}}");
        Ok(vec![Edit::replace(source, body.start, body.end, replacement)])
    }
}

pub struct GlobalVars;

impl GlobalVars {
    const PREFIX: &'static str = "$global:";
}

impl FixRule for GlobalVars {
    fn id(&self) -> &'static str {
        "PSAvoidGlobalVars"
    }

    fn category(&self) -> Category {
        Category::BestPractice
    }

    fn description(&self) -> &'static str {
        "Use script scope instead of global variables"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::Variable]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .nodes_of(NodeKind::Variable)
            .filter(|v| {
                v.text(source)
                    .get(..Self::PREFIX.len())
                    .is_some_and(|p| p.eq_ignore_ascii_case(Self::PREFIX))
            })
            .map(|v| {
                report(
                    self,
                    document,
                    v.start,
                    format!("Found global variable '{}'.", v.text(source)),
                )
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        let end = ctx.node.start + Self::PREFIX.len();
        match source.get(ctx.node.start..end) {
            Some(prefix) if prefix.eq_ignore_ascii_case(Self::PREFIX) => {
                Ok(vec![Edit::replace(source, ctx.node.start, end, "$script:")])
            }
            _ => Ok(Vec::new()),
        }
    }
}

pub struct DefaultValueSwitchParameter;

impl DefaultValueSwitchParameter {
    fn is_switch(parameter: &crate::ps::SyntaxNode, source: &str) -> bool {
        parameter_type(parameter, source).is_some_and(|ty| {
            matches!(
                type_name(ty, source).as_str(),
                "switch" | "switchparameter" | "system.management.automation.switchparameter"
            )
        })
    }
}

impl FixRule for DefaultValueSwitchParameter {
    fn id(&self) -> &'static str {
        "PSAvoidDefaultValueSwitchParameter"
    }

    fn category(&self) -> Category {
        Category::BestPractice
    }

    fn description(&self) -> &'static str {
        "Switch parameters should not default to a value"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::Parameter]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .nodes_of(NodeKind::Parameter)
            .filter(|p| Self::is_switch(p, source) && parameter_default(p).is_some())
            .filter_map(|p| {
                let variable = parameter_variable(p)?;
                Some(report(
                    self,
                    document,
                    variable.start,
                    "Switch parameter should not default to true or false.",
                ))
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        if !Self::is_switch(ctx.node, source) {
            return Ok(Vec::new());
        }
        match (parameter_variable(ctx.node), parameter_default(ctx.node)) {
            (Some(variable), Some(default)) => {
                Ok(vec![Edit::delete(source, variable.end, default.end)])
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{detect_count, fix_all};

    #[test]
    fn aliases_expand_to_commands() {
        let source = "gci -Recurse | ? { $_.Length -gt 10 } | % { $_.Name } | sort\n";
        assert_eq!(detect_count(&CmdletAliases, source), 4);
        assert_eq!(
            fix_all(&CmdletAliases, source),
            "Get-ChildItem -Recurse | Where-Object { $_.Length -gt 10 } | ForEach-Object { $_.Name } | Sort-Object\n"
        );
    }

    #[test]
    fn alias_lookup_ignores_case() {
        assert_eq!(resolve_alias("GCI"), Some("Get-ChildItem"));
        assert_eq!(resolve_alias("Get-ChildItem"), None);
    }

    #[test]
    fn null_moves_to_the_left() {
        let source = "if ($value -eq $null -or $other -ne $NULL) { }\n$x = $a + $b -eq $null\n";
        assert_eq!(detect_count(&ComparisonWithNull, source), 3);
        assert_eq!(
            fix_all(&ComparisonWithNull, source),
            "if ($null -eq $value -or $NULL -ne $other) { }\n$x = $null -eq $a + $b\n"
        );
    }

    #[test]
    fn write_host_without_host_parameters_becomes_write_output() {
        let source = "Write-Host 'done'\nWrite-Host 'red' -ForegroundColor Red\n";
        assert_eq!(detect_count(&WriteHost, source), 2);
        assert_eq!(
            fix_all(&WriteHost, source),
            "Write-Output 'done'\nWrite-Host 'red' -ForegroundColor Red\n"
        );
    }

    #[test]
    fn empty_catch_reports_the_error() {
        let source = "try {\n    Get-Item $p\n} catch {\n}\ntry { x } catch { <# ignored on purpose #> }\n";
        assert_eq!(detect_count(&EmptyCatchBlock, source), 1);
        assert_eq!(
            fix_all(&EmptyCatchBlock, source),
            "try {\n    Get-Item $p\n} catch {\n    Write-Error -ErrorRecord $_\n}\ntry { x } catch { <# ignored on purpose #> }\n"
        );
    }

    #[test]
    fn global_scope_becomes_script_scope() {
        let source = "$Global:Count = 1\nWrite-Output $global:Count\n$script:Other = 2\n";
        assert_eq!(
            fix_all(&GlobalVars, source),
            "$script:Count = 1\nWrite-Output $script:Count\n$script:Other = 2\n"
        );
    }

    #[test]
    fn switch_defaults_are_dropped() {
        let source = "function Invoke-It {\n    param([switch]$Force = $false, [int]$Count = 3)\n}\n";
        assert_eq!(detect_count(&DefaultValueSwitchParameter, source), 1);
        assert_eq!(
            fix_all(&DefaultValueSwitchParameter, source),
            "function Invoke-It {\n    param([switch]$Force, [int]$Count = 3)\n}\n"
        );
    }
}
