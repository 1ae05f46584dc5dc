//! Formatting rules. These never change what a script does.

use crate::analyzer::Diagnostic;
use crate::document::SourceDocument;
use crate::edit::Edit;
use crate::ps::{NodeKind, SyntaxNode};
use crate::rules::best_practice::ALIASES;
use crate::rules::support::{in_string_or_comment, is_string_kind, leading_word, report};
use crate::rules::{Category, FixContext, FixFailed, FixRule};

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Whether `offset` sits inside a string or here-string literal.
fn in_string(document: &SourceDocument, offset: usize) -> bool {
    document
        .tree
        .root()
        .path_to(offset)
        .iter()
        .any(|n| is_string_kind(n.kind))
}

pub struct TrailingWhitespace;

impl TrailingWhitespace {
    /// End of the blank run starting at `offset`, if it runs to the end of the line.
    fn blank_run_end(source: &str, offset: usize) -> Option<usize> {
        let rest = source.get(offset..)?;
        let len = rest.find(|c: char| !is_blank(c)).unwrap_or(rest.len());
        let end = offset + len;
        let at_line_end = source[end..].is_empty()
            || source[end..].starts_with('\n')
            || source[end..].starts_with("\r\n");
        (len > 0 && at_line_end).then_some(end)
    }
}

impl FixRule for TrailingWhitespace {
    fn id(&self) -> &'static str {
        "PSAvoidTrailingWhitespace"
    }

    fn category(&self) -> Category {
        Category::Formatting
    }

    fn description(&self) -> &'static str {
        "Remove whitespace at the end of lines"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        let mut found = Vec::new();
        let mut line_start = 0;
        for line in source.split_inclusive('\n') {
            let content = line.trim_end_matches(['\n', '\r']);
            let trimmed = content.trim_end_matches(is_blank);
            let offset = line_start + trimmed.len();
            line_start += line.len();
            // Escaped blanks and here-string content are significant.
            if trimmed.len() == content.len() || trimmed.ends_with('`') || in_string(document, offset) {
                continue;
            }
            found.push(report(self, document, offset, "Line has trailing whitespace"));
        }
        found
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        if source[..ctx.offset].ends_with('`') || in_string(ctx.document, ctx.offset) {
            return Ok(Vec::new());
        }
        Ok(Self::blank_run_end(source, ctx.offset)
            .map(|end| Edit::delete(source, ctx.offset, end))
            .into_iter()
            .collect())
    }
}

pub struct SemicolonLineTerminator;

impl SemicolonLineTerminator {
    const CONTAINERS: &'static [NodeKind] = &[
        NodeKind::ScriptBlock,
        NodeKind::Block,
        NodeKind::NamedBlock,
        NodeKind::ScriptBlockExpression,
        NodeKind::SubExpression,
        NodeKind::ArrayExpression,
    ];

    /// `;` followed only by blanks or a comment up to the end of the line.
    fn terminates_line(source: &str, offset: usize) -> bool {
        if !source[offset..].starts_with(';') {
            return false;
        }
        let rest = &source[offset + 1..];
        let line = &rest[..rest.find('\n').unwrap_or(rest.len())];
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    }

    fn is_statement_separator(document: &SourceDocument, offset: usize) -> bool {
        Self::terminates_line(&document.text, offset)
            && !in_string_or_comment(document, offset)
            && document
                .tree
                .innermost_of(offset, &[])
                .is_some_and(|n| Self::CONTAINERS.contains(&n.kind))
    }
}

impl FixRule for SemicolonLineTerminator {
    fn id(&self) -> &'static str {
        "PSAvoidSemicolonsAsLineTerminators"
    }

    fn category(&self) -> Category {
        Category::Formatting
    }

    fn description(&self) -> &'static str {
        "Lines should not end with a semicolon"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        Self::CONTAINERS
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        document
            .text
            .match_indices(';')
            .map(|(offset, _)| offset)
            .filter(|&offset| Self::is_statement_separator(document, offset))
            .map(|offset| report(self, document, offset, "Line ends with a semicolon"))
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        if !Self::is_statement_separator(ctx.document, ctx.offset) {
            return Ok(Vec::new());
        }
        Ok(vec![Edit::delete(ctx.source(), ctx.offset, ctx.offset + 1)])
    }
}

/// Cmdlets with a canonical spelling, beyond the alias targets.
const CMDLETS: &[&str] = &[
    "Add-Member",
    "ConvertFrom-Json",
    "ConvertTo-Json",
    "ConvertTo-SecureString",
    "Export-Csv",
    "Export-ModuleMember",
    "Get-Credential",
    "Get-Date",
    "Get-FileHash",
    "Import-Csv",
    "Join-Path",
    "New-Object",
    "Out-File",
    "Out-Null",
    "Out-String",
    "Read-Host",
    "Resolve-Path",
    "Select-String",
    "Set-Content",
    "Split-Path",
    "Test-Path",
    "Write-Debug",
    "Write-Error",
    "Write-Host",
    "Write-Information",
    "Write-Progress",
    "Write-Verbose",
    "Write-Warning",
];

/// Canonical spelling of a cmdlet name, ignoring ASCII case.
pub fn canonical_cmdlet(name: &str) -> Option<&'static str> {
    CMDLETS
        .iter()
        .copied()
        .chain(ALIASES.iter().map(|(_, command)| *command))
        .find(|c| c.eq_ignore_ascii_case(name))
}

pub struct CorrectCasing;

impl CorrectCasing {
    const KEYWORD_KINDS: &'static [NodeKind] = &[
        NodeKind::If,
        NodeKind::ElseIf,
        NodeKind::Else,
        NodeKind::Foreach,
        NodeKind::For,
        NodeKind::While,
        NodeKind::DoLoop,
        NodeKind::Switch,
        NodeKind::Try,
        NodeKind::Catch,
        NodeKind::Finally,
        NodeKind::Trap,
        NodeKind::FunctionDefinition,
        NodeKind::FlowControl,
        NodeKind::NamedBlock,
    ];

    const TARGETS: &'static [NodeKind] = &[
        NodeKind::CommandName,
        NodeKind::If,
        NodeKind::ElseIf,
        NodeKind::Else,
        NodeKind::Foreach,
        NodeKind::For,
        NodeKind::While,
        NodeKind::DoLoop,
        NodeKind::Switch,
        NodeKind::Try,
        NodeKind::Catch,
        NodeKind::Finally,
        NodeKind::Trap,
        NodeKind::FunctionDefinition,
        NodeKind::FlowControl,
        NodeKind::NamedBlock,
    ];

    /// Replacement text for a mis-cased node, as `(start, end, text)`.
    fn correction(node: &SyntaxNode, source: &str) -> Option<(usize, usize, String)> {
        if node.kind == NodeKind::CommandName {
            let name = node.text(source);
            let canonical = canonical_cmdlet(name)?;
            return (canonical != name).then(|| (node.start, node.end, canonical.to_string()));
        }
        if !Self::KEYWORD_KINDS.contains(&node.kind) {
            return None;
        }
        let word = leading_word(node, source);
        let lower = word.to_ascii_lowercase();
        (!word.is_empty() && lower != word).then(|| (node.start, node.start + word.len(), lower))
    }
}

impl FixRule for CorrectCasing {
    fn id(&self) -> &'static str {
        "PSUseCorrectCasing"
    }

    fn category(&self) -> Category {
        Category::Formatting
    }

    fn description(&self) -> &'static str {
        "Use the canonical casing of cmdlets and keywords"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        Self::TARGETS
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .descendants()
            .filter_map(|node| {
                let (start, _, text) = Self::correction(node, source)?;
                Some(report(
                    self,
                    document,
                    start,
                    format!("'{}' is not spelled as '{text}'", &source[start..start + text.len()]),
                ))
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        Ok(Self::correction(ctx.node, source)
            .map(|(start, end, text)| Edit::replace(source, start, end, text))
            .into_iter()
            .collect())
    }
}

pub struct ConsistentWhitespace;

impl ConsistentWhitespace {
    const TARGETS: &'static [NodeKind] = &[
        NodeKind::If,
        NodeKind::ElseIf,
        NodeKind::Else,
        NodeKind::Foreach,
        NodeKind::For,
        NodeKind::While,
        NodeKind::DoLoop,
        NodeKind::Switch,
        NodeKind::Try,
        NodeKind::Catch,
        NodeKind::Finally,
    ];

    /// Offsets in `node` where a single space is missing.
    fn missing_spaces(node: &SyntaxNode, source: &str) -> Vec<usize> {
        let mut offsets = Vec::new();
        let word = leading_word(node, source);

        // if( / foreach( / switch(
        let opens_paren = matches!(
            node.kind,
            NodeKind::If
                | NodeKind::ElseIf
                | NodeKind::Foreach
                | NodeKind::For
                | NodeKind::While
                | NodeKind::Switch
        );
        if opens_paren && source[node.start + word.len()..].starts_with('(') {
            offsets.push(node.start + word.len());
        }

        // }else / }catch / }finally
        let follows_block = matches!(
            node.kind,
            NodeKind::ElseIf | NodeKind::Else | NodeKind::Catch | NodeKind::Finally
        );
        if follows_block && source[..node.start].ends_with('}') {
            offsets.push(node.start);
        }

        // ){ / else{ / try{
        for block in node.children_of(NodeKind::Block) {
            let glued = source[..block.start]
                .chars()
                .next_back()
                .is_some_and(|c| c == ')' || c.is_alphanumeric());
            if glued {
                offsets.push(block.start);
            }
        }
        offsets
    }
}

impl FixRule for ConsistentWhitespace {
    fn id(&self) -> &'static str {
        "PSUseConsistentWhitespace"
    }

    fn category(&self) -> Category {
        Category::Formatting
    }

    fn description(&self) -> &'static str {
        "Separate keywords, parentheses and braces with a space"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        Self::TARGETS
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .descendants()
            .filter(|n| Self::TARGETS.contains(&n.kind))
            .flat_map(|n| Self::missing_spaces(n, source))
            .map(|offset| report(self, document, offset, "Use space before open brace or parenthesis"))
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let offsets = Self::missing_spaces(ctx.node, ctx.source());
        let chosen: Vec<usize> = if offsets.contains(&ctx.offset) {
            vec![ctx.offset]
        } else {
            offsets
        };
        Ok(chosen.into_iter().map(|o| Edit::insert(o, " ")).collect())
    }
}

pub struct ConstantStringQuotes;

impl ConstantStringQuotes {
    /// Content of a double-quoted string that needs no expansion.
    fn constant_content<'s>(node: &SyntaxNode, source: &'s str) -> Option<&'s str> {
        if node.kind != NodeKind::ExpandableString || !node.children.is_empty() {
            return None;
        }
        let content = node.text(source).strip_prefix('"')?.strip_suffix('"')?;
        let special = |c: char| {
            matches!(c, '$' | '`' | '\'' | '"' | '\u{2018}' | '\u{2019}' | '\u{201c}' | '\u{201d}')
        };
        (!content.contains(special)).then_some(content)
    }
}

impl FixRule for ConstantStringQuotes {
    fn id(&self) -> &'static str {
        "PSAvoidUsingDoubleQuotesForConstantString"
    }

    fn category(&self) -> Category {
        Category::Formatting
    }

    fn description(&self) -> &'static str {
        "Use single quotes for strings without expansions"
    }

    fn target_kinds(&self) -> &'static [NodeKind] {
        &[NodeKind::ExpandableString]
    }

    fn detect(&self, document: &SourceDocument) -> Vec<Diagnostic> {
        let source = document.text.as_str();
        document
            .tree
            .nodes_of(NodeKind::ExpandableString)
            .filter(|n| Self::constant_content(n, source).is_some())
            .map(|n| {
                report(
                    self,
                    document,
                    n.start,
                    "Use single quotes when a string has no variables or escape sequences",
                )
            })
            .collect()
    }

    fn transform(&self, ctx: &FixContext<'_>) -> Result<Vec<Edit>, FixFailed> {
        let source = ctx.source();
        Ok(Self::constant_content(ctx.node, source)
            .map(|content| Edit::replace(source, ctx.node.start, ctx.node.end, format!("'{content}'")))
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{detect_count, fix_all};

    #[test]
    fn trailing_whitespace_is_removed() {
        let source = "Get-Date  \r\n$x = 1\t\n# note   \nWrite-Output 'a'   ";
        assert_eq!(detect_count(&TrailingWhitespace, source), 4);
        assert_eq!(
            fix_all(&TrailingWhitespace, source),
            "Get-Date\r\n$x = 1\n# note\nWrite-Output 'a'"
        );
    }

    #[test]
    fn trailing_whitespace_in_here_strings_is_kept() {
        let source = "$t = @\"\nline one   \n\"@\nWrite-Output a`  \n";
        assert_eq!(detect_count(&TrailingWhitespace, source), 0);
    }

    #[test]
    fn terminating_semicolons_are_dropped() {
        let source = "$a = 1;\nGet-Date; # now\nfor ($i = 0; $i -lt 2; $i++) { $i; }\n$s = 'x;'\n";
        assert_eq!(detect_count(&SemicolonLineTerminator, source), 2);
        assert_eq!(
            fix_all(&SemicolonLineTerminator, source),
            "$a = 1\nGet-Date # now\nfor ($i = 0; $i -lt 2; $i++) { $i; }\n$s = 'x;'\n"
        );
    }

    #[test]
    fn cmdlet_and_keyword_casing_is_normalised() {
        let source = "If ($x) { get-childitem } ElseIf ($y) { WRITE-OUTPUT 1 } Else { Return }\n";
        assert_eq!(
            fix_all(&CorrectCasing, source),
            "if ($x) { Get-ChildItem } elseif ($y) { Write-Output 1 } else { return }\n"
        );
    }

    #[test]
    fn unknown_commands_keep_their_casing() {
        let source = "invoke-mytool -x\nGet-ChildItem\n";
        assert_eq!(detect_count(&CorrectCasing, source), 0);
    }

    #[test]
    fn keywords_get_spaces() {
        let source = "if($x){\n    1\n}else{\n    2\n}\ntry{ 3 }catch{ 4 }\nforeach($i in $list){ $i }\n";
        assert_eq!(
            fix_all(&ConsistentWhitespace, source),
            "if ($x) {\n    1\n} else {\n    2\n}\ntry { 3 } catch { 4 }\nforeach ($i in $list) { $i }\n"
        );
    }

    #[test]
    fn constant_strings_use_single_quotes() {
        let source = "$a = \"plain\"\n$b = \"hello $name\"\n$c = \"it's\"\n$d = \"$(Get-Date)\"\n";
        assert_eq!(detect_count(&ConstantStringQuotes, source), 1);
        assert_eq!(
            fix_all(&ConstantStringQuotes, source),
            "$a = 'plain'\n$b = \"hello $name\"\n$c = \"it's\"\n$d = \"$(Get-Date)\"\n"
        );
    }
}
