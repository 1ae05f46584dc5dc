//! Diagnostic model and its JSON wire format.
//!
//! Accepts PSScriptAnalyzer's `ConvertTo-Json` casing (`RuleName`, `Line`,
//! `Column`, `Severity`, `Extent.StartOffset`) as well as the camelCase form
//! psfix itself emits.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Where a diagnostic points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    /// 1-based line and 1-based character column
    LineColumn { line: usize, column: usize },
    /// Byte span into the analyzed text
    Span { start: usize, end: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Information,
    Warning,
    Error,
    ParseError,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Information => "Information",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::ParseError => "ParseError",
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Severity::Information),
            1 => Some(Severity::Warning),
            2 => Some(Severity::Error),
            3 => Some(Severity::ParseError),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "information" | "info" => Some(Severity::Information),
            "warning" | "warn" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "parseerror" | "parse_error" => Some(Severity::ParseError),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(i64),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Code(code) => Severity::from_code(code)
                .ok_or_else(|| de::Error::custom(format!("unknown severity code {code}"))),
            Raw::Name(name) => Severity::from_name(&name)
                .ok_or_else(|| de::Error::custom(format!("unknown severity '{name}'"))),
        }
    }
}

/// A reported rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireDiagnostic")]
pub struct Diagnostic {
    pub rule_id: String,
    pub location: Location,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        rule_id: impl Into<String>,
        location: Location,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            location,
            severity,
            message: message.into(),
        }
    }
}

#[derive(Deserialize)]
struct WireExtent {
    #[serde(default, alias = "StartOffset", alias = "startOffset")]
    start_offset: Option<usize>,
    #[serde(default, alias = "EndOffset", alias = "endOffset")]
    end_offset: Option<usize>,
}

#[derive(Deserialize)]
struct WireDiagnostic {
    #[serde(alias = "RuleName", alias = "ruleName", alias = "ruleId", alias = "rule")]
    rule_id: String,
    #[serde(default)]
    location: Option<Location>,
    #[serde(default, alias = "Line")]
    line: Option<usize>,
    #[serde(default, alias = "Column")]
    column: Option<usize>,
    #[serde(default)]
    start: Option<usize>,
    #[serde(default)]
    end: Option<usize>,
    #[serde(default, alias = "Extent")]
    extent: Option<WireExtent>,
    #[serde(default, alias = "Severity")]
    severity: Option<Severity>,
    #[serde(default, alias = "Message")]
    message: String,
}

impl TryFrom<WireDiagnostic> for Diagnostic {
    type Error = String;

    fn try_from(wire: WireDiagnostic) -> Result<Self, Self::Error> {
        let extent = wire
            .extent
            .as_ref()
            .and_then(|e| e.start_offset.map(|s| (s, e.end_offset.unwrap_or(s))));
        let location = match (wire.location, wire.line, wire.column, wire.start, extent) {
            (Some(location), ..) => location,
            (None, Some(line), column, _, _) => Location::LineColumn {
                line,
                column: column.unwrap_or(1),
            },
            (None, None, _, Some(start), _) => Location::Span {
                start,
                end: wire.end.unwrap_or(start),
            },
            (None, None, _, None, Some((start, end))) => Location::Span { start, end },
            _ => return Err(format!("diagnostic for {} has no location", wire.rule_id)),
        };
        Ok(Diagnostic {
            rule_id: wire.rule_id,
            location,
            severity: wire.severity.unwrap_or(Severity::Warning),
            message: wire.message,
        })
    }
}

/// Parse analyzer output: a JSON array, a single object, or nothing at all.
pub fn parse_diagnostics(input: &str) -> Result<Vec<Diagnostic>, serde_json::Error> {
    let trimmed = input.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Diagnostic>),
        One(Box<Diagnostic>),
    }

    Ok(match serde_json::from_str::<OneOrMany>(trimmed)? {
        OneOrMany::Many(list) => list,
        OneOrMany::One(single) => vec![*single],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_script_analyzer_output() {
        let json = r#"[
            {
                "RuleName": "PSAvoidUsingCmdletAliases",
                "Severity": 1,
                "Line": 3,
                "Column": 5,
                "Message": "'gci' is an alias of 'Get-ChildItem'.",
                "Extent": { "StartOffset": 40, "EndOffset": 43 },
                "ScriptName": "x.ps1"
            },
            {
                "RuleName": "PSAvoidUsingPlainTextForPassword",
                "Severity": "Error",
                "Extent": { "StartOffset": 10, "EndOffset": 19 },
                "Message": "plain text"
            }
        ]"#;
        let diagnostics = parse_diagnostics(json).unwrap();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].rule_id, "PSAvoidUsingCmdletAliases");
        assert_eq!(
            diagnostics[0].location,
            Location::LineColumn { line: 3, column: 5 }
        );
        assert_eq!(diagnostics[0].severity, Severity::Warning);
        assert_eq!(
            diagnostics[1].location,
            Location::Span { start: 10, end: 19 }
        );
        assert_eq!(diagnostics[1].severity, Severity::Error);
    }

    #[test]
    fn accepts_single_object_and_empty_output() {
        let single = r#"{"ruleId":"PSAvoidGlobalVars","line":1,"column":1,"severity":"warning","message":"m"}"#;
        assert_eq!(parse_diagnostics(single).unwrap().len(), 1);
        assert!(parse_diagnostics("  \n").unwrap().is_empty());
    }

    #[test]
    fn serialized_form_reads_back() {
        let diagnostic = Diagnostic::new(
            "PSAvoidTrailingWhitespace",
            Location::Span { start: 3, end: 5 },
            Severity::Information,
            "trailing whitespace",
        );
        let json = serde_json::to_string(&diagnostic).unwrap();
        assert!(json.contains("\"ruleId\""));
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diagnostic);
    }

    #[test]
    fn missing_location_is_rejected() {
        assert!(parse_diagnostics(r#"[{"RuleName":"X","Message":"m"}]"#).is_err());
        assert!(parse_diagnostics(r#"{"RuleName":"X","Severity":9,"Line":1}"#).is_err());
    }
}
