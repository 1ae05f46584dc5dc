//! Structural invariants of parsed trees: every child sits inside its parent,
//! siblings are ordered and disjoint, and the root spans the whole text.

use proptest::prelude::*;
use psfix::ps::parse;
use psfix::SyntaxNode;

const STATEMENTS: &[&str] = &[
    "Get-ChildItem -Path $root -Recurse | Where-Object { $_.Length -gt 1kb } | Sort-Object Name",
    "$total = ($a + $b) * 2 - $c / 4",
    "if ($x -eq $null) { Write-Output 'none' } elseif ($x -lt 0) { return } else { $x++ }",
    "foreach ($item in @(1, 2, 3)) { \"item $item and $($item * 2)\" }",
    "$h = @{ Name = 'x'; Count = 3 }",
    "try { Get-Item -Path:$p -ErrorAction Stop } catch [System.IO.IOException] { throw } finally { $done = $true }",
    "function Get-Thing {\n    param([Parameter(Mandatory)][string]$Name, [int]$Count = 1)\n    $Name * $Count\n}",
    "switch ($value) {\n    1 { 'one' }\n    'two' { 2 }\n    default { $null }\n}",
    "& $script -Verbose 2>&1 > out.txt # trailing note",
    "while ($i -lt 10) { $i += 1; if ($i -band 1) { continue } }",
    "$list = [System.Collections.Generic.List[string]]::new(); $list.Add('a')",
    "[void]$cache.Remove($key)",
    "<# block comment #> $s = \"a`tb\" -replace 'a', 'b'",
    "for ($i = 0; $i -lt $n.Count; $i++) { $n[$i] }",
    "do { $x-- } until (-not $x)",
];

const WRAPPERS: &[(&str, &str)] = &[
    ("if ($flag) {\n", "\n}"),
    ("function Invoke-Step {\n", "\n}"),
    ("& {\n", "\n}"),
    ("foreach ($n in $items) {\n", "\n}"),
];

fn check_node(node: &SyntaxNode, source: &str) -> Result<(), String> {
    if node.start > node.end || node.end > source.len() {
        return Err(format!("{} has a bad extent {:?}", node.kind, node.span()));
    }
    let mut cursor = node.start;
    for child in &node.children {
        if child.start < cursor || child.end > node.end {
            return Err(format!(
                "{} {:?} is not inside {} {:?} after offset {cursor}",
                child.kind,
                child.span(),
                node.kind,
                node.span()
            ));
        }
        cursor = child.end;
        check_node(child, source)?;
    }
    Ok(())
}

fn check_tree(source: &str) -> Result<(), String> {
    let tree = parse(source).map_err(|e| format!("{source:?} failed to parse: {e}"))?;
    let root = tree.root();
    if root.span() != (0..source.len()) {
        return Err(format!("root spans {:?}, text is {} bytes", root.span(), source.len()));
    }
    check_node(root, source)?;

    let mut cursor = 0;
    for comment in tree.comments() {
        if comment.start < cursor || comment.end > source.len() {
            return Err(format!("comment {:?} out of order", comment.span()));
        }
        if !comment.text(source).starts_with('#') && !comment.text(source).starts_with("<#") {
            return Err(format!("comment {:?} is not a comment", comment.text(source)));
        }
        cursor = comment.end;
    }
    Ok(())
}

#[test]
fn every_sample_statement_is_well_formed() {
    for statement in STATEMENTS {
        check_tree(statement).unwrap();
        check_tree(&format!("{statement}\n")).unwrap();
    }
}

#[test]
fn whole_script_is_well_formed() {
    let script = format!(
        "param([string]$Root = '.')\n\n{}\n# done\n",
        STATEMENTS.join("\n\n")
    );
    check_tree(&script).unwrap();
}

#[test]
fn blank_scripts_have_an_empty_well_formed_root() {
    for source in ["", "\n\n", "   ", "# only a comment\n"] {
        check_tree(source).unwrap();
    }
}

fn script() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(0..STATEMENTS.len(), 0..6),
        prop::collection::vec(0..WRAPPERS.len(), 0..4),
    )
        .prop_map(|(statements, wrappers)| {
            let body = statements
                .into_iter()
                .map(|i| STATEMENTS[i])
                .collect::<Vec<_>>()
                .join("\n");
            wrappers.into_iter().fold(body, |body, i| {
                let (open, close) = WRAPPERS[i];
                format!("{open}{body}{close}")
            })
        })
}

proptest! {
    #[test]
    fn composed_scripts_are_well_formed(source in script()) {
        if let Err(problem) = check_tree(&source) {
            prop_assert!(false, "{}", problem);
        }
    }
}
