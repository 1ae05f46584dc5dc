//! PowerShell front end: parser adapter and the grammar-independent tree.

pub mod errors;
pub mod parser;
pub mod tree;

pub use errors::ParseError;
pub use parser::{is_numeric_literal, parse, PowerShellParser};
pub use tree::{Descendants, NodeKind, SyntaxNode, SyntaxTree};
