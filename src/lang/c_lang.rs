//! C symbol extraction with tree-sitter.

use tree_sitter::{Node, Parser};

use super::{CallSite, ImportSite, Language, ParseOutcome, ParsedSymbol, SymbolParser};
use crate::core::errors::{KvasirError, Result};
use crate::core::models::SymbolKind;

/// Control-flow keywords that the call regex in the grammar would otherwise
/// surface as callees.
const NON_CALLS: &[&str] = &["if", "while", "for", "switch", "return", "sizeof"];

/// C-specific parsing backed by the tree-sitter grammar.
pub struct CParser {
    parser: Parser,
}

impl CParser {
    /// Create a new C parser.
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_c::LANGUAGE.into())
            .map_err(|e| KvasirError::parse("c", format!("failed to load C grammar: {e}")))?;
        Ok(Self { parser })
    }

    fn walk(&self, node: Node, source: &str, outcome: &mut ParseOutcome) {
        match node.kind() {
            "function_definition" => {
                if let Some(symbol) = function_symbol(node, source) {
                    outcome.symbols.push(symbol);
                }
            }
            "type_definition" => {
                if let Some(symbol) = typedef_symbol(node, source) {
                    outcome.symbols.push(symbol);
                }
            }
            "preproc_include" => {
                if let Some(path) = node.child_by_field_name("path") {
                    let raw = node_text(path, source);
                    outcome.imports.push(ImportSite {
                        module: raw.trim_matches(['"', '<', '>']).to_string(),
                        line: node.start_position().row + 1,
                        kind: "include",
                    });
                }
            }
            "call_expression" => {
                if let Some(callee) = call_target(node, source) {
                    if !NON_CALLS.contains(&callee.as_str()) {
                        outcome.calls.push(CallSite {
                            callee_name: callee,
                            line: node.start_position().row + 1,
                        });
                    }
                }
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, source, outcome);
        }
    }
}

impl SymbolParser for CParser {
    fn language(&self) -> Language {
        Language::C
    }

    fn parse(&mut self, source: &str, path: &str) -> Result<ParseOutcome> {
        let tree = self.parser.parse(source, None).ok_or_else(|| {
            KvasirError::parse_in_file("c", "tree-sitter returned no tree", path, None)
        })?;

        let mut outcome = ParseOutcome::default();
        self.walk(tree.root_node(), source, &mut outcome);
        Ok(outcome)
    }
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Build a function symbol; the signature is the verbatim source between
/// the start of the definition and its compound-statement body.
fn function_symbol(node: Node, source: &str) -> Option<ParsedSymbol> {
    let declarator = node.child_by_field_name("declarator")?;
    let name = declarator_identifier(declarator, source)?;

    let signature = match node.child_by_field_name("body") {
        Some(body) => source[node.start_byte()..body.start_byte()].trim().to_string(),
        None => node_text(node, source).lines().next().unwrap_or("").to_string(),
    };

    Some(ParsedSymbol {
        name,
        kind: SymbolKind::Function,
        line_start: node.start_position().row + 1,
        line_end: node.end_position().row + 1,
        signature: normalize_ws(&signature),
    })
}

/// Typedef'd structs and unions surface as classes.
fn typedef_symbol(node: Node, source: &str) -> Option<ParsedSymbol> {
    let mut has_record = false;
    let mut name = None;

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "struct_specifier" | "union_specifier" => has_record = true,
            "type_identifier" => name = Some(node_text(child, source).to_string()),
            _ => {}
        }
    }

    if !has_record {
        return None;
    }
    let name = name?;

    Some(ParsedSymbol {
        signature: format!("typedef struct {name}"),
        name,
        kind: SymbolKind::Class,
        line_start: node.start_position().row + 1,
        line_end: node.end_position().row + 1,
    })
}

/// Peel pointer/paren declarators down to the identifier.
fn declarator_identifier(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source).to_string()),
        "function_declarator" | "pointer_declarator" | "parenthesized_declarator" => node
            .child_by_field_name("declarator")
            .and_then(|inner| declarator_identifier(inner, source)),
        _ => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if let Some(found) = declarator_identifier(child, source) {
                    return Some(found);
                }
            }
            None
        }
    }
}

fn call_target(node: Node, source: &str) -> Option<String> {
    let func = node.child_by_field_name("function")?;
    match func.kind() {
        "identifier" => Some(node_text(func, source).to_string()),
        "field_expression" => func
            .child_by_field_name("field")
            .map(|field| node_text(field, source).to_string()),
        _ => None,
    }
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
