//! Python symbol extraction with tree-sitter.

use tree_sitter::{Node, Parser};

use super::{CallSite, ImportSite, Language, ParseOutcome, ParsedSymbol, SymbolParser};
use crate::core::errors::{KvasirError, Result};
use crate::core::models::SymbolKind;

/// Python-specific parsing backed by the tree-sitter grammar.
pub struct PythonParser {
    parser: Parser,
}

impl PythonParser {
    /// Create a new Python parser.
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| {
                KvasirError::parse("python", format!("failed to load Python grammar: {e}"))
            })?;
        Ok(Self { parser })
    }

    fn walk(
        &self,
        node: Node,
        source: &str,
        class_depth: usize,
        outcome: &mut ParseOutcome,
    ) -> Result<()> {
        match node.kind() {
            "function_definition" => {
                if let Some(symbol) = self.function_symbol(node, source, class_depth)? {
                    outcome.symbols.push(symbol);
                }
                self.walk_children(node, source, class_depth, outcome)?;
                return Ok(());
            }
            "class_definition" => {
                if let Some(name) = field_text(node, "name", source) {
                    outcome.symbols.push(ParsedSymbol {
                        signature: format!("class {name}"),
                        name,
                        kind: SymbolKind::Class,
                        line_start: node.start_position().row + 1,
                        line_end: node.end_position().row + 1,
                    });
                }
                self.walk_children(node, source, class_depth + 1, outcome)?;
                return Ok(());
            }
            "assignment" => {
                // Only module-level bindings become symbols; locals are noise.
                if class_depth == 0 && is_module_level(node) {
                    if let Some(name) = assignment_target(node, source) {
                        outcome.symbols.push(ParsedSymbol {
                            signature: first_line(node_text(node, source)),
                            name,
                            kind: SymbolKind::Variable,
                            line_start: node.start_position().row + 1,
                            line_end: node.end_position().row + 1,
                        });
                    }
                }
            }
            "call" => {
                if let Some(callee) = call_target(node, source) {
                    outcome.calls.push(CallSite {
                        callee_name: callee,
                        line: node.start_position().row + 1,
                    });
                }
            }
            "import_statement" => {
                for module in import_names(node, source) {
                    outcome.imports.push(ImportSite {
                        module,
                        line: node.start_position().row + 1,
                        kind: "import",
                    });
                }
            }
            "import_from_statement" => {
                if let Some(module) = field_text(node, "module_name", source) {
                    outcome.imports.push(ImportSite {
                        module,
                        line: node.start_position().row + 1,
                        kind: "import",
                    });
                }
            }
            _ => {}
        }

        self.walk_children(node, source, class_depth, outcome)
    }

    fn walk_children(
        &self,
        node: Node,
        source: &str,
        class_depth: usize,
        outcome: &mut ParseOutcome,
    ) -> Result<()> {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, source, class_depth, outcome)?;
        }
        Ok(())
    }

    fn function_symbol(
        &self,
        node: Node,
        source: &str,
        class_depth: usize,
    ) -> Result<Option<ParsedSymbol>> {
        let Some(name) = field_text(node, "name", source) else {
            return Ok(None);
        };
        let params = field_text(node, "parameters", source).unwrap_or_else(|| "()".to_string());
        let kind = if class_depth > 0 {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        };
        Ok(Some(ParsedSymbol {
            signature: format!("def {name}{params}"),
            name,
            kind,
            line_start: node.start_position().row + 1,
            line_end: node.end_position().row + 1,
        }))
    }
}

impl SymbolParser for PythonParser {
    fn language(&self) -> Language {
        Language::Python
    }

    fn parse(&mut self, source: &str, path: &str) -> Result<ParseOutcome> {
        let tree = self.parser.parse(source, None).ok_or_else(|| {
            KvasirError::parse_in_file("python", "tree-sitter returned no tree", path, None)
        })?;

        let mut outcome = ParseOutcome::default();
        self.walk(tree.root_node(), source, 0, &mut outcome)?;
        Ok(outcome)
    }
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn field_text(node: Node, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| node_text(n, source).to_string())
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or("").trim().to_string()
}

/// Walk up from an assignment to check it sits directly at module level.
fn is_module_level(node: Node) -> bool {
    let mut current = node;
    while let Some(parent) = current.parent() {
        match parent.kind() {
            "module" => return true,
            "expression_statement" => {
                current = parent;
            }
            _ => return false,
        }
    }
    false
}

fn assignment_target(node: Node, source: &str) -> Option<String> {
    let left = node.child_by_field_name("left")?;
    if left.kind() == "identifier" {
        Some(node_text(left, source).to_string())
    } else {
        None
    }
}

/// Extract the callee name from a call node: a bare identifier, or the
/// trailing attribute of a dotted call (`obj.helper()` yields `helper`).
fn call_target(node: Node, source: &str) -> Option<String> {
    let func = node.child_by_field_name("function")?;
    match func.kind() {
        "identifier" => Some(node_text(func, source).to_string()),
        "attribute" => func
            .child_by_field_name("attribute")
            .map(|attr| node_text(attr, source).to_string()),
        _ => None,
    }
}

fn import_names(node: Node, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "dotted_name" => names.push(node_text(child, source).to_string()),
            "aliased_import" => {
                if let Some(name) = field_text(child, "name", source) {
                    names.push(name);
                }
            }
            _ => {}
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParseOutcome {
        PythonParser::new().unwrap().parse(source, "test.py").unwrap()
    }

    #[test]
    fn test_empty_function() {
        let outcome = parse("def f(): pass\n");
        assert_eq!(outcome.symbols.len(), 1);
        let sym = &outcome.symbols[0];
        assert_eq!(sym.name, "f");
        assert_eq!(sym.kind, SymbolKind::Function);
        assert_eq!(sym.line_start, 1);
        assert_eq!(sym.signature, "def f()");
    }

    #[test]
    fn test_methods_detected_inside_class_body() {
        let outcome = parse(
            "class Store:\n    def __init__(self):\n        self.items = []\n\n    def add(self, item):\n        self.items.append(item)\n",
        );
        let class = outcome
            .symbols
            .iter()
            .find(|s| s.kind == SymbolKind::Class)
            .unwrap();
        assert_eq!(class.name, "Store");

        let methods: Vec<_> = outcome
            .symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Method)
            .collect();
        assert_eq!(methods.len(), 2);

        // Enclosure: the class range contains its methods.
        for method in methods {
            assert!(class.line_start <= method.line_start);
            assert!(class.line_end >= method.line_end);
        }
    }

    #[test]
    fn test_module_level_variables_only() {
        let outcome = parse("LIMIT = 10\n\ndef f():\n    local = 1\n    return local\n");
        let vars: Vec<_> = outcome
            .symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Variable)
            .collect();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "LIMIT");
    }

    #[test]
    fn test_call_sites_are_raw_references() {
        let outcome = parse("def a():\n    b()\n    util.c()\n");
        let callees: Vec<_> = outcome.calls.iter().map(|c| c.callee_name.as_str()).collect();
        assert!(callees.contains(&"b"));
        assert!(callees.contains(&"c"));
        assert_eq!(outcome.calls[0].line, 2);
    }

    #[test]
    fn test_imports() {
        let outcome = parse("import os\nimport sys as system\nfrom pathlib import Path\n");
        let modules: Vec<_> = outcome.imports.iter().map(|i| i.module.as_str()).collect();
        assert!(modules.contains(&"os"));
        assert!(modules.contains(&"sys"));
        assert!(modules.contains(&"pathlib"));
    }

    #[test]
    fn test_nested_function_flattened_with_enclosing_range() {
        let outcome = parse("def outer():\n    def inner():\n        pass\n    inner()\n");
        let outer = outcome.symbols.iter().find(|s| s.name == "outer").unwrap();
        let inner = outcome.symbols.iter().find(|s| s.name == "inner").unwrap();
        assert!(outer.line_start <= inner.line_start && inner.line_end <= outer.line_end);
    }

    #[test]
    fn test_comment_only_file_has_no_symbols() {
        let outcome = parse("# just a comment\n");
        assert!(outcome.symbols.is_empty());
        assert!(outcome.calls.is_empty());
    }
}
