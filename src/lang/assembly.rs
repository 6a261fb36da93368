//! Assembly symbol extraction.
//!
//! Line-based: labels followed by instructions become functions whose
//! range runs to the next label, `.globl`/`.global` exports are entry
//! hints, `%include`/`.include` directives become imports, and
//! `call`/`jsr`/`bl`/`jal` instructions become call sites. Register
//! operands of indirect calls are not callees.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{CallSite, ImportSite, Language, ParseOutcome, ParsedSymbol, SymbolParser};
use crate::core::errors::Result;
use crate::core::models::SymbolKind;

static LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([._a-zA-Z][._a-zA-Z0-9]*):").unwrap());
static GLOBAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.(?:globl|global)\s+([._a-zA-Z][._a-zA-Z0-9]*)").unwrap());
static INCLUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(?:%include|\.include|INCLUDE)\s+"?([^\s"]+)"?"#).unwrap());
static CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:call|jsr|bl|jal)\s+([a-zA-Z_][a-zA-Z0-9_]*)").unwrap());

/// Register names an indirect `call *%reg` would otherwise surface.
const REGISTERS: &[&str] = &[
    "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rsp", "rbp", "eax", "ebx", "ecx", "edx",
];

/// Assembly parser (line-based).
pub struct AssemblyParser;

impl AssemblyParser {
    /// Create a new Assembly parser.
    pub fn new() -> Self {
        Self
    }
}

impl Default for AssemblyParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolParser for AssemblyParser {
    fn language(&self) -> Language {
        Language::Assembly
    }

    fn parse(&mut self, source: &str, _path: &str) -> Result<ParseOutcome> {
        let mut outcome = ParseOutcome::default();
        let mut open_label: Option<usize> = None;

        for (idx, raw) in source.lines().enumerate() {
            let line_num = idx + 1;
            let code = strip_comment(raw).trim();
            if code.is_empty() {
                continue;
            }

            if let Some(caps) = LABEL.captures(code) {
                let name = caps[1].to_string();
                // Compiler-local labels (.L*) are jump targets, not functions.
                if !name.starts_with(".L") {
                    // The previous label's range already tracks its last
                    // non-blank body line.
                    open_label = None;
                    outcome.symbols.push(ParsedSymbol {
                        signature: format!("{name}:"),
                        name,
                        kind: SymbolKind::Function,
                        line_start: line_num,
                        line_end: line_num,
                    });
                    open_label = Some(outcome.symbols.len() - 1);
                }
                continue;
            }

            if let Some(caps) = GLOBAL.captures(code) {
                outcome.entry_hints.push(caps[1].to_string());
                continue;
            }

            if let Some(caps) = INCLUDE.captures(code) {
                outcome.imports.push(ImportSite {
                    module: caps[1].to_string(),
                    line: line_num,
                    kind: "include",
                });
                continue;
            }

            for caps in CALL.captures_iter(code) {
                let callee = caps[1].to_string();
                if !REGISTERS.contains(&callee.to_ascii_lowercase().as_str()) {
                    outcome.calls.push(CallSite {
                        callee_name: callee,
                        line: line_num,
                    });
                }
            }

            if let Some(open_idx) = open_label {
                outcome.symbols[open_idx].line_end = line_num;
            }
        }

        Ok(outcome)
    }
}

fn strip_comment(line: &str) -> &str {
    let cut = line
        .find(';')
        .into_iter()
        .chain(line.find('#'))
        .chain(line.find("//"))
        .min();
    match cut {
        Some(pos) => &line[..pos],
        None => line,
    }
}
