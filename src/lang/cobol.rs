//! COBOL symbol extraction.
//!
//! Line-based and column-aware: in fixed-format sources the sequence area
//! (columns 1-6) is ignored and column 7 is the indicator area (`*` or `/`
//! marks a comment line). Paragraphs and section headers become
//! `procedure` symbols whose range extends to the next procedure; `COPY`
//! directives become imports; `PERFORM` and `CALL 'PROG'` statements
//! become call sites.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{CallSite, ImportSite, Language, ParseOutcome, ParsedSymbol, SymbolParser};
use crate::core::errors::Result;
use crate::core::models::SymbolKind;

static PROGRAM_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"PROGRAM-ID\.\s+([A-Z0-9-]+)").unwrap());
static SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s{0,11}([A-Z][A-Z0-9-]*)\s+SECTION\s*\.").unwrap());
static PARAGRAPH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s{0,11}([A-Z0-9][A-Z0-9-]*)\s*\.\s*$").unwrap());
static DATA_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*01\s+([A-Z0-9][A-Z0-9-]+)").unwrap());
static COPY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bCOPY\s+([A-Z0-9-]+)").unwrap());
static PERFORM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bPERFORM\s+([A-Z0-9-]+)").unwrap());
static CALL_PROG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bCALL\s+['"]([A-Z0-9-]+)['"]"#).unwrap());

/// Division and area names that look like paragraphs but are structure.
const STRUCTURAL_NAMES: &[&str] = &[
    "IDENTIFICATION",
    "ENVIRONMENT",
    "DATA",
    "PROCEDURE",
    "WORKING-STORAGE",
    "LINKAGE",
    "FILE",
    "SCREEN",
    "INPUT-OUTPUT",
    "FILE-CONTROL",
    "CONFIGURATION",
];

/// Keywords that follow PERFORM without naming a paragraph.
const PERFORM_MODIFIERS: &[&str] = &["VARYING", "UNTIL", "TIMES", "THRU", "THROUGH"];

/// COBOL parser (column-aware, line-based).
pub struct CobolParser;

impl CobolParser {
    /// Create a new COBOL parser.
    pub fn new() -> Self {
        Self
    }
}

impl Default for CobolParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolParser for CobolParser {
    fn language(&self) -> Language {
        Language::Cobol
    }

    fn parse(&mut self, source: &str, _path: &str) -> Result<ParseOutcome> {
        let mut outcome = ParseOutcome::default();
        let lines: Vec<&str> = source.lines().collect();

        // Index of the symbols vec entry whose range is still growing.
        let mut open_procedure: Option<usize> = None;

        for (idx, raw) in lines.iter().enumerate() {
            let line_num = idx + 1;
            if is_comment_line(raw) {
                continue;
            }
            let line = effective_area(raw).to_ascii_uppercase();
            if line.trim().is_empty() {
                continue;
            }

            if let Some(caps) = PROGRAM_ID.captures(&line) {
                let name = caps[1].to_string();
                outcome.entry_hints.push(name.clone());
                outcome.symbols.push(ParsedSymbol {
                    signature: format!("PROGRAM-ID. {name}"),
                    name,
                    kind: SymbolKind::Procedure,
                    line_start: line_num,
                    line_end: line_num,
                });
                continue;
            }

            if let Some(caps) = SECTION.captures(&line) {
                close_open(&mut open_procedure);
                let name = caps[1].to_string();
                if !STRUCTURAL_NAMES.contains(&name.as_str()) {
                    outcome.symbols.push(ParsedSymbol {
                        signature: format!("{name} SECTION."),
                        name,
                        kind: SymbolKind::Procedure,
                        line_start: line_num,
                        line_end: line_num,
                    });
                    open_procedure = Some(outcome.symbols.len() - 1);
                }
                continue;
            }

            if let Some(caps) = PARAGRAPH.captures(&line) {
                let name = caps[1].to_string();
                if !STRUCTURAL_NAMES.contains(&name.as_str()) {
                    close_open(&mut open_procedure);
                    outcome.symbols.push(ParsedSymbol {
                        signature: format!("{name}."),
                        name,
                        kind: SymbolKind::Procedure,
                        line_start: line_num,
                        line_end: line_num,
                    });
                    open_procedure = Some(outcome.symbols.len() - 1);
                }
                continue;
            }

            if let Some(caps) = DATA_ITEM.captures(&line) {
                outcome.symbols.push(ParsedSymbol {
                    name: caps[1].to_string(),
                    kind: SymbolKind::Variable,
                    line_start: line_num,
                    line_end: line_num,
                    signature: line.trim().to_string(),
                });
            }

            if let Some(caps) = COPY.captures(&line) {
                outcome.imports.push(ImportSite {
                    module: caps[1].to_string(),
                    line: line_num,
                    kind: "copy",
                });
            }

            for caps in PERFORM.captures_iter(&line) {
                let callee = caps[1].to_string();
                if !PERFORM_MODIFIERS.contains(&callee.as_str()) {
                    outcome.calls.push(CallSite {
                        callee_name: callee,
                        line: line_num,
                    });
                }
            }

            for caps in CALL_PROG.captures_iter(&line) {
                outcome.calls.push(CallSite {
                    callee_name: caps[1].to_string(),
                    line: line_num,
                });
            }

            // Keep the open procedure's range growing over its body.
            if let Some(open_idx) = open_procedure {
                outcome.symbols[open_idx].line_end = line_num;
            }
        }

        Ok(outcome)
    }
}

/// Stop growing the open procedure's range; its `line_end` already tracks
/// the last non-blank body line.
fn close_open(open: &mut Option<usize>) {
    *open = None;
}

/// Comment detection: indicator area (column 7) `*` or `/`, or a `*` that
/// starts the trimmed line in free-format sources.
fn is_comment_line(line: &str) -> bool {
    let bytes = line.as_bytes();
    if bytes.len() > 6 && (bytes[6] == b'*' || bytes[6] == b'/') {
        return true;
    }
    let trimmed = line.trim_start();
    trimmed.starts_with('*')
}

/// Strip the sequence area (columns 1-6) when the line is fixed-format.
fn effective_area(line: &str) -> &str {
    let bytes = line.as_bytes();
    if bytes.len() > 7 && bytes[..6].iter().all(|b| b.is_ascii_digit()) {
        &line[7..]
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParseOutcome {
        CobolParser::new().parse(source, "test.cbl").unwrap()
    }

    const PAYROLL: &str = "\
       IDENTIFICATION DIVISION.
       PROGRAM-ID. PAYROLL.
       PROCEDURE DIVISION.
       MAIN-PARAGRAPH.
           PERFORM COMPUTE-PAY.
           PERFORM PRINT-CHECK.
           STOP RUN.
       COMPUTE-PAY.
           MOVE 100 TO WS-PAY.
       PRINT-CHECK.
           DISPLAY WS-PAY.
";

    #[test]
    fn test_paragraphs_become_procedures() {
        let outcome = parse(PAYROLL);
        let names: Vec<_> = outcome
            .symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Procedure)
            .map(|s| s.name.as_str())
            .collect();
        assert!(names.contains(&"PAYROLL"));
        assert!(names.contains(&"MAIN-PARAGRAPH"));
        assert!(names.contains(&"COMPUTE-PAY"));
        assert!(names.contains(&"PRINT-CHECK"));
    }

    #[test]
    fn test_paragraph_ranges_extend_to_next() {
        let outcome = parse(PAYROLL);
        let main = outcome
            .symbols
            .iter()
            .find(|s| s.name == "MAIN-PARAGRAPH")
            .unwrap();
        assert_eq!(main.line_start, 4);
        assert_eq!(main.line_end, 7);
    }

    #[test]
    fn test_perform_call_sites() {
        let outcome = parse(PAYROLL);
        let callees: Vec<_> = outcome.calls.iter().map(|c| c.callee_name.as_str()).collect();
        assert!(callees.contains(&"COMPUTE-PAY"));
        assert!(callees.contains(&"PRINT-CHECK"));
    }

    #[test]
    fn test_program_id_is_entry_hint() {
        let outcome = parse(PAYROLL);
        assert_eq!(outcome.entry_hints, vec!["PAYROLL"]);
    }

    #[test]
    fn test_perform_until_not_a_call() {
        let outcome = parse(
            "       LOOP-PARA.\n           PERFORM UNTIL WS-DONE = 1\n           END-PERFORM.\n",
        );
        assert!(outcome.calls.is_empty());
    }

    #[test]
    fn test_comment_indicator_column() {
        // Column 7 '*' marks a comment even when the text looks like a paragraph.
        let outcome = parse("      *HIDDEN-PARA.\n       REAL-PARA.\n");
        let names: Vec<_> = outcome.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["REAL-PARA"]);
    }

    #[test]
    fn test_sequence_area_ignored() {
        let outcome = parse("000100 MAIN-PARA.\n000200     DISPLAY 'HI'.\n");
        assert_eq!(outcome.symbols[0].name, "MAIN-PARA");
    }

    #[test]
    fn test_copy_directive_imports() {
        let outcome = parse("       COPY PAYLIB.\n");
        assert_eq!(outcome.imports.len(), 1);
        assert_eq!(outcome.imports[0].module, "PAYLIB");
        assert_eq!(outcome.imports[0].kind, "copy");
    }

    #[test]
    fn test_call_program_literal() {
        let outcome = parse("       MAIN-PARA.\n           CALL 'SUBPROG' USING WS-REC.\n");
        assert!(outcome.calls.iter().any(|c| c.callee_name == "SUBPROG"));
    }

    #[test]
    fn test_data_items() {
        let outcome = parse("       01 WS-TOTAL PIC 9(5).\n");
        assert_eq!(outcome.symbols[0].name, "WS-TOTAL");
        assert_eq!(outcome.symbols[0].kind, SymbolKind::Variable);
    }
}
