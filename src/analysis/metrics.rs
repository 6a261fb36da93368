//! Per-symbol quality metrics: cyclomatic complexity, line counts,
//! maintainability index, and docstring extraction.
//!
//! Complexity is a fast text-based count of decision points, not a full
//! control-flow analysis: every conditional branch, loop header, exception
//! handler entry, ternary, case arm (default excluded), and boolean binary
//! operator adds one path. Nesting does not affect the count.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::lang::Language;

/// Metrics computed for one symbol's source slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolMetrics {
    pub cyclomatic_complexity: i64,
    pub loc: i64,
    pub comment_lines: i64,
    pub blank_lines: i64,
    /// Normalised to 0-100, higher is better
    pub maintainability_index: f64,
    /// True when Halstead volume was substituted by max(1, LOC)
    pub mi_approximated: bool,
}

/// Compute all metrics for a symbol's source slice.
pub fn analyze_symbol(source: &str, language: Language) -> SymbolMetrics {
    let complexity = cyclomatic_complexity(source, language);
    let (loc, comment_lines, blank_lines) = count_lines(source, language);
    let maintainability_index = maintainability_index(complexity, loc);

    SymbolMetrics {
        cyclomatic_complexity: complexity,
        loc,
        comment_lines,
        blank_lines,
        maintainability_index,
        mi_approximated: true,
    }
}

static PY_DECISIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(if|elif|for|while|except|and|or)\b").unwrap());
static PY_CASE_ARM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*case\s+(.+?)\s*:").unwrap());
static C_DECISIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(if|for|while|case)\b|\?|&&|\|\|").unwrap());
static C_DEFAULT_ARM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*default\s*:").unwrap());
static COBOL_DECISIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(IF|WHEN|AND|OR)\b|\bPERFORM\s+(UNTIL|VARYING)\b").unwrap());
static COBOL_END_SCOPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bEND-[A-Z]+\b").unwrap());
static ASM_DECISIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*(j[a-z]{1,4}|loop\w*)\b").unwrap());
static ASM_JMP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*jmp\b").unwrap());

/// Cyclomatic complexity: 1 + decision points in the slice.
///
/// Comments and string literals are blanked first so keywords inside them
/// do not count.
pub fn cyclomatic_complexity(source: &str, language: Language) -> i64 {
    let code = strip_noise(source, language);
    let mut complexity: i64 = 1;

    match language {
        Language::Python => {
            for line in code.lines() {
                complexity += PY_DECISIONS.find_iter(line).count() as i64;
                // `match` arms: every `case` counts except the wildcard default.
                if let Some(caps) = PY_CASE_ARM.captures(line) {
                    if caps[1].trim() != "_" {
                        complexity += 1;
                    }
                }
            }
        }
        Language::C => {
            for line in code.lines() {
                if C_DEFAULT_ARM.is_match(line) {
                    continue;
                }
                complexity += C_DECISIONS.find_iter(line).count() as i64;
            }
        }
        Language::Cobol => {
            let upper = code.to_ascii_uppercase();
            for line in upper.lines() {
                // Scope terminators (END-IF, END-PERFORM) are not branches.
                let line = COBOL_END_SCOPE.replace_all(line, "");
                for caps in COBOL_DECISIONS.captures_iter(&line) {
                    // WHEN OTHER is the default arm of EVALUATE.
                    if caps.get(1).map(|m| m.as_str()) == Some("WHEN")
                        && line.contains("WHEN OTHER")
                    {
                        continue;
                    }
                    complexity += 1;
                }
            }
        }
        Language::Assembly => {
            for line in code.lines() {
                if ASM_JMP.is_match(line) {
                    continue;
                }
                if ASM_DECISIONS.is_match(line) {
                    complexity += 1;
                }
            }
        }
    }

    complexity.max(1)
}

/// Count (code, comment, blank) lines in a source slice.
pub fn count_lines(source: &str, language: Language) -> (i64, i64, i64) {
    let mut code = 0i64;
    let mut comments = 0i64;
    let mut blanks = 0i64;

    match language {
        Language::Python => {
            let mut in_docstring = false;
            for line in source.lines() {
                let stripped = line.trim();
                if stripped.is_empty() {
                    blanks += 1;
                    continue;
                }
                let triples =
                    stripped.matches("\"\"\"").count() + stripped.matches("'''").count();
                if triples > 0 {
                    comments += 1;
                    if triples == 1 {
                        in_docstring = !in_docstring;
                    }
                    continue;
                }
                if in_docstring || stripped.starts_with('#') {
                    comments += 1;
                } else {
                    code += 1;
                }
            }
        }
        Language::C => {
            let mut in_block = false;
            for line in source.lines() {
                let stripped = line.trim();
                if stripped.is_empty() {
                    blanks += 1;
                    continue;
                }
                if in_block {
                    comments += 1;
                    if stripped.contains("*/") {
                        in_block = false;
                    }
                    continue;
                }
                if stripped.starts_with("/*") {
                    comments += 1;
                    if !stripped.contains("*/") {
                        in_block = true;
                    }
                    continue;
                }
                if stripped.starts_with("//") {
                    comments += 1;
                } else {
                    code += 1;
                }
            }
        }
        Language::Cobol => {
            for line in source.lines() {
                let bytes = line.as_bytes();
                if line.trim().is_empty() {
                    blanks += 1;
                } else if (bytes.len() > 6 && bytes[6] == b'*') || line.trim_start().starts_with('*')
                {
                    comments += 1;
                } else {
                    code += 1;
                }
            }
        }
        Language::Assembly => {
            for line in source.lines() {
                let stripped = line.trim();
                if stripped.is_empty() {
                    blanks += 1;
                } else if stripped.starts_with(';')
                    || stripped.starts_with('#')
                    || stripped.starts_with("//")
                {
                    comments += 1;
                } else {
                    code += 1;
                }
            }
        }
    }

    (code, comments, blanks)
}

/// Maintainability index normalised to 0-100.
///
/// Halstead volume is not available on the text path, so `max(1, LOC)`
/// stands in for it and callers record `mi_approximated = true`.
pub fn maintainability_index(complexity: i64, loc: i64) -> f64 {
    if loc <= 0 {
        return 100.0;
    }
    let v_halstead = loc.max(1) as f64;
    let raw = 171.0
        - 5.2 * v_halstead.ln()
        - 0.23 * complexity.max(1) as f64
        - 16.2 * (loc.max(1) as f64).ln();
    (raw * 100.0 / 171.0).clamp(0.0, 100.0)
}

/// Extract the docstring for a symbol starting at `line_start` (1-based).
///
/// Language rules: Python takes the first string literal in the body;
/// C the immediately preceding `/** ... */` block; Assembly the contiguous
/// preceding `;`/`//` lines; COBOL the contiguous preceding `*` lines.
pub fn extract_docstring(source: &str, language: Language, line_start: usize) -> Option<String> {
    match language {
        Language::Python => python_docstring(source, line_start),
        Language::C => c_docstring(source, line_start),
        Language::Assembly => preceding_comment_block(source, line_start, &[";", "//"]),
        Language::Cobol => cobol_docstring(source, line_start),
    }
}

fn python_docstring(source: &str, line_start: usize) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    if line_start == 0 || line_start > lines.len() {
        return None;
    }

    // Walk past the (possibly multi-line) signature to the body.
    let mut idx = line_start - 1;
    while idx < lines.len() && !lines[idx].trim_end().ends_with(':') {
        idx += 1;
    }
    idx += 1;

    // First non-blank statement must be a string literal.
    while idx < lines.len() && lines[idx].trim().is_empty() {
        idx += 1;
    }
    let first = lines.get(idx)?.trim();

    for quote in ["\"\"\"", "'''"] {
        if let Some(rest) = first.strip_prefix(quote) {
            if let Some(end) = rest.find(quote) {
                let text = rest[..end].trim();
                return (!text.is_empty()).then(|| text.to_string());
            }
            let mut parts: Vec<String> = Vec::new();
            if !rest.trim().is_empty() {
                parts.push(rest.trim().to_string());
            }
            for line in lines.iter().skip(idx + 1) {
                if let Some(end) = line.find(quote) {
                    let text = line[..end].trim();
                    if !text.is_empty() {
                        parts.push(text.to_string());
                    }
                    let joined = parts.join(" ");
                    return (!joined.is_empty()).then_some(joined);
                }
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
            return None;
        }
    }

    for quote in ['"', '\''] {
        if let Some(rest) = first.strip_prefix(quote) {
            if let Some(end) = rest.find(quote) {
                let text = rest[..end].trim();
                return (!text.is_empty()).then(|| text.to_string());
            }
        }
    }

    None
}

fn c_docstring(source: &str, line_start: usize) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    if line_start <= 1 || line_start > lines.len() + 1 {
        return None;
    }

    // The last non-blank line above the symbol must close a comment block.
    let mut end = None;
    for idx in (0..line_start - 1).rev() {
        let trimmed = lines[idx].trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.ends_with("*/") {
            end = Some(idx);
        }
        break;
    }
    let end = end?;

    // Walk up to the opener; only `/**` blocks qualify as docstrings.
    let mut start = None;
    for idx in (0..=end).rev() {
        let trimmed = lines[idx].trim();
        if trimmed.starts_with("/**") {
            start = Some(idx);
            break;
        }
        if trimmed.starts_with("/*") {
            return None;
        }
        if idx < end && !trimmed.starts_with('*') {
            return None;
        }
    }
    let start = start?;

    let mut parts: Vec<String> = Vec::new();
    for line in &lines[start..=end] {
        let mut body = line.trim();
        body = body.strip_prefix("/**").unwrap_or(body);
        body = body.strip_suffix("*/").unwrap_or(body);
        let body = body.trim().trim_start_matches('*').trim();
        if !body.is_empty() {
            parts.push(body.to_string());
        }
    }

    let joined = parts.join(" ");
    (!joined.is_empty()).then_some(joined)
}

fn cobol_docstring(source: &str, line_start: usize) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    if line_start <= 1 || line_start > lines.len() + 1 {
        return None;
    }

    let mut parts: Vec<String> = Vec::new();
    for idx in (0..line_start - 1).rev() {
        let line = lines[idx];
        let bytes = line.as_bytes();
        let is_comment =
            (bytes.len() > 6 && bytes[6] == b'*') || line.trim_start().starts_with('*');
        if is_comment {
            let body = line.trim_start().trim_start_matches('*');
            let body = body.strip_prefix('>').unwrap_or(body).trim();
            if !body.is_empty() {
                parts.insert(0, body.to_string());
            }
        } else {
            break;
        }
    }

    let joined = parts.join(" ");
    (!joined.is_empty()).then_some(joined)
}

fn preceding_comment_block(source: &str, line_start: usize, markers: &[&str]) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    if line_start <= 1 || line_start > lines.len() + 1 {
        return None;
    }

    let mut parts: Vec<String> = Vec::new();
    for idx in (0..line_start - 1).rev() {
        let line = lines[idx].trim();
        let marker = markers.iter().find(|m| line.starts_with(**m));
        match marker {
            Some(m) => {
                let body = line[m.len()..].trim();
                if !body.is_empty() {
                    parts.insert(0, body.to_string());
                }
            }
            None => break,
        }
    }

    let joined = parts.join(" ");
    (!joined.is_empty()).then_some(joined)
}

/// Blank out comments and string literals so keyword counting only sees code.
fn strip_noise(source: &str, language: Language) -> String {
    let mut out = String::with_capacity(source.len());

    for line in source.lines() {
        let stripped = match language {
            Language::Python => {
                let line = blank_strings(line, &['"', '\'']);
                match line.find('#') {
                    Some(pos) => line[..pos].to_string(),
                    None => line,
                }
            }
            Language::C => {
                let line = blank_strings(line, &['"']);
                let line = match line.find("//") {
                    Some(pos) => line[..pos].to_string(),
                    None => line,
                };
                // Block comments are handled coarsely per line.
                match (line.find("/*"), line.rfind("*/")) {
                    (Some(start), Some(end)) if end > start => {
                        format!("{}{}", &line[..start], &line[end + 2..])
                    }
                    (Some(start), _) => line[..start].to_string(),
                    _ => line,
                }
            }
            Language::Cobol => {
                let bytes = line.as_bytes();
                if (bytes.len() > 6 && bytes[6] == b'*') || line.trim_start().starts_with('*') {
                    String::new()
                } else {
                    blank_strings(line, &['"', '\''])
                }
            }
            Language::Assembly => {
                let cut = line
                    .find(';')
                    .into_iter()
                    .chain(line.find('#'))
                    .chain(line.find("//"))
                    .min();
                match cut {
                    Some(pos) => line[..pos].to_string(),
                    None => line.to_string(),
                }
            }
        };
        out.push_str(&stripped);
        out.push('\n');
    }

    out
}

/// Replace quoted literal contents with nothing, keeping line structure.
fn blank_strings(line: &str, quotes: &[char]) -> String {
    let mut out = String::with_capacity(line.len());
    let mut active: Option<char> = None;

    for ch in line.chars() {
        match active {
            Some(q) => {
                if ch == q {
                    active = None;
                }
            }
            None => {
                if quotes.contains(&ch) {
                    active = Some(ch);
                } else {
                    out.push(ch);
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_python_function_is_base_complexity() {
        assert_eq!(cyclomatic_complexity("def f(): pass\n", Language::Python), 1);
    }

    #[test]
    fn test_ten_nested_ifs() {
        let mut source = String::from("def deep(a, b, c, d, e, f, g, h, i, j):\n");
        for (depth, var) in ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]
            .iter()
            .enumerate()
        {
            source.push_str(&"    ".repeat(depth + 1));
            source.push_str(&format!("if {var}:\n"));
        }
        source.push_str(&"    ".repeat(11));
        source.push_str("pass\n");
        assert_eq!(cyclomatic_complexity(&source, Language::Python), 11);
    }

    #[test]
    fn test_boolean_compound_condition() {
        // 1 base + 1 if + 2 boolean operators.
        let v = cyclomatic_complexity("def f(a, b, c):\n    if a and b and c:\n        pass\n", Language::Python);
        assert_eq!(v, 4);
    }

    #[test]
    fn test_keywords_in_strings_and_comments_ignored() {
        let source = "def f():\n    # if and or while\n    x = \"if and or\"\n    return x\n";
        assert_eq!(cyclomatic_complexity(source, Language::Python), 1);
    }

    #[test]
    fn test_match_default_arm_excluded() {
        let source = "def f(x):\n    match x:\n        case 1:\n            pass\n        case 2:\n            pass\n        case _:\n            pass\n";
        // 1 base + 2 counted case arms; `case _` is the default.
        assert_eq!(cyclomatic_complexity(source, Language::Python), 3);
    }

    #[test]
    fn test_c_complexity() {
        let source = "int f(int a, int b) {\n    if (a && b) {\n        return 1;\n    }\n    return a ? 2 : 3;\n}\n";
        // 1 base + if + && + ternary.
        assert_eq!(cyclomatic_complexity(source, Language::C), 4);
    }

    #[test]
    fn test_c_switch_arms() {
        let source = "int f(int x) {\n    switch (x) {\n    case 1: return 1;\n    case 2: return 2;\n    default: return 0;\n    }\n}\n";
        // 1 base + 2 case arms; switch itself and default do not count.
        assert_eq!(cyclomatic_complexity(source, Language::C), 3);
    }

    #[test]
    fn test_cobol_complexity() {
        let source = "       CHECK-PARA.\n           IF WS-A > 1 AND WS-B > 2\n               DISPLAY 'YES'\n           END-IF.\n           PERFORM UNTIL WS-DONE = 1\n               ADD 1 TO WS-I\n           END-PERFORM.\n";
        // 1 base + IF + AND + PERFORM UNTIL (UNTIL keyword itself is part of
        // the loop header match, not counted twice... IF=1, AND=1, UNTIL via
        // PERFORM UNTIL=1).
        assert_eq!(cyclomatic_complexity(source, Language::Cobol), 4);
    }

    #[test]
    fn test_assembly_conditional_jumps() {
        let source = "check:\n    cmp rax, 0\n    je done\n    jne retry\n    jmp check\ndone:\n    ret\n";
        // je + jne count; unconditional jmp does not.
        assert_eq!(cyclomatic_complexity(source, Language::Assembly), 3);
    }

    #[test]
    fn test_line_counting_python() {
        let source = "# header\n\ndef f():\n    \"\"\"Doc.\"\"\"\n    return 1\n";
        let (code, comments, blanks) = count_lines(source, Language::Python);
        assert_eq!(code, 2);
        assert_eq!(comments, 2);
        assert_eq!(blanks, 1);
    }

    #[test]
    fn test_line_counting_c_block_comments() {
        let source = "/*\n * header\n */\nint x;\n";
        let (code, comments, _) = count_lines(source, Language::C);
        assert_eq!(code, 1);
        assert_eq!(comments, 3);
    }

    #[test]
    fn test_mi_range_and_monotonicity() {
        let simple = maintainability_index(1, 5);
        let complex = maintainability_index(40, 400);
        assert!(simple > complex);
        assert!((0.0..=100.0).contains(&simple));
        assert!((0.0..=100.0).contains(&complex));
        assert_eq!(maintainability_index(1, 0), 100.0);
    }

    #[test]
    fn test_python_docstring_extraction() {
        let source = "def f():\n    \"\"\"Compute the answer.\"\"\"\n    return 42\n";
        assert_eq!(
            extract_docstring(source, Language::Python, 1),
            Some("Compute the answer.".to_string())
        );
    }

    #[test]
    fn test_python_multiline_docstring() {
        let source = "def f():\n    \"\"\"First line.\n\n    Second line.\n    \"\"\"\n    return 1\n";
        let doc = extract_docstring(source, Language::Python, 1).unwrap();
        assert!(doc.contains("First line."));
        assert!(doc.contains("Second line."));
    }

    #[test]
    fn test_python_no_docstring() {
        let source = "def f():\n    return 42\n";
        assert_eq!(extract_docstring(source, Language::Python, 1), None);
    }

    #[test]
    fn test_c_doc_block() {
        let source = "/**\n * Adds two numbers.\n * Returns the sum.\n */\nint add(int a, int b) {\n    return a + b;\n}\n";
        let doc = extract_docstring(source, Language::C, 5).unwrap();
        assert!(doc.contains("Adds two numbers."));
        assert!(doc.contains("Returns the sum."));
    }

    #[test]
    fn test_c_plain_block_comment_not_doc() {
        let source = "/* not a doc comment */\nint f(void) {\n    return 0;\n}\n";
        assert_eq!(extract_docstring(source, Language::C, 2), None);
    }

    #[test]
    fn test_assembly_comment_docstring() {
        let source = "; initialise the stack\n; and clear registers\ninit:\n    ret\n";
        assert_eq!(
            extract_docstring(source, Language::Assembly, 3),
            Some("initialise the stack and clear registers".to_string())
        );
    }

    #[test]
    fn test_cobol_comment_docstring() {
        let source = "      * Computes weekly pay\n       COMPUTE-PAY.\n           MOVE 1 TO X.\n";
        assert_eq!(
            extract_docstring(source, Language::Cobol, 2),
            Some("Computes weekly pay".to_string())
        );
    }

    #[test]
    fn test_analyze_symbol_consistency() {
        let metrics = analyze_symbol("def f(): pass\n", Language::Python);
        assert_eq!(metrics.cyclomatic_complexity, 1);
        assert!(metrics.mi_approximated);
        assert!(metrics.maintainability_index > 0.0);
    }
}
