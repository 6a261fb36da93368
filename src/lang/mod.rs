//! Language detection and the per-language symbol parser registry.

pub mod assembly;
pub mod c_lang;
pub mod cobol;
pub mod python;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{KvasirError, Result};
use crate::core::models::SymbolKind;

/// Languages with a registered parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    C,
    Cobol,
    Assembly,
}

impl Language {
    /// Canonical language tag used in storage and the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::C => "c",
            Self::Cobol => "cobol",
            Self::Assembly => "assembly",
        }
    }

    /// File extensions claimed by this language (lowercase, no dot).
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["py", "pyi"],
            Self::C => &["c", "h"],
            Self::Cobol => &["cob", "cbl", "cpy"],
            Self::Assembly => &["s", "asm"],
        }
    }

    /// All registered languages.
    pub fn all() -> &'static [Language] {
        &[Self::Python, Self::C, Self::Cobol, Self::Assembly]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = KvasirError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "c" => Ok(Self::C),
            "cobol" | "cob" | "cbl" => Ok(Self::Cobol),
            "assembly" | "asm" | "s" => Ok(Self::Assembly),
            other => Err(KvasirError::unsupported(format!(
                "unknown language: {other}"
            ))),
        }
    }
}

/// Identify the language for a file from its path and leading bytes.
///
/// Primary dispatch is by extension; extensionless files fall back to a
/// shebang scan. Returns `None` for unsupported or binary content.
pub fn detect(path: &Path, first_bytes: &[u8]) -> Option<Language> {
    if looks_binary(first_bytes) {
        return None;
    }

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let ext = ext.to_ascii_lowercase();
        return Language::all()
            .iter()
            .copied()
            .find(|lang| lang.extensions().contains(&ext.as_str()));
    }

    detect_shebang(first_bytes)
}

/// Binary sniff: a NUL byte in the first 8 KiB disqualifies the file.
pub fn looks_binary(first_bytes: &[u8]) -> bool {
    first_bytes.iter().take(8192).any(|&b| b == 0)
}

fn detect_shebang(first_bytes: &[u8]) -> Option<Language> {
    let text = std::str::from_utf8(first_bytes).ok()?;
    let first_line = text.lines().next()?;
    if first_line.starts_with("#!") && first_line.contains("python") {
        return Some(Language::Python);
    }
    None
}

/// A symbol extracted by a language parser, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based inclusive line range; the outer symbol encloses nested ones
    pub line_start: usize,
    pub line_end: usize,
    pub signature: String,
}

/// A raw textual call reference; resolution happens in the call-graph builder.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub callee_name: String,
    pub line: usize,
}

/// An import of a module/file by name; path resolution happens later.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSite {
    pub module: String,
    pub line: usize,
    /// Import mechanism: "import", "include", "copy"
    pub kind: &'static str,
}

/// Everything a parser extracts from one source file.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub symbols: Vec<ParsedSymbol>,
    pub calls: Vec<CallSite>,
    pub imports: Vec<ImportSite>,
    /// Names the language declares as entry points (exports, PROGRAM-ID)
    pub entry_hints: Vec<String>,
}

/// Per-language symbol extraction capability.
///
/// Parser state lives per call, not per process: implementations may hold
/// a tree-sitter parser but must be safe to recreate cheaply.
pub trait SymbolParser: Send {
    /// The language this parser handles.
    fn language(&self) -> Language;

    /// Parse one source file into symbols, call sites, and import sites.
    fn parse(&mut self, source: &str, path: &str) -> Result<ParseOutcome>;
}

/// Create a parser for the given language.
pub fn parser_for(language: Language) -> Result<Box<dyn SymbolParser>> {
    match language {
        Language::Python => Ok(Box::new(python::PythonParser::new()?)),
        Language::C => Ok(Box::new(c_lang::CParser::new()?)),
        Language::Cobol => Ok(Box::new(cobol::CobolParser::new())),
        Language::Assembly => Ok(Box::new(assembly::AssemblyParser::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(
            detect(Path::new("src/app.py"), b"import os"),
            Some(Language::Python)
        );
        assert_eq!(detect(Path::new("lib/io.c"), b"int x;"), Some(Language::C));
        assert_eq!(detect(Path::new("lib/io.h"), b""), Some(Language::C));
        assert_eq!(
            detect(Path::new("PAYROLL.CBL"), b"IDENTIFICATION DIVISION."),
            Some(Language::Cobol)
        );
        assert_eq!(
            detect(Path::new("boot.asm"), b"_start:"),
            Some(Language::Assembly)
        );
        assert_eq!(detect(Path::new("boot.s"), b""), Some(Language::Assembly));
        assert_eq!(detect(Path::new("readme.md"), b"# hi"), None);
    }

    #[test]
    fn test_detect_shebang_for_extensionless() {
        assert_eq!(
            detect(Path::new("bin/tool"), b"#!/usr/bin/env python3\nprint(1)"),
            Some(Language::Python)
        );
        assert_eq!(detect(Path::new("bin/tool"), b"#!/bin/sh\necho hi"), None);
    }

    #[test]
    fn test_binary_files_skipped() {
        assert!(looks_binary(b"\x7fELF\x00\x01"));
        assert!(!looks_binary(b"def f(): pass"));
        assert_eq!(detect(Path::new("a.py"), b"\x00\x01\x02"), None);
    }

    #[test]
    fn test_parser_factory_covers_all_languages() {
        for lang in Language::all() {
            let parser = parser_for(*lang);
            assert!(parser.is_ok(), "parser for {lang} should be available");
            assert_eq!(parser.unwrap().language(), *lang);
        }
    }

    #[test]
    fn test_language_aliases() {
        assert_eq!("py".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("ASM".parse::<Language>().unwrap(), Language::Assembly);
        assert_eq!("cbl".parse::<Language>().unwrap(), Language::Cobol);
        assert!("java".parse::<Language>().is_err());
    }
}
