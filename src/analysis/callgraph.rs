//! Call-graph construction, dead-code detection, and cycle analysis.
//!
//! Call sites are attributed to their enclosing symbol by line
//! containment, then resolved in two passes: exact name within the same
//! file, then repository-wide. Ambiguous resolutions stay unresolved.
//! The graph itself is a petgraph directed multigraph over symbol ids;
//! cyclic structure never owns pointers between nodes.

use std::collections::HashMap;

use petgraph::algo::kosaraju_scc;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::models::{CallEdge, ImportEdge, Severity, Symbol, SymbolKind};
use crate::lang::{CallSite, ImportSite, Language};

/// Per-language entry-point policy for dead-code analysis.
#[derive(Debug, Clone)]
pub struct CallGraphConfig {
    /// Symbol names (case-insensitive) that are never dead
    pub entry_point_names: Vec<String>,
}

impl Default for CallGraphConfig {
    fn default() -> Self {
        Self {
            entry_point_names: [
                "main",
                "_start",
                "start",
                "init",
                "setup",
                "__init__",
                "__main__",
                "MAIN",
                "MAIN-PARAGRAPH",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// One file's parsed content, ready for graph construction.
#[derive(Debug, Clone)]
pub struct FileParse {
    pub file_id: Uuid,
    pub path: String,
    pub language: Language,
    pub symbols: Vec<Symbol>,
    pub calls: Vec<CallSite>,
    pub imports: Vec<ImportSite>,
    pub entry_hints: Vec<String>,
}

/// A symbol with in-degree zero that is not an entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadSymbol {
    pub symbol_id: Uuid,
    pub name: String,
    pub file_path: String,
    /// Outgoing calls this dead symbol still makes (wasted work)
    pub out_calls: usize,
    pub severity: Severity,
}

/// A strongly connected component of size >= 2, or a self-loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    /// Member names in lexicographic order
    pub members: Vec<String>,
    pub symbol_ids: Vec<Uuid>,
    pub size: usize,
    pub severity: Severity,
}

/// Complete call-graph analysis output for one repository.
#[derive(Debug, Clone, Default)]
pub struct CallGraphAnalysis {
    pub edges: Vec<CallEdge>,
    pub dead_code: Vec<DeadSymbol>,
    pub cycles: Vec<Cycle>,
    pub import_edges: Vec<ImportEdge>,
    pub resolved_calls: usize,
    pub unresolved_calls: usize,
    pub external_calls: usize,
}

/// Builds and analyses the repository call graph.
pub struct CallGraphBuilder {
    config: CallGraphConfig,
}

impl CallGraphBuilder {
    /// Create a builder with the default entry-point policy.
    pub fn new() -> Self {
        Self {
            config: CallGraphConfig::default(),
        }
    }

    /// Create a builder with a custom entry-point policy.
    pub fn with_config(config: CallGraphConfig) -> Self {
        Self { config }
    }

    /// Run the full analysis over all parsed files of a repository.
    pub fn build(&self, files: &[FileParse]) -> CallGraphAnalysis {
        let mut analysis = CallGraphAnalysis::default();

        // Name index for the repository-wide resolution pass.
        let mut by_name: HashMap<String, Vec<&Symbol>> = HashMap::new();
        let mut file_paths: HashMap<Uuid, &str> = HashMap::new();
        for file in files {
            file_paths.insert(file.file_id, file.path.as_str());
            for symbol in callable_symbols(&file.symbols) {
                by_name
                    .entry(symbol.name.to_lowercase())
                    .or_default()
                    .push(symbol);
            }
        }

        let mut graph: StableDiGraph<Uuid, ()> = StableDiGraph::new();
        let mut nodes: HashMap<Uuid, NodeIndex> = HashMap::new();
        let mut names: HashMap<Uuid, (String, String)> = HashMap::new();
        for file in files {
            for symbol in callable_symbols(&file.symbols) {
                let idx = graph.add_node(symbol.id);
                nodes.insert(symbol.id, idx);
                names.insert(symbol.id, (symbol.name.clone(), file.path.clone()));
            }
        }

        // Symbols reached by module-level statements are live by definition.
        let mut module_called: Vec<Uuid> = Vec::new();

        for file in files {
            for call in &file.calls {
                let caller = enclosing_symbol(&file.symbols, call.line);
                let target = resolve(&file.symbols, &by_name, &call.callee_name);

                match caller {
                    Some(caller_symbol) => {
                        let (to_symbol_id, is_external) = match &target {
                            Resolution::Resolved(symbol) => (Some(symbol.id), false),
                            Resolution::Ambiguous => (None, false),
                            Resolution::External => (None, true),
                        };
                        analysis.edges.push(CallEdge {
                            from_symbol_id: caller_symbol.id,
                            to_name: call.callee_name.clone(),
                            to_symbol_id,
                            file_id: file.file_id,
                            line: call.line as i64,
                            is_external,
                        });
                        if let Resolution::Resolved(symbol) = &target {
                            if let (Some(&from), Some(&to)) =
                                (nodes.get(&caller_symbol.id), nodes.get(&symbol.id))
                            {
                                graph.add_edge(from, to, ());
                            }
                        }
                    }
                    None => {
                        // Module-level call: no owning symbol, but the callee
                        // is reachable from module execution.
                        if let Resolution::Resolved(symbol) = &target {
                            module_called.push(symbol.id);
                        }
                    }
                }

                match target {
                    Resolution::Resolved(_) => analysis.resolved_calls += 1,
                    Resolution::Ambiguous => analysis.unresolved_calls += 1,
                    Resolution::External => analysis.external_calls += 1,
                }
            }
        }

        analysis.dead_code = self.find_dead_code(files, &graph, &nodes, &names, &module_called);
        analysis.cycles = find_cycles(&graph, &names);
        analysis.import_edges = build_import_graph(files);
        analysis
    }

    fn find_dead_code(
        &self,
        files: &[FileParse],
        graph: &StableDiGraph<Uuid, ()>,
        nodes: &HashMap<Uuid, NodeIndex>,
        names: &HashMap<Uuid, (String, String)>,
        module_called: &[Uuid],
    ) -> Vec<DeadSymbol> {
        let mut entry_names: Vec<String> = self
            .config
            .entry_point_names
            .iter()
            .map(|n| n.to_lowercase())
            .collect();
        for file in files {
            entry_names.extend(file.entry_hints.iter().map(|n| n.to_lowercase()));
        }

        let mut dead: Vec<DeadSymbol> = Vec::new();
        for (&symbol_id, &idx) in nodes {
            let (name, file_path) = &names[&symbol_id];
            let lowered = name.to_lowercase();

            if entry_names.contains(&lowered) {
                continue;
            }
            // Dunder hooks are invoked by the runtime, not by callers we see.
            if name.starts_with("__") && name.ends_with("__") {
                continue;
            }
            if module_called.contains(&symbol_id) {
                continue;
            }

            let in_degree = graph
                .edges_directed(idx, Direction::Incoming)
                .filter(|e| petgraph::visit::EdgeRef::source(e) != idx)
                .count();
            if in_degree > 0 {
                continue;
            }

            let out_calls = graph.edges_directed(idx, Direction::Outgoing).count();
            let severity = match out_calls {
                0 => Severity::Low,
                1 | 2 => Severity::Medium,
                _ => Severity::High,
            };
            dead.push(DeadSymbol {
                symbol_id,
                name: name.clone(),
                file_path: file_path.clone(),
                out_calls,
                severity,
            });
        }

        dead.sort_by(|a, b| {
            b.severity
                .rank()
                .cmp(&a.severity.rank())
                .then_with(|| a.file_path.cmp(&b.file_path))
                .then_with(|| a.name.cmp(&b.name))
        });
        dead
    }
}

impl Default for CallGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

enum Resolution<'a> {
    Resolved(&'a Symbol),
    Ambiguous,
    External,
}

fn callable_symbols(symbols: &[Symbol]) -> impl Iterator<Item = &Symbol> {
    symbols.iter().filter(|s| {
        matches!(
            s.kind,
            SymbolKind::Function | SymbolKind::Method | SymbolKind::Procedure
        )
    })
}

/// Innermost callable symbol whose range contains the line.
fn enclosing_symbol(symbols: &[Symbol], line: usize) -> Option<&Symbol> {
    let line = line as i64;
    callable_symbols(symbols)
        .filter(|s| s.line_start <= line && line <= s.line_end)
        .max_by_key(|s| s.line_start)
}

/// Two-pass lookup: same file first, then repository-wide by exact name.
fn resolve<'a>(
    file_symbols: &'a [Symbol],
    by_name: &HashMap<String, Vec<&'a Symbol>>,
    callee: &str,
) -> Resolution<'a> {
    let lowered = callee.to_lowercase();

    let local: Vec<&Symbol> = callable_symbols(file_symbols)
        .filter(|s| s.name.to_lowercase() == lowered)
        .collect();
    match local.len() {
        1 => return Resolution::Resolved(local[0]),
        n if n > 1 => return Resolution::Ambiguous,
        _ => {}
    }

    match by_name.get(&lowered).map(Vec::as_slice) {
        Some([single]) => Resolution::Resolved(*single),
        Some([]) | None => Resolution::External,
        Some(_) => Resolution::Ambiguous,
    }
}

/// SCCs of size >= 2 plus self-loops, ordered by smallest member name.
fn find_cycles(
    graph: &StableDiGraph<Uuid, ()>,
    names: &HashMap<Uuid, (String, String)>,
) -> Vec<Cycle> {
    let mut cycles: Vec<Cycle> = Vec::new();

    for component in kosaraju_scc(graph) {
        let is_cycle = component.len() >= 2
            || (component.len() == 1 && graph.find_edge(component[0], component[0]).is_some());
        if !is_cycle {
            continue;
        }

        let mut symbol_ids: Vec<Uuid> = component
            .iter()
            .filter_map(|idx| graph.node_weight(*idx).copied())
            .collect();
        let mut members: Vec<String> = symbol_ids
            .iter()
            .map(|id| names[id].0.clone())
            .collect();
        members.sort();
        symbol_ids.sort_by_key(|id| names[id].0.clone());

        let size = members.len();
        let severity = match size {
            n if n >= 5 => Severity::Critical,
            3 | 4 => Severity::High,
            _ => Severity::Medium,
        };

        cycles.push(Cycle {
            members,
            symbol_ids,
            size,
            severity,
        });
    }

    cycles.sort_by(|a, b| a.members.first().cmp(&b.members.first()));
    cycles
}

/// Build the file-level import graph, resolving module names to files.
fn build_import_graph(files: &[FileParse]) -> Vec<ImportEdge> {
    // Index repository files by lowercase stem and by full path suffix.
    let mut by_stem: HashMap<String, Vec<Uuid>> = HashMap::new();
    for file in files {
        let stem = std::path::Path::new(&file.path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        by_stem.entry(stem).or_default().push(file.file_id);
    }

    let mut edges = Vec::new();
    for file in files {
        for import in &file.imports {
            let key = import_stem(&import.module);
            let to_file_id = match by_stem.get(&key).map(Vec::as_slice) {
                Some([single]) if *single != file.file_id => Some(*single),
                _ => None,
            };
            edges.push(ImportEdge {
                from_file_id: file.file_id,
                to_file_id,
                to_module_name: import.module.clone(),
                kind: import.kind.to_string(),
            });
        }
    }
    edges
}

/// Last path/dot segment of a module reference, without file extension.
///
/// `util.h` and `a/b/util.h` reduce to `util`; the Python dotted path
/// `pkg.sub.mod` reduces to `mod`.
fn import_stem(module: &str) -> String {
    const FILE_EXTS: &[&str] = &[
        "h", "c", "py", "pyi", "inc", "s", "asm", "cob", "cbl", "cpy",
    ];
    let segment = module.rsplit('/').next().unwrap_or(module).trim();
    match segment.rsplit_once('.') {
        Some((stem, ext)) if FILE_EXTS.contains(&ext.to_ascii_lowercase().as_str()) => stem
            .rsplit('.')
            .next()
            .unwrap_or(stem)
            .to_lowercase(),
        Some((_, last)) => last.to_lowercase(),
        None => segment.to_lowercase(),
    }
}
