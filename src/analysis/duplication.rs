//! Token-shingle duplication detection with MinHash pruning.
//!
//! Each file is tokenised (identifiers, keywords, punctuation; literals
//! normalised to `<LIT>`), rolled into k-shingles, and sketched with H
//! seeded xxh3 MinHash functions. LSH band buckets prune the candidate
//! space before the pairwise similarity check; surviving pairs with an
//! estimated Jaccard at or above the threshold are materialised with the
//! longest common token run and both line ranges.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use rayon::prelude::*;
use uuid::Uuid;
use xxhash_rust::xxh3::Xxh3;

use crate::core::models::DuplicationPair;
use crate::lang::Language;

/// Tuning knobs for the duplication detector.
#[derive(Debug, Clone)]
pub struct DuplicationConfig {
    /// Tokens per shingle
    pub shingle_k: usize,
    /// MinHash functions per sketch
    pub num_hashes: usize,
    /// LSH bands used for candidate pruning (must divide num_hashes)
    pub num_bands: usize,
    /// Estimated Jaccard threshold for materialising a pair
    pub min_similarity: f64,
    /// Files with fewer tokens than this are not compared
    pub min_tokens: usize,
}

impl Default for DuplicationConfig {
    fn default() -> Self {
        Self {
            shingle_k: 40,
            num_hashes: 128,
            num_bands: 16,
            min_similarity: 0.8,
            min_tokens: 40,
        }
    }
}

/// One file's content, ready for duplication analysis.
#[derive(Debug, Clone)]
pub struct DuplicationInput {
    pub file_id: Uuid,
    pub path: String,
    pub language: Language,
    pub content: String,
}

/// A token with the 1-based line it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Token {
    text: String,
    line: usize,
}

/// Duplication detector over a repository's files.
pub struct DuplicationDetector {
    config: DuplicationConfig,
}

impl DuplicationDetector {
    /// Create a detector with default parameters (k=40, H=128, 0.8).
    pub fn new() -> Self {
        Self {
            config: DuplicationConfig::default(),
        }
    }

    /// Create a detector with custom parameters.
    pub fn with_config(config: DuplicationConfig) -> Self {
        Self { config }
    }

    /// Scan all files and return canonical duplication pairs.
    pub fn scan(&self, repo_id: Uuid, files: &[DuplicationInput]) -> Vec<DuplicationPair> {
        let sketches: Vec<FileSketch> = files
            .par_iter()
            .filter_map(|file| self.sketch(file))
            .collect();

        // LSH banding: files sharing any band bucket become candidates.
        let rows = self.config.num_hashes / self.config.num_bands.max(1);
        let mut buckets: HashMap<(usize, u64), Vec<usize>> = HashMap::new();
        for (idx, sketch) in sketches.iter().enumerate() {
            for band in 0..self.config.num_bands {
                let slice = &sketch.signature[band * rows..(band + 1) * rows];
                let mut hasher = Xxh3::with_seed(band as u64);
                slice.hash(&mut hasher);
                buckets
                    .entry((band, hasher.finish()))
                    .or_default()
                    .push(idx);
            }
        }

        let mut candidates: Vec<(usize, usize)> = buckets
            .values()
            .flat_map(|members| {
                let mut pairs = Vec::new();
                for (i, &a) in members.iter().enumerate() {
                    for &b in &members[i + 1..] {
                        pairs.push(if a < b { (a, b) } else { (b, a) });
                    }
                }
                pairs
            })
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        let mut pairs: Vec<DuplicationPair> = candidates
            .into_par_iter()
            .filter_map(|(i, j)| {
                let (a, b) = (&sketches[i], &sketches[j]);
                if a.file_id == b.file_id {
                    return None;
                }
                let similarity = estimated_jaccard(&a.signature, &b.signature);
                if similarity < self.config.min_similarity {
                    return None;
                }
                self.materialise(repo_id, a, b, similarity)
            })
            .collect();

        pairs.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file1_id.cmp(&b.file1_id))
        });
        pairs
    }

    fn sketch(&self, file: &DuplicationInput) -> Option<FileSketch> {
        let tokens = tokenize(&file.content, file.language);
        if tokens.len() < self.config.min_tokens {
            return None;
        }

        let signature = minhash_signature(&tokens, self.config.shingle_k, self.config.num_hashes);

        Some(FileSketch {
            file_id: file.file_id,
            content: file.content.clone(),
            tokens,
            signature,
        })
    }

    /// Materialise a pair in canonical order with the longest common run.
    fn materialise(
        &self,
        repo_id: Uuid,
        a: &FileSketch,
        b: &FileSketch,
        similarity: f64,
    ) -> Option<DuplicationPair> {
        let (first, second) = if a.file_id < b.file_id { (a, b) } else { (b, a) };

        let run = longest_common_run(&first.tokens, &second.tokens)?;
        let (start1, end1) = token_lines(&first.tokens, run.start_a, run.len);
        let (start2, end2) = token_lines(&second.tokens, run.start_b, run.len);

        let snippet: String = first
            .content
            .lines()
            .skip(start1 - 1)
            .take(end1 - start1 + 1)
            .collect::<Vec<_>>()
            .join("\n")
            .chars()
            .take(500)
            .collect();

        Some(DuplicationPair {
            id: Uuid::new_v4(),
            repo_id,
            file1_id: first.file_id,
            file1_start: start1 as i64,
            file1_end: end1 as i64,
            file2_id: second.file_id,
            file2_start: start2 as i64,
            file2_end: end2 as i64,
            similarity,
            duplicate_lines: ((end1 - start1 + 1).min(end2 - start2 + 1)) as i64,
            duplicate_tokens: run.len as i64,
            snippet,
        })
    }
}

impl Default for DuplicationDetector {
    fn default() -> Self {
        Self::new()
    }
}

struct FileSketch {
    file_id: Uuid,
    content: String,
    tokens: Vec<Token>,
    signature: Vec<u64>,
}

struct CommonRun {
    start_a: usize,
    start_b: usize,
    len: usize,
}

/// Tokenise source for similarity comparison.
///
/// Comments are stripped, string and numeric literals collapse to `<LIT>`,
/// identifiers are lowercased, and punctuation survives as single tokens.
fn tokenize(content: &str, language: Language) -> Vec<Token> {
    let mut tokens = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_num = idx + 1;
        let line = strip_line_comment(raw, language);
        let mut chars = line.chars().peekable();

        while let Some(&ch) = chars.peek() {
            if ch.is_whitespace() {
                chars.next();
                continue;
            }

            if ch == '"' || ch == '\'' {
                chars.next();
                for inner in chars.by_ref() {
                    if inner == ch {
                        break;
                    }
                }
                tokens.push(Token {
                    text: "<LIT>".to_string(),
                    line: line_num,
                });
                continue;
            }

            if ch.is_ascii_digit() {
                while chars
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '.')
                {
                    chars.next();
                }
                tokens.push(Token {
                    text: "<LIT>".to_string(),
                    line: line_num,
                });
                continue;
            }

            if ch.is_ascii_alphabetic() || ch == '_' {
                let mut ident = String::new();
                while chars
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                {
                    ident.push(chars.next().unwrap());
                }
                tokens.push(Token {
                    text: ident.to_lowercase(),
                    line: line_num,
                });
                continue;
            }

            chars.next();
            tokens.push(Token {
                text: ch.to_string(),
                line: line_num,
            });
        }
    }

    tokens
}

fn strip_line_comment(line: &str, language: Language) -> String {
    match language {
        Language::Python => match line.find('#') {
            Some(pos) => line[..pos].to_string(),
            None => line.to_string(),
        },
        Language::C => {
            let line = match line.find("//") {
                Some(pos) => &line[..pos],
                None => line,
            };
            match (line.find("/*"), line.rfind("*/")) {
                (Some(start), Some(end)) if end > start => {
                    format!("{}{}", &line[..start], &line[end + 2..])
                }
                (Some(start), _) => line[..start].to_string(),
                _ => line.to_string(),
            }
        }
        Language::Cobol => {
            let bytes = line.as_bytes();
            if (bytes.len() > 6 && bytes[6] == b'*') || line.trim_start().starts_with('*') {
                String::new()
            } else {
                line.to_string()
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
    }
}

/// MinHash sketch over rolling k-shingles of the token stream.
fn minhash_signature(tokens: &[Token], k: usize, num_hashes: usize) -> Vec<u64> {
    let mut signature = vec![u64::MAX; num_hashes];
    if tokens.len() < k {
        return signature;
    }

    for window in tokens.windows(k) {
        let shingle: String = window
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        for (seed, slot) in signature.iter_mut().enumerate() {
            let hash = hash_with_seed(&shingle, seed as u64);
            if hash < *slot {
                *slot = hash;
            }
        }
    }

    signature
}

/// Hash a string with a seed using xxHash3.
fn hash_with_seed(data: &str, seed: u64) -> u64 {
    let mut hasher = Xxh3::with_seed(seed);
    data.hash(&mut hasher);
    hasher.finish()
}

/// Estimated Jaccard similarity: fraction of matching signature slots.
fn estimated_jaccard(a: &[u64], b: &[u64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let matches = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    matches as f64 / a.len() as f64
}

/// DP cap: files beyond this many tokens compare a prefix only.
const MAX_RUN_TOKENS: usize = 20_000;

/// Longest common contiguous token run between two files.
fn longest_common_run(a: &[Token], b: &[Token]) -> Option<CommonRun> {
    let a = &a[..a.len().min(MAX_RUN_TOKENS)];
    let b = &b[..b.len().min(MAX_RUN_TOKENS)];
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let mut best = CommonRun {
        start_a: 0,
        start_b: 0,
        len: 0,
    };
    let mut prev = vec![0usize; b.len() + 1];

    for (i, token_a) in a.iter().enumerate() {
        let mut current = vec![0usize; b.len() + 1];
        for (j, token_b) in b.iter().enumerate() {
            if token_a.text == token_b.text {
                let len = prev[j] + 1;
                current[j + 1] = len;
                if len > best.len {
                    best = CommonRun {
                        start_a: i + 1 - len,
                        start_b: j + 1 - len,
                        len,
                    };
                }
            }
        }
        prev = current;
    }

    (best.len > 0).then_some(best)
}

/// Line span covered by `len` tokens starting at token index `start`.
fn token_lines(tokens: &[Token], start: usize, len: usize) -> (usize, usize) {
    let first = tokens[start].line;
    let last = tokens[start + len - 1].line;
    (first, last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(seed: u8, path: &str, content: &str) -> DuplicationInput {
        DuplicationInput {
            file_id: Uuid::from_u128(seed as u128),
            path: path.to_string(),
            language: Language::Python,
            content: content.to_string(),
        }
    }

    fn sample_body(name: &str) -> String {
        let mut out = String::new();
        out.push_str(&format!("def {name}(items):\n"));
        out.push_str("    total = 0\n");
        out.push_str("    for item in items:\n");
        out.push_str("        if item.active and item.price > 0:\n");
        out.push_str("            total = total + item.price * item.count\n");
        out.push_str("        else:\n");
        out.push_str("            total = total - item.discount\n");
        out.push_str("    report = summarize(total, items)\n");
        out.push_str("    publish(report, items)\n");
        out.push_str("    return report\n");
        out
    }

    #[test]
    fn test_literals_normalised() {
        let tokens = tokenize("x = 42\ny = \"hello\"\n", Language::Python);
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["x", "=", "<LIT>", "y", "=", "<LIT>"]);
    }

    #[test]
    fn test_comments_not_tokenised() {
        let tokens = tokenize("x = 1  # trailing\n", Language::Python);
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn test_identical_files_detected() {
        let body = sample_body("process");
        let files = vec![input(1, "a.py", &body), input(2, "b.py", &body)];
        let pairs = DuplicationDetector::new().scan(Uuid::new_v4(), &files);

        assert_eq!(pairs.len(), 1);
        let pair = &pairs[0];
        assert!(pair.similarity >= 0.99);
        assert!(pair.duplicate_tokens > 40);
        assert!(pair.file1_start >= 1);
        assert!(!pair.snippet.is_empty());
    }

    #[test]
    fn test_canonical_ordering() {
        let body = sample_body("process");
        // Submit in reverse id order; the pair must still be (lower, higher).
        let files = vec![input(9, "z.py", &body), input(3, "a.py", &body)];
        let pairs = DuplicationDetector::new().scan(Uuid::new_v4(), &files);

        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].file1_id < pairs[0].file2_id);
    }

    #[test]
    fn test_renamed_copy_still_similar() {
        // Same token structure, different identifier: shingles differ only
        // where the name appears.
        let files = vec![
            input(1, "a.py", &sample_body("process")),
            input(2, "b.py", &sample_body("handle")),
        ];
        let config = DuplicationConfig {
            min_similarity: 0.3,
            ..Default::default()
        };
        let pairs = DuplicationDetector::with_config(config).scan(Uuid::new_v4(), &files);
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_unrelated_files_not_paired() {
        let other = "\
class Registry:
    def __init__(self):
        self.entries = {}

    def register(self, key, value):
        self.entries[key] = value

    def lookup(self, key):
        return self.entries.get(key)

    def remove(self, key):
        del self.entries[key]
";
        let files = vec![input(1, "a.py", &sample_body("process")), input(2, "b.py", other)];
        let pairs = DuplicationDetector::new().scan(Uuid::new_v4(), &files);
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_small_files_skipped() {
        let files = vec![input(1, "a.py", "x = 1\n"), input(2, "b.py", "x = 1\n")];
        let pairs = DuplicationDetector::new().scan(Uuid::new_v4(), &files);
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_longest_common_run_positions() {
        let a = tokenize("alpha beta gamma delta\n", Language::Python);
        let b = tokenize("zeta beta gamma delta eta\n", Language::Python);
        let run = longest_common_run(&a, &b).unwrap();
        assert_eq!(run.len, 3);
        assert_eq!(run.start_a, 1);
        assert_eq!(run.start_b, 1);
    }

    #[test]
    fn test_estimated_jaccard_bounds() {
        let a = vec![1, 2, 3, 4];
        assert_eq!(estimated_jaccard(&a, &a), 1.0);
        let b = vec![5, 6, 7, 8];
        assert_eq!(estimated_jaccard(&a, &b), 0.0);
        let c = vec![1, 2, 7, 8];
        assert_eq!(estimated_jaccard(&a, &c), 0.5);
    }
}
