//! Local checks and prompt preparation run by the scanner before any model call.
//!
//! - Syntax pre-check with tree-sitter (fatal on error or missing nodes)
//! - Dangerous-pattern detection (fatal only when blocking is enabled)
//! - Over-long line warnings
//! - Prompt sanitization and truncation to the analysis budget

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tree_sitter::{Language, Node, Parser, Tree, TreeCursor};

use crate::error::ValidationError;

/// Lines longer than this produce a scan warning.
pub const MAX_LINE_LENGTH: usize = 1000;

/// Minimum share of the budget a line-boundary cut must keep.
const TRUNCATION_THRESHOLD: f64 = 0.8;

// ── Language ─────────────────────────────────────────────────────

/// Source languages the review pipeline can parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lang {
    #[default]
    Python,
    Rust,
}

impl Lang {
    /// Detect language from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" | "pyi" => Some(Self::Python),
            "rs" => Some(Self::Rust),
            _ => None,
        }
    }

    /// Language for a path, falling back to Python.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .unwrap_or_default()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Rust => "rust",
        }
    }

    pub fn grammar(self) -> Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }
}

impl std::str::FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "rust" | "rs" => Ok(Self::Rust),
            other => Err(format!("unsupported language '{other}' (expected python or rust)")),
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Syntax ───────────────────────────────────────────────────────

/// Parse `code` with the grammar for `lang`.
pub(crate) fn parse(code: &str, lang: Lang) -> Result<Tree, ValidationError> {
    let mut parser = Parser::new();
    parser
        .set_language(&lang.grammar())
        .map_err(|e| ValidationError::UnsupportedGrammar {
            language: lang.name(),
            reason: e.to_string(),
        })?;

    parser
        .parse(code, None)
        .ok_or_else(|| ValidationError::UnsupportedGrammar {
            language: lang.name(),
            reason: "parser returned no tree".into(),
        })
}

/// Parse `code` and reject it if the tree contains error or missing nodes.
pub fn check_syntax(code: &str, lang: Lang) -> Result<(), ValidationError> {
    let tree = parse(code, lang)?;
    let root = tree.root_node();
    if !root.has_error() {
        tracing::debug!(language = lang.name(), "Syntax check passed");
        return Ok(());
    }

    let node = first_error(root).unwrap_or(root);
    let pos = node.start_position();
    tracing::error!(
        language = lang.name(),
        line = pos.row + 1,
        column = pos.column + 1,
        "Syntax check failed"
    );
    Err(ValidationError::Syntax {
        language: lang.name(),
        line: pos.row + 1,
        column: pos.column + 1,
    })
}

/// Pre-order search for the first error or missing node, skipping subtrees
/// without errors. Iterative: nesting depth never reaches the call stack.
fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        if !advance(&mut cursor) {
            return None;
        }
    }
}

/// Move to the next sibling, climbing until one exists. False once the walk
/// is back at the cursor's root.
pub(crate) fn advance(cursor: &mut TreeCursor<'_>) -> bool {
    loop {
        if cursor.goto_next_sibling() {
            return true;
        }
        if !cursor.goto_parent() {
            return false;
        }
    }
}

// ── Dangerous patterns ───────────────────────────────────────────

struct DangerousPattern {
    id: &'static str,
    lang: Lang,
    pattern: Regex,
}

static DANGEROUS_PATTERNS: LazyLock<Vec<DangerousPattern>> = LazyLock::new(|| {
    let py = |id, re: &str| DangerousPattern {
        id,
        lang: Lang::Python,
        pattern: Regex::new(&format!("(?i){re}")).unwrap(),
    };
    let rs = |id, re: &str| DangerousPattern {
        id,
        lang: Lang::Rust,
        pattern: Regex::new(re).unwrap(),
    };
    vec![
        // Dynamic code execution
        py("dynamic_import", r"__import__\s*\("),
        py("eval", r"\beval\s*\("),
        py("exec", r"\bexec\s*\("),
        py("compile", r"\bcompile\s*\("),
        // File writes
        py("open_write", r#"\bopen\s*\([^)]*["']w"#),
        // System commands
        py("os_system", r"os\.system\s*\("),
        py("subprocess", r"subprocess\."),
        py("builtins", r"__builtins__"),
        rs("unsafe_block", r"\bunsafe\s*\{"),
        rs("process_command", r"\bCommand::new\s*\("),
        rs("transmute", r"\bmem::transmute\b"),
        rs("libc_system", r"\blibc::system\s*\("),
    ]
});

fn pattern_hits(code: &str, lang: Lang) -> impl Iterator<Item = (&'static str, usize)> + '_ {
    DANGEROUS_PATTERNS
        .iter()
        .filter(move |p| p.lang == lang)
        .filter_map(move |p| p.pattern.find(code).map(|m| (p.id, m.start())))
}

fn pattern_warning(id: &str, offset: usize) -> String {
    format!("Potentially dangerous pattern '{id}' at offset {offset}")
}

/// Scan `code` for dangerous constructs of its language.
///
/// Returns a warning per match. With `block` set the first match is fatal.
pub fn check_dangerous_patterns(
    code: &str,
    lang: Lang,
    block: bool,
) -> Result<Vec<String>, ValidationError> {
    let mut warnings = Vec::new();
    for (id, offset) in pattern_hits(code, lang) {
        if block {
            tracing::error!(pattern = id, offset, "Dangerous pattern blocked");
            return Err(ValidationError::DangerousPattern {
                pattern: id.to_string(),
            });
        }
        tracing::warn!(pattern = id, offset, "Potentially dangerous pattern detected");
        warnings.push(pattern_warning(id, offset));
    }
    Ok(warnings)
}

// ── Line lengths ─────────────────────────────────────────────────

fn long_lines(code: &str) -> impl Iterator<Item = (usize, usize)> + '_ {
    code.split('\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line.chars().count()))
        .filter(|&(_, len)| len > MAX_LINE_LENGTH)
}

fn line_warning(line: usize, len: usize) -> String {
    format!("Line {line} exceeds {MAX_LINE_LENGTH} characters ({len} chars) - may affect analysis")
}

/// One warning per line longer than [`MAX_LINE_LENGTH`] characters.
pub fn check_line_lengths(code: &str) -> Vec<String> {
    long_lines(code)
        .map(|(line, length)| {
            tracing::warn!(line, length, "Line exceeds maximum length");
            line_warning(line, length)
        })
        .collect()
}

/// The non-fatal warnings of [`check_line_lengths`] and
/// [`check_dangerous_patterns`], recomputed without logging.
pub fn local_warnings(code: &str, lang: Lang) -> Vec<String> {
    long_lines(code)
        .map(|(line, len)| line_warning(line, len))
        .chain(pattern_hits(code, lang).map(|(id, offset)| pattern_warning(id, offset)))
        .collect()
}

// ── Prompt preparation ───────────────────────────────────────────

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap());

static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{4,}").unwrap());

/// Make source safe to embed in a fenced prompt block.
pub fn sanitize_for_prompt(code: &str) -> String {
    let mut s = code.replace('\0', "").replace("\r\n", "\n").replace('\r', "\n");

    // ANSI sequences start with ESC, so strip them before control characters.
    s = ANSI_ESCAPE.replace_all(&s, "").into_owned();
    s.retain(|c| c == '\n' || c == '\t' || !c.is_control() || c == '\u{7f}');

    s = s
        .replace("```", "\\`\\`\\`")
        .replace("\\x", "\\\\x")
        .replace("\\u", "\\\\u")
        .replace("\\N", "\\\\N")
        .replace("\\U", "\\\\U")
        .replace("<|im_sep|>", "<|im\\_sep|>")
        .replace("<|im_end|>", "<|im\\_end|>")
        .replace("<|endoftext|>", "<|endoftext\\_|>");

    EXCESS_NEWLINES.replace_all(&s, "\n\n\n").into_owned()
}

/// Cut `code` to at most `max_chars` characters, preferring the last line
/// boundary when it keeps more than 80% of the budget.
pub fn truncate_at_line_boundary(code: &str, max_chars: usize) -> &str {
    let end = code
        .char_indices()
        .nth(max_chars)
        .map_or(code.len(), |(i, _)| i);
    let truncated = &code[..end];

    let threshold = (max_chars as f64 * TRUNCATION_THRESHOLD) as usize;
    match truncated.rfind('\n') {
        Some(nl) if truncated[..nl].chars().count() > threshold => &truncated[..nl],
        _ => truncated,
    }
}

/// Shrink code to the analysis budget, logging when anything is dropped.
pub fn optimize_for_analysis(code: &str, max_chars: usize) -> &str {
    let total = code.chars().count();
    if total <= max_chars {
        return code;
    }
    let truncated = truncate_at_line_boundary(code, max_chars);
    tracing::info!(
        from = total,
        to = truncated.chars().count(),
        "Code truncated for analysis"
    );
    truncated
}

/// `prefix` followed by the sanitized, budget-limited code in a fenced block.
pub fn code_prompt(prefix: &str, code: &str, lang: Lang, max_chars: usize) -> String {
    let code = sanitize_for_prompt(optimize_for_analysis(code, max_chars));
    format!("{prefix}\n\n```{}\n{code}\n```", lang.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_from_extension_and_name() {
        assert_eq!(Lang::from_path(Path::new("src/lib.rs")), Lang::Rust);
        assert_eq!(Lang::from_path(Path::new("stubs/os.pyi")), Lang::Python);
        assert_eq!(Lang::from_path(Path::new("notes.txt")), Lang::Python);
        assert_eq!("RUST".parse::<Lang>().unwrap(), Lang::Rust);
        assert!("cobol".parse::<Lang>().is_err());
    }

    #[test]
    fn valid_python_passes_syntax_check() {
        let code = "import os\n\ndef main():\n    return os.getcwd()\n";
        assert!(check_syntax(code, Lang::Python).is_ok());
    }

    #[test]
    fn broken_python_reports_position() {
        let code = "def main(:\n    pass\n";
        match check_syntax(code, Lang::Python) {
            Err(ValidationError::Syntax { language, line, .. }) => {
                assert_eq!(language, "python");
                assert_eq!(line, 1);
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn deeply_nested_source_reports_a_syntax_error() {
        let depth = 50_000;
        let code = format!("x = {}1 +{}\n", "[".repeat(depth), "]".repeat(depth));
        match check_syntax(&code, Lang::Python) {
            Err(ValidationError::Syntax { line, column, .. }) => {
                assert_eq!(line, 1);
                assert!(column > depth);
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn deeply_nested_valid_source_passes() {
        let depth = 20_000;
        let code = format!("x = {}1{}\n", "[".repeat(depth), "]".repeat(depth));
        assert!(check_syntax(&code, Lang::Python).is_ok());
    }

    #[test]
    fn broken_rust_is_rejected() {
        assert!(check_syntax("fn main() { let x = ; }", Lang::Rust).is_err());
        assert!(check_syntax("fn main() { println!(\"hi\"); }", Lang::Rust).is_ok());
    }

    #[test]
    fn dangerous_patterns_warn_by_default() {
        let code = "import os\nos.system('ls')\nresult = EVAL(data)\n";
        let warnings = check_dangerous_patterns(code, Lang::Python, false).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.contains("os_system")));
        assert!(warnings.iter().any(|w| w.contains("eval")));
    }

    #[test]
    fn dangerous_patterns_block_in_production() {
        let err = check_dangerous_patterns("exec(payload)", Lang::Python, true).unwrap_err();
        assert_eq!(
            err,
            ValidationError::DangerousPattern {
                pattern: "exec".into()
            }
        );
    }

    #[test]
    fn patterns_are_language_specific() {
        let rust = "fn f() { unsafe { core::hint::unreachable_unchecked() } }";
        assert!(check_dangerous_patterns(rust, Lang::Python, true).is_ok());
        assert!(check_dangerous_patterns(rust, Lang::Rust, true).is_err());
    }

    #[test]
    fn long_lines_are_reported() {
        let code = format!("short\n{}\nshort", "x".repeat(MAX_LINE_LENGTH + 1));
        let warnings = check_line_lengths(&code);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Line 2 exceeds"));
    }

    #[test]
    fn local_warnings_match_the_logged_checks() {
        let code = format!("import os\nos.system('ls')\n{}\n", "y".repeat(MAX_LINE_LENGTH + 5));
        let mut expected = check_line_lengths(&code);
        expected.extend(check_dangerous_patterns(&code, Lang::Python, false).unwrap());
        assert_eq!(local_warnings(&code, Lang::Python), expected);
        assert_eq!(expected.len(), 2);
    }

    #[test]
    fn sanitize_strips_and_escapes() {
        let raw = "a\0b\r\nc\x1b[31mred\x1b[0m\x07\n```\n<|im_end|>\n\n\n\n\nend";
        let clean = sanitize_for_prompt(raw);
        assert!(!clean.contains('\0'));
        assert!(!clean.contains('\r'));
        assert!(!clean.contains('\x1b'));
        assert!(!clean.contains('\x07'));
        assert!(clean.contains("cred"));
        assert!(clean.contains("\\`\\`\\`"));
        assert!(clean.contains("<|im\\_end|>"));
        assert!(!clean.contains("\n\n\n\n"));
    }

    #[test]
    fn sanitize_escapes_string_escapes() {
        assert_eq!(sanitize_for_prompt(r"s = '\x41'"), r"s = '\\x41'");
    }

    #[test]
    fn truncation_prefers_line_boundary() {
        let code = format!("{}\n{}", "a".repeat(90), "b".repeat(50));
        assert_eq!(truncate_at_line_boundary(&code, 100), "a".repeat(90));
    }

    #[test]
    fn truncation_falls_back_to_hard_cut() {
        let code = format!("{}\n{}", "a".repeat(10), "b".repeat(200));
        let cut = truncate_at_line_boundary(&code, 100);
        assert_eq!(cut.chars().count(), 100);
    }

    #[test]
    fn truncation_is_char_safe() {
        let code = "é".repeat(50);
        assert_eq!(truncate_at_line_boundary(&code, 10), "é".repeat(10));
    }

    #[test]
    fn short_code_is_untouched() {
        assert_eq!(optimize_for_analysis("x = 1", 100), "x = 1");
    }

    #[test]
    fn code_prompt_fences_by_language() {
        let prompt = code_prompt("Analyze this code:", "fn main() {}", Lang::Rust, 100);
        assert!(prompt.starts_with("Analyze this code:\n\n```rust\n"));
        assert!(prompt.ends_with("fn main() {}\n```"));
    }
}
