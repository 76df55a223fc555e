//! Structure-aware code splitter.
//!
//! For languages with a bundled tree-sitter grammar the source is parsed and
//! chunk boundaries follow syntax nodes: adjacent small nodes are merged up to
//! `max_chars`, and a node that does not fit is split by recursing into its
//! children. Languages without a grammar fall back to greedy line windows,
//! which still never cut a line in half unless the line alone exceeds
//! `max_chars`.
//!
//! Overlap is measured in lines: each chunk after the first is prefixed with
//! up to `overlap_lines` lines preceding it, as many as fit without pushing
//! the chunk past `max_chars`.

use tree_sitter::{Node, Parser};

use super::prose::{char_len, hard_split};
use crate::error::{PipelineError, Result};

/// Error-node ratio above which a parse is considered malformed.
const ERROR_THRESHOLD: f64 = 0.30;

/// Languages in the extension table that have a bundled grammar.
pub fn grammar(language: &str) -> Option<tree_sitter::Language> {
    match language {
        "c" => Some(tree_sitter_c::LANGUAGE.into()),
        "cpp" => Some(tree_sitter_cpp::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        _ => None,
    }
}

/// Split source `text` written in `language`.
///
/// Fails with [`PipelineError::SplitterFailure`] when the grammar cannot be
/// loaded, the parser gives up, or too much of the tree is error nodes.
pub fn split_code(
    language: &str,
    text: &str,
    max_chars: usize,
    overlap_lines: usize,
) -> Result<Vec<String>> {
    let max_chars = max_chars.max(1);
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Ok(Vec::new());
    }
    let line_chars: Vec<usize> = lines.iter().map(|l| char_len(l)).collect();

    let mut builder = RangeBuilder {
        line_chars: &line_chars,
        max_chars,
        covered: 0,
        ranges: Vec::new(),
    };

    match grammar(language) {
        Some(ts_language) => {
            let mut parser = Parser::new();
            parser
                .set_language(&ts_language)
                .map_err(|e| failure(language, e.to_string()))?;
            let tree = parser
                .parse(text, None)
                .ok_or_else(|| failure(language, "parser returned no tree".to_string()))?;
            let root = tree.root_node();

            let ratio = error_ratio(root);
            if ratio > ERROR_THRESHOLD {
                return Err(failure(
                    language,
                    format!("{:.0}% of syntax nodes are errors", ratio * 100.0),
                ));
            }
            builder.visit_children(root);
        }
        None => builder.emit(0, lines.len() - 1),
    }

    Ok(render(&lines, &line_chars, &builder.ranges, max_chars, overlap_lines))
}

fn failure(language: &str, message: String) -> PipelineError {
    PipelineError::SplitterFailure {
        language: language.to_string(),
        message,
    }
}

/// Fraction of error or missing nodes in the tree, walked without recursion.
fn error_ratio(root: Node) -> f64 {
    let mut cursor = root.walk();
    let mut total = 0usize;
    let mut errors = 0usize;

    loop {
        let node = cursor.node();
        total += 1;
        if node.is_error() || node.is_missing() {
            errors += 1;
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return errors as f64 / total as f64;
            }
        }
    }
}

/// Accumulates inclusive row ranges, each no longer than `max_chars` unless it
/// is a single oversized line.
struct RangeBuilder<'a> {
    line_chars: &'a [usize],
    max_chars: usize,
    /// First row not yet assigned to a range.
    covered: usize,
    ranges: Vec<(usize, usize)>,
}

impl RangeBuilder<'_> {
    fn last_row(&self) -> usize {
        self.line_chars.len() - 1
    }

    fn span_chars(&self, start: usize, end: usize) -> usize {
        self.line_chars[start..=end].iter().sum::<usize>() + (end - start)
    }

    fn visit_children(&mut self, node: Node) {
        let mut current: Option<(usize, usize)> = None;
        let mut cursor = node.walk();

        for child in node.children(&mut cursor) {
            let node_start = child.start_position().row.min(self.last_row());
            let node_end = child.end_position().row.min(self.last_row());

            if let Some((start, end)) = current {
                let merged_end = end.max(node_end);
                if self.span_chars(start, merged_end) <= self.max_chars {
                    current = Some((start, merged_end));
                    continue;
                }
                self.push(start, end);
                current = None;
            }

            let start = node_start.max(self.covered);
            if start > node_end {
                continue;
            }
            if self.span_chars(start, node_end) <= self.max_chars {
                current = Some((start, node_end));
            } else if child.child_count() > 0 {
                self.visit_children(child);
            } else {
                self.emit(start, node_end);
            }
        }

        if let Some((start, end)) = current {
            self.push(start, end);
        }
    }

    /// Greedy line windows over `start..=end`.
    fn emit(&mut self, start: usize, end: usize) {
        let mut window_start = start;
        for row in start..=end {
            if row > window_start && self.span_chars(window_start, row) > self.max_chars {
                self.push(window_start, row - 1);
                window_start = row;
            }
        }
        self.push(window_start, end);
    }

    fn push(&mut self, start: usize, end: usize) {
        if start > end || start < self.covered {
            return;
        }
        self.ranges.push((start, end));
        self.covered = end + 1;
    }
}

fn render(
    lines: &[&str],
    line_chars: &[usize],
    ranges: &[(usize, usize)],
    max_chars: usize,
    overlap_lines: usize,
) -> Vec<String> {
    let mut chunks = Vec::with_capacity(ranges.len());

    for (i, &(start, end)) in ranges.iter().enumerate() {
        let body_chars = line_chars[start..=end].iter().sum::<usize>() + (end - start);

        if body_chars > max_chars {
            let body = lines[start..=end].join("\n");
            let mut pieces = Vec::new();
            hard_split(&body, max_chars, &mut pieces);
            chunks.extend(
                pieces
                    .into_iter()
                    .filter(|p| !p.trim().is_empty())
                    .map(str::to_string),
            );
            continue;
        }

        let mut from = start;
        if i > 0 {
            let mut used = body_chars;
            let floor = start.saturating_sub(overlap_lines);
            while from > floor && used + line_chars[from - 1] + 1 <= max_chars {
                from -= 1;
                used += line_chars[from] + 1;
            }
        }

        let text = lines[from..=end].join("\n");
        if !text.trim().is_empty() {
            chunks.push(text);
        }
    }

    chunks
}
