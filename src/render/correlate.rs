//! Symbol mapping: aligning rendered output to template source
//!
//! Template expansion deletes lines (control blocks), splices multi-line
//! content, and substitutes inline values, so line counts diverge between a
//! template and its rendered output. This module computes a
//! confidence-scored, line- and token-level correspondence from rendered
//! positions back to source positions in three passes, each considering
//! only not-yet-mapped lines:
//!
//! 1. structural anchoring (confidence 1.0): identical-text anchors first,
//!    then (key, indentation) anchors ignoring the value;
//! 2. value matching (0.95 / 0.85) inside gaps bounded by mapped neighbors
//!    on both sides;
//! 3. fuzzy matching (0.5–0.8) by normalized longest-common-subsequence
//!    similarity, floored at 0.3.
//!
//! The numeric constants are empirically chosen upstream and preserved
//! exactly for behavioral compatibility.

use std::collections::HashMap;
use std::time::SystemTime;

use tower_lsp::lsp_types::{Position, Range};

use crate::document::byte_to_utf16_col;
use crate::scan::{self, expressions_in_line, is_control_line, strip_expressions};

/// How a line mapping was established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Exact,
    Anchor,
    Value,
    Fuzzy,
}

/// A rendered-line to source-line correspondence
#[derive(Debug, Clone)]
pub struct LineMapping {
    pub rendered_line: usize,
    pub original_line: usize,
    pub confidence: f64,
    pub method: MatchMethod,
}

/// A rendered-span to source-expression correspondence
#[derive(Debug, Clone)]
pub struct TokenMapping {
    pub rendered_range: Range,
    pub original_range: Range,
    pub original_expression: String,
    pub rendered_value: String,
    pub confidence: f64,
}

/// The full correspondence for one (chart, document) pair. Immutable once
/// built; rebuilt wholesale on source or render change, never patched.
#[derive(Debug, Clone)]
pub struct SymbolMapping {
    pub chart_id: String,
    pub original_doc_id: String,
    pub line_mappings: Vec<LineMapping>,
    pub token_mappings: Vec<TokenMapping>,
    pub created_at: SystemTime,
}

/// A lookup result pointing back into the template source
#[derive(Debug, Clone, PartialEq)]
pub struct MappedPosition {
    pub position: Position,
    pub confidence: f64,
    /// The original expression text, for token-level hits
    pub expression: Option<String>,
}

/// A line signature used for alignment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Anchor {
    key: String,
    value: Option<String>,
    indent: usize,
    /// The whole trimmed line, for identical-text matching
    exact: String,
}

/// Build the anchor for a line: comment text, `key:` token + indentation,
/// or a `- key: value` list entry. Lines that are entirely control-flow
/// expressions produce no rendered output and are excluded on the source
/// side; lines with neither shape have no anchor.
fn build_anchor(line: &str, source_side: bool) -> Option<Anchor> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if source_side && is_control_line(line) {
        return None;
    }
    let indent = scan::indent_of(line);
    if trimmed.starts_with('#') {
        return Some(Anchor {
            key: trimmed.to_string(),
            value: None,
            indent,
            exact: trimmed.to_string(),
        });
    }
    let kv = scan::parse_key_value(line)?;
    Some(Anchor {
        key: kv.key,
        value: (!kv.value.is_empty()).then(|| kv.value),
        indent,
        exact: trimmed.to_string(),
    })
}

/// Normalized longest-common-subsequence similarity: `2*|LCS|/(|a|+|b|)`.
fn lcs_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            curr[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()] as f64;
    2.0 * lcs / (a.len() + b.len()) as f64
}

const FUZZY_SIMILARITY_FLOOR: f64 = 0.3;
const LOOKUP_DECAY_PER_LINE: f64 = 0.15;
const LOOKUP_CONFIDENCE_FLOOR: f64 = 0.2;
const LOOKUP_MAX_DISTANCE: usize = 3;

/// Compute the symbol mapping between a template source and its fully
/// rendered output.
pub fn create_symbol_mapping(
    chart_id: &str,
    original_doc_id: &str,
    source: &str,
    rendered: &str,
) -> SymbolMapping {
    let source_lines: Vec<&str> = source.lines().collect();
    let rendered_lines: Vec<&str> = rendered.lines().collect();

    let source_anchors: Vec<Option<Anchor>> = source_lines
        .iter()
        .map(|l| build_anchor(l, true))
        .collect();
    let rendered_anchors: Vec<Option<Anchor>> = rendered_lines
        .iter()
        .map(|l| build_anchor(l, false))
        .collect();

    let mut rendered_to_source: Vec<Option<usize>> = vec![None; rendered_lines.len()];
    let mut source_used: Vec<bool> = vec![false; source_lines.len()];
    let mut mappings: Vec<LineMapping> = Vec::new();

    let mut record = |mappings: &mut Vec<LineMapping>,
                      rendered_to_source: &mut Vec<Option<usize>>,
                      source_used: &mut Vec<bool>,
                      r: usize,
                      s: usize,
                      confidence: f64,
                      method: MatchMethod| {
        rendered_to_source[r] = Some(s);
        source_used[s] = true;
        mappings.push(LineMapping {
            rendered_line: r,
            original_line: s,
            confidence,
            method,
        });
    };

    // Pass 1a: identical-text anchors. Occurrences pair in order, which
    // keeps repeated signatures deterministic and bijective.
    let mut by_exact: HashMap<&str, Vec<usize>> = HashMap::new();
    for (s, anchor) in source_anchors.iter().enumerate() {
        if let Some(a) = anchor {
            by_exact.entry(a.exact.as_str()).or_default().push(s);
        }
    }
    for occurrences in by_exact.values_mut() {
        occurrences.reverse(); // pop() yields in document order
    }
    for (r, anchor) in rendered_anchors.iter().enumerate() {
        let a = match anchor {
            Some(a) => a,
            None => continue,
        };
        if let Some(occurrences) = by_exact.get_mut(a.exact.as_str()) {
            while let Some(s) = occurrences.pop() {
                if !source_used[s] {
                    record(
                        &mut mappings,
                        &mut rendered_to_source,
                        &mut source_used,
                        r,
                        s,
                        1.0,
                        MatchMethod::Exact,
                    );
                    break;
                }
            }
        }
    }

    // Pass 1b: (key, indentation) anchors ignoring the value, covering
    // lines whose value alone was computed.
    let mut by_key: HashMap<(String, usize), Vec<usize>> = HashMap::new();
    for (s, anchor) in source_anchors.iter().enumerate() {
        if source_used[s] {
            continue;
        }
        if let Some(a) = anchor {
            by_key
                .entry((a.key.clone(), a.indent))
                .or_default()
                .push(s);
        }
    }
    for occurrences in by_key.values_mut() {
        occurrences.reverse();
    }
    for (r, anchor) in rendered_anchors.iter().enumerate() {
        if rendered_to_source[r].is_some() {
            continue;
        }
        let a = match anchor {
            Some(a) => a,
            None => continue,
        };
        if let Some(occurrences) = by_key.get_mut(&(a.key.clone(), a.indent)) {
            while let Some(s) = occurrences.pop() {
                if !source_used[s] {
                    record(
                        &mut mappings,
                        &mut rendered_to_source,
                        &mut source_used,
                        r,
                        s,
                        1.0,
                        MatchMethod::Anchor,
                    );
                    break;
                }
            }
        }
    }

    // Pass 2: value matching inside gaps bounded by mapped neighbors on
    // both sides.
    for r in 0..rendered_lines.len() {
        if rendered_to_source[r].is_some() || rendered_lines[r].trim().is_empty() {
            continue;
        }
        let (sa, sb) = match bounded_gap(&rendered_to_source, r) {
            Some(gap) => gap,
            None => continue,
        };
        let lo = sa.min(sb) + 1;
        let hi = sa.max(sb);

        let rendered_key = scan::parse_key_value(rendered_lines[r]).map(|kv| kv.key);
        let mut matched = None;
        for s in lo..hi {
            if source_used[s] || source_lines[s].trim().is_empty() {
                continue;
            }
            if let (Some(rk), Some(kv)) = (&rendered_key, scan::parse_key_value(source_lines[s])) {
                if *rk == kv.key {
                    matched = Some((s, 0.95));
                    break;
                }
            }
        }
        if matched.is_none() {
            for s in lo..hi {
                if source_used[s] || source_lines[s].trim().is_empty() {
                    continue;
                }
                let stripped = strip_expressions(source_lines[s]);
                let stripped = stripped.trim();
                if !stripped.is_empty() && rendered_lines[r].contains(stripped) {
                    matched = Some((s, 0.85));
                    break;
                }
            }
        }
        if let Some((s, confidence)) = matched {
            record(
                &mut mappings,
                &mut rendered_to_source,
                &mut source_used,
                r,
                s,
                confidence,
                MatchMethod::Value,
            );
        }
    }

    // Pass 3: fuzzy matching by normalized LCS similarity, inside the
    // window bounded by the nearest mapped neighbors (document edges when a
    // side has none).
    for r in 0..rendered_lines.len() {
        if rendered_to_source[r].is_some() || rendered_lines[r].trim().is_empty() {
            continue;
        }
        let (lo, hi) = fuzzy_window(&rendered_to_source, r, source_lines.len());
        let rendered_trim = rendered_lines[r].trim();

        let mut best: Option<(usize, f64)> = None;
        for s in lo..hi {
            if source_used[s] || source_lines[s].trim().is_empty() {
                continue;
            }
            if source_anchors[s].is_none() && is_control_line(source_lines[s]) {
                continue;
            }
            let stripped = strip_expressions(source_lines[s]);
            let similarity = lcs_similarity(rendered_trim, stripped.trim());
            if similarity <= FUZZY_SIMILARITY_FLOOR {
                continue;
            }
            if best.map(|(_, b)| similarity > b).unwrap_or(true) {
                best = Some((s, similarity));
            }
        }
        if let Some((s, similarity)) = best {
            let confidence = (0.5 + similarity * 0.3).min(0.8);
            record(
                &mut mappings,
                &mut rendered_to_source,
                &mut source_used,
                r,
                s,
                confidence,
                MatchMethod::Fuzzy,
            );
        }
    }

    mappings.sort_by_key(|m| m.rendered_line);

    // Token refinement: for each mapped pair whose text differs, locate the
    // rendered span of every embedded expression by the literal text
    // bracketing it. An identical pair had nothing substituted and yields
    // no token mappings.
    let mut token_mappings = Vec::new();
    for mapping in &mappings {
        let source_line = source_lines[mapping.original_line];
        let rendered_line = rendered_lines[mapping.rendered_line];
        if source_line == rendered_line {
            continue;
        }
        refine_tokens(mapping, source_line, rendered_line, &mut token_mappings);
    }

    SymbolMapping {
        chart_id: chart_id.to_string(),
        original_doc_id: original_doc_id.to_string(),
        line_mappings: mappings,
        token_mappings,
        created_at: SystemTime::now(),
    }
}

/// Source interval spanned by the nearest mapped rendered neighbors on both
/// sides of `r`; `None` when either side has no mapped neighbor.
fn bounded_gap(rendered_to_source: &[Option<usize>], r: usize) -> Option<(usize, usize)> {
    let above = (0..r).rev().find_map(|i| rendered_to_source[i]);
    let below = (r + 1..rendered_to_source.len()).find_map(|i| rendered_to_source[i]);
    match (above, below) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    }
}

/// Source window for fuzzy matching: bounded by mapped neighbors where they
/// exist, document edges otherwise.
fn fuzzy_window(rendered_to_source: &[Option<usize>], r: usize, source_len: usize) -> (usize, usize) {
    let above = (0..r).rev().find_map(|i| rendered_to_source[i]);
    let below = (r + 1..rendered_to_source.len()).find_map(|i| rendered_to_source[i]);
    let lo = above.map(|a| a + 1).unwrap_or(0);
    let hi = below.unwrap_or(source_len);
    (lo, hi.min(source_len))
}

fn refine_tokens(
    mapping: &LineMapping,
    source_line: &str,
    rendered_line: &str,
    out: &mut Vec<TokenMapping>,
) {
    let spans = expressions_in_line(source_line);
    if spans.is_empty() {
        return;
    }

    let mut cursor = 0usize;
    for (i, span) in spans.iter().enumerate() {
        let prefix_start = if i == 0 { 0 } else { spans[i - 1].end };
        let prefix = &source_line[prefix_start..span.start];
        let suffix_end = spans.get(i + 1).map(|s| s.start).unwrap_or(source_line.len());
        let suffix = &source_line[span.end..suffix_end];

        let value_start = if prefix.is_empty() {
            cursor
        } else {
            match rendered_line[cursor..].find(prefix) {
                Some(found) => cursor + found + prefix.len(),
                None => continue,
            }
        };
        let value_end = if suffix.trim().is_empty() && spans.get(i + 1).is_none() {
            rendered_line.len()
        } else if suffix.is_empty() {
            // Adjacent expressions: the next iteration re-anchors itself
            rendered_line.len()
        } else {
            match rendered_line[value_start..].find(suffix) {
                Some(found) => value_start + found,
                None => continue,
            }
        };
        if value_end < value_start {
            continue;
        }

        out.push(TokenMapping {
            rendered_range: Range {
                start: Position {
                    line: mapping.rendered_line as u32,
                    character: byte_to_utf16_col(rendered_line, value_start),
                },
                end: Position {
                    line: mapping.rendered_line as u32,
                    character: byte_to_utf16_col(rendered_line, value_end),
                },
            },
            original_range: Range {
                start: Position {
                    line: mapping.original_line as u32,
                    character: byte_to_utf16_col(source_line, span.start),
                },
                end: Position {
                    line: mapping.original_line as u32,
                    character: byte_to_utf16_col(source_line, span.end),
                },
            },
            original_expression: span.text.clone(),
            rendered_value: rendered_line[value_start..value_end].to_string(),
            confidence: mapping.confidence,
        });
        cursor = value_end;
    }
}

impl SymbolMapping {
    /// Map a rendered position back to the source: token mappings first,
    /// then an exact line mapping, then the nearest line mapping within 3
    /// lines with confidence decayed 0.15 per line (floor 0.2). Beyond
    /// distance 3 there is no match.
    pub fn position_lookup(&self, rendered_line: usize, character: u32) -> Option<MappedPosition> {
        if let Some(token) = self.token_at(rendered_line, character) {
            return Some(MappedPosition {
                position: token.original_range.start,
                confidence: token.confidence,
                expression: Some(token.original_expression.clone()),
            });
        }

        if let Some(mapping) = self
            .line_mappings
            .iter()
            .find(|m| m.rendered_line == rendered_line)
        {
            return Some(MappedPosition {
                position: Position {
                    line: mapping.original_line as u32,
                    character,
                },
                confidence: mapping.confidence,
                expression: None,
            });
        }

        let nearest = self
            .line_mappings
            .iter()
            .map(|m| {
                let distance = m.rendered_line.abs_diff(rendered_line);
                (distance, m)
            })
            .filter(|(d, _)| *d <= LOOKUP_MAX_DISTANCE)
            .min_by_key(|(d, m)| (*d, m.rendered_line))?;

        let (distance, mapping) = nearest;
        let confidence = (mapping.confidence - LOOKUP_DECAY_PER_LINE * distance as f64)
            .max(LOOKUP_CONFIDENCE_FLOOR);
        let offset = rendered_line as i64 - mapping.rendered_line as i64;
        let original_line = (mapping.original_line as i64 + offset).max(0) as u32;
        Some(MappedPosition {
            position: Position {
                line: original_line,
                character: 0,
            },
            confidence,
            expression: None,
        })
    }

    /// Token-mapping-only lookup: the expression that produced the value at
    /// a rendered position, if any.
    pub fn expression_lookup(&self, rendered_line: usize, character: u32) -> Option<MappedPosition> {
        self.token_at(rendered_line, character).map(|token| MappedPosition {
            position: token.original_range.start,
            confidence: token.confidence,
            expression: Some(token.original_expression.clone()),
        })
    }

    fn token_at(&self, rendered_line: usize, character: u32) -> Option<&TokenMapping> {
        self.token_mappings.iter().find(|t| {
            t.rendered_range.start.line == rendered_line as u32
                && character >= t.rendered_range.start.character
                && character < t.rendered_range.end.character
        })
    }
}
