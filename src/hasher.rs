//! Language-normalized content hashing.
//!
//! Hashes are computed over a normalized form of the source: comments and
//! docstrings are stripped, whitespace is collapsed and JSON is re-serialized
//! with sorted keys. Reformatting-only edits therefore keep the same hash and
//! never trigger re-analysis.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::language::LanguageKind;

/// Memo entries kept before the memo is reset.
const MAX_MEMO_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    path: PathBuf,
    len: usize,
    /// xxh3 of the raw content; guards against same-length edits.
    fingerprint: u64,
}

/// Produces stable, language-normalized content hashes.
///
/// Repeated inputs are memoized for the lifetime of the hasher, keyed by path,
/// content length and a fast fingerprint of the raw bytes.
#[derive(Debug, Default)]
pub struct ContentHasher {
    memo: Mutex<HashMap<MemoKey, String>>,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `content` as it would be seen for `path`.
    ///
    /// `language` selects the normalization; when `None` it is inferred from the
    /// path extension. Returns `None` on internal failure; callers must treat
    /// that as "unknown" and force a cache miss.
    pub fn generate_hash(
        &self,
        path: &Path,
        content: &str,
        language: Option<LanguageKind>,
    ) -> Option<String> {
        let language = language.or_else(|| LanguageKind::from_path(path));
        let key = MemoKey {
            path: path.to_path_buf(),
            len: content.len(),
            fingerprint: xxhash_rust::xxh3::xxh3_64(content.as_bytes()),
        };

        let mut memo = match self.memo.lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!(path = %path.display(), "hash memo poisoned; reporting unknown hash");
                return None;
            }
        };
        if let Some(hash) = memo.get(&key) {
            return Some(hash.clone());
        }

        let hash = hash_normalized(&normalize(content, language), language);
        if memo.len() >= MAX_MEMO_ENTRIES {
            memo.clear();
        }
        memo.insert(key, hash.clone());
        Some(hash)
    }

    /// Read `path` from disk and hash it. Returns `None` if the file cannot be read.
    pub fn hash_file(&self, path: &Path) -> Option<String> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                self.generate_hash(path, &content, None)
            }
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "cannot hash unreadable file");
                None
            }
        }
    }

    /// Forget every memoized hash.
    pub fn clear_cache(&self) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.clear();
        }
    }

    /// Number of memoized hashes.
    pub fn memo_len(&self) -> usize {
        self.memo.lock().map(|m| m.len()).unwrap_or(0)
    }
}

fn hash_normalized(normalized: &str, language: Option<LanguageKind>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(language.map(|l| l.as_str()).unwrap_or("text").as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Normalize `content` for hashing according to `language`.
pub fn normalize(content: &str, language: Option<LanguageKind>) -> String {
    match language {
        Some(LanguageKind::Json) => canonical_json(content),
        Some(LanguageKind::Python) => normalize_python(content),
        // Plain CSS has no line comments and `//` appears inside unquoted url().
        Some(LanguageKind::Css) => normalize_c_style(content, CStyle::default()),
        Some(LanguageKind::Rust) => normalize_c_style(
            content,
            CStyle {
                line_comments: true,
                rust_chars: true,
                ..CStyle::default()
            },
        ),
        Some(LanguageKind::JavaScript | LanguageKind::TypeScript) => normalize_c_style(
            content,
            CStyle {
                line_comments: true,
                regex_literals: true,
                ..CStyle::default()
            },
        ),
        Some(lang) if lang.has_c_style_comments() => normalize_c_style(
            content,
            CStyle {
                line_comments: true,
                ..CStyle::default()
            },
        ),
        _ => normalize_text(content),
    }
}

/// Re-serialize JSON with sorted keys and no insignificant whitespace.
/// Invalid JSON falls back to whitespace normalization.
fn canonical_json(content: &str) -> String {
    match serde_json::from_str::<Value>(content) {
        Ok(value) => {
            let mut out = String::with_capacity(content.len());
            write_canonical(&value, &mut out);
            out
        }
        Err(_) => normalize_text(content),
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Strip `//` (optional) and `/* */` comments outside string literals and
/// collapse every whitespace run to a single space.
///
/// `rust_chars` makes `'` start a char literal only when it actually is one,
/// so lifetimes (`'a`) are not mistaken for string openers.
/// Lexical features of a C-family language that affect comment stripping.
#[derive(Debug, Clone, Copy, Default)]
struct CStyle {
    /// `//` starts a comment.
    line_comments: bool,
    /// `'` may be a lifetime rather than a quote.
    rust_chars: bool,
    /// `/.../` can be a regex literal, whose body may contain `/*` or `//`.
    regex_literals: bool,
}

fn normalize_c_style(content: &str, syntax: CStyle) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut pending_space = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '/' && next == Some('*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            pending_space = true;
            continue;
        }
        if syntax.line_comments && c == '/' && next == Some('/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            pending_space = true;
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            i += 1;
            continue;
        }

        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;

        let is_string_start = match c {
            '"' | '`' => true,
            '\'' if syntax.rust_chars => is_rust_char_literal(&chars, i),
            '\'' => true,
            _ => false,
        };
        let regex = (syntax.regex_literals && c == '/' && regex_may_start(&out))
            .then(|| regex_end(&chars, i))
            .flatten();
        if let Some(end) = regex {
            out.extend(&chars[i..end]);
            i = end;
        } else if is_string_start {
            let end = string_end(&chars, i, c);
            out.extend(&chars[i..end]);
            i = end;
        } else {
            out.push(c);
            i += 1;
        }
    }

    out
}

/// `'x'` or `'\n'` style literal (as opposed to a lifetime such as `'a`).
fn is_rust_char_literal(chars: &[char], start: usize) -> bool {
    match chars.get(start + 1) {
        Some('\\') => true,
        Some(_) => chars.get(start + 2) == Some(&'\''),
        None => false,
    }
}

/// Index one past the closing `quote` of the literal opened at `start`.
/// Whether a `/` following `out` starts a regex literal rather than a division.
fn regex_may_start(out: &str) -> bool {
    const KEYWORDS: [&str; 10] = [
        "return", "typeof", "case", "yield", "await", "void", "delete", "throw", "in", "of",
    ];
    let before = out.trim_end();
    match before.chars().last() {
        None => true,
        Some(c) if "(,=:[!&|?{};+-*%<>~^".contains(c) => true,
        Some(c) if is_ident_char(c) => {
            let word_start = before.trim_end_matches(is_ident_char).len();
            KEYWORDS.contains(&&before[word_start..])
        }
        Some(_) => false,
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// End (exclusive) of the regex literal body opening at `start`. `None` when
/// the line ends first, so the `/` is not a regex after all.
fn regex_end(chars: &[char], start: usize) -> Option<usize> {
    let mut in_class = false;
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\n' => return None,
            '[' => {
                in_class = true;
                i += 1;
            }
            ']' => {
                in_class = false;
                i += 1;
            }
            '/' if !in_class => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

fn string_end(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Python normalization: drop `#` comments and docstrings (a string literal
/// forming a whole statement), collapse inner whitespace, keep indentation
/// and line structure since both are significant.
fn normalize_python(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    let mut at_line_start = true;
    let mut pending_space = false;
    let mut depth: i32 = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                let trimmed = line.trim_end();
                if !trimmed.trim_start().is_empty() {
                    lines.push(trimmed.to_owned());
                }
                line.clear();
                // Inside brackets the logical line continues.
                at_line_start = depth == 0;
                pending_space = depth > 0;
                i += 1;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ' ' | '\t' | '\r' | '\x0c' => {
                if at_line_start && depth == 0 {
                    if c != '\r' {
                        line.push(c);
                    }
                } else {
                    pending_space = true;
                }
                i += 1;
            }
            _ => {
                if let Some((start, end)) = python_string_at(&chars, i) {
                    let statement_string =
                        at_line_start && depth == 0 && rest_of_line_is_blank(&chars, end);
                    if !statement_string {
                        if pending_space && !line.trim().is_empty() {
                            line.push(' ');
                        }
                        line.extend(&chars[start..end]);
                        at_line_start = false;
                    }
                    pending_space = false;
                    i = end;
                    continue;
                }

                match c {
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' | '}' => depth = (depth - 1).max(0),
                    _ => {}
                }
                if pending_space && !line.trim().is_empty() {
                    line.push(' ');
                }
                pending_space = false;
                line.push(c);
                at_line_start = false;
                i += 1;
            }
        }
    }

    let trimmed = line.trim_end();
    if !trimmed.trim_start().is_empty() {
        lines.push(trimmed.to_owned());
    }
    lines.join("\n")
}

/// If a (possibly prefixed, possibly triple-quoted) string literal starts at
/// `i`, return its `(start, end)` span.
fn python_string_at(chars: &[char], i: usize) -> Option<(usize, usize)> {
    let mut q = i;
    while q < chars.len() && q - i < 2 && matches!(chars[q], 'r' | 'R' | 'u' | 'U' | 'b' | 'B' | 'f' | 'F')
    {
        q += 1;
    }
    let quote = *chars.get(q)?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    // A prefix letter must not be the tail of an identifier (`bar"` is not a prefix).
    if q > i && i > 0 && (chars[i - 1].is_alphanumeric() || chars[i - 1] == '_') {
        return None;
    }

    let triple = chars.get(q + 1) == Some(&quote) && chars.get(q + 2) == Some(&quote);
    let mut j = if triple { q + 3 } else { q + 1 };
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            c if c == quote => {
                if !triple {
                    return Some((i, j + 1));
                }
                if chars.get(j + 1) == Some(&quote) && chars.get(j + 2) == Some(&quote) {
                    return Some((i, j + 3));
                }
                j += 1;
            }
            '\n' if !triple => return Some((i, j)),
            _ => j += 1,
        }
    }
    Some((i, chars.len()))
}

fn rest_of_line_is_blank(chars: &[char], from: usize) -> bool {
    for &c in &chars[from.min(chars.len())..] {
        match c {
            '\n' | '#' => return true,
            ' ' | '\t' | '\r' | ';' => continue,
            _ => return false,
        }
    }
    true
}

/// Fallback: normalize line endings, trim trailing whitespace, drop blank lines.
fn normalize_text(content: &str) -> String {
    content
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
