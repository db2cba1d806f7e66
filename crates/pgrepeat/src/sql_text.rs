//! Superficial SQL token heuristics.
//!
//! Nothing here parses SQL. These helpers look at leading keywords and
//! whitespace-separated tokens only, which is enough for SELECT detection,
//! transaction-control detection and the best-effort table/JOIN report.

/// Strip leading whitespace, SQL comments (`--` and `/* */`), and parentheses
/// from a SQL string to find the first meaningful keyword.
pub(crate) fn strip_sql_prefix(sql: &str) -> &str {
    let mut s = sql;
    loop {
        let before = s;
        s = s.trim_start();
        if s.starts_with("--") {
            if let Some(pos) = s.find('\n') {
                s = &s[pos + 1..];
                continue;
            }
            return "";
        }
        if s.starts_with("/*") {
            if let Some(pos) = s.find("*/") {
                s = &s[pos + 2..];
                continue;
            }
            return "";
        }
        if let Some(rest) = s.strip_prefix('(') {
            s = rest;
            continue;
        }
        if s == before {
            break;
        }
    }
    s
}

/// Case-insensitive keyword prefix test that also requires a word boundary,
/// so `SELECTED` does not count as `SELECT`.
pub(crate) fn starts_with_keyword(s: &str, keyword: &str) -> bool {
    match s.get(0..keyword.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(keyword) => s[keyword.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '_'),
        _ => false,
    }
}

/// The statement that decides what a query does.
///
/// For `WITH ...` this is the text after the last top-level closing paren of
/// the CTE list; otherwise the statement with its prefix stripped.
pub(crate) fn main_statement(sql: &str) -> &str {
    let stripped = strip_sql_prefix(sql);
    if !starts_with_keyword(stripped, "WITH") {
        return stripped;
    }
    let mut depth = 0usize;
    let mut quoted = false;
    let mut body = None;
    for (idx, c) in stripped.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    body = Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    body.map_or(stripped, |idx| stripped[idx..].trim_start())
}

/// Whether the statement is a SELECT.
pub fn is_select(sql: &str) -> bool {
    starts_with_keyword(strip_sql_prefix(sql), "SELECT")
}

/// Transaction-control statement kinds recognised by the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionControl {
    Begin,
    End,
}

impl TransactionControl {
    pub(crate) fn from_sql(sql: &str) -> Option<Self> {
        let s = strip_sql_prefix(sql);
        if starts_with_keyword(s, "BEGIN") || starts_with_keyword(s, "START TRANSACTION") {
            Some(Self::Begin)
        } else if starts_with_keyword(s, "COMMIT")
            || starts_with_keyword(s, "END")
            || (starts_with_keyword(s, "ROLLBACK") && !is_rollback_to_savepoint(s))
        {
            Some(Self::End)
        } else {
            None
        }
    }
}

fn is_rollback_to_savepoint(s: &str) -> bool {
    s.split_whitespace()
        .nth(1)
        .is_some_and(|token| token.eq_ignore_ascii_case("TO"))
}

/// Number of `JOIN` keywords in the statement.
///
/// May over-count when the word appears inside string literals or identifiers.
pub fn num_joins(sql: &str) -> usize {
    sql.to_ascii_lowercase().matches("join ").count()
}

/// Tables referenced after `FROM`, `JOIN` or `AS`.
///
/// Column aliases introduced with `AS` are reported as tables too, and
/// subqueries are skipped.
pub fn tables_involved(sql: &str) -> Vec<String> {
    let components: Vec<&str> = sql.split_whitespace().collect();
    let mut tables = Vec::new();
    for (idx, component) in components.iter().enumerate() {
        let is_marker = ["from", "join", "as"]
            .iter()
            .any(|kw| component.eq_ignore_ascii_case(kw));
        if !is_marker {
            continue;
        }
        let Some(next) = components.get(idx + 1) else {
            break;
        };
        if next.starts_with('(') {
            continue;
        }
        let stripped = next.trim().trim_matches(',');
        if !stripped.is_empty() {
            tables.push(stripped.to_string());
        }
    }
    tables
}
