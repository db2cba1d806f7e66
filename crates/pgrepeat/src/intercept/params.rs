//! Parameter snapshots: printable renderings, the duplicate key, and
//! interpolation of `$n` placeholders for display.

use std::fmt::Write as _;
use tokio_postgres::types::ToSql;

/// Rendering used when a value's `Debug` implementation fails.
pub const UNRENDERABLE: &str = "(unrenderable)";

/// Render one bound value to a printable string.
///
/// Values go through their `Debug` implementation; a formatter error
/// degrades to [`UNRENDERABLE`] instead of failing the call.
pub fn render_param(param: &(dyn ToSql + Sync)) -> String {
    let mut out = String::new();
    match write!(out, "{param:?}") {
        Ok(()) => out,
        Err(_) => UNRENDERABLE.to_string(),
    }
}

/// Render a full parameter list.
pub fn render_params(params: &[&(dyn ToSql + Sync)]) -> Vec<String> {
    params.iter().map(|p| render_param(*p)).collect()
}

/// Render each parameter set of an `execute_many` call as one entry.
pub fn render_param_sets(param_sets: &[&[&(dyn ToSql + Sync)]]) -> Vec<String> {
    param_sets
        .iter()
        .map(|set| format!("[{}]", render_params(set).join(", ")))
        .collect()
}

/// Stable, string-safe key for a rendered parameter list.
pub fn params_key(rendered: &[String]) -> String {
    serde_json::to_string(rendered).unwrap_or_else(|_| rendered.join("\u{1f}"))
}

/// Turn a rendering into a SQL literal for display.
///
/// Strings (rendered with surrounding double quotes) become single-quoted
/// literals with embedded quotes doubled; everything else is kept as is.
fn sql_literal(rendered: &str) -> String {
    match rendered
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) => format!("'{}'", inner.replace("\\\"", "\"").replace('\'', "''")),
        None => rendered.to_string(),
    }
}

/// Substitute `$1..$n` placeholders with rendered values.
///
/// Placeholders inside single-quoted literals are left alone, as are
/// placeholders with no matching value.
pub fn interpolate(sql: &str, rendered: &[String]) -> String {
    if rendered.is_empty() {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_literal = false;
    while let Some((_, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
            continue;
        }
        if c != '$' || in_literal {
            out.push(c);
            continue;
        }

        let mut digits = String::new();
        while let Some(&(_, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits.push(d);
            chars.next();
        }
        let value = digits
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| rendered.get(idx));
        match value {
            Some(v) => out.push_str(&sql_literal(v)),
            None => {
                out.push('$');
                out.push_str(&digits);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::fmt;
    use tokio_postgres::types::{IsNull, Type, to_sql_checked};

    struct Broken;

    impl fmt::Debug for Broken {
        fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    impl ToSql for Broken {
        fn to_sql(
            &self,
            _: &Type,
            _: &mut BytesMut,
        ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
            Ok(IsNull::Yes)
        }

        fn accepts(_: &Type) -> bool {
            true
        }

        to_sql_checked!();
    }

    #[test]
    fn renders_values_through_debug() {
        let params: [&(dyn ToSql + Sync); 3] = [&42i32, &"it's", &Some(1.5f64)];
        assert_eq!(
            render_params(&params),
            vec!["42".to_string(), "\"it's\"".to_string(), "Some(1.5)".to_string()]
        );
    }

    #[test]
    fn failing_debug_degrades_to_placeholder() {
        let params: [&(dyn ToSql + Sync); 2] = [&7i64, &Broken];
        assert_eq!(
            render_params(&params),
            vec!["7".to_string(), UNRENDERABLE.to_string()]
        );
    }

    #[test]
    fn params_key_distinguishes_values() {
        let a = params_key(&["1".to_string(), "\"x\"".to_string()]);
        let b = params_key(&["1".to_string(), "\"y\"".to_string()]);
        assert_ne!(a, b);
        assert_eq!(a, params_key(&["1".to_string(), "\"x\"".to_string()]));
        assert_eq!(params_key(&[]), "[]");
    }

    #[test]
    fn interpolates_placeholders() {
        let rendered = vec!["42".to_string(), "\"o'brien\"".to_string()];
        assert_eq!(
            interpolate("SELECT * FROM users WHERE id = $1 AND name = $2", &rendered),
            "SELECT * FROM users WHERE id = 42 AND name = 'o''brien'"
        );
        assert_eq!(
            interpolate("SELECT '$1', $3, $1", &rendered),
            "SELECT '$1', $3, 42"
        );
        assert_eq!(interpolate("SELECT $1", &[]), "SELECT $1");
    }

    #[test]
    fn renders_param_sets() {
        let first: [&(dyn ToSql + Sync); 2] = [&1i32, &"a"];
        let second: [&(dyn ToSql + Sync); 2] = [&2i32, &"b"];
        let sets: [&[&(dyn ToSql + Sync)]; 2] = [&first, &second];
        assert_eq!(
            render_param_sets(&sets),
            vec!["[1, \"a\"]".to_string(), "[2, \"b\"]".to_string()]
        );
    }
}
