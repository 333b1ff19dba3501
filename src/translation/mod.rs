use std::borrow::Cow;

mod scanner;

use scanner::Markers;

/// Placeholder style a backend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// PostgreSQL-style placeholders like `$1`.
    Postgres,
    /// SQLite-style placeholders: bare `?` or `?1`.
    Sqlite,
}

/// Rewrite `?` placeholders for `target`.
///
/// For [`PlaceholderStyle::Postgres`], bare `?` markers are numbered left to right
/// (`?, ?` becomes `$1, $2`) and `?N` becomes `$N`. [`PlaceholderStyle::Sqlite`]
/// accepts `?` natively, so the input is returned untouched.
///
/// Markers inside quoted text, comments and dollar-quoted bodies are left alone.
/// Returns a borrowed `Cow` when nothing changes.
#[must_use]
pub fn translate_placeholders(sql: &str, target: PlaceholderStyle) -> Cow<'_, str> {
    if target == PlaceholderStyle::Sqlite || !sql.contains('?') {
        return Cow::Borrowed(sql);
    }

    let mut out = String::new();
    let mut copied = 0;
    let mut next_bare = 1usize;
    for marker in Markers::new(sql) {
        if out.is_empty() {
            out.reserve(sql.len() + 16);
        }
        out.push_str(&sql[copied..marker.start]);
        out.push('$');
        match marker.digits {
            Some(digits) => out.push_str(digits),
            None => {
                out.push_str(&next_bare.to_string());
                next_bare += 1;
            }
        }
        copied = marker.end;
    }

    if copied == 0 {
        return Cow::Borrowed(sql);
    }
    out.push_str(&sql[copied..]);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_bare_placeholders() {
        let sql = "INSERT INTO t (a, b) VALUES (?,?), (?,?)";
        let res = translate_placeholders(sql, PlaceholderStyle::Postgres);
        assert_eq!(res, "INSERT INTO t (a, b) VALUES ($1,$2), ($3,$4)");
    }

    #[test]
    fn keeps_explicit_numbers() {
        let sql = "select * from t where a = ?1 and b = ?2";
        let res = translate_placeholders(sql, PlaceholderStyle::Postgres);
        assert_eq!(res, "select * from t where a = $1 and b = $2");
    }

    #[test]
    fn skips_inside_literals_and_comments() {
        let sql = "select '?', ? -- ?\n/* ? */ from t where a = ?";
        let res = translate_placeholders(sql, PlaceholderStyle::Postgres);
        assert_eq!(res, "select '?', $1 -- ?\n/* ? */ from t where a = $2");
    }

    #[test]
    fn skips_dollar_quoted_blocks() {
        let sql = "$foo$ select ? from t $foo$ where a = ?";
        let res = translate_placeholders(sql, PlaceholderStyle::Postgres);
        assert_eq!(res, "$foo$ select ? from t $foo$ where a = $1");
    }

    #[test]
    fn preserves_non_ascii_text() {
        let sql = "insert into fortunes (texte) values (?) -- café";
        let res = translate_placeholders(sql, PlaceholderStyle::Postgres);
        assert_eq!(res, "insert into fortunes (texte) values ($1) -- café");
    }

    #[test]
    fn sqlite_target_borrows() {
        let sql = "select * from t where a = ?";
        let res = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert!(matches!(res, Cow::Borrowed(_)));
        let res = translate_placeholders("select 1", PlaceholderStyle::Postgres);
        assert!(matches!(res, Cow::Borrowed(_)));
    }
}
