//! Query normalization shared by the SQL dialects.
//!
//! `normalize_query` turns a literal query into its shape: string and
//! numeric literals (and quoted identifiers) become `?`, everything is
//! lowercased, and whitespace collapses to single spaces. The result of
//! normalizing is itself a fixed point, so grouping on the normalized
//! form is stable.

/// Replaces literals with `?`, lowercases, and collapses whitespace.
pub fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            // Single-quoted string literal. Handles '' doubling and
            // backslash escapes (E'...' strings).
            '\'' => {
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => {
                            chars.next();
                        }
                        '\'' => {
                            if chars.peek() == Some(&'\'') {
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                out.push('?');
            }
            // Double-quoted identifier; its spelling is data too.
            '"' => {
                while let Some(inner) = chars.next() {
                    if inner == '"' {
                        if chars.peek() == Some(&'"') {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                out.push('?');
            }
            // A digit starts a numeric literal only when it does not
            // continue an identifier (pg_catalog1 stays intact, id=1 and
            // "order by 1" do not).
            c if c.is_ascii_digit() => {
                let continues_identifier = matches!(
                    out.chars().last(),
                    Some(prev) if prev.is_ascii_alphanumeric() || prev == '_'
                );
                if continues_identifier {
                    out.push(c);
                } else {
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '.' {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    out.push('?');
                }
            }
            c if c.is_whitespace() => {
                if !matches!(out.chars().last(), Some(' ') | None) {
                    out.push(' ');
                }
            }
            c => {
                for lower in c.to_lowercase() {
                    out.push(lower);
                }
            }
        }
    }

    while out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_select() {
        assert_eq!(normalize_query("SELECT 1;"), "select ?;");
    }

    #[test]
    fn test_where_clause_literal() {
        assert_eq!(
            normalize_query("SELECT * FROM test WHERE id=1;"),
            "select * from test where id=?;"
        );
    }

    #[test]
    fn test_insert_values() {
        assert_eq!(
            normalize_query("INSERT INTO test (id, name, value) VALUES (1, 'Alice', 'foo');"),
            "insert into test (id, name, value) values (?, ?, ?);"
        );
    }

    #[test]
    fn test_quoted_identifiers_and_escape_strings() {
        assert_eq!(
            normalize_query(
                r#"SELECT d.datname as "Name", pg_catalog.array_to_string(d.datacl, E'\n') AS "Access privileges" FROM pg_catalog.pg_database d ORDER BY 1;"#
            ),
            "select d.datname as ?, pg_catalog.array_to_string(d.datacl, e?) as ? from pg_catalog.pg_database d order by ?;"
        );
    }

    #[test]
    fn test_digits_inside_identifiers_survive() {
        assert_eq!(
            normalize_query("SELECT col1 FROM table2;"),
            "select col1 from table2;"
        );
    }

    #[test]
    fn test_doubled_quote_escape() {
        assert_eq!(
            normalize_query("SELECT 'it''s' FROM t;"),
            "select ? from t;"
        );
    }

    #[test]
    fn test_whitespace_collapsed() {
        assert_eq!(
            normalize_query("SELECT *\n\tFROM   test\n\tWHERE id=2;"),
            "select * from test where id=?;"
        );
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let queries = [
            "SELECT 1;",
            "INSERT INTO test (id) VALUES (42, 'x');",
            r#"SELECT d.datname as "Name" FROM pg_catalog.pg_database d ORDER BY 1;"#,
            "SELECT *  FROM test\n WHERE id=1;",
        ];
        for query in queries {
            let once = normalize_query(query);
            assert_eq!(normalize_query(&once), once, "not a fixed point: {query}");
        }
    }
}
