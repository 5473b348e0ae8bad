//! Schema introspection and destructive DDL primitives.
//!
//! Migration bodies only ever see a [`SchemaMigrator`]; the SQLite implementation on
//! [`Database`] is the production one, tests substitute instrumented wrappers.

use hourglass_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::database::{Database, quote_ident};

/// Existence predicates against the live schema. Results are never cached.
pub trait SchemaIntrospector {
    fn table_exists(&self, table: &str) -> Result<bool>;
    fn column_exists(&self, table: &str, column: &str) -> Result<bool>;
    fn constraint_exists(&self, table: &str, constraint: &str) -> Result<bool>;
}

/// The database handle handed to migration bodies.
pub trait SchemaMigrator: SchemaIntrospector {
    fn drop_column(&self, table: &str, column: &str) -> Result<()>;
    fn drop_constraint(&self, table: &str, constraint: &str) -> Result<()>;
    fn drop_table(&self, table: &str) -> Result<()>;
    fn execute_sql(&self, sql: &str) -> Result<()>;
}

impl SchemaIntrospector for Database {
    fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
            params![table],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to look up table {table}: {e}")))
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT count(*) > 0 FROM pragma_table_info(?1) WHERE name = ?2 COLLATE NOCASE",
            params![table, column],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to look up column {table}.{column}: {e}")))
    }

    fn constraint_exists(&self, table: &str, constraint: &str) -> Result<bool> {
        let conn = self.connection()?;
        let Some(sql) = create_statement(&conn, table)? else {
            return Ok(false);
        };
        Ok(find_named_constraint(&sql, constraint).is_some())
    }
}

impl SchemaMigrator for Database {
    fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(&format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        ))
        .map_err(|e| Error::Database(format!("failed to drop column {table}.{column}: {e}")))
    }

    /// SQLite has no `DROP CONSTRAINT`, so the table is rebuilt from its stored
    /// definition minus the named constraint clause.
    fn drop_constraint(&self, table: &str, constraint: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let sql = create_statement(&conn, table)?
            .ok_or_else(|| Error::NotFound(format!("table {table}")))?;
        let stripped = strip_named_constraint(&sql, constraint)
            .ok_or_else(|| Error::NotFound(format!("constraint {constraint} on {table}")))?;
        let companions = companion_statements(&conn, table)?;

        debug!("rebuilding {table} without constraint {constraint}");
        conn.execute_batch("PRAGMA foreign_keys=OFF;")
            .map_err(|e| Error::Database(format!("failed to disable foreign keys: {e}")))?;
        let rebuilt = rebuild_table(&mut conn, table, &stripped, &companions);
        let restored = conn.execute_batch("PRAGMA foreign_keys=ON;");

        rebuilt.map_err(|e| {
            Error::Database(format!(
                "failed to drop constraint {constraint} on {table}: {e}"
            ))
        })?;
        restored.map_err(|e| Error::Database(format!("failed to re-enable foreign keys: {e}")))
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(&format!("DROP TABLE {}", quote_ident(table)))
            .map_err(|e| Error::Database(format!("failed to drop table {table}: {e}")))
    }

    fn execute_sql(&self, sql: &str) -> Result<()> {
        self.execute_batch(sql)
    }
}

fn create_statement(conn: &Connection, table: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
        params![table],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to read schema of {table}: {e}")))
}

/// Index and trigger definitions that die with the table and must be replayed.
fn companion_statements(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT sql FROM sqlite_master
             WHERE tbl_name = ?1 AND type IN ('index', 'trigger') AND sql IS NOT NULL",
        )
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))
        .map_err(|e| Error::Database(format!("failed to list indexes of {table}: {e}")))?;

    let mut statements = Vec::new();
    for row in rows {
        let statement =
            row.map_err(|e| Error::Database(format!("failed to read index row: {e}")))?;
        statements.push(statement);
    }
    Ok(statements)
}

fn rebuild_table(
    conn: &mut Connection,
    table: &str,
    stripped_sql: &str,
    companions: &[String],
) -> rusqlite::Result<()> {
    let staging = quote_ident(&format!("{table}__rebuild"));
    let target = quote_ident(table);
    let body = body_bounds(stripped_sql)
        .map(|(open, _)| &stripped_sql[open..])
        .unwrap_or_default();

    let tx = conn.transaction()?;
    let sequence = autoincrement_sequence(&tx, table)?;
    tx.execute_batch(&format!(
        "CREATE TABLE {staging} {body};
         INSERT INTO {staging} SELECT * FROM {target};
         DROP TABLE {target};
         ALTER TABLE {staging} RENAME TO {target};"
    ))?;
    if let Some(seq) = sequence {
        restore_sequence(&tx, table, seq)?;
    }
    for statement in companions {
        tx.execute_batch(statement)?;
    }
    tx.commit()
}

/// The AUTOINCREMENT high-water mark of `table`, if it has one.
fn autoincrement_sequence(conn: &Connection, table: &str) -> rusqlite::Result<Option<i64>> {
    let tracked: bool = conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name='sqlite_sequence'",
        [],
        |row| row.get(0),
    )?;
    if !tracked {
        return Ok(None);
    }
    conn.query_row(
        "SELECT seq FROM sqlite_sequence WHERE name = ?1",
        params![table],
        |row| row.get(0),
    )
    .optional()
}

/// Copying rows only carries the sequence up to the largest surviving id, so deleted
/// ids past it would be handed out again.
fn restore_sequence(conn: &Connection, table: &str, seq: i64) -> rusqlite::Result<()> {
    let updated = conn.execute(
        "UPDATE sqlite_sequence SET seq = ?2 WHERE name = ?1",
        params![table, seq],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
            params![table, seq],
        )?;
    }
    Ok(())
}

/// Characters of `sql` outside comments, tagged with whether they sit inside quoted
/// text or a bracketed identifier. Each comment collapses to a single space.
fn lex(sql: &str) -> Vec<(usize, char, bool)> {
    let mut out = Vec::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut quote: Option<char> = None;

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            out.push((i, c, true));
            if c == q {
                quote = None;
            }
            continue;
        }
        let next = chars.peek().map(|&(_, n)| n);
        match (c, next) {
            ('-', Some('-')) => {
                for (_, n) in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
                out.push((i, ' ', false));
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for (_, n) in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                out.push((i, ' ', false));
            }
            ('\'' | '"' | '`', _) => {
                quote = Some(c);
                out.push((i, c, true));
            }
            ('[', _) => {
                quote = Some(']');
                out.push((i, c, true));
            }
            _ => out.push((i, c, false)),
        }
    }
    out
}

/// Byte offsets of the opening and matching closing parenthesis of the column list.
fn body_bounds(sql: &str) -> Option<(usize, usize)> {
    let mut depth = 0usize;
    let mut open = None;

    for (i, c, quoted) in lex(sql) {
        if quoted {
            continue;
        }
        match c {
            '(' => {
                if open.is_none() {
                    open = Some(i);
                }
                depth += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return open.map(|o| (o, i));
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas that are outside parentheses, quoted text and comments.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c, quoted) in lex(body) {
        if quoted {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&body[start..]);
    items
}

fn without_comments(item: &str) -> String {
    lex(item).into_iter().map(|(_, c, _)| c).collect()
}

fn unquote(token: &str) -> &str {
    token.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']' | '\''))
}

fn is_named_constraint(item: &str, name: &str) -> bool {
    let item = without_comments(item);
    let mut tokens = item.split_whitespace();
    let keyword = tokens.next().unwrap_or_default();
    let Some(token) = tokens.next() else {
        return false;
    };
    keyword.eq_ignore_ascii_case("constraint") && unquote(token).eq_ignore_ascii_case(name)
}

/// Index of the table-level `CONSTRAINT <name> ...` item, if present.
fn find_named_constraint(sql: &str, name: &str) -> Option<usize> {
    let (open, close) = body_bounds(sql)?;
    split_top_level(&sql[open + 1..close])
        .iter()
        .position(|item| is_named_constraint(item, name))
}

/// The `CREATE TABLE` statement with the named table constraint removed.
fn strip_named_constraint(sql: &str, name: &str) -> Option<String> {
    let (open, close) = body_bounds(sql)?;
    let items = split_top_level(&sql[open + 1..close]);
    let index = items
        .iter()
        .position(|item| is_named_constraint(item, name))?;

    let kept: Vec<&str> = items
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, item)| *item)
        .collect();

    Some(format!("{}{}{}", &sql[..=open], kept.join(","), &sql[close..]))
}
