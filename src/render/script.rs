//! Migration script files
//!
//! A script is a plain SQL file: a comment header describing where it sits in
//! the snapshot chain, then one commented section per operation.

use super::{Dialect, RenderedOperation};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHeader {
    pub name: String,
    pub description: String,
    pub sequence: i64,
    /// Hash of the snapshot this migration starts from.
    pub parent: Option<String>,
    /// Hash of the snapshot this migration produces.
    pub snapshot: String,
    pub dialect: Dialect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    pub header: ScriptHeader,
    pub sections: Vec<RenderedOperation>,
}

impl MigrationScript {
    pub fn new(header: ScriptHeader, sections: Vec<RenderedOperation>) -> Self {
        Self { header, sections }
    }

    /// All statements in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .flat_map(|s| s.statements.iter().map(String::as_str))
    }

    pub fn to_sql(&self) -> String {
        let header = &self.header;
        let mut sql = String::new();
        let _ = writeln!(sql, "-- Migration: {}", header.name);
        write_comment(&mut sql, "-- Description: ", "--   ", &header.description);
        let _ = writeln!(sql, "-- Sequence: {}", header.sequence);
        let _ = writeln!(
            sql,
            "-- Parent snapshot: {}",
            header.parent.as_deref().unwrap_or("(none)")
        );
        let _ = writeln!(sql, "-- Snapshot: {}", header.snapshot);
        let _ = writeln!(sql, "-- Dialect: {}", header.dialect);
        sql.push_str("--\n-- Operations:\n");
        for section in &self.sections {
            let marker = if section.destructive { "  [destructive]" } else { "" };
            let line = format!("{}{marker}", section.description);
            write_comment(&mut sql, "--   ", "--     ", &line);
        }

        for section in &self.sections {
            sql.push('\n');
            write_comment(&mut sql, "-- ", "-- ", &section.description);
            for statement in &section.statements {
                let _ = writeln!(sql, "{statement};");
            }
        }
        sql
    }

    /// Whether any statement in the script discards data.
    pub fn is_destructive(&self) -> bool {
        self.sections.iter().any(|s| s.destructive)
    }
}

/// Write `text` as `--` comment lines, one per line of input.
fn write_comment(sql: &mut String, first: &str, rest: &str, text: &str) {
    let text = text.replace("\r\n", "\n");
    let mut lines = text.split(['\n', '\r']);
    let _ = writeln!(sql, "{first}{}", lines.next().unwrap_or_default());
    for line in lines {
        let _ = writeln!(sql, "{rest}{line}");
    }
}

/// Split SQL text into statements on `;`.
///
/// Semicolons inside quoted strings, quoted identifiers and comments do not
/// end a statement. Comments are removed from the output.
pub fn split_statements(sql: &str) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Normal,
        Quoted(char),
        LineComment,
        BlockComment,
    }

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                '\'' | '"' | '`' => {
                    state = State::Quoted(c);
                    current.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                ';' => {
                    push_statement(&mut statements, &mut current);
                }
                _ => current.push(c),
            },
            State::Quoted(quote) => {
                current.push(c);
                // A doubled quote is an escaped quote and keeps us inside.
                if c == quote {
                    if chars.peek() == Some(&quote) {
                        current.push(quote);
                        chars.next();
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if c == '\n' {
                    current.push('\n');
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    current.push(' ');
                    state = State::Normal;
                }
            }
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}
