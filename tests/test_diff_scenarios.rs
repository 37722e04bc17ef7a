//! End-to-end diff scenarios through the public API: diff, verify with
//! `apply`, render.

use tidemark::schema::{Column, ColumnType, ConstraintKind, Index, Schema, Table};
use tidemark::{apply, canonicalize, diff, render, validate, Dialect, Operation};

fn users() -> Table {
    Table::new("users")
        .column(Column::new("id", ColumnType::Integer).not_null())
        .column(Column::new("name", ColumnType::Varchar { length: 50 }).not_null())
        .column(Column::new("email", ColumnType::Varchar { length: 50 }))
        .primary_key(["id"])
        .unique(["email"])
}

fn assert_reaches(old: &Schema, new: &Schema, operations: &[Operation]) {
    let applied = apply(&canonicalize(old), operations).unwrap();
    assert!(applied.structurally_eq(&canonicalize(new)));
}

#[test]
fn test_create_users_from_empty() {
    let new = Schema::new().table(users());
    let result = diff(&Schema::new(), &new);

    assert_eq!(result.operations.len(), 1);
    let Operation::CreateTable { table } = &result.operations[0] else {
        panic!("expected CreateTable, got {}", result.operations[0]);
    };
    assert_eq!(table.columns.len(), 3);
    let unique = table
        .constraints
        .iter()
        .filter(|c| matches!(c.kind, ConstraintKind::Unique { .. }))
        .count();
    assert_eq!(unique, 1);

    let rendered = render(&result.operations, Dialect::Postgres).unwrap();
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].statements.len(), 1);
    assert!(rendered[0].statements[0].starts_with("CREATE TABLE \"users\" ("));
    assert_reaches(&Schema::new(), &new, &result.operations);
}

#[test]
fn test_add_nullable_column() {
    let old = Schema::new().table(users());
    let new = Schema::new().table(users().column(Column::new("age", ColumnType::Integer)));
    let result = diff(&old, &new);

    assert_eq!(result.operations.len(), 1);
    match &result.operations[0] {
        Operation::AddColumn { table, column } => {
            assert_eq!(table, "users");
            assert_eq!(column.name, "age");
            assert!(column.nullable);
        }
        other => panic!("expected AddColumn, got {other}"),
    }

    let rendered = render(&result.operations, Dialect::Postgres).unwrap();
    assert_eq!(
        rendered[0].statements,
        ["ALTER TABLE \"users\" ADD COLUMN \"age\" INTEGER"]
    );
    assert_reaches(&old, &new, &result.operations);
}

#[test]
fn test_rename_users_to_accounts() {
    let old = Schema::new().table(users());
    let mut accounts = users();
    accounts.name = "accounts".to_string();
    let new = Schema::new().table(accounts);
    let result = diff(&old, &new);

    assert_eq!(result.operations.len(), 1);
    assert!(matches!(
        &result.operations[0],
        Operation::RenameTable { from, to, .. } if from == "users" && to == "accounts"
    ));
    assert!(result.warnings.is_empty());
    assert_reaches(&old, &new, &result.operations);
}

#[test]
fn test_declaration_order_does_not_matter() {
    let shuffled = Table::new("users")
        .unique(["email"])
        .column(Column::new("email", ColumnType::Varchar { length: 50 }))
        .primary_key(["id"])
        .column(Column::new("id", ColumnType::Integer).not_null())
        .column(Column::new("name", ColumnType::Varchar { length: 50 }).not_null());

    let result = diff(
        &Schema::new().table(users()),
        &Schema::new().table(shuffled),
    );
    assert!(result.is_empty(), "{:?}", result.operations);
}

#[test]
fn test_same_schema_twice_is_empty() {
    let schema = Schema::new().table(users());
    assert!(diff(&schema, &schema).is_empty());
    assert_eq!(canonicalize(&canonicalize(&schema)), canonicalize(&schema));
}

#[test]
fn test_foreign_keys_render_after_their_targets() {
    let posts = Table::new("posts")
        .column(Column::new("id", ColumnType::Integer).not_null())
        .column(Column::new("author_id", ColumnType::Integer).not_null())
        .primary_key(["id"])
        .foreign_key(["author_id"], "users", ["id"]);
    let new = Schema::new().table(posts).table(users());

    let result = diff(&Schema::new(), &new);
    let rendered = render(&result.operations, Dialect::MySql).unwrap();
    let statements: Vec<&str> = rendered
        .iter()
        .flat_map(|r| r.statements.iter().map(String::as_str))
        .collect();

    let users_at = statements
        .iter()
        .position(|s| s.starts_with("CREATE TABLE `users`"))
        .unwrap();
    let posts_at = statements
        .iter()
        .position(|s| s.starts_with("CREATE TABLE `posts`"))
        .unwrap();
    assert!(users_at < posts_at);
    assert_reaches(&Schema::new(), &new, &result.operations);
}

/// Xorshift generator so every generated case is reproducible from its seed.
struct Seeded(u64);

impl Seeded {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }

    fn percent(&mut self, p: u64) -> bool {
        self.next() % 100 < p
    }
}

const TABLES: [&str; 5] = ["accounts", "items", "notes", "orders", "tags"];

fn random_type(rng: &mut Seeded) -> ColumnType {
    match rng.below(4) {
        0 => ColumnType::Integer,
        1 => ColumnType::Text,
        2 => ColumnType::Boolean,
        _ => ColumnType::Varchar {
            length: [20, 40][rng.below(2)],
        },
    }
}

/// A valid schema over a small pool of names, so two draws overlap enough to
/// produce adds, drops, alterations, renames and foreign keys between them.
fn random_schema(rng: &mut Seeded) -> Schema {
    let mut tables = Vec::new();
    let mut keyed_code = Vec::new();
    for name in TABLES {
        if !rng.percent(60) {
            continue;
        }
        let mut table = Table::new(name)
            .column(Column::new("id", ColumnType::Integer).not_null())
            .primary_key(["id"]);
        for column in ["title", "score", "flag"] {
            if rng.percent(50) {
                let ty = random_type(rng);
                table = table.column(Column::new(column, ty).nullable(rng.percent(50)));
            }
        }
        if table.has_column("title") && rng.percent(30) {
            table = table.index(Index::new(["title"]));
        }
        if rng.percent(50) {
            table = table.column(Column::new("code", ColumnType::Text).not_null());
            match rng.below(4) {
                0 | 1 => {
                    table = table.unique(["code"]);
                    keyed_code.push(name);
                }
                2 => {
                    table = table.index(Index::new(["code"]).unique());
                    keyed_code.push(name);
                }
                _ => {}
            }
        }
        tables.push(table);
    }

    let present: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
    let tables = tables.into_iter().map(|mut table| {
        let own_name = table.name.clone();
        for target in present.iter().filter(|t| **t != own_name) {
            if rng.percent(20) {
                let column = format!("{target}_ref");
                table = table
                    .column(Column::new(column.as_str(), ColumnType::Integer))
                    .foreign_key([column], target, ["id"]);
            }
            if keyed_code.contains(&target.as_str()) && rng.percent(20) {
                let column = format!("{target}_code");
                table = table
                    .column(Column::new(column.as_str(), ColumnType::Text))
                    .foreign_key([column], target, ["code"]);
            }
        }
        table
    });
    tables.fold(Schema::new(), Schema::table)
}

#[test]
fn test_generated_schemas_round_trip() {
    for seed in 1..=400_u64 {
        let mut rng = Seeded(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let old = random_schema(&mut rng);
        let new = random_schema(&mut rng);
        assert!(validate(&old).is_ok(), "seed {seed}: {old:#?}");
        assert!(validate(&new).is_ok(), "seed {seed}: {new:#?}");

        assert_eq!(canonicalize(&canonicalize(&new)), canonicalize(&new), "seed {seed}");
        assert!(diff(&new, &new).is_empty(), "seed {seed}");

        let result = diff(&old, &new);
        let applied = apply(&canonicalize(&old), &result.operations)
            .unwrap_or_else(|e| panic!("seed {seed}: {e}\n{:#?}", result.operations));
        assert!(
            applied.structurally_eq(&new),
            "seed {seed}: {:#?}",
            result.operations
        );
        assert!(render(&result.operations, Dialect::Postgres).is_ok(), "seed {seed}");
    }
}
