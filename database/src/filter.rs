//! Renders a policy [`Alteration`] into SQL.
//!
//! Identifiers are validated and quoted; every literal becomes a bound
//! parameter. The rendered joins go after `FROM <table>` and the predicate
//! into the `WHERE` clause of a `SELECT DISTINCT`.

use authz::{Alteration, BoolExpr, Collection, ColumnRef, JoinSpec, SqlValue};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;

use crate::{DatabaseError, Result};

/// SQL fragments produced from an alteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedAlteration {
    /// `LEFT OUTER JOIN ...` clauses, space separated. Empty when there are none.
    pub joins: String,
    /// Boolean predicate for the `WHERE` clause.
    pub predicate: String,
    /// Values for the `?` placeholders in `predicate`, in order.
    pub binds: Vec<SqlValue>,
}

/// Quotes an identifier after checking it is a plain `[A-Za-z_][A-Za-z0-9_]*` name.
pub fn quote_identifier(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        return Err(DatabaseError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}

/// Renders `alteration` against `collection`.
///
/// Identical joins are emitted once; combinators may repeat the same join
/// when several operands need it.
pub fn render(alteration: &Alteration, collection: &Collection) -> Result<RenderedAlteration> {
    let table = quote_identifier(&collection.table)?;

    let mut unique_joins: Vec<&JoinSpec> = Vec::new();
    for join in &alteration.joins {
        if !unique_joins.contains(&join) {
            unique_joins.push(join);
        }
    }

    let mut joins = Vec::with_capacity(unique_joins.len());
    for join in unique_joins {
        let alias = quote_identifier(&join.alias)?;
        joins.push(format!(
            "LEFT OUTER JOIN {} AS {} ON {}.{} = {}.{}",
            quote_identifier(&join.table)?,
            alias,
            alias,
            quote_identifier(&join.right_column)?,
            table,
            quote_identifier(&join.left_column)?,
        ));
    }

    let mut binds = Vec::new();
    let predicate = render_expr(&alteration.filter, &table, &mut binds)?;

    Ok(RenderedAlteration {
        joins: joins.join(" "),
        predicate,
        binds,
    })
}

fn render_column(column: &ColumnRef, table: &str) -> Result<String> {
    match column {
        ColumnRef::Record(name) => Ok(format!("{}.{}", table, quote_identifier(name)?)),
        ColumnRef::Joined { alias, column } => Ok(format!(
            "{}.{}",
            quote_identifier(alias)?,
            quote_identifier(column)?
        )),
    }
}

fn render_expr(expr: &BoolExpr, table: &str, binds: &mut Vec<SqlValue>) -> Result<String> {
    match expr {
        BoolExpr::Const(true) => Ok("1 = 1".to_string()),
        BoolExpr::Const(false) => Ok("1 = 0".to_string()),
        BoolExpr::Eq(column, value) => {
            binds.push(value.clone());
            Ok(format!("{} = ?", render_column(column, table)?))
        }
        BoolExpr::In(_, values) if values.is_empty() => Ok("1 = 0".to_string()),
        BoolExpr::In(column, values) => {
            binds.extend(values.iter().cloned());
            let placeholders = vec!["?"; values.len()].join(", ");
            Ok(format!("{} IN ({})", render_column(column, table)?, placeholders))
        }
        BoolExpr::And(children) => render_group(children, " AND ", "1 = 1", table, binds),
        BoolExpr::Or(children) => render_group(children, " OR ", "1 = 0", table, binds),
    }
}

fn render_group(
    children: &[BoolExpr],
    separator: &str,
    empty: &str,
    table: &str,
    binds: &mut Vec<SqlValue>,
) -> Result<String> {
    if children.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = children
        .iter()
        .map(|child| render_expr(child, table, binds))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("({})", parts.join(separator)))
}

/// Binds rendered values onto a query in placeholder order.
pub fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &[SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Integer(i) => query.bind(*i),
            SqlValue::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use authz::{Operation, Policy, Principal, Role};

    fn notes() -> Collection {
        Collection::new("records_notes")
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("owner_id").unwrap(), "\"owner_id\"");
        assert!(quote_identifier("").is_err());
        assert!(quote_identifier("1abc").is_err());
        assert!(quote_identifier("notes; DROP TABLE users").is_err());
        assert!(quote_identifier("a\"b").is_err());
    }

    #[test]
    fn test_render_unrestricted() {
        let rendered = render(&Alteration::unrestricted(), &notes()).unwrap();
        assert_eq!(rendered.joins, "");
        assert_eq!(rendered.predicate, "1 = 1");
        assert!(rendered.binds.is_empty());
    }

    #[test]
    fn test_render_owner_or_acl() {
        let principal = Principal::user(4, vec![Role::new(2, "user"), Role::new(5, "editor")]);
        let policy = Policy::or(vec![Policy::IsOwner, Policy::InRecordAcl]).unwrap();
        let alteration = policy.evaluate(Operation::Read, &principal, "notes", &notes());

        let rendered = render(&alteration, &notes()).unwrap();
        assert_eq!(
            rendered.joins,
            "LEFT OUTER JOIN \"record_acl\" AS \"acl\" ON \"acl\".\"record_id\" = \"records_notes\".\"id\""
        );
        assert_eq!(
            rendered.predicate,
            "(\"records_notes\".\"owner_id\" = ? OR (\"acl\".\"role_id\" IN (?, ?) AND \"acl\".\"record_type\" = ? AND \"acl\".\"permission\" = ?))"
        );
        assert_eq!(
            rendered.binds,
            vec![
                SqlValue::Integer(4),
                SqlValue::Integer(2),
                SqlValue::Integer(5),
                SqlValue::Text("notes".into()),
                SqlValue::Text("read".into()),
            ]
        );
    }

    #[test]
    fn test_identical_joins_rendered_once() {
        let principal = Principal::user(4, vec![Role::new(2, "user")]);
        let policy = Policy::or(vec![Policy::InRecordAcl, Policy::InRecordAcl]).unwrap();
        let alteration = policy.evaluate(Operation::Update, &principal, "notes", &notes());
        assert_eq!(alteration.joins.len(), 2);

        let rendered = render(&alteration, &notes()).unwrap();
        assert_eq!(rendered.joins.matches("LEFT OUTER JOIN").count(), 1);
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let alteration = Alteration {
            joins: vec![],
            filter: BoolExpr::In(ColumnRef::Record("id".into()), vec![]),
        };
        let rendered = render(&alteration, &notes()).unwrap();
        assert_eq!(rendered.predicate, "1 = 0");
    }

    #[test]
    fn test_invalid_collection_rejected() {
        let err = render(&Alteration::unrestricted(), &Collection::new("notes x")).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidIdentifier(_)));
    }
}
