use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::model::Ms;

/// Parsed command from one line of SQL.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// Signed so a negative count reaches the engine and is rejected there.
    InitializeSlots {
        count: i64,
    },
    Arrive {
        plate: String,
        requested_at: Option<Ms>,
    },
    Depart {
        plate: String,
    },
    SelectStatus,
    SelectSlots,
    SelectQueue,
    SelectSessions {
        plate: Option<String>,
    },
    SelectVehicle {
        plate: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("more than one statement".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "slots" => match bind_columns(insert, "slots", &["count"], &values)?.as_slice() {
            [Some(count)] => Ok(Command::InitializeSlots {
                count: parse_i64_expr(count)?,
            }),
            _ => Err(SqlError::MissingColumn("count")),
        },
        "arrivals" => {
            match bind_columns(insert, "arrivals", &["plate", "requested_at"], &values)?.as_slice() {
                [Some(plate), requested_at] => Ok(Command::Arrive {
                    plate: parse_plate(plate)?,
                    requested_at: requested_at.map(parse_i64_or_null).transpose()?.flatten(),
                }),
                _ => Err(SqlError::MissingColumn("plate")),
            }
        }
        "departures" => match bind_columns(insert, "departures", &["plate"], &values)?.as_slice() {
            [Some(plate)] => Ok(Command::Depart {
                plate: parse_plate(plate)?,
            }),
            _ => Err(SqlError::MissingColumn("plate")),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "sessions" {
        return Err(SqlError::UnknownTable(table));
    }
    let plate = extract_where_plate(&delete.selection)?.ok_or(SqlError::MissingFilter("plate"))?;
    Ok(Command::Depart { plate })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let plate = extract_where_plate(&select.selection)?;

    match table.as_str() {
        "status" => Ok(Command::SelectStatus),
        "slots" => Ok(Command::SelectSlots),
        "queue" => Ok(Command::SelectQueue),
        "sessions" => Ok(Command::SelectSessions { plate }),
        "vehicles" => Ok(Command::SelectVehicle {
            plate: plate.ok_or(SqlError::MissingFilter("plate"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// The single VALUES row of an INSERT.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row VALUES".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Line the VALUES row up with `expected`. With a column list, values go to
/// the named columns; without one they are taken in `expected` order.
fn bind_columns<'a>(
    insert: &ast::Insert,
    table: &'static str,
    expected: &[&'static str],
    values: &'a [Expr],
) -> Result<Vec<Option<&'a Expr>>, SqlError> {
    let mut bound = vec![None; expected.len()];
    if insert.columns.is_empty() {
        if values.len() > expected.len() {
            return Err(SqlError::WrongArity(table, expected.len(), values.len()));
        }
        for (slot, value) in bound.iter_mut().zip(values) {
            *slot = Some(value);
        }
        return Ok(bound);
    }

    if insert.columns.len() != values.len() {
        return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
    }
    for (column, value) in insert.columns.iter().zip(values) {
        let name = column.value.to_lowercase();
        let idx = expected
            .iter()
            .position(|e| *e == name)
            .ok_or_else(|| SqlError::UnknownColumn(table, name.clone()))?;
        if bound[idx].replace(value).is_some() {
            return Err(SqlError::Parse(format!("column {name} given twice")));
        }
    }
    Ok(bound)
}

/// `WHERE plate = '...'`, or nothing. Any other filter is rejected.
fn extract_where_plate(selection: &Option<Expr>) -> Result<Option<String>, SqlError> {
    let Some(sel) = selection else {
        return Ok(None);
    };
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("plate") => Ok(Some(parse_plate(right)?)),
        Expr::Nested(inner) => extract_where_plate(&Some(inner.as_ref().clone())),
        _ => Err(SqlError::Unsupported(format!("filter {sel}"))),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_plate(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected plate string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64_expr(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("integer out of range".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_i64_expr(expr)?)),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("{0} has no column {1}")]
    UnknownColumn(&'static str, String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
}

impl SqlError {
    pub fn code(&self) -> &'static str {
        "syntax_error"
    }
}
