use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    CreateResource {
        id: Ulid,
        name: Option<String>,
        category: Option<String>,
        capacity: u32,
        certification: Option<String>,
    },
    UpdateResource {
        id: Ulid,
        name: Option<String>,
        capacity: Option<u32>,
        status: Option<String>,
        certification: Option<String>,
    },
    DeleteResource {
        id: Ulid,
    },
    AddHours {
        id: Ulid,
        resource_id: Ulid,
        weekday: String,
        start: String,
        end: String,
    },
    RemoveHours {
        id: Ulid,
    },
    RequestBooking {
        id: Ulid,
        resource_id: Ulid,
        date: String,
        start: String,
        end: String,
        purpose: Option<String>,
    },
    EditBooking {
        id: Ulid,
        version: u64,
        date: Option<String>,
        start: Option<String>,
        end: Option<String>,
        purpose: Option<String>,
    },
    SetBookingStatus {
        id: Ulid,
        version: u64,
        status: String,
    },
    CancelBooking {
        id: Ulid,
        version: u64,
    },
    CreateSeries {
        id: Ulid,
        resource_id: Ulid,
        frequency: String,
        by_weekday: Option<String>,
        interval: u32,
        start_date: String,
        until: Option<String>,
        count: Option<u32>,
        start: String,
        end: String,
        purpose: Option<String>,
    },
    SetSeriesStatus {
        id: Ulid,
        status: String,
    },
    SelectResources,
    SelectHours {
        resource_id: Ulid,
    },
    SelectBookings {
        resource_id: Ulid,
        date: Option<String>,
        status: Option<String>,
    },
    SelectSeries {
        resource_id: Option<Ulid>,
    },
    SelectSkips {
        series_id: Ulid,
    },
    SelectAvailability {
        resource_id: Ulid,
        date: String,
        min_duration: Option<i64>,
    },
    SelectConflicts {
        resource_id: Ulid,
        date: String,
        start: String,
        end: String,
    },
    SelectAudit {
        entity: Option<Ulid>,
    },
    Undo {
        key: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    // UNDO is not SQL; handle it as a prefix statement.
    if trimmed.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("UNDO ")) {
        let key = trimmed[5..].trim().trim_matches(';').trim().trim_matches('\'').to_string();
        if key.is_empty() {
            return Err(SqlError::Parse("UNDO requires a key".into()));
        }
        return Ok(Command::Undo { key });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(table, assignments, selection)
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "resources" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("resources", 1, 0));
            }
            let id = parse_ulid(&values[0])?;
            let name = opt(&values, 1).map(parse_string_or_null).transpose()?.flatten();
            let category = opt(&values, 2).map(parse_string_or_null).transpose()?.flatten();
            let capacity = match opt(&values, 3) {
                Some(expr) => parse_u32(expr)?,
                None => 1,
            };
            let certification = opt(&values, 4).map(parse_string_or_null).transpose()?.flatten();
            Ok(Command::CreateResource { id, name, category, capacity, certification })
        }
        "hours" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("hours", 5, values.len()));
            }
            Ok(Command::AddHours {
                id: parse_ulid(&values[0])?,
                resource_id: parse_ulid(&values[1])?,
                weekday: parse_string(&values[2])?,
                start: parse_string(&values[3])?,
                end: parse_string(&values[4])?,
            })
        }
        "bookings" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("bookings", 5, values.len()));
            }
            Ok(Command::RequestBooking {
                id: parse_ulid(&values[0])?,
                resource_id: parse_ulid(&values[1])?,
                date: parse_string(&values[2])?,
                start: parse_string(&values[3])?,
                end: parse_string(&values[4])?,
                purpose: opt(&values, 5).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "series" => {
            if values.len() < 10 {
                return Err(SqlError::WrongArity("series", 10, values.len()));
            }
            Ok(Command::CreateSeries {
                id: parse_ulid(&values[0])?,
                resource_id: parse_ulid(&values[1])?,
                frequency: parse_string(&values[2])?,
                by_weekday: parse_string_or_null(&values[3])?,
                interval: parse_u32(&values[4])?,
                start_date: parse_string(&values[5])?,
                until: parse_string_or_null(&values[6])?,
                count: parse_u32_or_null(&values[7])?,
                start: parse_string(&values[8])?,
                end: parse_string(&values[9])?,
                purpose: opt(&values, 10).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let mut sets: Vec<(String, &Expr)> = Vec::new();
    for assignment in assignments {
        let col = assignment_column(assignment)
            .ok_or_else(|| SqlError::Parse("unsupported assignment target".into()))?;
        sets.push((col, &assignment.value));
    }
    let filters = extract_filters(selection)?;

    match table.as_str() {
        "resources" => {
            let id = require_ulid(&filters, "id")?;
            let mut cmd = Command::UpdateResource {
                id,
                name: None,
                capacity: None,
                status: None,
                certification: None,
            };
            let Command::UpdateResource { name, capacity, status, certification, .. } = &mut cmd
            else {
                unreachable!()
            };
            for (col, expr) in &sets {
                match col.as_str() {
                    "name" => *name = Some(parse_string(expr)?),
                    "capacity" => *capacity = Some(parse_u32(expr)?),
                    "status" => *status = Some(parse_string(expr)?),
                    "certification" => *certification = Some(parse_string(expr)?),
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(cmd)
        }
        "bookings" => {
            let id = require_ulid(&filters, "id")?;
            let version = require_u64(&filters, "version")?;
            let has_status = sets.iter().any(|(c, _)| c == "status");
            if has_status {
                if sets.len() > 1 {
                    return Err(SqlError::Unsupported(
                        "status cannot be combined with other columns".into(),
                    ));
                }
                let status = parse_string(sets[0].1)?;
                return Ok(Command::SetBookingStatus { id, version, status });
            }
            let (mut date, mut start, mut end, mut purpose) = (None, None, None, None);
            for (col, expr) in &sets {
                match col.as_str() {
                    "date" => date = Some(parse_string(expr)?),
                    "start" => start = Some(parse_string(expr)?),
                    "end" => end = Some(parse_string(expr)?),
                    "purpose" => purpose = Some(parse_string(expr)?),
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(Command::EditBooking { id, version, date, start, end, purpose })
        }
        "series" => {
            let id = require_ulid(&filters, "id")?;
            if sets.len() != 1 || sets[0].0 != "status" {
                return Err(SqlError::Unsupported("series updates only set status".into()));
            }
            let status = parse_string(sets[0].1)?;
            Ok(Command::SetSeriesStatus { id, status })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = extract_filters(&delete.selection)?;

    match table.as_str() {
        "resources" => Ok(Command::DeleteResource { id: require_ulid(&filters, "id")? }),
        "hours" => Ok(Command::RemoveHours { id: require_ulid(&filters, "id")? }),
        "bookings" => Ok(Command::CancelBooking {
            id: require_ulid(&filters, "id")?,
            version: require_u64(&filters, "version")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = extract_filters(&select.selection)?;

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "hours" => Ok(Command::SelectHours { resource_id: require_ulid(&filters, "resource_id")? }),
        "bookings" => Ok(Command::SelectBookings {
            resource_id: require_ulid(&filters, "resource_id")?,
            date: filter_string(&filters, "date")?,
            status: filter_string(&filters, "status")?,
        }),
        "series" => Ok(Command::SelectSeries {
            resource_id: filter_ulid(&filters, "resource_id")?,
        }),
        "skips" => Ok(Command::SelectSkips { series_id: require_ulid(&filters, "series_id")? }),
        "availability" => Ok(Command::SelectAvailability {
            resource_id: require_ulid(&filters, "resource_id")?,
            date: filter_string(&filters, "date")?
                .ok_or(SqlError::MissingFilter("date"))?,
            min_duration: filter_i64(&filters, "min_duration")?,
        }),
        "conflicts" => Ok(Command::SelectConflicts {
            resource_id: require_ulid(&filters, "resource_id")?,
            date: filter_string(&filters, "date")?.ok_or(SqlError::MissingFilter("date"))?,
            start: filter_string(&filters, "start")?.ok_or(SqlError::MissingFilter("start"))?,
            end: filter_string(&filters, "end")?.ok_or(SqlError::MissingFilter("end"))?,
        }),
        "audit" => Ok(Command::SelectAudit { entity: filter_ulid(&filters, "entity")? }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE handling ────────────────────────────────────────────

/// Flatten a conjunction of `column = value` terms.
fn extract_filters(selection: &Option<Expr>) -> Result<Vec<(String, &Expr)>, SqlError> {
    let mut filters = Vec::new();
    if let Some(expr) = selection {
        collect_eq_filters(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_eq_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse("filter column expected on the left".into()))?;
            out.push((col, right));
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter expression: {other}"))),
    }
}

fn find<'a>(filters: &[(String, &'a Expr)], name: &str) -> Option<&'a Expr> {
    filters.iter().find(|(col, _)| col == name).map(|(_, expr)| *expr)
}

fn require_ulid(filters: &[(String, &Expr)], name: &'static str) -> Result<Ulid, SqlError> {
    parse_ulid_expr(find(filters, name).ok_or(SqlError::MissingFilter(name))?)
}

fn require_u64(filters: &[(String, &Expr)], name: &'static str) -> Result<u64, SqlError> {
    let v = parse_i64_expr(find(filters, name).ok_or(SqlError::MissingFilter(name))?)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{name} out of range")))
}

fn filter_ulid(filters: &[(String, &Expr)], name: &str) -> Result<Option<Ulid>, SqlError> {
    find(filters, name).map(parse_ulid_expr).transpose()
}

fn filter_string(filters: &[(String, &Expr)], name: &str) -> Result<Option<String>, SqlError> {
    find(filters, name).map(parse_string).transpose()
}

fn filter_i64(filters: &[(String, &Expr)], name: &str) -> Result<Option<i64>, SqlError> {
    find(filters, name).map(parse_i64_expr).transpose()
}

// ── AST helpers ───────────────────────────────────────────────

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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn assignment_column(assignment: &ast::Assignment) -> Option<String> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn opt<'a>(values: &'a [Expr], index: usize) -> Option<&'a Expr> {
    values.get(index)
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    Ok(Some(parse_u32(expr)?))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            Value::Number(s, _) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    Ok(Some(parse_string(expr)?))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
