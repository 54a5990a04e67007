use chrono::NaiveDate;
use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SelectItem, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::notify::field_channel;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertField {
        id: Ulid,
        name: String,
        price: Price,
        open_time: Minute,
        close_time: Minute,
        session_minutes: Option<Minute>,
    },
    DeactivateField {
        id: Ulid,
    },
    SelectFields,
    ReserveSlots {
        field_id: Ulid,
        user_id: String,
        date: NaiveDate,
        slots: Vec<Minute>,
    },
    ManualBooking {
        field_id: Ulid,
        date: NaiveDate,
        slots: Vec<Minute>,
        manual_name: String,
        manual_contact: String,
    },
    CancelBooking {
        id: Ulid,
    },
    CreatePaymentSession {
        booking_id: Ulid,
    },
    AttachPaymentToken {
        booking_id: Ulid,
        token: String,
    },
    PaymentNotification {
        payload: String,
    },
    SelectBookings {
        filter: BookingFilter,
        page: Page,
    },
    CountBookings {
        filter: BookingFilter,
    },
    SelectAvailability {
        field_id: Ulid,
        date: NaiveDate,
    },
    SelectRevenue {
        from: NaiveDate,
        to: NaiveDate,
        field_id: Option<Ulid>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(cmd) = parse_listen(trimmed) {
        return cmd;
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// `LISTEN ch`, `UNLISTEN ch` and `UNLISTEN *`; sqlparser has no notion of these.
fn parse_listen(sql: &str) -> Option<Result<Command, SqlError>> {
    let (keyword, rest) = sql.split_once(char::is_whitespace).unwrap_or((sql, ""));
    let rest = rest.trim();
    if keyword.eq_ignore_ascii_case("LISTEN") {
        Some(channel_name(rest).map(|channel| Command::Listen { channel }))
    } else if keyword.eq_ignore_ascii_case("UNLISTEN") {
        if rest == "*" {
            Some(Ok(Command::UnlistenAll))
        } else {
            Some(channel_name(rest).map(|channel| Command::Unlisten { channel }))
        }
    } else {
        None
    }
}

/// Channel names are case-preserving; field channels are normalized to the
/// canonical ULID spelling so `field_01h...` and `field_01H...` are the same channel.
fn channel_name(raw: &str) -> Result<String, SqlError> {
    let name = raw.trim_matches('"');
    if name.is_empty() {
        return Err(SqlError::Parse("missing channel name".into()));
    }
    match name.strip_prefix("field_").map(Ulid::from_string) {
        Some(Ok(id)) => Ok(field_channel(id)),
        _ => Ok(name.to_string()),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let need = |n: usize, what: &'static str| {
        if values.len() < n {
            Err(SqlError::WrongArity(what, n, values.len()))
        } else {
            Ok(())
        }
    };

    match table.as_str() {
        "fields" => {
            need(5, "fields")?;
            let session_minutes = match values.get(5) {
                Some(expr) if !is_null(expr) => Some(parse_minute(expr)?),
                _ => None,
            };
            Ok(Command::InsertField {
                id: parse_ulid_expr(&values[0])?,
                name: parse_string(&values[1])?,
                price: parse_i64_expr(&values[2])?,
                open_time: parse_minute(&values[3])?,
                close_time: parse_minute(&values[4])?,
                session_minutes,
            })
        }
        "bookings" => {
            need(4, "bookings")?;
            Ok(Command::ReserveSlots {
                field_id: parse_ulid_expr(&values[0])?,
                user_id: parse_string(&values[1])?,
                date: parse_date(&values[2])?,
                slots: parse_slots(&values[3])?,
            })
        }
        "manual_bookings" => {
            need(5, "manual_bookings")?;
            Ok(Command::ManualBooking {
                field_id: parse_ulid_expr(&values[0])?,
                date: parse_date(&values[1])?,
                slots: parse_slots(&values[2])?,
                manual_name: parse_string(&values[3])?,
                manual_contact: parse_string(&values[4])?,
            })
        }
        "payment_sessions" => {
            need(1, "payment_sessions")?;
            Ok(Command::CreatePaymentSession {
                booking_id: parse_ulid_expr(&values[0])?,
            })
        }
        "payment_tokens" => {
            need(2, "payment_tokens")?;
            Ok(Command::AttachPaymentToken {
                booking_id: parse_ulid_expr(&values[0])?,
                token: parse_string(&values[1])?,
            })
        }
        "payment_notifications" => {
            need(1, "payment_notifications")?;
            Ok(Command::PaymentNotification {
                payload: parse_string(&values[0])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "fields" => Ok(Command::DeactivateField { id }),
        "bookings" => Ok(Command::CancelBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
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

    let mut conds = Vec::new();
    if let Some(selection) = &select.selection {
        collect_conditions(selection, &mut conds)?;
    }

    match table.as_str() {
        "fields" => Ok(Command::SelectFields),
        "bookings" => {
            let (filter, page) = booking_filter(&conds)?;
            if is_count(&select.projection) {
                Ok(Command::CountBookings { filter })
            } else {
                Ok(Command::SelectBookings { filter, page })
            }
        }
        "availability" => {
            let mut field_id = None;
            let mut date = None;
            for (col, op, expr) in &conds {
                match (col.as_str(), op) {
                    ("field_id", BinaryOperator::Eq) => field_id = Some(parse_ulid_expr(expr)?),
                    ("booking_date" | "date", BinaryOperator::Eq) => date = Some(parse_date(expr)?),
                    _ => return Err(SqlError::Unsupported(format!("filter on {col}"))),
                }
            }
            Ok(Command::SelectAvailability {
                field_id: field_id.ok_or(SqlError::MissingFilter("field_id"))?,
                date: date.ok_or(SqlError::MissingFilter("booking_date"))?,
            })
        }
        "revenue" => {
            let (mut from, mut to, mut field_id) = (None, None, None);
            for (col, op, expr) in &conds {
                match (col.as_str(), op) {
                    ("paid_on", BinaryOperator::GtEq) => from = Some(parse_date(expr)?),
                    ("paid_on", BinaryOperator::LtEq) => to = Some(parse_date(expr)?),
                    ("paid_on", BinaryOperator::Eq) => {
                        let day = parse_date(expr)?;
                        from = Some(day);
                        to = Some(day);
                    }
                    ("field_id", BinaryOperator::Eq) => field_id = Some(parse_ulid_expr(expr)?),
                    _ => return Err(SqlError::Unsupported(format!("filter on {col}"))),
                }
            }
            Ok(Command::SelectRevenue {
                from: from.ok_or(SqlError::MissingFilter("paid_on >="))?,
                to: to.ok_or(SqlError::MissingFilter("paid_on <="))?,
                field_id,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn booking_filter(conds: &[(String, BinaryOperator, Expr)]) -> Result<(BookingFilter, Page), SqlError> {
    let mut filter = BookingFilter::default();
    let mut page = Page::default();
    for (col, op, expr) in conds {
        match (col.as_str(), op) {
            ("id", BinaryOperator::Eq) => filter.id = Some(parse_ulid_expr(expr)?),
            ("field_id", BinaryOperator::Eq) => filter.field_id = Some(parse_ulid_expr(expr)?),
            ("user_id", BinaryOperator::Eq) => filter.user_id = Some(parse_string(expr)?),
            ("order_id", BinaryOperator::Eq) => filter.order_id = Some(parse_string(expr)?),
            ("status", BinaryOperator::Eq) => {
                let raw = parse_string(expr)?;
                filter.status = Some(
                    BookingStatus::parse(&raw)
                        .ok_or_else(|| SqlError::Parse(format!("unknown status {raw:?}")))?,
                );
            }
            ("booking_date", BinaryOperator::Eq) => filter.date = Some(parse_date(expr)?),
            ("booking_date", BinaryOperator::GtEq) => filter.from_date = Some(parse_date(expr)?),
            ("page", BinaryOperator::Eq) => page.page = parse_usize(expr)?,
            ("page_size", BinaryOperator::Eq) => page.page_size = parse_usize(expr)?,
            _ => return Err(SqlError::Unsupported(format!("filter on {col}"))),
        }
    }
    Ok((filter, page))
}

/// Flatten an AND-chain of `column <op> literal` comparisons.
fn collect_conditions(expr: &Expr, out: &mut Vec<(String, BinaryOperator, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_conditions(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conditions(left, out)?;
            collect_conditions(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("condition {expr}")))?;
            out.push((col, op.clone(), right.as_ref().clone()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("condition {other}"))),
    }
}

fn is_count(projection: &[SelectItem]) -> bool {
    matches!(
        projection.first(),
        Some(SelectItem::UnnamedExpr(Expr::Function(f)) | SelectItem::ExprWithAlias { expr: Expr::Function(f), .. })
            if f.name.to_string().eq_ignore_ascii_case("count")
    )
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

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection.as_ref() {
        Some(Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::DollarQuotedString(ast::DollarQuotedString { value: s, .. })) => {
            Ok(s.clone())
        }
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(expr)?);
    }
    let s = parse_string(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_usize(expr: &Expr) -> Result<usize, SqlError> {
    let v = parse_i64_expr(expr)?;
    usize::try_from(v).map_err(|_| SqlError::Parse(format!("{v} is negative")))
}

/// Minute of day, as a number or `'HH:MM'`.
fn parse_minute(expr: &Expr) -> Result<Minute, SqlError> {
    let s = parse_string(expr)?;
    let s = s.trim();
    if let Some((h, m)) = s.split_once(':') {
        let (h, m): (Minute, Minute) = h
            .parse()
            .ok()
            .zip(m.parse().ok())
            .ok_or_else(|| SqlError::Parse(format!("bad time {s:?}")))?;
        if m >= 60 || h > 24 {
            return Err(SqlError::Parse(format!("bad time {s:?}")));
        }
        return Ok(h * 60 + m);
    }
    s.parse()
        .map_err(|_| SqlError::Parse(format!("bad minute-of-day {s:?}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

/// `'600,660'`, `'{600,660}'` or a bare number for a single slot.
fn parse_slots(expr: &Expr) -> Result<Vec<Minute>, SqlError> {
    let raw = parse_string(expr)?;
    let inner = raw.trim().trim_start_matches('{').trim_end_matches('}');
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Minute>()
                .map_err(|_| SqlError::Parse(format!("bad slot {s:?}")))
        })
        .collect()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
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
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
