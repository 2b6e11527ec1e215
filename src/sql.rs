use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

const RESERVATIONS: &str = "reservations";
const AVAILABILITY: &str = "availability";

/// Column order for an INSERT without a column list.
const INSERT_COLUMNS: [&str; 5] = ["user_id", "room_id", "start_date", "end_date", "status"];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectReservation {
        id: Ulid,
    },
    SelectReservations {
        filter: SearchFilter,
    },
    SelectAvailability {
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
        min_nights: Option<i64>,
    },
    InsertReservation {
        draft: ReservationDraft,
    },
    UpdateReservation {
        id: Ulid,
        draft: ReservationDraft,
    },
    CancelReservation {
        id: Ulid,
    },
    ApproveReservation {
        id: Ulid,
    },
}

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
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != RESERVATIONS {
        return Err(SqlError::UnknownTable(table));
    }
    let values = extract_insert_values(insert)?;

    let columns: Vec<String> = if insert.columns.is_empty() {
        INSERT_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if values.len() != columns.len() {
        return Err(SqlError::Parse(format!(
            "{} columns but {} values",
            columns.len(),
            values.len()
        )));
    }

    let mut fields = DraftFields::default();
    for (column, value) in columns.iter().zip(values) {
        fields.set(column, value)?;
    }
    Ok(Command::InsertReservation {
        draft: fields.into_draft()?,
    })
}

// ── UPDATE ────────────────────────────────────────────────────

/// `SET status = 'APPROVED'` and `SET status = 'CANCELLED'` alone are the
/// approve and cancel operations. Anything else replaces the reservation's
/// fields and must name all four of them.
fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    if name != RESERVATIONS {
        return Err(SqlError::UnknownTable(name));
    }
    let id = extract_where_id(selection)?;

    let mut fields = DraftFields::default();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        fields.set(&column, &assignment.value)?;
    }

    if fields.is_status_only() {
        return match fields.status {
            Some(ReservationStatus::Approved) => Ok(Command::ApproveReservation { id }),
            Some(ReservationStatus::Cancelled) => Ok(Command::CancelReservation { id }),
            _ => Err(SqlError::Unsupported(
                "status can only be set to APPROVED or CANCELLED".into(),
            )),
        };
    }

    Ok(Command::UpdateReservation {
        id,
        draft: fields.into_draft()?,
    })
}

/// Reservation columns collected from INSERT values or UPDATE assignments.
#[derive(Default)]
struct DraftFields {
    user_id: Option<UserId>,
    room_id: Option<RoomId>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    status: Option<ReservationStatus>,
}

impl DraftFields {
    fn set(&mut self, column: &str, value: &Expr) -> Result<(), SqlError> {
        match column {
            "user_id" => self.user_id = Some(parse_i64_expr(value)?),
            "room_id" => self.room_id = Some(parse_i64_expr(value)?),
            "start_date" => self.start_date = Some(parse_date_expr(value)?),
            "end_date" => self.end_date = Some(parse_date_expr(value)?),
            "status" => self.status = parse_status_or_null(value)?,
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
        Ok(())
    }

    fn is_status_only(&self) -> bool {
        self.user_id.is_none()
            && self.room_id.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
    }

    fn into_draft(self) -> Result<ReservationDraft, SqlError> {
        Ok(ReservationDraft {
            user_id: self.user_id.ok_or(SqlError::MissingColumn("user_id"))?,
            room_id: self.room_id.ok_or(SqlError::MissingColumn("room_id"))?,
            range: DateRange::new(
                self.start_date.ok_or(SqlError::MissingColumn("start_date"))?,
                self.end_date.ok_or(SqlError::MissingColumn("end_date"))?,
            ),
            status: self.status,
        })
    }
}

// ── DELETE ────────────────────────────────────────────────────

/// Reservations are never removed; DELETE is an alias for cancel.
fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != RESERVATIONS {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::CancelReservation { id })
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = SelectFilters::default();
    if let Some(selection) = &select.selection {
        filters.collect(selection)?;
    }

    match table.as_str() {
        RESERVATIONS => match filters.id {
            Some(id) => Ok(Command::SelectReservation { id }),
            None => Ok(Command::SelectReservations {
                filter: SearchFilter {
                    room_id: filters.room_id,
                    user_id: filters.user_id,
                    page_size: filters.page_size,
                    page_number: filters.page_number,
                },
            }),
        },
        AVAILABILITY => Ok(Command::SelectAvailability {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            start: filters.start.ok_or(SqlError::MissingFilter("start_date"))?,
            end: filters.end.ok_or(SqlError::MissingFilter("end_date"))?,
            min_nights: filters.min_nights,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Conjunction of simple comparisons in a WHERE clause. `page_size`,
/// `page_number` and `min_nights` are pseudo-columns carrying query options.
#[derive(Default)]
struct SelectFilters {
    id: Option<Ulid>,
    room_id: Option<RoomId>,
    user_id: Option<UserId>,
    page_size: Option<usize>,
    page_number: Option<usize>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    min_nights: Option<i64>,
}

impl SelectFilters {
    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op, right } => {
                let col = expr_column_name(left);
                match (op, col.as_deref()) {
                    (ast::BinaryOperator::And, _) => {
                        self.collect(left)?;
                        self.collect(right)
                    }
                    (ast::BinaryOperator::Eq, Some("id")) => {
                        self.id = Some(parse_ulid_expr(right)?);
                        Ok(())
                    }
                    (ast::BinaryOperator::Eq, Some("room_id")) => {
                        self.room_id = Some(parse_i64_expr(right)?);
                        Ok(())
                    }
                    (ast::BinaryOperator::Eq, Some("user_id")) => {
                        self.user_id = Some(parse_i64_expr(right)?);
                        Ok(())
                    }
                    (ast::BinaryOperator::Eq, Some("page_size")) => {
                        self.page_size = Some(parse_usize_expr(right)?);
                        Ok(())
                    }
                    (ast::BinaryOperator::Eq, Some("page_number")) => {
                        self.page_number = Some(parse_usize_expr(right)?);
                        Ok(())
                    }
                    (ast::BinaryOperator::Eq, Some("min_nights")) => {
                        self.min_nights = Some(parse_i64_expr(right)?);
                        Ok(())
                    }
                    (ast::BinaryOperator::GtEq, Some("start_date")) => {
                        self.start = Some(parse_date_expr(right)?);
                        Ok(())
                    }
                    (ast::BinaryOperator::LtEq, Some("end_date")) => {
                        self.end = Some(parse_date_expr(right)?);
                        Ok(())
                    }
                    _ => Err(SqlError::Unsupported(format!("filter: {expr}"))),
                }
            }
            _ => Err(SqlError::Unsupported(format!("filter: {expr}"))),
        }
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

/// Single-row VALUES only.
fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_usize_expr(expr: &Expr) -> Result<usize, SqlError> {
    let v = parse_i64_expr(expr)?;
    usize::try_from(v).map_err(|_| SqlError::Parse(format!("{v} must not be negative")))
}

/// Dates are ISO `YYYY-MM-DD` string literals.
fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let text = match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => s,
        Some(value) => return Err(SqlError::Parse(format!("expected date, got {value:?}"))),
        None => return Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    };
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {text:?}: {e}")))
}

fn parse_status_or_null(expr: &Expr) -> Result<Option<ReservationStatus>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => ReservationStatus::parse(s)
            .map(Some)
            .ok_or_else(|| SqlError::Parse(format!("bad status: {s}"))),
        Some(value) => Err(SqlError::Parse(format!("expected status, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = "INSERT INTO reservations (user_id, room_id, start_date, end_date) \
                   VALUES (42, 7, '2024-01-10', '2024-01-15')";
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertReservation {
                draft: ReservationDraft::new(42, 7, d("2024-01-10"), d("2024-01-15")),
            }
        );
    }

    #[test]
    fn parse_insert_with_column_order_swapped() {
        let sql = "INSERT INTO reservations (room_id, end_date, start_date, user_id) \
                   VALUES (7, '2024-01-15', '2024-01-10', 42)";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { draft } => {
                assert_eq!(draft.room_id, 7);
                assert_eq!(draft.user_id, 42);
                assert_eq!(draft.range.start, d("2024-01-10"));
                assert_eq!(draft.range.end, d("2024-01-15"));
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_positional_with_status() {
        let sql = "INSERT INTO reservations VALUES (1, 2, '2024-03-01', '2024-03-04', 'approved')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { draft } => {
                assert_eq!(draft.status, Some(ReservationStatus::Approved));
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_null_status_is_empty() {
        let sql = "INSERT INTO reservations (user_id, room_id, start_date, end_date, status) \
                   VALUES (1, 2, '2024-03-01', '2024-03-04', NULL)";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { draft } => assert_eq!(draft.status, None),
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_missing_column() {
        let sql = "INSERT INTO reservations (user_id, room_id, start_date) VALUES (1, 2, '2024-03-01')";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingColumn("end_date"))
        ));
    }

    #[test]
    fn parse_insert_bad_date() {
        let sql = "INSERT INTO reservations (user_id, room_id, start_date, end_date) \
                   VALUES (1, 2, '2024-02-30', '2024-03-04')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_unknown_column() {
        let sql = "INSERT INTO reservations (user_id, room_id, start_date, end_date, price) \
                   VALUES (1, 2, '2024-03-01', '2024-03-04', 100)";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(c)) if c == "price"));
    }

    #[test]
    fn parse_update_fields() {
        let sql = format!(
            "UPDATE reservations SET user_id = 3, room_id = 9, start_date = '2024-05-01', \
             end_date = '2024-05-03' WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateReservation { id, draft } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(draft, ReservationDraft::new(3, 9, d("2024-05-01"), d("2024-05-03")));
            }
            cmd => panic!("expected UpdateReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_keeps_status_on_draft() {
        let sql = format!(
            "UPDATE reservations SET user_id = 3, room_id = 9, start_date = '2024-05-01', \
             end_date = '2024-05-03', status = 'APPROVED' WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateReservation { draft, .. } => {
                assert_eq!(draft.status, Some(ReservationStatus::Approved));
            }
            cmd => panic!("expected UpdateReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_partial_fields_rejected() {
        let sql = format!("UPDATE reservations SET room_id = 9 WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn(_))));
    }

    #[test]
    fn parse_approve() {
        let sql = format!("UPDATE reservations SET status = 'APPROVED' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::ApproveReservation { id } => assert_eq!(id.to_string(), ID),
            cmd => panic!("expected ApproveReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_cancel_via_update_and_delete() {
        let sql = format!("UPDATE reservations SET status = 'cancelled' WHERE id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::CancelReservation { .. }
        ));

        let sql = format!("DELETE FROM reservations WHERE id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::CancelReservation { .. }
        ));
    }

    #[test]
    fn parse_set_pending_unsupported() {
        let sql = format!("UPDATE reservations SET status = 'PENDING' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_without_id_errors() {
        let sql = "UPDATE reservations SET status = 'APPROVED'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_select_by_id() {
        let sql = format!("SELECT * FROM reservations WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::SelectReservation { id } => assert_eq!(id.to_string(), ID),
            cmd => panic!("expected SelectReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_search_without_filters() {
        let cmd = parse_sql("SELECT * FROM reservations").unwrap();
        assert_eq!(
            cmd,
            Command::SelectReservations {
                filter: SearchFilter::default()
            }
        );
    }

    #[test]
    fn parse_search_with_filters_and_paging() {
        let sql = "SELECT * FROM reservations WHERE room_id = 7 AND user_id = 42 \
                   AND page_size = 5 AND page_number = 2";
        match parse_sql(sql).unwrap() {
            Command::SelectReservations { filter } => {
                assert_eq!(filter.room_id, Some(7));
                assert_eq!(filter.user_id, Some(42));
                assert_eq!(filter.page_size(), 5);
                assert_eq!(filter.page_number(), 2);
            }
            cmd => panic!("expected SelectReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_search_negative_page_rejected() {
        let sql = "SELECT * FROM reservations WHERE page_number = -1";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_search_unsupported_filter() {
        let sql = "SELECT * FROM reservations WHERE room_id > 7";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE room_id = 7 \
                   AND start_date >= '2024-01-01' AND end_date <= '2024-02-01'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                room_id: 7,
                start: d("2024-01-01"),
                end: d("2024-02-01"),
                min_nights: None,
            }
        );
    }

    #[test]
    fn parse_select_availability_with_min_nights() {
        let sql = "SELECT * FROM availability WHERE room_id = 7 \
                   AND start_date >= '2024-01-01' AND end_date <= '2024-02-01' AND min_nights = 3";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailability { min_nights, .. } => assert_eq!(min_nights, Some(3)),
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_window() {
        let sql = "SELECT * FROM availability WHERE room_id = 7";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingFilter("start_date"))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "INSERT INTO rooms (user_id) VALUES (1)";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(t)) if t == "rooms"));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
