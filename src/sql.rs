use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::{MAX_VALID_YEAR, MIN_VALID_YEAR};
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomSelector {
    Id(Ulid),
    Hotel(Ulid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationSelector {
    Id(Ulid),
    Room(Ulid),
    User(String),
    HotelOwner(String),
    PaymentIntent(String),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertHotel {
        id: Ulid,
        details: HotelDetails,
    },
    UpdateHotel {
        id: Ulid,
        patch: HotelPatch,
    },
    DeleteHotel {
        id: Ulid,
    },
    SelectHotels {
        id: Option<Ulid>,
        filter: HotelFilter,
    },
    InsertRoom {
        id: Ulid,
        hotel_id: Ulid,
        details: RoomDetails,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    DeleteRoom {
        id: Ulid,
    },
    SelectRooms {
        selector: RoomSelector,
    },
    /// Start (or restart) checkout: a pending reservation plus payment intent.
    InsertReservation {
        id: Ulid,
        room_id: Ulid,
        stay: DateRange,
        breakfast: bool,
        payment_intent_id: Option<String>,
    },
    ConfirmPayment {
        payment_intent_id: String,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectReservations {
        selector: ReservationSelector,
    },
    SelectBookedDates {
        room_id: Ulid,
    },
    SelectQuote {
        room_id: Ulid,
        stay: DateRange,
        breakfast: bool,
    },
    DeleteImage {
        key: String,
    },
}

const HOTEL_COLUMNS: &[&str] = &[
    "id",
    "title",
    "description",
    "image",
    "country",
    "state",
    "city",
    "location_description",
    "amenities",
];

const ROOM_COLUMNS: &[&str] = &[
    "id",
    "hotel_id",
    "title",
    "description",
    "image",
    "bed_count",
    "guest_count",
    "bathroom_count",
    "king_bed_count",
    "queen_bed_count",
    "room_price",
    "breakfast_price",
    "amenities",
];

const RESERVATION_COLUMNS: &[&str] = &["id", "room_id", "start", "end", "breakfast", "payment_intent_id"];

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
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "hotels" => {
            let mut f = insert_fields(insert, "hotels", HOTEL_COLUMNS)?;
            let id = parse_ulid_expr(&f.require("id")?)?;
            let details = HotelDetails {
                title: parse_text(&f.require("title")?)?,
                description: parse_text(&f.require("description")?)?,
                image: parse_text(&f.require("image")?)?,
                country: parse_text(&f.require("country")?)?,
                state: f.take("state").map(|e| parse_text_or_null(&e)).transpose()?.flatten(),
                city: f.take("city").map(|e| parse_text_or_null(&e)).transpose()?.flatten(),
                location_description: parse_text(&f.require("location_description")?)?,
                amenities: f.take("amenities").map(|e| parse_amenities(&e)).transpose()?.unwrap_or_default(),
            };
            f.finish()?;
            Ok(Command::InsertHotel { id, details })
        }
        "rooms" => {
            let mut f = insert_fields(insert, "rooms", ROOM_COLUMNS)?;
            let id = parse_ulid_expr(&f.require("id")?)?;
            let hotel_id = parse_ulid_expr(&f.require("hotel_id")?)?;
            let count = |f: &mut Fields, col: &'static str| -> Result<u32, SqlError> {
                f.take(col).map(|e| parse_u32(&e)).transpose().map(|v| v.unwrap_or(0))
            };
            let details = RoomDetails {
                title: parse_text(&f.require("title")?)?,
                description: parse_text(&f.require("description")?)?,
                image: parse_text(&f.require("image")?)?,
                bed_count: parse_u32(&f.require("bed_count")?)?,
                guest_count: parse_u32(&f.require("guest_count")?)?,
                bathroom_count: parse_u32(&f.require("bathroom_count")?)?,
                king_bed_count: count(&mut f, "king_bed_count")?,
                queen_bed_count: count(&mut f, "queen_bed_count")?,
                room_price: parse_u32(&f.require("room_price")?)?,
                breakfast_price: count(&mut f, "breakfast_price")?,
                amenities: f.take("amenities").map(|e| parse_amenities(&e)).transpose()?.unwrap_or_default(),
            };
            f.finish()?;
            Ok(Command::InsertRoom { id, hotel_id, details })
        }
        "reservations" => {
            let mut f = insert_fields(insert, "reservations", RESERVATION_COLUMNS)?;
            let id = parse_ulid_expr(&f.require("id")?)?;
            let room_id = parse_ulid_expr(&f.require("room_id")?)?;
            let stay = parse_stay(&f.require("start")?, &f.require("end")?)?;
            let breakfast = f.take("breakfast").map(|e| parse_bool(&e)).transpose()?.unwrap_or(false);
            let payment_intent_id = f
                .take("payment_intent_id")
                .map(|e| parse_text_or_null(&e))
                .transpose()?
                .flatten();
            f.finish()?;
            Ok(Command::InsertReservation {
                id,
                room_id,
                stay,
                breakfast,
                payment_intent_id,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let mut filters = where_filters(selection)?;

    match table.as_str() {
        "hotels" => {
            let id = parse_ulid_expr(&filters.require("id")?)?;
            filters.finish()?;
            let mut f = assignment_fields(assignments, "hotels")?;
            let patch = HotelPatch {
                title: f.take("title").map(|e| parse_text(&e)).transpose()?,
                description: f.take("description").map(|e| parse_text(&e)).transpose()?,
                image: f.take("image").map(|e| parse_text(&e)).transpose()?,
                country: f.take("country").map(|e| parse_text(&e)).transpose()?,
                state: f.take("state").map(|e| parse_text_or_null(&e)).transpose()?,
                city: f.take("city").map(|e| parse_text_or_null(&e)).transpose()?,
                location_description: f.take("location_description").map(|e| parse_text(&e)).transpose()?,
                amenities: f.take("amenities").map(|e| parse_amenities(&e)).transpose()?,
            };
            f.finish()?;
            Ok(Command::UpdateHotel { id, patch })
        }
        "rooms" => {
            let id = parse_ulid_expr(&filters.require("id")?)?;
            filters.finish()?;
            let mut f = assignment_fields(assignments, "rooms")?;
            let mut num = |col: &str| f.take(col).map(|e| parse_u32(&e)).transpose();
            let bed_count = num("bed_count")?;
            let guest_count = num("guest_count")?;
            let bathroom_count = num("bathroom_count")?;
            let king_bed_count = num("king_bed_count")?;
            let queen_bed_count = num("queen_bed_count")?;
            let room_price = num("room_price")?;
            let breakfast_price = num("breakfast_price")?;
            let patch = RoomPatch {
                title: f.take("title").map(|e| parse_text(&e)).transpose()?,
                description: f.take("description").map(|e| parse_text(&e)).transpose()?,
                image: f.take("image").map(|e| parse_text(&e)).transpose()?,
                bed_count,
                guest_count,
                bathroom_count,
                king_bed_count,
                queen_bed_count,
                room_price,
                breakfast_price,
                amenities: f.take("amenities").map(|e| parse_amenities(&e)).transpose()?,
            };
            f.finish()?;
            Ok(Command::UpdateRoom { id, patch })
        }
        "reservations" => {
            let payment_intent_id = parse_text(&filters.require("payment_intent_id")?)?;
            filters.finish()?;
            let mut f = assignment_fields(assignments, "reservations")?;
            let confirmed = parse_bool(&f.require("payment_confirmed")?)?;
            f.finish()?;
            if !confirmed {
                return Err(SqlError::Unsupported("payment_confirmed can only be set to true".into()));
            }
            Ok(Command::ConfirmPayment { payment_intent_id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let mut filters = where_filters(&delete.selection)?;

    let cmd = match table.as_str() {
        "hotels" => Command::DeleteHotel { id: parse_ulid_expr(&filters.require("id")?)? },
        "rooms" => Command::DeleteRoom { id: parse_ulid_expr(&filters.require("id")?)? },
        "reservations" => Command::DeleteReservation { id: parse_ulid_expr(&filters.require("id")?)? },
        "images" => Command::DeleteImage { key: parse_text(&filters.require("key")?)? },
        _ => return Err(SqlError::UnknownTable(table)),
    };
    filters.finish()?;
    Ok(cmd)
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
    let mut filters = where_filters(&select.selection)?;

    let cmd = match table.as_str() {
        "hotels" => {
            let id = filters.take("id").map(|e| parse_ulid_expr(&e)).transpose()?;
            let mut text = |col: &str| filters.take(col).map(|e| parse_text(&e)).transpose();
            let filter = HotelFilter {
                title: text("title")?,
                country: text("country")?,
                state: text("state")?,
                city: text("city")?,
                owner_id: text("owner_id")?,
            };
            Command::SelectHotels { id, filter }
        }
        "rooms" => {
            let selector = if let Some(e) = filters.take("id") {
                RoomSelector::Id(parse_ulid_expr(&e)?)
            } else if let Some(e) = filters.take("hotel_id") {
                RoomSelector::Hotel(parse_ulid_expr(&e)?)
            } else {
                return Err(SqlError::MissingFilter("id or hotel_id"));
            };
            Command::SelectRooms { selector }
        }
        "reservations" => {
            let selector = if let Some(e) = filters.take("id") {
                ReservationSelector::Id(parse_ulid_expr(&e)?)
            } else if let Some(e) = filters.take("room_id") {
                ReservationSelector::Room(parse_ulid_expr(&e)?)
            } else if let Some(e) = filters.take("payment_intent_id") {
                ReservationSelector::PaymentIntent(parse_text(&e)?)
            } else if let Some(e) = filters.take("user_id") {
                ReservationSelector::User(parse_text(&e)?)
            } else if let Some(e) = filters.take("hotel_owner_id") {
                ReservationSelector::HotelOwner(parse_text(&e)?)
            } else {
                return Err(SqlError::MissingFilter(
                    "id, room_id, payment_intent_id, user_id or hotel_owner_id",
                ));
            };
            Command::SelectReservations { selector }
        }
        "booked_dates" => Command::SelectBookedDates {
            room_id: parse_ulid_expr(&filters.require("room_id")?)?,
        },
        "quotes" => {
            let room_id = parse_ulid_expr(&filters.require("room_id")?)?;
            let stay = parse_stay(&filters.require("start")?, &filters.require("end")?)?;
            let breakfast = filters.take("breakfast").map(|e| parse_bool(&e)).transpose()?.unwrap_or(false);
            Command::SelectQuote { room_id, stay, breakfast }
        }
        _ => return Err(SqlError::UnknownTable(table)),
    };
    filters.finish()?;
    Ok(cmd)
}

/// Rows a statement produces, known before its parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    Hotels,
    Rooms,
    Reservations,
    BookedDates,
    Quotes,
    /// Returned by `INSERT INTO reservations`: what the guest needs to pay.
    Checkout,
}

pub fn row_shape(sql: &str) -> Option<RowShape> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Insert(insert) => match insert_table_name(insert).ok()?.as_str() {
            "reservations" => Some(RowShape::Checkout),
            _ => None,
        },
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            let from = select.from.first()?;
            match table_factor_name(&from.relation).ok()?.as_str() {
                "hotels" => Some(RowShape::Hotels),
                "rooms" => Some(RowShape::Rooms),
                "reservations" => Some(RowShape::Reservations),
                "booked_dates" => Some(RowShape::BookedDates),
                "quotes" => Some(RowShape::Quotes),
                _ => None,
            }
        }
        _ => None,
    }
}

// ── Column/value plumbing ─────────────────────────────────────

/// Named values from an INSERT row, SET list or WHERE clause.
/// Every value must be consumed; leftovers are unknown columns.
struct Fields {
    table: &'static str,
    values: Vec<(String, Expr)>,
}

impl Fields {
    fn take(&mut self, col: &str) -> Option<Expr> {
        let pos = self.values.iter().position(|(c, _)| c == col)?;
        Some(self.values.remove(pos).1)
    }

    fn require(&mut self, col: &'static str) -> Result<Expr, SqlError> {
        self.take(col).ok_or(SqlError::MissingColumn(self.table, col))
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.values.into_iter().next() {
            Some((col, _)) => Err(SqlError::UnknownColumn(self.table, col)),
            None => Ok(()),
        }
    }
}

fn insert_fields(
    insert: &ast::Insert,
    table: &'static str,
    default_columns: &[&str],
) -> Result<Fields, SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let row = match rows.as_slice() {
        [row] => row,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("one row per INSERT".into())),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        default_columns.iter().take(row.len()).map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != row.len() {
        return Err(SqlError::WrongArity(table, columns.len(), row.len()));
    }
    Ok(Fields {
        table,
        values: columns.into_iter().zip(row.iter().cloned()).collect(),
    })
}

fn assignment_fields(assignments: &[ast::Assignment], table: &'static str) -> Result<Fields, SqlError> {
    let mut values = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        if col == "id" {
            return Err(SqlError::Unsupported("id cannot be changed".into()));
        }
        values.push((col, a.value.clone()));
    }
    if values.is_empty() {
        return Err(SqlError::Parse("empty SET".into()));
    }
    Ok(Fields { table, values })
}

/// `col = value [AND col = value ...]`. Anything else in WHERE is rejected.
fn where_filters(selection: &Option<Expr>) -> Result<Fields, SqlError> {
    fn walk(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => walk(inner, out),
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                walk(left, out)?;
                walk(right, out)
            }
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::Eq,
                right,
            } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, (**right).clone()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    let mut values = Vec::new();
    if let Some(expr) = selection {
        walk(expr, &mut values)?;
    }
    Ok(Fields { table: "WHERE", values })
}

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

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

// ── Value parsing ─────────────────────────────────────────────

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::EscapedStringLiteral(s)) => Ok(s.clone()),
        Some(Value::DollarQuotedString(s)) => Ok(s.value.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_text(expr).map(Some)
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(other) => Err(SqlError::Parse(format!("expected number, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// A calendar date as `YYYY-MM-DD`, or an RFC 3339 timestamp reduced to its
/// UTC day.
pub fn parse_date(s: &str) -> Result<NaiveDate, SqlError> {
    let s = s.trim();
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc).date_naive()))
        .map_err(|_| SqlError::Parse(format!("bad date {s:?}: expected YYYY-MM-DD or RFC 3339")))?;
    if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&date.year()) {
        return Err(SqlError::Parse(format!("date {date} out of range")));
    }
    Ok(date)
}

fn parse_stay(start: &Expr, end: &Expr) -> Result<DateRange, SqlError> {
    let start = parse_date(&parse_text(start)?)?;
    let end = parse_date(&parse_text(end)?)?;
    DateRange::new(start, end).map_err(SqlError::Range)
}

/// `'wifi, gym'` or a JSON array `'["wifi","gym"]'`. NULL and `''` are empty.
pub fn parse_amenity_list(s: &str) -> Result<AmenitySet, SqlError> {
    let s = s.trim();
    let names: Vec<String> = if s.starts_with('[') {
        serde_json::from_str(s).map_err(|e| SqlError::Parse(format!("bad amenities: {e}")))?
    } else {
        s.split(',').map(str::to_string).collect()
    };
    let mut set = AmenitySet::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        let amenity = Amenity::parse(name).ok_or_else(|| SqlError::UnknownAmenity(name.to_string()))?;
        set.insert(amenity);
    }
    Ok(set)
}

fn parse_amenities(expr: &Expr) -> Result<AmenitySet, SqlError> {
    match parse_text_or_null(expr)? {
        Some(s) => parse_amenity_list(&s),
        None => Ok(AmenitySet::new()),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    UnknownAmenity(String),
    Range(InvalidRange),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::UnknownAmenity(a) => write!(f, "unknown amenity: {a}"),
            SqlError::Range(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const ROOM: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn parse_insert_hotel() {
        let sql = format!(
            "INSERT INTO hotels (id, title, description, image, country, city, location_description, amenities) \
             VALUES ('{ID}', 'Harbour Inn', 'Family run inn', 'https://cdn/f/a.png', 'NO', 'Bergen', 'By the fish market', 'wifi, restaurant')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertHotel { id, details } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(details.title, "Harbour Inn");
                assert_eq!(details.state, None);
                assert_eq!(details.city.as_deref(), Some("Bergen"));
                assert!(details.amenities.contains(&Amenity::Restaurant));
                assert_eq!(details.amenities.len(), 2);
            }
            other => panic!("expected InsertHotel, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_hotel_unknown_column() {
        let sql = format!(
            "INSERT INTO hotels (id, title, description, image, country, location_description, stars) \
             VALUES ('{ID}', 'Inn', 'desc', 'img', 'NO', 'loc', '5')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("hotels", c)) if c == "stars"));
    }

    #[test]
    fn parse_insert_hotel_missing_column() {
        let sql = format!("INSERT INTO hotels (id, title) VALUES ('{ID}', 'Inn')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("hotels", _))));
    }

    #[test]
    fn parse_insert_room_defaults() {
        let sql = format!(
            "INSERT INTO rooms (id, hotel_id, title, description, image, bed_count, guest_count, bathroom_count, room_price) \
             VALUES ('{ROOM}', '{ID}', 'Twin', 'Two single beds', 'img', 2, 2, 1, 95)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom { hotel_id, details, .. } => {
                assert_eq!(hotel_id.to_string(), ID);
                assert_eq!(details.bed_count, 2);
                assert_eq!(details.room_price, 95);
                assert_eq!(details.breakfast_price, 0);
                assert_eq!(details.king_bed_count, 0);
                assert!(details.amenities.is_empty());
            }
            other => panic!("expected InsertRoom, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_room_negative_count_errors() {
        let sql = format!(
            "INSERT INTO rooms (id, hotel_id, title, description, image, bed_count, guest_count, bathroom_count, room_price) \
             VALUES ('{ROOM}', '{ID}', 'Twin', 'Two single beds', 'img', -1, 2, 1, 95)"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = format!(
            r#"INSERT INTO reservations (id, room_id, start, "end", breakfast) VALUES ('{ID}', '{ROOM}', '2024-06-10', '2024-06-15', true)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { room_id, stay, breakfast, payment_intent_id, .. } => {
                assert_eq!(room_id.to_string(), ROOM);
                assert_eq!(stay, DateRange::new(d("2024-06-10"), d("2024-06-15")).unwrap());
                assert!(breakfast);
                assert_eq!(payment_intent_id, None);
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_positional_with_intent() {
        let sql = format!(
            "INSERT INTO reservations VALUES ('{ID}', '{ROOM}', '2024-06-10T22:00:00Z', '2024-06-12T08:00:00+02:00', false, 'pi_123')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { stay, payment_intent_id, .. } => {
                assert_eq!(stay.start(), d("2024-06-10"));
                assert_eq!(stay.end(), d("2024-06-12"));
                assert_eq!(payment_intent_id.as_deref(), Some("pi_123"));
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_reversed_dates() {
        let sql = format!(
            r#"INSERT INTO reservations (id, room_id, start, "end") VALUES ('{ID}', '{ROOM}', '2024-06-15', '2024-06-10')"#
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Range(_))));
    }

    #[test]
    fn parse_date_bounds() {
        assert!(parse_date("1999-12-31").is_err());
        assert!(parse_date("2024-02-30").is_err());
        assert!(parse_date("yesterday").is_err());
        assert_eq!(parse_date(" 2024-02-29 ").unwrap(), d("2024-02-29"));
    }

    #[test]
    fn parse_update_hotel() {
        let sql = format!("UPDATE hotels SET title = 'Harbour Hotel', state = NULL WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateHotel { id, patch } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(patch.title.as_deref(), Some("Harbour Hotel"));
                assert_eq!(patch.state, Some(None));
                assert_eq!(patch.city, None);
            }
            other => panic!("expected UpdateHotel, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_room() {
        let sql = format!("UPDATE rooms SET room_price = 120, amenities = '[\"tv\",\"balcony\"]' WHERE id = '{ROOM}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateRoom { patch, .. } => {
                assert_eq!(patch.room_price, Some(120));
                assert_eq!(patch.bed_count, None);
                let amenities = patch.amenities.unwrap();
                assert!(amenities.contains(&Amenity::Tv) && amenities.contains(&Amenity::Balcony));
            }
            other => panic!("expected UpdateRoom, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_cannot_change_id() {
        let sql = format!("UPDATE rooms SET id = '{ID}' WHERE id = '{ROOM}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_confirm_payment() {
        let sql = "UPDATE reservations SET payment_confirmed = true WHERE payment_intent_id = 'pi_abc'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::ConfirmPayment { payment_intent_id: "pi_abc".into() }
        );
        let unconfirm = "UPDATE reservations SET payment_confirmed = false WHERE payment_intent_id = 'pi_abc'";
        assert!(parse_sql(unconfirm).is_err());
    }

    #[test]
    fn parse_deletes() {
        assert!(matches!(
            parse_sql(&format!("DELETE FROM hotels WHERE id = '{ID}'")).unwrap(),
            Command::DeleteHotel { .. }
        ));
        assert!(matches!(
            parse_sql(&format!("DELETE FROM rooms WHERE id = '{ID}'")).unwrap(),
            Command::DeleteRoom { .. }
        ));
        assert!(matches!(
            parse_sql(&format!("DELETE FROM reservations WHERE id = '{ID}'")).unwrap(),
            Command::DeleteReservation { .. }
        ));
        assert_eq!(
            parse_sql("DELETE FROM images WHERE key = 'abc.png'").unwrap(),
            Command::DeleteImage { key: "abc.png".into() }
        );
    }

    #[test]
    fn parse_delete_requires_id() {
        assert!(matches!(
            parse_sql("DELETE FROM hotels"),
            Err(SqlError::MissingColumn("WHERE", "id"))
        ));
    }

    #[test]
    fn parse_select_hotels() {
        match parse_sql("SELECT * FROM hotels WHERE title = 'inn' AND country = 'NO'").unwrap() {
            Command::SelectHotels { id, filter } => {
                assert_eq!(id, None);
                assert_eq!(filter.title.as_deref(), Some("inn"));
                assert_eq!(filter.country.as_deref(), Some("NO"));
                assert_eq!(filter.city, None);
            }
            other => panic!("expected SelectHotels, got {other:?}"),
        }
        assert!(matches!(
            parse_sql("SELECT * FROM hotels").unwrap(),
            Command::SelectHotels { id: None, .. }
        ));
    }

    #[test]
    fn parse_select_rooms() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM rooms WHERE hotel_id = '{ID}'")).unwrap(),
            Command::SelectRooms { selector: RoomSelector::Hotel(Ulid::from_string(ID).unwrap()) }
        );
        assert!(matches!(parse_sql("SELECT * FROM rooms"), Err(SqlError::MissingFilter(_))));
    }

    #[test]
    fn parse_select_reservations() {
        assert_eq!(
            parse_sql("SELECT * FROM reservations WHERE user_id = 'alice'").unwrap(),
            Command::SelectReservations { selector: ReservationSelector::User("alice".into()) }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM reservations WHERE room_id = '{ROOM}'")).unwrap(),
            Command::SelectReservations {
                selector: ReservationSelector::Room(Ulid::from_string(ROOM).unwrap())
            }
        );
    }

    #[test]
    fn parse_select_quote() {
        let sql = format!(
            r#"SELECT * FROM quotes WHERE room_id = '{ROOM}' AND start = '2024-06-10' AND "end" = '2024-06-12' AND breakfast = true"#
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectQuote { stay, breakfast, .. } => {
                assert_eq!(stay.nights(), 2);
                assert!(breakfast);
            }
            other => panic!("expected SelectQuote, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_booked_dates() {
        let sql = format!("SELECT * FROM booked_dates WHERE room_id = '{ROOM}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectBookedDates { .. }));
    }

    #[test]
    fn parse_select_rejects_range_filters() {
        let sql = format!("SELECT * FROM booked_dates WHERE room_id = '{ROOM}' OR 1 = 1");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_amenity_lists() {
        let set = parse_amenity_list("Wifi, gym ,").unwrap();
        assert_eq!(set.len(), 2);
        assert!(parse_amenity_list("").unwrap().is_empty());
        assert!(matches!(parse_amenity_list("wifi, helipad"), Err(SqlError::UnknownAmenity(a)) if a == "helipad"));
        assert_eq!(parse_amenity_list(r#"["spa"]"#).unwrap().len(), 1);
    }

    #[test]
    fn row_shape_with_placeholders() {
        assert_eq!(
            row_shape(r#"SELECT * FROM quotes WHERE room_id = $1 AND start = $2 AND "end" = $3"#),
            Some(RowShape::Quotes)
        );
        assert_eq!(
            row_shape(r#"INSERT INTO reservations (id, room_id, start, "end") VALUES ($1, $2, $3, $4)"#),
            Some(RowShape::Checkout)
        );
        assert_eq!(row_shape("SELECT * FROM booked_dates WHERE room_id = $1"), Some(RowShape::BookedDates));
        assert_eq!(row_shape("DELETE FROM hotels WHERE id = $1"), None);
        assert_eq!(row_shape("not sql"), None);
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql(&format!("DELETE FROM bookings WHERE id = '{ID}'")),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
