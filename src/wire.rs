use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::warn;

use crate::auth::InnkeepAuthSource;
use crate::engine::{Checkout, Engine, EngineError, Quote};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ReservationSelector, RoomSelector, RowShape};
use crate::uploads::{image_key, ImageStore};

pub struct InnkeepHandler {
    engine: Arc<Engine>,
    images: Arc<dyn ImageStore>,
    query_parser: Arc<InnkeepQueryParser>,
}

impl InnkeepHandler {
    pub fn new(engine: Arc<Engine>, images: Arc<dyn ImageStore>) -> Self {
        Self {
            engine,
            images,
            query_parser: Arc::new(InnkeepQueryParser),
        }
    }

    /// The authenticated user name is the acting user for every command.
    fn session_user<C: ClientInfo>(&self, client: &C) -> PgWireResult<String> {
        client
            .metadata()
            .get("user")
            .filter(|u| !u.is_empty())
            .cloned()
            .ok_or_else(|| user_error("28000", "no user in startup parameters".into()))
    }

    async fn run(&self, user: &str, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(user, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, user: &str, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertHotel { id, details } => {
                engine.create_hotel(user, id, details).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateHotel { id, patch } => {
                engine.update_hotel(user, id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteHotel { id } => {
                let hotel = engine.delete_hotel(user, id).await.map_err(engine_err)?;
                self.delete_image(&hotel.details.image).await;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectHotels { id, filter } => {
                let hotels = match id {
                    Some(id) => engine
                        .get_hotel(&id)
                        .filter(|h| filter.matches(h))
                        .into_iter()
                        .collect(),
                    None => engine.list_hotels(&filter),
                };
                rows(RowShape::Hotels, hotels.iter(), encode_hotel)
            }
            Command::InsertRoom {
                id,
                hotel_id,
                details,
            } => {
                engine
                    .create_room(user, id, hotel_id, details)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateRoom { id, patch } => {
                engine.update_room(user, id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteRoom { id } => {
                let room = engine.delete_room(user, id).await.map_err(engine_err)?;
                self.delete_image(&room.details.image).await;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRooms { selector } => {
                let rooms = match selector {
                    RoomSelector::Id(id) => engine.get_room(&id).await.into_iter().collect(),
                    RoomSelector::Hotel(hotel_id) => engine.list_rooms(&hotel_id).await,
                };
                rows(RowShape::Rooms, rooms.iter(), encode_room)
            }
            Command::InsertReservation {
                id,
                room_id,
                stay,
                breakfast,
                payment_intent_id,
            } => {
                let checkout = engine
                    .start_checkout(user, id, room_id, stay, breakfast, payment_intent_id)
                    .await
                    .map_err(engine_err)?;
                rows(RowShape::Checkout, std::iter::once(&checkout), encode_checkout)
            }
            Command::ConfirmPayment { payment_intent_id } => {
                engine
                    .confirm_payment(user, &payment_intent_id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteReservation { id } => {
                engine.release_checkout(user, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectReservations { selector } => {
                let found = match selector {
                    ReservationSelector::Id(id) => engine.reservation(&id).await.into_iter().collect(),
                    ReservationSelector::PaymentIntent(intent) => {
                        engine.reservation_by_intent(&intent).await.into_iter().collect()
                    }
                    ReservationSelector::Room(room_id) => {
                        engine.reservations_for_room(&room_id).await.map_err(engine_err)?
                    }
                    ReservationSelector::User(u) => engine.reservations_for_user(&u).await,
                    ReservationSelector::HotelOwner(o) => engine.reservations_for_owner(&o).await,
                };
                // guests see their own trips, owners see stays at their hotels
                let visible: Vec<Reservation> = found
                    .into_iter()
                    .filter(|r| r.user_id == user || r.hotel_owner_id == user)
                    .collect();
                rows(RowShape::Reservations, visible.iter(), encode_reservation)
            }
            Command::SelectBookedDates { room_id } => {
                let days = engine.booked_dates(&room_id).await.map_err(engine_err)?;
                let rid = room_id.to_string();
                rows(RowShape::BookedDates, days.iter(), |enc, day| {
                    enc.encode_field(&rid)?;
                    enc.encode_field(&day.to_string())
                })
            }
            Command::SelectQuote {
                room_id,
                stay,
                breakfast,
            } => {
                let (quote, available) = engine
                    .quote_stay(&room_id, &stay, breakfast)
                    .await
                    .map_err(engine_err)?;
                let row = (room_id, stay, quote, available);
                rows(RowShape::Quotes, std::iter::once(&row), encode_quote)
            }
            Command::DeleteImage { key } => {
                self.images.delete(&key).await.map_err(|e| {
                    user_error("P0001", format!("image delete failed for {key}: {e}"))
                })?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
        }
    }

    /// Image cleanup is best effort: the catalog change already committed.
    async fn delete_image(&self, url: &str) {
        let Some(key) = image_key(url) else { return };
        if let Err(e) = self.images.delete(key).await {
            metrics::counter!(observability::IMAGE_DELETE_FAILURES_TOTAL).increment(1);
            warn!("failed to delete image {key}: {e}");
        }
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn schema(shape: RowShape) -> Vec<FieldInfo> {
    match shape {
        RowShape::Hotels => vec![
            text("id"),
            text("owner_id"),
            text("title"),
            text("description"),
            text("image"),
            text("country"),
            text("state"),
            text("city"),
            text("location_description"),
            text("amenities"),
        ],
        RowShape::Rooms => vec![
            text("id"),
            text("hotel_id"),
            text("title"),
            text("description"),
            text("image"),
            int("bed_count"),
            int("guest_count"),
            int("bathroom_count"),
            int("king_bed_count"),
            int("queen_bed_count"),
            int("room_price"),
            int("breakfast_price"),
            text("amenities"),
        ],
        RowShape::Reservations => vec![
            text("id"),
            text("room_id"),
            text("hotel_id"),
            text("hotel_owner_id"),
            text("user_id"),
            text("start"),
            text("end"),
            boolean("breakfast_included"),
            int("total_price"),
            text("payment_intent_id"),
            boolean("payment_confirmed"),
            int("created_at"),
            int("expires_at"),
        ],
        RowShape::BookedDates => vec![text("room_id"), text("day")],
        RowShape::Quotes => vec![
            text("room_id"),
            text("start"),
            text("end"),
            int("nights"),
            int("room_total"),
            int("breakfast_total"),
            int("total"),
            boolean("available"),
        ],
        RowShape::Checkout => vec![
            text("id"),
            text("payment_intent_id"),
            text("client_secret"),
            int("total_price"),
            int("expires_at"),
        ],
    }
}

fn rows<'a, T: 'a>(
    shape: RowShape,
    items: impl Iterator<Item = &'a T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema(shape));
    let rows: Vec<PgWireResult<_>> = items
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn amenity_list(set: &AmenitySet) -> String {
    set.iter().map(|a| a.as_str()).collect::<Vec<_>>().join(",")
}

fn wide(n: impl Into<u64>) -> i64 {
    i64::try_from(n.into()).unwrap_or(i64::MAX)
}

fn encode_hotel(enc: &mut DataRowEncoder, h: &Hotel) -> PgWireResult<()> {
    let d = &h.details;
    enc.encode_field(&h.id.to_string())?;
    enc.encode_field(&h.owner_id)?;
    enc.encode_field(&d.title)?;
    enc.encode_field(&d.description)?;
    enc.encode_field(&d.image)?;
    enc.encode_field(&d.country)?;
    enc.encode_field(&d.state)?;
    enc.encode_field(&d.city)?;
    enc.encode_field(&d.location_description)?;
    enc.encode_field(&amenity_list(&d.amenities))
}

fn encode_room(enc: &mut DataRowEncoder, r: &RoomInfo) -> PgWireResult<()> {
    let d = &r.details;
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.hotel_id.to_string())?;
    enc.encode_field(&d.title)?;
    enc.encode_field(&d.description)?;
    enc.encode_field(&d.image)?;
    for n in [
        d.bed_count,
        d.guest_count,
        d.bathroom_count,
        d.king_bed_count,
        d.queen_bed_count,
        d.room_price,
        d.breakfast_price,
    ] {
        enc.encode_field(&i64::from(n))?;
    }
    enc.encode_field(&amenity_list(&d.amenities))
}

fn encode_reservation(enc: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.room_id.to_string())?;
    enc.encode_field(&r.hotel_id.to_string())?;
    enc.encode_field(&r.hotel_owner_id)?;
    enc.encode_field(&r.user_id)?;
    enc.encode_field(&r.stay.start().to_string())?;
    enc.encode_field(&r.stay.end().to_string())?;
    enc.encode_field(&r.breakfast_included)?;
    enc.encode_field(&wide(r.total_price))?;
    enc.encode_field(&r.payment_intent_id)?;
    enc.encode_field(&r.payment_confirmed)?;
    enc.encode_field(&r.created_at)?;
    enc.encode_field(&r.expires_at)
}

fn encode_checkout(enc: &mut DataRowEncoder, c: &Checkout) -> PgWireResult<()> {
    enc.encode_field(&c.reservation.id.to_string())?;
    enc.encode_field(&c.reservation.payment_intent_id)?;
    enc.encode_field(&c.client_secret)?;
    enc.encode_field(&wide(c.quote.total))?;
    enc.encode_field(&c.reservation.expires_at)
}

fn encode_quote(
    enc: &mut DataRowEncoder,
    (room_id, stay, quote, available): &(ulid::Ulid, DateRange, Quote, bool),
) -> PgWireResult<()> {
    enc.encode_field(&room_id.to_string())?;
    enc.encode_field(&stay.start().to_string())?;
    enc.encode_field(&stay.end().to_string())?;
    enc.encode_field(&wide(quote.nights))?;
    enc.encode_field(&wide(quote.room_total))?;
    enc.encode_field(&wide(quote.breakfast_total))?;
    enc.encode_field(&wide(quote.total))?;
    enc.encode_field(available)
}

fn describe(sql: &str) -> Vec<FieldInfo> {
    sql::row_shape(sql).map(schema).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for InnkeepHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let user = self.session_user(client)?;
        Ok(vec![self.run(&user, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct InnkeepQueryParser;

#[async_trait]
impl QueryParser for InnkeepQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for InnkeepHandler {
    type Statement = String;
    type QueryParser = InnkeepQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let user = self.session_user(client)?;
        let sql = substitute_params(portal);
        self.run(&user, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            describe(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(describe(
            &target.statement.statement,
        )))
    }
}

/// A run of SQL text or a `$N` placeholder outside quoted literals.
#[derive(Debug, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

/// Split SQL into text runs and placeholders. `'...'` and `"..."` spans are
/// copied as text; a doubled quote closes and reopens the span, which
/// leaves the state unchanged.
fn split_params(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut quote: Option<u8> = None;
    let mut run = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let digits = i + 1;
                let mut j = digits;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if let Ok(n) = sql[digits..j].parse::<usize>()
                    && n > 0
                {
                    if run < i {
                        pieces.push(Piece::Text(&sql[run..i]));
                    }
                    pieces.push(Piece::Param(n));
                    run = j;
                    i = j;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    if run < bytes.len() {
        pieces.push(Piece::Text(&sql[run..]));
    }
    pieces
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    split_params(sql)
        .into_iter()
        .filter_map(|p| match p {
            Piece::Param(n) => Some(n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Replace each placeholder with its bound value (text format) in a single
/// pass. Values are never rescanned, so a `$1` inside one stays literal.
/// Placeholders without a bound value are left as written.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in split_params(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(n) => match params.get(n - 1) {
                Some(Some(bytes)) => {
                    let text = String::from_utf8_lossy(bytes.as_ref());
                    out.push('\'');
                    out.push_str(&text.replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => {
                    out.push('$');
                    out.push_str(&n.to_string());
                }
            },
        }
    }
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct InnkeepFactory {
    handler: Arc<InnkeepHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<InnkeepAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl InnkeepFactory {
    pub fn new(engine: Arc<Engine>, images: Arc<dyn ImageStore>, password: String) -> Self {
        let auth_source = InnkeepAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(InnkeepHandler::new(engine, images)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for InnkeepFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    images: Arc<dyn ImageStore>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = InnkeepFactory::new(engine, images, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        // exclusion_violation: the dates are taken
        EngineError::Unavailable { .. } => "23P01",
        EngineError::Forbidden(_) => "42501",
        _ => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
