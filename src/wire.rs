use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
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
use pgwire::messages::data::DataRow;
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::auth::FieldslotAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::{self, minutes_to_hhmm, Booking, PaymentSession, RevenueReport, SlotAvailability};
use crate::notify;
use crate::observability::{self, AUTH_FAILURES_TOTAL, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::venue::VenueManager;

const DEFAULT_VENUE: &str = "default";

static NEXT_PID: AtomicI32 = AtomicI32::new(1);

/// Statement handler for one client connection. Owns that connection's LISTEN set.
pub struct FieldslotHandler {
    venues: Arc<VenueManager>,
    query_parser: Arc<FieldslotQueryParser>,
    pid: i32,
    listening: Mutex<HashMap<String, broadcast::Receiver<String>>>,
}

impl FieldslotHandler {
    pub fn new(venues: Arc<VenueManager>) -> Self {
        Self {
            venues,
            query_parser: Arc::new(FieldslotQueryParser),
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            listening: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let venue = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| DEFAULT_VENUE.to_string());
        self.venues.get_or_create(&venue).map_err(|e| {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            user_error("08006", format!("venue error: {e}"))
        })
    }

    /// Parse, run and time one statement, then push any queued notifications so
    /// they reach the client ahead of the statement's own response.
    async fn handle<C>(&self, client: &mut C, query: &str) -> PgWireResult<Response>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        debug!("pid {} query: {query}", self.pid);
        let result = match self.resolve_engine(client) {
            Ok(engine) => match sql::parse_sql(query) {
                Ok(cmd) => {
                    let label = observability::command_label(&cmd);
                    let started = Instant::now();
                    let result = self.execute_command(&engine, cmd).await;
                    let status = if result.is_ok() { "ok" } else { "error" };
                    metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status)
                        .increment(1);
                    metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
                        .record(started.elapsed().as_secs_f64());
                    result
                }
                Err(e) => Err(sql_err(e)),
            },
            Err(e) => Err(e),
        };
        self.flush_notifications(client).await?;
        result
    }

    async fn flush_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let mut queued = Vec::new();
        {
            let mut listening = self.listening.lock().await;
            for (channel, rx) in listening.iter_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(payload) => queued.push((channel.clone(), payload)),
                        Err(TryRecvError::Lagged(n)) => {
                            warn!("pid {}: dropped {n} notifications on {channel}", self.pid);
                        }
                        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                    }
                }
            }
        }
        for (channel, payload) in queued {
            client
                .send(PgWireBackendMessage::NotificationResponse(
                    NotificationResponse::new(self.pid, channel, payload),
                ))
                .await?;
        }
        Ok(())
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertField {
                id,
                name,
                price,
                open_time,
                close_time,
                session_minutes,
            } => {
                engine
                    .register_field(id, &name, price, open_time, close_time, session_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeactivateField { id } => {
                engine.deactivate_field(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectFields => Ok(field_rows(engine.list_fields())),
            Command::ReserveSlots {
                field_id,
                user_id,
                date,
                slots,
            } => {
                let booking = engine
                    .reserve_slots(field_id, &user_id, date, slots)
                    .await
                    .map_err(engine_err)?;
                Ok(booking_rows(vec![booking]))
            }
            Command::ManualBooking {
                field_id,
                date,
                slots,
                manual_name,
                manual_contact,
            } => {
                let booking = engine
                    .create_manual_booking(field_id, date, slots, &manual_name, &manual_contact)
                    .await
                    .map_err(engine_err)?;
                Ok(booking_rows(vec![booking]))
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::CreatePaymentSession { booking_id } => {
                let session = engine
                    .create_payment_session(booking_id)
                    .await
                    .map_err(engine_err)?;
                Ok(session_rows(&session))
            }
            Command::AttachPaymentToken { booking_id, token } => {
                let booking = engine
                    .attach_payment_token(booking_id, &token)
                    .await
                    .map_err(engine_err)?;
                Ok(booking_rows(vec![booking]))
            }
            Command::PaymentNotification { payload } => {
                let ack = engine.handle_notification(&payload).await;
                Ok(ack_rows(&ack))
            }
            Command::SelectBookings { filter, page } => {
                let rows = engine.find_bookings(&filter, page).await.map_err(engine_err)?;
                Ok(booking_rows(rows))
            }
            Command::CountBookings { filter } => {
                let n = engine.count_bookings(&filter).await;
                Ok(count_rows(n))
            }
            Command::SelectAvailability { field_id, date } => {
                let slots = engine.availability(field_id, date).await.map_err(engine_err)?;
                Ok(availability_rows(field_id, date, &slots))
            }
            Command::SelectRevenue { from, to, field_id } => {
                let report = engine
                    .revenue_report(from, to, field_id)
                    .await
                    .map_err(engine_err)?;
                Ok(revenue_rows(&report))
            }
            Command::Listen { channel } => {
                if !notify::is_known_channel(&channel) {
                    return Err(user_error(
                        "42000",
                        format!(
                            "invalid channel: {channel} (expected field_{{id}} or {})",
                            notify::REFUND_REVIEW_CHANNEL
                        ),
                    ));
                }
                let mut listening = self.listening.lock().await;
                if !listening.contains_key(&channel) {
                    let rx = engine.notify.subscribe(&channel);
                    listening.insert(channel, rx);
                }
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                self.listening.lock().await.remove(&channel);
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.listening.lock().await.clear();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn column(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        column("id", Type::VARCHAR),
        column("field_id", Type::VARCHAR),
        column("user_id", Type::VARCHAR),
        column("booking_date", Type::VARCHAR),
        column("slots", Type::VARCHAR),
        column("start_time", Type::INT8),
        column("end_time", Type::INT8),
        column("total_price", Type::INT8),
        column("status", Type::VARCHAR),
        column("expired_at", Type::INT8),
        column("order_id", Type::VARCHAR),
        column("transaction_id", Type::VARCHAR),
        column("payment_token", Type::VARCHAR),
        column("payment_time", Type::INT8),
        column("manual_name", Type::VARCHAR),
        column("manual_contact", Type::VARCHAR),
        column("failure_reason", Type::VARCHAR),
        column("refund_review", Type::BOOL),
        column("created_at", Type::INT8),
        column("updated_at", Type::INT8),
    ]
}

fn field_schema() -> Vec<FieldInfo> {
    vec![
        column("id", Type::VARCHAR),
        column("name", Type::VARCHAR),
        column("price", Type::INT8),
        column("open_time", Type::INT8),
        column("close_time", Type::INT8),
        column("session_minutes", Type::INT8),
        column("active", Type::BOOL),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        column("field_id", Type::VARCHAR),
        column("booking_date", Type::VARCHAR),
        column("start_time", Type::INT8),
        column("label", Type::VARCHAR),
        column("state", Type::VARCHAR),
    ]
}

fn revenue_schema() -> Vec<FieldInfo> {
    vec![
        column("scope", Type::VARCHAR),
        column("key", Type::VARCHAR),
        column("revenue", Type::INT8),
        column("bookings", Type::INT8),
    ]
}

fn session_schema() -> Vec<FieldInfo> {
    vec![
        column("order_id", Type::VARCHAR),
        column("gross_amount", Type::INT8),
        column("item_id", Type::VARCHAR),
        column("item_price", Type::INT8),
        column("quantity", Type::INT8),
        column("item_name", Type::VARCHAR),
        column("finish_url", Type::VARCHAR),
        column("error_url", Type::VARCHAR),
        column("pending_url", Type::VARCHAR),
        column("expiry_minutes", Type::INT8),
        column("payload", Type::VARCHAR),
    ]
}

fn ack_schema() -> Vec<FieldInfo> {
    vec![column("order_id", Type::VARCHAR), column("outcome", Type::VARCHAR)]
}

fn count_schema() -> Vec<FieldInfo> {
    vec![column("count", Type::INT8)]
}

fn query_response(schema: Vec<FieldInfo>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(Arc::new(schema), stream::iter(rows)))
}

fn booking_rows(bookings: Vec<Booking>) -> Response {
    let schema = Arc::new(booking_schema());
    let rows = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.field_id.to_string())?;
            encoder.encode_field(&b.user_id)?;
            encoder.encode_field(&b.date.to_string())?;
            encoder.encode_field(&b.slots.to_string())?;
            encoder.encode_field(&i64::from(b.start_time))?;
            encoder.encode_field(&i64::from(b.end_time))?;
            encoder.encode_field(&b.total_price)?;
            encoder.encode_field(&b.status.as_str().to_string())?;
            encoder.encode_field(&b.expired_at)?;
            encoder.encode_field(&b.order_id)?;
            encoder.encode_field(&b.transaction_id)?;
            encoder.encode_field(&b.payment_token)?;
            encoder.encode_field(&b.payment_time)?;
            encoder.encode_field(&b.manual_name)?;
            encoder.encode_field(&b.manual_contact)?;
            encoder.encode_field(&b.failure_reason.map(|r| r.as_str().to_string()))?;
            encoder.encode_field(&b.refund_review)?;
            encoder.encode_field(&b.created_at)?;
            encoder.encode_field(&b.updated_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(booking_schema(), rows)
}

fn field_rows(fields: Vec<model::FieldInfo>) -> Response {
    let schema = Arc::new(field_schema());
    let rows = fields
        .iter()
        .map(|f| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&f.id.to_string())?;
            encoder.encode_field(&f.name)?;
            encoder.encode_field(&f.price)?;
            encoder.encode_field(&i64::from(f.open_time))?;
            encoder.encode_field(&i64::from(f.close_time))?;
            encoder.encode_field(&i64::from(f.session_minutes))?;
            encoder.encode_field(&f.active)?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(field_schema(), rows)
}

fn availability_rows(
    field_id: ulid::Ulid,
    date: chrono::NaiveDate,
    slots: &[SlotAvailability],
) -> Response {
    let schema = Arc::new(availability_schema());
    let (fid, day) = (field_id.to_string(), date.to_string());
    let rows = slots
        .iter()
        .map(|s| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&fid)?;
            encoder.encode_field(&day)?;
            encoder.encode_field(&i64::from(s.start))?;
            encoder.encode_field(&minutes_to_hhmm(s.start))?;
            encoder.encode_field(&s.state.as_str().to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(availability_schema(), rows)
}

/// One `total` row, then per-field and per-date breakdowns, each by revenue.
fn revenue_rows(report: &RevenueReport) -> Response {
    let schema = Arc::new(revenue_schema());
    let mut lines = vec![(
        "total",
        String::new(),
        report.total_revenue,
        report.total_bookings,
    )];
    lines.extend(
        report
            .by_field
            .iter()
            .map(|f| ("field", f.field_id.to_string(), f.revenue, f.bookings)),
    );
    lines.extend(
        report
            .by_date
            .iter()
            .map(|d| ("date", d.date.to_string(), d.revenue, d.bookings)),
    );
    let rows = lines
        .into_iter()
        .map(|(scope, key, revenue, bookings)| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&scope.to_string())?;
            encoder.encode_field(&key)?;
            encoder.encode_field(&revenue)?;
            encoder.encode_field(&(bookings as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    query_response(revenue_schema(), rows)
}

fn session_rows(session: &PaymentSession) -> Response {
    query_response(session_schema(), vec![encode_session(session)])
}

fn encode_session(session: &PaymentSession) -> PgWireResult<DataRow> {
    let payload = serde_json::to_string(session).unwrap_or_default();
    let mut encoder = DataRowEncoder::new(Arc::new(session_schema()));
    encoder.encode_field(&session.order_id)?;
    encoder.encode_field(&session.gross_amount)?;
    encoder.encode_field(&session.item.id)?;
    encoder.encode_field(&session.item.price)?;
    encoder.encode_field(&i64::from(session.item.quantity))?;
    encoder.encode_field(&session.item.name)?;
    encoder.encode_field(&session.callbacks.finish)?;
    encoder.encode_field(&session.callbacks.error)?;
    encoder.encode_field(&session.callbacks.pending)?;
    encoder.encode_field(&session.expiry_minutes)?;
    encoder.encode_field(&payload)?;
    Ok(encoder.take_row())
}

fn ack_rows(ack: &model::NotificationAck) -> Response {
    let encode = || -> PgWireResult<DataRow> {
        let mut encoder = DataRowEncoder::new(Arc::new(ack_schema()));
        encoder.encode_field(&ack.order_id)?;
        encoder.encode_field(&ack.outcome.to_string())?;
        Ok(encoder.take_row())
    };
    query_response(ack_schema(), vec![encode()])
}

fn count_rows(n: usize) -> Response {
    let encode = || -> PgWireResult<DataRow> {
        let mut encoder = DataRowEncoder::new(Arc::new(count_schema()));
        encoder.encode_field(&(n as i64))?;
        Ok(encoder.take_row())
    };
    query_response(count_schema(), vec![encode()])
}

/// Result columns a statement will produce, judged from its text alone so that
/// statements with unbound `$n` placeholders can be described.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';' || c == ',')
        .map(|w| w.trim_matches('"'))
        .filter(|w| !w.is_empty())
        .collect();
    let after = |keyword: &str| {
        words
            .iter()
            .position(|w| *w == keyword)
            .and_then(|i| words.get(i + 1))
            .copied()
    };
    match words.first().copied() {
        Some("SELECT") => match after("FROM") {
            Some("BOOKINGS") if words.get(1) == Some(&"COUNT") => count_schema(),
            Some("BOOKINGS") => booking_schema(),
            Some("FIELDS") => field_schema(),
            Some("AVAILABILITY") => availability_schema(),
            Some("REVENUE") => revenue_schema(),
            _ => vec![],
        },
        Some("INSERT") => match after("INTO") {
            Some("BOOKINGS" | "MANUAL_BOOKINGS" | "PAYMENT_TOKENS") => booking_schema(),
            Some("PAYMENT_SESSIONS") => session_schema(),
            Some("PAYMENT_NOTIFICATIONS") => ack_schema(),
            _ => vec![],
        },
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for FieldslotHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.handle(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct FieldslotQueryParser;

#[async_trait]
impl QueryParser for FieldslotQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for FieldslotHandler {
    type Statement = String;
    type QueryParser = FieldslotQueryParser;

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
        let sql = substitute_params(portal);
        self.handle(client, &sql).await
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound parameters as quoted text literals, highest index first so `$1`
/// never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct FieldslotFactory {
    handler: Arc<FieldslotHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<FieldslotAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl FieldslotFactory {
    pub fn new(venues: Arc<VenueManager>, password: String) -> Self {
        Self {
            handler: Arc::new(FieldslotHandler::new(venues)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                FieldslotAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for FieldslotFactory {
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

/// Serve one client until it disconnects. Each connection gets its own handler
/// so LISTEN state is never shared.
pub async fn process_connection(
    socket: TcpStream,
    venues: Arc<VenueManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(FieldslotFactory::new(venues, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::LockedReservation => "55P03",
        EngineError::SlotBooked { .. } | EngineError::ConstraintViolation { .. } => "23505",
        EngineError::SlotReserved { .. } | EngineError::UserReserved { .. } => "23P01",
        EngineError::Validation(_) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "42710",
        EngineError::FieldInactive(_) | EngineError::NotPending { .. } | EngineError::Expired(_) => {
            "55000"
        }
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), format!("{}: {e}", e.code()))
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
