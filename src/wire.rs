use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

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
use ulid::Ulid;

use crate::auth::SpacebookAuthSource;
use crate::engine::{Engine, EngineError, NewBooking, NewOrder};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct SpacebookHandler {
    engine: Arc<Engine>,
    request_timeout: Duration,
    query_parser: Arc<SpacebookQueryParser>,
}

impl SpacebookHandler {
    pub fn new(engine: Arc<Engine>, request_timeout: Duration) -> Self {
        Self {
            engine,
            request_timeout,
            query_parser: Arc::new(SpacebookQueryParser),
        }
    }

    /// The login name is the caller's user id.
    async fn resolve_token<C: ClientInfo>(&self, client: &C) -> PgWireResult<Token> {
        let login = client.metadata().get("user").cloned().unwrap_or_default();
        let Ok(user_id) = Ulid::from_string(&login) else {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(user_error("28000", format!("login is not a user id: {login}")));
        };
        let user = self
            .engine
            .repos()
            .users
            .get_by_id(user_id)
            .await
            .map_err(|e| engine_err(EngineError::internal("resolve user")(e)))?;
        match user {
            Some(user) => Ok(Token {
                user_id: user.id,
                role: user.role,
            }),
            None => {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(user_error("28000", format!("unknown user: {user_id}")))
            }
        }
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let token = self.resolve_token(client).await?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();

        let result = match tokio::time::timeout(self.request_timeout, self.execute_command(token, cmd)).await {
            Ok(result) => result,
            Err(_) => Err(Failure::Engine(EngineError::DeadlineExceeded)),
        };

        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);

        result.map_err(|failure| match failure {
            Failure::Engine(e) => {
                if label == "insert_booking" || label == "update_booking" {
                    metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => e.reason())
                        .increment(1);
                }
                engine_err(e)
            }
            Failure::Wire(e) => e,
        })
    }

    async fn execute_command(&self, token: Token, cmd: Command) -> Result<Vec<Response>, Failure> {
        let engine = &self.engine;
        match cmd {
            Command::InsertBooking {
                id,
                entity_id,
                time_from,
                time_to,
                user_id,
            } => {
                self.check_times(Some(time_from), Some(time_to))?;
                let owner = user_id.unwrap_or(token.user_id);
                if owner != token.user_id && token.role != Role::Admin {
                    return Err(EngineError::NoRights.into());
                }
                engine
                    .create_booking(NewBooking {
                        id,
                        entity_id,
                        user_id: owner,
                        span: Span::new(time_from, time_to),
                    })
                    .await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBooking {
                id,
                time_from,
                time_to,
            } => {
                self.check_times(time_from, time_to)?;
                engine.update_booking(&token, id, time_from, time_to).await?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                engine.delete_booking(&token, id).await?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectMyBookings => {
                let infos = engine.list_my_bookings(&token).await?;
                Ok(vec![booking_rows(infos)?])
            }
            Command::SelectBooking { id } => {
                let info = engine.get_booking(&token, id).await?;
                Ok(vec![booking_rows(vec![info])?])
            }
            Command::SelectAllBookings => {
                let infos = engine.list_all_bookings(&token).await?;
                Ok(vec![booking_rows(infos)?])
            }
            Command::SelectWorkload {
                entity_id,
                time_from,
                time_to,
            } => {
                self.check_times(Some(time_from), Some(time_to))?;
                let items = engine
                    .entity_workload(entity_id, Span::new(time_from, time_to))
                    .await?;
                Ok(vec![workload_rows(entity_id, items)?])
            }
            Command::SelectFloorWorkload {
                floor_id,
                time_from,
                time_to,
            } => {
                self.check_times(Some(time_from), Some(time_to))?;
                let items = engine
                    .floor_workload(floor_id, Span::new(time_from, time_to), token.user_id)
                    .await?;
                Ok(vec![floor_workload_rows(items)?])
            }
            Command::InsertOrder {
                id,
                booking_id,
                thing,
            } => {
                engine
                    .create_order(&token, NewOrder { id, booking_id, thing })
                    .await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectOrders { booking_id } => {
                let orders = engine.orders_for_booking(&token, booking_id).await?;
                Ok(vec![order_rows(orders)?])
            }
            Command::DeleteOrder { id } => {
                engine.delete_order(&token, id).await?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
        }
    }

    /// Bounds must be bucket-aligned and ordered when both are given.
    fn check_times(&self, from: Option<Ts>, to: Option<Ts>) -> Result<(), EngineError> {
        check_times(self.engine.workload_engine().bucket_secs(), from, to)
    }
}

fn check_times(bucket: Ts, from: Option<Ts>, to: Option<Ts>) -> Result<(), EngineError> {
    if let (Some(from), Some(to)) = (from, to)
        && from >= to
    {
        return Err(EngineError::InvalidBookingTime);
    }
    if [from, to].into_iter().flatten().any(|t| t.rem_euclid(bucket) != 0) {
        return Err(EngineError::InvalidBookingTime);
    }
    Ok(())
}

/// Why a statement failed after parsing.
enum Failure {
    Engine(EngineError),
    Wire(PgWireError),
}

impl From<EngineError> for Failure {
    fn from(e: EngineError) -> Self {
        Failure::Engine(e)
    }
}

impl From<PgWireError> for Failure {
    fn from(e: PgWireError) -> Self {
        Failure::Wire(e)
    }
}

// ── Row schemas ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("entity_id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("time_from", Type::INT8),
        field("time_to", Type::INT8),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
        field("entity_title", Type::VARCHAR),
        field("user_name", Type::VARCHAR),
        field("orders", Type::INT8),
    ]
}

fn workload_schema() -> Vec<FieldInfo> {
    vec![
        field("entity_id", Type::VARCHAR),
        field("time", Type::INT8),
        field("is_free", Type::BOOL),
    ]
}

fn floor_workload_schema() -> Vec<FieldInfo> {
    vec![
        field("entity_id", Type::VARCHAR),
        field("entity_type", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("capacity", Type::INT8),
        field("is_free", Type::BOOL),
    ]
}

fn order_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("booking_id", Type::VARCHAR),
        field("thing", Type::VARCHAR),
        field("completed", Type::BOOL),
        field("created_at", Type::INT8),
    ]
}

/// Result columns for a statement, by the table it reads.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("FLOOR_WORKLOAD") {
        floor_workload_schema()
    } else if upper.contains("WORKLOAD") {
        workload_schema()
    } else if upper.contains("ORDERS") {
        order_schema()
    } else if upper.contains("BOOKINGS") {
        booking_schema()
    } else {
        vec![]
    }
}

fn booking_rows(infos: Vec<BookingInfo>) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = infos
        .into_iter()
        .map(|info| {
            let b = &info.booking;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.entity_id.to_string())?;
            encoder.encode_field(&b.user_id.to_string())?;
            encoder.encode_field(&b.span.start)?;
            encoder.encode_field(&b.span.end)?;
            encoder.encode_field(&b.created_at)?;
            encoder.encode_field(&b.updated_at)?;
            encoder.encode_field(&info.entity.as_ref().map(|e| e.title.clone()))?;
            encoder.encode_field(&info.user.as_ref().map(|u| u.name.clone()))?;
            encoder.encode_field(&(info.orders.len() as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn workload_rows(entity_id: Ulid, items: Vec<WorkloadItem>) -> PgWireResult<Response> {
    let schema = Arc::new(workload_schema());
    let eid = entity_id.to_string();
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&eid)?;
            encoder.encode_field(&item.time)?;
            encoder.encode_field(&item.is_free)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn floor_workload_rows(items: Vec<FloorWorkloadItem>) -> PgWireResult<Response> {
    let schema = Arc::new(floor_workload_schema());
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&item.entity.id.to_string())?;
            encoder.encode_field(&item.entity.kind.as_str())?;
            encoder.encode_field(&item.entity.title)?;
            encoder.encode_field(&i64::from(item.entity.capacity))?;
            encoder.encode_field(&item.is_free)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn order_rows(orders: Vec<Order>) -> PgWireResult<Response> {
    let schema = Arc::new(order_schema());
    let rows: Vec<PgWireResult<_>> = orders
        .into_iter()
        .map(|order| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&order.id.to_string())?;
            encoder.encode_field(&order.booking_id.to_string())?;
            encoder.encode_field(&order.thing)?;
            encoder.encode_field(&order.completed)?;
            encoder.encode_field(&order.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for SpacebookHandler {
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
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SpacebookQueryParser;

#[async_trait]
impl QueryParser for SpacebookQueryParser {
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
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SpacebookHandler {
    type Statement = String;
    type QueryParser = SpacebookQueryParser;

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
        let mut responses = self.run(client, &sql).await?;
        Ok(responses.remove(0))
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
            schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SpacebookFactory {
    handler: Arc<SpacebookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SpacebookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SpacebookFactory {
    pub fn new(engine: Arc<Engine>, password: String, request_timeout: Duration) -> Self {
        let auth_source = SpacebookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SpacebookHandler::new(engine, request_timeout)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SpacebookFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    request_timeout: Duration,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = SpacebookFactory::new(engine, password, request_timeout);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, msg: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), msg)))
}

fn engine_err(e: EngineError) -> PgWireError {
    let (code, msg) = client_message(&e);
    user_error(code, msg)
}

/// SQLSTATE and client-visible text. Internal detail stays in the log.
fn client_message(e: &EngineError) -> (&'static str, String) {
    let code = e.category().sqlstate();
    match e {
        EngineError::Internal { .. } => {
            tracing::error!("internal error: {e}");
            (code, "internal error".into())
        }
        _ => {
            tracing::debug!("rejected: {e}");
            (code, e.to_string())
        }
    }
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q: Ts = 900;

    #[test]
    fn times_must_be_ordered() {
        assert!(check_times(Q, Some(0), Some(Q)).is_ok());
        assert!(matches!(
            check_times(Q, Some(Q), Some(Q)),
            Err(EngineError::InvalidBookingTime)
        ));
        assert!(matches!(
            check_times(Q, Some(2 * Q), Some(Q)),
            Err(EngineError::InvalidBookingTime)
        ));
    }

    #[test]
    fn times_must_be_bucket_aligned() {
        assert!(check_times(Q, Some(60), Some(Q)).is_err());
        assert!(check_times(Q, Some(0), Some(Q + 1)).is_err());
        assert!(check_times(Q, Some(-Q), Some(0)).is_ok());
    }

    #[test]
    fn partial_update_checks_only_given_bounds() {
        assert!(check_times(Q, None, Some(Q)).is_ok());
        assert!(check_times(Q, Some(5 * Q), None).is_ok());
        assert!(check_times(Q, None, Some(7)).is_err());
        assert!(check_times(Q, None, None).is_ok());
    }

    #[test]
    fn schema_follows_table() {
        let width = |sql: &str| schema_for(sql).len();
        assert_eq!(width("SELECT * FROM floor_workload WHERE floor_id = $1"), 5);
        assert_eq!(width("select * from workload"), 3);
        assert_eq!(width("SELECT * FROM orders WHERE booking_id = $1"), 5);
        assert_eq!(width("SELECT * FROM all_bookings"), 10);
        assert_eq!(width("SELECT * FROM bookings WHERE id = $1"), 10);
        assert_eq!(width("INSERT INTO bookings (id) VALUES ($1)"), 0);
    }

    #[test]
    fn count_params_takes_highest() {
        assert_eq!(count_params("SELECT 1"), 0);
        assert_eq!(count_params("VALUES ($1, $2, $10)"), 10);
    }

    #[test]
    fn substitute_quotes_and_nulls() {
        let params = vec![
            Some("it's".to_string()),
            None,
            Some("a".into()),
            Some("b".into()),
            Some("c".into()),
            Some("d".into()),
            Some("e".into()),
            Some("f".into()),
            Some("g".into()),
            Some("ten".into()),
        ];
        assert_eq!(
            substitute("VALUES ($1, $2, $10)", &params),
            "VALUES ('it''s', NULL, 'ten')"
        );
    }

    #[test]
    fn internal_errors_are_redacted() {
        let (code, msg) = client_message(&EngineError::Internal {
            op: "create booking",
            source: crate::repo::RepoError::Journal("disk full".into()),
        });
        assert_eq!(code, "XX000");
        assert_eq!(msg, "internal error");
    }

    #[test]
    fn domain_errors_keep_their_message() {
        let (code, msg) = client_message(&EngineError::NoRights);
        assert_eq!(code, "42501");
        assert_eq!(msg, EngineError::NoRights.to_string());

        let (code, _) = client_message(&EngineError::DeadlineExceeded);
        assert_eq!(code, "57014");
    }
}
