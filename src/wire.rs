use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

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

use crate::auth::{Actor, ShopAuthSource};
use crate::engine::{Engine, EngineError};
use crate::limits::UNDO_WINDOW_MS;
use crate::model::*;
use crate::site::SiteManager;
use crate::sql::{self, Command};
use crate::undo::UndoRegistry;

pub struct ShoptimeHandler {
    sites: Arc<SiteManager>,
    query_parser: Arc<ShoptimeQueryParser>,
    /// Per-connection undo windows; dropped with the connection.
    undo: Arc<UndoRegistry>,
}

impl ShoptimeHandler {
    pub fn new(sites: Arc<SiteManager>) -> Self {
        Self {
            sites,
            query_parser: Arc::new(ShoptimeQueryParser),
            undo: Arc::new(UndoRegistry::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.sites.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("site error: {e}"),
            )))
        })
    }

    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> Actor {
        let login = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_else(|| "anonymous".to_string());
        Actor::from_login(&login)
    }

    async fn execute_command(
        &self,
        engine: &Arc<Engine>,
        actor: &Actor,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.dispatch(engine, actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn dispatch(
        &self,
        engine: &Arc<Engine>,
        actor: &Actor,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let today = chrono::Utc::now().date_naive();
        match cmd {
            Command::CreateResource { id, name, category, capacity, certification } => {
                engine
                    .create_resource(actor, id, name, category, capacity, certification)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateResource { id, name, capacity, status, certification } => {
                let status = status.map(|s| parse_resource_status(&s)).transpose()?;
                let patch = crate::engine::ResourcePatch { name, capacity, status, certification };
                engine.update_resource(actor, id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteResource { id } => {
                engine.delete_resource(actor, id, today).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::AddHours { id, resource_id, weekday, start, end } => {
                engine
                    .add_hours(actor, id, resource_id, &weekday, &start, &end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RemoveHours { id } => {
                engine.remove_hours(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::RequestBooking { id, resource_id, date, start, end, purpose } => {
                engine
                    .request_booking(actor, id, resource_id, &date, &start, &end, purpose)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::EditBooking { id, version, date, start, end, purpose } => {
                let patch = crate::engine::BookingPatch { date, start, end, purpose };
                engine.edit_booking(actor, id, version, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SetBookingStatus { id, version, status } => {
                let status = parse_booking_status(&status)?;
                let (prior, new_version) = engine
                    .set_booking_status(actor, id, version, status)
                    .await
                    .map_err(engine_err)?;
                if status == BookingStatus::Cancelled {
                    self.arm_undo(engine, actor, id, new_version, prior);
                }
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CancelBooking { id, version } => {
                let (prior, new_version) = engine
                    .set_booking_status(actor, id, version, BookingStatus::Cancelled)
                    .await
                    .map_err(engine_err)?;
                self.arm_undo(engine, actor, id, new_version, prior);
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::Undo { key } => {
                let action = self.undo.invoke(&key).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "P0002".into(),
                        e.to_string(),
                    )))
                })?;
                action().await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UNDO").with_rows(1))])
            }
            Command::CreateSeries {
                id,
                resource_id,
                frequency,
                by_weekday,
                interval,
                start_date,
                until,
                count,
                start,
                end,
                purpose,
            } => {
                let spec = crate::engine::SeriesSpec {
                    id,
                    resource_id,
                    frequency,
                    by_weekday,
                    interval,
                    start_date,
                    until,
                    count,
                    start,
                    end,
                    purpose,
                };
                let expansion = engine.create_series(actor, spec, today).await.map_err(engine_err)?;
                metrics::counter!(crate::observability::SERIES_INSTANCES_TOTAL)
                    .increment(expansion.materialized.len() as u64);
                Ok(vec![Response::Execution(
                    Tag::new("INSERT").with_rows(expansion.materialized.len()),
                )])
            }
            Command::SetSeriesStatus { id, status } => {
                let status = parse_series_status(&status)?;
                engine
                    .set_series_status(actor, id, status, today)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectResources => {
                let rows = engine.list_resources();
                let schema = Arc::new(resources_schema());
                let encoded: Vec<PgWireResult<_>> = rows
                    .into_iter()
                    .map(|r| {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&r.id.to_string())?;
                        enc.encode_field(&r.name)?;
                        enc.encode_field(&r.category)?;
                        enc.encode_field(&(r.capacity as i64))?;
                        enc.encode_field(&r.certification)?;
                        enc.encode_field(&r.status.as_str())?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(encoded)))])
            }
            Command::SelectHours { resource_id } => {
                let rows = engine.get_hours(resource_id).await.map_err(engine_err)?;
                let schema = Arc::new(hours_schema());
                let encoded: Vec<PgWireResult<_>> = rows
                    .into_iter()
                    .map(|h| {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&h.id.to_string())?;
                        enc.encode_field(&h.resource_id.to_string())?;
                        enc.encode_field(&weekday_code(h.weekday))?;
                        enc.encode_field(&fmt_time(h.window.start))?;
                        enc.encode_field(&fmt_time(h.window.end))?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(encoded)))])
            }
            Command::SelectBookings { resource_id, date, status } => {
                let status = status.map(|s| parse_booking_status(&s)).transpose()?;
                let rows = engine
                    .get_bookings(resource_id, date.as_deref(), status)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(bookings_schema());
                let encoded: Vec<PgWireResult<_>> = rows
                    .into_iter()
                    .map(|b| {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&b.id.to_string())?;
                        enc.encode_field(&b.resource_id.to_string())?;
                        enc.encode_field(&b.member)?;
                        enc.encode_field(&b.date.to_string())?;
                        enc.encode_field(&fmt_time(b.range.start))?;
                        enc.encode_field(&fmt_time(b.range.end))?;
                        enc.encode_field(&b.status.as_str())?;
                        enc.encode_field(&b.purpose)?;
                        enc.encode_field(&b.series_id.map(|s| s.to_string()))?;
                        enc.encode_field(&(b.version as i64))?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(encoded)))])
            }
            Command::SelectSeries { resource_id } => {
                let rows = engine.list_series(resource_id);
                let schema = Arc::new(series_schema());
                let encoded: Vec<PgWireResult<_>> = rows
                    .into_iter()
                    .map(|s| {
                        let (until, count) = match s.rule.end {
                            RecurrenceEnd::Until(d) => (Some(d.to_string()), None),
                            RecurrenceEnd::Count(c) => (None, Some(c as i64)),
                        };
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&s.id.to_string())?;
                        enc.encode_field(&s.resource_id.to_string())?;
                        enc.encode_field(&s.member)?;
                        enc.encode_field(&s.rule.frequency.as_str())?;
                        enc.encode_field(&s.rule.by_weekday.map(|w| w.to_codes()))?;
                        enc.encode_field(&(s.rule.interval as i64))?;
                        enc.encode_field(&s.rule.start_date.to_string())?;
                        enc.encode_field(&until)?;
                        enc.encode_field(&count)?;
                        enc.encode_field(&fmt_time(s.range.start))?;
                        enc.encode_field(&fmt_time(s.range.end))?;
                        enc.encode_field(&s.status.as_str())?;
                        enc.encode_field(&(s.planned as i64))?;
                        enc.encode_field(&(s.materialized as i64))?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(encoded)))])
            }
            Command::SelectSkips { series_id } => {
                let rows = engine.get_skips(series_id).await.map_err(engine_err)?;
                let schema = Arc::new(skips_schema());
                let encoded: Vec<PgWireResult<_>> = rows
                    .into_iter()
                    .map(|s| {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&series_id.to_string())?;
                        enc.encode_field(&s.date.to_string())?;
                        enc.encode_field(&s.conflict_with.to_string())?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(encoded)))])
            }
            Command::SelectAvailability { resource_id, date, min_duration } => {
                let slots = engine
                    .compute_availability(resource_id, &date, min_duration)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rid = resource_id.to_string();
                let encoded: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&rid)?;
                        enc.encode_field(&date)?;
                        enc.encode_field(&fmt_time(slot.start))?;
                        enc.encode_field(&fmt_time(slot.end))?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(encoded)))])
            }
            Command::SelectConflicts { resource_id, date, start, end } => {
                let report = engine
                    .check_conflicts(resource_id, &date, &start, &end)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(conflicts_schema());
                let mut enc = DataRowEncoder::new(schema.clone());
                enc.encode_field(&report.verdict)?;
                enc.encode_field(&(report.overlapping as i64))?;
                enc.encode_field(&report.conflict_with.map(|c| c.to_string()))?;
                let rows = vec![Ok(enc.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAudit { entity } => {
                if !actor.can_view_audit() {
                    return Err(engine_err(EngineError::Forbidden(
                        "audit log requires tender role",
                    )));
                }
                let rows = engine.audit_entries(entity);
                let schema = Arc::new(audit_schema());
                let encoded: Vec<PgWireResult<_>> = rows
                    .into_iter()
                    .map(|a| {
                        let mut enc = DataRowEncoder::new(schema.clone());
                        enc.encode_field(&(a.seq as i64))?;
                        enc.encode_field(&a.at_ms)?;
                        enc.encode_field(&a.actor)?;
                        enc.encode_field(&a.action)?;
                        enc.encode_field(&a.entity.to_string())?;
                        Ok(enc.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(encoded)))])
            }
        }
    }

    /// Open the undo window for a cancellation just committed.
    fn arm_undo(
        &self,
        engine: &Arc<Engine>,
        actor: &Actor,
        id: ulid::Ulid,
        version_after_cancel: u64,
        prior: BookingStatus,
    ) {
        let engine = engine.clone();
        let actor = actor.clone();
        self.undo.register(
            id.to_string(),
            Duration::from_millis(UNDO_WINDOW_MS),
            Box::new(move || {
                Box::pin(async move {
                    engine.undo_cancel(&actor, id, version_after_cancel, prior).await
                })
            }),
        );
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("category"),
        int_field("capacity"),
        text_field("certification"),
        text_field("status"),
    ]
}

fn hours_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("resource_id"),
        text_field("weekday"),
        text_field("start"),
        text_field("end"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("resource_id"),
        text_field("member"),
        text_field("date"),
        text_field("start"),
        text_field("end"),
        text_field("status"),
        text_field("purpose"),
        text_field("series_id"),
        int_field("version"),
    ]
}

fn series_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("resource_id"),
        text_field("member"),
        text_field("frequency"),
        text_field("byweekday"),
        int_field("interval"),
        text_field("start_date"),
        text_field("until"),
        int_field("count"),
        text_field("start"),
        text_field("end"),
        text_field("status"),
        int_field("planned"),
        int_field("materialized"),
    ]
}

fn skips_schema() -> Vec<FieldInfo> {
    vec![text_field("series_id"), text_field("date"), text_field("conflict_with")]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text_field("resource_id"), text_field("date"), text_field("start"), text_field("end")]
}

fn conflicts_schema() -> Vec<FieldInfo> {
    vec![text_field("verdict"), int_field("overlapping"), text_field("conflict_with")]
}

fn audit_schema() -> Vec<FieldInfo> {
    vec![
        int_field("seq"),
        int_field("at_ms"),
        text_field("actor"),
        text_field("action"),
        text_field("entity"),
    ]
}

fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("CONFLICTS") {
        conflicts_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("SERIES") {
        series_schema()
    } else if upper.contains("SKIPS") {
        skips_schema()
    } else if upper.contains("HOURS") {
        hours_schema()
    } else if upper.contains("AUDIT") {
        audit_schema()
    } else if upper.contains("RESOURCES") {
        resources_schema()
    } else {
        vec![]
    }
}

fn fmt_time(t: chrono::NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn parse_booking_status(s: &str) -> PgWireResult<BookingStatus> {
    match BookingStatus::parse(s) {
        Some(status @ (BookingStatus::Approved | BookingStatus::Rejected | BookingStatus::Cancelled)) => {
            Ok(status)
        }
        _ => Err(PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "22000".into(),
            format!("status must be approved, rejected or cancelled, got '{s}'"),
        )))),
    }
}

fn parse_series_status(s: &str) -> PgWireResult<SeriesStatus> {
    SeriesStatus::parse(s).ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "22000".into(),
            format!("status must be active, paused or cancelled, got '{s}'"),
        )))
    })
}

fn parse_resource_status(s: &str) -> PgWireResult<ResourceStatus> {
    ResourceStatus::parse(s).ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "22000".into(),
            format!("status must be active, maintenance or retired, got '{s}'"),
        )))
    })
}

#[async_trait]
impl SimpleQueryHandler for ShoptimeHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, &actor, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ShoptimeQueryParser;

#[async_trait]
impl QueryParser for ShoptimeQueryParser {
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
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ShoptimeHandler {
    type Statement = String;
    type QueryParser = ShoptimeQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, &actor, cmd).await?;
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
            schema_for_statement(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for_statement(
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
                && n > max {
                    max = n;
                }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ShoptimeFactory {
    handler: Arc<ShoptimeHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ShopAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ShoptimeFactory {
    pub fn new(sites: Arc<SiteManager>, password: String) -> Self {
        let auth_source = ShopAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ShoptimeHandler::new(sites)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ShoptimeFactory {
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

/// Serve one client connection. Each connection gets its own handler,
/// and with it its own undo registry.
pub async fn process_connection(
    socket: TcpStream,
    sites: Arc<SiteManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = ShoptimeFactory::new(sites, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::InvalidRange(_) | EngineError::InvalidDate(_) | EngineError::InvalidRecurrence(_) => "22000",
        EngineError::SlotTaken { .. } | EngineError::VersionMismatch { .. } => "40001",
        EngineError::Forbidden(_) => "42501",
        EngineError::NotFound(_) => "P0002",
        _ => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), e.to_string())))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
