//! End-to-end select over one catalogued table.
//!
//! A request moves through `Validating -> Pruning -> ResolvingKeys -> (ShortCircuitEmpty |
//! Dispatching) -> Merging -> Draining -> Done`. Everything up to dispatch is shared with
//! [`Selectable::explain`], which stops before any object query is issued.

use std::fmt;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use log::{debug, info, warn};

use crate::collaborators::{Clients, ObjectQueryResponse};
use crate::config::SelectableConfig;
use crate::errors::{Result, SelectableError};
use crate::key_resolver::KeyResolver;
use crate::models::enums::{InputFormat, OutputFormat, SelectEvent};
use crate::models::structs::{EXPRESSION_TYPE_SQL, Explain, ObjectKey, ObjectQueryRequest, SelectRequest, TableInfo, TableRef};
use crate::query_ast::{
    Expr, QueryAstError, compile_object_query, get_limit, get_where_ast, parse_table_and_trailing_expr,
    project_partition_only, render_where,
};
use crate::select_stream::{RowBudget, SelectStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectPhase {
    Validating,
    Pruning,
    ResolvingKeys,
    ShortCircuitEmpty,
    Dispatching,
    Merging,
    Draining,
    Done,
}

impl fmt::Display for SelectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(self, f) }
}

/// Everything known about a request once planning is finished.
#[derive(Debug, Clone)]
pub struct PreparedSelect {
    pub table_info: TableInfo,
    pub partition_filter_clause: Option<String>,
    pub matched_partitions: Vec<String>,
    pub resolved_keys: Vec<ObjectKey>,
    pub rewritten_expression: String,
    pub per_key_limit: Option<u64>,
    pub global_limit: u64,
    pub input_format: InputFormat,
    pub output_format: OutputFormat,
    /// No partition matched; nothing is dispatched.
    pub short_circuit: bool,
}

impl From<PreparedSelect> for Explain {
    fn from(p: PreparedSelect) -> Self {
        Explain {
            table_info: p.table_info,
            partition_filter_clause: p.partition_filter_clause,
            matched_partitions: p.matched_partitions,
            resolved_keys: p.resolved_keys,
            rewritten_expression: p.rewritten_expression,
            per_key_limit: p.per_key_limit,
            global_limit: p.global_limit,
            short_circuit: p.short_circuit,
        }
    }
}

/// Local cap for each object query. Each key may contribute at most `limit` rows, so with at
/// least as many keys as rows one row per key is requested; otherwise the limit is spread evenly.
/// Only the global [`RowBudget`] makes the result exact.
pub fn per_key_limit(global_limit: u64, key_count: usize) -> Option<u64> {
    let keys = key_count as u64;
    match (global_limit, keys) {
        (0, _) | (_, 0) => None,
        (l, k) if k >= l => Some(1),
        (l, k) => Some(l.div_ceil(k)),
    }
}

/// Push-style consumption of a select.
#[derive(Default)]
pub struct SelectHandlers {
    on_event: Option<Box<dyn FnMut(&SelectEvent) + Send>>,
    on_data: Option<Box<dyn FnMut(&[u8]) + Send>>,
    on_end: Option<Box<dyn FnOnce() + Send>>,
}

impl SelectHandlers {
    pub fn new() -> Self { Self::default() }

    pub fn on_event(mut self, f: impl FnMut(&SelectEvent) + Send + 'static) -> Self {
        self.on_event = Some(Box::new(f));
        self
    }

    pub fn on_data(mut self, f: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.on_data = Some(Box::new(f));
        self
    }

    pub fn on_end(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }
}

struct ValidatedQuery {
    where_ast: Option<Expr>,
    global_limit: u64,
}

/// A select session bound to one `database.table`. Table metadata, partitions and key listings
/// are cached for the life of the instance; object queries never are.
pub struct Selectable {
    clients: Clients,
    resolver: KeyResolver,
    config: SelectableConfig,
}

impl Selectable {
    pub fn new(clients: Clients, database: impl Into<String>, table: impl Into<String>) -> Self {
        Self::with_config(clients, database, table, SelectableConfig::default())
    }

    pub fn with_config(
        clients: Clients,
        database: impl Into<String>,
        table: impl Into<String>,
        config: SelectableConfig,
    ) -> Self {
        let table = TableRef::new(database, table);
        let resolver = KeyResolver::new(clients.catalog.clone(), clients.object_store.clone(), table);
        Self { clients, resolver, config }
    }

    pub fn table(&self) -> &TableRef { self.resolver.table() }
    pub fn resolver(&self) -> &KeyResolver { &self.resolver }
    pub fn config(&self) -> &SelectableConfig { &self.config }

    fn enter(&self, phase: SelectPhase) { debug!("select on {}: {}", self.table(), phase); }

    /// Request checks that need no I/O.
    fn validate(&self, request: &SelectRequest) -> Result<ValidatedQuery> {
        self.enter(SelectPhase::Validating);
        if request.expression.trim().is_empty() {
            return Err(SelectableError::InvalidSelectParams("Expression is required".into()));
        }
        if !request.expression_type.eq_ignore_ascii_case(EXPRESSION_TYPE_SQL) {
            return Err(SelectableError::InvalidSelectParams(format!(
                "ExpressionType `{}` is not supported, only SQL",
                request.expression_type
            )));
        }
        match parse_table_and_trailing_expr(&request.expression) {
            Ok((target, _)) => {
                let own = self.table();
                if !(target.database.eq_ignore_ascii_case(&own.database) && target.table.eq_ignore_ascii_case(&own.table)) {
                    return Err(SelectableError::InvalidSelectParams(format!("query targets {}, session is bound to {}", target, own)));
                }
            }
            // `FROM s3Object` addresses the session's own table
            Err(QueryAstError::MissingDatabase(name)) if name.eq_ignore_ascii_case(&self.config.placeholder) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(ValidatedQuery { where_ast: get_where_ast(&request.expression)?, global_limit: get_limit(&request.expression) })
    }

    /// Plans a request up to, but not including, dispatch.
    pub async fn prepare(&self, request: &SelectRequest) -> Result<PreparedSelect> {
        let query = self.validate(request)?;

        self.enter(SelectPhase::Pruning);
        let info = self.resolver.get_table_info().await?.clone();
        let columns = &info.partition_columns;
        let (partition_filter_clause, matched_partitions) = if info.is_partitioned() {
            let clause = query.where_ast.as_ref().map(|w| render_where(&project_partition_only(w, columns)));
            debug!("partition filter for {}: {:?}", self.table(), clause);
            let matched = self.resolver.partition_index().await?.filter(clause.as_deref())?;
            (clause, matched)
        } else {
            (None, Vec::new())
        };
        let short_circuit = info.is_partitioned() && matched_partitions.is_empty();

        let resolved_keys = if short_circuit {
            self.enter(SelectPhase::ShortCircuitEmpty);
            info!("no partition of {} matches, nothing to query", self.table());
            Vec::new()
        } else {
            self.enter(SelectPhase::ResolvingKeys);
            self.resolver.resolve_keys(&matched_partitions).await?
        };

        let per_key_limit = per_key_limit(query.global_limit, resolved_keys.len());
        let rewritten_expression = compile_object_query(&request.expression, columns, &self.config.placeholder, per_key_limit)?;
        debug!(
            "{} partitions, {} keys, per-key limit {:?}, global limit {}",
            matched_partitions.len(),
            resolved_keys.len(),
            per_key_limit,
            query.global_limit
        );

        let input_format = request.input_format.unwrap_or(info.input_format);
        if !input_format.is_known() {
            warn!("input format of {} is unknown; passing it through to the object query service", self.table());
        }
        Ok(PreparedSelect {
            output_format: request.output_format.unwrap_or(self.config.output_format),
            input_format,
            table_info: info,
            partition_filter_clause,
            matched_partitions,
            resolved_keys,
            rewritten_expression,
            per_key_limit,
            global_limit: query.global_limit,
            short_circuit,
        })
    }

    /// Planning report; no object query is issued.
    pub async fn explain(&self, request: &SelectRequest) -> Result<Explain> {
        Ok(self.prepare(request).await?.into())
    }

    /// Dispatches one object query per resolved key and returns the merged stream. Rejects when any
    /// object query fails or answers without a payload.
    pub async fn select(&self, request: SelectRequest) -> Result<SelectStream> {
        let prepared = self.prepare(&request).await?;
        let budget = Arc::new(RowBudget::new(prepared.global_limit));
        if prepared.short_circuit || prepared.resolved_keys.is_empty() {
            return Ok(SelectStream::empty(budget));
        }

        self.enter(SelectPhase::Dispatching);
        info!("dispatching {} object queries for {}", prepared.resolved_keys.len(), self.table());
        let client = self.clients.object_query.clone();
        let prepared = &prepared;
        let sources = stream::iter(prepared.resolved_keys.iter().cloned())
            .map(|key| {
                let client = client.clone();
                let request = ObjectQueryRequest {
                    bucket: key.bucket.clone(),
                    key: key.key.clone(),
                    expression: prepared.rewritten_expression.clone(),
                    expression_type: EXPRESSION_TYPE_SQL.to_string(),
                    input_format: prepared.input_format,
                    output_format: prepared.output_format,
                };
                async move {
                    match client.query(request).await {
                        Ok(ObjectQueryResponse { payload: Some(events) }) => Ok((key, events)),
                        Ok(_) => Err(SelectableError::EmptyResultStream { key: key.to_string() }),
                        Err(source) => Err(SelectableError::ObjectQuery { key: key.to_string(), source }),
                    }
                }
            })
            .buffered(self.config.dispatch_concurrency.max(1))
            .try_collect::<Vec<_>>()
            .await?;

        self.enter(SelectPhase::Merging);
        Ok(SelectStream::new(sources, budget))
    }

    /// Drives the merged stream through `handlers`; `on_end` fires once after every source ended.
    /// Returns the number of rows delivered.
    pub async fn select_with_handlers(&self, request: SelectRequest, mut handlers: SelectHandlers) -> Result<u64> {
        let mut events = self.select(request).await?;
        self.enter(SelectPhase::Draining);
        while let Some(event) = events.next().await {
            let event = event?;
            if let Some(on_event) = handlers.on_event.as_mut() {
                on_event(&event);
            }
            if let Some(payload) = event.payload()
                && let Some(on_data) = handlers.on_data.as_mut()
            {
                on_data(payload);
            }
            if event == SelectEvent::End
                && let Some(on_end) = handlers.on_end.take()
            {
                on_end();
            }
        }
        self.enter(SelectPhase::Done);
        Ok(events.delivered())
    }

    /// Collects every delivered row payload.
    pub async fn select_all(&self, request: SelectRequest) -> Result<Vec<Vec<u8>>> {
        let mut events = self.select(request).await?;
        let mut rows = Vec::new();
        while let Some(event) = events.next().await {
            if let SelectEvent::Records { payload } = event? {
                rows.push(payload);
            }
        }
        Ok(rows)
    }
}

/// One-shot select: the table is taken from the statement's `FROM db.table` and a fresh session
/// is used, so nothing is cached between calls.
pub async fn select_table_sql(clients: Clients, sql: &str) -> Result<Vec<Vec<u8>>> {
    let (table, _) = parse_table_and_trailing_expr(sql)?;
    Selectable::new(clients, table.database, table.table).select_all(SelectRequest::sql(sql)).await
}
