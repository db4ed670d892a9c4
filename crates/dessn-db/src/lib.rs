//! Thin database access layer for the DES supernova tables.
//!
//! Everything above this crate talks to the database through the [`Gateway`]
//! trait: hand it SQL text, get back ordered rows of [`Value`]s keyed by
//! lower-case column name. The production implementation is [`PgGateway`].
use async_trait::async_trait;
use dessn_config::{AppConfig, DatabaseConfig, DesConfigError};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::{debug, instrument};

mod value;

pub use value::{Record, Value};

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("failed to connect to database")]
    Connect(#[source] sqlx::Error),
    #[error("query failed")]
    Query(#[from] sqlx::Error),
    #[error("column {column} has unsupported type {type_name}")]
    UnsupportedType { column: String, type_name: String },
    #[error("configuration error")]
    Config(#[from] DesConfigError),
    /// Only raised by in-memory test gateways, for a query they have no
    /// answer for; `PgGateway` never returns it.
    #[error("no scripted response matches query: {0}")]
    Unscripted(String),
}

/// Executes SQL text and returns the result set in the order the database
/// produced it. Callers rely on that order (see `ORDER BY` in the query
/// builders), so implementations must not reorder rows.
#[async_trait]
pub trait Gateway {
    async fn query(&self, sql: &str) -> Result<Vec<Record>, GatewayError>;
}

/// Gateway backed by a postgres connection pool
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub fn new(pool: PgPool) -> Self {
        PgGateway { pool }
    }
}

#[async_trait]
impl Gateway for PgGateway {
    #[instrument(skip_all, err)]
    async fn query(&self, sql: &str) -> Result<Vec<Record>, GatewayError> {
        debug!(sql, "running query");
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let records = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(n_rows = records.len(), "query returned");
        Ok(records)
    }
}

fn decode_row(row: &PgRow) -> Result<Record, GatewayError> {
    let mut record = Record::with_capacity(row.len());

    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name().to_lowercase();
        if row.try_get_raw(idx)?.is_null() {
            record.set(&name, Value::Null);
            continue;
        }

        let value = match column.type_info().name() {
            "INT2" => Value::Int(row.try_get::<i16, _>(idx)? as i64),
            "INT4" => Value::Int(row.try_get::<i32, _>(idx)? as i64),
            "INT8" => Value::Int(row.try_get::<i64, _>(idx)?),
            "FLOAT4" => Value::Float(row.try_get::<f32, _>(idx)? as f64),
            "FLOAT8" => Value::Float(row.try_get::<f64, _>(idx)?),
            "BOOL" => Value::Bool(row.try_get::<bool, _>(idx)?),
            // fixed-width CHAR columns come back space padded
            "BPCHAR" => Value::Text(row.try_get::<String, _>(idx)?.trim_end().to_string()),
            "TEXT" | "VARCHAR" | "NAME" => Value::Text(row.try_get::<String, _>(idx)?),
            "DATE" => Value::Text(row.try_get::<chrono::NaiveDate, _>(idx)?.to_string()),
            "TIMESTAMP" => Value::Text(
                row.try_get::<chrono::NaiveDateTime, _>(idx)?
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string(),
            ),
            other => {
                return Err(GatewayError::UnsupportedType {
                    column: name,
                    type_name: other.to_string(),
                })
            }
        };
        record.set(&name, value);
    }

    Ok(record)
}

#[instrument(skip_all, fields(host = %config.host, database = %config.name), err)]
pub async fn build_gateway_from_config(config: &DatabaseConfig) -> Result<PgGateway, GatewayError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect(&config.url())
        .await
        .map_err(GatewayError::Connect)?;
    Ok(PgGateway::new(pool))
}

/// Build the database gateway from app config
pub async fn build_gateway(app_config: &AppConfig) -> Result<PgGateway, GatewayError> {
    build_gateway_from_config(&app_config.database).await
}
