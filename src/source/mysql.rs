//! MySQL Source
//!
//! sqlx-backed metadata queries plus the mysql_async replication stream.

use async_trait::async_trait;
use mysql_async::{Opts, OptsBuilder};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{MySqlPool, Row};

use super::{BinlogPosition, ReplicationStream, SourceConnection, StreamRequest};
use crate::binlog::{BinlogClient, Value};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::sql::{Escape, MySqlEscape};

/// Connection to a MySQL source server
pub struct MySqlSource {
    pool: MySqlPool,
    config: DatabaseConfig,
    escape: MySqlEscape,
}

impl MySqlSource {
    /// Connect and detect the server's string quoting rules
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.connect_timeout())
            .connect_with(options)
            .await?;

        let sql_mode: String = sqlx::query_scalar("SELECT CAST(@@sql_mode AS CHAR)")
            .fetch_one(&pool)
            .await?;
        let escape = MySqlEscape::from_sql_mode(&sql_mode);

        tracing::info!(
            "Connected to {}:{} (no_backslash_escapes={})",
            config.host,
            config.port,
            escape.no_backslash_escapes
        );

        Ok(Self {
            pool,
            config: config.clone(),
            escape,
        })
    }

    /// Connection options for the replication connection
    fn replication_opts(&self) -> Opts {
        OptsBuilder::default()
            .ip_or_hostname(self.config.host.clone())
            .tcp_port(self.config.port)
            .user(Some(self.config.user.clone()))
            .pass(Some(self.config.password.clone()))
            .into()
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl Escape for MySqlSource {
    fn escape(&self, value: &Value) -> String {
        self.escape.escape(value)
    }
}

#[async_trait]
impl SourceConnection for MySqlSource {
    async fn master_status(&self) -> Result<BinlogPosition> {
        // MySQL 8.4 renamed the statement
        let row = match sqlx::query("SHOW MASTER STATUS")
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row,
            Err(e) => {
                tracing::debug!("SHOW MASTER STATUS failed ({}), retrying as SHOW BINARY LOG STATUS", e);
                sqlx::query("SHOW BINARY LOG STATUS")
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        let row = row.ok_or_else(|| {
            Error::config("binary logging is not enabled on the source server")
        })?;
        Ok(BinlogPosition::new(text(&row, 0)?, row.try_get::<u64, _>(1)?))
    }

    async fn master_logs(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SHOW MASTER LOGS")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| text(row, 0)).collect()
    }

    async fn server_id(&self) -> Result<Option<u32>> {
        let id: u64 = sqlx::query_scalar("SELECT CAST(@@server_id AS UNSIGNED)")
            .fetch_one(&self.pool)
            .await?;

        Ok(u32::try_from(id).ok().filter(|id| *id != 0))
    }

    fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    async fn open_stream(&self, request: StreamRequest) -> Result<Box<dyn ReplicationStream>> {
        let client = BinlogClient::connect(self.replication_opts(), self.pool.clone(), request).await?;
        Ok(Box::new(client))
    }
}

/// Read a text column that some servers report as binary
fn text(row: &MySqlRow, index: usize) -> Result<String> {
    match row.try_get::<String, _>(index) {
        Ok(s) => Ok(s),
        Err(_) => {
            let bytes: Vec<u8> = row.try_get(index)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}
