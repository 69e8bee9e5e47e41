//! Startup packet (F). The one message without a type byte:
//! `int32(length) + int32(request code) + key/value pairs`.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::prelude::*;
use crate::net::c_string_buf;

/// Client asks for TLS. We answer with a single `'N'`.
pub const SSL_REQUEST: i32 = 80877103;
/// Protocol version 3.0.
pub const PROTOCOL_V3: i32 = 196608;

#[derive(Debug, Clone)]
pub enum Startup {
    /// TLS handshake request.
    Ssl,
    /// Protocol 3.0 startup with connection parameters.
    Startup { params: Vec<(String, String)> },
}

impl Startup {
    /// Read a startup packet off the stream.
    pub async fn from_stream(stream: &mut (impl AsyncRead + Unpin)) -> Result<Self, Error> {
        let len = stream.read_i32().await?;
        if len < 8 {
            return Err(Error::IncompleteStartup);
        }

        let code = stream.read_i32().await?;
        let mut body = vec![0u8; len as usize - 8];
        stream.read_exact(&mut body).await?;

        Self::parse(code, Bytes::from(body))
    }

    /// Parse the request code and the key/value section.
    pub fn parse(code: i32, mut body: Bytes) -> Result<Self, Error> {
        match code {
            SSL_REQUEST => Ok(Startup::Ssl),
            PROTOCOL_V3 => {
                let mut params = vec![];

                while body.has_remaining() {
                    let name = c_string_buf(&mut body);
                    if name.is_empty() {
                        break;
                    }
                    let value = c_string_buf(&mut body);
                    params.push((name, value));
                }

                Ok(Startup::Startup { params })
            }
            code => Err(Error::UnsupportedStartup(code)),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        match self {
            Startup::Ssl => None,
            Startup::Startup { params } => params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
        }
    }

    pub fn user(&self) -> &str {
        self.parameter("user").unwrap_or("postgres")
    }

    pub fn database(&self) -> &str {
        self.parameter("database").unwrap_or("postgres")
    }

    /// `replication=database` marks a logical replication connection.
    pub fn replication(&self) -> bool {
        self.parameter("replication") == Some("database")
    }
}

impl ToBytes for Startup {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::new();

        match self {
            Startup::Ssl => payload.put_i32(SSL_REQUEST),
            Startup::Startup { params } => {
                payload.put_i32(PROTOCOL_V3);
                for (name, value) in params {
                    payload.put_string(name);
                    payload.put_string(value);
                }
                payload.put_u8(0);
            }
        }

        Ok(payload.freeze())
    }
}
