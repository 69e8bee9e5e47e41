//! ErrorResponse (B) message.

use super::prelude::*;
use crate::net::c_string_buf;

/// ErrorResponse (B) message.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub severity: String,
    pub code: String,
    pub message: String,
}

impl Default for ErrorResponse {
    fn default() -> Self {
        Self {
            severity: "ERROR".into(),
            code: String::default(),
            message: String::default(),
        }
    }
}

impl ErrorResponse {
    /// Handshake failure, including a wrong password.
    pub fn auth(message: impl ToString) -> ErrorResponse {
        ErrorResponse {
            severity: "ERROR".into(),
            code: "08006".into(),
            message: message.to_string(),
        }
    }

    /// The engine rejected a statement.
    pub fn engine(message: impl ToString) -> ErrorResponse {
        ErrorResponse {
            severity: "ERROR".into(),
            code: "XX000".into(),
            message: message.to_string(),
        }
    }
}

impl ToBytes for ErrorResponse {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());

        payload.put_u8(b'S');
        payload.put_string(&self.severity);
        payload.put_u8(b'C');
        payload.put_string(&self.code);
        payload.put_u8(b'M');
        payload.put_string(&self.message);
        payload.put_u8(0);

        Ok(payload.freeze())
    }
}

impl FromBytes for ErrorResponse {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'E');
        let _len = bytes.get_i32();

        let mut response = ErrorResponse::default();

        while bytes.has_remaining() {
            let field = bytes.get_u8();
            if field == 0 {
                break;
            }
            let value = c_string_buf(&mut bytes);

            match field as char {
                'S' => response.severity = value,
                'C' => response.code = value,
                'M' => response.message = value,
                _ => (),
            }
        }

        Ok(response)
    }
}

impl Protocol for ErrorResponse {
    fn code(&self) -> char {
        'E'
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn auth_failure_fields() {
        let error = ErrorResponse::auth("authentication failed");
        let decoded = ErrorResponse::from_bytes(error.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.severity, "ERROR");
        assert_eq!(decoded.code, "08006");
        assert_eq!(decoded.message, "authentication failed");
    }
}
