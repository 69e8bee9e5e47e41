//! Query (F) message.

use super::prelude::*;
use crate::net::c_string_buf;

/// Simple Query (F). Serializing recomputes the length field, so rewritten
/// SQL re-frames correctly.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub query: String,
}

impl Query {
    pub fn new(query: impl ToString) -> Self {
        Self {
            query: query.to_string(),
        }
    }
}

impl ToBytes for Query {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_string(&self.query);
        Ok(payload.freeze())
    }
}

impl FromBytes for Query {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'Q');
        let _len = bytes.get_i32();
        Ok(Self {
            query: c_string_buf(&mut bytes),
        })
    }
}

impl Protocol for Query {
    fn code(&self) -> char {
        'Q'
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_recomputes_length() {
        let query = Query::new("SELECT version()");
        let bytes = query.to_bytes().unwrap();
        assert_eq!(bytes.len(), 1 + 4 + "SELECT version()".len() + 1);

        let decoded = Query::from_bytes(bytes).unwrap();
        assert_eq!(decoded.query, "SELECT version()");
    }
}
