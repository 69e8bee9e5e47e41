//! Parse (F) message.

use super::prelude::*;
use crate::net::c_string_buf;

/// Parse (F): prepared statement name, SQL text, parameter type OIDs.
#[derive(Debug, Clone, PartialEq)]
pub struct Parse {
    pub name: String,
    pub query: String,
    pub param_types: Vec<i32>,
}

impl Parse {
    pub fn new(name: impl ToString, query: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            query: query.to_string(),
            param_types: vec![],
        }
    }
}

impl ToBytes for Parse {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_string(&self.name);
        payload.put_string(&self.query);
        payload.put_i16(self.param_types.len() as i16);
        for oid in &self.param_types {
            payload.put_i32(*oid);
        }
        Ok(payload.freeze())
    }
}

impl FromBytes for Parse {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'P');
        let _len = bytes.get_i32();

        let name = c_string_buf(&mut bytes);
        let query = c_string_buf(&mut bytes);
        let count = bytes.get_i16();

        let mut param_types = Vec::with_capacity(count as usize);
        for _ in 0..count {
            param_types.push(bytes.get_i32());
        }

        Ok(Self {
            name,
            query,
            param_types,
        })
    }
}

impl Protocol for Parse {
    fn code(&self) -> char {
        'P'
    }
}
