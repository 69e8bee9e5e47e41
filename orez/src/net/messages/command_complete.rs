//! CommandComplete (B) message.

use super::prelude::*;
use crate::net::c_string_buf;

/// CommandComplete (B) with its command tag, e.g. `INSERT 0 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandComplete {
    pub command: String,
}

impl CommandComplete {
    pub fn new(command: impl ToString) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

impl ToBytes for CommandComplete {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_string(&self.command);
        Ok(payload.freeze())
    }
}

impl FromBytes for CommandComplete {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'C');
        let _len = bytes.get_i32();
        Ok(Self {
            command: c_string_buf(&mut bytes),
        })
    }
}

impl Protocol for CommandComplete {
    fn code(&self) -> char {
        'C'
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let complete = CommandComplete::new("SET");
        let decoded = CommandComplete::from_bytes(complete.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.command, "SET");
    }
}
