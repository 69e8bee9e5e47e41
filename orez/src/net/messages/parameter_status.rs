//! ParameterStatus (B) message.

use super::prelude::*;
use crate::net::c_string_buf;

/// ParameterStatus (B) message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

impl<T: ToString> From<(T, T)> for ParameterStatus {
    fn from(value: (T, T)) -> Self {
        Self {
            name: value.0.to_string(),
            value: value.1.to_string(),
        }
    }
}

impl ParameterStatus {
    /// Fake parameter set reported after authentication. Makes the
    /// connection look like a legitimate PostgreSQL 16.4 server.
    pub fn fake() -> Vec<ParameterStatus> {
        vec![
            ("server_version", "16.4").into(),
            ("server_encoding", "UTF8").into(),
            ("client_encoding", "UTF8").into(),
            ("DateStyle", "ISO, MDY").into(),
            ("integer_datetimes", "on").into(),
            ("standard_conforming_strings", "on").into(),
            ("TimeZone", "UTC").into(),
            ("IntervalStyle", "postgres").into(),
        ]
    }
}

impl ToBytes for ParameterStatus {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_string(&self.name);
        payload.put_string(&self.value);
        Ok(payload.freeze())
    }
}

impl FromBytes for ParameterStatus {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'S');
        let _len = bytes.get_i32();

        Ok(Self {
            name: c_string_buf(&mut bytes),
            value: c_string_buf(&mut bytes),
        })
    }
}

impl Protocol for ParameterStatus {
    fn code(&self) -> char {
        'S'
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let status: ParameterStatus = ("TimeZone", "UTC").into();
        let decoded = ParameterStatus::from_bytes(status.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn fake_set_reports_16_4() {
        let fake = ParameterStatus::fake();
        let version = fake.iter().find(|p| p.name == "server_version").unwrap();
        assert_eq!(version.value, "16.4");
        assert_eq!(fake.len(), 8);
    }
}
