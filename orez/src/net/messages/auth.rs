//! Authentication (B) and PasswordMessage (F).

use super::prelude::*;
use crate::net::c_string_buf;

/// Authentication request/acknowledgement (B). We only speak cleartext.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Authentication {
    Ok,
    CleartextPassword,
}

impl ToBytes for Authentication {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());

        match self {
            Authentication::Ok => payload.put_i32(0),
            Authentication::CleartextPassword => payload.put_i32(3),
        }

        Ok(payload.freeze())
    }
}

impl FromBytes for Authentication {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'R');
        let _len = bytes.get_i32();

        match bytes.get_i32() {
            0 => Ok(Authentication::Ok),
            3 => Ok(Authentication::CleartextPassword),
            _ => Err(Error::Malformed),
        }
    }
}

impl Protocol for Authentication {
    fn code(&self) -> char {
        'R'
    }
}

/// PasswordMessage (F).
#[derive(Debug, Clone)]
pub struct Password {
    pub password: String,
}

impl Password {
    pub fn new(password: impl ToString) -> Self {
        Self {
            password: password.to_string(),
        }
    }
}

impl ToBytes for Password {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_string(&self.password);
        Ok(payload.freeze())
    }
}

impl FromBytes for Password {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'p');
        let _len = bytes.get_i32();
        Ok(Self {
            password: c_string_buf(&mut bytes),
        })
    }
}

impl Protocol for Password {
    fn code(&self) -> char {
        'p'
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn authentication_roundtrip() {
        for auth in [Authentication::Ok, Authentication::CleartextPassword] {
            let decoded = Authentication::from_bytes(auth.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded, auth);
        }
    }

    #[test]
    fn password_roundtrip() {
        let password = Password::new("hunter2");
        let decoded = Password::from_bytes(password.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.password, "hunter2");
    }
}
