//! RowDescription (B) message.

use super::prelude::*;
use crate::net::c_string_buf;

const TEXT_OID: i32 = 25;

/// One column of a row description.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub table_oid: i32,
    pub column: i16,
    pub type_oid: i32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: i16,
}

impl Field {
    /// Text column. Everything we synthesize is reported as text.
    pub fn text(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            table_oid: 0,
            column: 0,
            type_oid: TEXT_OID,
            type_size: -1,
            type_modifier: -1,
            format: 0,
        }
    }
}

/// RowDescription (B) message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowDescription {
    pub fields: Vec<Field>,
}

impl RowDescription {
    pub fn new(fields: &[Field]) -> Self {
        Self {
            fields: fields.to_vec(),
        }
    }
}

impl ToBytes for RowDescription {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_i16(self.fields.len() as i16);

        for field in &self.fields {
            payload.put_string(&field.name);
            payload.put_i32(field.table_oid);
            payload.put_i16(field.column);
            payload.put_i32(field.type_oid);
            payload.put_i16(field.type_size);
            payload.put_i32(field.type_modifier);
            payload.put_i16(field.format);
        }

        Ok(payload.freeze())
    }
}

impl FromBytes for RowDescription {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'T');
        let _len = bytes.get_i32();
        let count = bytes.get_i16();

        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            fields.push(Field {
                name: c_string_buf(&mut bytes),
                table_oid: bytes.get_i32(),
                column: bytes.get_i16(),
                type_oid: bytes.get_i32(),
                type_size: bytes.get_i16(),
                type_modifier: bytes.get_i32(),
                format: bytes.get_i16(),
            });
        }

        Ok(Self { fields })
    }
}

impl Protocol for RowDescription {
    fn code(&self) -> char {
        'T'
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let rd = RowDescription::new(&[Field::text("systemid"), Field::text("timeline")]);
        let decoded = RowDescription::from_bytes(rd.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, rd);
        assert_eq!(decoded.fields[0].type_oid, TEXT_OID);
    }
}
