//! Delete (`'D'`) message.

use super::super::super::code;
use super::super::super::prelude::*;
use super::tuple_data::TupleData;

/// Delete carrying the key tuple of the removed row.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub oid: i32,
    pub key: TupleData,
}

impl Delete {
    pub fn new(oid: i32, key: TupleData) -> Self {
        Self { oid, key }
    }
}

impl ToBytes for Delete {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'D');
        payload.put_i32(self.oid);
        payload.put_u8(b'K');
        self.key.to_buffer(&mut payload);

        Ok(payload.freeze())
    }
}

impl FromBytes for Delete {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'D');
        let oid = bytes.get_i32();

        let identifier = bytes.get_u8() as char;
        let key = match identifier {
            'K' | 'O' => TupleData::from_buffer(&mut bytes)?,
            c => return Err(Error::UnexpectedReplicationMessage(c)),
        };

        Ok(Self { oid, key })
    }
}

#[cfg(test)]
mod test {
    use super::super::tuple_data::Column;
    use super::*;

    #[test]
    fn roundtrip() {
        let delete = Delete::new(
            16386,
            TupleData::new(vec![Column::Text("y".into()), Column::Text("7".into())]),
        );

        let decoded = Delete::from_bytes(delete.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, delete);
        assert_eq!(decoded.key.column(0).unwrap().as_str(), Some("y"));
    }
}
