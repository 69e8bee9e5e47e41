//! Insert (`'I'`) message.

use super::super::super::code;
use super::super::super::prelude::*;
use super::tuple_data::TupleData;

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub oid: i32,
    pub new: TupleData,
}

impl Insert {
    pub fn new(oid: i32, new: TupleData) -> Self {
        Self { oid, new }
    }
}

impl ToBytes for Insert {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'I');
        payload.put_i32(self.oid);
        payload.put_u8(b'N');
        self.new.to_buffer(&mut payload);

        Ok(payload.freeze())
    }
}

impl FromBytes for Insert {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'I');
        let oid = bytes.get_i32();
        code!(bytes, 'N');
        let new = TupleData::from_buffer(&mut bytes)?;

        Ok(Self { oid, new })
    }
}

#[cfg(test)]
mod test {
    use super::super::tuple_data::Column;
    use super::*;

    #[test]
    fn roundtrip() {
        let insert = Insert::new(
            16384,
            TupleData::new(vec![
                Column::Text("row1".into()),
                Column::Text("hello".into()),
            ]),
        );

        let decoded = Insert::from_bytes(insert.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, insert);
        assert_eq!(decoded.new.column(0).unwrap().as_str(), Some("row1"));
    }
}
