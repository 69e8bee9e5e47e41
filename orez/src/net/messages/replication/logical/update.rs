//! Update (`'U'`) message.

use super::super::super::code;
use super::super::super::prelude::*;
use super::tuple_data::TupleData;

/// Update with the new row image and, when the old image was captured,
/// the full old tuple (`'O'`).
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub oid: i32,
    pub old: Option<TupleData>,
    pub new: TupleData,
}

impl Update {
    pub fn new(oid: i32, old: Option<TupleData>, new: TupleData) -> Self {
        Self { oid, old, new }
    }
}

impl ToBytes for Update {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'U');
        payload.put_i32(self.oid);

        if let Some(old) = &self.old {
            payload.put_u8(b'O');
            old.to_buffer(&mut payload);
        }

        payload.put_u8(b'N');
        self.new.to_buffer(&mut payload);

        Ok(payload.freeze())
    }
}

impl FromBytes for Update {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'U');
        let oid = bytes.get_i32();

        let mut old = None;
        let identifier = bytes.get_u8() as char;

        let new = match identifier {
            'O' | 'K' => {
                old = Some(TupleData::from_buffer(&mut bytes)?);
                code!(bytes, 'N');
                TupleData::from_buffer(&mut bytes)?
            }
            'N' => TupleData::from_buffer(&mut bytes)?,
            c => return Err(Error::UnexpectedReplicationMessage(c)),
        };

        Ok(Self { oid, old, new })
    }
}

#[cfg(test)]
mod test {
    use super::super::tuple_data::Column;
    use super::*;

    #[test]
    fn roundtrip_with_old_image() {
        let update = Update::new(
            16385,
            Some(TupleData::new(vec![
                Column::Text("x".into()),
                Column::Text("1".into()),
            ])),
            TupleData::new(vec![Column::Text("x".into()), Column::Text("2".into())]),
        );

        let decoded = Update::from_bytes(update.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, update);
        assert_eq!(
            decoded.old.unwrap().column(1).unwrap().as_str(),
            Some("1")
        );
        assert_eq!(decoded.new.column(1).unwrap().as_str(), Some("2"));
    }

    #[test]
    fn roundtrip_without_old_image() {
        let update = Update::new(
            16385,
            None,
            TupleData::new(vec![Column::Text("x".into())]),
        );

        let decoded = Update::from_bytes(update.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, update);
    }
}
