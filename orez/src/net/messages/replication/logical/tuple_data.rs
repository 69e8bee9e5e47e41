//! Tuple data shared by Insert, Update and Delete.

use super::super::super::prelude::*;

/// One column value. Everything is sent in text form.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Null,
    Text(String),
}

impl Column {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Column::Null => None,
            Column::Text(value) => Some(value),
        }
    }
}

/// `int16(n)` column values: `'n'` for NULL, `'t' + int32(len) + bytes`
/// for text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TupleData {
    pub columns: Vec<Column>,
}

impl TupleData {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Value of column at index.
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Parse from the middle of a larger message.
    pub fn from_buffer(bytes: &mut Bytes) -> Result<Self, Error> {
        let count = bytes.get_i16();
        let mut columns = Vec::with_capacity(count as usize);

        for _ in 0..count {
            match bytes.get_u8() as char {
                'n' => columns.push(Column::Null),
                't' => {
                    let len = bytes.get_i32();
                    let value = bytes.split_to(len as usize);
                    columns.push(Column::Text(String::from_utf8_lossy(&value).into_owned()));
                }
                c => return Err(Error::UnexpectedReplicationMessage(c)),
            }
        }

        Ok(Self { columns })
    }

    /// Write into a larger message.
    pub fn to_buffer(&self, buf: &mut BytesMut) {
        buf.put_i16(self.columns.len() as i16);

        for column in &self.columns {
            match column {
                Column::Null => buf.put_u8(b'n'),
                Column::Text(value) => {
                    buf.put_u8(b't');
                    buf.put_i32(value.len() as i32);
                    buf.put_slice(value.as_bytes());
                }
            }
        }
    }
}

impl FromBytes for TupleData {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        Self::from_buffer(&mut bytes)
    }
}

impl ToBytes for TupleData {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::new();
        self.to_buffer(&mut buf);
        Ok(buf.freeze())
    }
}
