//! DataRow (B) message.

use super::prelude::*;

/// DataRow (B). Columns are text or NULL; that's all the synthesized
/// responses ever need.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataRow {
    pub columns: Vec<Option<String>>,
}

impl DataRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text column.
    pub fn add(&mut self, value: impl ToString) -> &mut Self {
        self.columns.push(Some(value.to_string()));
        self
    }

    /// Append a NULL column.
    pub fn add_null(&mut self) -> &mut Self {
        self.columns.push(None);
        self
    }

    pub fn from_columns(columns: &[&str]) -> Self {
        let mut row = Self::new();
        for column in columns {
            row.add(column);
        }
        row
    }

    /// Text value at index.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.columns.get(index).and_then(|c| c.as_deref())
    }
}

impl ToBytes for DataRow {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put_i16(self.columns.len() as i16);

        for column in &self.columns {
            match column {
                Some(value) => {
                    payload.put_i32(value.len() as i32);
                    payload.put(value.as_bytes());
                }
                None => payload.put_i32(-1),
            }
        }

        Ok(payload.freeze())
    }
}

impl FromBytes for DataRow {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'D');
        let _len = bytes.get_i32();
        let count = bytes.get_i16();

        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = bytes.get_i32();
            if len < 0 {
                columns.push(None);
            } else {
                let value = bytes.split_to(len as usize);
                columns.push(Some(String::from_utf8_lossy(&value).into_owned()));
            }
        }

        Ok(Self { columns })
    }
}

impl Protocol for DataRow {
    fn code(&self) -> char {
        'D'
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_with_null() {
        let mut row = DataRow::new();
        row.add("1234567890").add_null().add("postgres");

        let decoded = DataRow::from_bytes(row.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.get(0), Some("1234567890"));
        assert_eq!(decoded.columns[1], None);
        assert_eq!(decoded.get(2), Some("postgres"));
    }

    #[test]
    fn unicode_roundtrip() {
        let mut row = DataRow::new();
        row.add("日本語 🎉");

        let decoded = DataRow::from_bytes(row.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.get(0), Some("日本語 🎉"));
    }
}
