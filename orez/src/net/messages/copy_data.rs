//! CopyData (F & B) message.

use super::prelude::*;

/// CopyData (`'d'`). During replication, carries XLogData and keepalive
/// payloads in both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyData {
    bytes: Bytes,
}

impl CopyData {
    pub fn new(bytes: &Bytes) -> Self {
        Self {
            bytes: bytes.clone(),
        }
    }

    /// Inner payload.
    pub fn data(&self) -> Bytes {
        self.bytes.clone()
    }
}

impl ToBytes for CopyData {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = Payload::named(self.code());
        payload.put(&self.bytes);
        Ok(payload.freeze())
    }
}

impl FromBytes for CopyData {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'd');
        let _len = bytes.get_i32();
        Ok(Self { bytes })
    }
}

impl Protocol for CopyData {
    fn code(&self) -> char {
        'd'
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let copy = CopyData::new(&Bytes::from_static(b"payload"));
        let wire = copy.to_bytes().unwrap();
        assert_eq!(wire.len(), 1 + 4 + 7);

        let decoded = CopyData::from_bytes(wire).unwrap();
        assert_eq!(&decoded.data()[..], b"payload");
    }
}
