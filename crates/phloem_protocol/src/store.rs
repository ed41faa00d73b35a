//! Object-store request/response framing.
//!
//! The object store is an external content-addressed service; clients and
//! workers talk to it over framed request/response exchanges. Requests and
//! responses share a header shape so both sides reuse the same packing code.
//!
//! Header Format: 36 bytes, Network Byte Order / Big Endian
//! ```text
//! [VER:1][TYPE:1][RES:2][REQ_ID:8][OBJECT_ID:16][PAYLOAD_LEN:8]
//! ```
//!
//! A payload frame follows the header frame iff `payload_len > 0`.

use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use phloem_ids::ObjectId;
use std::io::{Cursor, Read, Write};

/// Object-store protocol version
pub const STORE_PROTOCOL_VERSION: u8 = 0x01;

/// Object-store header size in bytes
pub const STORE_HEADER_SIZE: usize = 36;

/// Client -> Store request types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectRequestType {
    SetObject = 1,
    GetObject = 2,
    DeleteObject = 3,
}

impl ObjectRequestType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ObjectRequestType::SetObject),
            2 => Ok(ObjectRequestType::GetObject),
            3 => Ok(ObjectRequestType::DeleteObject),
            _ => Err(ProtocolError::InvalidRequestType(value)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Store -> Client response types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectResponseType {
    SetOk = 1,
    GetOk = 2,
    DelOk = 3,
    DelNotExists = 4,
    Error = 5,
}

impl ObjectResponseType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ObjectResponseType::SetOk),
            2 => Ok(ObjectResponseType::GetOk),
            3 => Ok(ObjectResponseType::DelOk),
            4 => Ok(ObjectResponseType::DelNotExists),
            5 => Ok(ObjectResponseType::Error),
            _ => Err(ProtocolError::InvalidResponseType(value)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

macro_rules! store_header {
    ($name:ident, $type_field:ident, $type_ty:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub version: u8,
            pub $type_field: $type_ty,
            pub reserved: u16,
            pub request_id: u64,
            pub object_id: ObjectId,
            pub payload_len: u64,
        }

        impl $name {
            pub fn new(
                $type_field: $type_ty,
                request_id: u64,
                object_id: ObjectId,
                payload_len: u64,
            ) -> Self {
                Self {
                    version: STORE_PROTOCOL_VERSION,
                    $type_field,
                    reserved: 0,
                    request_id,
                    object_id,
                    payload_len,
                }
            }

            /// Pack header into a 36-byte buffer
            pub fn pack(&self) -> Result<[u8; STORE_HEADER_SIZE]> {
                let mut buf = [0u8; STORE_HEADER_SIZE];
                let mut cursor = Cursor::new(&mut buf[..]);

                cursor.write_u8(self.version)?;
                cursor.write_u8(self.$type_field.as_u8())?;
                cursor.write_u16::<BigEndian>(self.reserved)?;
                cursor.write_u64::<BigEndian>(self.request_id)?;
                cursor.write_all(self.object_id.as_bytes())?;
                cursor.write_u64::<BigEndian>(self.payload_len)?;

                Ok(buf)
            }

            /// Unpack header from a 36-byte buffer
            pub fn unpack(data: &[u8]) -> Result<Self> {
                if data.len() < STORE_HEADER_SIZE {
                    return Err(ProtocolError::HeaderTooShort {
                        expected: STORE_HEADER_SIZE,
                        got: data.len(),
                    });
                }

                let mut cursor = Cursor::new(&data[..STORE_HEADER_SIZE]);

                let version = cursor.read_u8()?;
                let type_raw = cursor.read_u8()?;
                let reserved = cursor.read_u16::<BigEndian>()?;
                let request_id = cursor.read_u64::<BigEndian>()?;
                let mut object_id_bytes = [0u8; 16];
                cursor.read_exact(&mut object_id_bytes)?;
                let object_id = ObjectId::from_bytes(object_id_bytes);
                let payload_len = cursor.read_u64::<BigEndian>()?;

                if version != STORE_PROTOCOL_VERSION {
                    return Err(ProtocolError::VersionMismatch {
                        expected: STORE_PROTOCOL_VERSION,
                        got: version,
                    });
                }

                Ok(Self {
                    version,
                    $type_field: $type_ty::from_u8(type_raw)?,
                    reserved,
                    request_id,
                    object_id,
                    payload_len,
                })
            }
        }
    };
}

store_header!(ObjectRequestHeader, request_type, ObjectRequestType);
store_header!(ObjectResponseHeader, response_type, ObjectResponseType);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_roundtrip() {
        let object_id = ObjectId::new();
        let header = ObjectRequestHeader::new(ObjectRequestType::SetObject, 42, object_id, 1024);
        let packed = header.pack().unwrap();
        assert_eq!(packed.len(), STORE_HEADER_SIZE);

        let unpacked = ObjectRequestHeader::unpack(&packed).unwrap();
        assert_eq!(unpacked, header);
    }

    #[test]
    fn test_response_header_roundtrip() {
        for response_type in [
            ObjectResponseType::SetOk,
            ObjectResponseType::GetOk,
            ObjectResponseType::DelOk,
            ObjectResponseType::DelNotExists,
            ObjectResponseType::Error,
        ] {
            let header = ObjectResponseHeader::new(response_type, 7, ObjectId::new(), 0);
            let unpacked = ObjectResponseHeader::unpack(&header.pack().unwrap()).unwrap();
            assert_eq!(unpacked, header);
        }
    }

    #[test]
    fn test_bad_request_type() {
        let header = ObjectRequestHeader::new(ObjectRequestType::GetObject, 1, ObjectId::new(), 0);
        let mut packed = header.pack().unwrap().to_vec();
        packed[1] = 0xAB;

        let result = ObjectRequestHeader::unpack(&packed);
        assert!(matches!(result, Err(ProtocolError::InvalidRequestType(_))));
    }
}
