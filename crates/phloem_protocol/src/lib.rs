//! Binary Control Protocol
//!
//! Wire format for Client <-> Scheduler <-> Worker control traffic.
//! Control plane only - task payloads and results travel through the object
//! store, never through these frames.
//!
//! # Protocol Specification
//!
//! Header Format: 24 bytes, Network Byte Order / Big Endian
//! ```text
//! [VER:1][OP:1][RES:2][TASK_ID:16][LEN:4]
//! ```
//!
//! - VER (u8): Protocol version (0x01)
//! - OP (u8): OpCode
//! - RES (u16): Reserved for future use
//! - TASK_ID (16 bytes): Task ID the message refers to (invalid id when none)
//! - LEN (u32): Payload length in bytes

pub mod defaults;
pub mod error;
pub mod store;
pub mod types;

// Re-export types for convenience
pub use types::{
    deserialize_failure, serialize_failure, CancelTaskPayload, ErrorPayload, EvictTaskPayload,
    ProfileResult, Task, TaskDonePayload, TaskFailure, TaskState, WorkerByePayload,
    WorkerHelloPayload,
};

pub use store::{
    ObjectRequestHeader, ObjectRequestType, ObjectResponseHeader, ObjectResponseType,
    STORE_HEADER_SIZE, STORE_PROTOCOL_VERSION,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use error::{ProtocolError, Result};
use phloem_ids::TaskId;
use std::io::{Cursor, Read, Write};

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Header size in bytes
pub const HEADER_SIZE: usize = 24;

/// Control plane OpCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Unknown = 0,

    // Worker -> Scheduler (Handshake)
    WorkerHello = 1, // "I am here. My capabilities are [A, B, C], my queue holds N tasks."

    // Worker -> Scheduler (Departure)
    WorkerBye = 2, // "I am draining. Reassign my queue."

    // Client -> Scheduler (Submission)
    SubmitTask = 3, // "Run this task somewhere capable."

    // Scheduler -> Worker (Command)
    DispatchTask = 4, // "This task is yours. Fetch the payload and run it."

    // Scheduler -> Worker (Rebalance / cancel)
    EvictTask = 5, // "Drop this queued task. It is being reassigned or canceled."

    // Client -> Scheduler (Cancellation)
    CancelTask = 6, // "Cancel this task if it has not completed."

    // Scheduler -> Client (Cancellation confirmed)
    CancelAck = 7, // "The task was removed before it ran."

    // Worker -> Scheduler, Scheduler -> Client (Completion)
    TaskDone = 8, // "Task finished. Result object and state attached."

    // Bidirectional (Error)
    Err = 9, // "Something went wrong."
}

impl OpCode {
    /// Convert u8 to OpCode
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(OpCode::Unknown),
            1 => Ok(OpCode::WorkerHello),
            2 => Ok(OpCode::WorkerBye),
            3 => Ok(OpCode::SubmitTask),
            4 => Ok(OpCode::DispatchTask),
            5 => Ok(OpCode::EvictTask),
            6 => Ok(OpCode::CancelTask),
            7 => Ok(OpCode::CancelAck),
            8 => Ok(OpCode::TaskDone),
            9 => Ok(OpCode::Err),
            _ => Err(ProtocolError::InvalidOpCode(value)),
        }
    }

    /// Convert OpCode to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Protocol header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub opcode: OpCode,
    pub reserved: u16,
    pub task_id: TaskId,
    pub payload_len: u32,
}

impl Header {
    /// Create a new header
    pub fn new(opcode: OpCode, task_id: TaskId, payload_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode,
            reserved: 0,
            task_id,
            payload_len,
        }
    }

    /// Pack header into a 24-byte buffer
    pub fn pack(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);

        cursor.write_u8(self.version)?;
        cursor.write_u8(self.opcode.as_u8())?;
        cursor.write_u16::<BigEndian>(self.reserved)?;
        cursor.write_all(self.task_id.as_bytes())?;
        cursor.write_u32::<BigEndian>(self.payload_len)?;

        Ok(buf)
    }

    /// Unpack header from a 24-byte buffer
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::HeaderTooShort {
                expected: HEADER_SIZE,
                got: data.len(),
            });
        }

        let mut cursor = Cursor::new(&data[..HEADER_SIZE]);

        let version = cursor.read_u8()?;
        let op_raw = cursor.read_u8()?;
        let reserved = cursor.read_u16::<BigEndian>()?;
        let mut task_id_bytes = [0u8; 16];
        cursor.read_exact(&mut task_id_bytes)?;
        let task_id = TaskId::from_bytes(task_id_bytes);
        let payload_len = cursor.read_u32::<BigEndian>()?;

        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let opcode = OpCode::from_u8(op_raw)?;

        Ok(Self {
            version,
            opcode,
            reserved,
            task_id,
            payload_len,
        })
    }
}

/// Protocol message (header + payload)
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// Maximum payload size (4GB - 1, the max value of u32)
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

impl Message {
    /// Create a new message
    ///
    /// Returns an error if payload exceeds MAX_PAYLOAD_SIZE (4GB).
    pub fn new(opcode: OpCode, task_id: TaskId, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let header = Header::new(opcode, task_id, payload.len() as u32);
        Ok(Self { header, payload })
    }

    /// Pack message into ZMQ frames (header, payload)
    pub fn pack(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let header_bytes = self.header.pack()?.to_vec();
        Ok((header_bytes, self.payload.clone()))
    }

    /// Unpack message from ZMQ frames
    pub fn unpack(frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() < 2 {
            return Err(ProtocolError::InvalidFrameCount {
                expected: 2,
                got: frames.len(),
            });
        }

        let header = Header::unpack(&frames[0])?;
        let payload = frames[1].clone();

        // Validate payload length
        if payload.len() != header.payload_len as usize {
            return Err(ProtocolError::PayloadLengthMismatch {
                expected: header.payload_len as usize,
                got: payload.len(),
            });
        }

        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_pack_unpack() {
        let task_id = TaskId::new();
        let header = Header::new(OpCode::DispatchTask, task_id, 1024);
        let packed = header.pack().unwrap();

        assert_eq!(packed.len(), HEADER_SIZE);

        let unpacked = Header::unpack(&packed).unwrap();
        assert_eq!(unpacked.version, PROTOCOL_VERSION);
        assert_eq!(unpacked.opcode, OpCode::DispatchTask);
        assert_eq!(unpacked.task_id, task_id);
        assert_eq!(unpacked.payload_len, 1024);
    }

    #[test]
    fn test_header_roundtrip() {
        for opcode in [
            OpCode::WorkerHello,
            OpCode::SubmitTask,
            OpCode::EvictTask,
            OpCode::TaskDone,
        ] {
            let header = Header::new(opcode, TaskId::new(), 512);
            let packed = header.pack().unwrap();
            let unpacked = Header::unpack(&packed).unwrap();
            assert_eq!(header, unpacked);
        }
    }

    #[test]
    fn test_invalid_task_id_is_preserved() {
        let header = Header::new(OpCode::WorkerHello, TaskId::INVALID, 0);
        let unpacked = Header::unpack(&header.pack().unwrap()).unwrap();
        assert!(!unpacked.task_id.is_valid());
    }

    #[test]
    fn test_version_mismatch() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = 0xFF; // Invalid version

        let result = Header::unpack(&buf);
        assert!(matches!(result, Err(ProtocolError::VersionMismatch { .. })));
    }

    #[test]
    fn test_header_too_short() {
        let buf = [0u8; 8]; // Only 8 bytes
        let result = Header::unpack(&buf);
        assert!(matches!(result, Err(ProtocolError::HeaderTooShort { .. })));
    }

    #[test]
    fn test_message_pack_unpack() {
        let payload = b"Hello, Protocol!".to_vec();
        let task_id = TaskId::new();
        let msg = Message::new(OpCode::SubmitTask, task_id, payload.clone()).unwrap();

        let (header_bytes, payload_bytes) = msg.pack().unwrap();
        let frames = vec![header_bytes, payload_bytes];

        let unpacked = Message::unpack(&frames).unwrap();
        assert_eq!(unpacked.header.opcode, OpCode::SubmitTask);
        assert_eq!(unpacked.header.task_id, task_id);
        assert_eq!(unpacked.payload, payload);
    }

    #[test]
    fn test_message_payload_length_mismatch() {
        let msg = Message::new(OpCode::TaskDone, TaskId::new(), vec![1, 2, 3]).unwrap();
        let (header_bytes, _) = msg.pack().unwrap();
        let frames = vec![header_bytes, vec![1, 2]];

        let result = Message::unpack(&frames);
        assert!(matches!(
            result,
            Err(ProtocolError::PayloadLengthMismatch { .. })
        ));
    }
}
