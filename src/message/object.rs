use super::Message;
use crate::error::MessageError;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::{Ipv4Addr, SocketAddrV4};

const TAG_BLOB: u8 = 0;
const TAG_INET4: u8 = 1;

/// The tagged "object" slot of the wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectSlot {
    /// Tag 0: 4-byte length, then an opaque serialized blob.
    Blob(Bytes),
    /// Tag 1: 2-byte port, then the 4 address bytes.
    Inet4(SocketAddrV4),
}

impl Message {
    pub fn push_slot(&mut self, slot: &ObjectSlot) -> Result<(), MessageError> {
        match slot {
            ObjectSlot::Blob(blob) => {
                let len =
                    u32::try_from(blob.len()).map_err(|_| MessageError::MalformedLength(blob.len()))?;
                self.push(blob);
                self.push_u32(len);
                self.push_u8(TAG_BLOB);
            }
            ObjectSlot::Inet4(addr) => self.push_socket_addr(*addr),
        }
        Ok(())
    }

    /// Pops one slot. Nothing is consumed unless the whole slot is present.
    pub fn pop_slot(&mut self) -> Result<ObjectSlot, MessageError> {
        let mut head = [0u8; 7];
        match self.peek_u8()? {
            TAG_INET4 => {
                self.peek_into(&mut head)?;
                self.consume(head.len());
                let port = u16::from_be_bytes([head[1], head[2]]);
                let ip = Ipv4Addr::new(head[3], head[4], head[5], head[6]);
                Ok(ObjectSlot::Inet4(SocketAddrV4::new(ip, port)))
            }
            TAG_BLOB => {
                let mut prefix = [0u8; 5];
                self.peek_into(&mut prefix)?;
                let n = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
                if self.len() < prefix.len() + n {
                    return Err(MessageError::EndOfData {
                        needed: prefix.len() + n,
                        available: self.len(),
                    });
                }
                self.consume(prefix.len());
                self.pop(n).map(ObjectSlot::Blob)
            }
            tag => Err(MessageError::InvalidTag(tag)),
        }
    }

    /// Serializes `value` with `serde_json` into a blob slot.
    pub fn push_object<T: Serialize>(&mut self, value: &T) -> Result<(), MessageError> {
        let blob = serde_json::to_vec(value).map_err(MessageError::Encode)?;
        self.push_slot(&ObjectSlot::Blob(blob.into()))
    }

    pub fn pop_object<T: DeserializeOwned>(&mut self) -> Result<T, MessageError> {
        match self.peek_u8()? {
            TAG_BLOB => {}
            tag => return Err(MessageError::InvalidTag(tag)),
        }
        match self.pop_slot()? {
            ObjectSlot::Blob(blob) => serde_json::from_slice(&blob).map_err(MessageError::Decode),
            ObjectSlot::Inet4(_) => Err(MessageError::InvalidTag(TAG_INET4)),
        }
    }

    pub fn push_socket_addr(&mut self, addr: SocketAddrV4) {
        self.push(&addr.ip().octets());
        self.push_u16(addr.port());
        self.push_u8(TAG_INET4);
    }

    pub fn pop_socket_addr(&mut self) -> Result<SocketAddrV4, MessageError> {
        match self.peek_u8()? {
            TAG_INET4 => match self.pop_slot()? {
                ObjectSlot::Inet4(addr) => Ok(addr),
                ObjectSlot::Blob(_) => Err(MessageError::InvalidTag(TAG_BLOB)),
            },
            tag => Err(MessageError::InvalidTag(tag)),
        }
    }
}
