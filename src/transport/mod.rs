use rusb::{DeviceHandle, GlobalContext};
use thiserror::Error;

use crate::family::FamilyKind;

/// Known printers and the family of protocol they speak.
mod model;
pub use model::Model;

/// Parsing of IEEE-1284 device id strings reported by USB printer class devices.
mod device_id;
pub use device_id::DeviceId;

/// Search the list of available USB devices, find a supported printer and attach it.
mod attach;
pub use attach::{discover, AttachFilter, Discovered};

/// Bulk reads and writes on the claimed interface.
mod io;

/// A scripted stand-in for a device, replaying canned replies.
pub mod script;
pub use script::ScriptedTransport;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("An USB error has occurred: {0}")]
    USBError(#[from] rusb::Error),

    #[error("No supported printer has been found.")]
    NoPrinter,

    #[error("The USB device for the printer offers no interface.")]
    NoInterface,

    #[error("The USB interface for the printer offers no descriptor.")]
    NoInterfaceDescriptor,

    #[error("The USB interface for the printer offers no bulk input endpoint.")]
    NoInEndpoint,

    #[error("The USB interface for the printer offers no bulk output endpoint.")]
    NoOutEndpoint,

    #[error("Claiming interface {interface} failed after {attempts} attempts: {source}")]
    ClaimFailed {
        interface: u8,
        attempts: u32,
        source: rusb::Error,
    },

    #[error("Short read from the printer (expected {expected} bytes, got {got}).")]
    ShortRead { expected: usize, got: usize },

    #[error("Short write to the printer (expected {expected} bytes, wrote {written}).")]
    ShortWrite { expected: usize, written: usize },

    #[error("The scripted device has no reply left.")]
    ScriptExhausted,
}

/// Byte pipe to the device. No protocol knowledge lives here.
pub trait Transport {
    fn send(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Return whatever the device yielded, at most `max_len` bytes.
    /// An empty reply is legal and means the device had nothing to say yet.
    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        (**self).send(data)
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, Error> {
        (**self).receive(max_len)
    }
}

/// Consecutive empty reads tolerated while collecting a reply.
const EMPTY_READ_LIMIT: u32 = 3;

/// Collect exactly `len` bytes, accepting replies split across several bulk transfers.
pub fn receive_exact<T: Transport + ?Sized>(transport: &mut T, len: usize) -> Result<Vec<u8>, Error> {
    let mut reply = Vec::with_capacity(len);
    let mut empty_reads = 0;

    while reply.len() < len {
        let chunk = transport.receive(len - reply.len())?;

        if chunk.is_empty() {
            empty_reads += 1;

            if empty_reads >= EMPTY_READ_LIMIT {
                return Err(Error::ShortRead {
                    expected: len,
                    got: reply.len(),
                });
            }

            continue;
        }

        empty_reads = 0;
        reply.extend_from_slice(&chunk);
    }

    reply.truncate(len);
    Ok(reply)
}

/// What we know about the attached device. Fixed after attach.
#[derive(Debug, Clone)]
pub struct Connection {
    pub model: Model,
    pub family: FamilyKind,
    pub interface: u8,
    pub in_addr: u8,
    pub out_addr: u8,
    pub serial_number: String,
    pub device_id: Option<DeviceId>,
}

impl Connection {
    pub fn vendor_id(&self) -> u16 {
        self.model.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.model.product_id()
    }
}

pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    connection: Connection,
}

impl UsbTransport {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_exact_joins_partial_replies() {
        let mut transport = ScriptedTransport::new()
            .reply(vec![1, 2])
            .reply(vec![])
            .reply(vec![3, 4, 5]);

        assert_eq!(receive_exact(&mut transport, 5).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn receive_exact_gives_up_on_silence() {
        let mut transport = ScriptedTransport::new()
            .reply(vec![1])
            .reply(vec![])
            .reply(vec![])
            .reply(vec![]);

        assert_eq!(
            receive_exact(&mut transport, 4),
            Err(Error::ShortRead {
                expected: 4,
                got: 1
            })
        );
    }
}
