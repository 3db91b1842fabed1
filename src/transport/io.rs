use super::{Error, Transport, UsbTransport};

use std::time::Duration;

const WRITE_TIMEOUT: Duration = Duration::from_millis(5000);
const READ_TIMEOUT: Duration = Duration::from_millis(5000);

/// Larger writes are split so a single stalled transfer cannot hold a whole plane.
const MAX_TRANSFER: usize = 64 * 1024;

/// Writes that make no progress at all are retried this often before giving up.
const STALLED_WRITE_LIMIT: u32 = 3;

impl Transport for UsbTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        let out_addr = self.connection.out_addr;
        let mut offset = 0;
        let mut stalled = 0;

        while offset < data.len() {
            let end = (offset + MAX_TRANSFER).min(data.len());

            let written = match self
                .handle
                .write_bulk(out_addr, &data[offset..end], WRITE_TIMEOUT)
            {
                Ok(written) => written,
                Err(rusb::Error::Timeout) => 0,
                Err(err) => return Err(err.into()),
            };

            if written == 0 {
                stalled += 1;

                if stalled >= STALLED_WRITE_LIMIT {
                    return Err(Error::ShortWrite {
                        expected: data.len(),
                        written: offset,
                    });
                }

                continue;
            }

            // Partial writes happen; carry on where the device stopped.
            stalled = 0;
            offset += written;
        }

        log::trace!("-> {} bytes: {:02x?}", data.len(), &data[..data.len().min(32)]);

        Ok(())
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, Error> {
        let mut data = vec![0u8; max_len];

        let len = match self
            .handle
            .read_bulk(self.connection.in_addr, &mut data, READ_TIMEOUT)
        {
            Ok(len) => len,
            Err(rusb::Error::Timeout) => 0,
            Err(err) => return Err(err.into()),
        };

        data.truncate(len);
        log::trace!("<- {} bytes: {:02x?}", len, &data[..len.min(32)]);

        Ok(data)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(err) = self.handle.release_interface(self.connection.interface) {
            log::debug!("Releasing the USB interface failed: {}", err);
        }
    }
}
