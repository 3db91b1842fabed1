use super::{model::Model, Connection, DeviceId, Error, UsbTransport};
use crate::family::FamilyKind;

use std::thread;
use std::time::Duration;

/// The kernel or another backend may hold the interface for a moment.
const CLAIM_ATTEMPTS: u32 = 10;
const CLAIM_RETRY_DELAY: Duration = Duration::from_secs(1);

const CONTROL_TIMEOUT: Duration = Duration::from_millis(5000);

/// USB printer class request to fetch the IEEE-1284 device id.
const REQUEST_TYPE_CLASS_IN_INTERFACE: u8 = 0xa1;
const REQUEST_GET_DEVICE_ID: u8 = 0x00;

/// Restricts which attached printer we take.
#[derive(Debug, Clone, Default)]
pub struct AttachFilter {
    pub extra_model: Option<Model>,
    pub family: Option<FamilyKind>,
    pub serial_number: Option<String>,
}

/// A supported printer seen during discovery.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub model: Model,
    pub serial_number: String,
    pub device_id: Option<DeviceId>,
}

impl Discovered {
    /// Manufacturer and model as the device names itself, or our table entry.
    pub fn make_and_model(&self) -> String {
        match self
            .device_id
            .as_ref()
            .and_then(|id| Some((id.manufacturer()?, id.model()?)))
        {
            Some((mfg, mdl)) => format!("{} {}", mfg, mdl),
            None => self.model.to_string(),
        }
    }
}

fn supported_devices(
    extra: Option<Model>,
) -> Result<Vec<(Model, rusb::Device<rusb::GlobalContext>, rusb::DeviceDescriptor)>, rusb::Error> {
    Ok(rusb::DeviceList::new()?
        .iter()
        .filter_map(|device| {
            // Read the device descriptor.
            // Devices whose descriptor cannot be read are skipped.
            let device_desc = device.device_descriptor().ok()?;

            // Map the USB id to a printer model, either from the built-in table or the extra model.
            // Anything else on the bus is of no interest to us.
            let model = Model::lookup(device_desc.vendor_id(), device_desc.product_id(), extra)?;

            Some((model, device, device_desc))
        })
        .collect())
}

fn select_interface(device: &rusb::Device<rusb::GlobalContext>) -> Result<(u8, u8, u8, u8), Error> {
    // Printers expose a single interface with bulk in and out endpoints.
    let config_desc = device.active_config_descriptor()?;
    let interface = config_desc.interfaces().next().ok_or(Error::NoInterface)?;

    // Its first alternate setting is the one we talk to.
    let interface_desc = interface
        .descriptors()
        .next()
        .ok_or(Error::NoInterfaceDescriptor)?;

    // Collect the bulk endpoints in both directions.
    // Interrupt endpoints some models add for status are ignored.
    let (mut in_addr, mut out_addr) = (None, None);

    for endpoint_desc in interface_desc
        .endpoint_descriptors()
        .filter(|desc| desc.transfer_type() == rusb::TransferType::Bulk)
    {
        match endpoint_desc.direction() {
            rusb::Direction::In => in_addr = Some(endpoint_desc.address()),
            rusb::Direction::Out => out_addr = Some(endpoint_desc.address()),
        }
    }

    // Interface number, alternate setting and both endpoint addresses.
    Ok((
        interface.number(),
        interface_desc.setting_number(),
        in_addr.ok_or(Error::NoInEndpoint)?,
        out_addr.ok_or(Error::NoOutEndpoint)?,
    ))
}

fn claim_interface(
    handle: &mut rusb::DeviceHandle<rusb::GlobalContext>,
    interface: u8,
) -> Result<(), Error> {
    let mut attempt = 0;

    loop {
        attempt += 1;

        match handle.claim_interface(interface) {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= CLAIM_ATTEMPTS => {
                return Err(Error::ClaimFailed {
                    interface,
                    attempts: attempt,
                    source: err,
                })
            }
            Err(err) => {
                log::debug!(
                    "Claiming interface {} failed ({}), retrying ({}/{})",
                    interface,
                    err,
                    attempt,
                    CLAIM_ATTEMPTS
                );
                thread::sleep(CLAIM_RETRY_DELAY);
            }
        }
    }
}

fn read_device_id(
    handle: &rusb::DeviceHandle<rusb::GlobalContext>,
    interface: u8,
    alt_setting: u8,
) -> Option<DeviceId> {
    let mut buf = [0u8; 1024];
    let index = ((interface as u16) << 8) | alt_setting as u16;

    let len = handle
        .read_control(
            REQUEST_TYPE_CLASS_IN_INTERFACE,
            REQUEST_GET_DEVICE_ID,
            0,
            index,
            &mut buf,
            CONTROL_TIMEOUT,
        )
        .map_err(|err| log::debug!("GET_DEVICE_ID failed: {}", err))
        .ok()?;

    DeviceId::from_reply(&buf[..len])
}

fn read_serial_number(
    handle: &rusb::DeviceHandle<rusb::GlobalContext>,
    device_desc: &rusb::DeviceDescriptor,
    device_id: Option<&DeviceId>,
) -> String {
    handle
        .read_serial_number_string_ascii(device_desc)
        .ok()
        .filter(|sn| !sn.trim().is_empty())
        .or_else(|| device_id.and_then(DeviceId::serial_number).map(str::to_owned))
        .unwrap_or_else(|| String::from("NONE"))
}

/// List every attached printer we support, for the CUPS device discovery pass.
pub fn discover(extra: Option<Model>) -> Result<Vec<Discovered>, Error> {
    let mut found = Vec::new();

    for (model, device, device_desc) in supported_devices(extra)? {
        // Discovery must not fail because one printer is held by someone else.
        let handle = match device.open() {
            Ok(handle) => handle,
            Err(err) => {
                log::debug!("Cannot open {}: {}", model, err);
                continue;
            }
        };

        // The device id is optional, the serial number falls back to it.
        let device_id = select_interface(&device)
            .ok()
            .and_then(|(interface, alt, _, _)| read_device_id(&handle, interface, alt));
        let serial_number = read_serial_number(&handle, &device_desc, device_id.as_ref());

        found.push(Discovered {
            model,
            serial_number,
            device_id,
        });
    }

    Ok(found)
}

impl UsbTransport {
    /// Find and attach the first supported printer that passes `filter`.
    pub fn attach(filter: &AttachFilter) -> Result<Self, Error> {
        for (model, device, device_desc) in supported_devices(filter.extra_model)? {
            if filter.family.is_some_and(|family| family != model.family()) {
                continue;
            }

            // Open the device and let a kernel driver be detached for us and later reattached.
            let mut handle = device.open()?;
            handle.set_auto_detach_kernel_driver(true)?;

            // Pick the interface and the endpoints, then ask for the device id.
            let (interface, alt_setting, in_addr, out_addr) = select_interface(&device)?;
            let device_id = read_device_id(&handle, interface, alt_setting);
            let serial_number = read_serial_number(&handle, &device_desc, device_id.as_ref());

            if let Some(wanted) = &filter.serial_number {
                if *wanted != serial_number {
                    log::debug!("Skipping {} with serial {}", model, serial_number);
                    continue;
                }
            }

            // Claim the interface, retrying while another process lets go of it.
            claim_interface(&mut handle, interface)?;

            if let Some(id) = &device_id {
                log::debug!(
                    "Device id: MFG={:?} MDL={:?} CMD={:?}",
                    id.manufacturer(),
                    id.model(),
                    id.command_set()
                );
            }

            let connection = Connection {
                model,
                family: model.family(),
                interface,
                in_addr,
                out_addr,
                serial_number,
                device_id,
            };

            log::info!(
                "Attached {} ({:04x}:{:04x}, serial {})",
                model,
                connection.vendor_id(),
                connection.product_id(),
                connection.serial_number
            );

            return Ok(UsbTransport { handle, connection });
        }

        Err(Error::NoPrinter)
    }
}
