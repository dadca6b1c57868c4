//! CH341A device implementation

use futures_lite::future::block_on;
use nusb::transfer::RequestBuffer;

use crate::error::{Ch341aError, Result};
use crate::protocol::*;
use uflash_core::controller::{ControllerCaps, SpiController, Xfer, XferBuf};
use uflash_core::error::{Error as CoreError, Result as CoreResult};

/// An opened CH341A programmer
pub struct Ch341a {
    _device: nusb::Device,
    interface: nusb::Interface,
    speed_step: u8,
    speed_hz: u32,
}

/// One connected CH341A, as listed before opening
#[derive(Debug, Clone)]
pub struct Ch341aDeviceInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
}

impl std::fmt::Display for Ch341aDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CH341A at bus {} address {}", self.bus, self.address)
    }
}

impl Ch341a {
    /// Open the first CH341A
    pub fn open() -> Result<Self> {
        Self::open_nth(0)
    }

    /// Open the nth CH341A (0-indexed), for multi-programmer setups
    pub fn open_nth(index: usize) -> Result<Self> {
        let device_info = nusb::list_devices()
            .map_err(|e| Ch341aError::OpenFailed(e.to_string()))?
            .filter(|d| {
                d.vendor_id() == CH341A_USB_VENDOR && d.product_id() == CH341A_USB_PRODUCT
            })
            .nth(index)
            .ok_or(Ch341aError::DeviceNotFound)?;

        log::info!(
            "opening CH341A at bus {} address {}",
            device_info.bus_number(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .map_err(|e| Ch341aError::OpenFailed(e.to_string()))?;
        let interface = device
            .claim_interface(0)
            .map_err(|e| Ch341aError::ClaimFailed(e.to_string()))?;

        let mut dev = Self {
            _device: device,
            interface,
            speed_step: SPEED_STEPS[0].0,
            speed_hz: SPEED_STEPS[0].1,
        };

        dev.config_stream()?;
        dev.enable_pins(true)?;

        Ok(dev)
    }

    /// List connected CH341A devices
    pub fn list_devices() -> Result<Vec<Ch341aDeviceInfo>> {
        Ok(nusb::list_devices()
            .map_err(|e| Ch341aError::OpenFailed(e.to_string()))?
            .filter(|d| {
                d.vendor_id() == CH341A_USB_VENDOR && d.product_id() == CH341A_USB_PRODUCT
            })
            .map(|d| Ch341aDeviceInfo {
                bus: d.bus_number(),
                address: d.device_address(),
            })
            .collect())
    }

    fn bulk_write(&self, data: &[u8]) -> Result<()> {
        let comp = block_on(self.interface.bulk_out(WRITE_EP, data.to_vec()));
        comp.status
            .map_err(|e| Ch341aError::TransferFailed(e.to_string()))?;
        Ok(())
    }

    fn bulk_read(&self, len: usize) -> Result<Vec<u8>> {
        let comp = block_on(self.interface.bulk_in(READ_EP, RequestBuffer::new(len)));
        comp.into_result()
            .map_err(|e| Ch341aError::TransferFailed(e.to_string()))
    }

    fn config_stream(&mut self) -> Result<()> {
        self.bulk_write(&[
            CMD_I2C_STREAM,
            I2C_STM_SET | (self.speed_step & 0x7),
            I2C_STM_END,
        ])
    }

    fn enable_pins(&mut self, enable: bool) -> Result<()> {
        let dir = if enable { UIO_DIR_OUTPUT } else { UIO_DIR_INPUT };
        self.bulk_write(&[
            CMD_UIO_STREAM,
            UIO_STM_OUT | UIO_CS_DEASSERT,
            UIO_STM_DIR | dir,
            UIO_STM_END,
        ])
    }

    fn set_cs(&mut self, assert: bool) -> Result<()> {
        let pins = if assert { UIO_CS_ASSERT } else { UIO_CS_DEASSERT };
        self.bulk_write(&[CMD_UIO_STREAM, UIO_STM_OUT | pins, UIO_STM_END])
    }

    /// Clock one chunk out while capturing the full-duplex response
    fn spi_chunk(&mut self, out_chunk: &[u8]) -> Result<Vec<u8>> {
        let mut pkt = Vec::with_capacity(1 + out_chunk.len());
        pkt.push(CMD_SPI_STREAM);
        pkt.extend(out_chunk.iter().map(|&b| reverse_byte(b)));

        self.bulk_write(&pkt)?;
        let resp = self.bulk_read(out_chunk.len())?;
        Ok(resp.iter().map(|&b| reverse_byte(b)).collect())
    }
}

impl Drop for Ch341a {
    fn drop(&mut self) {
        if let Err(e) = self.enable_pins(false) {
            log::warn!("failed to release CH341A pins: {}", e);
        }
    }
}

impl SpiController for Ch341a {
    fn name(&self) -> &'static str {
        "ch341a"
    }

    fn caps(&self) -> ControllerCaps {
        // Single-wire only: the pin mux has one data line each way
        ControllerCaps::empty()
    }

    fn max_read_granularity(&self) -> usize {
        4096
    }

    fn generic_xfer_max_size(&self) -> usize {
        4096
    }

    fn generic_xfer(&mut self, xfers: &mut [Xfer<'_>]) -> CoreResult<()> {
        for x in xfers.iter() {
            if x.buswidth > 1 || x.dtr {
                return Err(CoreError::Unsupported);
            }
            if x.speed != 0 {
                // The clock is latched per stream config, not per segment
                return Err(CoreError::Unsupported);
            }
        }

        self.set_cs(true).map_err(CoreError::from)?;

        let mut result: CoreResult<()> = Ok(());

        'outer: for x in xfers.iter_mut() {
            match &mut x.buf {
                XferBuf::Out(data) => {
                    for chunk in data.chunks(CH341_SPI_CHUNK) {
                        if let Err(e) = self.spi_chunk(chunk) {
                            result = Err(e.into());
                            break 'outer;
                        }
                    }
                }
                XferBuf::In(data) => {
                    let ones = [0xFFu8; CH341_SPI_CHUNK];
                    for chunk in data.chunks_mut(CH341_SPI_CHUNK) {
                        match self.spi_chunk(&ones[..chunk.len()]) {
                            Ok(resp) => chunk.copy_from_slice(&resp),
                            Err(e) => {
                                result = Err(e.into());
                                break 'outer;
                            }
                        }
                    }
                }
            }
        }

        // Always release CS, even on a failed envelope
        let cs = self.set_cs(false).map_err(CoreError::from);
        result.and(cs)
    }

    fn set_speed(&mut self, hz: u32) -> CoreResult<u32> {
        let (step, actual) = SPEED_STEPS
            .iter()
            .copied()
            .find(|(_, s)| *s <= hz)
            .unwrap_or(SPEED_STEPS[SPEED_STEPS.len() - 1]);

        self.speed_step = step;
        self.speed_hz = actual;
        self.config_stream().map_err(CoreError::from)?;
        Ok(actual)
    }

    fn get_speed(&self) -> u32 {
        self.speed_hz
    }

    fn get_speed_list(&self) -> Option<Vec<u32>> {
        Some(SPEED_STEPS.iter().map(|(_, s)| *s).collect())
    }
}
