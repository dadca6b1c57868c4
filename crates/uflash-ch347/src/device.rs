//! CH347 device implementation

use futures_lite::future::block_on;
use nusb::transfer::RequestBuffer;

use crate::error::{Ch347Error, Result};
use crate::protocol::*;
use uflash_core::controller::{ControllerCaps, SpiController, Xfer, XferBuf};
use uflash_core::error::{Error as CoreError, Result as CoreResult};

/// An opened CH347 programmer
pub struct Ch347 {
    _device: nusb::Device,
    interface: nusb::Interface,
    speed: SpiSpeed,
    mode: u8,
}

impl Ch347 {
    /// Open the first CH347 (either variant)
    pub fn open() -> Result<Self> {
        Self::open_nth(0)
    }

    /// Open the nth CH347 (0-indexed)
    pub fn open_nth(index: usize) -> Result<Self> {
        let device_info = nusb::list_devices()
            .map_err(|e| Ch347Error::OpenFailed(e.to_string()))?
            .filter(|d| {
                d.vendor_id() == CH347_USB_VENDOR
                    && (d.product_id() == CH347T_USB_PRODUCT
                        || d.product_id() == CH347F_USB_PRODUCT)
            })
            .nth(index)
            .ok_or(Ch347Error::DeviceNotFound)?;

        log::info!(
            "opening CH347 ({}) at bus {} address {}",
            if device_info.product_id() == CH347F_USB_PRODUCT {
                "CH347F"
            } else {
                "CH347T"
            },
            device_info.bus_number(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .map_err(|e| Ch347Error::OpenFailed(e.to_string()))?;

        // Interface 2 carries the vendor SPI/I2C endpoints in mode 1
        let interface = device
            .claim_interface(2)
            .map_err(|e| Ch347Error::ClaimFailed(e.to_string()))?;

        let mut dev = Self {
            _device: device,
            interface,
            speed: SpiSpeed(3),
            mode: 0,
        };

        dev.configure()?;
        Ok(dev)
    }

    fn bulk_write(&self, data: &[u8]) -> Result<()> {
        let comp = block_on(self.interface.bulk_out(WRITE_EP, data.to_vec()));
        comp.status
            .map_err(|e| Ch347Error::TransferFailed(e.to_string()))?;
        Ok(())
    }

    fn bulk_read(&self, len: usize) -> Result<Vec<u8>> {
        let comp = block_on(self.interface.bulk_in(READ_EP, RequestBuffer::new(len)));
        comp.into_result()
            .map_err(|e| Ch347Error::TransferFailed(e.to_string()))
    }

    fn configure(&mut self) -> Result<()> {
        let frame = build_config_frame(self.speed, self.mode);
        self.bulk_write(&frame)?;

        // The device acks configuration with a short status frame
        let ack = self.bulk_read(CH347_PACKET_SIZE)?;
        if ack.first() != Some(&CMD_SPI_SET_CFG) {
            return Err(Ch347Error::Protocol("bad SET_CFG ack".into()));
        }
        Ok(())
    }

    fn set_cs(&mut self, assert: bool) -> Result<()> {
        let frame = build_cs_frame(assert);
        self.bulk_write(&frame)
    }

    /// Write-only transfer, framed per packet
    fn spi_out(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(CH347_MAX_DATA_LEN) {
            let mut frame = Vec::with_capacity(3 + chunk.len());
            frame.push(CMD_SPI_OUT);
            frame.push(chunk.len() as u8);
            frame.push((chunk.len() >> 8) as u8);
            frame.extend_from_slice(chunk);
            self.bulk_write(&frame)?;

            let ack = self.bulk_read(CH347_PACKET_SIZE)?;
            if ack.first() != Some(&CMD_SPI_OUT) {
                return Err(Ch347Error::Protocol("bad SPI_OUT ack".into()));
            }
        }
        Ok(())
    }

    /// Read-only transfer: one request frame, then framed data packets
    fn spi_in(&mut self, buf: &mut [u8]) -> Result<()> {
        let total = buf.len() as u32;
        let mut frame = [0u8; 7];
        frame[0] = CMD_SPI_IN;
        frame[1] = 4;
        frame[2] = 0;
        frame[3..7].copy_from_slice(&total.to_le_bytes());
        self.bulk_write(&frame)?;

        let mut pos = 0usize;
        while pos < buf.len() {
            let pkt = self.bulk_read(CH347_PACKET_SIZE)?;
            if pkt.len() < 3 || pkt[0] != CMD_SPI_IN {
                return Err(Ch347Error::Protocol("bad SPI_IN frame".into()));
            }
            let n = (pkt[1] as usize | (pkt[2] as usize) << 8).min(buf.len() - pos);
            if pkt.len() < 3 + n {
                return Err(Ch347Error::Protocol("short SPI_IN frame".into()));
            }
            buf[pos..pos + n].copy_from_slice(&pkt[3..3 + n]);
            pos += n;
        }
        Ok(())
    }
}

impl SpiController for Ch347 {
    fn name(&self) -> &'static str {
        "ch347"
    }

    fn caps(&self) -> ControllerCaps {
        // Plain SPI master: one data line each direction
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
                return Err(CoreError::Unsupported);
            }
        }

        self.set_cs(true).map_err(CoreError::from)?;

        let mut result: CoreResult<()> = Ok(());
        for x in xfers.iter_mut() {
            let r = match &mut x.buf {
                XferBuf::Out(data) => self.spi_out(data),
                XferBuf::In(data) => self.spi_in(data),
            };
            if let Err(e) = r {
                result = Err(e.into());
                break;
            }
        }

        let cs = self.set_cs(false).map_err(CoreError::from);
        result.and(cs)
    }

    fn set_speed(&mut self, hz: u32) -> CoreResult<u32> {
        self.speed = SpiSpeed::from_hz(hz);
        self.configure().map_err(CoreError::from)?;
        Ok(self.speed.to_hz())
    }

    fn get_speed(&self) -> u32 {
        self.speed.to_hz()
    }

    fn get_speed_list(&self) -> Option<Vec<u32>> {
        Some((0..=7u8).map(|d| SpiSpeed(d).to_hz()).collect())
    }

    fn set_mode(&mut self, mode: u8) -> CoreResult<()> {
        if mode > 3 {
            return Err(CoreError::InvalidParameter("SPI mode"));
        }
        self.mode = mode;
        self.configure().map_err(CoreError::from)
    }
}
