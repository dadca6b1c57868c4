//! CH347 protocol constants and configuration
//!
//! The CH347 frames every exchange as `cmd, len_lo, len_hi, payload`. SPI
//! runs from a 120 MHz base clock divided by powers of two.

/// USB vendor ID
pub const CH347_USB_VENDOR: u16 = 0x1A86;
/// CH347T product ID (UART + SPI + I2C mode)
pub const CH347T_USB_PRODUCT: u16 = 0x55DB;
/// CH347F product ID (UART + SPI + I2C + JTAG)
pub const CH347F_USB_PRODUCT: u16 = 0x55DE;

/// Bulk OUT endpoint
pub const WRITE_EP: u8 = 0x06;
/// Bulk IN endpoint
pub const READ_EP: u8 = 0x86;

/// Usable packet size (the vendor driver stays below the 512-byte max)
pub const CH347_PACKET_SIZE: usize = 510;
/// Payload bytes per packet after the 3-byte frame header
pub const CH347_MAX_DATA_LEN: usize = CH347_PACKET_SIZE - 3;

/// Set SPI configuration
pub const CMD_SPI_SET_CFG: u8 = 0xC0;
/// Chip-select control
pub const CMD_SPI_CS_CTRL: u8 = 0xC1;
/// Full-duplex transfer
pub const CMD_SPI_OUT_IN: u8 = 0xC2;
/// Read-only transfer
pub const CMD_SPI_IN: u8 = 0xC3;
/// Write-only transfer
pub const CMD_SPI_OUT: u8 = 0xC4;
/// Read back the SPI configuration
pub const CMD_SPI_GET_CFG: u8 = 0xCA;

/// CS flag: assert
pub const CS_ASSERT: u8 = 0x00;
/// CS flag: deassert
pub const CS_DEASSERT: u8 = 0x40;
/// CS flag: apply the change
pub const CS_CHANGE: u8 = 0x80;

/// Base clock in Hz; divisor n gives base >> (n + 1)
pub const BASE_CLOCK_HZ: u32 = 120_000_000;

/// Clock divisor (0..=7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiSpeed(pub u8);

impl SpiSpeed {
    /// Closest divisor at or below the requested frequency
    pub fn from_hz(hz: u32) -> SpiSpeed {
        for div in 0..=7u8 {
            if (BASE_CLOCK_HZ >> (div + 1)) <= hz {
                return SpiSpeed(div);
            }
        }
        SpiSpeed(7)
    }

    /// The actual frequency of this divisor
    pub fn to_hz(self) -> u32 {
        BASE_CLOCK_HZ >> (self.0 + 1)
    }
}

/// Build the 29-byte SPI configuration frame
pub fn build_config_frame(speed: SpiSpeed, mode: u8) -> [u8; 29] {
    let mut buf = [0u8; 29];

    buf[0] = CMD_SPI_SET_CFG;
    buf[1] = 26;
    buf[2] = 0;

    // Fixed fields the vendor driver always sets
    buf[5] = 4;
    buf[6] = 1;

    // CPOL bit 1 at offset 9, CPHA bit 0 at offset 11
    buf[9] = (mode & 0x2) as u8;
    buf[11] = mode & 0x1;

    buf[14] = 2;

    // Divisor in bits 5:3
    buf[15] = (speed.0 & 0x7) << 3;

    // MSB-first
    buf[17] = 0x00;

    buf[19] = 7;

    // Both CS lines active-low
    buf[24] = 0;

    buf
}

/// Build the CS control frame (CS0 only)
pub fn build_cs_frame(assert: bool) -> [u8; 13] {
    let mut buf = [0u8; 13];
    buf[0] = CMD_SPI_CS_CTRL;
    buf[1] = 10;
    buf[2] = 0;
    buf[3] = CS_CHANGE | if assert { CS_ASSERT } else { CS_DEASSERT };
    // Bytes 8..13 describe CS1 and are left untouched
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_mapping() {
        assert_eq!(SpiSpeed::from_hz(60_000_000), SpiSpeed(0));
        assert_eq!(SpiSpeed::from_hz(30_000_000), SpiSpeed(1));
        assert_eq!(SpiSpeed::from_hz(20_000_000), SpiSpeed(2));
        assert_eq!(SpiSpeed::from_hz(100_000), SpiSpeed(7));
        assert_eq!(SpiSpeed(3).to_hz(), 7_500_000);
    }

    #[test]
    fn config_frame_shape() {
        let buf = build_config_frame(SpiSpeed(3), 0);
        assert_eq!(buf[0], CMD_SPI_SET_CFG);
        assert_eq!(buf[1], 26);
        assert_eq!(buf[15], 3 << 3);
    }
}
