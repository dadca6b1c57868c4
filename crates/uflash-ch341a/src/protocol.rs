//! CH341A protocol constants
//!
//! The CH341A multiplexes SPI onto its parallel-port pins: D0 = /CS,
//! D3 = SCK, D5 = MOSI, D7 = MISO. SPI bytes go out LSB-first, so every
//! byte is bit-reversed on the way in and out.

/// USB vendor ID
pub const CH341A_USB_VENDOR: u16 = 0x1A86;
/// USB product ID
pub const CH341A_USB_PRODUCT: u16 = 0x5512;

/// Bulk OUT endpoint
pub const WRITE_EP: u8 = 0x02;
/// Bulk IN endpoint
pub const READ_EP: u8 = 0x82;

/// Native packet length
pub const CH341_PACKET_LENGTH: usize = 32;
/// SPI payload bytes per packet (one byte goes to the command)
pub const CH341_SPI_CHUNK: usize = CH341_PACKET_LENGTH - 1;

/// SPI data stream command
pub const CMD_SPI_STREAM: u8 = 0xA8;
/// I2C/SPI configuration stream command
pub const CMD_I2C_STREAM: u8 = 0xAA;
/// UIO (pin-level) stream command
pub const CMD_UIO_STREAM: u8 = 0xAB;

/// I2C stream: set interface speed
pub const I2C_STM_SET: u8 = 0x60;
/// I2C stream: end marker
pub const I2C_STM_END: u8 = 0x00;

/// UIO stream: drive output pins
pub const UIO_STM_OUT: u8 = 0x80;
/// UIO stream: set pin directions
pub const UIO_STM_DIR: u8 = 0x40;
/// UIO stream: end marker
pub const UIO_STM_END: u8 = 0x20;

/// Pin pattern with /CS asserted (D0 low, SCK low, MOSI high)
pub const UIO_CS_ASSERT: u8 = 0x36;
/// Pin pattern with /CS released
pub const UIO_CS_DEASSERT: u8 = 0x37;
/// Direction mask with D0..D5 as outputs
pub const UIO_DIR_OUTPUT: u8 = 0x3F;
/// Direction mask with all pins as inputs (released)
pub const UIO_DIR_INPUT: u8 = 0x00;

/// Interface speed settings and the resulting approximate SPI clock
pub const SPEED_STEPS: [(u8, u32); 4] = [
    (3, 2_100_000),
    (2, 1_600_000),
    (1, 750_000),
    (0, 400_000),
];

/// Reverse the bits of one byte (the CH341A shifts LSB first)
pub const fn reverse_byte(b: u8) -> u8 {
    b.reverse_bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_reversal() {
        assert_eq!(reverse_byte(0x80), 0x01);
        assert_eq!(reverse_byte(0x9F), 0xF9);
        assert_eq!(reverse_byte(reverse_byte(0x5A)), 0x5A);
    }
}
