//! HD44780 character LCD behind a PCF8574 I2C backpack.
//!
//! The backpack maps its eight outputs onto the controller pins:
//!
//! ```text
//! P7..P4  D7..D4   (4-bit data bus)
//! P3      backlight
//! P2      EN (latches on falling edge)
//! P1      RW (always write)
//! P0      RS (0 = command, 1 = character data)
//! ```

use super::{fit_line, CharDisplay, DisplayError};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, I2c};

const BACKLIGHT: u8 = 0x08;
const ENABLE: u8 = 0x04;
const REGISTER_SELECT: u8 = 0x01;

const CMD_CLEAR_DISPLAY: u8 = 0x01;
const CMD_ENTRY_MODE_LEFT: u8 = 0x06;
const CMD_DISPLAY_ON: u8 = 0x0C;
const CMD_FUNCTION_4BIT_2LINE_5X8: u8 = 0x28;
const CMD_SET_DDRAM: u8 = 0x80;

const ROW_OFFSETS: [u8; 2] = [0x00, 0x40];

pub struct Pcf8574Lcd<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
    columns: usize,
}

impl<I2C: I2c, D: DelayNs> Pcf8574Lcd<I2C, D> {
    /// Runs the 4-bit initialization sequence and clears the display.
    pub fn new(i2c: I2C, delay: D, address: u8, columns: usize) -> Result<Self, DisplayError> {
        let mut lcd = Self {
            i2c,
            delay,
            address,
            columns,
        };
        lcd.initialize()?;
        Ok(lcd)
    }

    fn initialize(&mut self) -> Result<(), DisplayError> {
        self.delay.delay_ms(50);

        // Force 8-bit mode three times, then drop to 4-bit
        for _ in 0..3 {
            self.write_nibble(0x30)?;
            self.delay.delay_us(4500);
        }
        self.write_nibble(0x20)?;

        self.command(CMD_FUNCTION_4BIT_2LINE_5X8)?;
        self.command(CMD_DISPLAY_ON)?;
        self.command(CMD_CLEAR_DISPLAY)?;
        self.delay.delay_ms(2);
        self.command(CMD_ENTRY_MODE_LEFT)?;
        Ok(())
    }

    fn expander_write(&mut self, data: u8) -> Result<(), DisplayError> {
        self.i2c
            .write(self.address, &[data | BACKLIGHT])
            .map_err(|e| DisplayError::Bus(format!("{:?}", e.kind())))
    }

    fn write_nibble(&mut self, nibble: u8) -> Result<(), DisplayError> {
        self.expander_write(nibble)?;
        self.expander_write(nibble | ENABLE)?;
        self.delay.delay_us(1);
        self.expander_write(nibble & !ENABLE)?;
        self.delay.delay_us(50);
        Ok(())
    }

    fn send(&mut self, value: u8, mode: u8) -> Result<(), DisplayError> {
        self.write_nibble(mode | (value & 0xF0))?;
        self.write_nibble(mode | ((value << 4) & 0xF0))
    }

    fn command(&mut self, command: u8) -> Result<(), DisplayError> {
        self.send(command, 0)
    }

    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }
}

impl<I2C: I2c, D: DelayNs> CharDisplay for Pcf8574Lcd<I2C, D> {
    fn write_line(&mut self, row: usize, text: &str) -> Result<(), DisplayError> {
        let offset = *ROW_OFFSETS.get(row).ok_or(DisplayError::InvalidRow(row))?;
        self.command(CMD_SET_DDRAM | offset)?;

        let line = fit_line(text, self.columns);
        for byte in line.bytes() {
            self.send(byte, REGISTER_SELECT)?;
        }
        Ok(())
    }
}

#[cfg(feature = "hardware")]
pub type LinuxLcd = Pcf8574Lcd<linux_embedded_hal::I2cdev, linux_embedded_hal::Delay>;

#[cfg(feature = "hardware")]
pub fn open_linux_lcd(bus: &str, address: u8, columns: usize) -> Result<LinuxLcd, DisplayError> {
    let i2c = linux_embedded_hal::I2cdev::new(bus)
        .map_err(|e| DisplayError::Bus(format!("{}: {:?}", bus, e)))?;
    Pcf8574Lcd::new(i2c, linux_embedded_hal::Delay, address, columns)
}
