//! UART transport for ESP32 using esp-idf-svc

use crate::transport::RfidTransport;
use esp_idf_hal::units::Hertz;
use esp_idf_svc::hal::delay::NON_BLOCK;
use esp_idf_svc::hal::gpio::{self, InputPin, OutputPin};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::uart::{self, UartDriver};

pub struct UartTransport<'a> {
    uart: UartDriver<'a>,
}

impl<'a> UartTransport<'a> {
    /// Set up the UART as 8N1 at `baud_rate`, without flow control
    pub fn new(
        uart: impl Peripheral<P = impl uart::Uart> + 'a,
        tx: impl Peripheral<P = impl OutputPin> + 'a,
        rx: impl Peripheral<P = impl InputPin> + 'a,
        baud_rate: u32,
    ) -> Result<Self, esp_idf_svc::sys::EspError> {
        let config = uart::config::Config::default().baudrate(Hertz(baud_rate));
        let uart = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<gpio::Gpio0>::None,
            Option::<gpio::Gpio0>::None,
            &config,
        )?;
        uart.clear_rx()?;

        Ok(Self { uart })
    }

    /// Switch the local side to `baud_rate`, e.g. after the module accepted
    /// a baud rate change
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), esp_idf_svc::sys::EspError> {
        self.uart.change_baudrate(Hertz(baud_rate))?;
        self.uart.clear_rx()
    }
}

impl RfidTransport for UartTransport<'_> {
    type Error = esp_idf_svc::sys::EspError;

    fn bytes_available(&mut self) -> Result<usize, Self::Error> {
        self.uart.remaining_read()
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        let mut byte = [0u8; 1];
        match self.uart.read(&mut byte, NON_BLOCK)? {
            1 => Ok(Some(byte[0])),
            _ => Ok(None),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.uart.write(data)
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        self.uart.clear_rx()
    }
}
