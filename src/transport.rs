/// Trait for RFID reader communication backends.
/// Implement this trait for different transports (UART, serial port, etc.)
pub trait RfidTransport {
    /// Error type for transport operations
    type Error: std::fmt::Debug;

    /// Number of received bytes waiting to be read
    fn bytes_available(&mut self) -> Result<usize, Self::Error>;

    /// Read the next received byte, or `None` if nothing is waiting. Must not block.
    fn read_byte(&mut self) -> Result<Option<u8>, Self::Error>;

    /// Write data to the transport
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Discard everything currently waiting in the input buffer
    fn clear_input(&mut self) -> Result<(), Self::Error> {
        while self.bytes_available()? > 0 {
            if self.read_byte()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}

/// Monotonic millisecond time source used for timeouts and scan windows
pub trait Clock {
    /// Milliseconds since an arbitrary fixed point
    fn now_ms(&self) -> u64;

    /// Pause for `ms` milliseconds
    fn delay_ms(&mut self, ms: u32);

    fn elapsed_since(&self, start_ms: u64) -> u64 {
        self.now_ms().saturating_sub(start_ms)
    }
}

/// [`Clock`] backed by `std::time::Instant` and `std::thread::sleep`
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
}
