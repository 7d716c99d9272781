//! Console boundary.
//!
//! The serial/VGA drivers themselves are external collaborators (see
//! spec §1, "out of scope"); this module only defines the narrow interface
//! the kernel's logger consumes, plus a minimal 16550 UART sink good enough
//! to bring up logging before a richer driver takes over.

use core::fmt;
use spin::Mutex;

/// Anything the kernel logger can write formatted text to.
pub trait ConsoleSink: fmt::Write + Send {}
impl<T: fmt::Write + Send> ConsoleSink for T {}

const COM1: u16 = 0x3f8;

/// Minimal polling 16550 UART driver, used as the default early console.
pub struct Serial16550 {
    port: u16,
}

impl Serial16550 {
    /// # Safety
    ///
    /// `port` must be the I/O base address of an accessible, already
    /// power-on 16550-compatible UART. Caller must not construct two live
    /// instances for the same port.
    pub const unsafe fn new(port: u16) -> Self {
        Serial16550 { port }
    }

    /// Program the UART for 38400 8N1 with FIFOs enabled.
    ///
    /// # Safety
    /// Must be called exactly once, before any write, on real or emulated
    /// hardware where `self.port` is a valid UART.
    pub unsafe fn init(&mut self) {
        unsafe {
            outb(self.port + 1, 0x00); // disable interrupts
            outb(self.port + 3, 0x80); // enable DLAB
            outb(self.port, 0x03); // divisor low byte (38400 baud)
            outb(self.port + 1, 0x00); // divisor high byte
            outb(self.port + 3, 0x03); // 8 bits, no parity, one stop bit
            outb(self.port + 2, 0xc7); // enable FIFO, clear, 14-byte threshold
            outb(self.port + 4, 0x0b); // IRQs enabled, RTS/DSR set
        }
    }

    fn is_transmit_empty(&self) -> bool {
        unsafe { inb(self.port + 5) & 0x20 != 0 }
    }

    fn write_byte(&mut self, byte: u8) {
        while !self.is_transmit_empty() {
            core::hint::spin_loop();
        }
        unsafe { outb(self.port, byte) }
    }
}

impl fmt::Write for Serial16550 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// # Safety
/// Caller guarantees `port` is a valid, mapped I/O port.
#[cfg(target_arch = "x86")]
unsafe fn outb(port: u16, value: u8) {
    unsafe { x86::io::outb(port, value) }
}

#[cfg(target_arch = "x86")]
unsafe fn inb(port: u16) -> u8 {
    unsafe { x86::io::inb(port) }
}

// Host-target (test) builds have no I/O port access; swallow writes so unit
// tests that exercise logging still link and run.
#[cfg(not(target_arch = "x86"))]
unsafe fn outb(_port: u16, _value: u8) {}
#[cfg(not(target_arch = "x86"))]
unsafe fn inb(_port: u16) -> u8 {
    0xff
}

lazy_static::lazy_static! {
    static ref EARLY_CONSOLE: Mutex<Serial16550> = {
        let mut serial = unsafe { Serial16550::new(COM1) };
        unsafe { serial.init() };
        Mutex::new(serial)
    };
}

/// Write formatted text to the early console. Used by the `kprint!` family.
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    EARLY_CONSOLE.lock().write_fmt(args).ok();
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}
