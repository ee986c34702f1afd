//! State reached from both interrupt context and the main loop.
use core::cell::RefCell;

use critical_section::Mutex;

use super::mailbox::{Mailbox, State};
use super::timer::Countdown;

pub(crate) struct Inner {
    pub mailbox: Mailbox,
    pub connect_timer: Countdown,
}

/// Everything the UART receive and timer interrupts touch.
///
/// On hardware this lives in a `static`; the interrupt handlers call
/// [`IsrShared::on_uart_rx`] and [`IsrShared::on_timer_tick`] on it while the
/// main loop owns a [`Bootloader`](super::Bootloader) built with
/// [`Bootloader::with_shared`](super::Bootloader::with_shared) over the same
/// reference. Every access goes through a critical section.
pub struct IsrShared {
    inner: Mutex<RefCell<Inner>>,
}

impl IsrShared {
    pub const fn new() -> Self {
        IsrShared {
            inner: Mutex::new(RefCell::new(Inner {
                mailbox: Mailbox::new(0),
                connect_timer: Countdown::new(),
            })),
        }
    }

    /// UART receive interrupt.
    pub fn on_uart_rx(&self, byte: u8) {
        self.with(|s| s.mailbox.receive(byte));
    }

    /// Periodic timer interrupt.
    pub fn on_timer_tick(&self) {
        self.with(|s| {
            s.connect_timer.tick();
            s.mailbox.tick();
        });
    }

    pub fn state(&self) -> State {
        self.with(|s| s.mailbox.state())
    }

    /// True while the bootloader still waits for CONNECT before booting APROM.
    pub fn is_counting_down(&self) -> bool {
        self.with(|s| s.connect_timer.is_armed())
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }
}

impl Default for IsrShared {
    fn default() -> Self {
        Self::new()
    }
}
