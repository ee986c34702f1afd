//! Single-slot packet mailbox between the UART receive interrupt and the main loop.
//!
//! The interrupt side only ever calls [`Mailbox::receive`] and [`Mailbox::tick`].
//! The main loop reads the packet with interrupts masked and hands the slot
//! back with [`Mailbox::release`].
use crate::constants::{commands, PACKET_SIZE};
use crate::packet::Packet;

use super::timer::Countdown;

/// Connection/command state, shared with the receive interrupt which uses it to gate bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Only a CONNECT opcode is accepted at packet offset 0.
    Disconnected,
    /// Bytes 1..4 of the CONNECT command word must be zero.
    Connecting,
    Command,
    /// Multi-packet UPDATE_APROM in progress.
    Updating,
    /// Multi-packet READ_ROM in progress.
    Dumping,
}

#[derive(Debug)]
pub struct Mailbox {
    buf: Packet,
    head: usize,
    ready: bool,
    state: State,
    idle: Countdown,
    idle_ticks: u16,
}

impl Mailbox {
    pub const fn new(idle_ticks: u16) -> Self {
        Mailbox {
            buf: [0; PACKET_SIZE],
            head: 0,
            ready: false,
            state: State::Disconnected,
            idle: Countdown::new(),
            idle_ticks,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn set_state(&mut self, state: State) {
        self.state = state;
    }

    pub fn set_idle_ticks(&mut self, idle_ticks: u16) {
        self.idle_ticks = idle_ticks;
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Receive interrupt: store one byte.
    pub fn receive(&mut self, byte: u8) {
        // a full packet is waiting for the main loop, the slot is not ours
        if self.ready {
            return;
        }
        self.buf[self.head] = byte;
        self.head += 1;

        match self.state {
            State::Disconnected => {
                if byte == commands::CONNECT {
                    self.state = State::Connecting;
                } else {
                    self.reset_head();
                    return;
                }
            }
            State::Connecting => {
                if self.head < 5 {
                    if byte != 0 {
                        self.state = State::Disconnected;
                        self.reset_head();
                        return;
                    }
                } else {
                    self.state = State::Command;
                }
            }
            _ => (),
        }

        if self.head == 1 {
            self.idle.arm(self.idle_ticks);
        }
        if self.head == PACKET_SIZE {
            self.ready = true;
            self.reset_head();
        }
    }

    /// Timer interrupt.
    pub fn tick(&mut self) {
        self.idle.tick();
    }

    /// Main loop: drop a partial packet whose sender went quiet.
    /// Returns true if bytes were discarded.
    pub fn check_idle(&mut self) -> bool {
        if !self.idle.expired() {
            return false;
        }
        self.idle.clear_expired();
        if self.ready || self.head == 0 {
            return false;
        }
        log::debug!("uart idle, dropping {} byte(s)", self.head);
        self.head = 0;
        if self.state == State::Connecting {
            self.state = State::Disconnected;
        }
        true
    }

    /// Snapshot of the pending packet, if one is complete.
    pub fn packet(&self) -> Option<Packet> {
        self.ready.then_some(self.buf)
    }

    /// Main loop: packet consumed, slot free again.
    pub fn release(&mut self) {
        self.ready = false;
        self.head = 0;
    }

    fn reset_head(&mut self) {
        self.idle.disarm();
        self.head = 0;
    }
}
