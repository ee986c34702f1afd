/// Count-down tick counter driven from the periodic timer interrupt (about 140us per tick).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Countdown {
    remaining: u16,
    expired: bool,
}

impl Countdown {
    pub const fn new() -> Self {
        Countdown {
            remaining: 0,
            expired: false,
        }
    }

    pub fn arm(&mut self, ticks: u16) {
        self.remaining = ticks;
        self.expired = false;
    }

    pub fn disarm(&mut self) {
        self.remaining = 0;
        self.expired = false;
    }

    pub fn is_armed(&self) -> bool {
        self.remaining != 0
    }

    pub fn expired(&self) -> bool {
        self.expired
    }

    pub fn clear_expired(&mut self) {
        self.expired = false;
    }

    /// Called once per timer interrupt. A disarmed counter stays put.
    pub fn tick(&mut self) {
        if self.remaining != 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.expired = true;
            }
        }
    }
}
