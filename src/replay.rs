//! Replay protection for received messages.

use crate::{error::Error, Result};

/// The default number of sequence numbers tracked below the highest one.
pub const DEFAULT_WINDOW_SIZE: u32 = 32;

/// A sliding-window filter over received sequence numbers.
///
/// It keeps the highest sequence number accepted so far and a bitmap of the
/// window directly below it, so moderately reordered messages are still
/// accepted while anything replayed or older than the window is rejected.
/// Checking and recording are separate steps on purpose: a received number
/// is only recorded once the message it came in has authenticated.
pub struct ReplayWindow {
    highest: Option<u64>,
    bitmap: u64,
    size: u32,
}

impl ReplayWindow {
    /// Creates a window tracking `size` sequence numbers below the highest
    /// accepted one. The size is limited to the bitmap width of 64.
    pub fn new(size: u32) -> ReplayWindow {
        ReplayWindow {
            highest: None,
            bitmap: 0,
            size: size.max(1).min(64),
        }
    }

    /// Returns an error if the sequence number must be considered a replay:
    /// it is at or below the window floor, or its bit is already set.
    pub fn check(&self, n: u64) -> Result<()> {
        let highest = match self.highest {
            // Nothing received yet, everything is new
            None => return Ok(()),
            Some(highest) => highest,
        };
        if n > highest {
            return Ok(());
        }

        let offset = highest - n;
        if offset >= u64::from(self.size) || self.bitmap >> offset & 1 == 1 {
            return Err(Error::ReplayDetected);
        }

        Ok(())
    }

    /// Marks the sequence number as received, sliding the window if it is a
    /// new highest value.
    pub fn record(&mut self, n: u64) {
        match self.highest {
            None => {
                self.highest = Some(n);
                self.bitmap = 1;
            }
            Some(highest) if n > highest => {
                let shift = n - highest;
                // Shifting the full bitmap width or more empties the window
                self.bitmap = if shift >= 64 {
                    1
                } else {
                    self.bitmap << shift | 1
                };
                self.highest = Some(n);
            }
            Some(highest) => {
                let offset = highest - n;
                if offset < 64 {
                    self.bitmap |= 1 << offset;
                }
            }
        }
    }

    /// Checks the sequence number and records it if it passes.
    pub fn check_and_record(&mut self, n: u64) -> Result<()> {
        self.check(n)?;
        self.record(n);

        Ok(())
    }
}

impl Default for ReplayWindow {
    fn default() -> ReplayWindow {
        ReplayWindow::new(DEFAULT_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_window_accepts() {
        let mut window = ReplayWindow::default();
        assert!(window.check(0).is_ok());
        assert!(window.check_and_record(0).is_ok());
        assert!(window.check(0).is_err());
    }

    #[test]
    fn replay_rejected() {
        let mut window = ReplayWindow::default();
        for n in 1..=5 {
            window.check_and_record(n).unwrap();
        }
        assert!(window.check(3).is_err());
        assert!(window.check_and_record(6).is_ok());
    }

    #[test]
    fn reordering_within_window() {
        let mut window = ReplayWindow::default();
        window.check_and_record(10).unwrap();
        // Late but within the window and not seen yet
        assert!(window.check_and_record(5).is_ok());
        assert!(window.check(5).is_err());
        assert!(window.check_and_record(11).is_ok());
        assert!(window.check(5).is_err());
    }

    #[test]
    fn window_floor() {
        let mut window = ReplayWindow::new(32);
        window.check_and_record(100).unwrap();
        // 68 is exactly size steps below the highest, so outside the window
        assert!(window.check(68).is_err());
        assert!(window.check_and_record(69).is_ok());
        assert!(window.check_and_record(99).is_ok());
    }

    #[test]
    fn large_jump_empties_window() {
        let mut window = ReplayWindow::new(32);
        window.check_and_record(5).unwrap();
        window.check_and_record(1000).unwrap();
        assert!(window.check(5).is_err());
        assert!(window.check(1000).is_err());
        assert!(window.check_and_record(999).is_ok());
        assert!(window.check_and_record(1001).is_ok());
    }

    #[test]
    fn record_only_after_check() {
        let mut window = ReplayWindow::default();
        window.check(7).unwrap();
        // Not recorded yet, so the same number still checks out
        window.check(7).unwrap();
        window.record(7);
        assert!(window.check(7).is_err());
    }
}
