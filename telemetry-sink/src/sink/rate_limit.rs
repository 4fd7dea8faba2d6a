//! Byte budget over fixed one second windows. A window opens on the first admission attempt made
//! a full second after the previous window opened, so a burst straddling a boundary can see up to
//! twice the budget in a short span.

use std::time::Duration;

use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub(crate) struct RateWindow {
    /// Bytes allowed per window.
    limit: usize,
    window_start: Instant,
    /// Bytes admitted since `window_start`.
    bytes_admitted: usize,
}

impl RateWindow {
    pub(crate) fn new(limit: usize, now: Instant) -> Self {
        Self {
            limit,
            window_start: now,
            bytes_admitted: 0,
        }
    }

    /// Admits `len` bytes if they fit in what is left of the current window. A rejection leaves
    /// the admitted count untouched. Filling the budget exactly is allowed.
    pub(crate) fn try_admit(&mut self, len: usize, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) >= WINDOW {
            self.window_start = now;
            self.bytes_admitted = 0;
        }

        match self.bytes_admitted.checked_add(len) {
            Some(total) if total <= self.limit => {
                self.bytes_admitted = total;
                true
            }
            _ => false,
        }
    }

    /// Gives back bytes admitted at `admitted_at` that were never buffered. Nothing is returned
    /// once the window they were counted in has rolled over.
    pub(crate) fn refund(&mut self, len: usize, admitted_at: Instant) {
        if admitted_at >= self.window_start {
            self.bytes_admitted = self.bytes_admitted.saturating_sub(len);
        }
    }

    #[cfg(test)]
    pub(crate) fn bytes_admitted(&self) -> usize {
        self.bytes_admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_until_budget_is_used() {
        let start = Instant::now();
        let mut window = RateWindow::new(100, start);

        assert!(window.try_admit(40, start));
        assert!(window.try_admit(40, start));
        assert_eq!(window.bytes_admitted(), 80);

        // 120 > 100
        assert!(!window.try_admit(40, start));
        assert_eq!(window.bytes_admitted(), 80);
    }

    #[test]
    fn test_exact_remaining_budget_is_admitted() {
        let start = Instant::now();
        let mut window = RateWindow::new(100, start);

        assert!(window.try_admit(60, start));
        assert!(window.try_admit(40, start));
        assert_eq!(window.bytes_admitted(), 100);
        assert!(!window.try_admit(1, start));
    }

    #[test]
    fn test_oversized_message_is_never_admitted() {
        let start = Instant::now();
        let mut window = RateWindow::new(10, start);

        assert!(!window.try_admit(11, start));
        assert!(!window.try_admit(usize::MAX, start));
        assert_eq!(window.bytes_admitted(), 0);
    }

    #[test]
    fn test_window_rolls_over_after_one_second() {
        let start = Instant::now();
        let mut window = RateWindow::new(100, start);

        assert!(window.try_admit(100, start));
        assert!(!window.try_admit(1, start + Duration::from_millis(999)));

        // the boundary itself opens a new window
        assert!(window.try_admit(70, start + Duration::from_secs(1)));
        assert_eq!(window.bytes_admitted(), 70);

        // counted against the new window, which opened at start + 1s
        assert!(!window.try_admit(40, start + Duration::from_millis(1500)));
        assert!(window.try_admit(40, start + Duration::from_millis(2000)));
        assert_eq!(window.bytes_admitted(), 40);
    }

    #[test]
    fn test_refund() {
        let start = Instant::now();
        let mut window = RateWindow::new(100, start);

        assert!(window.try_admit(60, start));
        window.refund(60, start);
        assert_eq!(window.bytes_admitted(), 0);

        // admitted in an old window, the new window is not credited
        assert!(window.try_admit(30, start));
        let later = start + Duration::from_secs(2);
        assert!(window.try_admit(50, later));
        window.refund(30, start);
        assert_eq!(window.bytes_admitted(), 50);
    }
}
