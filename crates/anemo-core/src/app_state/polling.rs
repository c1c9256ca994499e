use embassy_time::{Duration, Instant};

/// Fixed-cadence poll timer for a sensor.
///
/// The first check is always due; afterwards the timer re-arms relative to
/// the instant it fired, so a slow loop iteration delays the next poll rather
/// than producing a burst of catch-up reads.
#[derive(Debug, Clone, Copy)]
pub struct PollTimer {
    interval: Duration,
    next: Option<Instant>,
}

impl PollTimer {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    pub fn due(&mut self, now: Instant) -> bool {
        match self.next {
            Some(next) if now < next => false,
            _ => {
                self.next = Some(now + self.interval);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_timer_cadence() {
        let mut timer = PollTimer::new(Duration::from_millis(2000));
        assert!(timer.due(Instant::from_millis(0)));
        assert!(!timer.due(Instant::from_millis(1999)));
        assert!(timer.due(Instant::from_millis(2500)));
        assert!(!timer.due(Instant::from_millis(4000)));
        assert!(timer.due(Instant::from_millis(4500)));
    }
}
