/// Round to one decimal place for display-facing time values.
pub fn round_tenths(seconds: f64) -> f64 {
    (seconds * 10.0).round() / 10.0
}

/// Transport position bookkeeping on top of an external engine clock.
///
/// All times are seconds on the engine clock. `start_time` is the clock value
/// that corresponds to song position zero while playing; `paused_time` is the
/// song position held while paused or stopped, and the offset playback started
/// from while playing. A playing position never reads below that offset, even
/// before the scheduled start has been reached.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransportClock {
    start_time: f64,
    paused_time: f64,
    playing: bool,
}

impl TransportClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn paused_time(&self) -> f64 {
        self.paused_time
    }

    /// Begin playing so that song position `paused_time` lines up with clock
    /// value `at`. Returns the song offset playback starts from.
    pub fn start(&mut self, at: f64) -> f64 {
        self.start_time = at - self.paused_time;
        self.playing = true;
        self.paused_time
    }

    /// Freeze the position at clock value `now`, bounded by `duration`.
    pub fn pause(&mut self, now: f64, duration: f64) {
        if !self.playing {
            return;
        }
        self.paused_time = self.playing_position(now).clamp(0.0, duration.max(0.0));
        self.playing = false;
    }

    pub fn stop(&mut self) {
        self.start_time = 0.0;
        self.paused_time = 0.0;
        self.playing = false;
    }

    /// Park the position at `seconds` without starting playback.
    pub fn park(&mut self, seconds: f64) {
        self.paused_time = seconds.max(0.0);
        self.playing = false;
    }

    /// Unrounded song position at clock value `now`.
    pub fn position(&self, now: f64, duration: f64) -> f64 {
        if self.playing {
            self.playing_position(now).clamp(0.0, duration.max(0.0))
        } else {
            self.paused_time
        }
    }

    fn playing_position(&self, now: f64) -> f64 {
        (now - self.start_time).max(self.paused_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_pause_accumulates() {
        let mut clock = TransportClock::new();
        assert_eq!(clock.start(10.0), 0.0);
        assert_eq!(clock.position(15.0, 60.0), 5.0);

        clock.pause(15.0, 60.0);
        assert!(!clock.is_playing());
        assert_eq!(clock.position(99.0, 60.0), 5.0);

        assert_eq!(clock.start(20.0), 5.0);
        assert_eq!(clock.start_time(), 15.0);
        assert_eq!(clock.position(22.5, 60.0), 7.5);
    }

    #[test]
    fn playing_position_is_clamped() {
        let mut clock = TransportClock::new();
        clock.start(4.0);
        assert_eq!(clock.position(3.0, 60.0), 0.0);
        assert_eq!(clock.position(100.0, 60.0), 60.0);
    }

    #[test]
    fn pause_while_stopped_keeps_position() {
        let mut clock = TransportClock::new();
        clock.park(12.0);
        clock.pause(50.0, 60.0);
        assert_eq!(clock.paused_time(), 12.0);
    }

    #[test]
    fn pause_before_scheduled_start_keeps_offset() {
        let mut clock = TransportClock::new();
        clock.park(5.0);
        for _ in 0..10 {
            // Scheduled 20 ms ahead, paused before the clock gets there.
            clock.start(1.02);
            assert_eq!(clock.position(1.0, 60.0), 5.0);
            clock.pause(1.0, 60.0);
        }
        assert_eq!(clock.paused_time(), 5.0);
    }

    #[test]
    fn stop_resets_everything() {
        let mut clock = TransportClock::new();
        clock.start(1.0);
        clock.stop();
        assert_eq!(clock, TransportClock::default());
    }

    #[test]
    fn rounds_to_tenths() {
        assert_eq!(round_tenths(4.98), 5.0);
        assert_eq!(round_tenths(1.04), 1.0);
        assert_eq!(round_tenths(0.26), 0.3);
    }
}
