/// Linear parameter smoother advanced once per rendered frame.
///
/// A new target is reached after `length` calls to [`Ramp::next`], so a
/// gain change never steps inside a block.
#[derive(Debug, Clone)]
pub struct Ramp {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
    length: u32,
}

impl Ramp {
    pub fn new(value: f32, length: u32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
            length: length.max(1),
        }
    }

    pub fn set_target(&mut self, target: f32) {
        if target == self.target && self.remaining == 0 {
            return;
        }
        self.target = target;
        self.remaining = self.length;
        self.step = (target - self.current) / self.length as f32;
    }

    /// Move to `value` immediately.
    pub fn jump(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.remaining = 0;
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        self.remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaches_target_after_length_steps() {
        let mut ramp = Ramp::new(0.0, 4);
        ramp.set_target(1.0);
        let values: Vec<f32> = (0..6).map(|_| ramp.next()).collect();
        assert_eq!(values, vec![0.25, 0.5, 0.75, 1.0, 1.0, 1.0]);
        assert!(ramp.is_settled());
    }

    #[test]
    fn retarget_mid_ramp_starts_from_current_value() {
        let mut ramp = Ramp::new(1.0, 2);
        ramp.set_target(0.0);
        assert_eq!(ramp.next(), 0.5);
        ramp.set_target(1.0);
        assert_eq!(ramp.next(), 0.75);
        assert_eq!(ramp.next(), 1.0);
    }

    #[test]
    fn jump_skips_the_ramp() {
        let mut ramp = Ramp::new(0.2, 100);
        ramp.set_target(0.8);
        ramp.jump(0.5);
        assert_eq!(ramp.next(), 0.5);
        assert_eq!(ramp.target(), 0.5);
    }
}
