// Learning rate schedule: linear warmup, then linear decay to zero

/// Multiplier applied to the base rate follows
/// `step / warmup` while warming up, then `(total - step) / (total - warmup)`.
#[derive(Debug, Clone)]
pub struct LinearSchedule {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    step: usize,
}

impl LinearSchedule {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
            step: 0,
        }
    }

    /// Learning rate for the current step
    pub fn current_lr(&self) -> f64 {
        self.base_lr * self.factor(self.step)
    }

    fn factor(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return step as f64 / self.warmup_steps.max(1) as f64;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        (remaining / decay_steps).max(0.0)
    }

    pub fn advance(&mut self) {
        self.step += 1;
    }

    pub fn step(&self) -> usize {
        self.step
    }
}
