use std::time::Instant;

/// Periodic progress lines for a pass, keyed on completed blob counts.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    start: Instant,
    every: usize,
}

impl Tick {
    /// Trigger once per `every` items.
    #[inline]
    pub fn new(every: usize) -> Self {
        Self {
            start: Instant::now(),
            every: every.max(1),
        }
    }

    #[inline]
    pub fn should(&self, count: usize) -> bool {
        count % self.every == 0
    }

    /// Items per second since the tick was created.
    #[inline]
    pub fn rate(&self, count: usize) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64().max(1e-9);
        count as f64 / elapsed
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_multiples() {
        let tick = Tick::new(500);
        assert!(!tick.should(499));
        assert!(tick.should(500));
        assert!(tick.should(1000));
        assert!(Tick::new(0).should(1));
    }
}
