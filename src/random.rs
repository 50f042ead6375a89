use uuid::Uuid;

/// Source of uniform values in `[0, 1)`, injected wherever the runtime
/// makes a random choice so tests can pin the outcome.
pub trait RandomSource: Send {
    fn next_f64(&mut self) -> f64;

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn next_index(&mut self, len: usize) -> usize {
        let idx = (self.next_f64() * len as f64) as usize;
        idx.min(len.saturating_sub(1))
    }
}

/// Draws from the random bits of a fresh v4 UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidRandom;

impl RandomSource for UuidRandom {
    fn next_f64(&mut self) -> f64 {
        // Low 53 bits of a v4 UUID are all random (version/variant live higher up)
        let bits = Uuid::new_v4().as_u128() & ((1u128 << 53) - 1);
        bits as f64 / (1u64 << 53) as f64
    }
}

/// Replays a fixed list of values, cycling when exhausted.
#[derive(Debug, Clone)]
pub struct SequenceRandom {
    values: Vec<f64>,
    pos: usize,
}

impl SequenceRandom {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values, pos: 0 }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }
}

impl RandomSource for SequenceRandom {
    fn next_f64(&mut self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let value = self.values[self.pos % self.values.len()];
        self.pos += 1;
        value.clamp(0.0, 0.999_999_999)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_random_stays_in_unit_interval() {
        let mut rng = UuidRandom;
        for _ in 0..1000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v), "out of range: {}", v);
        }
    }

    #[test]
    fn test_sequence_random_cycles() {
        let mut rng = SequenceRandom::new(vec![0.1, 0.5]);
        assert_eq!(rng.next_f64(), 0.1);
        assert_eq!(rng.next_f64(), 0.5);
        assert_eq!(rng.next_f64(), 0.1);
    }

    #[test]
    fn test_next_index_never_reaches_len() {
        let mut rng = SequenceRandom::constant(1.0);
        assert_eq!(rng.next_index(5), 4);

        let mut rng = SequenceRandom::constant(0.0);
        assert_eq!(rng.next_index(5), 0);
    }
}
