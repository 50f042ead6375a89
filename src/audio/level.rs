/// Input level in `0..=100` for a block of PCM samples.
///
/// Mean absolute amplitude scaled to full range, the VU-meter reading shown
/// next to the record button. Purely observational.
pub fn level_from_samples(samples: &[i16]) -> u8 {
    if samples.is_empty() {
        return 0;
    }

    let sum: u64 = samples.iter().map(|&s| (s as i32).unsigned_abs() as u64).sum();
    let average = sum as f64 / samples.len() as f64;
    let level = (average / 32768.0 * 100.0).floor();

    level.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_zero() {
        assert_eq!(level_from_samples(&[]), 0);
        assert_eq!(level_from_samples(&[0; 512]), 0);
    }

    #[test]
    fn test_full_scale_is_capped() {
        assert_eq!(level_from_samples(&[i16::MIN; 64]), 100);
        assert_eq!(level_from_samples(&[i16::MAX, i16::MIN]), 99);
    }

    #[test]
    fn test_half_scale() {
        assert_eq!(level_from_samples(&[16384, -16384]), 50);
    }
}
