use rand::Rng;
use rand::rngs::SmallRng;
use tracing::debug;

use crate::battle::BattleConfig;

/// Attempts per warrior before random placement gives up and spaces evenly.
const MAX_ATTEMPTS: usize = 1000;

/// Shortest distance between two addresses around a core of `size` cells.
pub fn circular_distance(a: usize, b: usize, size: usize) -> usize {
    let d = a.abs_diff(b) % size;
    d.min(size - d)
}

/// Evenly spaced load offsets, first warrior at address 0.
pub fn spaced_offsets(n: usize, core_size: usize) -> Vec<usize> {
    (0..n).map(|i| i * core_size / n.max(1)).collect()
}

/// Seeded random load offsets for warriors of the given lengths.
///
/// The first warrior always loads at 0. Every other warrior is placed by
/// rejection sampling so that each pair sits at least
/// `max(min_separation, longer of the two lengths)` cells apart. If sampling
/// fails, falls back to [`spaced_offsets`].
pub fn random_offsets(rng: &mut SmallRng, lengths: &[usize], config: &BattleConfig) -> Vec<usize> {
    let size = config.core_size;
    if lengths.is_empty() || size == 0 {
        return Vec::new();
    }

    let mut offsets = Vec::with_capacity(lengths.len());
    offsets.push(0);
    for (i, &len) in lengths.iter().enumerate().skip(1) {
        let placed = (0..MAX_ATTEMPTS).map(|_| rng.gen_range(0..size)).find(|&cand| {
            offsets.iter().zip(lengths).all(|(&other, &other_len)| {
                let needed = config.min_separation.max(len).max(other_len);
                circular_distance(cand, other, size) >= needed
            })
        });
        match placed {
            Some(offset) => offsets.push(offset),
            None => {
                debug!(warrior = i, "random placement failed, spacing evenly");
                return spaced_offsets(lengths.len(), size);
            }
        }
    }
    debug!(?offsets, "placed warriors");
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_circular_distance_wraps() {
        assert_eq!(circular_distance(0, 7900, 8000), 100);
        assert_eq!(circular_distance(7900, 0, 8000), 100);
        assert_eq!(circular_distance(10, 20, 8000), 10);
        assert_eq!(circular_distance(5, 5, 8000), 0);
        assert_eq!(circular_distance(0, 4000, 8000), 4000);
    }

    #[test]
    fn test_spaced_offsets() {
        assert_eq!(spaced_offsets(2, 8000), vec![0, 4000]);
        assert_eq!(spaced_offsets(3, 9000), vec![0, 3000, 6000]);
        assert_eq!(spaced_offsets(1, 8000), vec![0]);
        assert!(spaced_offsets(0, 8000).is_empty());
    }

    #[test]
    fn test_random_offsets_are_deterministic() {
        let config = BattleConfig::default();
        let a = random_offsets(&mut SmallRng::seed_from_u64(42), &[5, 5, 5], &config);
        let b = random_offsets(&mut SmallRng::seed_from_u64(42), &[5, 5, 5], &config);
        assert_eq!(a, b);
        assert_eq!(a[0], 0);
    }

    #[test]
    fn test_crowded_core_falls_back_to_spacing() {
        // Exactly enough room only for perfect spacing.
        let config = BattleConfig {
            core_size: 400,
            min_separation: 100,
            ..Default::default()
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let offsets = random_offsets(&mut rng, &[1, 1, 1, 1], &config);
        for i in 0..4 {
            for j in (i + 1)..4 {
                assert!(circular_distance(offsets[i], offsets[j], 400) >= 100);
            }
        }
    }

    #[test]
    fn test_long_warriors_widen_separation() {
        let config = BattleConfig {
            core_size: 8000,
            min_separation: 10,
            ..Default::default()
        };
        for seed in 0..20 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let offsets = random_offsets(&mut rng, &[10, 900], &config);
            assert!(circular_distance(offsets[0], offsets[1], 8000) >= 900);
        }
    }
}
