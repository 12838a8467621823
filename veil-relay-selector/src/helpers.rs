//! Random relay picking
//!
//! Selection over a candidate set is weighted: a relay with twice the weight
//! of another is twice as likely to be picked. This is how relay load
//! balancing is expressed in the relay list itself.

use rand::seq::IndexedRandom;
use rand::Rng;

use veil_types::relay_list::Relay;

/// Pick a relay at random, weighted by [`Relay::weight`].
///
/// Returns `None` if the slice is empty or every candidate has weight zero.
pub fn pick_random_relay(relays: &[Relay]) -> Option<&Relay> {
    pick_random_relay_with(&mut rand::rng(), relays)
}

/// Weighted pick with an explicit RNG, for deterministic tests.
pub fn pick_random_relay_with<'a, R: Rng + ?Sized>(
    rng: &mut R,
    relays: &'a [Relay],
) -> Option<&'a Relay> {
    relays.choose_weighted(rng, |relay| relay.weight).ok()
}

/// Weighted pick excluding one specific relay, used for multihop so that the
/// entry and exit never collapse onto the same server.
pub fn pick_random_relay_excluding<'a>(relays: &'a [Relay], exclude: &Relay) -> Option<&'a Relay> {
    pick_random_relay_excluding_with(&mut rand::rng(), relays, exclude)
}

/// Weighted pick excluding one relay, with an explicit RNG.
pub fn pick_random_relay_excluding_with<'a, R: Rng + ?Sized>(
    rng: &mut R,
    relays: &'a [Relay],
    exclude: &Relay,
) -> Option<&'a Relay> {
    let candidates: Vec<&Relay> = relays.iter().filter(|relay| *relay != exclude).collect();
    candidates
        .choose_weighted(rng, |relay| relay.weight)
        .ok()
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use veil_types::relay_list::test_support::relay;

    #[test]
    fn test_zero_weight_candidates_fail_selection() {
        let relays = vec![
            relay("se-got-wg-001", "se", "got", true, "provider-a", 0),
            relay("se-got-wg-002", "se", "got", true, "provider-a", 0),
        ];
        assert!(pick_random_relay(&relays).is_none());
    }

    #[test]
    fn test_empty_candidates_fail_selection() {
        assert!(pick_random_relay(&[]).is_none());
    }

    #[test]
    fn test_zero_weight_relay_is_never_picked() {
        let relays = vec![
            relay("se-got-wg-001", "se", "got", true, "provider-a", 0),
            relay("se-got-wg-002", "se", "got", true, "provider-a", 1),
        ];
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            let picked = pick_random_relay_with(&mut rng, &relays).unwrap();
            assert_eq!(picked.hostname, "se-got-wg-002");
        }
    }

    #[test]
    fn test_weighted_selection_converges_to_weight_ratio() {
        let relays = vec![
            relay("se-got-wg-001", "se", "got", true, "provider-a", 1),
            relay("se-got-wg-002", "se", "got", true, "provider-a", 3),
        ];

        let mut rng = StdRng::seed_from_u64(42);
        let iterations = 20_000;
        let mut heavy_hits = 0usize;
        for _ in 0..iterations {
            let picked = pick_random_relay_with(&mut rng, &relays).unwrap();
            if picked.hostname == "se-got-wg-002" {
                heavy_hits += 1;
            }
        }

        // Expected proportion is 3/4; allow a generous statistical margin
        let proportion = heavy_hits as f64 / iterations as f64;
        assert!(
            (proportion - 0.75).abs() < 0.02,
            "weighted pick proportion {proportion} deviates from 0.75"
        );
    }

    #[test]
    fn test_excluding_pick_never_returns_excluded() {
        let exit = relay("se-got-wg-001", "se", "got", true, "provider-a", 100);
        let relays = vec![
            exit.clone(),
            relay("se-got-wg-002", "se", "got", true, "provider-a", 1),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let picked = pick_random_relay_excluding_with(&mut rng, &relays, &exit).unwrap();
            assert_eq!(picked.hostname, "se-got-wg-002");
        }
    }

    #[test]
    fn test_excluding_only_candidate_fails() {
        let exit = relay("se-got-wg-001", "se", "got", true, "provider-a", 100);
        let relays = vec![exit.clone()];
        assert!(pick_random_relay_excluding(&relays, &exit).is_none());
    }
}
