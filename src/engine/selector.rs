use crate::domain::HttpMethod;
use rand::Rng;
use std::collections::BTreeMap;

/// Weights in a method ratio are parts out of this total.
pub const RATIO_SCALE: u32 = 10;

/// Picks a method per request according to a validated weight ratio.
#[derive(Debug, Clone)]
pub struct MethodSelector {
    // (method, exclusive upper bound of its draw range), in scan order
    ranges: Vec<(HttpMethod, u32)>,
    only: Option<HttpMethod>,
}

impl MethodSelector {
    pub fn new(ratio: &BTreeMap<HttpMethod, u32>) -> Self {
        let mut ranges = Vec::new();
        let mut upper = 0u32;
        for (method, weight) in ratio {
            if *weight == 0 {
                continue;
            }
            upper = upper.saturating_add(*weight);
            ranges.push((*method, upper));
        }

        let only = match ranges.as_slice() {
            [(method, _)] => Some(*method),
            _ => None,
        };

        Self { ranges, only }
    }

    /// Map a draw in `[0, RATIO_SCALE)` onto the cumulative weight ranges.
    pub fn pick(&self, draw: u32) -> HttpMethod {
        if let Some(method) = self.only {
            return method;
        }
        self.ranges
            .iter()
            .find(|(_, upper)| draw < *upper)
            .or_else(|| self.ranges.last())
            .map(|(method, _)| *method)
            .unwrap_or(HttpMethod::Get)
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> HttpMethod {
        if let Some(method) = self.only {
            return method;
        }
        self.pick(rng.gen_range(0..RATIO_SCALE))
    }

    pub fn methods(&self) -> impl Iterator<Item = HttpMethod> + '_ {
        self.ranges.iter().map(|(method, _)| *method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ratio(entries: &[(HttpMethod, u32)]) -> BTreeMap<HttpMethod, u32> {
        entries.iter().copied().collect()
    }

    #[test]
    fn draws_map_onto_cumulative_ranges() {
        let selector = MethodSelector::new(&ratio(&[(HttpMethod::Post, 4), (HttpMethod::Get, 6)]));

        let picks: Vec<HttpMethod> = (0..RATIO_SCALE).map(|draw| selector.pick(draw)).collect();
        assert_eq!(picks.iter().filter(|m| **m == HttpMethod::Get).count(), 6);
        assert_eq!(picks.iter().filter(|m| **m == HttpMethod::Post).count(), 4);
        assert_eq!(selector.pick(0), HttpMethod::Get);
        assert_eq!(selector.pick(9), HttpMethod::Post);
    }

    #[test]
    fn single_method_skips_randomness() {
        let selector = MethodSelector::new(&ratio(&[
            (HttpMethod::Delete, 10),
            (HttpMethod::Get, 0),
        ]));
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..100 {
            assert_eq!(selector.choose(&mut rng), HttpMethod::Delete);
        }
        assert_eq!(selector.methods().collect::<Vec<_>>(), vec![HttpMethod::Delete]);
    }

    #[test]
    fn empirical_distribution_matches_ratio() {
        let weights = ratio(&[
            (HttpMethod::Get, 5),
            (HttpMethod::Put, 1),
            (HttpMethod::Post, 2),
            (HttpMethod::Patch, 1),
            (HttpMethod::Delete, 1),
        ]);
        let selector = MethodSelector::new(&weights);
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 20_000;

        let mut counts: BTreeMap<HttpMethod, u32> = BTreeMap::new();
        for _ in 0..draws {
            *counts.entry(selector.choose(&mut rng)).or_insert(0) += 1;
        }

        for (method, weight) in &weights {
            let expected = *weight as f64 / RATIO_SCALE as f64;
            let observed = counts.get(method).copied().unwrap_or(0) as f64 / draws as f64;
            assert!(
                (observed - expected).abs() < 0.03,
                "{method}: expected {expected}, observed {observed}"
            );
        }
    }
}
