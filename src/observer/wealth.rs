//! Wealth distribution statistics over per-currency balance lists.

/// Gini coefficient over a sorted (ascending) balance list, absolute-value
/// clamped to [0, 1]. Zero for empty lists and zero-sum distributions.
pub fn gini(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let total: f64 = sorted.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, x)| (i as f64 + 1.0) * x)
        .sum();
    let g = (2.0 * weighted) / (n as f64 * total) - (n as f64 + 1.0) / n as f64;
    g.abs().clamp(0.0, 1.0)
}

/// Median of a sorted (ascending) list; 0 for empty.
pub fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Share of total wealth held from index ⌊0.9n⌋ onward of the sorted list.
pub fn top_decile_share(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let total: f64 = sorted.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let cut = (0.9 * n as f64).floor() as usize;
    let top: f64 = sorted[cut..].iter().sum();
    (top / total).clamp(0.0, 1.0)
}

/// |mean − median| / median; 0 when the median is not positive.
pub fn mean_median_divergence(mean: f64, median: f64) -> f64 {
    if median > 0.0 {
        (mean - median).abs() / median
    } else {
        0.0
    }
}

/// Standard deviation of ln(price) over positive prices, clamped to [0, 1].
/// Zero when fewer than two positive prices exist.
pub fn log_price_dispersion(prices: impl Iterator<Item = f64>) -> f64 {
    let logs: Vec<f64> = prices.filter(|p| *p > 0.0).map(f64::ln).collect();
    if logs.len() < 2 {
        return 0.0;
    }
    let n = logs.len() as f64;
    let mean = logs.iter().sum::<f64>() / n;
    let var = logs.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n;
    var.sqrt().clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gini_is_zero_for_perfect_equality() {
        let balances = vec![10.0, 10.0, 10.0, 10.0];
        assert!(gini(&balances) < 1e-9);
    }

    #[test]
    fn gini_approaches_one_for_total_concentration() {
        let mut balances = vec![0.0; 99];
        balances.push(1000.0);
        let g = gini(&balances);
        assert!(g > 0.95 && g <= 1.0);
    }

    #[test]
    fn gini_handles_empty_and_zero_sum() {
        assert_eq!(gini(&[]), 0.0);
        assert_eq!(gini(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn top_decile_share_of_uniform_distribution() {
        let balances = vec![10.0; 10];
        // Cut at index 9: exactly the top balance out of ten equal ones.
        assert!((top_decile_share(&balances) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn log_dispersion_zero_below_two_prices() {
        assert_eq!(log_price_dispersion([5.0].into_iter()), 0.0);
        assert_eq!(log_price_dispersion([0.0, -1.0, 3.0].into_iter()), 0.0);
    }

    #[test]
    fn log_dispersion_is_clamped() {
        let spread = [0.0001, 10_000.0];
        assert_eq!(log_price_dispersion(spread.into_iter()), 1.0);
    }
}
