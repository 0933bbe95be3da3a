//! Small descriptive statistics and the exact binomial test

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with divisor n.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mu = mean(values);
    let ss: f64 = values.iter().map(|v| (v - mu) * (v - mu)).sum();
    (ss / values.len() as f64).sqrt()
}

/// Variance with divisor n - 1; `None` for fewer than two values.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mu = mean(values);
    let ss: f64 = values.iter().map(|v| (v - mu) * (v - mu)).sum();
    Some(ss / (values.len() - 1) as f64)
}

fn ln_factorials(n: u64) -> Vec<f64> {
    let mut table = Vec::with_capacity(n as usize + 1);
    let mut acc = 0.0_f64;
    table.push(acc);
    for i in 1..=n {
        acc += (i as f64).ln();
        table.push(acc);
    }
    table
}

fn binomial_ln_pmf(k: u64, n: u64, p: f64, ln_fact: &[f64]) -> f64 {
    let ln_choose = ln_fact[n as usize] - ln_fact[k as usize] - ln_fact[(n - k) as usize];
    let ln_success = if k == 0 { 0.0 } else { k as f64 * p.ln() };
    let ln_failure = if k == n { 0.0 } else { (n - k) as f64 * (1.0 - p).ln() };
    ln_choose + ln_success + ln_failure
}

/// Exact two-sided binomial test of `successes` out of `n` against rate `p`.
///
/// The p-value sums the probability of every outcome that is no more likely
/// than the observed one (relative tolerance 1e-7).
pub fn binomial_test_two_sided(successes: u64, n: u64, p: f64) -> f64 {
    if n == 0 || successes > n {
        return 1.0;
    }
    if p <= 0.0 {
        return if successes == 0 { 1.0 } else { 0.0 };
    }
    if p >= 1.0 {
        return if successes == n { 1.0 } else { 0.0 };
    }

    let ln_fact = ln_factorials(n);
    let observed = binomial_ln_pmf(successes, n, p, &ln_fact).exp();
    let threshold = observed * (1.0 + 1e-7);

    let total: f64 = (0..=n)
        .map(|k| binomial_ln_pmf(k, n, p, &ln_fact).exp())
        .filter(|&pk| pk <= threshold)
        .sum();

    total.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_population_std_matches_numpy_default() {
        let values = [0.4, 0.5, 0.6];
        assert_relative_eq!(population_std(&values), (0.02_f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!(population_std(&[1.0, 1.0, 1.0]), 0.0);
        assert_eq!(population_std(&[]), 0.0);
    }

    #[test]
    fn test_sample_variance() {
        assert_eq!(sample_variance(&[1.0]), None);
        assert_relative_eq!(sample_variance(&[1.0, 2.0, 3.0, 4.0]).unwrap(), 5.0 / 3.0);
    }

    #[test]
    fn test_binomial_symmetric_center_is_one() {
        assert_relative_eq!(binomial_test_two_sided(5, 10, 0.5), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_binomial_known_values() {
        // scipy.stats.binomtest(7, 10, 0.5).pvalue == 0.34375
        assert_relative_eq!(binomial_test_two_sided(7, 10, 0.5), 0.34375, epsilon = 1e-10);
        // scipy.stats.binomtest(10, 10, 0.5).pvalue == 2 / 1024
        assert_relative_eq!(binomial_test_two_sided(10, 10, 0.5), 2.0 / 1024.0, epsilon = 1e-12);
        // scipy.stats.binomtest(3, 20, 0.5).pvalue == 0.0025768280029296875
        assert_relative_eq!(
            binomial_test_two_sided(3, 20, 0.5),
            0.002_576_828_002_929_687_5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_binomial_large_sample_far_from_chance() {
        let p = binomial_test_two_sided(300, 400, 0.5);
        assert!(p < 1e-20);
    }

    #[test]
    fn test_binomial_degenerate_inputs() {
        assert_eq!(binomial_test_two_sided(0, 0, 0.5), 1.0);
        assert_eq!(binomial_test_two_sided(0, 10, 0.0), 1.0);
        assert_eq!(binomial_test_two_sided(3, 10, 1.0), 0.0);
    }
}
