/// Calculate the Exponential Moving Average series
///
/// The series is seeded with the first price rather than an SMA warm-up,
/// so every input price has a matching EMA value and early values are
/// biased toward `prices[0]`.
///
/// Returns an empty series when `prices` is empty or `period` is zero.
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    let Some(&first) = prices.first() else {
        return Vec::new();
    };
    if period == 0 {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    let mut ema = Vec::with_capacity(prices.len());
    ema.push(first);

    let mut prev = first;
    for price in &prices[1..] {
        prev = price * multiplier + prev * (1.0 - multiplier);
        ema.push(prev);
    }

    ema
}
