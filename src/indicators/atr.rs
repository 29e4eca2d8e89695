/// Average True Range (ATR) indicator
///
/// Measures volatility as the smoothed average of true ranges. True Range is
/// the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
use crate::models::Candle;

/// Calculate the current ATR value, or None if insufficient data
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    let series = calculate_atr_series(candles, period);
    series.last().copied()
}

/// Calculate the full ATR series (Wilder smoothing), oldest first
///
/// Returns an empty vector if there are fewer than `period + 1` candles
pub fn calculate_atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if candles.len() < period + 1 {
        return Vec::new();
    }

    let mut true_ranges = Vec::new();
    for i in 1..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        true_ranges.push(tr);
    }

    if true_ranges.len() < period {
        return Vec::new();
    }

    let mut atr_series = Vec::new();

    let first_atr: f64 = true_ranges.iter().take(period).sum::<f64>() / period as f64;
    atr_series.push(first_atr);

    let mut atr = first_atr;
    for tr in &true_ranges[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
        atr_series.push(atr);
    }

    atr_series
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_candles(bars: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        bars.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                instrument: "EURUSD".to_string(),
                timestamp: Utc::now() + chrono::Duration::hours(i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_atr_quiet_market() {
        // 2-pip bars around 1.1000
        let bars = vec![(1.1000, 1.1001, 1.0999, 1.1000); 15];
        let atr = calculate_atr(&create_test_candles(&bars), 14).unwrap();

        assert!(atr > 0.00015 && atr < 0.00025, "got {}", atr);
    }

    #[test]
    fn test_atr_volatile_market() {
        // 40-pip bars with gaps between closes
        let bars: Vec<_> = (0..15)
            .map(|i| {
                let base = 1.1000 + if i % 2 == 0 { 0.0030 } else { -0.0030 };
                (base, base + 0.0020, base - 0.0020, base + 0.0010)
            })
            .collect();
        let atr = calculate_atr(&create_test_candles(&bars), 14).unwrap();

        assert!(atr > 0.0030, "volatile market should show large ATR, got {}", atr);
    }

    #[test]
    fn test_atr_insufficient_data() {
        let bars = vec![(1.1000, 1.1001, 1.0999, 1.1000); 3];
        assert!(calculate_atr(&create_test_candles(&bars), 14).is_none());
    }

    #[test]
    fn test_atr_series_length() {
        let bars = vec![(1.1000, 1.1005, 1.0995, 1.1000); 20];
        let series = calculate_atr_series(&create_test_candles(&bars), 14);

        // 19 true ranges, smoothed from index 14 → 6 values
        assert_eq!(series.len(), 6);
    }
}
