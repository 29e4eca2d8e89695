/// Market structure and volume analysis
///
/// Swing-based structure (higher highs / higher lows) plus volume baselines.
use crate::models::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarketStructure {
    HigherHighsHigherLows, // uptrend
    LowerHighsLowerLows,   // downtrend
    Mixed,                 // no clear structure
}

/// Analyze market structure over a lookback period
///
/// Returns the predominant structure based on the sequence of swing highs and
/// swing lows in the window, or Mixed when no clear pattern exists.
pub fn analyze_market_structure(candles: &[Candle], lookback: usize) -> MarketStructure {
    if candles.len() < lookback || lookback < 4 {
        return MarketStructure::Mixed;
    }

    let start_idx = candles.len().saturating_sub(lookback);
    let recent = &candles[start_idx..];

    let (swing_highs, swing_lows) = find_swings(recent);

    if swing_highs.len() < 2 || swing_lows.len() < 2 {
        return MarketStructure::Mixed;
    }

    let mut higher_highs = 0;
    let mut lower_highs = 0;
    for pair in swing_highs.windows(2) {
        if pair[1] > pair[0] {
            higher_highs += 1;
        } else {
            lower_highs += 1;
        }
    }

    let mut higher_lows = 0;
    let mut lower_lows = 0;
    for pair in swing_lows.windows(2) {
        if pair[1] > pair[0] {
            higher_lows += 1;
        } else {
            lower_lows += 1;
        }
    }

    let uptrend_signals = higher_highs + higher_lows;
    let downtrend_signals = lower_highs + lower_lows;

    if uptrend_signals > downtrend_signals && uptrend_signals >= 3 {
        MarketStructure::HigherHighsHigherLows
    } else if downtrend_signals > uptrend_signals && downtrend_signals >= 3 {
        MarketStructure::LowerHighsLowerLows
    } else {
        MarketStructure::Mixed
    }
}

/// Close-price swing highs and lows (local peaks and troughs), oldest first
fn find_swings(candles: &[Candle]) -> (Vec<f64>, Vec<f64>) {
    let mut highs = Vec::new();
    let mut lows = Vec::new();

    for i in 1..candles.len().saturating_sub(1) {
        let prev = candles[i - 1].close;
        let curr = candles[i].close;
        let next = candles[i + 1].close;

        if curr > prev && curr > next {
            highs.push(curr);
        }
        if curr < prev && curr < next {
            lows.push(curr);
        }
    }

    (highs, lows)
}

/// Most recent swing low within the lookback window (bar lows)
///
/// Used to anchor structure-buffer stops for long entries.
pub fn recent_swing_low(candles: &[Candle], lookback: usize) -> Option<f64> {
    if candles.len() < 3 {
        return None;
    }

    let start_idx = candles.len().saturating_sub(lookback.max(3));
    let recent = &candles[start_idx..];

    for i in (1..recent.len() - 1).rev() {
        let prev = recent[i - 1].low;
        let curr = recent[i].low;
        let next = recent[i + 1].low;
        if curr < prev && curr < next {
            return Some(curr);
        }
    }

    None
}

/// Most recent swing high within the lookback window (bar highs)
pub fn recent_swing_high(candles: &[Candle], lookback: usize) -> Option<f64> {
    if candles.len() < 3 {
        return None;
    }

    let start_idx = candles.len().saturating_sub(lookback.max(3));
    let recent = &candles[start_idx..];

    for i in (1..recent.len() - 1).rev() {
        let prev = recent[i - 1].high;
        let curr = recent[i].high;
        let next = recent[i + 1].high;
        if curr > prev && curr > next {
            return Some(curr);
        }
    }

    None
}

/// Average volume over the last `period` candles
pub fn calculate_average_volume(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period || period == 0 {
        return None;
    }

    let start_idx = candles.len().saturating_sub(period);
    let total: f64 = candles[start_idx..].iter().map(|c| c.volume).sum();
    Some(total / period as f64)
}

/// True if the latest candle's volume exceeds `threshold` times the recent average
pub fn is_volume_spike(candles: &[Candle], lookback: usize, threshold: f64) -> bool {
    if candles.len() < lookback + 1 {
        return false;
    }

    let current = candles[candles.len() - 1].volume;
    let baseline = &candles[candles.len() - lookback - 1..candles.len() - 1];
    let avg: f64 = baseline.iter().map(|c| c.volume).sum::<f64>() / baseline.len() as f64;

    current > threshold * avg
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_candles(bars: &[(f64, f64, f64, f64, f64)]) -> Vec<Candle> {
        bars.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close, volume))| Candle {
                instrument: "GBPUSD".to_string(),
                timestamp: Utc::now() + chrono::Duration::hours(i as i64),
                open,
                high,
                low,
                close,
                volume,
            })
            .collect()
    }

    #[test]
    fn test_uptrend_structure() {
        // Higher highs and higher lows
        let bars = vec![
            (1.2500, 1.2520, 1.2490, 1.2510, 1000.0),
            (1.2510, 1.2530, 1.2500, 1.2520, 1000.0),
            (1.2520, 1.2500, 1.2470, 1.2490, 1000.0), // swing low 1
            (1.2490, 1.2550, 1.2480, 1.2540, 1000.0), // swing high 1
            (1.2540, 1.2560, 1.2510, 1.2530, 1000.0),
            (1.2530, 1.2540, 1.2500, 1.2520, 1000.0), // swing low 2 (higher)
            (1.2520, 1.2600, 1.2510, 1.2580, 1000.0), // swing high 2 (higher)
            (1.2580, 1.2610, 1.2550, 1.2570, 1000.0),
            (1.2570, 1.2580, 1.2530, 1.2550, 1000.0), // swing low 3 (higher)
            (1.2550, 1.2650, 1.2540, 1.2620, 1000.0), // swing high 3 (higher)
        ];

        let structure = analyze_market_structure(&create_test_candles(&bars), 10);
        assert_eq!(structure, MarketStructure::HigherHighsHigherLows);
    }

    #[test]
    fn test_downtrend_structure() {
        let bars = vec![
            (1.3000, 1.3020, 1.2990, 1.3000, 1000.0),
            (1.3000, 1.3030, 1.2980, 1.2990, 1000.0),
            (1.2990, 1.3020, 1.2960, 1.2970, 1000.0), // swing high 1
            (1.2970, 1.2980, 1.2920, 1.2930, 1000.0), // swing low 1
            (1.2930, 1.2960, 1.2900, 1.2950, 1000.0), // swing high 2 (lower)
            (1.2950, 1.2960, 1.2880, 1.2890, 1000.0), // swing low 2 (lower)
            (1.2890, 1.2920, 1.2860, 1.2910, 1000.0), // swing high 3 (lower)
            (1.2910, 1.2920, 1.2820, 1.2830, 1000.0), // swing low 3 (lower)
            (1.2830, 1.2860, 1.2800, 1.2850, 1000.0),
            (1.2850, 1.2860, 1.2780, 1.2790, 1000.0),
        ];

        let structure = analyze_market_structure(&create_test_candles(&bars), 10);
        assert_eq!(structure, MarketStructure::LowerHighsLowerLows);
    }

    #[test]
    fn test_mixed_structure() {
        let bars = vec![
            (1.1000, 1.1020, 1.0980, 1.1000, 1000.0),
            (1.1000, 1.1030, 1.0970, 1.0990, 1000.0),
            (1.0990, 1.1020, 1.0980, 1.1010, 1000.0),
            (1.1010, 1.1030, 1.0990, 1.1000, 1000.0),
            (1.1000, 1.1020, 1.0980, 1.0990, 1000.0),
            (1.0990, 1.1030, 1.0970, 1.1010, 1000.0),
            (1.1010, 1.1030, 1.0990, 1.1000, 1000.0),
            (1.1000, 1.1020, 1.0980, 1.0990, 1000.0),
        ];

        let structure = analyze_market_structure(&create_test_candles(&bars), 8);
        assert_eq!(structure, MarketStructure::Mixed);
    }

    #[test]
    fn test_recent_swing_low() {
        let bars = vec![
            (1.1000, 1.1020, 1.0980, 1.1000, 1000.0),
            (1.1000, 1.1010, 1.0950, 1.0960, 1000.0), // swing low at 1.0950
            (1.0960, 1.1030, 1.0970, 1.1020, 1000.0),
            (1.1020, 1.1040, 1.1000, 1.1030, 1000.0),
        ];

        let low = recent_swing_low(&create_test_candles(&bars), 4).unwrap();
        assert!((low - 1.0950).abs() < 1e-9);
    }

    #[test]
    fn test_recent_swing_high() {
        let bars = vec![
            (1.1000, 1.1020, 1.0980, 1.1000, 1000.0),
            (1.1000, 1.1060, 1.0990, 1.1050, 1000.0), // swing high at 1.1060
            (1.1050, 1.1030, 1.0990, 1.1010, 1000.0),
            (1.1010, 1.1020, 1.0980, 1.0990, 1000.0),
        ];

        let high = recent_swing_high(&create_test_candles(&bars), 4).unwrap();
        assert!((high - 1.1060).abs() < 1e-9);
    }

    #[test]
    fn test_volume_spike() {
        let mut bars = vec![(1.1000, 1.1010, 1.0990, 1.1000, 1000.0); 10];
        bars.push((1.1000, 1.1050, 1.0990, 1.1040, 2500.0));

        let candles = create_test_candles(&bars);
        assert!(is_volume_spike(&candles, 10, 2.0));
        assert!(!is_volume_spike(&candles, 10, 3.0));
    }

    #[test]
    fn test_average_volume() {
        let bars = vec![
            (1.1000, 1.1010, 1.0990, 1.1000, 1000.0),
            (1.1000, 1.1010, 1.0990, 1.1000, 2000.0),
            (1.1000, 1.1010, 1.0990, 1.1000, 3000.0),
        ];

        let avg = calculate_average_volume(&create_test_candles(&bars), 3).unwrap();
        assert_eq!(avg, 2000.0);
    }
}
