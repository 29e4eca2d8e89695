/// Calculate Relative Strength Index (RSI)
///
/// RSI measures the magnitude of recent price changes:
/// - RSI > 70: overbought
/// - RSI < 30: oversold
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }

    let mut gains = Vec::new();
    let mut losses = Vec::new();

    for i in 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    if gains.len() < period {
        return None;
    }

    let avg_gain: f64 = gains.iter().rev().take(period).sum::<f64>() / period as f64;
    let avg_loss: f64 = losses.iter().rev().take(period).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_in_bounds() {
        let prices = vec![
            1.1000, 1.1004, 1.1002, 1.1008, 1.1005, 1.1010, 1.1013, 1.1009, 1.1015, 1.1020,
            1.1018, 1.1024, 1.1022, 1.1028, 1.1030,
        ];

        let rsi = calculate_rsi(&prices, 14).unwrap();
        assert!(rsi > 0.0 && rsi < 100.0);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![1.1000, 1.1002, 1.1001];
        assert!(calculate_rsi(&prices, 14).is_none());
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices = vec![1.1000, 1.1010, 1.1020, 1.1030, 1.1040, 1.1050];
        assert_eq!(calculate_rsi(&prices, 5), Some(100.0));
    }

    #[test]
    fn test_rsi_selloff_is_oversold() {
        let prices: Vec<f64> = (0..15).map(|i| 1.2000 - i as f64 * 0.0020).collect();
        let rsi = calculate_rsi(&prices, 14).unwrap();
        assert!(rsi < 30.0, "steady selloff should be oversold, got {:.1}", rsi);
    }
}
