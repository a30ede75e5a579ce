//! Summary statistics over priced trades.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::DividendEvent;

/// Aggregates over trades with a resolved return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub total_trades: usize,
    /// Mean return per trade, 3 decimals.
    pub average_return: f64,
    /// Sum of returns, 3 decimals.
    pub total_return: f64,
    /// Trades with return > 0.
    pub positive_trades: usize,
    /// Trades with return <= 0; a flat trade counts as a loss.
    pub negative_trades: usize,
    /// Share of positive trades in percent, 2 decimals.
    pub profit_percentage: f64,
}

/// Result of `summarize`. "No valid trades" is distinct from zero performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Stats {
    NoValidTrades,
    Summary(TradeSummary),
}

impl Stats {
    pub fn summary(&self) -> Option<&TradeSummary> {
        match self {
            Stats::NoValidTrades => None,
            Stats::Summary(s) => Some(s),
        }
    }

    pub fn has_trades(&self) -> bool {
        matches!(self, Stats::Summary(_))
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stats::NoValidTrades => write!(f, "No valid trades to analyze."),
            Stats::Summary(s) => {
                writeln!(f, "Total trades:      {}", s.total_trades)?;
                writeln!(f, "Average return:    {:.3}", s.average_return)?;
                writeln!(f, "Total return:      {:.3}", s.total_return)?;
                writeln!(f, "Positive trades:   {}", s.positive_trades)?;
                writeln!(f, "Negative trades:   {}", s.negative_trades)?;
                write!(f, "Profit percentage: {:.2}%", s.profit_percentage)
            }
        }
    }
}

/// Trades without a return are excluded from every aggregate.
pub fn summarize<'a>(trades: impl IntoIterator<Item = &'a DividendEvent>) -> Stats {
    let returns: Vec<f64> = trades.into_iter().filter_map(|t| t.total_return).collect();
    if returns.is_empty() {
        return Stats::NoValidTrades;
    }

    let total_trades = returns.len();
    let sum: f64 = returns.iter().sum();
    let positive_trades = returns.iter().filter(|r| **r > 0.0).count();

    Stats::Summary(TradeSummary {
        total_trades,
        average_return: round_to(sum / total_trades as f64, 3),
        total_return: round_to(sum, 3),
        positive_trades,
        negative_trades: total_trades - positive_trades,
        profit_percentage: round_to(positive_trades as f64 / total_trades as f64 * 100.0, 2),
    })
}

/// Round half to even at `decimals` places, so 3.125 becomes 3.12.
fn round_to(x: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    let y = x * scale;
    let r = y.round();
    let halfway = (y - y.trunc()).abs() == 0.5;
    let even = if halfway && r % 2.0 != 0.0 { r - y.signum() } else { r };
    even / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn trade(ret: Option<f64>) -> DividendEvent {
        let mut e = DividendEvent::new(NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(), 0.25);
        e.total_return = ret;
        e
    }

    #[test]
    fn empty_and_unresolved_are_sentinel() {
        assert_eq!(summarize(std::iter::empty()), Stats::NoValidTrades);
        assert_eq!(summarize(&[trade(None), trade(None)]), Stats::NoValidTrades);
        assert_eq!(Stats::NoValidTrades.to_string(), "No valid trades to analyze.");
    }

    #[test]
    fn zero_return_is_a_loss() {
        let stats = summarize(&[trade(Some(0.0)), trade(Some(0.5)), trade(None)]);
        let s = stats.summary().unwrap();
        assert_eq!(s.total_trades, 2);
        assert_eq!(s.positive_trades, 1);
        assert_eq!(s.negative_trades, 1);
        assert_eq!(s.profit_percentage, 50.0);
    }

    #[test]
    fn rounding() {
        let trades = [trade(Some(0.33)), trade(Some(0.33)), trade(Some(-0.01))];
        let s = summarize(&trades).summary().cloned().unwrap();
        assert_eq!(s.total_return, 0.65);
        assert_eq!(s.average_return, 0.217);
        assert_eq!(s.profit_percentage, 66.67);
    }

    #[test]
    fn ties_round_to_even() {
        // 1 win in 32 trades: exactly 3.125%.
        let mut trades = vec![trade(Some(0.5))];
        trades.extend((0..31).map(|_| trade(Some(-0.1))));
        let s = summarize(&trades).summary().cloned().unwrap();
        assert_eq!(s.profit_percentage, 3.12);

        assert_eq!(round_to(0.0625, 3), 0.062);
        assert_eq!(round_to(-2.5, 0), -2.0);
        assert_eq!(round_to(66.666_666, 2), 66.67);
    }

    #[test]
    fn serializes_with_status_tag() {
        let json = serde_json::to_value(Stats::NoValidTrades).unwrap();
        assert_eq!(json, serde_json::json!({"status": "no_valid_trades"}));
        let json = serde_json::to_value(summarize(&[trade(Some(1.0))])).unwrap();
        assert_eq!(json["status"], "summary");
        assert_eq!(json["total_trades"], 1);
    }
}
