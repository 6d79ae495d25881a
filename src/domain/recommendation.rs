//! Per-subject recommendations produced by analyst tasks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Recommended action for a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Action {
    /// Three-way polarity used for conflict detection
    pub fn stance(&self) -> Stance {
        match self {
            Self::StrongBuy | Self::Buy => Stance::Favorable,
            Self::Hold => Stance::Neutral,
            Self::Sell | Self::StrongSell => Stance::Unfavorable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBuy => "strong_buy",
            Self::Buy => "buy",
            Self::Hold => "hold",
            Self::Sell => "sell",
            Self::StrongSell => "strong_sell",
        }
    }
}

impl Default for Action {
    fn default() -> Self {
        Self::Hold
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "strong_buy" => Ok(Self::StrongBuy),
            "buy" => Ok(Self::Buy),
            "hold" => Ok(Self::Hold),
            "sell" => Ok(Self::Sell),
            "strong_sell" => Ok(Self::StrongSell),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// Polarity of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Favorable,
    Unfavorable,
    Neutral,
}

/// A typed recommendation for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub subject: String,
    pub action: Action,

    /// 0.0 ..= 1.0
    pub confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_price: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,

    #[serde(default)]
    pub rationale: String,
}

impl Recommendation {
    pub fn new(subject: impl Into<String>, action: Action, confidence: f64) -> Self {
        Self {
            subject: subject.into(),
            action,
            confidence: confidence.clamp(0.0, 1.0),
            target_price: None,
            stop_loss: None,
            rationale: String::new(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_price_bounds(mut self, target_price: Option<f64>, stop_loss: Option<f64>) -> Self {
        self.target_price = target_price;
        self.stop_loss = stop_loss;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_stance() {
        assert_eq!(Action::StrongBuy.stance(), Stance::Favorable);
        assert_eq!(Action::Buy.stance(), Stance::Favorable);
        assert_eq!(Action::Hold.stance(), Stance::Neutral);
        assert_eq!(Action::Sell.stance(), Stance::Unfavorable);
        assert_eq!(Action::StrongSell.stance(), Stance::Unfavorable);
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("Strong Buy".parse::<Action>(), Ok(Action::StrongBuy));
        assert_eq!("strong-sell".parse::<Action>(), Ok(Action::StrongSell));
        assert_eq!("HOLD".parse::<Action>(), Ok(Action::Hold));
        assert!("accumulate".parse::<Action>().is_err());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let rec = Recommendation::new("AAPL", Action::Buy, 1.7);
        assert_eq!(rec.confidence, 1.0);
    }
}
