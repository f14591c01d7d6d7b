use std::fmt;

use serde::{Deserialize, Serialize};

/// Directional call for a single indicator, an agent vote, or the whole report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    Bullish,
    Neutral,
    Bearish,
}

impl Signal {
    /// Numeric value used by the weighted synthesis: +1 / 0 / -1.
    pub fn value(self) -> f64 {
        match self {
            Signal::Bullish => 1.0,
            Signal::Neutral => 0.0,
            Signal::Bearish => -1.0,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::Bullish => "BULLISH",
            Signal::Neutral => "NEUTRAL",
            Signal::Bearish => "BEARISH",
        };
        f.write_str(s)
    }
}

/// Which side of the threshold pair is good for equities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdDirection {
    HigherIsBullish,
    LowerIsBullish,
}

/// Bull/bear boundary pair for one indicator.
///
/// With `HigherIsBullish`, a value strictly above `bullish` is BULLISH and a
/// value strictly below `bearish` is BEARISH. `LowerIsBullish` mirrors this.
/// Everything in between is NEUTRAL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Threshold {
    pub bullish: f64,
    pub bearish: f64,
    pub direction: ThresholdDirection,
}

impl Threshold {
    pub fn higher_is_bullish(bullish: f64, bearish: f64) -> Self {
        Self {
            bullish,
            bearish,
            direction: ThresholdDirection::HigherIsBullish,
        }
    }

    pub fn lower_is_bullish(bullish: f64, bearish: f64) -> Self {
        Self {
            bullish,
            bearish,
            direction: ThresholdDirection::LowerIsBullish,
        }
    }

    pub fn classify(&self, value: f64) -> Signal {
        match self.direction {
            ThresholdDirection::HigherIsBullish => {
                if value > self.bullish {
                    Signal::Bullish
                } else if value < self.bearish {
                    Signal::Bearish
                } else {
                    Signal::Neutral
                }
            }
            ThresholdDirection::LowerIsBullish => {
                if value < self.bullish {
                    Signal::Bullish
                } else if value > self.bearish {
                    Signal::Bearish
                } else {
                    Signal::Neutral
                }
            }
        }
    }

    /// The bullish boundary must sit on the bullish side of the bearish one.
    pub fn is_consistent(&self) -> bool {
        if !self.bullish.is_finite() || !self.bearish.is_finite() {
            return false;
        }
        match self.direction {
            ThresholdDirection::HigherIsBullish => self.bullish >= self.bearish,
            ThresholdDirection::LowerIsBullish => self.bullish <= self.bearish,
        }
    }
}

/// Maps a weighted score onto an overall signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SignalBands {
    /// Scores strictly above this are BULLISH.
    pub bullish_above: f64,
    /// Scores strictly below this are BEARISH.
    pub bearish_below: f64,
}

impl Default for SignalBands {
    fn default() -> Self {
        Self {
            bullish_above: 0.2,
            bearish_below: -0.2,
        }
    }
}

impl SignalBands {
    pub fn symmetric(width: f64) -> Self {
        Self {
            bullish_above: width,
            bearish_below: -width,
        }
    }

    pub fn classify(&self, score: f64) -> Signal {
        if score > self.bullish_above {
            Signal::Bullish
        } else if score < self.bearish_below {
            Signal::Bearish
        } else {
            Signal::Neutral
        }
    }
}
