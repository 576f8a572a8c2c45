/// Trend classification with a fixed deadband.
///
/// One function serves both indices and both levels (station and zone): it
/// only ever sees an initial and a final value.

use crate::model::{Trend, TrendLabel, TrendWindow};

/// Raw-index units a change must reach before it counts as a trend.
/// Applied uniformly to ERC and BI.
pub const TREND_DEADBAND: f64 = 3.0;

/// Classifies the change from `initial` to `final_value` using the default
/// deadband.
pub fn classify(initial: f64, final_value: f64) -> Trend {
    classify_with_deadband(initial, final_value, TREND_DEADBAND)
}

/// Classifies the change from `initial` to `final_value`.
///
/// A difference of exactly `+deadband` / `-deadband` is directional, not
/// "No Change".
pub fn classify_with_deadband(initial: f64, final_value: f64, deadband: f64) -> Trend {
    let diff = final_value - initial;
    let label = if diff >= deadband {
        TrendLabel::Increase
    } else if diff <= -deadband {
        TrendLabel::Decrease
    } else {
        TrendLabel::NoChange
    };

    Trend {
        label,
        magnitude: round_to(diff.abs(), 1),
        diff,
    }
}

pub fn classify_window(window: &TrendWindow, deadband: f64) -> Trend {
    classify_with_deadband(window.initial, window.final_value, deadband)
}

/// Direction word used in log lines: `UP 3.2`, `DOWN 1.0`, or just `0`.
pub fn describe(trend: &Trend) -> String {
    if trend.diff > 0.0 {
        format!("UP {:.1}", trend.magnitude)
    } else if trend.diff < 0.0 {
        format!("DOWN {:.1}", trend.magnitude)
    } else {
        format!("{:.1}", trend.magnitude)
    }
}

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
