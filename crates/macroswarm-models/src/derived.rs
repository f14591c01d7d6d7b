use serde::{Deserialize, Serialize};

use crate::reading::ReadingSet;

/// Indicators computed from already-resolved component readings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
    /// Fed balance sheet minus TGA minus overnight reverse repo, in trillions.
    NetLiquidity,
    /// Forward earnings yield minus the 10Y Treasury yield, in percent.
    EquityRiskPremium,
}

impl DerivedKind {
    pub fn components(self) -> &'static [&'static str] {
        match self {
            DerivedKind::NetLiquidity => &["WALCL", "TGA", "RRP"],
            DerivedKind::EquityRiskPremium => &["SP500_FWD_PE", "DGS10"],
        }
    }

    pub fn formula(self) -> &'static str {
        match self {
            DerivedKind::NetLiquidity => "Net Liquidity = WALCL − TGA − RRP",
            DerivedKind::EquityRiskPremium => "ERP = (1 / Forward PE) − 10Y Yield",
        }
    }

    /// NaN when a component is missing, non-finite, or out of domain.
    pub fn compute(self, readings: &ReadingSet) -> f64 {
        match self {
            DerivedKind::NetLiquidity => {
                match (
                    readings.finite_value("WALCL"),
                    readings.finite_value("TGA"),
                    readings.finite_value("RRP"),
                ) {
                    // WALCL and TGA are published in millions, RRP in billions.
                    (Some(walcl), Some(tga), Some(rrp)) => {
                        walcl / 1_000_000.0 - tga / 1_000_000.0 - rrp / 1_000.0
                    }
                    _ => f64::NAN,
                }
            }
            DerivedKind::EquityRiskPremium => {
                match (
                    readings.finite_value("SP500_FWD_PE"),
                    readings.finite_value("DGS10"),
                ) {
                    (Some(fwd_pe), Some(y10)) if fwd_pe > 0.0 => 100.0 / fwd_pe - y10,
                    _ => f64::NAN,
                }
            }
        }
    }

    /// Formula with the run's numbers substituted in.
    pub fn explain(self, readings: &ReadingSet) -> Option<String> {
        let value = self.compute(readings);
        if !value.is_finite() {
            return None;
        }
        match self {
            DerivedKind::NetLiquidity => {
                let walcl_t = readings.finite_value("WALCL")? / 1_000_000.0;
                let tga_b = readings.finite_value("TGA")? / 1_000.0;
                let rrp_b = readings.finite_value("RRP")?;
                Some(format!(
                    "Net Liquidity ${value:.2}T = WALCL(${walcl_t:.2}T) − TGA(${tga_b:.0}B) − RRP(${rrp_b:.0}B)"
                ))
            }
            DerivedKind::EquityRiskPremium => {
                let fwd_pe = readings.finite_value("SP500_FWD_PE")?;
                let y10 = readings.finite_value("DGS10")?;
                let earnings_yield = 100.0 / fwd_pe;
                Some(format!(
                    "ERP {value:.2}% = Earnings Yield {earnings_yield:.2}% (1 / Fwd PE {fwd_pe:.1}x) − 10Y {y10:.2}%"
                ))
            }
        }
    }
}
