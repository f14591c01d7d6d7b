//! Built-in indicator catalog: the sources, thresholds, and agent layout used
//! when the configuration file does not override them.
//!
//! Fallback values are the last real observations at snapshot time and should
//! be refreshed periodically.

use chrono::NaiveDate;

use crate::config::{AgentSpec, DerivedSpec, FallbackConfig, IndicatorSpec, TierConfig, ValueBounds};
use crate::derived::DerivedKind;
use crate::signal::Threshold;
use crate::vote::Dimension;

fn snapshot(value: f64, source_url: &str) -> FallbackConfig {
    FallbackConfig {
        value,
        as_of: NaiveDate::from_ymd_opt(2026, 2, 12).unwrap_or_default(),
        source_url: source_url.to_string(),
    }
}

fn fred(series: &str) -> Vec<TierConfig> {
    vec![
        TierConfig::FredApi {
            series: series.to_string(),
        },
        TierConfig::FredCsv {
            series: series.to_string(),
        },
    ]
}

fn fred_url(series: &str) -> String {
    format!("https://fred.stlouisfed.org/series/{series}")
}

#[allow(clippy::too_many_arguments)]
fn indicator(
    key: &str,
    name: &str,
    name_en: &str,
    unit: &str,
    tiers: Vec<TierConfig>,
    fallback: FallbackConfig,
    threshold: Option<Threshold>,
    bounds: (f64, f64),
) -> IndicatorSpec {
    IndicatorSpec {
        key: key.to_string(),
        name: name.to_string(),
        name_en: name_en.to_string(),
        unit: unit.to_string(),
        tiers,
        fallback,
        threshold,
        bounds: Some(ValueBounds {
            min: bounds.0,
            max: bounds.1,
        }),
    }
}

pub fn default_indicators() -> Vec<IndicatorSpec> {
    vec![
        indicator(
            "WALCL",
            "Fed Balance Sheet",
            "Federal Reserve Total Assets",
            "Millions USD",
            fred("WALCL"),
            snapshot(6_605_909.0, &fred_url("WALCL")),
            None,
            (3_000_000.0, 15_000_000.0),
        ),
        indicator(
            "TGA",
            "Treasury General Account",
            "U.S. Treasury General Account Balance",
            "Millions USD",
            fred("WTREGEN"),
            snapshot(908_773.0, &fred_url("WTREGEN")),
            None,
            (0.0, 2_000_000.0),
        ),
        indicator(
            "RRP",
            "Overnight Reverse Repo",
            "Fed Overnight Reverse Repurchase Agreements",
            "B",
            fred("RRPONTSYD"),
            snapshot(
                1.0,
                "https://www.newyorkfed.org/markets/desk-operations/reverse-repo",
            ),
            None,
            (0.0, 3_000.0),
        ),
        indicator(
            "DGS10",
            "10Y Treasury Yield",
            "Market Yield on U.S. Treasury Securities at 10-Year Constant Maturity",
            "%",
            fred("DGS10"),
            snapshot(4.16, &fred_url("DGS10")),
            None,
            (0.0, 20.0),
        ),
        indicator(
            "T10Y2Y",
            "10Y-2Y Spread",
            "10-Year Treasury Minus 2-Year Treasury Constant Maturity",
            "%",
            fred("T10Y2Y"),
            snapshot(0.66, &fred_url("T10Y2Y")),
            Some(Threshold::higher_is_bullish(0.0, -0.5)),
            (-5.0, 5.0),
        ),
        indicator(
            "HY_OAS",
            "HY Credit Spread",
            "ICE BofA US High Yield Option-Adjusted Spread",
            "%",
            fred("BAMLH0A0HYM2"),
            snapshot(2.86, &fred_url("BAMLH0A0HYM2")),
            Some(Threshold::lower_is_bullish(3.0, 5.0)),
            (0.0, 25.0),
        ),
        indicator(
            "VIX",
            "VIX",
            "CBOE Volatility Index",
            "",
            {
                let mut tiers = fred("VIXCLS");
                tiers.push(TierConfig::Yahoo {
                    symbol: "^VIX".to_string(),
                    field: "regularMarketPrice".to_string(),
                });
                tiers
            },
            snapshot(17.79, &fred_url("VIXCLS")),
            Some(Threshold::lower_is_bullish(15.0, 25.0)),
            (5.0, 100.0),
        ),
        indicator(
            "SP500_PE",
            "S&P 500 TTM PE",
            "S&P 500 Price to Earnings Ratio (Trailing Twelve Months)",
            "x",
            vec![TierConfig::Scrape {
                url: "https://www.multpl.com/s-p-500-pe-ratio".to_string(),
                markers: vec![
                    "Current S&P 500 PE Ratio".to_string(),
                    "id=\"current\"".to_string(),
                ],
                min_value: Some(5.0),
            }],
            snapshot(29.81, "https://www.multpl.com/s-p-500-pe-ratio"),
            Some(Threshold::lower_is_bullish(18.0, 25.0)),
            (5.0, 100.0),
        ),
        indicator(
            "SP500_FWD_PE",
            "S&P 500 Forward PE",
            "S&P 500 12-Month Forward Price to Earnings Ratio",
            "x",
            vec![TierConfig::Yahoo {
                symbol: "^GSPC".to_string(),
                field: "forwardPE".to_string(),
            }],
            snapshot(22.0, "https://finance.yahoo.com/quote/%5EGSPC"),
            Some(Threshold::lower_is_bullish(18.0, 22.0)),
            (5.0, 100.0),
        ),
        indicator(
            "DXY",
            "US Dollar Index",
            "US Dollar Index (DXY)",
            "",
            vec![TierConfig::Yahoo {
                symbol: "DX-Y.NYB".to_string(),
                field: "regularMarketPrice".to_string(),
            }],
            snapshot(96.9, "https://finance.yahoo.com/quote/DX-Y.NYB"),
            Some(Threshold::lower_is_bullish(100.0, 105.0)),
            (60.0, 140.0),
        ),
    ]
}

pub fn default_derived() -> Vec<DerivedSpec> {
    vec![
        DerivedSpec {
            key: "NET_LIQUIDITY".to_string(),
            name: "Net Liquidity".to_string(),
            unit: "T".to_string(),
            kind: DerivedKind::NetLiquidity,
            threshold: Some(Threshold::higher_is_bullish(6.0, 5.5)),
        },
        DerivedSpec {
            key: "ERP".to_string(),
            name: "Equity Risk Premium".to_string(),
            unit: "%".to_string(),
            kind: DerivedKind::EquityRiskPremium,
            threshold: Some(Threshold::higher_is_bullish(2.0, 1.0)),
        },
    ]
}

pub fn default_agents() -> Vec<AgentSpec> {
    let members = |keys: &[&str]| keys.iter().map(|k| k.to_string()).collect();
    vec![
        AgentSpec {
            name: "LiquidityAgent".to_string(),
            dimension: Dimension::Liquidity,
            weight: 1.5,
            members: members(&["WALCL", "TGA", "RRP", "NET_LIQUIDITY"]),
            formula: Some(DerivedKind::NetLiquidity.formula().to_string()),
        },
        AgentSpec {
            name: "ValuationAgent".to_string(),
            dimension: Dimension::Valuation,
            weight: 1.3,
            members: members(&["SP500_PE", "SP500_FWD_PE", "DGS10", "ERP"]),
            formula: Some(DerivedKind::EquityRiskPremium.formula().to_string()),
        },
        AgentSpec {
            name: "RiskSentimentAgent".to_string(),
            dimension: Dimension::RiskSentiment,
            weight: 1.0,
            members: members(&["VIX", "HY_OAS", "T10Y2Y", "DXY"]),
            formula: Some("Risk = f(VIX, HY_OAS, Yield Curve, DXY)".to_string()),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_indicator_has_a_finite_fallback_inside_bounds() {
        for spec in default_indicators() {
            assert!(spec.fallback.value.is_finite(), "{}", spec.key);
            let bounds = spec.bounds.unwrap();
            assert!(bounds.contains(spec.fallback.value), "{}", spec.key);
        }
    }

    #[test]
    fn agents_cover_all_voting_indicators() {
        let agents = default_agents();
        let voting: Vec<String> = default_indicators()
            .into_iter()
            .filter(|i| i.threshold.is_some())
            .map(|i| i.key)
            .chain(default_derived().into_iter().map(|d| d.key))
            .collect();
        for key in voting {
            assert!(
                agents.iter().any(|a| a.members.contains(&key)),
                "{key} is not consumed by any agent"
            );
        }
    }
}
