use serde::Serialize;

/// Inputs for one Monte Carlo run. Rates are annualized decimals
/// (0.05 = 5%); `tax` applies to realized gains above contributed capital.
#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub years: u32,
    pub sims: u32,
    pub mu: f64,
    pub sigma: f64,
    pub ter: f64,
    pub bollo: f64,
    pub initial: f64,
    pub monthly: f64,
    pub adj_infl: bool,
    pub infl: f64,
    pub goal: f64,
    pub tax: f64,
    pub seed: u32,
}

/// Everything the engine hands back for one run. Timeline vectors are
/// indexed by year (1-based years reported in `timeline_years`); the two
/// histograms carry parallel label/bin and count vectors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub prob_goal: f64,
    pub timeline_years: Vec<u32>,
    pub timeline_p10: Vec<f64>,
    pub timeline_p50: Vec<f64>,
    pub timeline_p90: Vec<f64>,
    pub prob_goal_by_year: Vec<f64>,
    pub ttg_labels: Vec<String>,
    pub ttg_counts: Vec<u32>,
    pub ttg_meta: String,
    pub contributed_total: f64,
    pub p50_gross: f64,
    pub tax_on_p50: f64,
    pub hist_bins: Vec<f64>,
    pub hist_counts: Vec<u32>,
    pub csv: String,
}

/// Coarse status update emitted while a run is in flight. `percent` never
/// reaches 100; completion is signaled by the terminal result message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub text: String,
}
