use std::f64::consts::PI;

use super::types::{AggregateResult, ProgressUpdate, SimulationParams};

/// Deterministic 32-bit generator: fixed increment, two mixing rounds per
/// draw. Two generators built from the same seed yield identical sequences.
struct Rng {
    state: u32,
}

impl Rng {
    fn new(seed: u32) -> Self {
        let state = if seed == 0 { 1 } else { seed };
        Self { state }
    }

    fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let a = self.state;
        let mut t = (a ^ (a >> 15)).wrapping_mul(a | 1);
        t = t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61)) ^ t;
        f64::from(t ^ (t >> 14)) / 4_294_967_296.0
    }

    /// Box-Muller transform. Always consumes two uniforms (zero draws are
    /// redrawn), so a sigma = 0 run advances the generator exactly like a
    /// sigma > 0 run with the same seed.
    fn standard_normal(&mut self) -> f64 {
        let mut u = 0.0;
        while u == 0.0 {
            u = self.next_f64();
        }
        let mut v = 0.0;
        while v == 0.0 {
            v = self.next_f64();
        }
        (-2.0 * u.ln()).sqrt() * (2.0 * PI * v).cos()
    }
}

/// Interpolated percentile with `p` in [0, 1]. Sorts in place; an empty
/// slice yields NaN.
fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    let rank = (n as f64 - 1.0) * p;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

/// Contribution for 1-based month `step`. Inflation-adjusted contributions
/// step up once per elapsed year, keyed off the zero-based month count.
fn monthly_contribution(params: &SimulationParams, step: usize) -> f64 {
    if params.monthly <= 0.0 {
        return 0.0;
    }
    if !params.adj_infl {
        return params.monthly;
    }
    let year_index = (step - 1) / 12;
    params.monthly * (1.0 + params.infl).powi(year_index as i32)
}

fn validate(params: &SimulationParams) -> Result<(), String> {
    if params.years < 1 {
        return Err("years must be >= 1".to_string());
    }
    if params.sims < 1 {
        return Err("sims must be >= 1".to_string());
    }

    for (name, value) in [
        ("mu", params.mu),
        ("sigma", params.sigma),
        ("ter", params.ter),
        ("bollo", params.bollo),
        ("initial", params.initial),
        ("monthly", params.monthly),
        ("infl", params.infl),
        ("goal", params.goal),
        ("tax", params.tax),
    ] {
        if !value.is_finite() {
            return Err(format!("{name} must be finite"));
        }
    }

    if params.sigma < 0.0 {
        return Err("sigma must be >= 0".to_string());
    }
    if params.initial < 0.0 {
        return Err("initial must be >= 0".to_string());
    }
    if params.monthly < 0.0 {
        return Err("monthly must be >= 0".to_string());
    }
    if !(0.0..=1.0).contains(&params.tax) {
        return Err("tax must be between 0 and 1".to_string());
    }

    Ok(())
}

fn render_csv(final_gross: &[f64], final_net: &[f64], contributed_total: f64) -> String {
    let mut csv = String::from("sim,final_gross,final_net,contributed_total\n");
    for (i, (gross, net)) in final_gross.iter().zip(final_net).enumerate() {
        csv.push_str(&format!(
            "{},{gross:.2},{net:.2},{contributed_total:.2}\n",
            i + 1
        ));
    }
    csv
}

/// Runs `params.sims` independent GBM trials over `params.years * 12` monthly
/// steps and aggregates them. Trials share one generator sequentially, so a
/// run is fully determined by its parameters. `on_progress` receives
/// best-effort status updates capped at 95%; completion is signaled only by
/// this function returning.
pub fn run_simulation<F>(
    params: &SimulationParams,
    mut on_progress: F,
) -> Result<AggregateResult, String>
where
    F: FnMut(ProgressUpdate),
{
    validate(params)?;

    let years = params.years as usize;
    let sims = params.sims as usize;
    let steps = years * 12;
    let dt = 1.0 / 12.0;

    let mu_net = params.mu - params.ter - params.bollo;
    let drift = (mu_net - 0.5 * params.sigma * params.sigma) * dt;
    let vol = params.sigma * dt.sqrt();

    let mut rng = Rng::new(params.seed);

    // Identical for every trial; doubles as the cost basis for the tax.
    let mut contributed_total = params.initial;
    for t in 1..=steps {
        contributed_total += monthly_contribution(params, t);
    }

    let mut end_year_gross = vec![vec![0.0_f64; sims]; years];
    let mut final_gross = vec![0.0_f64; sims];
    let mut final_net = vec![0.0_f64; sims];
    let mut first_hit_year = vec![0_u32; sims];

    let block = (sims / 20).max(1);

    for s in 0..sims {
        let mut w = params.initial;

        for t in 1..=steps {
            w += monthly_contribution(params, t);
            let z = rng.standard_normal();
            w *= (drift + vol * z).exp();

            if t % 12 == 0 {
                let y = t / 12 - 1;
                end_year_gross[y][s] = w;
                if first_hit_year[s] == 0 && w >= params.goal {
                    first_hit_year[s] = y as u32 + 1;
                }
            }

            if s == 0 && t % 240 == 0 {
                let percent = ((t as f64 / steps as f64) * 12.0).round().clamp(0.0, 95.0) as u8;
                on_progress(ProgressUpdate {
                    percent,
                    text: format!("Simulating month {t}/{steps}"),
                });
            }
        }

        final_gross[s] = w;
        let gain = (w - contributed_total).max(0.0);
        final_net[s] = w - params.tax * gain;

        if (s + 1) % block == 0 {
            let percent = ((s + 1) as f64 / sims as f64 * 95.0).round() as u8;
            on_progress(ProgressUpdate {
                percent,
                text: format!("Trials: {}/{}", s + 1, sims),
            });
        }
    }

    let mut final_net_sorted = final_net.clone();
    let p10 = percentile(&mut final_net_sorted, 0.10);
    let p50 = percentile(&mut final_net_sorted, 0.50);
    let p90 = percentile(&mut final_net_sorted, 0.90);

    let mut final_gross_sorted = final_gross.clone();
    let p50_gross = percentile(&mut final_gross_sorted, 0.50);
    let tax_on_p50 = params.tax * (p50_gross - contributed_total).max(0.0);

    let hit = final_net.iter().filter(|&&v| v >= params.goal).count();
    let prob_goal = hit as f64 / sims as f64;

    let mut timeline_years = Vec::with_capacity(years);
    let mut timeline_p10 = Vec::with_capacity(years);
    let mut timeline_p50 = Vec::with_capacity(years);
    let mut timeline_p90 = Vec::with_capacity(years);
    let mut prob_goal_by_year = Vec::with_capacity(years);
    for (y, row) in end_year_gross.iter_mut().enumerate() {
        // Snapshot probability for the year, not cumulative-ever-reached.
        let reached = row.iter().filter(|&&w| w >= params.goal).count();
        prob_goal_by_year.push(reached as f64 / sims as f64);

        timeline_years.push(y as u32 + 1);
        timeline_p10.push(percentile(row, 0.10));
        timeline_p50.push(percentile(row, 0.50));
        timeline_p90.push(percentile(row, 0.90));
    }

    // Time-to-goal histogram: one bucket per year plus a trailing "never".
    let mut ttg_counts = vec![0_u32; years + 1];
    for &y in &first_hit_year {
        if y == 0 {
            ttg_counts[years] += 1;
        } else {
            ttg_counts[y as usize - 1] += 1;
        }
    }
    let mut ttg_labels: Vec<String> = (1..=years).map(|y| y.to_string()).collect();
    ttg_labels.push("never".to_string());

    let never_pct = ttg_counts[years] as f64 / sims as f64;
    let mut hits_sorted: Vec<f64> = first_hit_year
        .iter()
        .filter(|&&y| y > 0)
        .map(|&y| f64::from(y))
        .collect();
    let ttg_meta = if hits_sorted.is_empty() {
        format!("Never: {:.1}%", never_pct * 100.0)
    } else {
        let median_year = percentile(&mut hits_sorted, 0.50).round() as u32;
        format!("Median: {median_year} years • Never: {:.1}%", never_pct * 100.0)
    };

    // Value histogram over the 1st..99th percentile span of final net;
    // tails accumulate in the edge bins.
    let bins = 25;
    let p01 = percentile(&mut final_net_sorted, 0.01);
    let p99 = percentile(&mut final_net_sorted, 0.99);
    let mut width = (p99 - p01) / bins as f64;
    if width == 0.0 {
        width = 1.0;
    }
    let hist_bins: Vec<f64> = (0..bins).map(|i| p01 + i as f64 * width).collect();
    let mut hist_counts = vec![0_u32; bins];
    for &v in &final_net {
        let idx = ((v - p01) / width).floor().max(0.0) as usize;
        hist_counts[idx.min(bins - 1)] += 1;
    }

    let csv = render_csv(&final_gross, &final_net, contributed_total);

    Ok(AggregateResult {
        p10,
        p50,
        p90,
        prob_goal,
        timeline_years,
        timeline_p10,
        timeline_p50,
        timeline_p90,
        prob_goal_by_year,
        ttg_labels,
        ttg_counts,
        ttg_meta,
        contributed_total,
        p50_gross,
        tax_on_p50,
        hist_bins,
        hist_counts,
        csv,
    })
}
