//! Gas profiling: per-PC → line → function aggregation
//!
//! When profiling is enabled, every computation carries per-PC gas maps
//! (see the profiling gas mode). This module folds them:
//! - [`by_pc`] adjusts raw per-PC charges for child-call gas, attributing
//!   each child computation's net gas away from its call-site PC
//! - [`by_line`] folds PCs onto source lines through the compiler's
//!   PC-position map
//! - [`LineProfile`] merges line data across computations and contracts
//! - [`ProfileStore`] accumulates per-call statistics keyed by
//!   `(address, contract, function)` with count/mean/median/stdev/min/max
//!
//! Output tables sort by mean gas, most expensive first.

use std::collections::{BTreeMap, HashMap, HashSet};

use alloy::primitives::Address;

use crate::contract::artifact::CompilerArtifact;
use crate::env::registry::RegisteredContract;
use crate::env::Env;
use crate::types::Computation;

/// Gas attributed to one PC (or one line, after folding)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Datum {
    pub gas_used: i64,
    pub gas_refunded: i64,
    pub child_gas_used: i64,
    pub child_gas_refunded: i64,
}

impl Datum {
    /// Gas net of refunds, children included
    pub fn net_gas(&self) -> i64 {
        self.gas_used - self.gas_refunded
    }

    /// Gas net of refunds and child-computation costs
    pub fn net_tot_gas(&self) -> i64 {
        self.gas_used - self.child_gas_used - self.gas_refunded + self.child_gas_refunded
    }

    pub fn merge(&mut self, other: &Datum) {
        self.gas_used += other.gas_used;
        self.gas_refunded += other.gas_refunded;
        self.child_gas_used += other.child_gas_used;
        self.child_gas_refunded += other.child_gas_refunded;
    }

    /// Back a child computation's gas out of this call-site datum
    ///
    /// The child's gas shows up under its own contract in the profile, so
    /// the call site keeps only the call overhead.
    pub fn adjust_child(&mut self, child: &Computation) {
        self.gas_used -= child.gas_used as i64;
        self.gas_refunded -= child.gas_refunded;
        self.child_gas_used += child.gas_used as i64;
        self.child_gas_refunded += child.gas_refunded;
    }
}

/// Per-PC data for one computation, child gas adjusted
pub fn by_pc(computation: &Computation) -> BTreeMap<usize, Datum> {
    let mut ret: BTreeMap<usize, Datum> = BTreeMap::new();
    let Some(profile) = &computation.gas_profile else {
        return ret;
    };
    for (pc, gas) in &profile.gas_used_of {
        ret.entry(*pc).or_default().gas_used = *gas;
    }
    for (pc, gas) in &profile.gas_refunded_of {
        ret.entry(*pc).or_default().gas_refunded = *gas;
    }
    for (pc, child) in computation.child_pcs.iter().zip(&computation.children) {
        ret.entry(*pc).or_default().adjust_child(child);
    }
    ret
}

/// Fold per-PC data onto source lines
///
/// Tracks the "current line" as the most recent PC with a source-map
/// entry; PCs between mapped positions accrue to that line. Each PC counts
/// once even when the trace revisits it.
pub fn by_line(artifact: &CompilerArtifact, computation: &Computation) -> BTreeMap<u32, Datum> {
    let pc_data = by_pc(computation);
    let line_map = &artifact.source_map.pc_pos_map;
    let mut ret: BTreeMap<u32, Datum> = BTreeMap::new();
    let mut current_line: Option<u32> = None;
    let mut seen: HashSet<usize> = HashSet::new();
    for pc in &computation.pc_trace {
        if let Some((lineno, ..)) = line_map.get(pc) {
            current_line = Some(*lineno);
        }
        if let Some(line) = current_line {
            if seen.insert(*pc) {
                if let Some(datum) = pc_data.get(pc) {
                    ret.entry(line).or_default().merge(datum);
                } else {
                    ret.entry(line).or_default();
                }
            }
        }
    }
    ret
}

/// Identity of one profiled source line
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LineId {
    pub address: Address,
    pub contract_name: String,
    pub lineno: u32,
}

/// Line-granular profile, mergeable across computations and contracts
#[derive(Clone, Debug, Default)]
pub struct LineProfile {
    profile: HashMap<LineId, Datum>,
    /// Source text per line, for the summary
    line_src: HashMap<LineId, String>,
}

impl LineProfile {
    /// Profile one computation tree, attributing child-computation lines
    /// to their owning (registered) contracts
    pub fn from_computation(
        contracts: &HashMap<Address, RegisteredContract>,
        computation: &Computation,
    ) -> Self {
        let mut ret = Self::default();
        ret.merge_computation(contracts, computation);
        ret
    }

    fn merge_computation(
        &mut self,
        contracts: &HashMap<Address, RegisteredContract>,
        computation: &Computation,
    ) {
        if let Some(found) = contracts.get(&computation.msg.code_address) {
            if let Some(artifact) = &found.reg.artifact {
                for (lineno, datum) in by_line(artifact, computation) {
                    let id = LineId {
                        address: computation.msg.to,
                        contract_name: found.reg.name.clone(),
                        lineno,
                    };
                    if let Some(src) = artifact.source_line(lineno) {
                        self.line_src.insert(id.clone(), src.trim_end().to_string());
                    }
                    self.profile.entry(id).or_default().merge(&datum);
                }
            }
        }
        // black-box children are skipped; registered children contribute
        // their own lines
        for child in &computation.children {
            self.merge_computation(contracts, child);
        }
    }

    pub fn merge(&mut self, other: &LineProfile) {
        for (id, datum) in &other.profile {
            self.profile.entry(id.clone()).or_default().merge(datum);
        }
        for (id, src) in &other.line_src {
            self.line_src.entry(id.clone()).or_insert_with(|| src.clone());
        }
    }

    /// Raw `(line, datum)` pairs, unsorted
    pub fn raw_summary(&self) -> Vec<(&LineId, &Datum)> {
        self.profile.iter().collect()
    }

    /// Net gas totals across all lines
    pub fn totals(&self) -> (i64, i64) {
        let net_gas = self.profile.values().map(Datum::net_gas).sum();
        let net_tot_gas = self.profile.values().map(Datum::net_tot_gas).sum();
        (net_gas, net_tot_gas)
    }

    /// Human-readable summary, by `net_tot_gas` descending
    pub fn summary(&self, limit: usize) -> String {
        let mut rows = self.raw_summary();
        rows.sort_by_key(|(_, datum)| std::cmp::Reverse(datum.net_tot_gas()));
        if limit > 0 {
            rows.truncate(limit);
        }
        let mut lines = Vec::with_capacity(rows.len());
        for (id, datum) in &rows {
            let src = self.line_src.get(id).cloned().unwrap_or_default();
            lines.push((
                format!(
                    "{}:{}:{} net_tot_gas: {}",
                    id.address.to_checksum(None),
                    id.contract_name,
                    id.lineno,
                    datum.net_tot_gas()
                ),
                src,
            ));
        }
        let width = lines.iter().map(|(left, _)| left.len()).max().unwrap_or(0);
        lines
            .iter()
            .map(|(left, right)| format!("{left:width$}  {}", right.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Summary statistics over a gas series
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub mean: i64,
    pub median: i64,
    pub stdev: i64,
    pub min: i64,
    pub max: i64,
}

impl Stats {
    pub fn new(data: &[i64]) -> Self {
        if data.is_empty() {
            return Self::default();
        }
        let count = data.len();
        let mean = data.iter().sum::<i64>() as f64 / count as f64;
        let mut sorted = data.to_vec();
        sorted.sort_unstable();
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2
        } else {
            sorted[count / 2]
        };
        let stdev = if count > 1 {
            let variance = data
                .iter()
                .map(|x| (*x as f64 - mean).powi(2))
                .sum::<f64>()
                / (count - 1) as f64;
            variance.sqrt() as i64
        } else {
            0
        };
        Self {
            count,
            mean: mean as i64,
            median,
            stdev,
            min: sorted[0],
            max: sorted[count - 1],
        }
    }
}

/// Identity of one profiled external call target
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContractMethodInfo {
    pub address: Address,
    pub contract_name: String,
    pub fn_name: String,
}

/// Gas series for one call target
#[derive(Clone, Debug, Default)]
pub struct CallGasStats {
    pub net_gas: Vec<i64>,
    pub net_tot_gas: Vec<i64>,
}

impl CallGasStats {
    pub fn merge_gas_data(&mut self, net_gas: i64, net_tot_gas: i64) {
        self.net_gas.push(net_gas);
        self.net_tot_gas.push(net_tot_gas);
    }

    pub fn net_gas_stats(&self) -> Stats {
        Stats::new(&self.net_gas)
    }
}

/// Accumulated profiling results of an environment
#[derive(Clone, Debug, Default)]
pub struct ProfileStore {
    pub call_profiles: HashMap<ContractMethodInfo, CallGasStats>,
    pub line_profiles: HashMap<LineId, Vec<i64>>,
    line_src: HashMap<LineId, String>,
    line_fn: HashMap<LineId, String>,
}

impl ProfileStore {
    pub fn is_empty(&self) -> bool {
        self.call_profiles.is_empty()
    }
}

/// Fold one profiled computation into the store
///
/// Caches the call-level gas series under `(address, contract, fn)` and
/// appends per-line net gas. Recurses into child computations whose
/// contracts are registered; black-box children are skipped.
pub(crate) fn cache_computation(
    contracts: &HashMap<Address, RegisteredContract>,
    store: &mut ProfileStore,
    computation: &Computation,
) {
    let Some(found) = contracts.get(&computation.msg.code_address) else {
        return;
    };
    if let Some(artifact) = &found.reg.artifact {
        let fn_name = computation
            .selector()
            .and_then(|sel| found.reg.method_for(sel))
            .and_then(|function| function.name().map(str::to_string))
            .unwrap_or_else(|| "unnamed".to_string());

        let mut single = LineProfile::default();
        let lines = by_line(artifact, computation);
        for (lineno, datum) in &lines {
            let id = LineId {
                address: computation.msg.to,
                contract_name: found.reg.name.clone(),
                lineno: *lineno,
            };
            if let Some(src) = artifact.source_line(*lineno) {
                store.line_src.insert(id.clone(), src.trim_end().to_string());
            }
            store.line_fn.insert(id.clone(), fn_name.clone());
            store
                .line_profiles
                .entry(id.clone())
                .or_default()
                .push(datum.net_gas());
            single.profile.insert(id, *datum);
        }

        let (sum_net_gas, sum_net_tot_gas) = single.totals();
        store
            .call_profiles
            .entry(ContractMethodInfo {
                address: computation.msg.to,
                contract_name: found.reg.name.clone(),
                fn_name,
            })
            .or_default()
            .merge_gas_data(sum_net_gas, sum_net_tot_gas);
    }

    for child in &computation.children {
        cache_computation(contracts, store, child);
    }
}

fn format_row(columns: &[String], widths: &[usize]) -> String {
    columns
        .iter()
        .zip(widths)
        .map(|(col, width)| format!("{col:width$}"))
        .collect::<Vec<_>>()
        .join("  ")
}

fn render_table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (ix, col) in row.iter().enumerate() {
            widths[ix] = widths[ix].max(col.len());
        }
    }
    let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();
    let separator = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("  ");
    let mut out = vec![format_row(&header, &widths), separator];
    out.extend(rows.iter().map(|row| format_row(row, &widths)));
    out.join("\n")
}

/// Call-level profile table, by mean gas descending
pub fn get_call_profile_table(env: &Env) -> String {
    let mut entries: Vec<(&ContractMethodInfo, Stats)> = env
        .profile
        .call_profiles
        .iter()
        .map(|(info, stats)| (info, stats.net_gas_stats()))
        .collect();
    entries.sort_by_key(|(_, stats)| std::cmp::Reverse(stats.mean));

    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|(info, stats)| {
            vec![
                info.contract_name.clone(),
                info.address.to_checksum(None),
                info.fn_name.clone(),
                stats.count.to_string(),
                stats.mean.to_string(),
                stats.median.to_string(),
                stats.stdev.to_string(),
                stats.min.to_string(),
                stats.max.to_string(),
            ]
        })
        .collect();
    render_table(
        &[
            "Contract", "Address", "Computation", "Count", "Mean", "Median", "Stdev", "Min", "Max",
        ],
        &rows,
    )
}

/// Line-level profile table, by mean gas descending
pub fn get_line_profile_table(env: &Env) -> String {
    let mut entries: Vec<(&LineId, Stats)> = env
        .profile
        .line_profiles
        .iter()
        .map(|(id, series)| (id, Stats::new(series)))
        .collect();
    entries.sort_by_key(|(_, stats)| std::cmp::Reverse(stats.mean));

    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|(id, stats)| {
            let fn_name = env
                .profile
                .line_fn
                .get(id)
                .cloned()
                .unwrap_or_default();
            let src = env
                .profile
                .line_src
                .get(id)
                .cloned()
                .unwrap_or_default();
            vec![
                format!("{}({})", id.contract_name, fn_name),
                format!("{:>4}: {}", id.lineno, src.trim()),
                stats.count.to_string(),
                stats.mean.to_string(),
                stats.median.to_string(),
                stats.stdev.to_string(),
                stats.min.to_string(),
                stats.max.to_string(),
            ]
        })
        .collect();
    render_table(
        &["Contract", "Computation", "Count", "Mean", "Median", "Stdev", "Min", "Max"],
        &rows,
    )
}
