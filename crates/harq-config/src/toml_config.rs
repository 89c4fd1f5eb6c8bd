use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;
use toml::Value;

use super::stack_config::{CfgCell, CfgHarq, CfgSched, SharedConfig, StackConfig, StackState};
use super::stack_config_sim::{CfgSimDto, apply_sim_patch};

/// Build `SharedConfig` from a TOML configuration string
pub fn from_toml_str(toml_str: &str) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let root: TomlConfigRoot = toml::from_str(toml_str)?;

    // Various sanity checks
    let expected_config_version = "0.1";
    if !root.config_version.eq(expected_config_version) {
        return Err(format!(
            "Unrecognized config_version: {}, expect {}",
            root.config_version, expected_config_version
        )
        .into());
    }
    if !root.extra.is_empty() {
        return Err(format!("Unrecognized top-level fields: {:?}", sorted_keys(&root.extra)).into());
    }
    if !root.cell.extra.is_empty() {
        return Err(format!("Unrecognized fields in cell: {:?}", sorted_keys(&root.cell.extra)).into());
    }
    if let Some(ref harq) = root.harq {
        if !harq.extra.is_empty() {
            return Err(format!("Unrecognized fields in harq: {:?}", sorted_keys(&harq.extra)).into());
        }
    }
    if let Some(ref sched) = root.sched {
        if !sched.extra.is_empty() {
            return Err(format!("Unrecognized fields in sched: {:?}", sorted_keys(&sched.extra)).into());
        }
    }
    if let Some(ref sim) = root.sim {
        if !sim.extra.is_empty() {
            return Err(format!("Unrecognized fields in sim: {:?}", sorted_keys(&sim.extra)).into());
        }
    }
    if let Some(ref ss) = root.stack_state {
        if !ss.extra.is_empty() {
            return Err(format!("Unrecognized fields in stack_state: {:?}", sorted_keys(&ss.extra)).into());
        }
    }

    // Build config from required and optional values
    let mut cfg = StackConfig {
        debug_log: root.debug_log,
        cell: CfgCell::default(),
        harq: CfgHarq::default(),
        sched: CfgSched::default(),
        sim: None,
    };

    apply_cell_patch(&mut cfg.cell, root.cell);

    if let Some(harq) = root.harq {
        apply_harq_patch(&mut cfg.harq, harq);
    }

    if let Some(sched) = root.sched {
        apply_sched_patch(&mut cfg.sched, sched);
    }

    if let Some(sim) = root.sim {
        cfg.sim = Some(apply_sim_patch(sim));
    }

    let mut state = StackState::default();
    if let Some(ss) = root.stack_state {
        state.max_retx_override = ss.max_retx_override;
    }

    Ok(SharedConfig::try_from_parts(cfg, state)?)
}

/// Build `SharedConfig` from any reader.
pub fn from_reader<R: Read>(reader: R) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let mut contents = String::new();
    let mut reader = BufReader::new(reader);
    reader.read_to_string(&mut contents)?;
    from_toml_str(&contents)
}

/// Build `SharedConfig` from a file path.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let f = File::open(path)?;
    let r = BufReader::new(f);
    let cfg = from_reader(r)?;
    Ok(cfg)
}

fn apply_cell_patch(dst: &mut CfgCell, src: CellDto) {
    dst.nof_prb = src.nof_prb;
    if let Some(v) = src.nrb_pucch {
        dst.nrb_pucch = v;
    }
}

fn apply_harq_patch(dst: &mut CfgHarq, src: HarqDto) {
    if let Some(v) = src.nof_procs {
        dst.nof_procs = v;
    }
    if let Some(v) = src.max_retx {
        dst.max_retx = v;
    }
    if let Some(v) = src.max_msg3_retx {
        dst.max_msg3_retx = v;
    }
    if let Some(v) = src.dl_async {
        dst.dl_async = v;
    }
    if let Some(v) = src.pid_timeout_ttis {
        dst.pid_timeout_ttis = v;
    }
}

fn apply_sched_patch(dst: &mut CfgSched, src: SchedDto) {
    if let Some(v) = src.dl_mcs {
        dst.dl_mcs = v;
    }
    if let Some(v) = src.ul_mcs {
        dst.ul_mcs = v;
    }
    if let Some(v) = src.max_dl_rbg_per_ue {
        dst.max_dl_rbg_per_ue = v;
    }
    if let Some(v) = src.max_ul_prb_per_ue {
        dst.max_ul_prb_per_ue = v;
    }
}

fn sorted_keys(map: &HashMap<String, Value>) -> Vec<&str> {
    let mut v: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
    v.sort_unstable();
    v
}

/// ----------------------- DTOs for input shape -----------------------

#[derive(Deserialize)]
struct TomlConfigRoot {
    config_version: String,
    debug_log: Option<String>,

    cell: CellDto,

    #[serde(default)]
    harq: Option<HarqDto>,

    #[serde(default)]
    sched: Option<SchedDto>,

    #[serde(default)]
    sim: Option<CfgSimDto>,

    #[serde(default)]
    stack_state: Option<StackStatePatch>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct CellDto {
    nof_prb: u32,
    nrb_pucch: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct HarqDto {
    nof_procs: Option<usize>,
    max_retx: Option<u32>,
    max_msg3_retx: Option<u32>,
    dl_async: Option<bool>,
    pid_timeout_ttis: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct SchedDto {
    dl_mcs: Option<u32>,
    ul_mcs: Option<u32>,
    max_dl_rbg_per_ue: Option<u32>,
    max_ul_prb_per_ue: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Default, Deserialize)]
struct StackStatePatch {
    max_retx_override: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        config_version = "0.1"

        [cell]
        nof_prb = 50
        nrb_pucch = 2

        [harq]
        max_retx = 3
        dl_async = false

        [sched]
        dl_mcs = 20

        [sim]
        nof_ues = 2
        dl_bler = 0.2
        nof_ttis = 0
    "#;

    #[test]
    fn test_parse_example() {
        let shared = from_toml_str(EXAMPLE).unwrap();
        let cfg = shared.config();
        assert_eq!(cfg.cell.nof_prb, 50);
        assert_eq!(cfg.harq.max_retx, 3);
        assert_eq!(cfg.harq.nof_procs, 8);
        assert!(!cfg.harq.dl_async);
        assert_eq!(cfg.sched.dl_mcs, 20);
        assert_eq!(cfg.sched.ul_mcs, 10);

        let sim = cfg.sim.as_ref().unwrap();
        assert_eq!(sim.nof_ues, 2);
        assert_eq!(sim.nof_ttis, None);
        assert!((sim.dl_bler - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let toml_str = "config_version = \"0.1\"\n[cell]\nnof_prb = 25\nbogus = 1\n";
        let err = from_toml_str(toml_str).err().unwrap();
        assert!(err.to_string().contains("bogus"));

        let toml_str = "config_version = \"0.1\"\n[cell]\nnof_prb = 25\n[harq]\nmax_retxx = 1\n";
        assert!(from_toml_str(toml_str).is_err());
    }

    #[test]
    fn test_version_and_validation() {
        let toml_str = "config_version = \"0.0\"\n[cell]\nnof_prb = 25\n";
        assert!(from_toml_str(toml_str).is_err());

        // Zero retransmissions never reaches the scheduler
        let toml_str = "config_version = \"0.1\"\n[cell]\nnof_prb = 25\n[harq]\nmax_retx = 0\n";
        let err = from_toml_str(toml_str).err().unwrap();
        assert!(err.to_string().contains("max_retx"));
    }
}
