#![allow(dead_code)]

use harq_config::{CfgHarq, SharedConfig, StackConfig};
use harq_core::Rnti;
use harq_entities::{HarqEntity, MacScheduler};

pub const UE1: Rnti = Rnti(0x46);
pub const UE2: Rnti = Rnti(0x47);

/// Creates a default config for testing. It can still be modified as needed
/// before passing it to one of the constructors below
pub fn default_test_config() -> StackConfig {
    let mut cfg = StackConfig::new(25);
    cfg.harq.max_retx = 3;
    cfg.harq.max_msg3_retx = 2;
    cfg
}

pub fn test_entity(harq: &CfgHarq) -> HarqEntity {
    HarqEntity::new(UE1, 1, harq).expect("valid harq config")
}

/// Scheduler plus the shared config it reads, so tests can poke the runtime state
pub fn test_scheduler(cfg: StackConfig) -> (MacScheduler, SharedConfig) {
    let shared = SharedConfig::from_config(cfg);
    let sched = MacScheduler::new(shared.clone()).expect("valid scheduler config");
    (sched, shared)
}
