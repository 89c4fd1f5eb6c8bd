pub mod link_adapt;
pub mod mac_sched;
pub mod sched_result;
pub mod sched_ue;
