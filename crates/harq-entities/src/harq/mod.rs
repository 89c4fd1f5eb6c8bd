pub mod dl_harq;
pub mod feedback;
pub mod harq_entity;
pub mod harq_proc;
pub mod ul_harq;
