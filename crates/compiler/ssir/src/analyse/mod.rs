pub mod dominators;
pub mod structured;
