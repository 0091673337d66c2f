pub mod clock;
pub mod hostlist;
pub mod id;
pub mod idset;
