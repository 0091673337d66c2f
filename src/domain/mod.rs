pub mod collaborators;
pub mod resource;
pub mod resource_module;
pub mod rset;
pub mod utils;
