pub mod config_dto;
pub mod request_dto;
pub mod response_dto;
pub mod rv1_dto;
pub mod topology_dto;
