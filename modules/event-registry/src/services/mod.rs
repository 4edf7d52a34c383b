pub mod registry_query_service;

pub use registry_query_service::RegistryQueryService;
