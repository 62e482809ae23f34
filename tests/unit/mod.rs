pub mod diagnostics_tests;
pub mod doctype_tests;
pub mod error_tests;
pub mod resource_tests;
pub mod schema_loader_tests;
