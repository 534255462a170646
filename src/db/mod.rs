pub mod catalog;
pub mod connectors;
pub mod gateway;
pub mod import;
pub mod schema;
