pub mod embedding;
pub mod store;
