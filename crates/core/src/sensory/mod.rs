pub mod dispatcher;
pub mod ingest;
pub mod sensors;
pub mod table;
