pub mod bridge;
pub mod context;
pub mod coordinator;
pub mod summarizer;
