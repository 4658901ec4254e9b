pub mod agents;
pub mod cases;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod model;
pub mod retry;
pub mod similarity;
pub mod storage;
