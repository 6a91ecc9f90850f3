pub mod cli;
pub mod completion;
pub mod downloader;
pub mod error;
pub mod keypath;
pub mod listing;
pub mod memory_store;
pub mod progress;
pub mod queue;
pub mod s3_client;
pub mod uri;
pub mod worker;
