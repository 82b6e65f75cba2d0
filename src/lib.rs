pub mod archive;
pub mod bandit;
pub mod cli;
pub mod collab;
pub mod config;
pub mod controller;
pub mod credit;
pub mod error;
pub mod experiment;
pub mod llm;
pub mod logging;
pub mod warmup;
