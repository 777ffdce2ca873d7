#![forbid(unsafe_code)]

pub mod app;
pub mod cli;
pub mod commands;
pub mod content;
pub mod course;
pub mod error;
pub mod extract;
pub mod logging;
pub mod media;
pub mod openai;
pub mod outline;
pub mod service;
