#![forbid(unsafe_code)]

pub mod auth;
pub mod backend;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod drive;
pub mod error;
pub mod formats;
pub mod gemini;
pub mod generate;
pub mod ingest;
pub mod library;
pub mod logging;
pub mod session;
pub mod starter;
pub mod video;
pub mod viewer;
