pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod cursor;
pub mod db;
pub mod delivery;
pub mod entities;
pub mod error;
pub mod icons;
pub mod jobs;
pub mod logger;
pub mod storage;
pub mod store;
pub mod tags;
pub mod transcoder;
pub mod utils;
pub mod variants;
