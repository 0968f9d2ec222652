pub mod attachments;
pub mod config;
pub mod db;
pub mod model;
pub mod runner;
pub mod sync;
pub mod workable;
