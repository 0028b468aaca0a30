pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod fit;
pub mod host;
pub mod keys;
pub mod options;
pub mod widget;
