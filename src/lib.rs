pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fileset;
pub mod fs_util;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod query;
pub mod selection;
pub mod store;
