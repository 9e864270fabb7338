pub mod archive;
pub mod config;
pub mod confluence;
pub mod http;
pub mod jira;
pub mod render;
pub mod widgets;
