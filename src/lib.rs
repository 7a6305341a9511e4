pub mod atlas;
pub mod camera;
pub mod config;
pub mod geometry;
pub mod initializer;
pub mod local_mapping;
pub mod loop_closing;
pub mod optimizer;
pub mod platform;
pub mod system;
pub mod tracking;
