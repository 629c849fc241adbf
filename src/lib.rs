//! Peep Detection
//!
//! Real-time pose or face keypoints over a mirrored webcam feed, with a
//! privacy overlay for everyone except the main subject (the person closest
//! to the frame center).

pub mod app;
pub mod args;
pub mod camera;
pub mod config;
pub mod error;
pub mod geometry;
pub mod ml;
pub mod pipeline;
pub mod render;
pub mod selector;
pub mod subject;
pub mod telemetry;

pub use app::App;
