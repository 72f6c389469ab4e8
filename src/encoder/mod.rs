//! Encoder invocation building and execution.

pub mod ffmpeg;
pub mod runner;

pub use ffmpeg::{FfmpegCommand, RenditionPaths};
pub use runner::{EncoderRunner, FfmpegRunner};
