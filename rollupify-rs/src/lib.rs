// Allow uninlined format args for cleaner bail!/anyhow! macros
#![allow(clippy::uninlined_format_args)]
#![doc = include_str!("../README.md")]

pub mod bundler;
pub mod config;
pub mod error;
pub mod plugin;
mod staged;
pub mod transform;

#[macro_use]
extern crate lazy_static;

pub use anyhow;
pub use bundler::{BundleEmit, Bundler, InputOptions, OutputFormat, OutputOptions, SourceMapMode, SwcBundler};
pub use config::{BundlerConfig, ConfigSource, TransformOptions};
pub use error::{ConfigError, TransformError, TransformResult};
pub use plugin::Plugin;
pub use transform::{is_eligible, transform, Rollupify, Session, SessionState, Transform};
