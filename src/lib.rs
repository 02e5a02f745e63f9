pub mod classify;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod finalize;
pub mod logging;
pub mod pipeline;
pub mod probe;
pub mod scanner;

pub use classify::{Classifier, ConversionRules, ProbeFailurePolicy, StreamDirective, StreamPlan};
pub use config::Settings;
pub use executor::{CancelToken, ShellRunner};
pub use pipeline::{Pipeline, RunSummary};
pub use probe::{MediaInfoProbe, MediaProbe, TrackDescriptor};
