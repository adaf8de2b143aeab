pub mod cli;
pub mod compliance;
pub mod config;
pub mod core;
pub mod exit;
pub mod logs;
pub mod platform;
pub mod providers;
pub mod scanner;
pub mod ui;

pub use compliance::{ComplianceMapper, Framework, MappingConfig};
pub use core::{CheckType, Finding, ProviderKind, Severity};
pub use providers::{CloudProvider, Credentials};
pub use scanner::CloudScanner;
