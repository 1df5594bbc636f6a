//! # osprobe-core
//!
//! Platform-agnostic core of osprobe. Everything here is pure logic over
//! bytes and traits, so it is tested on every host:
//!
//! - `capability`: the capability registry (`Capability`, `CapabilitySet`,
//!   `CapabilityProbe`, `invoke`)
//! - `query`: two-phase sized kernel queries with bounded retry, and the
//!   doubling read used for symlinks
//! - `procargs`: decoder for the raw per-process argument area
//! - `layout`: process-table record layouts per {platform, word width}
//! - `process`: `ProcessDescriptor` with its memoized argument cache
//! - `fallback`: primary/secondary file bindings switched on linkage
//!   failure
//! - `kprint`, `env`, `error`: logging, configuration helpers, errors
//!
//! The platform bindings implementing these traits live in `osprobe-sys`.

pub mod kprint;
pub mod env;
pub mod error;
pub mod platform;
pub mod capability;
pub mod query;
pub mod procargs;
pub mod layout;
pub mod process;
pub mod fallback;

// Re-exports
pub use capability::{invoke, Capability, CapabilityProbe, CapabilitySet};
pub use error::{ErrorClass, NativeError, NativeResult};
pub use fallback::{FallbackChain, FileBinding};
pub use kprint::{LogLevel, Logger};
pub use layout::ProcTableLayout;
pub use platform::{Platform, WordWidth};
pub use process::{ArgumentSource, NoArguments, Pid, ProcessDescriptor};
pub use procargs::ProcessArgs;
pub use query::{GrowRead, KernelQuery, QueryError, QueryKey, SizedQuery, SizedQueryState};
