//! RiskView - client runtime for asynchronous risk analysis jobs
//!
//! Turns a long-running backend analysis job into a live view of
//! per-entity risk records:
//! - Task polling with a bounded lifetime and guaranteed cleanup
//! - Normalization of the backend's parallel result arrays
//! - Filtered / searched / sorted views recomputed on every input change
//! - Virtualized grid layout with variable-height (expandable) rows

pub mod types;
pub mod error;
pub mod config;
pub mod backend;
pub mod http_backend;
pub mod normalizer;
pub mod view;
pub mod poller;
pub mod grid;
pub mod state;
pub mod stub_server;

pub use types::*;
pub use error::{BackendError, JobError};
pub use config::{ClientConfig, GridConfig, PollerConfig};
pub use backend::{AnalysisBackend, ScriptStep, ScriptedBackend};
pub use http_backend::HttpBackend;
pub use normalizer::{normalize, Normalized};
pub use view::{compute_view, ViewSummary};
pub use poller::{PollUpdate, TaskPoller};
pub use grid::{Expansion, RenderGeometry, RenderedWindow, VirtualGrid};
pub use state::AppState;
pub use stub_server::StubBackend;
