//! Application state container: one read/write surface for the presentation layer

use crate::backend::AnalysisBackend;
use crate::config::PollerConfig;
use crate::error::JobError;
use crate::grid::{Expansion, RenderedWindow, VirtualGrid};
use crate::normalizer::normalize;
use crate::poller::{PollUpdate, TaskPoller};
use crate::types::*;
use crate::view::{compute_view, ViewSummary};
use std::sync::Arc;
use tracing::{info, warn};

/// Check an upload before anything is sent to the backend
pub fn validate_upload(upload: &Upload) -> Result<(), JobError> {
    if !upload.file_name.to_ascii_lowercase().ends_with(".csv") {
        return Err(JobError::Submission(
            "Invalid file type. Please upload a CSV file.".to_string(),
        ));
    }
    if upload.bytes.is_empty() {
        return Err(JobError::Submission("Uploaded file is empty.".to_string()));
    }
    Ok(())
}

pub struct AppState {
    backend: Arc<dyn AnalysisBackend>,
    poller: TaskPoller,
    phase: Option<JobPhase>,
    error: Option<JobError>,
    loading: bool,
    entities: Vec<NormalizedEntity>,
    warnings: Vec<String>,
    query: ViewQuery,
    view: Vec<NormalizedEntity>,
    expansion: Expansion,
}

impl AppState {
    pub fn new(backend: Arc<dyn AnalysisBackend>, poller_config: PollerConfig) -> Self {
        Self {
            poller: TaskPoller::new(Arc::clone(&backend), poller_config),
            backend,
            phase: None,
            error: None,
            loading: false,
            entities: Vec::new(),
            warnings: Vec::new(),
            query: ViewQuery::default(),
            view: Vec::new(),
            expansion: Expansion::Collapsed,
        }
    }

    // ----- job lifecycle -----

    /// Submit a file and start tracking the resulting job.
    ///
    /// Always starts from a clean slate: the previous job is cancelled and
    /// its error, query, expansion and results are discarded first.
    pub async fn upload(&mut self, upload: Upload) -> Result<String, JobError> {
        self.reset();

        let checked = validate_upload(&upload).and_then(|()| {
            self.poller
                .config()
                .validate()
                .map_err(JobError::Submission)
        });
        if let Err(e) = checked {
            warn!("Rejected upload {}: {}", upload.file_name, e);
            self.error = Some(e.clone());
            return Err(e);
        }

        self.loading = true;
        info!(
            "Submitting {} ({} bytes) via {} backend",
            upload.file_name,
            upload.bytes.len(),
            self.backend.name()
        );

        match self.backend.submit_job(&upload).await {
            Ok(submitted) => {
                if let Err(e) = self.poller.start(submitted.task_id.clone()) {
                    self.loading = false;
                    self.error = Some(e.clone());
                    return Err(e);
                }
                self.phase = Some(JobPhase::Pending);
                Ok(submitted.task_id)
            }
            Err(e) => {
                let err = JobError::Submission(e.message());
                warn!("Submission failed: {}", e);
                self.loading = false;
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Stop tracking the current job without touching results or filters
    pub fn cancel(&mut self) {
        if self.poller.is_polling() {
            info!("Cancelled tracking of task {:?}", self.poller.task_id());
        }
        self.poller.stop();
        self.loading = false;
        self.phase = None;
    }

    /// Wait for and apply the next update of the tracked job
    pub async fn next_update(&mut self) -> Option<PollUpdate> {
        let update = self.poller.next_update().await?;
        self.apply_update(&update);
        Some(update)
    }

    /// Apply every update that has already arrived; returns how many were applied
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(update) = self.poller.try_next_update() {
            self.apply_update(&update);
            applied += 1;
        }
        applied
    }

    /// Drive the tracked job to a terminal state
    pub async fn run_to_completion(&mut self) -> Result<(), JobError> {
        while let Some(update) = self.next_update().await {
            if let PollUpdate::Failed { error, .. } = update {
                return Err(error);
            }
        }
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn apply_update(&mut self, update: &PollUpdate) {
        match update {
            PollUpdate::Phase { phase, .. } => {
                self.phase = Some(*phase);
            }
            PollUpdate::Done { task_id, result } => {
                let (entities, warnings) = normalize(result).into_parts();
                info!(
                    "Task {} produced {} entities ({} warnings)",
                    task_id,
                    entities.len(),
                    warnings.len()
                );
                self.entities = entities;
                self.warnings = warnings;
                self.phase = Some(JobPhase::Done);
                self.loading = false;
                self.recompute_view();
            }
            PollUpdate::Failed { error, .. } => {
                self.phase = Some(JobPhase::Failed);
                self.error = Some(error.clone());
                self.loading = false;
            }
        }
    }

    fn reset(&mut self) {
        self.poller.stop();
        self.phase = None;
        self.error = None;
        self.loading = false;
        self.entities.clear();
        self.warnings.clear();
        self.query = ViewQuery::default();
        self.view.clear();
        self.expansion = Expansion::Collapsed;
    }

    // ----- reads -----

    pub fn phase(&self) -> Option<JobPhase> {
        self.phase
    }

    pub fn task_id(&self) -> Option<&str> {
        self.poller.task_id()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn entities(&self) -> &[NormalizedEntity] {
        &self.entities
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn view(&self) -> &[NormalizedEntity] {
        &self.view
    }

    pub fn query(&self) -> &ViewQuery {
        &self.query
    }

    pub fn expansion(&self) -> &Expansion {
        &self.expansion
    }

    pub fn summary(&self) -> ViewSummary {
        ViewSummary::new(&self.entities, &self.view)
    }

    /// Lay out the current view on `grid`
    pub fn render(&self, grid: &mut VirtualGrid, viewport_width: f64, viewport_height: f64) -> RenderedWindow {
        grid.render_view(&self.view, &self.expansion, viewport_width, viewport_height)
    }

    // ----- query setters -----

    pub fn set_tier_filter(&mut self, tier_filter: TierFilter) {
        if self.query.tier_filter != tier_filter {
            self.query.tier_filter = tier_filter;
            self.recompute_view();
        }
    }

    pub fn set_search_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if self.query.search_text != text {
            self.query.search_text = text;
            self.recompute_view();
        }
    }

    pub fn set_sort_key(&mut self, sort_key: SortKey) {
        if self.query.sort_key != sort_key {
            self.query.sort_key = sort_key;
            self.recompute_view();
        }
    }

    /// Set one category filter; an empty value clears it
    pub fn set_category_filter(&mut self, category: impl Into<String>, value: impl Into<String>) {
        let category = category.into();
        let value = value.into();
        let changed = if value.trim().is_empty() {
            self.query.extra_category_filters.remove(&category).is_some()
        } else {
            self.query.extra_category_filters.insert(category, value.clone()).as_ref() != Some(&value)
        };
        if changed {
            self.recompute_view();
        }
    }

    pub fn clear_filters(&mut self) {
        if self.query != ViewQuery::default() {
            self.query = ViewQuery::default();
            self.recompute_view();
        }
    }

    // ----- expansion -----

    pub fn toggle_expanded(&mut self, id: &str) {
        self.expansion = self.expansion.toggled(id);
    }

    pub fn set_expansion(&mut self, expansion: Expansion) {
        self.expansion = expansion;
    }

    pub fn collapse(&mut self) {
        self.expansion = Expansion::Collapsed;
    }

    fn recompute_view(&mut self) {
        self.view = compute_view(&self.entities, &self.query);
    }
}
