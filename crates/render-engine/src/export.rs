//! Export jobs and the cooperative export driver.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

use keyroll_common::config::ExportDefaults;
use keyroll_common::error::{KeyrollError, KeyrollResult};
use keyroll_song_model::Song;

use crate::roll::{PianoRollRenderer, RollStyle};
use crate::session::{ExportSession, SessionParams};
use crate::target::{ExportTarget, SceneRenderer};

/// Settings for one export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Pixels per second of song time.
    pub time_resolution: f64,

    /// Render buffer width; also the output image width.
    pub buffer_width: u32,

    /// Render buffer height; the output is built from passes of this height.
    pub buffer_height: u32,

    /// Semitones added to every key.
    pub pitch_shift: i32,

    pub style: RollStyle,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from_defaults(&ExportDefaults::default())
    }
}

impl ExportOptions {
    pub fn from_defaults(defaults: &ExportDefaults) -> Self {
        Self {
            time_resolution: defaults.time_resolution,
            buffer_width: defaults.buffer_width,
            buffer_height: defaults.buffer_height,
            pitch_shift: defaults.pitch_shift,
            style: RollStyle::default(),
        }
    }

    pub fn validate(&self) -> KeyrollResult<()> {
        if !(self.time_resolution.is_finite() && self.time_resolution > 0.0) {
            return Err(KeyrollError::config(format!(
                "Time resolution must be positive, got {}",
                self.time_resolution
            )));
        }
        if self.buffer_width == 0 || self.buffer_height == 0 {
            return Err(KeyrollError::config(format!(
                "Render buffer must be at least 1x1, got {}x{}",
                self.buffer_width, self.buffer_height
            )));
        }
        self.style.validate()
    }
}

/// An export job ready to be run.
#[derive(Debug, Clone)]
pub struct ExportJob {
    /// Song file (`.json`, `.mid`, `.midi`).
    pub song_path: PathBuf,

    /// Output PNG path.
    pub output_path: PathBuf,

    pub options: ExportOptions,
}

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send>;

/// Export progress report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Pass being worked on.
    pub pass: u32,

    pub pass_count: u32,

    /// Rows of the current pass already encoded.
    pub rows_encoded: u32,

    /// Valid rows in the current pass.
    pub pass_height: u32,

    /// Current stage.
    pub stage: ExportStage,
}

impl ExportProgress {
    fn stage_only(stage: ExportStage, progress: f64) -> Self {
        Self {
            progress,
            pass: 0,
            pass_count: 0,
            rows_encoded: 0,
            pass_height: 0,
            stage,
        }
    }
}

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Preparing,
    Rendering,
    Encoding,
    Finalizing,
    Complete,
    Failed,
}

/// Outcome of a successful export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pass_count: u32,
    pub song_duration_secs: f64,
    pub steps: u64,
    pub elapsed_ms: u64,
}

/// Admits at most one export at a time.
#[derive(Debug, Clone, Default)]
pub struct ExportGate {
    active: Arc<Mutex<Option<PathBuf>>>,
}

/// Held for the duration of an export; releases the gate on drop.
#[derive(Debug)]
pub struct ExportPermit {
    active: Arc<Mutex<Option<PathBuf>>>,
}

impl ExportGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate for an export to `output`.
    pub fn try_acquire(&self, output: &Path) -> KeyrollResult<ExportPermit> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = active.as_ref() {
            return Err(KeyrollError::ExportInProgress {
                output: current.clone(),
            });
        }
        *active = Some(output.to_path_buf());
        Ok(ExportPermit {
            active: Arc::clone(&self.active),
        })
    }

    /// Output path of the running export, if any.
    pub fn active_output(&self) -> Option<PathBuf> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Drop for ExportPermit {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        *active = None;
    }
}

/// Runs exports one at a time, one session step per scheduler tick.
///
/// Clones share one gate. Separate instances export independently, so the
/// owner decides how widely exports are serialized.
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    gate: ExportGate,
}

impl Exporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self) -> &ExportGate {
        &self.gate
    }

    /// Load the job's song and export it.
    pub async fn export(
        &self,
        job: &ExportJob,
        progress: Option<ProgressCallback>,
    ) -> KeyrollResult<ExportSummary> {
        if !job.song_path.exists() {
            return Err(KeyrollError::FileNotFound {
                path: job.song_path.clone(),
            });
        }
        let song = Song::load(&job.song_path)
            .map_err(|e| KeyrollError::song(format!("Failed to load song: {e}")))?;
        self.render(&song, job, progress).await
    }

    /// Export an already loaded song with the piano-roll renderer.
    pub async fn render(
        &self,
        song: &Song,
        job: &ExportJob,
        progress: Option<ProgressCallback>,
    ) -> KeyrollResult<ExportSummary> {
        let mut renderer = PianoRollRenderer::new(song, job.options.style.clone());
        tracing::debug!(song = %song.name, notes = song.notes.len(), "Rendering song");
        self.render_scene(&mut renderer, song.duration_secs(), job, progress)
            .await
    }

    /// Export `duration_secs` of whatever `renderer` draws.
    ///
    /// On any failure after the output file was created, the file is
    /// finalized and then removed.
    pub async fn render_scene(
        &self,
        renderer: &mut dyn SceneRenderer,
        duration_secs: f64,
        job: &ExportJob,
        progress: Option<ProgressCallback>,
    ) -> KeyrollResult<ExportSummary> {
        let _permit = self.gate.try_acquire(&job.output_path)?;
        let report = |p: ExportProgress| {
            if let Some(cb) = &progress {
                cb(p);
            }
        };

        tracing::info!(
            output = %job.output_path.display(),
            duration_secs,
            time_resolution = job.options.time_resolution,
            buffer_width = job.options.buffer_width,
            buffer_height = job.options.buffer_height,
            pitch_shift = job.options.pitch_shift,
            "Starting export"
        );
        report(ExportProgress::stage_only(ExportStage::Preparing, 0.0));

        let result = run_session(renderer, duration_secs, job, &report).await;
        match &result {
            Ok(summary) => {
                tracing::info!(
                    output = %summary.output_path.display(),
                    width = summary.width,
                    height = summary.height,
                    passes = summary.pass_count,
                    elapsed_ms = summary.elapsed_ms,
                    "Export complete"
                );
                report(ExportProgress {
                    progress: 1.0,
                    pass: summary.pass_count.saturating_sub(1),
                    pass_count: summary.pass_count,
                    rows_encoded: 0,
                    pass_height: 0,
                    stage: ExportStage::Complete,
                });
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    output = %job.output_path.display(),
                    "Export failed"
                );
                report(ExportProgress::stage_only(ExportStage::Failed, 0.0));
            }
        }
        result
    }
}

async fn run_session(
    renderer: &mut dyn SceneRenderer,
    duration_secs: f64,
    job: &ExportJob,
    report: &impl Fn(ExportProgress),
) -> KeyrollResult<ExportSummary> {
    let options = &job.options;
    options.validate()?;

    if let Some(parent) = job.output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let started = Instant::now();
    let mut target = ExportTarget::new(options.buffer_width, options.buffer_height)?;
    let params = SessionParams {
        time_resolution: options.time_resolution,
        song_duration_secs: duration_secs,
        pitch_shift: options.pitch_shift,
    };

    let mut session = ExportSession::create(params, &job.output_path, &mut target, renderer)?;
    let canvas = *session.canvas();
    let mut steps = 0u64;
    let mut last_pass = None;

    while !session.is_finished() {
        if let Err(e) = session.step() {
            drop(session);
            discard_output(&job.output_path);
            return Err(e);
        }
        steps += 1;

        let snapshot = session.snapshot();
        if last_pass != Some(snapshot.pass) {
            last_pass = Some(snapshot.pass);
            let plan = canvas.plan(snapshot.pass);
            tracing::debug!(
                pass = plan.index,
                passes = canvas.pass_count(),
                content_offset = plan.content_offset,
                pass_height = plan.pass_height,
                "Export pass started"
            );
        }
        report(snapshot);

        tokio::task::yield_now().await;
    }

    let mut finalizing = session.snapshot();
    finalizing.stage = ExportStage::Finalizing;
    report(finalizing);

    if let Err(e) = session.finish() {
        discard_output(&job.output_path);
        return Err(e);
    }

    Ok(ExportSummary {
        output_path: job.output_path.clone(),
        width: options.buffer_width,
        height: canvas.content_height(),
        pass_count: canvas.pass_count(),
        song_duration_secs: canvas.song_duration_secs(),
        steps,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn discard_output(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            error = %e,
            path = %path.display(),
            "Failed to remove incomplete export"
        );
    }
}
