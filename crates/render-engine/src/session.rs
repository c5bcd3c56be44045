//! Export session: a cooperative state machine over passes and row batches.
//!
//! Each [`ExportSession::step`] call performs one bounded unit of work:
//! render one pass into the bounded target, encode at most
//! [`MAX_ROWS_PER_STEP`] rows, or advance to the next pass.
//!
//! ```text
//! Rendering(0) -> Encoding(0, 0..h0) -> Rendering(1) -> ... -> Finished
//! ```

use std::fs::File;
use std::path::Path;

use keyroll_common::error::{KeyrollError, KeyrollResult};

use crate::compositor::TallCanvas;
use crate::encoder::{PngRowEncoder, RowEncoder};
use crate::export::{ExportProgress, ExportStage};
use crate::target::{ExportTarget, SceneRenderer};

/// Most rows encoded by a single step.
pub const MAX_ROWS_PER_STEP: u32 = 60;

/// Values captured when the session is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionParams {
    /// Pixels per second of song time.
    pub time_resolution: f64,
    /// Song length in seconds.
    pub song_duration_secs: f64,
    /// Semitones added to every key.
    pub pitch_shift: i32,
}

/// Where the session is in its pass cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Rendering,
    Encoding,
    Finished,
}

/// One in-flight export.
///
/// Borrows the render target and renderer for its lifetime and owns the
/// encoder. The encoder is closed exactly once, by [`ExportSession::finish`]
/// or when the session is dropped.
pub struct ExportSession<'a, R: SceneRenderer + ?Sized, E: RowEncoder> {
    params: SessionParams,
    canvas: TallCanvas,
    target: &'a mut ExportTarget,
    renderer: &'a mut R,
    encoder: E,
    current_pass: u32,
    stage: SessionStage,
    rows_encoded: u32,
    failed: bool,
    closed: bool,
}

impl<'a, R: SceneRenderer + ?Sized> ExportSession<'a, R, PngRowEncoder<File>> {
    /// Create a session writing a PNG to `output_path`.
    ///
    /// The image is `target.width()` wide and as tall as the full song.
    pub fn create(
        params: SessionParams,
        output_path: impl AsRef<Path>,
        target: &'a mut ExportTarget,
        renderer: &'a mut R,
    ) -> KeyrollResult<Self> {
        let canvas = TallCanvas::new(
            params.song_duration_secs,
            params.time_resolution,
            target.height(),
        )?;
        let encoder =
            PngRowEncoder::create(output_path, target.width(), canvas.content_height())?;
        Self::new(params, target, renderer, encoder)
    }
}

impl<'a, R: SceneRenderer + ?Sized, E: RowEncoder> ExportSession<'a, R, E> {
    /// Create a session around an already opened encoder.
    ///
    /// The encoder must declare `target.width()` x `content_height`.
    pub fn new(
        params: SessionParams,
        target: &'a mut ExportTarget,
        renderer: &'a mut R,
        mut encoder: E,
    ) -> KeyrollResult<Self> {
        let canvas = match TallCanvas::new(
            params.song_duration_secs,
            params.time_resolution,
            target.height(),
        ) {
            Ok(canvas) => canvas,
            Err(e) => {
                encoder.close().ok();
                return Err(e);
            }
        };

        let expected = (target.width(), canvas.content_height());
        let declared = (encoder.width(), encoder.height());
        if expected != declared {
            encoder.close().ok();
            return Err(KeyrollError::encode(format!(
                "Encoder declares {}x{} but the export is {}x{}",
                declared.0, declared.1, expected.0, expected.1
            )));
        }

        tracing::info!(
            width = target.width(),
            content_height = canvas.content_height(),
            buffer_height = canvas.buffer_height(),
            passes = canvas.pass_count(),
            time_resolution = params.time_resolution,
            "Export session created"
        );

        Ok(Self {
            params,
            canvas,
            target,
            renderer,
            encoder,
            current_pass: 0,
            stage: SessionStage::Rendering,
            rows_encoded: 0,
            failed: false,
            closed: false,
        })
    }

    /// Pass geometry for this export.
    pub fn canvas(&self) -> &TallCanvas {
        &self.canvas
    }

    pub fn params(&self) -> SessionParams {
        self.params
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn current_pass(&self) -> u32 {
        self.current_pass
    }

    /// Rows encoded so far in the current pass.
    pub fn rows_encoded_in_pass(&self) -> u32 {
        self.rows_encoded
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn is_finished(&self) -> bool {
        self.stage == SessionStage::Finished
    }

    /// Whether a step has failed. A failed session does no further work.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Perform one bounded unit of work and return the resulting stage.
    ///
    /// A finished session is left untouched. Any error is fatal: later
    /// calls return an error without doing work.
    pub fn step(&mut self) -> KeyrollResult<SessionStage> {
        if self.failed {
            return Err(KeyrollError::render(
                "Export session stopped after an earlier failure",
            ));
        }

        let result = match self.stage {
            SessionStage::Finished => return Ok(SessionStage::Finished),
            SessionStage::Rendering => self.render_pass(),
            SessionStage::Encoding => self.encode_batch(),
        };
        if let Err(e) = result {
            self.failed = true;
            tracing::error!(
                error = %e,
                pass = self.current_pass,
                rows_encoded = self.rows_encoded,
                "Export step failed"
            );
            return Err(e);
        }

        Ok(self.stage)
    }

    fn render_pass(&mut self) -> KeyrollResult<()> {
        let plan = self.canvas.plan(self.current_pass);

        self.target.clear();
        self.renderer.render(
            self.target,
            plan.scroll_value,
            self.params.time_resolution,
            self.params.pitch_shift,
        )?;

        tracing::debug!(
            pass = plan.index,
            passes = self.canvas.pass_count(),
            scroll = plan.scroll_value,
            pass_height = plan.pass_height,
            "Rendered pass"
        );

        self.stage = SessionStage::Encoding;
        self.rows_encoded = 0;
        Ok(())
    }

    fn encode_batch(&mut self) -> KeyrollResult<()> {
        let pass_height = self.canvas.pass_height(self.current_pass);

        if self.rows_encoded < pass_height {
            let batch = MAX_ROWS_PER_STEP.min(pass_height - self.rows_encoded);
            let start_row = self.canvas.buffer_start_row(self.current_pass) + self.rows_encoded;
            self.encoder.write_rows(self.target, start_row, batch, true)?;
            self.rows_encoded += batch;
            return Ok(());
        }

        self.rows_encoded = 0;
        self.current_pass += 1;
        if self.current_pass == self.canvas.pass_count() {
            self.stage = SessionStage::Finished;
            tracing::info!(
                passes = self.canvas.pass_count(),
                rows = self.encoder.rows_written(),
                "All passes encoded"
            );
        } else {
            self.stage = SessionStage::Rendering;
        }
        Ok(())
    }

    /// Overall completion in `[0, 1]`. Exactly `1.0` once finished.
    pub fn progress(&self) -> f64 {
        if self.is_finished() {
            return 1.0;
        }

        let passes = self.canvas.pass_count() as f64;
        let stage_bonus = if self.stage == SessionStage::Encoding {
            0.1
        } else {
            0.0
        };
        let pass_height = self.canvas.pass_height(self.current_pass);
        let encode_frac = if pass_height == 0 {
            0.0
        } else {
            (self.rows_encoded as f64 / pass_height as f64).clamp(0.0, 1.0)
        };

        // One division over a whole-pass numerator keeps the value
        // non-decreasing across pass boundaries.
        let within_pass = (stage_bonus + 0.9 * encode_frac).min(1.0);
        (self.current_pass as f64 + within_pass) / passes
    }

    /// Progress report for UI consumers.
    pub fn snapshot(&self) -> ExportProgress {
        let stage = match self.stage {
            SessionStage::Rendering => ExportStage::Rendering,
            SessionStage::Encoding => ExportStage::Encoding,
            SessionStage::Finished => ExportStage::Finalizing,
        };
        let stage = if self.failed { ExportStage::Failed } else { stage };

        let pass = self
            .current_pass
            .min(self.canvas.pass_count().saturating_sub(1));
        ExportProgress {
            progress: self.progress(),
            pass,
            pass_count: self.canvas.pass_count(),
            rows_encoded: self.rows_encoded,
            pass_height: self.canvas.pass_height(pass),
            stage,
        }
    }

    /// Finalize the output. Reports an error if the export is incomplete
    /// or the trailer could not be written.
    pub fn finish(mut self) -> KeyrollResult<()> {
        self.close_encoder()
    }

    fn close_encoder(&mut self) -> KeyrollResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.is_finished() {
            tracing::warn!(
                pass = self.current_pass,
                passes = self.canvas.pass_count(),
                rows = self.encoder.rows_written(),
                "Export session closed before completion; output is incomplete"
            );
        }
        self.encoder.close()
    }
}

impl<'a, R: SceneRenderer + ?Sized, E: RowEncoder> Drop for ExportSession<'a, R, E> {
    fn drop(&mut self) {
        if let Err(e) = self.close_encoder() {
            tracing::warn!(error = %e, "Export session dropped with an unclean encoder close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Color;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct EncoderLog {
        batches: Vec<(u32, u32)>,
        close_calls: u32,
    }

    /// Records every call instead of compressing.
    struct RecordingEncoder {
        width: u32,
        height: u32,
        rows: u32,
        log: Rc<RefCell<EncoderLog>>,
    }

    impl RecordingEncoder {
        fn new(width: u32, height: u32) -> (Self, Rc<RefCell<EncoderLog>>) {
            let log = Rc::new(RefCell::new(EncoderLog::default()));
            let encoder = Self {
                width,
                height,
                rows: 0,
                log: log.clone(),
            };
            (encoder, log)
        }
    }

    impl RowEncoder for RecordingEncoder {
        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn rows_written(&self) -> u32 {
            self.rows
        }

        fn write_rows(
            &mut self,
            source: &ExportTarget,
            start_row: u32,
            row_count: u32,
            _strip_alpha: bool,
        ) -> KeyrollResult<()> {
            source.rows(start_row, row_count)?;
            self.rows += row_count;
            self.log.borrow_mut().batches.push((start_row, row_count));
            Ok(())
        }

        fn close(&mut self) -> KeyrollResult<()> {
            self.log.borrow_mut().close_calls += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingRenderer {
        scrolls: Vec<f64>,
        fail_on_call: Option<usize>,
    }

    impl SceneRenderer for CountingRenderer {
        fn render(
            &mut self,
            target: &mut ExportTarget,
            scroll_secs: f64,
            _time_resolution: f64,
            _pitch_shift: i32,
        ) -> KeyrollResult<()> {
            if self.fail_on_call == Some(self.scrolls.len()) {
                return Err(KeyrollError::render("device lost"));
            }
            self.scrolls.push(scroll_secs);
            target.fill(Color::rgb(1, 2, 3));
            Ok(())
        }
    }

    fn params(content_height: u32) -> SessionParams {
        SessionParams {
            time_resolution: 1.0,
            song_duration_secs: content_height as f64,
            pitch_shift: 0,
        }
    }

    fn run_to_end<R: SceneRenderer, E: RowEncoder>(session: &mut ExportSession<'_, R, E>) -> usize {
        let mut steps = 0;
        while !session.is_finished() {
            session.step().unwrap();
            steps += 1;
            assert!(steps < 100_000, "session did not terminate");
        }
        steps
    }

    #[test]
    fn test_single_exact_pass() {
        let mut target = ExportTarget::new(16, 720).unwrap();
        let mut renderer = CountingRenderer::default();
        let (encoder, log) = RecordingEncoder::new(16, 720);
        let mut session =
            ExportSession::new(params(720), &mut target, &mut renderer, encoder).unwrap();

        assert_eq!(session.stage(), SessionStage::Rendering);
        assert_eq!(session.step().unwrap(), SessionStage::Encoding);
        let steps = run_to_end(&mut session);
        // 12 batches of 60 rows and one transition step.
        assert_eq!(steps, 13);
        drop(session);

        let log = log.borrow();
        assert_eq!(log.batches.len(), 12);
        assert!(log.batches.iter().all(|(_, rows)| *rows == 60));
        assert_eq!(log.batches[0], (0, 60));
        assert_eq!(log.batches[11], (660, 60));
        assert_eq!(log.close_calls, 1);
        assert_eq!(renderer.scrolls, vec![0.0]);
    }

    #[test]
    fn test_three_passes_with_short_first_pass() {
        let mut target = ExportTarget::new(8, 720).unwrap();
        let mut renderer = CountingRenderer::default();
        let (encoder, log) = RecordingEncoder::new(8, 1500);
        let mut session =
            ExportSession::new(params(1500), &mut target, &mut renderer, encoder).unwrap();
        assert_eq!(session.canvas().pass_count(), 3);

        let mut per_pass: Vec<u32> = vec![0; 3];
        let mut render_steps = 0;
        while !session.is_finished() {
            let pass = session.current_pass() as usize;
            let before = session.encoder().rows_written();
            if session.stage() == SessionStage::Rendering {
                render_steps += 1;
            }
            session.step().unwrap();
            per_pass[pass] += session.encoder().rows_written() - before;
        }

        assert_eq!(render_steps, 3);
        assert_eq!(per_pass, vec![60, 720, 720]);
        assert_eq!(session.encoder().rows_written(), 1500);
        drop(session);

        let log = log.borrow();
        assert!(log.batches.iter().all(|(_, rows)| *rows <= MAX_ROWS_PER_STEP));
        // The short pass reads the bottom of the buffer.
        assert_eq!(log.batches[0], (660, 60));
        assert_eq!(renderer.scrolls, vec![1440.0, 720.0, 0.0]);
    }

    #[test]
    fn test_empty_song_finishes_without_writes() {
        let mut target = ExportTarget::new(8, 720).unwrap();
        let mut renderer = CountingRenderer::default();
        let (encoder, log) = RecordingEncoder::new(8, 0);
        let mut session =
            ExportSession::new(params(0), &mut target, &mut renderer, encoder).unwrap();

        assert_eq!(session.step().unwrap(), SessionStage::Encoding);
        assert_eq!(session.step().unwrap(), SessionStage::Finished);
        assert!(session.is_finished());
        assert_eq!(session.progress(), 1.0);
        drop(session);

        assert!(log.borrow().batches.is_empty());
        assert_eq!(log.borrow().close_calls, 1);
    }

    fn assert_progress_never_decreases(content_height: u32, buffer_height: u32) {
        let mut target = ExportTarget::new(4, buffer_height).unwrap();
        let mut renderer = CountingRenderer::default();
        let (encoder, _log) = RecordingEncoder::new(4, content_height);
        let mut session = ExportSession::new(
            params(content_height),
            &mut target,
            &mut renderer,
            encoder,
        )
        .unwrap();

        assert_eq!(session.progress(), 0.0);
        let mut last = session.progress();
        while !session.is_finished() {
            let stage = session.stage();
            let pass = session.current_pass();
            session.step().unwrap();
            let now = session.progress();
            assert!(
                now >= last,
                "progress went from {last} to {now} after {stage:?} on pass {pass}"
            );
            assert!((0.0..=1.0).contains(&now));
            last = now;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn test_progress_is_monotonic() {
        // 3, 4, 5, 5, 7 and 13 passes; thirds, fifths and sevenths do not
        // divide exactly in binary.
        for (content, buffer) in [(30, 10), (345, 100), (50, 10), (75, 16), (70, 10), (737, 61)] {
            assert_progress_never_decreases(content, buffer);
        }
    }

    proptest! {
        #[test]
        fn prop_progress_never_decreases(content in 0u32..2_000, buffer in 1u32..200) {
            assert_progress_never_decreases(content, buffer);
        }
    }

    #[test]
    fn test_progress_values_within_a_pass() {
        let mut target = ExportTarget::new(4, 120).unwrap();
        let mut renderer = CountingRenderer::default();
        let (encoder, _log) = RecordingEncoder::new(4, 240);
        let mut session =
            ExportSession::new(params(240), &mut target, &mut renderer, encoder).unwrap();

        session.step().unwrap();
        assert!((session.progress() - 0.05).abs() < 1e-9);
        session.step().unwrap();
        // 60 of 120 rows: (0.1 + 0.45) / 2
        assert!((session.progress() - 0.275).abs() < 1e-9);
        session.step().unwrap();
        session.step().unwrap();
        assert_eq!(session.stage(), SessionStage::Rendering);
        assert!((session.progress() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_step_after_finish_is_noop() {
        let mut target = ExportTarget::new(4, 10).unwrap();
        let mut renderer = CountingRenderer::default();
        let (encoder, log) = RecordingEncoder::new(4, 10);
        let mut session =
            ExportSession::new(params(10), &mut target, &mut renderer, encoder).unwrap();
        run_to_end(&mut session);

        assert_eq!(session.step().unwrap(), SessionStage::Finished);
        assert_eq!(session.step().unwrap(), SessionStage::Finished);
        session.finish().unwrap();

        assert_eq!(log.borrow().batches.len(), 1);
        assert_eq!(log.borrow().close_calls, 1);
        assert_eq!(renderer.scrolls.len(), 1);
    }

    #[test]
    fn test_early_drop_still_closes_encoder() {
        let mut target = ExportTarget::new(4, 50).unwrap();
        let mut renderer = CountingRenderer::default();
        let (encoder, log) = RecordingEncoder::new(4, 500);
        let mut session =
            ExportSession::new(params(500), &mut target, &mut renderer, encoder).unwrap();
        session.step().unwrap();
        session.step().unwrap();
        drop(session);

        assert_eq!(log.borrow().close_calls, 1);
        assert_eq!(log.borrow().batches.len(), 1);
    }

    #[test]
    fn test_render_failure_is_fatal() {
        let mut target = ExportTarget::new(4, 50).unwrap();
        let mut renderer = CountingRenderer {
            fail_on_call: Some(1),
            ..CountingRenderer::default()
        };
        let (encoder, log) = RecordingEncoder::new(4, 100);
        let mut session =
            ExportSession::new(params(100), &mut target, &mut renderer, encoder).unwrap();

        while session.stage() != SessionStage::Rendering || session.current_pass() == 0 {
            session.step().unwrap();
        }
        assert!(session.step().is_err());
        assert!(session.has_failed());
        assert_eq!(session.snapshot().stage, ExportStage::Failed);
        assert!(session.step().is_err());
        drop(session);

        assert_eq!(log.borrow().close_calls, 1);
    }

    #[test]
    fn test_mismatched_encoder_is_rejected_and_closed() {
        let mut target = ExportTarget::new(4, 50).unwrap();
        let mut renderer = CountingRenderer::default();
        let (encoder, log) = RecordingEncoder::new(4, 99);
        let result = ExportSession::new(params(100), &mut target, &mut renderer, encoder);

        assert!(matches!(result, Err(KeyrollError::Encode { .. })));
        assert_eq!(log.borrow().close_calls, 1);
    }

    #[test]
    fn test_snapshot_reports_pass_geometry() {
        let mut target = ExportTarget::new(4, 100).unwrap();
        let mut renderer = CountingRenderer::default();
        let (encoder, _log) = RecordingEncoder::new(4, 250);
        let mut session =
            ExportSession::new(params(250), &mut target, &mut renderer, encoder).unwrap();
        session.step().unwrap();
        session.step().unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.stage, ExportStage::Encoding);
        assert_eq!(snapshot.pass, 0);
        assert_eq!(snapshot.pass_count, 3);
        assert_eq!(snapshot.pass_height, 50);
        assert_eq!(snapshot.rows_encoded, 50);
    }
}
