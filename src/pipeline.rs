//! End-to-end processing of RTB byte sources into a flagged [Profile].
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::bounded;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::context::ProcessingContext;
use crate::ensemble::{Decoder, DecoderConfig, Ensemble};
use crate::framing::{ChunkReader, RawChunk, ReadSummary, ReaderConfig};
use crate::motion::{
    MotionCorrector, MotionMode, NavigationSource, PositionTrack, NAVIGATION_WINDOW,
};
use crate::prelude::*;
use crate::profile::{Assembler, AssemblerConfig, Profile};
use crate::qc::{QcConfig, QcEngine, QcFlags};
use crate::transform::{BeamGeometry, TransformConfig, Transformer};

/// Every processing option.
#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    #[builder(default)]
    pub reader: ReaderConfig,
    #[builder(default)]
    pub decoder: DecoderConfig,
    #[builder(default)]
    pub assembler: AssemblerConfig,
    #[builder(default)]
    pub transform: TransformConfig,
    #[builder(default)]
    pub motion: MotionMode,
    /// Segment velocities averaged when platform velocity comes from positions.
    #[builder(default = NAVIGATION_WINDOW)]
    pub navigation_window: usize,
    #[builder(default)]
    pub qc: QcConfig,
    /// Decoder threads, 0 to let rayon decide.
    #[builder(default)]
    pub num_threads: usize,
    /// Batches read ahead of decoding.
    #[builder(default = 4)]
    pub buffer_size: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig::builder().build()
    }
}

/// Cooperative cancellation shared with a running [Pipeline].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Output of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct Processed {
    pub profile: Profile,
    pub flags: QcFlags,
    pub context: ProcessingContext,
}

pub struct Pipeline {
    config: ProcessingConfig,
    cancel: CancelToken,
    progress: Arc<AtomicUsize>,
}

impl Pipeline {
    pub fn new(config: ProcessingConfig) -> Self {
        Pipeline {
            config,
            cancel: CancelToken::new(),
            progress: Arc::default(),
        }
    }

    /// Use `token` to cancel processing.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Counter of frames decoded so far, readable from another thread while
    /// [Pipeline::process] runs.
    #[must_use]
    pub fn progress(&self) -> Arc<AtomicUsize> {
        self.progress.clone()
    }

    /// Read, decode and assemble every ensemble in `sources`, in order.
    ///
    /// Reading happens on a background thread while batches are decoded on a rayon
    /// pool. Cancellation is checked between batches.
    ///
    /// # Errors
    /// [Error::Cancelled] if the token was cancelled, [Error::AllSourcesEmpty] or
    /// [Error::Io] from reading, and [Error::Decode] if no frame could be decoded.
    pub fn read_ensembles<R>(
        &self,
        sources: Vec<R>,
        ctx: &mut ProcessingContext,
    ) -> Result<Vec<Ensemble>>
    where
        R: Read + Send + 'static,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .build()
            .map_err(|e| Error::Config(format!("decoder thread pool: {e}")))?;

        let (batch_tx, batch_rx) = bounded::<Vec<RawChunk>>(self.config.buffer_size.max(1));
        let reader_config = self.config.reader;
        let cancel = self.cancel.clone();
        let handle = thread::Builder::new()
            .name("ensemble_reader".into())
            .spawn(move || -> Result<ReadSummary> {
                let mut reader = ChunkReader::new(sources, reader_config);
                while let Some(batch) = reader.next_batch() {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    if batch_tx.send(batch?).is_err() {
                        debug!("batch receiver gone, reader exiting");
                        break;
                    }
                }
                Ok(reader.into_summary())
            })?;

        let decoder = Decoder::new(self.config.decoder.clone());
        let mut ensembles = Vec::new();
        let mut cancelled = false;
        for batch in &batch_rx {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let results = pool.install(|| decoder.decode_batch(&batch));
            for (chunk, result) in batch.iter().zip(results) {
                match result {
                    Ok(ens) => {
                        ctx.add(&ens);
                        ensembles.push(ens);
                    }
                    Err(err) => {
                        ctx.decode_failures += 1;
                        debug!(
                            source = chunk.source_index,
                            offset = chunk.offset,
                            ensemble = chunk.header.ensemble_number,
                            "{err}"
                        );
                    }
                }
            }
            self.progress.fetch_add(batch.len(), Ordering::Relaxed);
        }
        drop(batch_rx);

        let summary = handle
            .join()
            .map_err(|_| Error::Io(std::io::Error::other("ensemble reader thread panicked")))?;
        if cancelled || self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        ctx.read = summary?;
        let empty = ctx.read.empty_sources.clone();
        for idx in empty {
            ctx.warn(format!("input source {idx} contains no valid ensembles"));
        }
        if ctx.decode_failures > 0 {
            ctx.warn(format!(
                "{} valid frames could not be decoded",
                ctx.decode_failures
            ));
        }
        if ensembles.is_empty() {
            return Err(Error::Decode(format!(
                "none of the {} frames read could be decoded",
                ctx.read.chunks
            )));
        }
        Ok(ensembles)
    }

    /// Run every stage over `sources`.
    ///
    /// `nav` is only used in [MotionMode::Navigation]. Without it the positions
    /// decoded from the ensembles' NMEA data are used.
    ///
    /// # Errors
    /// Any error of [Pipeline::read_ensembles], [Assembler::assemble],
    /// [Transformer::transform] or [MotionCorrector::correct].
    pub fn process<R>(
        &self,
        sources: Vec<R>,
        nav: Option<&dyn NavigationSource>,
    ) -> Result<Processed>
    where
        R: Read + Send + 'static,
    {
        let mut ctx = ProcessingContext::default();
        let ensembles = self.read_ensembles(sources, &mut ctx)?;

        let mut profile =
            Assembler::new(self.config.assembler.clone()).assemble(&ensembles, &mut ctx)?;
        drop(ensembles);

        let geometry = BeamGeometry::resolve(
            self.config.transform.sonar_type,
            profile.serial_number.as_deref(),
        );
        if geometry.is_none() {
            ctx.warn("beam geometry unknown");
        }
        Transformer::new(self.config.transform.clone(), geometry).transform(&mut profile)?;

        let corrector = MotionCorrector::new(self.config.motion);
        let own_nav;
        let nav = match nav {
            Some(nav) => Some(nav),
            None if corrector.mode() == MotionMode::Navigation => {
                own_nav = PositionTrack::from_profile(&profile, self.config.navigation_window);
                Some(&own_nav as &dyn NavigationSource)
            }
            None => None,
        };
        corrector.correct(&mut profile, nav, &mut ctx)?;

        let flags = QcEngine::new(self.config.qc.clone(), geometry).apply(&mut profile, &mut ctx);

        info!(
            ensembles = profile.len(),
            bins = profile.bin_count,
            frames_skipped = ctx.frames_skipped(),
            warnings = ctx.warnings.len(),
            "processing complete"
        );
        Ok(Processed {
            profile,
            flags,
            context: ctx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ProcessingConfig::builder().build();
        assert_eq!(config.motion, MotionMode::Off);
        assert_eq!(config.num_threads, 0);
        assert_eq!(config.navigation_window, 60);
        assert!(!config.qc.no_quality_control);
    }

    #[test]
    fn config_from_json() {
        let config: ProcessingConfig = serde_json::from_str(
            r#"{"motion": "bottom_track", "qc": {"roll_threshold": 20.0}, "num_threads": 2}"#,
        )
        .unwrap();
        assert_eq!(config.motion, MotionMode::BottomTrack);
        assert_eq!(config.qc.roll_threshold, Some(20.0));
        assert_eq!(config.num_threads, 2);
    }

    #[test]
    fn empty_sources_fail() {
        let sources = vec![std::io::Cursor::new(vec![0u8; 100]), std::io::Cursor::new(vec![])];
        let err = Pipeline::new(ProcessingConfig::default())
            .process(sources, None)
            .unwrap_err();
        assert!(matches!(err, Error::AllSourcesEmpty { sources: 2 }));
    }

    #[test]
    fn cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel();
        let pipeline = Pipeline::new(ProcessingConfig::default()).with_cancel_token(token);
        let sources = vec![std::io::Cursor::new(vec![0u8; 10])];
        let err = pipeline.process(sources, None).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
