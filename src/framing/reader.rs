use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::{debug, span, warn, Level};
use typed_builder::TypedBuilder;

use super::{FaultCounts, RawChunk, Synchronizer, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::prelude::*;

#[derive(Debug, Clone, Copy, TypedBuilder, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Number of chunks produced per batch.
    #[builder(default = 64)]
    pub batch_size: usize,
    /// Headers declaring a larger payload are treated as desynchronization.
    #[builder(default = DEFAULT_MAX_PAYLOAD_SIZE)]
    pub max_payload_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig::builder().build()
    }
}

/// Ensembles contributed by one source, as a range of chunk indexes in the combined
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub source_index: usize,
    /// Index of the first chunk from this source
    pub start: usize,
    /// Number of chunks from this source
    pub count: usize,
}

impl SourceSpan {
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Summary of everything read so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadSummary {
    pub sources: usize,
    pub chunks: usize,
    pub faults: FaultCounts,
    /// One span per finished source, empty sources included.
    pub spans: Vec<SourceSpan>,
    pub empty_sources: Vec<usize>,
}

/// Reads validated [RawChunk]s from an ordered list of sources treated as one logical
/// stream.
///
/// The reader is forward only. Chunks from source `n` all come before those of source
/// `n + 1`. When every source has been read and none produced a chunk the reader yields
/// a single [Error::AllSourcesEmpty].
pub struct ChunkReader<R>
where
    R: Read + Send,
{
    config: ReaderConfig,
    sources: std::iter::Enumerate<std::vec::IntoIter<R>>,
    current: Option<(Synchronizer<R>, SourceSpan)>,
    summary: ReadSummary,
    finished: bool,
}

impl<R> ChunkReader<R>
where
    R: Read + Send,
{
    pub fn new(sources: Vec<R>, config: ReaderConfig) -> Self {
        let summary = ReadSummary {
            sources: sources.len(),
            ..Default::default()
        };
        ChunkReader {
            config,
            sources: sources.into_iter().enumerate(),
            current: None,
            summary,
            finished: false,
        }
    }

    #[must_use]
    pub fn summary(&self) -> &ReadSummary {
        &self.summary
    }

    /// Consume the reader returning its summary.
    #[must_use]
    pub fn into_summary(self) -> ReadSummary {
        self.summary
    }

    fn finish_source(&mut self) {
        let Some((sync, span)) = self.current.take() else {
            return;
        };
        self.summary.faults.merge(&sync.faults);
        if span.is_empty() {
            warn!(source = span.source_index, "no valid ensembles in source");
            self.summary.empty_sources.push(span.source_index);
        } else {
            debug!(
                source = span.source_index,
                ensembles = span.count,
                faults = ?sync.faults,
                "finished source"
            );
        }
        self.summary.spans.push(span);
    }

    fn next_chunk(&mut self) -> Option<Result<RawChunk>> {
        if self.finished {
            return None;
        }
        loop {
            if self.current.is_none() {
                match self.sources.next() {
                    Some((idx, src)) => {
                        let sync = Synchronizer::new(src, idx)
                            .with_max_payload_size(self.config.max_payload_size);
                        let span = SourceSpan {
                            source_index: idx,
                            start: self.summary.chunks,
                            count: 0,
                        };
                        self.current = Some((sync, span));
                    }
                    None => {
                        self.finished = true;
                        if self.summary.chunks == 0 {
                            return Some(Err(Error::AllSourcesEmpty {
                                sources: self.summary.sources,
                            }));
                        }
                        return None;
                    }
                }
            }

            let (sync, span) = self.current.as_mut()?;
            let _guard = span!(Level::DEBUG, "source", index = span.source_index).entered();
            match sync.next_frame() {
                Ok(Some(chunk)) => {
                    span.count += 1;
                    self.summary.chunks += 1;
                    return Some(Ok(chunk));
                }
                Ok(None) => self.finish_source(),
                Err(err) => {
                    // The rest of this source cannot be read; later sources still can.
                    self.finish_source();
                    return Some(Err(err));
                }
            }
        }
    }

    /// Read up to `batch_size` chunks. Returns `None` once the stream is exhausted.
    ///
    /// # Errors
    /// [Error::Io] when a source cannot be read; later sources are still read on the
    /// next call. [Error::AllSourcesEmpty] once every source ended without a valid
    /// frame.
    pub fn next_batch(&mut self) -> Option<Result<Vec<RawChunk>>> {
        let mut batch = Vec::with_capacity(self.config.batch_size);
        while batch.len() < self.config.batch_size.max(1) {
            match self.next_chunk() {
                Some(Ok(chunk)) => batch.push(chunk),
                Some(Err(err)) => return Some(Err(err)),
                None => break,
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

impl<R> Iterator for ChunkReader<R>
where
    R: Read + Send,
{
    type Item = Result<RawChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk()
    }
}
