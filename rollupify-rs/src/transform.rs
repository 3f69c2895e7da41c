//! The per-file transform.
//!
//! A [`Transform`] is created for every file the host pipeline passes
//! through. Files with an eligible extension get a [`Session`] that buffers
//! the whole input, stages it beside the original, runs the sub-bundler on
//! the staged copy and emits the generated code as a single chunk. Anything
//! else is passed through untouched.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::bundler::{BundleEmit, Bundler, OutputFormat, OutputOptions, SwcBundler};
use crate::config::{BundlerConfig, TransformOptions};
use crate::error::{TransformError, TransformResult};
use crate::staged::{staged_path, StagedFile};

const READ_CHUNK_SIZE: usize = 16 * 1024;

lazy_static! {
    static ref ELIGIBLE_RE: Regex = Regex::new(r"\.(?:js|es|es6|jsx)$").unwrap();
}

/// Whether `file` is bundled rather than passed through.
pub fn is_eligible(file: &Path) -> bool {
    ELIGIBLE_RE.is_match(&file.to_string_lossy())
}

/// Creates the transform for one file with a default [`SwcBundler`].
pub fn transform(file: impl AsRef<Path>, options: TransformOptions) -> Transform {
    Rollupify::new(options).transform(file)
}

/// Transform factory shared across the files of a build.
///
/// Holds only immutable options and the sub-bundler; every call to
/// [`Rollupify::transform`] starts an independent session.
#[derive(Clone)]
pub struct Rollupify {
    options: Arc<TransformOptions>,
    bundler: Arc<dyn Bundler>,
}

impl Rollupify {
    pub fn new(options: TransformOptions) -> Self {
        Self::with_bundler(options, Arc::new(SwcBundler))
    }

    pub fn with_bundler(options: TransformOptions, bundler: Arc<dyn Bundler>) -> Self {
        Self {
            options: Arc::new(options),
            bundler,
        }
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    pub fn transform(&self, file: impl AsRef<Path>) -> Transform {
        let file = file.as_ref().to_path_buf();
        if !is_eligible(&file) {
            log::debug!("Passing through {}", file.display());
            return Transform::PassThrough(file);
        }
        Transform::Bundle(Session {
            file,
            buffer: Vec::new(),
            options: self.options.clone(),
            bundler: self.bundler.clone(),
            state: SessionState::Accumulating,
        })
    }
}

/// The transform applied to one file.
pub enum Transform {
    /// Ineligible file: chunks are returned as they are written.
    PassThrough(PathBuf),
    /// Eligible file: chunks are buffered until [`Transform::end`].
    Bundle(Session),
}

impl Transform {
    pub fn file(&self) -> &Path {
        match self {
            Transform::PassThrough(file) => file,
            Transform::Bundle(session) => session.file(),
        }
    }

    /// Accepts the next input chunk, returning what should be emitted now.
    pub fn write(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        match self {
            Transform::PassThrough(_) => Some(chunk.to_vec()),
            Transform::Bundle(session) => {
                session.write(chunk);
                None
            }
        }
    }

    /// Signals end of input, returning the final output chunk, if any.
    pub async fn end(self) -> TransformResult<Option<Vec<u8>>> {
        match self {
            Transform::PassThrough(_) => Ok(None),
            Transform::Bundle(session) => session.finish().await.map(|code| Some(code.into_bytes())),
        }
    }

    /// Runs the transform over a stream of input chunks.
    ///
    /// The output stream ends after the last chunk, or after the first error.
    pub fn pipe<S>(self, input: S) -> BoxStream<'static, TransformResult<Vec<u8>>>
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Send + 'static,
    {
        match self {
            Transform::PassThrough(file) => input
                .map_err(move |source| TransformError::Read {
                    file: file.clone(),
                    source,
                })
                .boxed(),
            Transform::Bundle(session) => {
                let file = session.file.clone();
                stream::once(async move {
                    let session = input
                        .map_err(move |source| TransformError::Read {
                            file: file.clone(),
                            source,
                        })
                        .try_fold(session, |mut session, chunk| async move {
                            session.write(&chunk);
                            Ok(session)
                        })
                        .await?;
                    session.finish().await.map(String::into_bytes)
                })
                .boxed()
            }
        }
    }

    /// Runs the transform from `reader` to `writer`, flushing the writer at the end.
    pub async fn pipe_io<R, W>(mut self, mut reader: R, mut writer: W) -> TransformResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let file = self.file().to_path_buf();
        let write_err = |source: io::Error| TransformError::Write {
            file: file.clone(),
            source,
        };

        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|source| TransformError::Read {
                    file: file.clone(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            if let Some(out) = self.write(&buf[..n]) {
                writer.write_all(&out).await.map_err(write_err)?;
            }
        }

        if let Some(out) = self.end().await? {
            writer.write_all(&out).await.map_err(write_err)?;
        }
        writer.flush().await.map_err(write_err)
    }
}

/// Progress of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accumulating,
    Staged,
    Bundled,
    Emitted,
    Failed,
}

/// Bundling work for one eligible file.
pub struct Session {
    file: PathBuf,
    buffer: Vec<u8>,
    options: Arc<TransformOptions>,
    bundler: Arc<dyn Bundler>,
    state: SessionState,
}

impl Session {
    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn write(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bundles the accumulated source and returns the generated code.
    ///
    /// The staged file is removed before this returns, whatever the outcome.
    pub async fn finish(mut self) -> TransformResult<String> {
        match self.run().await {
            Ok(code) => {
                self.transition(SessionState::Emitted);
                log::info!("Bundled {} ({} bytes)", self.file.display(), code.len());
                Ok(code)
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn run(&mut self) -> TransformResult<String> {
        if std::str::from_utf8(&self.buffer).is_err() {
            return Err(TransformError::InvalidUtf8 {
                file: self.file.clone(),
            });
        }

        let path = staged_path(&self.file).map_err(|source| TransformError::Stage {
            file: self.file.clone(),
            staged: self.file.clone(),
            source,
        })?;
        let staged = StagedFile::stage(path.clone(), &self.buffer)
            .await
            .map_err(|source| TransformError::Stage {
                file: self.file.clone(),
                staged: path,
                source,
            })?;
        self.transition(SessionState::Staged);

        match self.bundle(&staged).await {
            Ok(emit) => {
                let staged_path = staged.path().to_path_buf();
                staged
                    .remove()
                    .await
                    .map_err(|source| TransformError::Cleanup {
                        file: self.file.clone(),
                        staged: staged_path,
                        source,
                    })?;
                Ok(emit.code)
            }
            Err(e) => {
                let staged_path = staged.path().to_path_buf();
                if let Err(cleanup) = staged.remove().await {
                    log::warn!(
                        "Unable to remove {} after failure: {}",
                        staged_path.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    async fn bundle(&mut self, staged: &StagedFile) -> TransformResult<BundleEmit> {
        let config = match &self.options.config {
            Some(source) => source
                .load()
                .await
                .map_err(|source| TransformError::Config {
                    file: self.file.clone(),
                    source,
                })?,
            None => BundlerConfig::default(),
        };
        let input = config.into_input_options(staged.path(), self.options.source_maps);
        let output = OutputOptions {
            format: OutputFormat::Cjs,
        };

        let bundler = self.bundler.clone();
        let emit = tokio::task::spawn_blocking(move || bundler.bundle(input, &output))
            .await
            .map_err(|e| TransformError::Task {
                file: self.file.clone(),
                message: e.to_string(),
            })?
            .map_err(|source| TransformError::Bundle {
                file: self.file.clone(),
                source,
            })?;
        self.transition(SessionState::Bundled);

        if let Some(map) = &emit.maybe_map {
            log::debug!(
                "Discarding separate source map for {} ({} bytes)",
                self.file.display(),
                map.len()
            );
        }
        Ok(emit)
    }

    fn transition(&mut self, state: SessionState) {
        log::debug!("{}: {:?} -> {:?}", self.file.display(), self.state, state);
        self.state = state;
    }
}
