//! Background drain of the child's stdout/stderr.
//!
//! vLLM (and the Python/C++ stack under it) can emit non-UTF8 bytes and very
//! chatty progress output. Lines are read as bytes and decoded lossily so
//! one bad byte never stops the drain, and both pipes are read by a single
//! task so the child never blocks on a full pipe.

use std::sync::Arc;

use tide_core::{LogSinkPort, OutputStream};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to the task forwarding child output to a [`LogSinkPort`].
///
/// The task ends on EOF of both pipes or on [`cancel`](Self::cancel).
/// Dropping the handle also stops it.
#[derive(Debug)]
pub struct LogDrain {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl LogDrain {
    /// Start draining `stdout` and `stderr`, tagging each line with `source`.
    pub fn spawn(
        source: impl Into<String>,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
        sink: Arc<dyn LogSinkPort>,
    ) -> Self {
        Self::spawn_readers(source, stdout, stderr, sink)
    }

    /// Same as [`spawn`](Self::spawn) for arbitrary readers.
    pub fn spawn_readers<O, E>(
        source: impl Into<String>,
        stdout: Option<O>,
        stderr: Option<E>,
        sink: Arc<dyn LogSinkPort>,
    ) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(drain(
            source.into(),
            stdout,
            stderr,
            sink,
            cancel.clone(),
        ));
        Self {
            cancel,
            join: Some(join),
        }
    }

    /// Whether the drain task has ended (EOF, error or cancellation).
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop draining and wait for the task to release the pipes.
    ///
    /// Idempotent and infallible; returns after at most the in-flight read.
    pub async fn cancel(&mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(error = %e, "Log drain task ended abnormally");
            }
        }
    }
}

impl Drop for LogDrain {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Longest line forwarded to the sink; the rest of a longer line is dropped.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// One pipe being read line by line.
///
/// Both `\n` and `\r` end a line (progress bars redraw with a bare `\r`),
/// and `\r\n` counts once.
struct LineSource<R> {
    reader: Option<BufReader<R>>,
    buf: Vec<u8>,
    stream: OutputStream,
    /// Last line ended with `\r`; a leading `\n` belongs to it.
    after_cr: bool,
    /// Skipping the tail of an over-long line.
    truncating: bool,
}

impl<R: AsyncRead + Unpin> LineSource<R> {
    fn new(reader: Option<R>, stream: OutputStream) -> Self {
        Self {
            reader: reader.map(BufReader::new),
            buf: Vec::with_capacity(1024),
            stream,
            after_cr: false,
            truncating: false,
        }
    }

    const fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Read the next line. `None` means the pipe is done (EOF or error).
    ///
    /// Cancel safe: bytes are only consumed from the reader together with
    /// their move into `buf`, so a partial line is completed by the next call.
    async fn next_line(&mut self) -> Option<String> {
        loop {
            let reader = self.reader.as_mut()?;
            let available = match reader.fill_buf().await {
                Ok(available) => available,
                Err(e) => {
                    warn!(stream = %self.stream, error = %e, "Log stream read failed, no longer reading it");
                    self.reader = None;
                    return None;
                }
            };

            if available.is_empty() {
                self.reader = None;
                // Output without a trailing newline before EOF.
                return (!self.buf.is_empty()).then(|| take_line(&mut self.buf));
            }

            if std::mem::take(&mut self.after_cr) && available[0] == b'\n' {
                reader.consume(1);
                continue;
            }

            let end = available.iter().position(|&b| b == b'\n' || b == b'\r');
            let chunk = &available[..end.unwrap_or(available.len())];

            if !self.truncating {
                let room = MAX_LINE_BYTES - self.buf.len();
                self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }

            if let Some(end) = end {
                self.after_cr = available[end] == b'\r';
                reader.consume(end + 1);
                if std::mem::take(&mut self.truncating) {
                    self.buf.clear();
                    continue;
                }
                return Some(take_line(&mut self.buf));
            }

            let consumed = chunk.len();
            reader.consume(consumed);
            if !self.truncating && self.buf.len() >= MAX_LINE_BYTES {
                debug!(stream = %self.stream, "Line longer than {MAX_LINE_BYTES} bytes, truncating");
                self.truncating = true;
                return Some(take_line(&mut self.buf));
            }
        }
    }
}

fn take_line(buf: &mut Vec<u8>) -> String {
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    line
}

async fn drain<O, E>(
    source: String,
    stdout: Option<O>,
    stderr: Option<E>,
    sink: Arc<dyn LogSinkPort>,
    cancel: CancellationToken,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out = LineSource::new(stdout, OutputStream::Stdout);
    let mut err = LineSource::new(stderr, OutputStream::Stderr);

    while out.is_open() || err.is_open() {
        let (stream, line) = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(%source, "Log drain cancelled");
                break;
            }
            line = out.next_line(), if out.is_open() => (OutputStream::Stdout, line),
            line = err.next_line(), if err.is_open() => (OutputStream::Stderr, line),
        };

        if let Some(line) = line {
            sink.append(&source, stream, line);
        }
    }

    debug!(%source, "Log drain task exiting");
}
