use std::io;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::Stream;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::process::ChildStderr;
use tokio::process::ChildStdout;
use tokio::sync::mpsc;

use crate::error::BridgeErr;
use crate::error::Result;
use crate::reaper::ExitOutcome;
use crate::reaper::ProcessHandle;

const LINE_CHANNEL_CAPACITY: usize = 256;

/// Live, lazily consumed line sequence over a running claude process.
///
/// Lines from stdout and stderr arrive interleaved in arrival order. The
/// sequence is finite and cannot be restarted: once it yields `None` the
/// process has exited and every line has been delivered. An abnormal end,
/// a non-zero exit or the deadline, is delivered as a final `Err` item.
///
/// Dropping the sequence releases the process in the background; call
/// [`close`](Self::close) instead to observe the final outcome.
pub struct OutputLines {
    rx: mpsc::Receiver<Result<String>>,
    handle: ProcessHandle,
}

impl OutputLines {
    pub(crate) fn new(
        stdout: ChildStdout,
        stderr: ChildStderr,
        handle: ProcessHandle,
        deadline: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);

        let stdout_pump = tokio::spawn(pump_lines(BufReader::new(stdout), tx.clone()));
        let stderr_pump = tokio::spawn(pump_lines(BufReader::new(stderr), tx.clone()));

        // Once both pipes hit EOF the verdict is known; an abnormal one is
        // surfaced as the last item before the channel closes.
        let exit_handle = handle.clone();
        tokio::spawn(async move {
            let _ = stdout_pump.await;
            let _ = stderr_pump.await;
            match exit_handle.wait().await {
                ExitOutcome::Exited { code: 0 } | ExitOutcome::Terminated => {}
                ExitOutcome::Exited { code } => {
                    let _ = tx
                        .send(Err(BridgeErr::Exec {
                            exit_code: code,
                            output: String::new(),
                        }))
                        .await;
                }
                ExitOutcome::TimedOut => {
                    let _ = tx.send(Err(BridgeErr::Timeout { timeout: deadline })).await;
                }
                ExitOutcome::WaitFailed(message) => {
                    let _ = tx.send(Err(BridgeErr::Io(io::Error::other(message)))).await;
                }
            }
        });

        Self { rx, handle }
    }

    /// Next line of merged output, or `None` once the process has exited
    /// and everything has been delivered.
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }

    /// Terminate the process and release the readers. Safe at any point of
    /// consumption, including after the sequence already ended; lines
    /// buffered before the close stay readable.
    pub async fn close(&mut self) -> ExitOutcome {
        self.rx.close();
        self.handle.close().await
    }

    /// Process id as captured at spawn; useful for external liveness
    /// checks.
    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }
}

impl Stream for OutputLines {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for OutputLines {
    fn drop(&mut self) {
        self.handle.request_close();
    }
}

async fn pump_lines<R>(reader: BufReader<R>, tx: mpsc::Sender<Result<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    let mut deliver = true;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if deliver && tx.send(Ok(line)).await.is_err() {
                    // Receiver gone; keep draining to EOF so the pipe
                    // cannot fill and stall the child.
                    deliver = false;
                }
            }
            Ok(None) => break,
            Err(err) => {
                if deliver {
                    let _ = tx.send(Err(BridgeErr::Io(err))).await;
                }
                break;
            }
        }
    }
}
