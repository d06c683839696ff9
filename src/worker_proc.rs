//! Spawns a single worker process and the background task that reads its outbound channel.
//!
//! The reader task doubles as the worker's sentinel: a clean EOF on stdout is
//! exactly "the process exited", whether or not it had a chance to write a result frame first.

use std::process::Stdio;

use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use crate::protocol::{read_frame, ResultFrame};
use crate::task::Generation;

/// Events the per-worker reader task reports back to the driver.
pub(crate) enum WorkerEvent {
    Frame {
        worker_idx: usize,
        generation: Generation,
        frame: ResultFrame,
    },
    Died {
        worker_idx: usize,
        generation: Generation,
    },
}

/// A live worker process slot, as tracked by the supervisor.
pub(crate) struct WorkerProc {
    pub(crate) child: Child,
    pub(crate) stdin: ChildStdin,
}

impl WorkerProc {
    /// Spawn a fresh worker process and its reader task. The reader task sends `WorkerEvent`s
    /// tagged with `generation` to `events_tx` until the process exits.
    pub(crate) fn spawn(
        worker_bin: &std::path::Path,
        worker_args: &[std::ffi::OsString],
        worker_idx: usize,
        generation: Generation,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
    ) -> std::io::Result<Self> {
        let mut child = Command::new(worker_bin)
            .args(worker_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .expect("stdin was requested as piped");
        let stdout = child
            .stdout
            .take()
            .expect("stdout was requested as piped");

        tokio::spawn(read_worker_stdout(
            BufReader::new(stdout),
            worker_idx,
            generation,
            events_tx,
        ));

        Ok(Self { child, stdin })
    }
}

async fn read_worker_stdout(
    mut stdout: BufReader<tokio::process::ChildStdout>,
    worker_idx: usize,
    generation: Generation,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
) {
    loop {
        match read_frame::<_, ResultFrame>(&mut stdout).await {
            Ok(Some(frame)) => {
                if events_tx
                    .send(WorkerEvent::Frame {
                        worker_idx,
                        generation,
                        frame,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Ok(None) | Err(_) => {
                // Clean EOF (worker exited after finishing a frame, or mid-write) and an I/O
                // error (broken pipe) are both treated as "worker is gone" — the supervisor
                // distinguishes collateral damage by what was in flight, not by how we learned
                // the worker died.
                let _ = events_tx.send(WorkerEvent::Died {
                    worker_idx,
                    generation,
                });
                return;
            }
        }
    }
}
