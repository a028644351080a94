//! JSON-lines transport: one [`WorkerCommand`] per input line, one
//! [`TaskResult`] per output line.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::RuntimeError;
use crate::worker::{TaskOutcome, TaskResult, Worker, WorkerCommand};

const CHANNEL_CAPACITY: usize = 64;

/// Drive `worker` from `reader` until input ends and every task has reported.
pub async fn serve<R, W>(reader: R, mut writer: W, worker: Worker) -> Result<(), RuntimeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (res_tx, mut res_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let worker = tokio::spawn(worker.run(cmd_rx, res_tx.clone()));

    let mut lines = BufReader::new(reader).lines();
    let mut commands = Some(cmd_tx);
    let mut rejections = Some(res_tx);

    loop {
        tokio::select! {
            line = lines.next_line(), if commands.is_some() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match serde_json::from_str::<WorkerCommand>(&line) {
                    Ok(command) => {
                        if let Some(tx) = &commands {
                            if tx.send(command).await.is_err() {
                                debug!("Worker stopped accepting commands");
                                commands = None;
                                rejections = None;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Ignoring malformed command");
                        if let (Some(task_id), Some(tx)) = (task_id_of(&line), &rejections) {
                            let result = TaskResult {
                                task_id,
                                outcome: TaskOutcome::Failed {
                                    kind: "invalid-command".into(),
                                    message: e.to_string(),
                                },
                            };
                            let _ = tx.send(result).await;
                        }
                    }
                },
                None => {
                    debug!("Input closed");
                    commands = None;
                    rejections = None;
                }
            },
            result = res_rx.recv() => match result {
                Some(result) => write_line(&mut writer, &result).await?,
                None => break,
            },
        }
    }

    if let Err(e) = worker.await {
        warn!(error = %e, "Worker task ended abnormally");
    }
    writer.flush().await?;
    Ok(())
}

fn task_id_of(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    value.get("taskId")?.as_str().map(str::to_string)
}

async fn write_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    result: &TaskResult,
) -> Result<(), RuntimeError> {
    let mut line = serde_json::to_vec(result)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
