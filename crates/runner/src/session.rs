//! One batch session: connect, upload, wait for every transcript, export.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::broadcast::{self, error::RecvError};

use aura_batch::backend::HttpBackend;
use aura_batch::controller::{BatchController, ControllerConfig};
use aura_batch::events::BatchUpdate;
use aura_batch::export::ExportReport;
use aura_client::api::{TranscriptionApi, UploadFile};
use aura_client::channel::EventChannel;
use aura_client::events::ChannelEvent;
use aura_client::messages::{ModelDownloadCompleteEvent, ModelDownloadEvent};

use crate::config::RunnerConfig;

/// How long to wait for the first connection before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Run one batch of `files` to completion and export it.
pub async fn run(config: &RunnerConfig, files: Vec<PathBuf>) -> anyhow::Result<ExportReport> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let api = TranscriptionApi::with_client(client, &config.api_url);

    check_model(&api).await?;

    let channel = EventChannel::new(&config.ws_url, config.reconnect.clone());
    channel.on(|event: &ModelDownloadEvent| {
        tracing::info!(
            percent = event.percent,
            speed_mbps = event.speed_mbps,
            remaining_secs = event.estimated_remaining_seconds,
            "Model download in progress",
        );
    });
    channel.on(|_: &ModelDownloadCompleteEvent| tracing::info!("Model download complete"));

    let backend = Arc::new(HttpBackend::new(api, config.upload_mode));
    let controller = BatchController::new(
        backend.clone(),
        backend,
        ControllerConfig {
            export_step_delay: config.export_step_delay,
        },
    );
    controller.attach(&channel);

    let result = drive(config, &channel, &controller, files).await;
    channel.shutdown().await;
    result
}

async fn drive(
    config: &RunnerConfig,
    channel: &Arc<EventChannel>,
    controller: &Arc<BatchController>,
    files: Vec<PathBuf>,
) -> anyhow::Result<ExportReport> {
    let mut lifecycle = channel.subscribe();
    let mut updates = controller.subscribe();

    channel.connect();
    wait_until_connected(&mut lifecycle, CONNECT_TIMEOUT).await?;

    let files: Vec<UploadFile> = files.into_iter().map(UploadFile::from_path).collect();
    let job_ids = controller.submit(files).await?;
    tracing::info!(jobs = job_ids.len(), "Batch submitted");

    tokio::select! {
        ready = wait_until_ready(&mut updates, &mut lifecycle) => ready?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling active job");
            controller.cancel().await?;
            bail!("Interrupted");
        }
    }

    let report = controller.export_all(config.export_mode).await?;
    for failure in &report.failed {
        tracing::warn!(job_id = %failure.job_id, filename = %failure.filename, error = %failure.error, "Export failed");
    }

    if config.print_transcripts {
        for transcript in controller.transcripts().await? {
            println!("===== {} =====\n{}\n", transcript.filename, transcript.text);
        }
    }

    Ok(report)
}

async fn check_model(api: &TranscriptionApi) -> anyhow::Result<()> {
    let status = api
        .model_status()
        .await
        .context("Failed to query model status")?;

    if let Some(ram) = &status.ram_check {
        if !ram.sufficient {
            tracing::warn!(
                available_gb = ram.available_gb,
                required_gb = ram.required_gb,
                "Available memory is below the model's requirement",
            );
        }
    }
    if !status.downloaded {
        bail!("Speech model is not downloaded yet; start the download from the server first");
    }
    Ok(())
}

/// Wait for the channel's first successful connection.
pub async fn wait_until_connected(
    lifecycle: &mut broadcast::Receiver<ChannelEvent>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let wait = async {
        loop {
            match lifecycle.recv().await {
                Ok(ChannelEvent::Connected) => return Ok(()),
                Ok(ChannelEvent::Exhausted { attempts }) => {
                    bail!("Event stream unreachable after {attempts} reconnect attempts")
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => bail!("Event channel closed"),
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .context("Timed out connecting to the event stream")?
}

/// Follow batch updates until the batch is ready to export.
///
/// Fails when a job fails or is cancelled, or when the event stream is
/// lost for good.
pub async fn wait_until_ready(
    updates: &mut broadcast::Receiver<BatchUpdate>,
    lifecycle: &mut broadcast::Receiver<ChannelEvent>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(BatchUpdate::ReadyToExport { completed }) => {
                    tracing::info!(completed, "All jobs completed");
                    return Ok(());
                }
                Ok(BatchUpdate::Progress(progress)) => {
                    tracing::info!(
                        job_id = %progress.job_id,
                        file = %format!("{}/{}", progress.batch_current, progress.batch_total),
                        percent = (progress.audio_progress * 100.0).round(),
                        eta = %progress.eta_label(),
                        "Transcribing",
                    );
                }
                Ok(BatchUpdate::ItemCompleted { filename, completed, expected, .. }) => {
                    tracing::info!(%filename, completed, expected, "Transcript ready");
                }
                Ok(BatchUpdate::JobFailed { job_id, message }) => {
                    bail!("Job {job_id} failed: {message}");
                }
                Ok(BatchUpdate::JobCancelled { job_id }) => {
                    bail!("Job {job_id} was cancelled");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed batch updates");
                }
                Err(RecvError::Closed) => bail!("Batch controller closed"),
            },
            event = lifecycle.recv() => match event {
                Ok(ChannelEvent::Exhausted { attempts }) => {
                    bail!("Lost the event stream after {attempts} reconnect attempts");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("Event channel closed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use aura_batch::state::BatchPhase;

    use super::*;

    #[tokio::test]
    async fn ready_update_ends_wait() {
        let (update_tx, mut updates) = broadcast::channel(16);
        let (_event_tx, mut lifecycle) = broadcast::channel::<ChannelEvent>(16);

        update_tx
            .send(BatchUpdate::PhaseChanged {
                from: BatchPhase::Processing { paused: false },
                to: BatchPhase::Exporting,
            })
            .unwrap();
        update_tx.send(BatchUpdate::ReadyToExport { completed: 2 }).unwrap();

        wait_until_ready(&mut updates, &mut lifecycle).await.unwrap();
    }

    #[tokio::test]
    async fn failed_job_aborts_wait() {
        let (update_tx, mut updates) = broadcast::channel(16);
        let (_event_tx, mut lifecycle) = broadcast::channel::<ChannelEvent>(16);

        update_tx
            .send(BatchUpdate::JobFailed {
                job_id: "j1".into(),
                message: "out of memory".into(),
            })
            .unwrap();

        let err = wait_until_ready(&mut updates, &mut lifecycle).await.unwrap_err();
        assert!(err.to_string().contains("out of memory"));
    }

    #[tokio::test]
    async fn exhausted_stream_aborts_wait() {
        let (_update_tx, mut updates) = broadcast::channel::<BatchUpdate>(16);
        let (event_tx, mut lifecycle) = broadcast::channel(16);

        event_tx.send(ChannelEvent::Disconnected).unwrap();
        event_tx.send(ChannelEvent::Exhausted { attempts: 5 }).unwrap();

        let err = wait_until_ready(&mut updates, &mut lifecycle).await.unwrap_err();
        assert!(err.to_string().contains("5 reconnect attempts"));
    }

    #[tokio::test]
    async fn connected_event_ends_connect_wait() {
        let (event_tx, mut lifecycle) = broadcast::channel(16);
        event_tx.send(ChannelEvent::Connecting).unwrap();
        event_tx.send(ChannelEvent::Connected).unwrap();

        wait_until_connected(&mut lifecycle, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connect_wait_times_out() {
        let (_event_tx, mut lifecycle) = broadcast::channel::<ChannelEvent>(16);

        let err = wait_until_connected(&mut lifecycle, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Timed out"));
    }
}
