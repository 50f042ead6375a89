use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hound::WavReader;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::backend::{CaptureBackend, CaptureEvent, CaptureOptions};
use super::level::level_from_samples;
use super::wav::{self, WAV_MIME_TYPE};
use crate::error::{SessionError, SessionResult};

/// Capture backend replaying a WAV file in real time.
///
/// The file is re-encoded as 16-bit PCM WAV and handed out in timeslices, so
/// the concatenated chunks form a valid WAV stream (truncated if stopped early).
/// Capture ends on its own once the file is exhausted.
pub struct WavFileBackend {
    path: PathBuf,
    capturing: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WavFileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            capturing: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            task: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> SessionResult<WavReader<std::io::BufReader<std::fs::File>>> {
        WavReader::open(&self.path).map_err(|e| {
            SessionError::DeviceUnsupported(format!(
                "cannot open capture input {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[async_trait::async_trait]
impl CaptureBackend for WavFileBackend {
    async fn request_permission(&mut self) -> SessionResult<()> {
        let reader = self.open()?;
        let spec = reader.spec();
        debug!(
            "Capture input available: {} ({}Hz, {} channels)",
            self.path.display(),
            spec.sample_rate,
            spec.channels
        );
        Ok(())
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        mime_type == WAV_MIME_TYPE
    }

    async fn start(&mut self, options: CaptureOptions) -> SessionResult<mpsc::Receiver<CaptureEvent>> {
        if self.capturing.load(Ordering::SeqCst) {
            warn!("File capture already running, restarting");
            self.stop().await?;
        }

        let audio = wav::read_pcm16(self.open()?);
        let bytes = wav::encode(&audio.samples, audio.sample_rate, audio.channels)?;
        let header_len = bytes.len() - audio.samples.len() * 2;

        info!(
            "Starting file capture: {} ({:.1}s, timeslice {}ms)",
            self.path.display(),
            audio.duration().as_secs_f64(),
            options.timeslice.as_millis()
        );

        let (tx, rx) = mpsc::channel(64);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        let samples_per_tick = ((audio.sample_rate as u128
            * audio.channels as u128
            * options.level_interval.as_millis())
            / 1000)
            .max(1) as usize;
        let ticks_per_slice = (options.timeslice.as_millis() / options.level_interval.as_millis().max(1)).max(1);
        let mime_type = options.mime_type.clone().unwrap_or_else(|| WAV_MIME_TYPE.to_string());

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + options.level_interval, options.level_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut sample_pos = 0usize;
            let mut byte_pos = 0usize;
            let mut ticks = 0u128;

            loop {
                let stopped = tokio::select! {
                    _ = ticker.tick() => false,
                    _ = &mut stop_rx => true,
                };

                if !stopped {
                    let end = (sample_pos + samples_per_tick).min(audio.samples.len());
                    let level = level_from_samples(&audio.samples[sample_pos..end]);
                    sample_pos = end;
                    ticks += 1;

                    if tx.send(CaptureEvent::Level(level)).await.is_err() {
                        break;
                    }
                }

                let exhausted = sample_pos >= audio.samples.len();
                if stopped || exhausted || ticks % ticks_per_slice == 0 {
                    let byte_end = (header_len + sample_pos * 2).min(bytes.len());
                    if byte_end > byte_pos {
                        let chunk = bytes[byte_pos..byte_end].to_vec();
                        byte_pos = byte_end;
                        let event = CaptureEvent::Data {
                            bytes: chunk,
                            mime_type: Some(mime_type.clone()),
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }

                if stopped || exhausted {
                    break;
                }
            }

            capturing.store(false, Ordering::SeqCst);
            debug!("File capture finished ({} bytes delivered)", byte_pos);
        });

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);

        Ok(rx)
    }

    async fn stop(&mut self) -> SessionResult<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The task may already have finished at end of file
            let _ = stop_tx.send(());
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("File capture task failed: {}", e);
            }
        }

        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_fixture(dir: &tempfile::TempDir, seconds: u32) -> PathBuf {
        let path = dir.path().join("input.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..(16000 * seconds) {
            writer.write_sample(((i % 200) as i16 - 100) * 100).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    async fn drain(mut rx: mpsc::Receiver<CaptureEvent>) -> (Vec<u8>, usize, usize) {
        let mut bytes = Vec::new();
        let mut chunks = 0;
        let mut levels = 0;
        while let Some(event) = rx.recv().await {
            match event {
                CaptureEvent::Data { bytes: b, .. } => {
                    chunks += 1;
                    bytes.extend(b);
                }
                CaptureEvent::Level(_) => levels += 1,
            }
        }
        (bytes, chunks, levels)
    }

    #[tokio::test]
    async fn test_missing_file_is_unsupported_device() {
        let mut backend = WavFileBackend::new("/nonexistent/input.wav");
        let err = backend.request_permission().await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceUnsupported(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_capture_reassembles_into_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, 2);
        let mut backend = WavFileBackend::new(&path);

        let options = CaptureOptions {
            timeslice: Duration::from_millis(1000),
            ..Default::default()
        };
        let rx = backend.start(options).await.unwrap();
        let (bytes, chunks, levels) = drain(rx).await;

        assert_eq!(chunks, 2, "2s of audio in 1s slices");
        assert_eq!(levels, 40, "one level reading per 50ms");
        assert!(!backend.is_capturing());

        let audio = wav::decode(&bytes).unwrap();
        assert_eq!(audio.samples.len(), 32000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flushes_partial_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, 5);
        let mut backend = WavFileBackend::new(&path);

        let rx = backend.start(CaptureOptions::default()).await.unwrap();
        let collector = tokio::spawn(drain(rx));

        tokio::time::sleep(Duration::from_millis(1125)).await;
        backend.stop().await.unwrap();

        let (bytes, _, _) = collector.await.unwrap();
        let audio = wav::decode(&bytes).unwrap();

        // Ticks at 50ms..1100ms consumed 800 samples each before the stop
        assert_eq!(audio.samples.len(), 22 * 800);
    }
}
