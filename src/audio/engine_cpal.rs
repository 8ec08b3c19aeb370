// CpalCaptureStream - live microphone input through CPAL
//
// cpal::Stream is not Send on every host, so the stream is built, played and
// dropped on a dedicated "blow-capture" thread. The real-time callback copies
// the first channel into pooled buffers; the analysis side drains them into a
// SpectrumAnalyser on every frame read. Dropping the CpalCaptureStream stops
// that thread, which drops the cpal::Stream and releases the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SizedSample;

use super::buffer_pool::{AnalysisChannels, BufferPool, CaptureThreadChannels};
use crate::analysis::features::{AnalysisFrame, SpectrumAnalyser};
use crate::engine::backend::{CaptureConstraints, InputStream, PlatformRefusal, StreamClosed};

/// Open input device feeding a spectrum analyser
pub struct CpalCaptureStream {
    analysis: AnalysisChannels,
    analyser: SpectrumAnalyser,
    failed: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalCaptureStream {
    /// Open the default input device and start capturing.
    ///
    /// Blocks until the device is playing or has refused; call from a
    /// blocking context.
    pub fn open(constraints: &CaptureConstraints) -> Result<Self, PlatformRefusal> {
        if constraints.wants_processing() {
            tracing::warn!(
                "[CpalCapture] Platform signal processing requested but CPAL captures raw input; ignoring"
            );
        }

        let (capture, analysis) =
            BufferPool::new(constraints.buffer_pool_size, constraints.buffer_size)
                .split_for_threads();
        let failed = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<u32, PlatformRefusal>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_failed = Arc::clone(&failed);

        let thread = thread::Builder::new()
            .name("blow-capture".to_string())
            .spawn(move || match start_input_stream(capture, thread_failed) {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    // Wait for stop (or the owner being dropped)
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::debug!("[CpalCapture] Input stream released");
                }
                Err(refusal) => {
                    let _ = ready_tx.send(Err(refusal));
                }
            })
            .map_err(|e| PlatformRefusal::Other {
                reason: format!("Failed to spawn capture thread: {}", e),
            })?;

        let sample_rate = match ready_rx.recv() {
            Ok(Ok(sample_rate)) => sample_rate,
            Ok(Err(refusal)) => {
                let _ = thread.join();
                return Err(refusal);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(PlatformRefusal::Other {
                    reason: "Capture thread exited before the stream started".to_string(),
                });
            }
        };

        tracing::info!(
            "[CpalCapture] Capturing at {} Hz (fft_size {})",
            sample_rate,
            constraints.analyser.fft_size
        );

        Ok(Self {
            analysis,
            analyser: SpectrumAnalyser::new(&constraints.analyser),
            failed,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl InputStream for CpalCaptureStream {
    fn read_frame(&mut self, frame: &mut AnalysisFrame) -> Result<(), StreamClosed> {
        if self.failed.load(Ordering::Acquire) {
            return Err(StreamClosed);
        }
        let analyser = &mut self.analyser;
        self.analysis.drain(|samples| analyser.push_samples(samples));
        self.analyser.fill_frame(frame);
        Ok(())
    }

    fn bin_count(&self) -> usize {
        self.analyser.bin_count()
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("[CpalCapture] Capture thread panicked");
            }
        }
    }
}

fn start_input_stream(
    capture: CaptureThreadChannels,
    failed: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32), PlatformRefusal> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(PlatformRefusal::NotFound)?;

    let config = device
        .default_input_config()
        .map_err(map_default_config_error)?;
    let sample_rate = config.sample_rate().0;
    let stream_config: cpal::StreamConfig = config.clone().into();

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, capture, failed),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, capture, failed),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, capture, failed),
        other => {
            return Err(PlatformRefusal::Other {
                reason: format!("Unsupported input sample format {:?}", other),
            })
        }
    }?;

    stream
        .play()
        .map_err(|e| map_backend_text(&e.to_string(), PlatformRefusal::NotReadable))?;

    Ok((stream, sample_rate))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut capture: CaptureThreadChannels,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, PlatformRefusal>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels as usize;
    let err_fn = move |err: cpal::StreamError| {
        tracing::error!("[CpalCapture] Input stream error: {}", err);
        failed.store(true, Ordering::Release);
    };

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                capture.publish_first_channel(data, channels, |s| s.to_sample::<f32>());
            },
            err_fn,
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => PlatformRefusal::NotFound,
            cpal::BuildStreamError::BackendSpecific { err } => {
                map_backend_text(&err.description, PlatformRefusal::NotReadable)
            }
            other => PlatformRefusal::Other {
                reason: other.to_string(),
            },
        })
}

fn map_default_config_error(err: cpal::DefaultStreamConfigError) -> PlatformRefusal {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => PlatformRefusal::NotFound,
        cpal::DefaultStreamConfigError::BackendSpecific { err } => map_backend_text(
            &err.description,
            PlatformRefusal::Other {
                reason: String::new(),
            },
        ),
        other => PlatformRefusal::Other {
            reason: other.to_string(),
        },
    }
}

/// Classify a backend's free-text failure
///
/// Hosts report permission and contention problems only as text.
pub(crate) fn map_backend_text(text: &str, fallback: PlatformRefusal) -> PlatformRefusal {
    let lower = text.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed")
    {
        PlatformRefusal::NotAllowed
    } else if lower.contains("busy") || lower.contains("in use") || lower.contains("resource") {
        PlatformRefusal::NotReadable
    } else {
        match fallback {
            PlatformRefusal::Other { .. } => PlatformRefusal::Other {
                reason: text.to_string(),
            },
            fallback => fallback,
        }
    }
}
