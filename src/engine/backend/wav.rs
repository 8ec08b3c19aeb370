//! WAV replay backend.
//!
//! Feeds a recorded file through the same analyser the live backend uses,
//! advancing by one tick's worth of samples per frame read. Useful for tuning
//! thresholds against a recording and for reproducible end-to-end runs.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::analysis::features::{AnalysisFrame, SpectrumAnalyser};

use super::{
    is_trusted_origin, CaptureBackend, CaptureConstraints, InputStream, PlatformRefusal,
    StreamClosed,
};

/// Backend replaying a WAV file as if it were a microphone
#[derive(Debug, Clone)]
pub struct WavReplayBackend {
    path: PathBuf,
}

impl WavReplayBackend {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl CaptureBackend for WavReplayBackend {
    fn origin(&self) -> String {
        format!("file://{}", self.path.display())
    }

    fn is_secure_context(&self) -> bool {
        is_trusted_origin(&self.origin())
    }

    fn supports_capture(&self) -> bool {
        true
    }

    fn allows_silent_reacquire(&self) -> bool {
        true
    }

    fn request_input(
        &self,
        constraints: CaptureConstraints,
    ) -> BoxFuture<'static, Result<Box<dyn InputStream>, PlatformRefusal>> {
        let path = self.path.clone();
        async move {
            let decoded = tokio::task::spawn_blocking(move || read_mono(&path)).await;
            let (samples, sample_rate) = match decoded {
                Ok(result) => result?,
                Err(join_err) => {
                    return Err(PlatformRefusal::Other {
                        reason: format!("WAV decode task failed: {}", join_err),
                    })
                }
            };
            tracing::info!(
                "[WavReplay] Loaded {} samples at {} Hz",
                samples.len(),
                sample_rate
            );
            Ok(Box::new(WavReplayStream::new(samples, sample_rate, &constraints))
                as Box<dyn InputStream>)
        }
        .boxed()
    }
}

struct WavReplayStream {
    samples: Vec<f32>,
    position: usize,
    samples_per_tick: usize,
    analyser: SpectrumAnalyser,
}

impl WavReplayStream {
    fn new(samples: Vec<f32>, sample_rate: u32, constraints: &CaptureConstraints) -> Self {
        let samples_per_tick =
            ((sample_rate as u64 * constraints.analyser.tick_interval_ms) / 1000).max(1) as usize;
        Self {
            samples,
            position: 0,
            samples_per_tick,
            analyser: SpectrumAnalyser::new(&constraints.analyser),
        }
    }
}

impl InputStream for WavReplayStream {
    fn read_frame(&mut self, frame: &mut AnalysisFrame) -> Result<(), StreamClosed> {
        if self.position >= self.samples.len() {
            return Err(StreamClosed);
        }
        let end = (self.position + self.samples_per_tick).min(self.samples.len());
        self.analyser.push_samples(&self.samples[self.position..end]);
        self.position = end;
        self.analyser.fill_frame(frame);
        Ok(())
    }

    fn bin_count(&self) -> usize {
        self.analyser.bin_count()
    }
}

fn read_mono(path: &Path) -> Result<(Vec<f32>, u32), PlatformRefusal> {
    let mut reader = hound::WavReader::open(path).map_err(|err| match err {
        hound::Error::IoError(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
            PlatformRefusal::NotFound
        }
        other => PlatformRefusal::Other {
            reason: format!("failed to open {}: {}", path.display(), other),
        },
    })?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let read_err = |err: hound::Error| PlatformRefusal::Other {
        reason: format!("error reading {}: {}", path.display(), err),
    };

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(read_err)?,
        hound::SampleFormat::Int => {
            let scale = (1u64 << spec.bits_per_sample.saturating_sub(1).min(31)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(read_err)?
        }
    };

    let mono = interleaved.chunks(channels).map(|frame| frame[0]).collect();
    Ok((mono, spec.sample_rate))
}
