use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Notify;

use crate::analysis::features::AnalysisFrame;

use super::{
    is_trusted_origin, CaptureBackend, CaptureConstraints, InputStream, PlatformRefusal,
    StreamClosed,
};

/// Frames a scripted stream plays back, and what happens after the last one.
#[derive(Debug, Clone)]
pub struct FrameScript {
    frames: Vec<AnalysisFrame>,
    looping: bool,
}

impl FrameScript {
    /// Play `frames` once, then close the stream.
    pub fn once(frames: Vec<AnalysisFrame>) -> Self {
        Self {
            frames,
            looping: false,
        }
    }

    /// Play `frames` forever.
    pub fn looping(frames: Vec<AnalysisFrame>) -> Self {
        Self {
            frames,
            looping: true,
        }
    }

    /// Endless silence at `bin_count` bins.
    pub fn silence(bin_count: usize) -> Self {
        Self::looping(vec![AnalysisFrame::zeroed(bin_count)])
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Scripted backend used for deterministic testing and CLI tooling.
///
/// Plays a [`FrameScript`] instead of touching audio hardware, and lets
/// tests stage refusals, hold a permission prompt open, and observe how many
/// streams are open at any moment.
pub struct ScriptedBackend {
    origin: String,
    supports: bool,
    silent_reacquire: bool,
    script: FrameScript,
    refusals: Mutex<VecDeque<PlatformRefusal>>,
    held_prompt: Mutex<Option<Arc<Notify>>>,
    granted: Arc<AtomicBool>,
    requests: AtomicUsize,
    prompts: AtomicUsize,
    open_streams: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(script: FrameScript) -> Self {
        Self {
            origin: "https://localhost".to_string(),
            supports: true,
            silent_reacquire: true,
            script,
            refusals: Mutex::new(VecDeque::new()),
            held_prompt: Mutex::new(None),
            granted: Arc::new(AtomicBool::new(false)),
            requests: AtomicUsize::new(0),
            prompts: AtomicUsize::new(0),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pretend to run from `origin`; untrusted origins are refused.
    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self
    }

    /// Pretend the platform has no capture capability.
    pub fn without_capture(mut self) -> Self {
        self.supports = false;
        self
    }

    /// Prompt on every request, even after a grant.
    pub fn without_silent_reacquire(mut self) -> Self {
        self.silent_reacquire = false;
        self
    }

    /// Fail the next request with `refusal`.
    pub fn refuse_next(&self, refusal: PlatformRefusal) {
        if let Ok(mut queue) = self.refusals.lock() {
            queue.push_back(refusal);
        }
    }

    /// Keep the next request pending until the returned handle is notified.
    pub fn hold_next_prompt(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        if let Ok(mut held) = self.held_prompt.lock() {
            *held = Some(Arc::clone(&notify));
        }
        notify
    }

    /// Requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Requests that would have shown a permission prompt.
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Streams currently holding the (pretend) device.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new(FrameScript::silence(crate::analysis::features::REFERENCE_BIN_COUNT))
    }
}

impl CaptureBackend for ScriptedBackend {
    fn origin(&self) -> String {
        self.origin.clone()
    }

    fn is_secure_context(&self) -> bool {
        is_trusted_origin(&self.origin)
    }

    fn supports_capture(&self) -> bool {
        self.supports
    }

    fn allows_silent_reacquire(&self) -> bool {
        self.silent_reacquire
    }

    fn request_input(
        &self,
        _constraints: CaptureConstraints,
    ) -> BoxFuture<'static, Result<Box<dyn InputStream>, PlatformRefusal>> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let prompted = !(self.silent_reacquire && self.granted.load(Ordering::SeqCst));
        if prompted {
            self.prompts.fetch_add(1, Ordering::SeqCst);
        }

        let refusal = self.refusals.lock().ok().and_then(|mut q| q.pop_front());
        let held = self.held_prompt.lock().ok().and_then(|mut h| h.take());
        let script = self.script.clone();
        let granted = Arc::clone(&self.granted);
        let open_streams = Arc::clone(&self.open_streams);

        async move {
            if let Some(notify) = held {
                notify.notified().await;
            }

            if let Some(refusal) = refusal {
                if refusal == PlatformRefusal::NotAllowed {
                    granted.store(false, Ordering::SeqCst);
                }
                return Err(refusal);
            }

            granted.store(true, Ordering::SeqCst);
            Ok(Box::new(ScriptedStream::new(script, open_streams)) as Box<dyn InputStream>)
        }
        .boxed()
    }
}

/// Stream replaying a [`FrameScript`].
struct ScriptedStream {
    script: FrameScript,
    position: usize,
    bin_count: usize,
    open_streams: Arc<AtomicUsize>,
}

impl ScriptedStream {
    fn new(script: FrameScript, open_streams: Arc<AtomicUsize>) -> Self {
        open_streams.fetch_add(1, Ordering::SeqCst);
        let bin_count = script.frames.first().map(|f| f.len()).unwrap_or_default();
        Self {
            script,
            position: 0,
            bin_count,
            open_streams,
        }
    }
}

impl InputStream for ScriptedStream {
    fn read_frame(&mut self, frame: &mut AnalysisFrame) -> Result<(), StreamClosed> {
        if self.script.is_empty() {
            return Err(StreamClosed);
        }
        if self.position >= self.script.len() {
            if !self.script.looping {
                return Err(StreamClosed);
            }
            self.position = 0;
        }
        frame.clone_from(&self.script.frames[self.position]);
        self.position += 1;
        Ok(())
    }

    fn bin_count(&self) -> usize {
        self.bin_count
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_plays_once_then_closes() {
        let backend = ScriptedBackend::new(FrameScript::once(vec![
            AnalysisFrame::zeroed(4),
            AnalysisFrame::new(vec![1, 2, 3, 4]),
        ]));
        let mut stream = backend
            .request_input(CaptureConstraints::default())
            .await
            .unwrap();
        let mut frame = AnalysisFrame::default();

        assert!(stream.read_frame(&mut frame).is_ok());
        assert!(stream.read_frame(&mut frame).is_ok());
        assert_eq!(frame.bins(), &[1, 2, 3, 4]);
        assert_eq!(stream.read_frame(&mut frame), Err(StreamClosed));
    }

    #[tokio::test]
    async fn test_open_stream_counter_tracks_drop() {
        let backend = ScriptedBackend::default();
        let stream = backend
            .request_input(CaptureConstraints::default())
            .await
            .unwrap();
        assert_eq!(backend.open_streams(), 1);
        drop(stream);
        assert_eq!(backend.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_prompt_only_until_granted() {
        let backend = ScriptedBackend::default();
        let first = backend.request_input(CaptureConstraints::default()).await;
        assert!(first.is_ok());
        let second = backend.request_input(CaptureConstraints::default()).await;
        assert!(second.is_ok());

        assert_eq!(backend.request_count(), 2);
        assert_eq!(backend.prompt_count(), 1);
    }

    #[test]
    fn test_secure_context_follows_origin() {
        assert!(ScriptedBackend::default().is_secure_context());
        assert!(ScriptedBackend::default()
            .with_origin("https://blow.example")
            .is_secure_context());
        assert!(ScriptedBackend::default()
            .with_origin("http://127.0.0.1:8080")
            .is_secure_context());
        assert!(!ScriptedBackend::default()
            .with_origin("http://192.168.1.4:3000")
            .is_secure_context());
    }

    #[tokio::test]
    async fn test_refusal_is_consumed_once() {
        let backend = ScriptedBackend::default();
        backend.refuse_next(PlatformRefusal::NotReadable);

        let refused = backend.request_input(CaptureConstraints::default()).await;
        assert!(matches!(refused, Err(PlatformRefusal::NotReadable)));
        let granted = backend.request_input(CaptureConstraints::default()).await;
        assert!(granted.is_ok());
    }
}
