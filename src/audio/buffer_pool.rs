// BufferPool - lock-free buffer pool with dual SPSC queues
//
// Moves captured sample blocks from the real-time input callback to the
// analysis side without allocating in the callback.
//
// Architecture:
// - DATA_QUEUE: capture callback pushes filled buffers, analysis drains them
// - POOL_QUEUE: analysis returns emptied buffers, capture callback recycles
//
// If the analysis side falls behind, the pool runs dry and the callback
// drops blocks instead of blocking; the analyser only needs the most recent
// window anyway.

use rtrb::{Consumer, Producer};

/// Configuration constants for buffer pool
pub const DEFAULT_BUFFER_COUNT: usize = 32;
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Audio buffer type - pre-allocated vector of mono f32 samples
pub type AudioBuffer = Vec<f32>;

/// Both queue ends before they are handed to their threads
pub struct BufferPoolChannels {
    pub data_producer: Producer<AudioBuffer>,
    pub data_consumer: Consumer<AudioBuffer>,
    pub pool_producer: Producer<AudioBuffer>,
    pub pool_consumer: Consumer<AudioBuffer>,
}

/// Queue ends owned by the capture callback
pub struct CaptureThreadChannels {
    /// Empty buffers to fill
    pub pool_consumer: Consumer<AudioBuffer>,
    /// Filled buffers for analysis
    pub data_producer: Producer<AudioBuffer>,
}

/// Queue ends owned by the analysis side
pub struct AnalysisChannels {
    /// Filled buffers from capture
    pub data_consumer: Consumer<AudioBuffer>,
    /// Emptied buffers back to capture
    pub pool_producer: Producer<AudioBuffer>,
}

impl BufferPoolChannels {
    /// Split into the capture and analysis halves
    pub fn split_for_threads(self) -> (CaptureThreadChannels, AnalysisChannels) {
        (
            CaptureThreadChannels {
                pool_consumer: self.pool_consumer,
                data_producer: self.data_producer,
            },
            AnalysisChannels {
                data_consumer: self.data_consumer,
                pool_producer: self.pool_producer,
            },
        )
    }
}

impl CaptureThreadChannels {
    /// Copy the first channel of an interleaved block into a pooled buffer
    ///
    /// Returns false when no empty buffer was available and the block was
    /// dropped. Never allocates once the buffer has grown to block size.
    pub fn publish_first_channel<T, F>(&mut self, data: &[T], channels: usize, convert: F) -> bool
    where
        T: Copy,
        F: Fn(T) -> f32,
    {
        let Ok(mut buffer) = self.pool_consumer.pop() else {
            return false;
        };
        buffer.clear();
        buffer.extend(data.chunks(channels.max(1)).map(|frame| convert(frame[0])));
        self.data_producer.push(buffer).is_ok()
    }
}

impl AnalysisChannels {
    /// Pass every filled buffer to `sink`, then recycle it
    ///
    /// Returns the number of samples drained.
    pub fn drain<F: FnMut(&[f32])>(&mut self, mut sink: F) -> usize {
        let mut drained = 0;
        while let Ok(buffer) = self.data_consumer.pop() {
            drained += buffer.len();
            sink(&buffer);
            if self.pool_producer.push(buffer).is_err() {
                tracing::warn!("[BufferPool] Pool queue full, dropping buffer");
            }
        }
        drained
    }
}

/// Lock-free buffer pool using dual SPSC ring buffers
pub struct BufferPool;

impl BufferPool {
    /// Pre-allocate `buffer_count` buffers of `buffer_size` samples
    ///
    /// Both dimensions are clamped to at least one.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(buffer_count: usize, buffer_size: usize) -> BufferPoolChannels {
        let buffer_count = buffer_count.max(1);
        let buffer_size = buffer_size.max(1);

        let (mut pool_producer, pool_consumer) = rtrb::RingBuffer::new(buffer_count);
        let (data_producer, data_consumer) = rtrb::RingBuffer::new(buffer_count);

        // The pool queue has exactly `buffer_count` slots, so every push fits
        for _ in 0..buffer_count {
            let _ = pool_producer.push(Vec::with_capacity(buffer_size));
        }

        BufferPoolChannels {
            data_producer,
            data_consumer,
            pool_producer,
            pool_consumer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_creation() {
        let mut channels = BufferPool::new(16, 2048);

        let mut available_buffers = 0;
        while let Ok(buffer) = channels.pool_consumer.pop() {
            assert!(buffer.capacity() >= 2048);
            available_buffers += 1;
        }
        assert_eq!(available_buffers, 16, "Expected 16 buffers in pool queue");
        assert!(
            channels.data_consumer.pop().is_err(),
            "Data queue should be empty initially"
        );
    }

    #[test]
    fn test_first_channel_is_extracted() {
        let (mut capture, mut analysis) = BufferPool::new(4, 8).split_for_threads();

        // Interleaved stereo: left = 1..4, right = -1
        let data = [1.0f32, -1.0, 2.0, -1.0, 3.0, -1.0, 4.0, -1.0];
        assert!(capture.publish_first_channel(&data, 2, |s| s));

        let mut seen = Vec::new();
        let drained = analysis.drain(|samples| seen.extend_from_slice(samples));
        assert_eq!(drained, 4);
        assert_eq!(seen, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_exhausted_pool_drops_blocks() {
        let (mut capture, mut analysis) = BufferPool::new(2, 4).split_for_threads();

        assert!(capture.publish_first_channel(&[0.1f32; 4], 1, |s| s));
        assert!(capture.publish_first_channel(&[0.2f32; 4], 1, |s| s));
        assert!(!capture.publish_first_channel(&[0.3f32; 4], 1, |s| s));

        // Draining recycles both buffers
        assert_eq!(analysis.drain(|_| {}), 8);
        assert!(capture.publish_first_channel(&[0.4f32; 4], 1, |s| s));
    }

    #[test]
    fn test_integer_samples_are_converted() {
        let (mut capture, mut analysis) = BufferPool::new(1, 4).split_for_threads();
        let data = [i16::MAX, 0, i16::MIN];
        assert!(capture.publish_first_channel(&data, 1, |s| s as f32 / 32768.0));

        let mut seen = Vec::new();
        analysis.drain(|samples| seen.extend_from_slice(samples));
        assert!((seen[0] - 1.0).abs() < 1e-3);
        assert_eq!(seen[1], 0.0);
        assert_eq!(seen[2], -1.0);
    }

    #[test]
    fn test_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CaptureThreadChannels>();
        assert_send::<AnalysisChannels>();
    }

    #[test]
    fn test_zero_dimensions_are_clamped() {
        let mut channels = BufferPool::new(0, 0);
        assert!(channels.pool_consumer.pop().is_ok());
        assert!(channels.pool_consumer.pop().is_err());
    }
}
