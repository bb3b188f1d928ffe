//! Direct V4L2 capture with memory-mapped buffers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::decoder::decode_frame;
use crate::capture::frame::{Frame, PixelFormat};
use crate::CaptureConfig;

/// Pause after a failed dequeue before retrying
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// V4L2 capture producing decodable frames
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
    format: PixelFormat,
    width: u32,
    height: u32,
    /// Bytes per line reported by the driver
    stride: u32,
    sequence: u64,
}

pub fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
        PixelFormat::Gray8 => FourCC::new(b"GREY"),
    }
}

impl V4l2Capture {
    /// Open the device and negotiate the configured format
    pub fn new(config: CaptureConfig) -> Result<Self> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = fourcc(config.format);

        // The driver may adjust the request; trust what it reports back
        let actual = device.set_format(&fmt)?;
        if actual.fourcc != fmt.fourcc {
            return Err(eyre!(
                "Device refused {:?}, offered {}",
                config.format,
                actual.fourcc
            ));
        }
        info!(
            "Negotiated {}x{} {} ({} bytes per line)",
            actual.width, actual.height, actual.fourcc, actual.stride
        );

        Ok(Self {
            device: Box::new(device),
            stream: None,
            format: config.format,
            width: actual.width,
            height: actual.height,
            stride: actual.stride,
            config,
            sequence: 0,
        })
    }

    /// Start streaming with memory-mapped buffers
    pub fn start_stream(&mut self) -> Result<()> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)?;

        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    /// Dequeue one buffer and convert it into a frame
    #[instrument(skip(self))]
    pub fn capture_frame(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| eyre!("Stream not started"))?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());

        self.sequence += 1;
        decode_frame(
            &buf[..used],
            self.format,
            self.width,
            self.height,
            self.stride,
            self.sequence,
        )
    }

    /// Capture until `stop` is raised or the receiver goes away.
    ///
    /// Failed captures are forwarded as `None` so the stage can account
    /// for the missed cycle.
    pub fn stream_into(mut self, tx: flume::Sender<Option<Frame>>, stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::Relaxed) {
            let frame = match self.capture_frame() {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!("Capture error: {}", e);
                    std::thread::sleep(RETRY_DELAY);
                    None
                }
            };

            match tx.try_send(frame) {
                Ok(()) => {}
                Err(flume::TrySendError::Full(_)) => {
                    metrics::counter!("frames_dropped_total").increment(1);
                }
                Err(flume::TrySendError::Disconnected(_)) => break,
            }
        }

        info!(frames = self.sequence, "V4L2 capture stopped");
    }
}
