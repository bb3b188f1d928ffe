//! GStreamer capture pipeline delivering frames to the processing stage
//!
//! `v4l2src ! [decoder] ! videoconvert ! [videoscale] ! caps ! appsink`, with
//! an optional `tee` branch into a preview window. Every appsink sample is
//! handed to [`FrameStage::on_frame`] on the streaming thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, instrument, warn};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::pipeline::{FlowStatus, FrameStage};
use crate::CaptureConfig;

/// GStreamer-based capture feeding a [`FrameStage`]
pub struct GstCapture {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    sequence: Arc<AtomicU64>,
}

impl GstCapture {
    /// Create the capture pipeline for `config`
    #[instrument(skip(config), fields(device = %config.device))]
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        gst::init().map_err(|e| eyre!("Failed to initialize GStreamer: {}", e))?;

        info!("Initializing GStreamer capture pipeline");

        let jpeg_decoder = Self::detect_jpeg_decoder();
        let video_sink = config.display.then(Self::detect_video_sink);
        let pipeline_str = build_pipeline_string(config, jpeg_decoder, video_sink)?;
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| eyre!("Failed to create pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| eyre!("Failed to find appsink element"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| eyre!("Failed to cast to AppSink"))?;

        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 2u32);
        appsink.set_property("drop", true); // Drop old buffers if decoding can't keep up
        appsink.set_property("sync", false);

        Ok(Self {
            pipeline,
            appsink,
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Route every appsink sample into `stage`.
    ///
    /// The callback always reports success to GStreamer; frames that
    /// cannot be extracted reach the stage as unavailable.
    pub fn attach(&self, stage: Arc<FrameStage>) {
        let sequence = Arc::clone(&self.sequence);

        self.appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let seq = sequence.fetch_add(1, Ordering::Relaxed) + 1;
                    let frame = appsink
                        .pull_sample()
                        .map_err(|_| eyre!("Failed to pull sample from pipeline"))
                        .and_then(|sample| frame_from_sample(&sample, seq));

                    let frame = match frame {
                        Ok(frame) => Some(frame),
                        Err(e) => {
                            warn!(sequence = seq, error = %e, "Frame unavailable");
                            None
                        }
                    };

                    match stage.on_frame(frame) {
                        FlowStatus::Continue => Ok(gst::FlowSuccess::Ok),
                    }
                })
                .build(),
        );
    }

    /// Detect best available JPEG decoder (hardware > software)
    fn detect_jpeg_decoder() -> &'static str {
        let decoders = [
            "nvjpegdec",    // NVIDIA hardware decoder
            "vaapijpegdec", // Intel/AMD VAAPI hardware decoder
            "v4l2jpegdec",  // V4L2 hardware decoder
            "jpegdec",      // Software decoder (fallback)
        ];

        for decoder in &decoders {
            if let Some(factory) = gst::ElementFactory::find(decoder) {
                debug!(
                    "Found decoder: {} - {}",
                    decoder,
                    factory.metadata("long-name").unwrap_or("")
                );
                return decoder;
            }
        }

        warn!("No hardware JPEG decoder found, using software decoder");
        "jpegdec"
    }

    /// Detect best available video sink for the preview branch
    fn detect_video_sink() -> &'static str {
        let sinks = [
            "glimagesink",   // OpenGL (hardware accelerated)
            "waylandsink",   // Wayland native (if available)
            "xvimagesink",   // X11 with XVideo extension
            "ximagesink",    // X11 basic
            "autovideosink", // Auto-detect
        ];

        for sink in &sinks {
            if gst::ElementFactory::find(sink).is_some() {
                info!("Using video sink: {}", sink);
                return sink;
            }
        }

        warn!("Using auto video sink");
        "autovideosink"
    }

    /// Start the capture pipeline
    pub fn start_stream(&mut self) -> Result<()> {
        info!("Starting GStreamer pipeline");

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| eyre!("Failed to start pipeline: {:?}", e))?;

        let (state_change, _, _) = self.pipeline.state(Some(gst::ClockTime::from_seconds(5)));

        match state_change {
            Ok(gst::StateChangeSuccess::Success) => {
                info!("Pipeline started successfully");
                Ok(())
            }
            Ok(gst::StateChangeSuccess::Async) | Ok(gst::StateChangeSuccess::NoPreroll) => {
                info!("Pipeline starting asynchronously");
                Ok(())
            }
            Err(_) => Err(eyre!("Failed to start pipeline")),
        }
    }

    /// Stop the capture pipeline
    pub fn stop_stream(&mut self) -> Result<()> {
        info!("Stopping GStreamer pipeline");

        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| eyre!("Failed to stop pipeline: {:?}", e))?;

        Ok(())
    }

    /// Pipeline bus, for [`watch_bus`]
    pub fn bus(&self) -> Result<gst::Bus> {
        self.pipeline
            .bus()
            .ok_or_else(|| eyre!("Pipeline has no bus"))
    }

    /// Number of samples delivered so far
    pub fn samples_delivered(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        let _ = self.stop_stream();
    }
}

/// Block until end of stream or a pipeline error
pub fn watch_bus(bus: gst::Bus) -> Result<()> {
    for msg in bus.iter_timed(gst::ClockTime::NONE) {
        use gst::MessageView;

        match msg.view() {
            MessageView::Eos(..) => {
                info!("End of stream");
                break;
            }
            MessageView::Error(err) => {
                return Err(eyre!(
                    "Error from {:?}: {} ({:?})",
                    err.src().map(|s| s.path_string()),
                    err.error(),
                    err.debug()
                ));
            }
            MessageView::Warning(warning) => {
                warn!(
                    "Warning from {:?}: {} ({:?})",
                    warning.src().map(|s| s.path_string()),
                    warning.error(),
                    warning.debug()
                );
            }
            _ => {}
        }
    }

    Ok(())
}

/// Wake a thread blocked in [`watch_bus`] so it returns
pub fn interrupt_bus(bus: &gst::Bus) -> Result<()> {
    bus.post(gst::message::Eos::new())
        .map_err(|e| eyre!("Failed to post EOS on bus: {}", e))
}

/// Build the pipeline description for `config`.
///
/// `video_sink` adds a preview branch when set.
pub fn build_pipeline_string(
    config: &CaptureConfig,
    jpeg_decoder: &str,
    video_sink: Option<&str>,
) -> Result<String> {
    let output = match config.output_format {
        PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Gray8 => config
            .output_format
            .caps_name()
            .ok_or_else(|| eyre!("Unsupported output format: {:?}", config.output_format))?,
        other => return Err(eyre!("Unsupported output format: {:?}", other)),
    };

    let source = match config.format {
        PixelFormat::Mjpeg => format!(
            "v4l2src device={} name=source ! \
             image/jpeg,framerate={}/1 ! \
             queue max-size-buffers=2 leaky=downstream ! \
             {} ! ",
            config.device, config.fps, jpeg_decoder
        ),
        format => {
            let caps = format
                .caps_name()
                .ok_or_else(|| eyre!("Unsupported pixel format: {:?}", format))?;
            format!(
                "v4l2src device={} name=source ! \
                 video/x-raw,format={},framerate={}/1 ! \
                 queue max-size-buffers=2 leaky=downstream ! ",
                config.device, caps, config.fps
            )
        }
    };

    let preview = match video_sink {
        Some(sink) => format!(
            "tee name=t \
             t. ! queue max-size-buffers=2 leaky=downstream ! videoconvert ! {} sync=false \
             t. ! queue max-size-buffers=2 leaky=downstream ! videoconvert ! ",
            sink
        ),
        None => String::new(),
    };

    // Capability filter forcing the processing resolution
    let output_caps = if config.capsfilter {
        format!(
            "videoscale ! video/x-raw,format={},width={},height={}",
            output, config.width, config.height
        )
    } else {
        format!("video/x-raw,format={}", output)
    };

    Ok(format!(
        "{}videoconvert ! {}{} ! appsink name=appsink",
        source, preview, output_caps
    ))
}

/// Copy an appsink sample into an owned frame, keeping the row stride
fn frame_from_sample(sample: &gst::Sample, sequence: u64) -> Result<Frame> {
    let timestamp = Instant::now();

    let buffer = sample
        .buffer()
        .ok_or_else(|| eyre!("Sample contains no buffer"))?;

    let caps = sample.caps().ok_or_else(|| eyre!("Sample has no caps"))?;
    let video_info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|_| eyre!("Failed to parse video info from caps"))?;

    let format = match video_info.format() {
        gst_video::VideoFormat::Rgb => PixelFormat::Rgb24,
        gst_video::VideoFormat::Bgr => PixelFormat::Bgr24,
        gst_video::VideoFormat::Gray8 => PixelFormat::Gray8,
        other => return Err(eyre!("Unexpected sample format: {:?}", other)),
    };

    let map = buffer
        .map_readable()
        .map_err(|_| eyre!("Failed to map buffer"))?;

    // The upstream buffer stays read-only; the stage works on its own copy
    let data = Bytes::copy_from_slice(map.as_slice());

    Ok(Frame {
        data,
        meta: Arc::new(FrameMetadata {
            sequence,
            width: video_info.width(),
            height: video_info.height(),
            stride: video_info.stride()[0] as u32,
            format,
        }),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CaptureConfig {
        CaptureConfig {
            device: "/dev/video2".into(),
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn test_mjpeg_pipeline_without_capsfilter() {
        let pipeline = build_pipeline_string(&config(), "jpegdec", None).unwrap();
        assert!(pipeline.starts_with("v4l2src device=/dev/video2 name=source ! image/jpeg"));
        assert!(pipeline.contains("jpegdec ! videoconvert"));
        assert!(pipeline.ends_with("video/x-raw,format=RGB ! appsink name=appsink"));
        assert!(!pipeline.contains("videoscale"));
        assert!(!pipeline.contains("tee"));
    }

    #[test]
    fn test_capsfilter_forces_resolution() {
        let config = CaptureConfig {
            capsfilter: true,
            width: 640,
            height: 640,
            output_format: PixelFormat::Bgr24,
            ..config()
        };
        let pipeline = build_pipeline_string(&config, "jpegdec", None).unwrap();
        assert!(pipeline.contains("videoscale ! video/x-raw,format=BGR,width=640,height=640 ! appsink"));
    }

    #[test]
    fn test_preview_branch() {
        let config = CaptureConfig {
            format: PixelFormat::Yuyv4,
            ..config()
        };
        let pipeline = build_pipeline_string(&config, "jpegdec", Some("xvimagesink")).unwrap();
        assert!(pipeline.contains("video/x-raw,format=YUY2"));
        assert!(!pipeline.contains("jpegdec"));
        assert!(pipeline.contains("tee name=t"));
        assert!(pipeline.contains("xvimagesink sync=false"));
        assert!(pipeline.ends_with("appsink name=appsink"));
    }

    #[test]
    fn test_compressed_output_is_rejected() {
        let config = CaptureConfig {
            output_format: PixelFormat::Mjpeg,
            ..config()
        };
        assert!(build_pipeline_string(&config, "jpegdec", None).is_err());
    }
}
