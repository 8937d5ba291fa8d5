/// Frame decoding for the visual branch
///
/// Frames are decoded one at a time and handed to a visitor, so the caller
/// decides how much of the stream is ever resident in memory. The sampler and
/// captioner run inside the visitor, which keeps decoding and inference on a
/// single thread.
///
/// Two sources are provided:
/// 1. [`FfmpegFrameSource`] decodes a container with ffmpeg-next
/// 2. [`GeneratedFrameSource`] produces frames from a closure (synthetic input)
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use video_digest_common::{sanitize_frame_rate, ProcessingError, Result, VideoJob};

/// A decoded frame in capture order
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Position in the decoded stream (0-indexed)
    pub index: u64,
    /// `index / frame_rate`
    pub time_seconds: f64,
    pub image: RgbImage,
}

/// Container facts needed to build a [`VideoJob`]
#[derive(Debug, Clone, PartialEq)]
pub struct VideoProbe {
    pub frame_rate: f64,
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

/// Sequential source of decoded frames
pub trait FrameSource {
    /// Frames per second used for timestamp math
    fn frame_rate(&self) -> f64;

    /// Decode every frame in order and hand each to `visit`.
    ///
    /// Returns the number of frames decoded. An error from `visit` stops
    /// decoding and is returned unchanged.
    fn for_each_frame(
        &mut self,
        visit: &mut dyn FnMut(DecodedFrame) -> Result<()>,
    ) -> Result<u64>;
}

/// Opens a [`FrameSource`] for a job
pub trait FrameOpener: Send + Sync {
    fn open(&self, job: &VideoJob) -> Result<Box<dyn FrameSource>>;
}

/// Initialize `FFmpeg` library once per process
pub fn init_ffmpeg() -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        ffmpeg::init()
            .map_err(|e| ProcessingError::FFmpegError(format!("Failed to initialize FFmpeg: {e}")))?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        Ok(())
    })
    .map(|_| ())
}

fn open_input(path: &Path) -> Result<ffmpeg::format::context::Input> {
    init_ffmpeg()?;
    ffmpeg::format::input(&path)
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to open input file: {e}")))
}

fn rational_to_f64(rate: ffmpeg::Rational) -> Option<f64> {
    if rate.denominator() == 0 || rate.numerator() <= 0 {
        return None;
    }
    Some(f64::from(rate.numerator()) / f64::from(rate.denominator()))
}

/// Read frame rate, duration, dimensions and audio presence from a container
///
/// # Errors
///
/// Returns an error if the file cannot be opened or has no video stream
pub fn probe_video(path: &Path) -> Result<VideoProbe> {
    let ictx = open_input(path)?;

    let has_audio = ictx.streams().best(ffmpeg::media::Type::Audio).is_some();
    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or(ProcessingError::NoVideoStream)?;

    let frame_rate = rational_to_f64(stream.avg_frame_rate())
        .or_else(|| rational_to_f64(stream.rate()))
        .unwrap_or(0.0);

    let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to create context: {e}")))?
        .decoder()
        .video()
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to create decoder: {e}")))?;

    let duration_seconds = if ictx.duration() > 0 {
        ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
    } else {
        0.0
    };

    Ok(VideoProbe {
        frame_rate: sanitize_frame_rate(frame_rate),
        duration_seconds,
        width: decoder.width(),
        height: decoder.height(),
        has_audio,
    })
}

/// Probe a file and build the job describing it
pub fn probe_job(path: impl Into<PathBuf>) -> Result<VideoJob> {
    let path = path.into();
    let probe = probe_video(&path)?;
    debug!(
        path = %path.display(),
        fps = probe.frame_rate,
        duration = probe.duration_seconds,
        width = probe.width,
        height = probe.height,
        has_audio = probe.has_audio,
        "Probed video"
    );
    Ok(VideoJob::new(path, probe.frame_rate, probe.duration_seconds).with_audio_hint(probe.has_audio))
}

/// Decodes a container's best video stream to RGB24
pub struct FfmpegFrameSource {
    path: PathBuf,
    frame_rate: f64,
}

impl FfmpegFrameSource {
    pub fn new(path: impl Into<PathBuf>, frame_rate: f64) -> Self {
        Self {
            path: path.into(),
            frame_rate: sanitize_frame_rate(frame_rate),
        }
    }
}

struct RgbConverter {
    scaler: ffmpeg::software::scaling::Context,
    converted: ffmpeg::util::frame::video::Video,
}

impl RgbConverter {
    fn convert(&mut self, frame: &ffmpeg::util::frame::video::Video) -> Result<RgbImage> {
        self.scaler
            .run(frame, &mut self.converted)
            .map_err(|e| ProcessingError::FFmpegError(format!("Failed to convert frame: {e}")))?;
        copy_rgb_frame(&self.converted)
    }
}

impl FrameSource for FfmpegFrameSource {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn for_each_frame(
        &mut self,
        visit: &mut dyn FnMut(DecodedFrame) -> Result<()>,
    ) -> Result<u64> {
        let mut ictx = open_input(&self.path)?;

        let video_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or(ProcessingError::NoVideoStream)?;
        let stream_index = video_stream.index();

        let mut decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
            .map_err(|e| ProcessingError::FFmpegError(format!("Failed to create context: {e}")))?
            .decoder()
            .video()
            .map_err(|e| ProcessingError::FFmpegError(format!("Failed to create decoder: {e}")))?;

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to create scaler: {e}")))?;

        let mut converter = RgbConverter {
            scaler,
            converted: ffmpeg::util::frame::video::Video::empty(),
        };
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        let mut index = 0u64;
        let frame_rate = self.frame_rate;

        let mut emit = |decoded: &ffmpeg::util::frame::video::Video,
                        index: &mut u64,
                        converter: &mut RgbConverter|
         -> Result<()> {
            let image = converter.convert(decoded)?;
            let frame = DecodedFrame {
                index: *index,
                time_seconds: *index as f64 / frame_rate,
                image,
            };
            *index += 1;
            visit(frame)
        };

        for (stream, packet) in ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }

            if let Err(e) = decoder.send_packet(&packet) {
                warn!(error = %e, "Skipping undecodable packet");
                continue;
            }
            while decoder.receive_frame(&mut decoded).is_ok() {
                emit(&decoded, &mut index, &mut converter)?;
            }
        }

        // Flush decoder
        decoder.send_eof().ok();
        while decoder.receive_frame(&mut decoded).is_ok() {
            emit(&decoded, &mut index, &mut converter)?;
        }

        debug!(path = %self.path.display(), frames = index, "Decoding finished");
        Ok(index)
    }
}

/// Copy an RGB24 frame (possibly padded rows) into a tightly packed image
fn copy_rgb_frame(frame: &ffmpeg::util::frame::video::Video) -> Result<RgbImage> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let plane_data = frame.data(0);
    let row_len = width * 3;

    let mut data = Vec::with_capacity(row_len * height);
    for y in 0..height {
        let row_start = y * stride;
        let row = plane_data
            .get(row_start..row_start + row_len)
            .ok_or_else(|| ProcessingError::CorruptedFile(format!("Truncated frame row {y}")))?;
        data.extend_from_slice(row);
    }

    RgbImage::from_raw(frame.width(), frame.height(), data)
        .ok_or_else(|| ProcessingError::ImageError("Frame buffer size mismatch".to_string()))
}

/// Opens [`FfmpegFrameSource`]s using the job's frame rate
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegFrameOpener;

impl FrameOpener for FfmpegFrameOpener {
    fn open(&self, job: &VideoJob) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegFrameSource::new(job.path.clone(), job.frame_rate)))
    }
}

/// Produces `frame_count` frames from a generator closure
pub struct GeneratedFrameSource<F>
where
    F: FnMut(u64) -> RgbImage,
{
    frame_rate: f64,
    frame_count: u64,
    generate: F,
}

impl<F> GeneratedFrameSource<F>
where
    F: FnMut(u64) -> RgbImage,
{
    pub fn new(frame_rate: f64, frame_count: u64, generate: F) -> Self {
        Self {
            frame_rate: sanitize_frame_rate(frame_rate),
            frame_count,
            generate,
        }
    }
}

impl<F> FrameSource for GeneratedFrameSource<F>
where
    F: FnMut(u64) -> RgbImage,
{
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn for_each_frame(
        &mut self,
        visit: &mut dyn FnMut(DecodedFrame) -> Result<()>,
    ) -> Result<u64> {
        for index in 0..self.frame_count {
            visit(DecodedFrame {
                index,
                time_seconds: index as f64 / self.frame_rate,
                image: (self.generate)(index),
            })?;
        }
        Ok(self.frame_count)
    }
}
