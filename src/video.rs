//! Video sources for the playback loop.
//!
//! A "video" is one of:
//! - a container file (mp4, mov, mkv, ...) decoded by an `ffmpeg` child
//!   process that writes raw RGB frames, already scaled to the panel
//! - an animated GIF, decoded one frame at a time
//! - a directory of sequentially numbered frame images
//!   (e.g. `clip/frame_0001.png`)
//!
//! All of them rewind to the first frame on request. Dropping a source
//! releases its file handles and stops its decoder process.

use crate::PanelConfig;
use crate::error::{JumbotronError, Result};
use crate::media::load_image;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, Frames, RgbImage};
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

/// Extensions handed to ffmpeg.
const CONTAINER_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "mkv", "webm", "avi", "mpg", "mpeg"];

/// Frame-by-frame decoder.
///
/// Not `Send`: a source is opened and consumed on the playback thread.
pub trait FrameSource {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<DynamicImage>>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<()>;
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Open `path` as a video. Container frames come out sized to `panel`.
pub fn open_source(path: &Path, panel: PanelConfig) -> Result<Box<dyn FrameSource>> {
    if path.is_dir() {
        return Ok(Box::new(FrameDirSource::open(path)?));
    }

    match extension_of(path).as_deref() {
        Some("gif") => Ok(Box::new(GifSource::open(path)?)),
        Some(ext) if CONTAINER_EXTENSIONS.contains(&ext) => {
            Ok(Box::new(FfmpegSource::open(path, panel)?))
        }
        _ => Err(JumbotronError::SourceUnreadable(format!(
            "{}: unsupported video format",
            path.display()
        ))),
    }
}

/// Whether `path` looks like something [`open_source`] accepts.
pub fn is_video_path(path: &Path) -> bool {
    path.is_dir()
        || extension_of(path)
            .is_some_and(|e| e == "gif" || CONTAINER_EXTENSIONS.contains(&e.as_str()))
}

// ── Container video (ffmpeg) ─────────────────────────────────────────

/// Spawn ffmpeg writing `width`x`height` rgb24 frames to its stdout.
fn start_ffmpeg(path: &Path, width: u32, height: u32) -> Result<(Child, ChildStdout)> {
    let mut process = Command::new("ffmpeg")
        .args(["-loglevel", "error", "-nostdin", "-i"])
        .arg(path)
        .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"])
        .arg(format!("{width}x{height}"))
        .arg("pipe:1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| JumbotronError::SourceUnreadable(format!("cannot run ffmpeg: {e}")))?;

    match process.stdout.take() {
        Some(stdout) => Ok((process, stdout)),
        None => {
            kill_ffmpeg(&mut process);
            Err(JumbotronError::SourceUnreadable("ffmpeg has no stdout".into()))
        }
    }
}

fn kill_ffmpeg(process: &mut Child) {
    // Already exited is fine.
    let _ = process.kill();
    if let Err(e) = process.wait() {
        tracing::warn!("Cannot reap ffmpeg ({}): {}", process.id(), e);
    }
}

pub struct FfmpegSource {
    path: PathBuf,
    width: u32,
    height: u32,
    process: Child,
    stdout: ChildStdout,
    // First frame, read while opening
    pending: Option<RgbImage>,
}

impl FfmpegSource {
    /// Start decoding and wait for the first frame, so a file ffmpeg cannot
    /// read fails here rather than on the playback thread's first tick.
    pub fn open(path: &Path, panel: PanelConfig) -> Result<Self> {
        let (process, stdout) = start_ffmpeg(path, panel.cols, panel.rows)?;
        let mut source = Self {
            path: path.to_path_buf(),
            width: panel.cols,
            height: panel.rows,
            process,
            stdout,
            pending: None,
        };
        let first = source.read_frame()?.ok_or_else(|| {
            JumbotronError::SourceUnreadable(format!(
                "{}: ffmpeg decoded no video frames",
                path.display()
            ))
        })?;
        source.pending = Some(first);
        tracing::debug!("ffmpeg decoding {} ({})", path.display(), source.process.id());
        Ok(source)
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut buffer = vec![0u8; self.width as usize * self.height as usize * 3];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => Ok(RgbImage::from_raw(self.width, self.height, buffer)),
            // ffmpeg closed its end: end of stream, or it gave up on the file
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(JumbotronError::SourceUnreadable(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        if let Some(first) = self.pending.take() {
            return Ok(Some(DynamicImage::ImageRgb8(first)));
        }
        Ok(self.read_frame()?.map(DynamicImage::ImageRgb8))
    }

    fn rewind(&mut self) -> Result<()> {
        kill_ffmpeg(&mut self.process);
        let (process, stdout) = start_ffmpeg(&self.path, self.width, self.height)?;
        self.process = process;
        self.stdout = stdout;
        self.pending = None;
        Ok(())
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        kill_ffmpeg(&mut self.process);
    }
}

// ── Animated GIF ─────────────────────────────────────────────────────

pub struct GifSource {
    path: PathBuf,
    frames: Frames<'static>,
}

impl GifSource {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            frames: open_gif_frames(path)?,
        })
    }
}

fn open_gif_frames(path: &Path) -> Result<Frames<'static>> {
    let unreadable =
        |e: String| JumbotronError::SourceUnreadable(format!("{}: {}", path.display(), e));
    let file = File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| unreadable(e.to_string()))?;
    Ok(decoder.into_frames())
}

impl FrameSource for GifSource {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        match self.frames.next() {
            Some(Ok(frame)) => Ok(Some(DynamicImage::ImageRgba8(frame.into_buffer()))),
            Some(Err(e)) => Err(JumbotronError::SourceUnreadable(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
            None => Ok(None),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        // The decoder only moves forward; reopening is the seek.
        self.frames = open_gif_frames(&self.path)?;
        Ok(())
    }
}

// ── Directory of frames ──────────────────────────────────────────────

/// Discover and sort all frame image files in a directory.
pub fn load_frame_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = fs::read_dir(dir)
        .map_err(|e| JumbotronError::SourceUnreadable(format!("{}: {}", dir.display(), e)))?;

    let mut paths: Vec<PathBuf> = read_dir
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "png" | "jpg" | "jpeg"))
        })
        .collect();

    paths.sort();

    if paths.is_empty() {
        return Err(JumbotronError::SourceUnreadable(format!(
            "no frame images in {}",
            dir.display()
        )));
    }

    Ok(paths)
}

pub struct FrameDirSource {
    paths: Vec<PathBuf>,
    next: usize,
}

impl FrameDirSource {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            paths: load_frame_paths(dir)?,
            next: 0,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for FrameDirSource {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        load_image(path).map(Some)
    }

    fn rewind(&mut self) -> Result<()> {
        self.next = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::GenericImageView;
    use image::{Delay, Frame, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, shade: u8) {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([shade, 0, 0]));
        img.save(dir.join(name)).unwrap();
    }

    fn write_gif(path: &Path, shades: &[u8]) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        for shade in shades {
            let buf = RgbaImage::from_pixel(2, 2, Rgba([*shade, 0, 0, 255]));
            encoder
                .encode_frame(Frame::from_parts(buf, 0, 0, Delay::from_numer_denom_ms(100, 1)))
                .unwrap();
        }
    }

    fn red_of(img: &DynamicImage) -> u8 {
        img.to_rgb8().get_pixel(0, 0)[0]
    }

    #[test]
    fn frame_dir_plays_in_name_order_and_rewinds() {
        let tmp = TempDir::new().unwrap();
        write_png(tmp.path(), "frame_0002.png", 20);
        write_png(tmp.path(), "frame_0001.png", 10);
        std::fs::write(tmp.path().join("notes.txt"), b"skip me").unwrap();

        let mut src = FrameDirSource::open(tmp.path()).unwrap();
        assert_eq!(src.frame_count(), 2);
        assert_eq!(red_of(&src.next_frame().unwrap().unwrap()), 10);
        assert_eq!(red_of(&src.next_frame().unwrap().unwrap()), 20);
        assert!(src.next_frame().unwrap().is_none());

        src.rewind().unwrap();
        assert_eq!(red_of(&src.next_frame().unwrap().unwrap()), 10);
    }

    #[test]
    fn empty_frame_dir_is_unreadable() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            FrameDirSource::open(tmp.path()),
            Err(JumbotronError::SourceUnreadable(_))
        ));
    }

    #[test]
    fn gif_decodes_every_frame_then_rewinds() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("clip.gif");
        write_gif(&path, &[255, 0]);

        let mut src = open_source(&path, PanelConfig::new(2, 2)).unwrap();
        assert_eq!(red_of(&src.next_frame().unwrap().unwrap()), 255);
        assert_eq!(red_of(&src.next_frame().unwrap().unwrap()), 0);
        assert!(src.next_frame().unwrap().is_none());

        src.rewind().unwrap();
        assert_eq!(red_of(&src.next_frame().unwrap().unwrap()), 255);
    }

    #[test]
    fn corrupt_gif_is_unreadable() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.gif");
        std::fs::write(&path, b"GIF89a but not really").unwrap();
        assert!(matches!(open_source(&path, PanelConfig::new(2, 2)), Err(JumbotronError::SourceUnreadable(_))));
    }

    #[test]
    fn other_extensions_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, b"").unwrap();
        assert!(!is_video_path(&path));
        assert!(matches!(
            open_source(&path, PanelConfig::new(2, 2)),
            Err(JumbotronError::SourceUnreadable(_))
        ));
    }

    #[test]
    fn containers_count_as_video() {
        for name in ["clip.mp4", "CLIP.MOV", "clip.webm", "clip.gif"] {
            assert!(is_video_path(Path::new(name)), "{name}");
        }
    }

    fn ffmpeg_available() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    /// Half a second of solid red at 10 fps, 16x8.
    fn write_red_clip(path: &Path) {
        let status = Command::new("ffmpeg")
            .args(["-loglevel", "error", "-nostdin", "-y", "-f", "lavfi"])
            .args(["-i", "color=c=red:s=16x8:d=0.5", "-r", "10", "-c:v", "mpeg4"])
            .arg(path)
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[test]
    fn container_decodes_at_panel_size_and_rewinds() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not installed; skipping");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("clip.mp4");
        write_red_clip(&path);

        let mut src = open_source(&path, PanelConfig::new(2, 3)).unwrap();
        let first = src.next_frame().unwrap().unwrap();
        assert_eq!(first.dimensions(), (3, 2));
        let [r, g, b] = first.to_rgb8().get_pixel(1, 1).0;
        assert!(r > 200 && g < 60 && b < 60, "not red: {r},{g},{b}");

        let mut frames = 1;
        while src.next_frame().unwrap().is_some() {
            frames += 1;
        }
        assert!(frames >= 3, "only {frames} frames");

        src.rewind().unwrap();
        assert_eq!(src.next_frame().unwrap().unwrap().dimensions(), (3, 2));
    }

    #[test]
    fn corrupt_container_is_unreadable() {
        // Holds with or without ffmpeg installed.
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.mp4");
        std::fs::write(&path, b"not a movie").unwrap();
        assert!(matches!(
            open_source(&path, PanelConfig::new(2, 2)),
            Err(JumbotronError::SourceUnreadable(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dropping_the_source_stops_ffmpeg() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not installed; skipping");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("clip.mp4");
        write_red_clip(&path);

        let mut src = FfmpegSource::open(&path, PanelConfig::new(2, 2)).unwrap();
        let first_pid = src.process.id();
        src.rewind().unwrap();
        let second_pid = src.process.id();
        assert!(!Path::new(&format!("/proc/{first_pid}")).exists());

        drop(src);
        assert!(!Path::new(&format!("/proc/{second_pid}")).exists());
    }
}
