use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::constants::PIPE_CLOSE_GRACE;
use crate::error::SinkError;
use crate::frame::Frame;
use crate::sink::FrameSink;

/// What the piped process does with the frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FfmpegOutput {
    /// Live preview window through `ffplay`.
    Preview,
    /// Encode to a video file through `ffmpeg`.
    Record(String),
}

/// Pipes raw rgb24 frames to an ffplay/ffmpeg child process, for running the
/// display without the LCD attached.
pub struct FfmpegSink {
    output: FfmpegOutput,
    width: u32,
    height: u32,
    fps: u32,
    name: String,
    program: Option<PathBuf>,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FfmpegSink {
    pub fn new(output: FfmpegOutput, width: u32, height: u32, fps: u32) -> FfmpegSink {
        let name = match &output {
            FfmpegOutput::Preview => "ffplay".to_string(),
            FfmpegOutput::Record(path) => format!("ffmpeg {path}"),
        };
        FfmpegSink {
            output,
            width,
            height,
            fps,
            name,
            program: None,
            process: None,
            stdin: None,
        }
    }

    /// Run `program` instead of the `ffplay`/`ffmpeg` found on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    fn command(&self) -> Command {
        let size = format!("{}x{}", self.width, self.height);
        let fps = self.fps.to_string();
        match &self.output {
            FfmpegOutput::Preview => {
                let mut cmd = Command::new(self.program.clone().unwrap_or_else(|| "ffplay".into()));
                cmd.args(["-loglevel", "error"])
                    .args(["-f", "rawvideo"])
                    .args(["-pixel_format", "rgb24"])
                    .args(["-video_size", &size])
                    .args(["-framerate", &fps])
                    .args(["-window_title", "enviro-display"])
                    .args(["-i", "-"]);
                cmd
            }
            FfmpegOutput::Record(path) => {
                let mut cmd = Command::new(self.program.clone().unwrap_or_else(|| "ffmpeg".into()));
                cmd.args(["-loglevel", "error"])
                    .arg("-y")
                    .args(["-f", "rawvideo"])
                    .args(["-pixel_format", "rgb24"])
                    .args(["-video_size", &size])
                    .args(["-framerate", &fps])
                    .args(["-i", "-"])
                    .args(["-c:v", "libx264"])
                    .args(["-pix_fmt", "yuv420p"])
                    .arg(path);
                cmd
            }
        }
    }

    fn spawn(&mut self) -> Result<(), SinkError> {
        self.close();
        let mut process = self.command().stdin(Stdio::piped()).stdout(Stdio::null()).spawn()?;
        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| SinkError::Unavailable(format!("{} has no stdin", self.name)))?;
        debug!(sink = %self.name, pid = process.id(), "started frame pipe");
        self.process = Some(process);
        self.stdin = Some(stdin);
        Ok(())
    }

    /// Stop the child. A recording gets [`PIPE_CLOSE_GRACE`] to flush after
    /// stdin closes; a preview window would stay open, so it is killed.
    fn close(&mut self) {
        self.stdin = None;
        let Some(mut process) = self.process.take() else {
            return;
        };
        let grace = match self.output {
            FfmpegOutput::Preview => Duration::ZERO,
            FfmpegOutput::Record(_) => PIPE_CLOSE_GRACE,
        };
        let deadline = Instant::now() + grace;
        loop {
            match process.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                Ok(None) => break,
                Err(e) => {
                    warn!(sink = %self.name, error = %e, "failed to poll frame pipe");
                    break;
                }
            }
        }
        if let Err(e) = process.kill() {
            warn!(sink = %self.name, error = %e, "failed to kill frame pipe");
        }
        if let Err(e) = process.wait() {
            warn!(sink = %self.name, error = %e, "failed to reap frame pipe");
        }
        debug!(sink = %self.name, "frame pipe stopped");
    }
}

impl FrameSink for FfmpegSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&mut self) -> Result<(), SinkError> {
        if let Some(process) = self.process.as_mut() {
            if process.try_wait()?.is_none() {
                return Ok(());
            }
        }
        self.spawn()
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(SinkError::SizeMismatch {
                got_w: frame.width(),
                got_h: frame.height(),
                want_w: self.width,
                want_h: self.height,
            });
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SinkError::Unavailable(format!("{} is not running", self.name)))?;
        let bytes = frame.to_rgb24();
        let row = (self.width * 3) as usize;
        for line in bytes.chunks(row) {
            stdin.write_all(line)?;
        }
        stdin.flush()?;
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_command_line() {
        let sink = FfmpegSink::new(FfmpegOutput::Record("out.mp4".into()), 160, 80, 20);
        let cmd = sink.command();
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(cmd.get_program(), "ffmpeg");
        assert!(args.windows(2).any(|w| w == ["-video_size", "160x80"]));
        assert!(args.windows(2).any(|w| w == ["-pixel_format", "rgb24"]));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        assert_eq!(sink.name(), "ffmpeg out.mp4");
    }

    #[test]
    fn test_write_before_probe_is_unavailable() {
        let mut sink = FfmpegSink::new(FfmpegOutput::Preview, 160, 80, 20);
        let err = sink.write_frame(&Frame::new(160, 80)).unwrap_err();
        assert!(matches!(err, SinkError::Unavailable(_)));
    }
}
