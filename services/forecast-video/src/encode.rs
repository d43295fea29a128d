//! Video encoding via ffmpeg.
//!
//! One invocation per codec over the run's numbered frame sequence. A codec
//! failure is the caller's to absorb: encoding one variant never aborts the
//! others.

use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use tokio::process::Command;

/// The fixed set of output codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    H265,
    Vp9,
}

impl Codec {
    pub const ALL: [Codec; 3] = [Codec::H264, Codec::H265, Codec::Vp9];

    /// Short name used in filenames and record fields.
    pub fn key(&self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::H265 => "h265",
            Codec::Vp9 => "vp9",
        }
    }

    fn encoder(&self) -> &'static str {
        match self {
            Codec::H264 => "libx264",
            Codec::H265 => "libx265",
            Codec::Vp9 => "libvpx-vp9",
        }
    }

    /// Constant rate factor; scales differ per encoder, lower is higher
    /// quality.
    fn crf(&self) -> u32 {
        match self {
            Codec::H264 => 26,
            Codec::H265 => 31,
            Codec::Vp9 => 34,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Codec::H264 | Codec::H265 => "mp4",
            Codec::Vp9 => "webm",
        }
    }
}

/// One encode over a frame directory.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    /// Directory holding the `final%04d.png` sequence
    pub frames_dir: std::path::PathBuf,
    pub output: std::path::PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Build the full ffmpeg argument list for one codec.
pub fn ffmpeg_args(job: &EncodeJob, codec: Codec) -> Vec<String> {
    let mut args = vec![
        "-r".to_string(),
        job.frame_rate.to_string(),
        "-f".to_string(),
        "image2".to_string(),
        "-s".to_string(),
        format!("{}x{}", job.width, job.height),
        "-i".to_string(),
        job.frames_dir.join("final%04d.png").display().to_string(),
        "-vcodec".to_string(),
        codec.encoder().to_string(),
        "-crf".to_string(),
        codec.crf().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-y".to_string(),
    ];

    if codec.extension() == "mp4" {
        args.push("-movflags".to_string());
        args.push("faststart".to_string());
    }
    if codec == Codec::H265 {
        // Quicktime playback
        args.push("-tag:v".to_string());
        args.push("hvc1".to_string());
    }

    args.push(job.output.display().to_string());
    args
}

/// Run one encode to completion.
pub async fn encode(job: &EncodeJob, codec: Codec) -> Result<()> {
    let args = ffmpeg_args(job, codec);

    let output = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .await
        .context("failed to spawn ffmpeg (is it installed and on PATH?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }

    Ok(())
}

/// Output filename for one encoded artifact.
pub fn video_filename(model_run_path_safe: &str, codec: Codec) -> String {
    format!("{}_{}.{}", model_run_path_safe, codec.key(), codec.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job() -> EncodeJob {
        EncodeJob {
            frames_dir: PathBuf::from("/work/near-surface-smoke/run/utah"),
            output: PathBuf::from("/work/out.mp4"),
            width: 1280,
            height: 1280,
            frame_rate: 4,
        }
    }

    fn arg_after(args: &[String], flag: &str) -> String {
        let at = args.iter().position(|a| a == flag).unwrap();
        args[at + 1].clone()
    }

    #[test]
    fn test_h264_args() {
        let args = ffmpeg_args(&job(), Codec::H264);

        assert_eq!(arg_after(&args, "-r"), "4");
        assert_eq!(arg_after(&args, "-s"), "1280x1280");
        assert_eq!(
            arg_after(&args, "-i"),
            "/work/near-surface-smoke/run/utah/final%04d.png"
        );
        assert_eq!(arg_after(&args, "-vcodec"), "libx264");
        assert_eq!(arg_after(&args, "-crf"), "26");
        assert_eq!(arg_after(&args, "-pix_fmt"), "yuv420p");
        assert_eq!(arg_after(&args, "-movflags"), "faststart");
        assert!(!args.contains(&"-tag:v".to_string()));
        assert_eq!(args.last().unwrap(), "/work/out.mp4");
    }

    #[test]
    fn test_h265_args_tag_quicktime() {
        let args = ffmpeg_args(&job(), Codec::H265);

        assert_eq!(arg_after(&args, "-vcodec"), "libx265");
        assert_eq!(arg_after(&args, "-crf"), "31");
        assert_eq!(arg_after(&args, "-tag:v"), "hvc1");
    }

    #[test]
    fn test_vp9_args_no_mp4_flags() {
        let args = ffmpeg_args(&job(), Codec::Vp9);

        assert_eq!(arg_after(&args, "-vcodec"), "libvpx-vp9");
        assert_eq!(arg_after(&args, "-crf"), "34");
        assert!(!args.contains(&"-movflags".to_string()));
        assert!(!args.contains(&"-tag:v".to_string()));
    }

    #[test]
    fn test_video_filename() {
        assert_eq!(
            video_filename("2021-08-10T05_00_00Z", Codec::H264),
            "2021-08-10T05_00_00Z_h264.mp4"
        );
        assert_eq!(
            video_filename("2021-08-10T05_00_00Z", Codec::Vp9),
            "2021-08-10T05_00_00Z_vp9.webm"
        );
    }
}
