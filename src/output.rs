//! Output destinations.
//!
//! The output path decides what a conversion produces: an existing directory
//! receives a numbered JPEG sequence, a `.mp4` or `.avi` path receives a
//! video. Anything else is rejected. [`OutputTarget::from_path`] makes that
//! decision up front so bad paths are rejected before anything is created.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};

use crate::encode::VideoCodec;
use crate::error::BagFramesError;

/// Extension a capture file must carry.
pub const CAPTURE_EXTENSION: &str = "bag";

/// Width of the zero-padded frame number in image file names.
pub const FRAME_NAME_DIGITS: usize = 10;

/// Check that `path` names a capture file.
///
/// Only the extension is checked; the file is not opened.
///
/// # Errors
///
/// Returns [`BagFramesError::InvalidInputExtension`] unless the extension is
/// exactly `bag`.
pub fn validate_input_path<P: AsRef<Path>>(path: P) -> Result<(), BagFramesError> {
    let path = path.as_ref();
    if path.extension() == Some(OsStr::new(CAPTURE_EXTENSION)) {
        Ok(())
    } else {
        Err(BagFramesError::InvalidInputExtension {
            path: path.to_path_buf(),
        })
    }
}

/// Where converted frames go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// A directory of numbered JPEG files.
    Images {
        /// Directory the images are written to.
        dir: PathBuf,
    },
    /// A single video file.
    Video {
        /// Video file path.
        path: PathBuf,
        /// Codec chosen from the extension.
        codec: VideoCodec,
    },
}

impl OutputTarget {
    /// Classify an output path.
    ///
    /// # Errors
    ///
    /// Returns [`BagFramesError::UnsupportedOutput`] if the path is not an
    /// existing directory and its extension is neither `mp4` nor `avi`. A
    /// missing directory is not created here; `frames` and `frames/` are
    /// rejected unless they already exist.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, BagFramesError> {
        let path = path.as_ref();
        if path.is_dir() {
            return Ok(OutputTarget::Images {
                dir: path.to_path_buf(),
            });
        }

        match path
            .extension()
            .and_then(OsStr::to_str)
            .and_then(VideoCodec::for_extension)
        {
            Some(codec) => Ok(OutputTarget::Video {
                path: path.to_path_buf(),
                codec,
            }),
            None => Err(BagFramesError::UnsupportedOutput {
                path: path.to_path_buf(),
            }),
        }
    }

    /// The directory or file this target writes to.
    pub fn path(&self) -> &Path {
        match self {
            OutputTarget::Images { dir } => dir,
            OutputTarget::Video { path, .. } => path,
        }
    }

    /// Returns `true` for video output.
    pub fn is_video(&self) -> bool {
        matches!(self, OutputTarget::Video { .. })
    }

    /// Create the directory the output lands in.
    pub(crate) fn prepare(&self) -> Result<(), BagFramesError> {
        let dir = match self {
            OutputTarget::Images { dir } => Some(dir.as_path()),
            OutputTarget::Video { path, .. } => path.parent(),
        };
        if let Some(dir) = dir.filter(|dir| !dir.as_os_str().is_empty()) {
            if !dir.exists() {
                log::debug!("Creating output directory {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

/// File name of the `index`-th image of a sequence, e.g. `0000000001.jpg`.
pub fn frame_file_name(index: u64) -> String {
    format!("{index:0width$}.jpg", width = FRAME_NAME_DIGITS)
}

/// Reduce an image to a pixel layout the JPEG encoder accepts.
///
/// 16-bit luma is scaled down to 8 bits; alpha is dropped.
pub(crate) fn to_jpeg_compatible(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image,
        DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => {
            DynamicImage::ImageLuma8(image.to_luma8())
        }
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Writes frames as `0000000001.jpg`, `0000000002.jpg`, ... into a directory.
#[derive(Debug)]
pub struct ImageSequenceWriter {
    dir: PathBuf,
    frames_written: u64,
}

impl ImageSequenceWriter {
    /// Create the directory (if needed) and start numbering at 1.
    ///
    /// # Errors
    ///
    /// Returns [`BagFramesError::IoError`] if the directory cannot be created.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, BagFramesError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            frames_written: 0,
        })
    }

    /// Directory being written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of images written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Write the next image and return its path.
    ///
    /// # Errors
    ///
    /// Returns [`BagFramesError::ImageError`] if encoding or writing fails.
    pub fn write(&mut self, image: DynamicImage) -> Result<PathBuf, BagFramesError> {
        let path = self.dir.join(frame_file_name(self.frames_written + 1));
        to_jpeg_compatible(image).save_with_format(&path, ImageFormat::Jpeg)?;
        self.frames_written += 1;
        log::trace!("Wrote {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Luma, RgbaImage};

    use super::*;

    #[test]
    fn input_must_be_a_bag() {
        assert!(validate_input_path("capture.bag").is_ok());
        assert!(validate_input_path("dir/capture.bag").is_ok());
        assert!(matches!(
            validate_input_path("capture.mp4"),
            Err(BagFramesError::InvalidInputExtension { .. })
        ));
        assert!(validate_input_path("capture").is_err());
        assert!(validate_input_path("capture.BAG").is_err());
    }

    #[test]
    fn output_classification() {
        assert_eq!(
            OutputTarget::from_path("out/video.mp4").unwrap(),
            OutputTarget::Video {
                path: PathBuf::from("out/video.mp4"),
                codec: VideoCodec::Mpeg4,
            }
        );
        assert_eq!(
            OutputTarget::from_path("video.avi").unwrap(),
            OutputTarget::Video {
                path: PathBuf::from("video.avi"),
                codec: VideoCodec::Mjpeg,
            }
        );
        assert!(matches!(
            OutputTarget::from_path("video.mkv"),
            Err(BagFramesError::UnsupportedOutput { .. })
        ));
    }

    #[test]
    fn missing_directory_without_extension_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("frames");

        let error = OutputTarget::from_path(&dir).unwrap_err();
        assert!(matches!(error, BagFramesError::UnsupportedOutput { ref path } if *path == dir));
        assert!(!dir.exists());
    }

    #[test]
    fn existing_directory_is_image_output() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(
            OutputTarget::from_path(root.path()).unwrap(),
            OutputTarget::Images {
                dir: root.path().to_path_buf(),
            }
        );
    }

    #[test]
    fn existing_directory_with_dot_is_image_output() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("frames.v1");
        fs::create_dir(&dir).unwrap();
        assert!(!OutputTarget::from_path(&dir).unwrap().is_video());
    }

    #[test]
    fn frame_names_sort_numerically() {
        assert_eq!(frame_file_name(1), "0000000001.jpg");
        assert_eq!(frame_file_name(1234567890), "1234567890.jpg");
        assert!(frame_file_name(9) < frame_file_name(10));
    }

    #[test]
    fn jpeg_layouts() {
        let depth = DynamicImage::ImageLuma16(ImageBuffer::<Luma<u16>, _>::from_pixel(
            2,
            2,
            Luma([0xFFFF]),
        ));
        let converted = to_jpeg_compatible(depth);
        assert_eq!(converted.as_luma8().unwrap().get_pixel(0, 0)[0], 255);

        let rgba = DynamicImage::ImageRgba8(RgbaImage::new(2, 2));
        assert!(to_jpeg_compatible(rgba).as_rgb8().is_some());
    }

    #[test]
    fn sequence_writer_numbers_from_one() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("frames");
        let mut writer = ImageSequenceWriter::create(&dir).unwrap();
        let first = writer
            .write(DynamicImage::ImageRgb8(image::RgbImage::new(4, 4)))
            .unwrap();
        let second = writer
            .write(DynamicImage::ImageRgb8(image::RgbImage::new(4, 4)))
            .unwrap();

        assert_eq!(first, dir.join("0000000001.jpg"));
        assert_eq!(second, dir.join("0000000002.jpg"));
        assert_eq!(writer.frames_written(), 2);
        assert!(first.exists() && second.exists());
    }
}
