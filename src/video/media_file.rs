use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::core::{MediaError, Result};
use crate::video::media_tool::MediaTool;
use crate::video::temp_file::TempFileGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFileType {
    Jpeg,
    Mp4,
}

/// Attributes reported for download listings. Photos leave the video fields at zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaFileAttr {
    pub video_duration_secs: u32,
    pub video_frame_rate: f32,
    pub width: u32,
    pub height: u32,
}

/// A generated preview image (thumbnail or screen-nail) backed by a temp JPEG
/// that is removed when the preview is dropped.
#[derive(Debug)]
pub struct PreviewImage {
    file: TempFileGuard,
    size: u64,
}

impl PreviewImage {
    fn from_guard(file: TempFileGuard) -> Result<Self> {
        let size = std::fs::metadata(file.path())?.len();
        Ok(Self { file, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn data(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        read_range(self.file.path(), offset, length)
    }
}

/// Read up to `length` bytes at `offset`; shorter only at end of file
pub fn read_range(path: &Path, offset: u64, length: usize) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if offset > size {
        return Err(MediaError::OutOfRange(format!(
            "offset {} beyond {} byte file {}",
            offset,
            size,
            path.display()
        )));
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut data = Vec::with_capacity(length.min((size - offset) as usize));
    file.take(length as u64).read_to_end(&mut data)?;
    Ok(data)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Per-type media file operations. Preview operations a type does not
/// implement fail with `InvalidParameter`.
pub trait MediaFileOps: Send + Sync {
    fn file_type(&self) -> MediaFileType;

    fn is_supported(&self, path: &Path) -> bool;

    fn attributes(&self, path: &Path) -> Result<MediaFileAttr>;

    fn original_size(&self, path: &Path) -> Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn original_data(&self, path: &Path, offset: u64, length: usize) -> Result<Vec<u8>> {
        read_range(path, offset, length)
    }

    fn create_thumbnail(&self, path: &Path, _temp_dir: &Path) -> Result<PreviewImage> {
        Err(MediaError::InvalidParameter(format!(
            "{:?} files have no thumbnail support ({})",
            self.file_type(),
            path.display()
        )))
    }

    fn create_screennail(&self, path: &Path, _temp_dir: &Path) -> Result<PreviewImage> {
        Err(MediaError::InvalidParameter(format!(
            "{:?} files have no screen-nail support ({})",
            self.file_type(),
            path.display()
        )))
    }
}

/// Photos, scaled in-process with the `image` crate
pub struct JpegOps {
    thumbnail_width: u32,
    screennail_width: u32,
}

impl JpegOps {
    pub fn new(thumbnail_width: u32, screennail_width: u32) -> Self {
        Self { thumbnail_width, screennail_width }
    }

    fn scaled_copy(&self, path: &Path, temp_dir: &Path, width: u32, prefix: &str) -> Result<PreviewImage> {
        let img = image::open(path)?;
        let height = ((img.height() as u64 * width as u64) / img.width().max(1) as u64).max(1) as u32;
        let preview = img.resize(width, height, image::imageops::FilterType::Triangle);

        let guard = TempFileGuard::new_in(temp_dir, prefix, "jpg");
        preview.to_rgb8().save_with_format(guard.path(), image::ImageFormat::Jpeg)?;
        PreviewImage::from_guard(guard)
    }
}

impl MediaFileOps for JpegOps {
    fn file_type(&self) -> MediaFileType {
        MediaFileType::Jpeg
    }

    fn is_supported(&self, path: &Path) -> bool {
        has_extension(path, &["jpg", "jpeg"])
    }

    fn attributes(&self, path: &Path) -> Result<MediaFileAttr> {
        let (width, height) = image::image_dimensions(path)?;
        Ok(MediaFileAttr { width, height, ..Default::default() })
    }

    fn create_thumbnail(&self, path: &Path, temp_dir: &Path) -> Result<PreviewImage> {
        self.scaled_copy(path, temp_dir, self.thumbnail_width, "thumb")
    }

    fn create_screennail(&self, path: &Path, temp_dir: &Path) -> Result<PreviewImage> {
        self.scaled_copy(path, temp_dir, self.screennail_width, "screen")
    }
}

/// Videos, previewed by extracting a scaled frame with the media tool
pub struct Mp4Ops {
    tool: Arc<dyn MediaTool>,
    thumbnail_width: u32,
    screennail_width: u32,
}

impl Mp4Ops {
    pub fn new(tool: Arc<dyn MediaTool>, thumbnail_width: u32, screennail_width: u32) -> Self {
        Self { tool, thumbnail_width, screennail_width }
    }

    fn extract(&self, path: &Path, temp_dir: &Path, width: u32, prefix: &str) -> Result<PreviewImage> {
        let guard = TempFileGuard::new_in(temp_dir, prefix, "jpg");
        self.tool.extract_preview(path, guard.path(), width)?;
        PreviewImage::from_guard(guard)
    }
}

impl MediaFileOps for Mp4Ops {
    fn file_type(&self) -> MediaFileType {
        MediaFileType::Mp4
    }

    fn is_supported(&self, path: &Path) -> bool {
        has_extension(path, &["mp4"])
    }

    fn attributes(&self, path: &Path) -> Result<MediaFileAttr> {
        let info = self.tool.probe_video_info(path)?;
        Ok(MediaFileAttr {
            video_duration_secs: (info.duration_ms + 500) / 1000,
            video_frame_rate: info.frame_rate,
            width: info.width,
            height: info.height,
        })
    }

    fn create_thumbnail(&self, path: &Path, temp_dir: &Path) -> Result<PreviewImage> {
        self.extract(path, temp_dir, self.thumbnail_width, "thumb")
    }

    fn create_screennail(&self, path: &Path, temp_dir: &Path) -> Result<PreviewImage> {
        self.extract(path, temp_dir, self.screennail_width, "screen")
    }
}

/// Ordered table of file types; the first entry claiming a path wins
pub struct MediaFileRegistry {
    entries: Vec<Arc<dyn MediaFileOps>>,
}

impl MediaFileRegistry {
    pub fn new(entries: Vec<Arc<dyn MediaFileOps>>) -> Self {
        Self { entries }
    }

    pub fn with_defaults(tool: Arc<dyn MediaTool>, thumbnail_width: u32, screennail_width: u32) -> Self {
        Self::new(vec![
            Arc::new(JpegOps::new(thumbnail_width, screennail_width)),
            Arc::new(Mp4Ops::new(tool, thumbnail_width, screennail_width)),
        ])
    }

    pub fn lookup(&self, path: &Path) -> Option<Arc<dyn MediaFileOps>> {
        self.entries.iter().find(|ops| ops.is_supported(path)).cloned()
    }
}

/// An open media file with lazily created previews. Dropping the handle
/// drops any preview still alive, and with it the temp file.
pub struct MediaFileHandle {
    path: std::path::PathBuf,
    ops: Arc<dyn MediaFileOps>,
    thumbnail: Option<PreviewImage>,
    screennail: Option<PreviewImage>,
}

impl MediaFileHandle {
    pub fn create(registry: &MediaFileRegistry, path: &Path) -> Result<Self> {
        let ops = registry.lookup(path).ok_or_else(|| {
            log::error!("Unsupported media file type: {}", path.display());
            MediaError::InvalidParameter(format!("unsupported media file {}", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            ops,
            thumbnail: None,
            screennail: None,
        })
    }

    pub fn file_type(&self) -> MediaFileType {
        self.ops.file_type()
    }

    pub fn attributes(&self) -> Result<MediaFileAttr> {
        self.ops.attributes(&self.path)
    }

    pub fn original_size(&self) -> Result<u64> {
        self.ops.original_size(&self.path)
    }

    pub fn original_data(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.ops.original_data(&self.path, offset, length)
    }

    pub fn create_thumbnail(&mut self, temp_dir: &Path) -> Result<()> {
        let preview = self.ops.create_thumbnail(&self.path, temp_dir).map_err(|e| {
            log::error!("Create thumbnail for {} failed: {}", self.path.display(), e);
            e
        })?;
        self.thumbnail = Some(preview);
        Ok(())
    }

    pub fn thumbnail(&self) -> Result<&PreviewImage> {
        self.thumbnail.as_ref().ok_or_else(|| {
            MediaError::NonsupportInCurrentState(format!("no thumbnail created for {}", self.path.display()))
        })
    }

    pub fn destroy_thumbnail(&mut self) {
        self.thumbnail = None;
    }

    pub fn create_screennail(&mut self, temp_dir: &Path) -> Result<()> {
        let preview = self.ops.create_screennail(&self.path, temp_dir).map_err(|e| {
            log::error!("Create screen-nail for {} failed: {}", self.path.display(), e);
            e
        })?;
        self.screennail = Some(preview);
        Ok(())
    }

    pub fn screennail(&self) -> Result<&PreviewImage> {
        self.screennail.as_ref().ok_or_else(|| {
            MediaError::NonsupportInCurrentState(format!("no screen-nail created for {}", self.path.display()))
        })
    }

    pub fn destroy_screennail(&mut self) {
        self.screennail = None;
    }

    pub fn has_previews(&self) -> bool {
        self.thumbnail.is_some() || self.screennail.is_some()
    }
}
