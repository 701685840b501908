use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;
use tracing::debug;

use crate::interactor::types::{AvatarState, MediaFrame, SourceError};
use crate::interactor::{FrameSource, ResettableFrameSource};

const OGG_CAPTURE: &[u8; 4] = b"OggS";
const OGG_PAGE_HEADER_LEN: usize = 27;

/// Incremental Ogg page parser: fixed 27-byte page header, segment table,
/// then the page body. The stream ID page is consumed at construction so
/// `next_page` yields data pages only.
#[derive(Debug)]
pub struct OggPageReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> OggPageReader<R> {
    pub async fn new(reader: R) -> Result<Self, SourceError> {
        let mut this = Self { reader };
        if this.next_page().await?.is_none() {
            return Err(SourceError::Malformed("missing ogg stream id page".into()));
        }
        Ok(this)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads the next page body. Clean EOF at a page boundary yields
    /// `Ok(None)`.
    pub async fn next_page(&mut self) -> Result<Option<Bytes>, SourceError> {
        let mut header = [0u8; OGG_PAGE_HEADER_LEN];
        if !read_full_or_clean_eof(&mut self.reader, &mut header).await? {
            return Ok(None);
        }

        if &header[0..4] != OGG_CAPTURE {
            return Err(SourceError::Malformed("missing OggS capture pattern".into()));
        }

        let segment_count = header[26] as usize;
        let mut lacing = vec![0u8; segment_count];
        self.reader
            .read_exact(&mut lacing)
            .await
            .map_err(|_| SourceError::Malformed("truncated ogg segment table".into()))?;

        let body_len: usize = lacing.iter().map(|&value| value as usize).sum();
        let mut body = vec![0u8; body_len];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(|_| SourceError::Malformed("truncated ogg page body".into()))?;

        Ok(Some(Bytes::from(body)))
    }
}

async fn read_full_or_clean_eof<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<bool, SourceError> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(SourceError::Malformed("truncated ogg page header".into()));
        }
        filled += read;
    }
    Ok(true)
}

/// Idle audio source over a local Ogg file. Pages are emitted at a fixed
/// 20 ms cadence and always loop; audio pages are independently decodable.
pub struct OggFileSource {
    path: PathBuf,
    reader: Mutex<Option<OggPageReader<File>>>,
}

impl OggFileSource {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let reader = OggPageReader::new(file).await?;
        debug!(target: "media", path = %path.display(), "opened ogg source");
        Ok(Self {
            path,
            reader: Mutex::new(Some(reader)),
        })
    }

    async fn rewind(slot: &mut Option<OggPageReader<File>>) -> Result<(), SourceError> {
        let reader = slot.take().ok_or(SourceError::Closed)?;
        let mut file = reader.into_inner();
        file.seek(SeekFrom::Start(0)).await?;
        *slot = Some(OggPageReader::new(file).await?);
        Ok(())
    }
}

#[async_trait]
impl FrameSource for OggFileSource {
    async fn next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(SourceError::Closed)?;

        if let Some(page) = reader.next_page().await? {
            return Ok(Some(MediaFrame::audio(page)));
        }

        Self::rewind(&mut guard).await?;
        let reader = guard.as_mut().ok_or(SourceError::Closed)?;
        match reader.next_page().await? {
            Some(page) => Ok(Some(MediaFrame::audio(page))),
            None => Err(SourceError::Malformed(format!(
                "ogg file has no data pages: {}",
                self.path.display()
            ))),
        }
    }

    async fn try_next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        self.next_frame().await
    }

    fn avatar_state(&self) -> AvatarState {
        AvatarState::Idle
    }

    async fn close(&self) {
        self.reader.lock().await.take();
    }
}

#[async_trait]
impl ResettableFrameSource for OggFileSource {
    async fn reset(&self) -> Result<(), SourceError> {
        let mut guard = self.reader.lock().await;
        Self::rewind(&mut guard).await
    }
}
