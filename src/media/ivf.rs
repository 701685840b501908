use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;
use tracing::debug;

use crate::interactor::types::{is_video_keyframe, AvatarState, MediaFrame, SourceError};
use crate::interactor::{FrameSource, ResettableFrameSource};

const IVF_SIGNATURE: &[u8; 4] = b"DKIF";
const IVF_FILE_HEADER_LEN: usize = 32;
const IVF_FRAME_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy)]
pub struct IvfHeader {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub frame_count: u32,
}

#[derive(Debug, Clone)]
pub struct IvfFrame {
    pub payload: Bytes,
    pub timestamp: u64,
    pub keyframe: bool,
}

/// Incremental IVF container parser over any async byte stream: 32-byte
/// file header, then `[len:4 LE][timestamp:8 LE][payload]` frames.
pub struct IvfReader<R> {
    reader: R,
    header: IvfHeader,
}

impl<R: AsyncRead + Unpin> IvfReader<R> {
    pub async fn new(mut reader: R) -> Result<Self, SourceError> {
        let mut raw = [0u8; IVF_FILE_HEADER_LEN];
        reader
            .read_exact(&mut raw)
            .await
            .map_err(|_| SourceError::Malformed("truncated ivf file header".into()))?;

        if &raw[0..4] != IVF_SIGNATURE {
            return Err(SourceError::Malformed("missing DKIF signature".into()));
        }

        let header_len = u16::from_le_bytes([raw[6], raw[7]]) as usize;
        if header_len < IVF_FILE_HEADER_LEN {
            return Err(SourceError::Malformed(format!(
                "ivf header length {header_len} below minimum"
            )));
        }
        // Tolerate writers that pad the file header.
        let mut remaining = header_len - IVF_FILE_HEADER_LEN;
        let mut scratch = [0u8; 64];
        while remaining > 0 {
            let take = remaining.min(scratch.len());
            reader
                .read_exact(&mut scratch[..take])
                .await
                .map_err(|_| SourceError::Malformed("truncated ivf file header".into()))?;
            remaining -= take;
        }

        let header = IvfHeader {
            fourcc: [raw[8], raw[9], raw[10], raw[11]],
            width: u16::from_le_bytes([raw[12], raw[13]]),
            height: u16::from_le_bytes([raw[14], raw[15]]),
            frame_count: u32::from_le_bytes([raw[24], raw[25], raw[26], raw[27]]),
        };

        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &IvfHeader {
        &self.header
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads the next frame. Clean EOF at a frame boundary yields
    /// `Ok(None)`; EOF inside a frame header or payload is malformed.
    pub async fn next_frame(&mut self) -> Result<Option<IvfFrame>, SourceError> {
        let mut frame_header = [0u8; IVF_FRAME_HEADER_LEN];
        if !read_full_or_clean_eof(&mut self.reader, &mut frame_header).await? {
            return Ok(None);
        }

        let length = u32::from_le_bytes([
            frame_header[0],
            frame_header[1],
            frame_header[2],
            frame_header[3],
        ]) as usize;
        let timestamp = u64::from_le_bytes([
            frame_header[4],
            frame_header[5],
            frame_header[6],
            frame_header[7],
            frame_header[8],
            frame_header[9],
            frame_header[10],
            frame_header[11],
        ]);

        let mut payload = vec![0u8; length];
        self.reader
            .read_exact(&mut payload)
            .await
            .map_err(|_| SourceError::Malformed("truncated ivf frame payload".into()))?;

        let keyframe = is_video_keyframe(&payload);
        Ok(Some(IvfFrame {
            payload: Bytes::from(payload),
            timestamp,
            keyframe,
        }))
    }
}

/// Fills `buf` completely. Returns false on a clean EOF before the first
/// byte; EOF after a partial read is malformed.
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
            return Err(SourceError::Malformed(
                "truncated ivf frame header".into(),
            ));
        }
        filled += read;
    }
    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Rewind seamlessly on exhaustion.
    Loop,
    /// Surface end-of-stream once exhausted.
    Sequential,
}

/// Video frame source over a local IVF file, either looping for idle
/// playback or sequential for one-shot clips. 40 ms per frame.
pub struct IvfFileSource {
    path: PathBuf,
    mode: PlaybackMode,
    state_type: AvatarState,
    reader: Mutex<Option<IvfReader<File>>>,
}

impl IvfFileSource {
    pub async fn open<P: AsRef<Path>>(path: P, mode: PlaybackMode) -> Result<Self, SourceError> {
        Self::open_with_state(path, mode, AvatarState::Idle).await
    }

    pub async fn open_with_state<P: AsRef<Path>>(
        path: P,
        mode: PlaybackMode,
        state_type: AvatarState,
    ) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let reader = IvfReader::new(file).await?;
        debug!(
            target: "media",
            path = %path.display(),
            frames = reader.header().frame_count,
            "opened ivf source"
        );
        Ok(Self {
            path,
            mode,
            state_type,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Seeks the underlying handle back to the first frame and re-parses
    /// the file header, without reopening the file.
    async fn rewind(slot: &mut Option<IvfReader<File>>) -> Result<(), SourceError> {
        let reader = slot.take().ok_or(SourceError::Closed)?;
        let mut file = reader.into_inner();
        file.seek(SeekFrom::Start(0)).await?;
        *slot = Some(IvfReader::new(file).await?);
        Ok(())
    }
}

#[async_trait]
impl FrameSource for IvfFileSource {
    async fn next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(SourceError::Closed)?;

        if let Some(frame) = reader.next_frame().await? {
            return Ok(Some(MediaFrame::video(frame.payload, frame.keyframe)));
        }

        match self.mode {
            PlaybackMode::Sequential => Err(SourceError::EndOfStream),
            PlaybackMode::Loop => {
                Self::rewind(&mut guard).await?;
                let reader = guard.as_mut().ok_or(SourceError::Closed)?;
                match reader.next_frame().await? {
                    Some(frame) => Ok(Some(MediaFrame::video(frame.payload, frame.keyframe))),
                    None => Err(SourceError::Malformed(format!(
                        "ivf file has no frames: {}",
                        self.path.display()
                    ))),
                }
            }
        }
    }

    async fn try_next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        // Local files are always ready.
        self.next_frame().await
    }

    fn avatar_state(&self) -> AvatarState {
        self.state_type
    }

    async fn close(&self) {
        self.reader.lock().await.take();
    }
}

#[async_trait]
impl ResettableFrameSource for IvfFileSource {
    async fn reset(&self) -> Result<(), SourceError> {
        let mut guard = self.reader.lock().await;
        Self::rewind(&mut guard).await
    }
}
