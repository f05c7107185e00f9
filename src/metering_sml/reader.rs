use super::utils::find_subsequence;
use log::debug;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound of a single read from the byte source
pub const READ_CHUNK: usize = 250;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Read error: {0}")]
    Io(#[from] io::Error),
    #[error("Byte source reached end of stream")]
    Eof,
    #[error("No complete telegram within the read timeout")]
    Timeout,
}

async fn read_chunk<R>(source: &mut R, buffer: &mut [u8]) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let count = source.read(buffer).await?;
    if count == 0 {
        return Err(FrameError::Eof);
    }
    debug!("Read {} bytes: {}", count, hex::encode(&buffer[..count]));
    Ok(count)
}

/// Reads from `source` until one telegram enclosed by `start` and `stop` was
/// seen and returns it including both delimiters.
///
/// Everything in front of `start` is thrown away, as is everything that came
/// in behind `stop` with the final read. Nothing is buffered across calls, so a
/// failed read loses the partially received telegram.
pub async fn read_frame<R>(source: &mut R, start: &[u8], stop: &[u8]) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buffer = [0u8; READ_CHUNK];
    let mut preamble: Vec<u8> = Vec::with_capacity(1024);

    // First scan for the start delimiter
    let start_index = loop {
        if let Some(index) = find_subsequence(&preamble, start) {
            break index;
        }
        // Only a delimiter prefix at the very end can still complete
        let keep = start.len().saturating_sub(1).min(preamble.len());
        preamble.drain(..preamble.len() - keep);

        let count = read_chunk(source, &mut buffer).await?;
        preamble.extend_from_slice(&buffer[..count]);
    };

    let mut result = preamble.split_off(start_index);
    debug!("Start sequence found, starting result with {} bytes from the preamble", result.len());

    // Keep everything until the stop delimiter shows up behind the start
    let mut search_from = start.len();
    loop {
        if let Some(pos) = find_subsequence(&result[search_from..], stop) {
            let end = search_from + pos + stop.len();
            if end < result.len() {
                debug!("Skipping {} bytes behind the stop sequence", result.len() - end);
            }
            result.truncate(end);
            debug!("Telegram complete with {} bytes", result.len());
            return Ok(result);
        }
        search_from = result.len().saturating_sub(stop.len().saturating_sub(1)).max(start.len());

        let count = read_chunk(source, &mut buffer).await?;
        result.extend_from_slice(&buffer[..count]);
    }
}

/// Same as [`read_frame`] but gives up after `limit` if one is configured
pub async fn read_frame_with_timeout<R>(
    source: &mut R,
    start: &[u8],
    stop: &[u8],
    limit: Option<Duration>,
) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, read_frame(source, start, stop))
            .await
            .map_err(|_| FrameError::Timeout)?,
        None => read_frame(source, start, stop).await,
    }
}
