//! Robot endpoint wire codec
//!
//! The endpoint speaks a line protocol:
//! ```text
//! <command or directive>\n
//! <verb> success|failed [detail]\n
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Maximum accepted reply length (64 KB)
const MAX_LINE_LEN: usize = 64 * 1024;

/// Read one line from the stream, without its line terminator
///
/// Never buffers more than `MAX_LINE_LEN + 1` bytes.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, Error> {
    let mut line = String::new();
    let mut limited = (&mut *reader).take(MAX_LINE_LEN as u64 + 1);
    let bytes_read = limited.read_line(&mut line).await?;

    if bytes_read == 0 {
        return Err(Error::TransportClosed);
    }

    if line.len() > MAX_LINE_LEN {
        return Err(Error::Transport(format!(
            "Reply too large: {} bytes",
            line.len()
        )));
    }

    let trimmed = line.trim_end_matches(['\r', '\n']);
    Ok(trimmed.to_string())
}

/// Write one line to the stream and flush it
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), Error> {
    if line.contains('\n') || line.contains('\r') {
        return Err(Error::Transport(format!(
            "Line must not contain line breaks: {:?}",
            line
        )));
    }

    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    Ok(())
}
