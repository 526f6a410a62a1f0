//! DAP wire framing.
//! - read_frame: parse one Content-Length payload, `None` on end-of-stream
//! - write_frame: emit header + body as a single write
//! - Transcript: optional raw protocol log (DOTBRIDGE_DAP_LOG)

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::sync::{Arc, Mutex};

const CONTENT_LENGTH: &str = "Content-Length";

/// Environment variable naming a file that receives the raw DAP transcript.
pub const TRANSCRIPT_ENV: &str = "DOTBRIDGE_DAP_LOG";

/// Read one framed message body. Returns `Ok(None)` when the peer closed the
/// connection cleanly, before the header trailer or mid-body; both are normal
/// end-of-stream, not errors. A `Content-Length` value that does not parse as
/// a non-negative integer is a fatal `InvalidData` error.
pub fn read_frame<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut content_length = None;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes = reader.read_line(&mut line)?;
        if bytes == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let length = value.trim().parse::<usize>().map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("malformed Content-Length value '{}'", value.trim()),
                    )
                })?;
                content_length = Some(length);
            }
        }
    }

    let length = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header")
    })?;

    let mut buffer = vec![0u8; length];
    match reader.read_exact(&mut buffer) {
        Ok(()) => Ok(Some(buffer)),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err),
    }
}

/// Write one framed message. Header and body go out in a single write so the
/// frame is never interleaved with a concurrent writer's output.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", payload.len());
    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    writer.flush()
}

/// Raw protocol transcript, shared by all transport threads.
#[derive(Clone, Default)]
pub struct Transcript {
    sink: Option<Arc<Mutex<BufWriter<File>>>>,
}

impl Transcript {
    /// Open the transcript file named by `DOTBRIDGE_DAP_LOG`, if set.
    #[must_use]
    pub fn from_env() -> Self {
        let sink = std::env::var(TRANSCRIPT_ENV)
            .ok()
            .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok())
            .map(BufWriter::new)
            .map(|writer| Arc::new(Mutex::new(writer)));
        Self { sink }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Append one payload with a direction marker (`c->`, `->c`, `d->`, `->d`).
    pub fn line(&self, direction: &str, payload: &[u8]) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Ok(mut writer) = sink.lock() {
            let _ = writer.write_all(direction.as_bytes());
            let _ = writer.write_all(b" ");
            let _ = writer.write_all(payload);
            let _ = writer.write_all(b"\n");
            let _ = writer.flush();
        }
    }
}
