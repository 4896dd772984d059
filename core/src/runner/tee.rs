use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::{DecodeError, TeeWriteError};

use super::decode::StreamDecoder;
use super::types::{ExternalSink, Output, SinkMode, StreamName, TextMode};

pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;

/// Drains one child pipe: every chunk is optionally decoded, appended to the
/// capture buffer and copied to the external sink, in read order.
pub struct TeeTask<R> {
    stream: StreamName,
    reader: R,
    sink: Option<ExternalSink>,
    decoder: Option<StreamDecoder>,
    capture: bool,
    chunk_size: usize,
}

/// What a finished drain hands back. Only exists once the pipe reached
/// end-of-data, failed, or was cut off, and was closed.
#[derive(Debug)]
pub struct TeeOutcome {
    pub stream: StreamName,
    pub bytes_read: u64,
    /// The drain was stopped before end-of-data.
    pub cut_off: bool,
    pub captured: Option<Output>,
    pub write_error: Option<TeeWriteError>,
    pub decode_error: Option<DecodeError>,
    pub read_error: Option<io::Error>,
}

impl<R> TeeTask<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(
        stream: StreamName,
        reader: R,
        sink: Option<ExternalSink>,
        text: Option<TextMode>,
        capture: bool,
        chunk_size: usize,
    ) -> Self {
        Self {
            stream,
            reader,
            sink,
            decoder: text.map(StreamDecoder::new),
            capture,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn drain(self) -> TeeOutcome {
        self.drain_until(std::future::pending()).await
    }

    /// Like [`drain`](Self::drain), but gives up on the pipe as soon as `stop`
    /// completes. Whatever was read up to then is kept.
    pub async fn drain_until(self, stop: impl Future<Output = ()>) -> TeeOutcome {
        let TeeTask {
            stream,
            mut reader,
            mut sink,
            mut decoder,
            capture,
            chunk_size,
        } = self;

        let mut buf = vec![0u8; chunk_size];
        let mut raw: Vec<u8> = Vec::new();
        let mut text = String::new();
        let mut piece = String::new();
        let mut total = 0u64;
        let mut write_error = None;
        let mut decode_error = None;
        let mut read_error = None;
        let mut cut_off = false;
        tokio::pin!(stop);

        loop {
            let res = tokio::select! {
                biased;
                () = &mut stop => {
                    cut_off = true;
                    break;
                }
                res = reader.read(&mut buf) => res,
            };
            let n = match res {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(
                        error.kind = "stream.read_failed",
                        stream = %stream,
                        error = %e
                    );
                    read_error = Some(e);
                    break;
                }
            };
            let chunk = &buf[..n];
            total += n as u64;

            piece.clear();
            let decoded = match decoder.as_mut() {
                Some(dec) if decode_error.is_none() => {
                    if let Err(e) = dec.decode(chunk, &mut piece, false) {
                        decode_failed(stream, &e);
                        decode_error = Some(e);
                    }
                    Some(piece.as_str())
                }
                Some(_) => Some(""),
                None => None,
            };

            if capture {
                match decoded {
                    Some(s) => text.push_str(s),
                    None => raw.extend_from_slice(chunk),
                }
            }

            tee_chunk(stream, &mut sink, &mut write_error, chunk, decoded).await;
        }

        if let Some(dec) = decoder.as_mut() {
            if decode_error.is_none() {
                piece.clear();
                if let Err(e) = dec.decode(&[], &mut piece, true) {
                    decode_failed(stream, &e);
                    decode_error = Some(e);
                }
                if capture {
                    text.push_str(&piece);
                }
                let tail = piece.as_bytes();
                tee_chunk(stream, &mut sink, &mut write_error, tail, Some(piece.as_str())).await;
            }
        }

        // closes the read end
        drop(reader);
        tracing::debug!(stream = %stream, bytes = total, cut_off, "stream drained");

        let captured = capture.then(|| match decoder {
            Some(_) => Output::Text(text),
            None => Output::Bytes(raw),
        });

        TeeOutcome {
            stream,
            bytes_read: total,
            cut_off,
            captured,
            write_error,
            decode_error,
            read_error,
        }
    }
}

fn decode_failed(stream: StreamName, e: &DecodeError) {
    tracing::warn!(error.kind = "stream.decode_failed", stream = %stream, error = %e);
}

async fn tee_chunk(
    stream: StreamName,
    sink: &mut Option<ExternalSink>,
    write_error: &mut Option<TeeWriteError>,
    raw: &[u8],
    decoded: Option<&str>,
) {
    let Some(target) = sink.as_mut() else {
        return;
    };
    let bytes = match (target.mode, decoded) {
        (SinkMode::Text, Some(s)) => s.as_bytes(),
        _ => raw,
    };
    if bytes.is_empty() {
        return;
    }

    let res = async {
        target.writer.write_all(bytes).await?;
        target.writer.flush().await
    }
    .await;

    if let Err(e) = res {
        // Stop writing to a broken sink but keep draining the pipe.
        tracing::warn!(error.kind = "tee.write_failed", stream = %stream, error = %e);
        *write_error = Some(TeeWriteError::new(stream, &e));
        *sink = None;
    }
}
