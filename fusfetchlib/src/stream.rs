use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use crc32fast::Hasher;
use futures_core::Stream;

use crate::{
    crypto::FileDecryptor,
    fus::FusError,
};

/// Byte stream for an open firmware download.
///
/// Chunks pass through unchanged when no decryptor is attached. With a
/// decryptor, plaintext is released as soon as full cipher blocks are
/// available, so network chunk boundaries do not have to align with cipher
/// block boundaries and nothing beyond two cipher blocks is ever buffered.
/// Output is produced no faster than the consumer polls, which gives the
/// pipeline end-to-end backpressure for free.
///
/// A running CRC32 over the upstream (still encrypted) bytes is maintained
/// for checksum validation after the stream is drained. An upstream failure
/// mid-stream yields an error item and terminates the stream instead of
/// silently truncating the output.
pub struct DownloadStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    decryptor: Option<FileDecryptor>,
    hasher: Hasher,
    received: u64,
    finished: bool,
}

impl DownloadStream {
    pub(crate) fn new(
        inner: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
        decryptor: Option<FileDecryptor>,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
            decryptor,
            hasher: Hasher::new(),
            received: 0,
            finished: false,
        }
    }

    /// CRC32 of the upstream bytes received so far.
    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Number of upstream bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.received
    }
}

impl Stream for DownloadStream {
    type Item = Result<Bytes, FusError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.hasher.update(&chunk);
                    this.received += chunk.len() as u64;

                    match &mut this.decryptor {
                        Some(decryptor) => {
                            let plain = decryptor.update(&chunk);
                            if plain.is_empty() {
                                // Not enough for a full cipher block yet
                                continue;
                            }

                            return Poll::Ready(Some(Ok(plain.into())));
                        }
                        None => return Poll::Ready(Some(Ok(chunk))),
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(FusError::from_transport(e))));
                }
                Poll::Ready(None) => {
                    this.finished = true;

                    if let Some(decryptor) = this.decryptor.take() {
                        return match decryptor.finish() {
                            Ok(tail) if tail.is_empty() => Poll::Ready(None),
                            Ok(tail) => Poll::Ready(Some(Ok(tail.into()))),
                            Err(e) => Poll::Ready(Some(Err(e.into()))),
                        };
                    }

                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use aes::Aes128;
    use assert_matches::assert_matches;
    use cipher::{BlockEncrypt, KeyInit};
    use cipher::generic_array::GenericArray;
    use tokio_stream::StreamExt;

    use super::*;

    const TEST_KEY: [u8; 16] = *b"0123456789abcdef";

    fn encrypt_file(data: &[u8]) -> Vec<u8> {
        let cipher = Aes128::new(GenericArray::from_slice(&TEST_KEY));

        let pad_len = 16 - data.len() % 16;
        let mut buf = data.to_vec();
        buf.resize(data.len() + pad_len, pad_len as u8);

        for block in buf.chunks_exact_mut(16) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }

        buf
    }

    fn chunked(data: &[u8], chunk_size: usize) -> Vec<reqwest::Result<Bytes>> {
        data.chunks(chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    async fn drain(stream: &mut DownloadStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.extend_from_slice(&item.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_passthrough() {
        let data = b"not encrypted at all".to_vec();

        let mut stream = DownloadStream::new(
            tokio_stream::iter(chunked(&data, 7)),
            None,
        );

        assert_eq!(drain(&mut stream).await, data);
        assert_eq!(stream.bytes_received(), data.len() as u64);
        assert_eq!(stream.crc32(), crc32fast::hash(&data));
    }

    #[tokio::test]
    async fn test_decrypt_chunked_matches_whole() {
        let plaintext: Vec<u8> = (0u8..=255).cycle().take(555).collect();
        let ciphertext = encrypt_file(&plaintext);

        // Chunk sizes that do and do not align with the cipher block size
        for chunk_size in [1, 7, 16, 33, 100, 4096] {
            let mut stream = DownloadStream::new(
                tokio_stream::iter(chunked(&ciphertext, chunk_size)),
                Some(FileDecryptor::new(&TEST_KEY)),
            );

            assert_eq!(drain(&mut stream).await, plaintext, "chunk size {chunk_size}");
            assert_eq!(stream.bytes_received(), ciphertext.len() as u64);
            assert_eq!(stream.crc32(), crc32fast::hash(&ciphertext));
        }
    }

    #[tokio::test]
    async fn test_decrypt_truncated_upstream() {
        let plaintext: Vec<u8> = (0u8..=255).collect();
        let mut ciphertext = encrypt_file(&plaintext);
        ciphertext.truncate(ciphertext.len() - 3);

        let mut stream = DownloadStream::new(
            tokio_stream::iter(chunked(&ciphertext, 64)),
            Some(FileDecryptor::new(&TEST_KEY)),
        );

        let mut saw_error = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(_) => assert!(!saw_error),
                Err(e) => {
                    assert_matches!(e, FusError::Crypto(_));
                    saw_error = true;
                }
            }
        }
        assert!(saw_error);
    }
}
