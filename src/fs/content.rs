//! File content handles and the byte streams built on them

use async_trait::async_trait;
use std::io;

/// Buffer size used when streaming between a source and a sink
const TRANSFER_BUFFER_SIZE: usize = 64 * 1024;

/// Scoped handle granting positional byte access to one file
///
/// Whether reads, writes or both are allowed depends on the options the
/// content was opened with. Content opened for appending writes at the end
/// of the file regardless of the position passed to `write_at`. The handle
/// is released when dropped.
#[async_trait]
pub trait FileContent: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `position`; 0 means end of file
    async fn read_at(&self, position: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `buf` at `position`, returning the number of bytes written
    async fn write_at(&self, position: u64, buf: &[u8]) -> io::Result<usize>;

    async fn size(&self) -> io::Result<u64>;

    /// Truncate or extend (with zeros) to `size` bytes
    async fn set_size(&self, size: u64) -> io::Result<()>;

    /// Flush written data to durable storage
    async fn sync(&self) -> io::Result<()>;
}

/// Sequential byte source
#[async_trait]
pub trait AsyncSource: Send {
    /// Read up to `buf.len()` bytes; `Ok(0)` signals end of stream
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Read everything that is left, appending to `out`
    async fn read_to_end(&mut self, out: &mut Vec<u8>) -> io::Result<usize> {
        let mut buffer = vec![0u8; TRANSFER_BUFFER_SIZE];
        let mut total = 0;
        loop {
            let read = self.read(&mut buffer).await?;
            if read == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buffer[..read]);
            total += read;
        }
    }
}

/// Sequential byte sink
#[async_trait]
pub trait AsyncSink: Send {
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    async fn flush(&mut self) -> io::Result<()>;

    async fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let written = self.write(buf).await?;
            if written == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            buf = &buf[written..];
        }
        Ok(())
    }
}

/// Source reading a `FileContent` from the start
///
/// Owns the content handle: dropping the source releases both.
pub struct ContentSource {
    content: Box<dyn FileContent>,
    position: u64,
}

impl ContentSource {
    pub fn new(content: Box<dyn FileContent>) -> Self {
        Self {
            content,
            position: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

#[async_trait]
impl AsyncSource for ContentSource {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.content.read_at(self.position, buf).await?;
        self.position += read as u64;
        Ok(read)
    }
}

/// Sink writing a `FileContent` from the start (or at its end when opened
/// for appending)
///
/// Owns the content handle: dropping the sink releases both.
pub struct ContentSink {
    content: Box<dyn FileContent>,
    position: u64,
}

impl ContentSink {
    pub fn new(content: Box<dyn FileContent>) -> Self {
        Self {
            content,
            position: 0,
        }
    }

    /// Flush written data to durable storage
    pub async fn sync(&self) -> io::Result<()> {
        self.content.sync().await
    }
}

#[async_trait]
impl AsyncSink for ContentSink {
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.content.write_at(self.position, buf).await?;
        self.position += written as u64;
        Ok(written)
    }

    async fn flush(&mut self) -> io::Result<()> {
        // write_at does not buffer
        Ok(())
    }
}

/// Stream everything from `source` into `sink`, returning the byte count
pub async fn transfer(
    source: &mut (dyn AsyncSource + '_),
    sink: &mut (dyn AsyncSink + '_),
) -> io::Result<u64> {
    let mut buffer = vec![0u8; TRANSFER_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let read = source.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        sink.write_all(&buffer[..read]).await?;
        total += read as u64;
    }
    sink.flush().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Vec-backed content for exercising the stream adapters
    #[derive(Default)]
    struct VecContent {
        data: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl FileContent for VecContent {
        async fn read_at(&self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
            let data = self.data.lock().unwrap();
            let start = (position as usize).min(data.len());
            // Short reads exercise the read loops
            let len = buf.len().min(data.len() - start).min(3);
            buf[..len].copy_from_slice(&data[start..start + len]);
            Ok(len)
        }

        async fn write_at(&self, position: u64, buf: &[u8]) -> io::Result<usize> {
            let mut data = self.data.lock().unwrap();
            let end = position as usize + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[position as usize..end].copy_from_slice(buf);
            Ok(buf.len())
        }

        async fn size(&self) -> io::Result<u64> {
            Ok(self.data.lock().unwrap().len() as u64)
        }

        async fn set_size(&self, size: u64) -> io::Result<()> {
            self.data.lock().unwrap().resize(size as usize, 0);
            Ok(())
        }

        async fn sync(&self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_source_reads_to_end() {
        let content = VecContent {
            data: Mutex::new(b"hello world".to_vec()),
        };
        let mut source = ContentSource::new(Box::new(content));
        let mut out = Vec::new();
        let read = source.read_to_end(&mut out).await.unwrap();
        assert_eq!(read, 11);
        assert_eq!(out, b"hello world");
        assert_eq!(source.position(), 11);
    }

    #[tokio::test]
    async fn test_transfer_between_contents() {
        let mut source = ContentSource::new(Box::new(VecContent {
            data: Mutex::new(b"0123456789".to_vec()),
        }));
        let mut sink = ContentSink::new(Box::new(VecContent::default()));
        let copied = transfer(&mut source, &mut sink).await.unwrap();
        assert_eq!(copied, 10);
        assert_eq!(sink.content.size().await.unwrap(), 10);
    }
}
