use std::io::{self, Read, Seek, SeekFrom, Write};

/// The condition of a [`BufferedStream`].
///
/// `Eof` lasts until the stream is repositioned. Any seek to another offset resets it to `Ok`,
/// while a seek to the current offset leaves it set. `Error` never clears.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamState {
    Ok,
    /// A read came up short. Further reads return nothing until the position changes.
    Eof,
    /// An I/O error occurred. Every later operation fails.
    Error,
}

fn read_fully<R: Read + Seek>(inner: &mut R, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    inner.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        match inner.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn write_fully<W: Write + Seek>(inner: &mut W, offset: u64, buf: &[u8]) -> io::Result<()> {
    inner.seek(SeekFrom::Start(offset))?;
    inner.write_all(buf)
}

/// A stream with a logical position, an optional read-ahead window ("preload") and an optional
/// write accumulator ("presave").
///
/// Reads through the window return exactly the bytes an unbuffered read would. Writes are
/// gathered until the buffer fills, the position jumps away from the end of the
/// buffered run, or the stream is flushed. Pending writes are lost if the stream is dropped
/// without a flush.
pub struct BufferedStream<S> {
    inner: S,
    position: u64,
    state: StreamState,

    preload: Vec<u8>,
    preload_start: u64,
    preload_capacity: usize,

    presave: Vec<u8>,
    presave_start: u64,
    presave_capacity: usize,
}

impl<S> BufferedStream<S> {
    pub fn new(inner: S, preload_size: usize, presave_size: usize) -> Self {
        Self {
            inner,
            position: 0,
            state: StreamState::Ok,
            preload: Vec::with_capacity(preload_size),
            preload_start: 0,
            preload_capacity: preload_size,
            presave: Vec::with_capacity(presave_size),
            presave_start: 0,
            presave_capacity: presave_size,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Returns the underlying stream, discarding anything not yet flushed.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn failed() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "stream is in a failed state")
    }

    fn fail(&mut self, err: io::Error) -> io::Error {
        log::error!("stream failed at offset {}: {}", self.position, err);
        self.state = StreamState::Error;
        err
    }
}

impl<S: Read + Seek> BufferedStream<S> {
    fn fill_preload(&mut self) -> io::Result<()> {
        let have = self.preload.len();
        let offset = self.preload_start + have as u64;
        self.preload.resize(self.preload_capacity, 0);
        match read_fully(&mut self.inner, offset, &mut self.preload[have..]) {
            Ok(n) => {
                self.preload.truncate(have + n);
                Ok(())
            }
            Err(e) => {
                self.preload.clear();
                Err(e)
            }
        }
    }

    fn read_preloaded(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.position;
        let end = start + buf.len() as u64;
        let window_end = self.preload_start + self.preload.len() as u64;
        if start < self.preload_start || end > window_end {
            if start >= self.preload_start && start <= window_end {
                // keep what overlaps and stream in only the missing tail
                self.preload.drain(..(start - self.preload_start) as usize);
            } else {
                self.preload.clear();
            }
            self.preload_start = start;
            self.fill_preload()?;
            log::trace!("preload window now covers {}..{}", self.preload_start, self.preload_start + self.preload.len() as u64);
        }
        let begin = (start - self.preload_start) as usize;
        let n = buf.len().min(self.preload.len() - begin);
        buf[..n].copy_from_slice(&self.preload[begin..begin + n]);
        Ok(n)
    }
}

impl<S: Read + Seek> Read for BufferedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.state {
            StreamState::Error => return Err(Self::failed()),
            StreamState::Eof => return Ok(0),
            StreamState::Ok => {}
        }
        if !self.presave.is_empty() {
            return Err(io::Error::new(io::ErrorKind::Other, "read while writes are pending"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let result = if buf.len() > self.preload_capacity {
            read_fully(&mut self.inner, self.position, buf)
        } else {
            self.read_preloaded(buf)
        };
        let n = result.map_err(|e| self.fail(e))?;
        self.position += n as u64;
        if n < buf.len() {
            self.state = StreamState::Eof;
        }
        Ok(n)
    }
}

impl<S: Seek> Seek for BufferedStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if self.state == StreamState::Error {
            return Err(Self::failed());
        }
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.length()?.checked_add_signed(delta),
        };
        let Some(target) = target else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative offset"));
        };
        if self.state == StreamState::Eof && target != self.position {
            self.state = StreamState::Ok;
        }
        self.position = target;
        Ok(target)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position)
    }
}

impl<S: Seek> BufferedStream<S> {
    /// The length of the stream, counting writes not yet flushed. The position is unchanged.
    pub fn length(&mut self) -> io::Result<u64> {
        if self.state == StreamState::Error {
            return Err(Self::failed());
        }
        let len = self.inner.seek(SeekFrom::End(0)).map_err(|e| self.fail(e))?;
        Ok(len.max(self.presave_start + self.presave.len() as u64))
    }
}

impl<S: Write + Seek> BufferedStream<S> {
    fn flush_presave(&mut self) -> io::Result<()> {
        if self.presave.is_empty() {
            return Ok(());
        }
        let result = write_fully(&mut self.inner, self.presave_start, &self.presave);
        self.presave.clear();
        result.map_err(|e| self.fail(e))
    }
}

impl<S: Write + Seek> Write for BufferedStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state == StreamState::Error {
            return Err(Self::failed());
        }
        self.preload.clear();
        let buffered_end = self.presave_start + self.presave.len() as u64;
        if !self.presave.is_empty() && (self.position != buffered_end || self.presave.len() + buf.len() > self.presave_capacity) {
            self.flush_presave()?;
        }
        if buf.len() >= self.presave_capacity {
            write_fully(&mut self.inner, self.position, buf).map_err(|e| self.fail(e))?;
        } else {
            if self.presave.is_empty() {
                self.presave_start = self.position;
            }
            self.presave.extend_from_slice(buf);
        }
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.state == StreamState::Error {
            return Err(Self::failed());
        }
        self.flush_presave()?;
        self.inner.flush().map_err(|e| self.fail(e))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn test_data(len: usize) -> Vec<u8> {
        let mut x: u32 = 12345;
        (0..len)
            .map(|_| {
                x = x.wrapping_mul(1103515245).wrapping_add(12345);
                (x >> 16) as u8
            })
            .collect()
    }

    struct Counting<T> {
        inner: T,
        bytes_read: usize,
        writes: usize,
    }

    impl<T: Read> Read for Counting<T> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.bytes_read += n;
            Ok(n)
        }
    }

    impl<T: Write> Write for Counting<T> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl<T: Seek> Seek for Counting<T> {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    fn counting<T>(inner: T) -> Counting<T> {
        Counting {
            inner,
            bytes_read: 0,
            writes: 0,
        }
    }

    #[test]
    fn test_preload_matches_direct_reads() {
        let data = test_data(5000);
        let requests = [(0, 10), (5, 30), (20, 100), (4990, 40), (100, 64), (90, 20), (3000, 200), (2999, 2)];
        for (offset, len) in requests {
            let mut direct = BufferedStream::new(Cursor::new(&data), 0, 0);
            let mut preloaded = BufferedStream::new(Cursor::new(&data), 64, 0);
            let mut a = vec![0; len];
            let mut b = vec![0; len];
            direct.seek(SeekFrom::Start(offset)).unwrap();
            preloaded.seek(SeekFrom::Start(offset)).unwrap();
            let na = direct.read(&mut a).unwrap();
            let nb = preloaded.read(&mut b).unwrap();
            assert_eq!(na, nb, "read of {} at {}", len, offset);
            assert_eq!(a[..na], b[..nb]);
        }
    }

    #[test]
    fn test_preload_slides_forward() {
        let data = test_data(1000);
        let mut stream = BufferedStream::new(counting(Cursor::new(&data)), 64, 0);
        let mut out = Vec::new();
        let mut buf = [0; 10];
        loop {
            let n = stream.read(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
            if n < buf.len() {
                break;
            }
        }
        assert_eq!(data, out);
        assert_eq!(1000, stream.get_ref().bytes_read);
        assert_eq!(StreamState::Eof, stream.state());
    }

    #[test]
    fn test_eof_is_sticky_until_seek() {
        let data = test_data(16);
        let mut stream = BufferedStream::new(Cursor::new(&data), 8, 0);
        stream.seek(SeekFrom::Start(12)).unwrap();
        let mut buf = [0; 8];
        assert_eq!(4, stream.read(&mut buf).unwrap());
        assert_eq!(StreamState::Eof, stream.state());
        assert_eq!(0, stream.read(&mut buf).unwrap());

        stream.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(StreamState::Ok, stream.state());
        assert_eq!(8, stream.read(&mut buf).unwrap());
        assert_eq!(data[..8], buf);
        assert_eq!(16, stream.seek(SeekFrom::End(0)).unwrap());
    }

    #[test]
    fn test_eof_survives_seek_in_place() {
        let data = test_data(16);
        let mut stream = BufferedStream::new(Cursor::new(&data), 8, 0);
        stream.seek(SeekFrom::Start(10)).unwrap();
        let mut buf = [0; 8];
        assert_eq!(6, stream.read(&mut buf).unwrap());
        assert_eq!(StreamState::Eof, stream.state());

        assert_eq!(16, stream.seek(SeekFrom::Current(0)).unwrap());
        assert_eq!(StreamState::Eof, stream.state());
        assert_eq!(16, stream.length().unwrap());
        assert_eq!(16, stream.position());
        assert_eq!(0, stream.read(&mut buf).unwrap());

        stream.seek(SeekFrom::Start(15)).unwrap();
        assert_eq!(StreamState::Ok, stream.state());
        assert_eq!(1, stream.read(&mut buf).unwrap());
    }

    #[test]
    fn test_presave() {
        let mut stream = BufferedStream::new(counting(Cursor::new(Vec::new())), 0, 16);
        stream.write_all(b"abcd").unwrap();
        stream.write_all(b"efgh").unwrap();
        assert_eq!(0, stream.get_ref().writes);
        assert_eq!(8, stream.seek(SeekFrom::End(0)).unwrap());

        // patching an earlier offset flushes the pending run first
        stream.seek(SeekFrom::Start(2)).unwrap();
        stream.write_all(b"XY").unwrap();
        stream.seek(SeekFrom::End(0)).unwrap();
        stream.write_all(&[b'z'; 20]).unwrap();
        stream.flush().unwrap();

        let mut expected = b"abXYefgh".to_vec();
        expected.extend_from_slice(&[b'z'; 20]);
        assert_eq!(expected, stream.into_inner().inner.into_inner());
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for Broken {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn test_errors_are_sticky() {
        let mut stream = BufferedStream::new(Broken, 0, 4);
        stream.write_all(b"ab").unwrap();
        assert!(stream.flush().is_err());
        assert_eq!(StreamState::Error, stream.state());
        assert!(stream.write_all(b"cd").is_err());
        assert!(stream.seek(SeekFrom::Start(0)).is_err());
    }
}
