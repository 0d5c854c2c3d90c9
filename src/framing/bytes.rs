use std::collections::VecDeque;
use std::io::{self, BufReader, ErrorKind, Read};

/// Byte source that lets the frame scanner give back bytes it looked at but did not
/// use, e.g., the tail of a candidate header that failed validation. Bytes pushed
/// back are returned again, in stream order, before anything new is read.
pub(crate) struct PushbackReader<R>
where
    R: Read + Send,
{
    inner: BufReader<R>,
    /// Total bytes pulled from `inner`
    consumed: usize,
    pending: VecDeque<u8>,
}

impl<R> PushbackReader<R>
where
    R: Read + Send,
{
    pub fn new(reader: R) -> Self {
        PushbackReader {
            inner: BufReader::new(reader),
            consumed: 0,
            pending: VecDeque::new(),
        }
    }

    /// Next byte, or `None` at end of stream.
    pub fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.pending.pop_front() {
            return Ok(Some(b));
        }
        let mut one = [0u8; 1];
        loop {
            match self.inner.read(&mut one) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.consumed += 1;
                    return Ok(Some(one[0]));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    /// Fill all of `buf`. Returns `Ok(false)`, with nothing consumed, if the stream
    /// ends first.
    pub fn read_full(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let cached = self.pending.len().min(buf.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..cached)) {
            *dst = src;
        }
        let mut filled = cached;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.push_back(&buf[..filled]);
                    return Ok(false);
                }
                Ok(n) => {
                    self.consumed += n;
                    filled += n;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    /// Return `dat` to the front of the stream; `dat[0]` is the next byte read.
    pub fn push_back(&mut self, dat: &[u8]) {
        for b in dat.iter().rev() {
            self.pending.push_front(*b);
        }
    }

    /// Stream offset of the next byte.
    pub fn position(&self) -> usize {
        self.consumed - self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(dat: &[u8]) -> PushbackReader<&[u8]> {
        PushbackReader::new(dat)
    }

    #[test]
    fn pushed_back_bytes_come_first() {
        let mut r = reader(&[10, 11, 12, 13, 14]);
        assert_eq!(r.next_byte().unwrap(), Some(10));
        assert_eq!(r.next_byte().unwrap(), Some(11));
        r.push_back(&[11]);
        assert_eq!(r.position(), 1);
        assert_eq!(r.next_byte().unwrap(), Some(11));

        let mut buf = [0u8; 3];
        assert!(r.read_full(&mut buf).unwrap());
        assert_eq!(buf, [12, 13, 14]);
        assert_eq!(r.position(), 5);
        assert_eq!(r.next_byte().unwrap(), None);
    }

    #[test]
    fn read_full_mixes_pending_and_new_bytes() {
        let mut r = reader(&[1, 2, 3, 4, 5, 6]);
        let mut head = [0u8; 4];
        assert!(r.read_full(&mut head).unwrap());
        // Two separate push backs, last one in front
        r.push_back(&head[2..]);
        r.push_back(&head[1..2]);
        assert_eq!(r.position(), 1);

        let mut rest = [0u8; 5];
        assert!(r.read_full(&mut rest).unwrap());
        assert_eq!(rest, [2, 3, 4, 5, 6]);
    }

    #[test]
    fn short_stream_consumes_nothing() {
        let mut r = reader(&[7, 8]);
        let mut buf = [0u8; 4];
        assert!(!r.read_full(&mut buf).unwrap());
        assert_eq!(r.position(), 0);
        assert_eq!(r.next_byte().unwrap(), Some(7));
    }
}
