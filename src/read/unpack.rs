//! The archive state machine.

use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::newc;
use crate::read::{EntryHeader, Error, FileKind, Result, Sink};

/// Position of the state machine between feeding calls.
///
/// Input may be delivered in pieces smaller than one header, name, or
/// payload unit, so the machine's position must survive across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Collect,
    GotHeader,
    SkipIt,
    GotName,
    CopyFile,
    GotSymlink,
    Reset,
}

/// Cursor over the current input chunk.
///
/// Tracks the unconsumed remainder of the chunk and the running byte offset
/// within the current archive segment.
#[derive(Debug)]
struct Cursor<'data> {
    data: &'data [u8],
    pos: usize,
    offset: u64,
}

impl<'data> Cursor<'data> {
    fn new(data: &'data [u8], offset: u64) -> Self {
        Cursor {
            data,
            pos: 0,
            offset,
        }
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    fn rest(&self) -> &'data [u8] {
        &self.data[self.pos..]
    }

    #[inline]
    fn eat(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.pos += n;
        self.offset += n as u64;
    }
}

/// Identity of one hard-link group.
///
/// Permission bits are excluded: two entries belong to the same group when
/// they share the device, the inode, and the file-type bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LinkKey {
    major: u32,
    minor: u32,
    ino: u32,
    file_type: u32,
}

impl LinkKey {
    fn of(header: &EntryHeader) -> LinkKey {
        LinkKey {
            major: header.major,
            minor: header.minor,
            ino: header.ino,
            file_type: header.file_type_bits(),
        }
    }
}

/// Outcome of hard-link resolution for an entry with link count >= 2.
enum Linked {
    /// Not part of a known group; materialize the entry normally.
    No,
    /// Linked to the first occurrence; the payload is not copied again.
    Yes,
    /// The link could not be created; the entry is skipped.
    Failed,
}

/// A streaming unpacker for one archive.
///
/// The unpacker accepts input in arbitrarily-sized chunks via [`feed`] or
/// [`flush`] and materializes entries through the [`Sink`] it owns. All
/// session state lives in this object, so independent archives can be
/// unpacked through independent instances.
///
/// Structural failures are sticky: the first terminal [`Error`] raised is
/// the one every later call reports. Per-entry problems skip the entry and
/// bump [`warnings`] instead.
///
/// [`feed`]: Unpacker::feed
/// [`flush`]: Unpacker::flush
/// [`warnings`]: Unpacker::warnings
pub struct Unpacker<S: Sink> {
    sink: S,
    state: State,
    next_state: State,
    /// Scratch area reassembling a header, name, or symlink name+target
    /// that spans input chunks.
    scratch: Vec<u8>,
    /// Bytes still missing from the scratch area while in `Collect`.
    remains: usize,
    header: EntryHeader,
    /// Body bytes not yet written while in `CopyFile`.
    body_remaining: u32,
    /// Byte offset since the start of the current archive segment.
    offset: u64,
    /// Offset of the next entry header.
    next_header: u64,
    wfile: Option<S::File>,
    wfile_pos: u64,
    links: HashMap<LinkKey, Vec<u8>>,
    dirs: Vec<(Vec<u8>, u32)>,
    error: Option<Error>,
    warnings: u32,
}

impl<S: Sink> core::fmt::Debug for Unpacker<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Unpacker")
            .field("state", &self.state)
            .field("offset", &self.offset)
            .field("error", &self.error)
            .field("warnings", &self.warnings)
            .finish()
    }
}

impl<S: Sink> Unpacker<S> {
    /// Create an unpacker writing entries to `sink`.
    pub fn new(sink: S) -> Self {
        Unpacker {
            sink,
            state: State::Start,
            next_state: State::Reset,
            scratch: Vec::new(),
            remains: 0,
            header: EntryHeader::default(),
            body_remaining: 0,
            offset: 0,
            next_header: 0,
            wfile: None,
            wfile_pos: 0,
            links: HashMap::new(),
            dirs: Vec::new(),
            error: None,
            warnings: 0,
        }
    }

    /// Consume bytes from one input chunk.
    ///
    /// Returns the number of bytes consumed, which may be less than the
    /// chunk length when the machine stops at an entry boundary; the caller
    /// resubmits the remainder after deciding what follows (the next
    /// header, padding, or another segment). [`flush`] implements that
    /// decision for decompressed streams.
    ///
    /// [`flush`]: Unpacker::flush
    pub fn feed(&mut self, data: &[u8]) -> Result<usize> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let consumed = self.run(data);
        match self.error {
            Some(error) => Err(error),
            None => Ok(consumed),
        }
    }

    /// Consume one decompressed chunk completely.
    ///
    /// This is the decompressor's flush callback: it re-feeds the remainder
    /// whenever the machine stops between entries, resynchronizing on the
    /// next header (`'0'`) or on NUL padding. Any other leftover byte is
    /// junk and terminates the unpack.
    pub fn flush(&mut self, data: &[u8]) -> Result<()> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let mut buf = data;
        loop {
            let written = self.run(buf);
            if self.error.is_some() || written == buf.len() {
                break;
            }
            buf = &buf[written..];
            match buf[0] {
                b'0' => self.state = State::Start,
                0 => self.state = State::Reset,
                _ => {
                    self.set_error(Error::JunkInArchive);
                    break;
                }
            }
        }
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Finish the unpack: apply deferred directory timestamps and report
    /// the sticky error, if any.
    ///
    /// Directory modification times are deferred until here because a later
    /// entry may still create objects inside the directory, which would
    /// clobber an eagerly-applied timestamp. They are applied even when the
    /// unpack failed part-way.
    pub fn finish(mut self) -> Result<()> {
        while let Some((path, mtime)) = self.dirs.pop() {
            let _ = self.sink.set_mtime(&path, u64::from(mtime), true);
        }
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Number of entries demoted to warnings (short writes, oversized or
    /// empty names, failed creates or links).
    #[inline]
    pub fn warnings(&self) -> u32 {
        self.warnings
    }

    /// The sticky terminal error, if one has been raised.
    #[inline]
    pub fn error(&self) -> Option<Error> {
        self.error
    }

    pub(crate) fn set_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub(crate) fn segment_offset(&self) -> u64 {
        self.offset
    }

    /// Rebase the segment offset, e.g. when a new segment starts.
    pub(crate) fn rebase(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Account for one inter-segment padding byte skipped by the driver.
    pub(crate) fn skip_padding_byte(&mut self) {
        self.offset += 1;
    }

    /// Force the machine to expect an entry header next.
    pub(crate) fn restart(&mut self) {
        self.state = State::Start;
    }

    /// True when the machine rests between entries, where a segment may
    /// legitimately end.
    pub(crate) fn at_segment_boundary(&self) -> bool {
        self.state == State::Reset
    }

    fn warn(&mut self, message: &str) {
        log::warn!("{}", message);
        self.warnings += 1;
    }

    /// Run the machine over one chunk, returning the bytes consumed.
    fn run(&mut self, data: &[u8]) -> usize {
        let mut cursor = Cursor::new(data, self.offset);
        loop {
            let stop = match self.state {
                State::Start => self.do_start(&mut cursor),
                State::Collect => self.do_collect(&mut cursor),
                State::GotHeader => self.do_header(&mut cursor),
                State::SkipIt => self.do_skip(&mut cursor),
                State::GotName => self.do_name(),
                State::CopyFile => self.do_copy(&mut cursor),
                State::GotSymlink => self.do_symlink(),
                State::Reset => self.do_reset(&mut cursor),
            };
            if stop {
                break;
            }
        }
        self.offset = cursor.offset;
        cursor.pos
    }

    /// Take `size` bytes into the scratch area, buffering across chunks if
    /// the current one falls short, then continue in `next`.
    fn read_into(&mut self, cursor: &mut Cursor<'_>, size: usize, next: State) {
        self.scratch.clear();
        if cursor.remaining() >= size {
            self.scratch.extend_from_slice(&cursor.rest()[..size]);
            cursor.eat(size);
            self.state = next;
        } else {
            self.remains = size;
            self.next_state = next;
            self.state = State::Collect;
        }
    }

    fn do_start(&mut self, cursor: &mut Cursor<'_>) -> bool {
        self.read_into(cursor, newc::HEADER_LEN, State::GotHeader);
        false
    }

    fn do_collect(&mut self, cursor: &mut Cursor<'_>) -> bool {
        let n = cursor.remaining().min(self.remains);
        self.scratch.extend_from_slice(&cursor.rest()[..n]);
        cursor.eat(n);
        self.remains -= n;
        if self.remains != 0 {
            return true;
        }
        self.state = self.next_state;
        false
    }

    fn do_header(&mut self, cursor: &mut Cursor<'_>) -> bool {
        let header = match EntryHeader::parse(&self.scratch) {
            Ok(header) => header,
            Err(error) => {
                self.set_error(error);
                return true;
            }
        };
        self.next_header = newc::offset_align(
            cursor.offset
                + u64::from(newc::name_align(header.name_len))
                + u64::from(header.body_len),
        );
        self.header = header;
        self.state = State::SkipIt;
        self.next_state = State::Reset;
        if header.name_len == 0 || header.name_len > newc::PATH_MAX {
            self.warn("invalid name length");
            return false;
        }
        if header.is_symlink() {
            if header.body_len > newc::PATH_MAX {
                self.warn("oversized symlink target");
                return false;
            }
            // The target follows the padded name directly, so both are
            // reassembled together.
            self.scratch.clear();
            self.remains =
                newc::name_align(header.name_len) as usize + header.body_len as usize;
            self.next_state = State::GotSymlink;
            self.state = State::Collect;
            return false;
        }
        if header.is_file() || header.body_len == 0 {
            self.read_into(
                cursor,
                newc::name_align(header.name_len) as usize,
                State::GotName,
            );
        }
        false
    }

    fn do_skip(&mut self, cursor: &mut Cursor<'_>) -> bool {
        if cursor.offset + (cursor.remaining() as u64) < self.next_header {
            let n = cursor.remaining();
            cursor.eat(n);
            true
        } else {
            cursor.eat((self.next_header - cursor.offset) as usize);
            self.state = self.next_state;
            false
        }
    }

    fn do_reset(&mut self, cursor: &mut Cursor<'_>) -> bool {
        while cursor.remaining() > 0 && cursor.rest()[0] == 0 {
            cursor.eat(1);
        }
        if cursor.remaining() > 0 && cursor.offset & 3 != 0 {
            self.set_error(Error::MalformedPadding);
        }
        true
    }

    fn do_name(&mut self) -> bool {
        self.state = State::SkipIt;
        self.next_state = State::Reset;
        let name = c_str(&self.scratch[..self.header.name_len as usize]);
        if name == newc::TRAILER {
            // Logical end of this archive: link identities do not carry
            // over into a following concatenated segment.
            self.links.clear();
            return false;
        }
        let name = name.to_vec();
        let header = self.header;
        self.clean_path(&name, Some(FileKind::from_mode(header.mode)));
        if header.is_file() {
            match self.maybe_link(&name) {
                Linked::Yes | Linked::Failed => return false,
                Linked::No => {}
            }
            match self.sink.create_file(&name, header.mode, true) {
                Ok(mut file) => {
                    let _ = self.sink.set_file_owner(&mut file, header.uid, header.gid);
                    let _ = self.sink.set_file_mode(&mut file, header.mode);
                    if header.body_len > 0 {
                        let _ = self.sink.set_file_len(&mut file, u64::from(header.body_len));
                    }
                    self.wfile = Some(file);
                    self.wfile_pos = 0;
                    self.body_remaining = header.body_len;
                    self.state = State::CopyFile;
                }
                Err(()) => self.warn("open failed"),
            }
        } else if header.is_dir() {
            let _ = self.sink.create_dir(&name, header.mode);
            let _ = self.sink.set_owner(&name, header.uid, header.gid, true);
            let _ = self.sink.set_mode(&name, header.mode);
            self.dirs.push((name, header.mtime));
        } else if header.is_special() {
            if let Linked::No = self.maybe_link(&name) {
                let _ = self
                    .sink
                    .make_node(&name, header.mode, header.rdev_major, header.rdev_minor);
                let _ = self.sink.set_owner(&name, header.uid, header.gid, true);
                let _ = self.sink.set_mode(&name, header.mode);
                // Specials have no body, so nothing can clobber the
                // timestamp later.
                let _ = self.sink.set_mtime(&name, u64::from(header.mtime), true);
            }
        }
        false
    }

    fn do_copy(&mut self, cursor: &mut Cursor<'_>) -> bool {
        if cursor.remaining() as u64 >= u64::from(self.body_remaining) {
            let n = self.body_remaining as usize;
            self.write_body(&cursor.rest()[..n]);
            if let Some(mut file) = self.wfile.take() {
                let _ = self.sink.set_file_mtime(&mut file, u64::from(self.header.mtime));
                self.sink.close(file);
            }
            cursor.eat(n);
            self.state = State::SkipIt;
            false
        } else {
            let n = cursor.remaining();
            self.write_body(&cursor.rest()[..n]);
            self.body_remaining -= n as u32;
            cursor.eat(n);
            true
        }
    }

    fn do_symlink(&mut self) -> bool {
        let header = self.header;
        let name_region = newc::name_align(header.name_len) as usize;
        let name = c_str(&self.scratch[..header.name_len as usize]).to_vec();
        let target =
            c_str(&self.scratch[name_region..name_region + header.body_len as usize]).to_vec();
        self.clean_path(&name, None);
        if self.sink.symlink(&target, &name).is_err() {
            self.warn("symlink failed");
        }
        let _ = self.sink.set_owner(&name, header.uid, header.gid, false);
        let _ = self.sink.set_mtime(&name, u64::from(header.mtime), false);
        self.state = State::SkipIt;
        self.next_state = State::Reset;
        false
    }

    /// Remove an existing object whose type differs from the incoming
    /// entry's, so type changes across updates succeed. `None` removes
    /// whatever is in the way.
    fn clean_path(&mut self, path: &[u8], keep: Option<FileKind>) {
        if let Some(existing) = self.sink.file_type(path) {
            if keep != Some(existing) {
                if existing == FileKind::Directory {
                    let _ = self.sink.remove_dir(path);
                } else {
                    let _ = self.sink.unlink(path);
                }
            }
        }
    }

    /// Resolve hard-link identity for the current entry.
    ///
    /// The first entry of a group registers its path; every later one is
    /// materialized as a link to that path and carries no data of its own.
    fn maybe_link(&mut self, name: &[u8]) -> Linked {
        if self.header.nlink < 2 {
            return Linked::No;
        }
        let key = LinkKey::of(&self.header);
        match self.links.get(&key) {
            Some(first) => {
                let first = first.clone();
                self.clean_path(name, None);
                if self.sink.hard_link(&first, name).is_ok() {
                    Linked::Yes
                } else {
                    self.warn("link failed");
                    Linked::Failed
                }
            }
            None => {
                self.links.insert(key, name.to_vec());
                Linked::No
            }
        }
    }

    fn write_body(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let file = match self.wfile.as_mut() {
            Some(file) => file,
            None => return,
        };
        let written = self.sink.write(file, self.wfile_pos, data).unwrap_or(0);
        self.wfile_pos += written as u64;
        if written != data.len() {
            self.warn("write error");
        }
    }
}

/// The initial portion of `bytes` up to, but not including, the first NUL.
fn c_str(bytes: &[u8]) -> &[u8] {
    match memchr::memchr(0, bytes) {
        Some(len) => &bytes[..len],
        None => bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::sink::testing::MemSink;
    use crate::read::testutil::{entry, entry_raw, trailer};
    use alloc::vec;
    use alloc::vec::Vec;

    fn sample() -> Vec<u8> {
        let mut archive = Vec::new();
        entry(
            &mut archive,
            "d",
            &EntryHeader {
                mode: 0o040755,
                nlink: 2,
                mtime: 1000,
                ..EntryHeader::default()
            },
            b"",
        );
        entry(
            &mut archive,
            "d/f",
            &EntryHeader {
                mode: 0o100644,
                nlink: 1,
                mtime: 2000,
                uid: 7,
                gid: 8,
                ..EntryHeader::default()
            },
            b"0123456789",
        );
        trailer(&mut archive);
        archive
    }

    /// A wider mix of entry types, for the chunking property.
    fn mixed() -> Vec<u8> {
        let mut archive = sample();
        archive.truncate(archive.len() - 124); // drop the trailer again
        entry(
            &mut archive,
            "l",
            &EntryHeader {
                mode: 0o120777,
                nlink: 1,
                mtime: 3000,
                ..EntryHeader::default()
            },
            b"d/f",
        );
        let linked = EntryHeader {
            mode: 0o100600,
            nlink: 2,
            ino: 9,
            mtime: 4000,
            ..EntryHeader::default()
        };
        entry(&mut archive, "first", &linked, b"shared");
        entry(&mut archive, "second", &linked, b"shared");
        entry(
            &mut archive,
            "null",
            &EntryHeader {
                mode: 0o020666,
                nlink: 1,
                mtime: 5000,
                rdev_major: 1,
                rdev_minor: 3,
                ..EntryHeader::default()
            },
            b"",
        );
        trailer(&mut archive);
        archive
    }

    fn unpack_whole(archive: &[u8]) -> MemSink {
        let mut sink = MemSink::default();
        let mut unpacker = Unpacker::new(&mut sink);
        unpacker.flush(archive).unwrap();
        assert!(unpacker.at_segment_boundary());
        unpacker.finish().unwrap();
        sink
    }

    #[test]
    fn directory_then_file() {
        let sink = unpack_whole(&sample());

        let dir = sink.node("d");
        assert_eq!(dir.kind, FileKind::Directory);
        assert_eq!(dir.mode, 0o040755);
        assert_eq!(dir.mtime, Some(1000));

        let file = sink.node("d/f");
        assert_eq!(file.kind, FileKind::Regular);
        assert_eq!(file.data, b"0123456789");
        assert_eq!(file.mtime, Some(2000));
        assert_eq!((file.uid, file.gid), (7, 8));

        // The file is pre-truncated to its declared length, its timestamp
        // lands right after its body, and the directory's timestamp only in
        // the final flush.
        let pos = |needle: &str| {
            sink.ops
                .iter()
                .position(|op| op.starts_with(needle))
                .unwrap_or_else(|| panic!("missing op {:?} in {:?}", needle, sink.ops))
        };
        assert!(pos("mkdir d ") < pos("create d/f "));
        assert!(pos("ftruncate d/f ") < pos("write d/f "));
        assert!(pos("write d/f ") < pos("futime d/f "));
        assert!(pos("futime d/f ") < pos("utime d "));
        assert_eq!(pos("utime d "), sink.ops.len() - 1);
    }

    #[test]
    fn chunking_equivalence() {
        let archive = mixed();
        let run = |chunk: usize| {
            let mut sink = MemSink::default();
            let mut unpacker = Unpacker::new(&mut sink);
            for piece in archive.chunks(chunk) {
                unpacker.flush(piece).unwrap();
            }
            assert_eq!(unpacker.warnings(), 0);
            unpacker.finish().unwrap();
            sink
        };
        let whole = run(archive.len());
        for &size in &[1, 2, 3, 7, 55, 110, 113, 256] {
            let split = run(size);
            assert_eq!(split.ops, whole.ops, "chunk size {}", size);
            assert_eq!(split.nodes, whole.nodes, "chunk size {}", size);
        }
    }

    #[test]
    fn hard_links() {
        let mut archive = Vec::new();
        let header = EntryHeader {
            mode: 0o100644,
            nlink: 2,
            ino: 5,
            mtime: 1234,
            ..EntryHeader::default()
        };
        entry(&mut archive, "a", &header, b"hello");
        entry(&mut archive, "b", &header, b"hello");
        trailer(&mut archive);

        let sink = unpack_whole(&archive);
        assert_eq!(sink.node("a").data, b"hello");
        assert_eq!(sink.node("b").data, b"hello");
        let creates = sink
            .ops
            .iter()
            .filter(|op| op.starts_with("create "))
            .count();
        assert_eq!(creates, 1);
        assert!(sink.ops.iter().any(|op| op == "link a -> b"));
        assert!(!sink.ops.iter().any(|op| op.starts_with("write b")));
    }

    #[test]
    fn link_groups_keyed_by_type() {
        // Same device and inode, different file type: not the same group.
        let mut archive = Vec::new();
        entry(
            &mut archive,
            "a",
            &EntryHeader {
                mode: 0o100644,
                nlink: 2,
                ino: 5,
                ..EntryHeader::default()
            },
            b"x",
        );
        entry(
            &mut archive,
            "c",
            &EntryHeader {
                mode: 0o020600,
                nlink: 2,
                ino: 5,
                rdev_major: 4,
                rdev_minor: 1,
                ..EntryHeader::default()
            },
            b"",
        );
        trailer(&mut archive);

        let sink = unpack_whole(&archive);
        assert!(!sink.ops.iter().any(|op| op.starts_with("link ")));
        assert!(sink.ops.iter().any(|op| op.starts_with("mknod c ")));
    }

    #[test]
    fn symlink_entry() {
        let mut archive = Vec::new();
        entry(
            &mut archive,
            "l",
            &EntryHeader {
                mode: 0o120777,
                nlink: 1,
                mtime: 42,
                uid: 3,
                gid: 4,
                ..EntryHeader::default()
            },
            b"some/target",
        );
        trailer(&mut archive);

        let sink = unpack_whole(&archive);
        let link = sink.node("l");
        assert_eq!(link.kind, FileKind::Symlink);
        assert_eq!(link.target, b"some/target");
        assert_eq!(link.mtime, Some(42));
        // Ownership and timestamp must not follow the link.
        assert!(sink.ops.iter().any(|op| op == "chown l 3:4 follow=false"));
        assert!(sink
            .ops
            .iter()
            .any(|op| op == "utime l mtime=42 follow=false"));
    }

    #[test]
    fn special_file_mtime_applied_immediately() {
        let mut archive = Vec::new();
        entry(
            &mut archive,
            "null",
            &EntryHeader {
                mode: 0o020666,
                nlink: 1,
                mtime: 77,
                rdev_major: 1,
                rdev_minor: 3,
                ..EntryHeader::default()
            },
            b"",
        );
        trailer(&mut archive);

        let sink = unpack_whole(&archive);
        let node = sink.node("null");
        assert_eq!(node.kind, FileKind::CharDevice);
        assert_eq!(node.rdev, (1, 3));
        assert_eq!(node.mtime, Some(77));
        assert!(sink
            .ops
            .iter()
            .any(|op| op.starts_with("mknod null mode=20666 dev=1:3")));
    }

    #[test]
    fn zero_name_length_skipped() {
        let mut archive = Vec::new();
        entry_raw(
            &mut archive,
            b"",
            0,
            &EntryHeader {
                mode: 0o100644,
                nlink: 1,
                ..EntryHeader::default()
            },
            b"",
        );
        entry(
            &mut archive,
            "ok",
            &EntryHeader {
                mode: 0o100644,
                nlink: 1,
                ..EntryHeader::default()
            },
            b"x",
        );
        trailer(&mut archive);

        let mut sink = MemSink::default();
        let mut unpacker = Unpacker::new(&mut sink);
        unpacker.flush(&archive).unwrap();
        assert_eq!(unpacker.warnings(), 1);
        unpacker.finish().unwrap();
        assert_eq!(sink.nodes.len(), 1);
        assert_eq!(sink.node("ok").data, b"x");
    }

    #[test]
    fn oversized_name_skipped() {
        let mut archive = Vec::new();
        let name = vec![b'x'; 4097];
        entry_raw(
            &mut archive,
            &name,
            4097,
            &EntryHeader {
                mode: 0o100644,
                nlink: 1,
                ..EntryHeader::default()
            },
            b"",
        );
        trailer(&mut archive);

        let mut sink = MemSink::default();
        let mut unpacker = Unpacker::new(&mut sink);
        unpacker.flush(&archive).unwrap();
        assert_eq!(unpacker.warnings(), 1);
        unpacker.finish().unwrap();
        assert!(sink.nodes.is_empty());
    }

    #[test]
    fn type_change_removes_existing() {
        let mut sink = MemSink::default();
        sink.seed("x", FileKind::Directory);
        sink.seed("y", FileKind::Regular);

        let mut archive = Vec::new();
        entry(
            &mut archive,
            "x",
            &EntryHeader {
                mode: 0o100644,
                nlink: 1,
                ..EntryHeader::default()
            },
            b"now a file",
        );
        entry(
            &mut archive,
            "y",
            &EntryHeader {
                mode: 0o040755,
                nlink: 1,
                ..EntryHeader::default()
            },
            b"",
        );
        trailer(&mut archive);

        let mut unpacker = Unpacker::new(&mut sink);
        unpacker.flush(&archive).unwrap();
        unpacker.finish().unwrap();

        assert!(sink.ops.iter().any(|op| op == "rmdir x"));
        assert!(sink.ops.iter().any(|op| op == "unlink y"));
        assert_eq!(sink.node("x").kind, FileKind::Regular);
        assert_eq!(sink.node("y").kind, FileKind::Directory);
    }

    #[test]
    fn legacy_magic_is_terminal() {
        let mut archive = sample();
        archive[..6].copy_from_slice(b"070707");

        let mut sink = MemSink::default();
        {
            let mut unpacker = Unpacker::new(&mut sink);
            assert_eq!(unpacker.feed(&archive), Err(Error::UnsupportedLegacyFormat));
            // The first error sticks.
            assert_eq!(unpacker.feed(&archive), Err(Error::UnsupportedLegacyFormat));
            assert_eq!(unpacker.finish(), Err(Error::UnsupportedLegacyFormat));
        }
        assert!(sink.ops.is_empty());
    }

    #[test]
    fn feed_reports_consumed_bytes() {
        let archive = sample();
        let mut sink = MemSink::default();
        let mut unpacker = Unpacker::new(&mut sink);
        // A partial header is buffered in full.
        assert_eq!(unpacker.feed(&archive[..50]), Ok(50));
        // The machine stops at the entry boundary after the directory.
        let consumed = unpacker.feed(&archive[50..]).unwrap();
        assert!(consumed < archive.len() - 50);
        assert_eq!(archive[50 + consumed], b'0');
    }
}
