use core::mem::size_of;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::identity::FsIdentity;
use crate::{NAME_LEN, TASK_COMM_LEN};

/// Event kinds. The discriminants are part of the wire format.
#[repr(i32)]
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, derive_more::Display,
)]
pub enum EventKind {
    Rename = 0,
    Write = 1,
    Unlink = -1,
    Rmdir = -2,
    Mkdir = 3,
    Create = 4,
}

impl EventKind {
    /// Kinds that report a second object and its name.
    #[inline(always)]
    pub const fn carries_destination(self) -> bool {
        matches!(self, EventKind::Rename | EventKind::Mkdir | EventKind::Create)
    }
}

/// Set in [`RawEvent::flags`] when a rename replaced an existing entry.
pub const FLAG_REPLACED: u32 = 1 << 0;

/// Fixed-layout record pushed through the perf event array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RawEvent {
    pub kind: i32,
    pub pid: u32,
    pub uid: u32,
    pub flags: u32,
    pub subject_inode: u64,
    pub subject_device: u64,
    pub dest_inode: u64,
    pub dest_device: u64,
    pub process_name: [u8; TASK_COMM_LEN],
    pub object_name: [u8; NAME_LEN],
}

const _: () = assert!(RawEvent::SIZE == 96);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireError {
    Truncated(usize),
    UnknownKind(i32),
}

impl core::fmt::Display for WireError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WireError::Truncated(len) => {
                write!(f, "record of {} bytes is shorter than {}", len, RawEvent::SIZE)
            }
            WireError::UnknownKind(kind) => write!(f, "unknown event kind {}", kind),
        }
    }
}

impl core::error::Error for WireError {}

struct Cursor<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.at..self.at + N]);
        self.at += N;
        out
    }
}

impl RawEvent {
    pub const SIZE: usize = size_of::<Self>();

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let mut at = 0;
        let mut put = |bytes: &[u8]| {
            out[at..at + bytes.len()].copy_from_slice(bytes);
            at += bytes.len();
        };
        put(&self.kind.to_ne_bytes());
        put(&self.pid.to_ne_bytes());
        put(&self.uid.to_ne_bytes());
        put(&self.flags.to_ne_bytes());
        put(&self.subject_inode.to_ne_bytes());
        put(&self.subject_device.to_ne_bytes());
        put(&self.dest_inode.to_ne_bytes());
        put(&self.dest_device.to_ne_bytes());
        put(&self.process_name);
        put(&self.object_name);
        out
    }

    /// Parse a record as read from a perf buffer. Trailing bytes are
    /// perf padding and are ignored.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::SIZE {
            return Err(WireError::Truncated(buf.len()));
        }
        let mut c = Cursor { buf, at: 0 };
        Ok(Self {
            kind: i32::from_ne_bytes(c.take()),
            pid: u32::from_ne_bytes(c.take()),
            uid: u32::from_ne_bytes(c.take()),
            flags: u32::from_ne_bytes(c.take()),
            subject_inode: u64::from_ne_bytes(c.take()),
            subject_device: u64::from_ne_bytes(c.take()),
            dest_inode: u64::from_ne_bytes(c.take()),
            dest_device: u64::from_ne_bytes(c.take()),
            process_name: c.take(),
            object_name: c.take(),
        })
    }
}

/// A matched filesystem mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MutationEvent {
    pub kind: EventKind,
    pub pid: u32,
    pub uid: u32,
    pub subject: FsIdentity,
    pub dest: Option<FsIdentity>,
    /// Rename only: `dest` is the entry that was replaced, not the
    /// receiving directory.
    pub replaced: bool,
    pub process_name: [u8; TASK_COMM_LEN],
    pub object_name: Option<[u8; NAME_LEN]>,
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

impl MutationEvent {
    #[inline(always)]
    pub fn encode(&self) -> RawEvent {
        let dest = self.dest.unwrap_or_default();
        RawEvent {
            kind: self.kind.into(),
            pid: self.pid,
            uid: self.uid,
            flags: match self.replaced {
                true => FLAG_REPLACED,
                false => 0,
            },
            subject_inode: self.subject.inode,
            subject_device: self.subject.device,
            dest_inode: dest.inode,
            dest_device: dest.device,
            process_name: self.process_name,
            object_name: self.object_name.unwrap_or([0u8; NAME_LEN]),
        }
    }

    pub fn decode(raw: &RawEvent) -> Result<Self, WireError> {
        let kind =
            EventKind::try_from_primitive(raw.kind).map_err(|_| WireError::UnknownKind(raw.kind))?;
        let (dest, object_name) = match kind.carries_destination() {
            true => (
                Some(FsIdentity::new(raw.dest_inode, raw.dest_device)),
                Some(raw.object_name),
            ),
            false => (None, None),
        };
        Ok(Self {
            kind,
            pid: raw.pid,
            uid: raw.uid,
            subject: FsIdentity::new(raw.subject_inode, raw.subject_device),
            dest,
            replaced: kind == EventKind::Rename && raw.flags & FLAG_REPLACED != 0,
            process_name: raw.process_name,
            object_name,
        })
    }

    pub fn process_name(&self) -> &[u8] {
        until_nul(&self.process_name)
    }

    pub fn object_name(&self) -> Option<&[u8]> {
        self.object_name.as_ref().map(|name| until_nul(name))
    }
}
