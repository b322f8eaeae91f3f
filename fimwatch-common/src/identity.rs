use core::fmt::Display;

use crate::device::encode_kernel_dev;
use crate::layout::KernelLayout;
use crate::memory::{field_addr, read_ptr, Fault, KernelMemory};
use crate::NAME_LEN;

//include/uapi/linux/stat.h
pub const S_IFMT: u16 = 0o170000;
pub const S_IFSOCK: u16 = 0o140000;
pub const S_IFBLK: u16 = 0o060000;
pub const S_IFDIR: u16 = 0o040000;
pub const S_IFCHR: u16 = 0o020000;
pub const S_IFIFO: u16 = 0o010000;

/// Sockets, devices and FIFOs carry no file content worth watching.
#[inline(always)]
pub const fn is_special(mode: u16) -> bool {
    matches!(mode & S_IFMT, S_IFSOCK | S_IFBLK | S_IFCHR | S_IFIFO)
}

#[inline(always)]
pub const fn is_dir(mode: u16) -> bool {
    mode & S_IFMT == S_IFDIR
}

/// An object is uniquely identified by its (inode, device) pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct FsIdentity {
    pub inode: u64,
    pub device: u64,
}

impl Display for FsIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.device, self.inode)
    }
}

impl FsIdentity {
    pub const fn new(inode: u64, device: u64) -> Self {
        Self { inode, device }
    }
}

/// Operands of a `vfs_rename` call, as kernel addresses.
#[derive(Clone, Copy, Debug)]
pub struct RenameArgs {
    pub old_dentry: u64,
    pub new_dir: u64,
    pub new_dentry: u64,
}

/// Fixed-depth pointer chases over kernel objects.
///
/// Each accessor is one or two guarded reads at offsets taken from the
/// injected [`KernelLayout`]. A failed step fails the whole chain; nothing
/// here loops.
pub struct Resolver<'a, M> {
    mem: &'a M,
    layout: &'a KernelLayout,
}

impl<'a, M: KernelMemory> Resolver<'a, M> {
    pub fn new(mem: &'a M, layout: &'a KernelLayout) -> Self {
        Self { mem, layout }
    }

    pub fn layout(&self) -> &KernelLayout {
        self.layout
    }

    #[inline(always)]
    pub fn file_inode(&self, file: u64) -> Result<u64, Fault> {
        read_ptr(self.mem, file, self.layout.file_f_inode)
    }

    #[inline(always)]
    pub fn file_dentry(&self, file: u64) -> Result<u64, Fault> {
        read_ptr(self.mem, file, self.layout.file_f_path_dentry)
    }

    #[inline(always)]
    pub fn file_flags(&self, file: u64) -> Result<u32, Fault> {
        self.mem.read_u32(field_addr(file, self.layout.file_f_flags)?)
    }

    #[inline(always)]
    pub fn path_dentry(&self, path: u64) -> Result<u64, Fault> {
        read_ptr(self.mem, path, self.layout.path_dentry)
    }

    #[inline(always)]
    pub fn dentry_parent(&self, dentry: u64) -> Result<u64, Fault> {
        read_ptr(self.mem, dentry, self.layout.dentry_d_parent)
    }

    /// Inode behind a dentry; a negative dentry is a fault.
    #[inline(always)]
    pub fn dentry_inode(&self, dentry: u64) -> Result<u64, Fault> {
        read_ptr(self.mem, dentry, self.layout.dentry_d_inode)
    }

    /// Inode behind a dentry that may legitimately be negative.
    #[inline(always)]
    pub fn dentry_inode_opt(&self, dentry: u64) -> Result<Option<u64>, Fault> {
        match self.mem.read_u64(field_addr(dentry, self.layout.dentry_d_inode)?)? {
            0 => Ok(None),
            inode => Ok(Some(inode)),
        }
    }

    /// Copy the last path component of `dentry`, NUL padded.
    #[inline(always)]
    pub fn dentry_name(&self, dentry: u64) -> Result<[u8; NAME_LEN], Fault> {
        let name = read_ptr(self.mem, dentry, self.layout.dentry_d_name)?;
        let mut buf = [0u8; NAME_LEN];
        self.mem.read_str(name, &mut buf)?;
        Ok(buf)
    }

    #[inline(always)]
    pub fn inode_mode(&self, inode: u64) -> Result<u16, Fault> {
        self.mem.read_u16(field_addr(inode, self.layout.inode_i_mode)?)
    }

    /// Inode number; zero is never a valid identity.
    #[inline(always)]
    pub fn inode_number(&self, inode: u64) -> Result<u64, Fault> {
        match self.mem.read_u64(field_addr(inode, self.layout.inode_i_ino)?)? {
            0 => Err(Fault),
            ino => Ok(ino),
        }
    }

    /// `inode->i_sb->s_dev`, translated to the `st_dev` encoding.
    #[inline(always)]
    pub fn inode_device(&self, inode: u64) -> Result<u64, Fault> {
        let sb = read_ptr(self.mem, inode, self.layout.inode_i_sb)?;
        let s_dev = self.mem.read_u32(field_addr(sb, self.layout.super_block_s_dev)?)?;
        Ok(encode_kernel_dev(s_dev))
    }

    #[inline(always)]
    pub fn inode_identity(&self, inode: u64) -> Result<FsIdentity, Fault> {
        Ok(FsIdentity {
            inode: self.inode_number(inode)?,
            device: self.inode_device(inode)?,
        })
    }

    /// Unpack a `struct renamedata` pointer.
    #[inline(always)]
    pub fn rename_data(&self, rd: u64) -> Result<RenameArgs, Fault> {
        Ok(RenameArgs {
            old_dentry: read_ptr(self.mem, rd, self.layout.renamedata_old_dentry)?,
            new_dir: read_ptr(self.mem, rd, self.layout.renamedata_new_dir)?,
            new_dentry: read_ptr(self.mem, rd, self.layout.renamedata_new_dentry)?,
        })
    }
}
