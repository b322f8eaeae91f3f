//! Kernel structure layout injected into the probes at startup.
//!
//! Field offsets of `struct file`, `struct dentry`, `struct inode` and
//! `struct super_block` move between kernel builds, as do the argument
//! positions of the hooked VFS functions. The loader resolves a
//! [`KernelLayout`] before attaching and writes it into the `CONFIG` map;
//! the probes never hard-code an offset.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// How `vfs_rename` receives its operands.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum RenameConvention {
    /// `vfs_rename(old_dir, old_dentry, new_dir, new_dentry, ...)`, before 5.12.
    Positional = 0,
    /// `vfs_rename(struct renamedata *rd)`, 5.12 and later.
    RenameData = 1,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "user",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct KernelLayout {
    pub file_f_path_dentry: u32,
    pub file_f_inode: u32,
    pub file_f_flags: u32,
    pub path_dentry: u32,
    pub dentry_d_parent: u32,
    /// Offset of `d_name.name`, the pointer inside the embedded `qstr`.
    pub dentry_d_name: u32,
    pub dentry_d_inode: u32,
    pub inode_i_mode: u32,
    pub inode_i_sb: u32,
    pub inode_i_ino: u32,
    pub super_block_s_dev: u32,
    /// Argument index of the victim dentry in `vfs_unlink`.
    pub unlink_dentry_arg: u32,
    /// Argument index of the victim dentry in `vfs_rmdir`.
    pub rmdir_dentry_arg: u32,
    /// A [`RenameConvention`] discriminant.
    pub rename_convention: u32,
    pub renamedata_old_dentry: u32,
    pub renamedata_new_dir: u32,
    pub renamedata_new_dentry: u32,
}

impl Default for KernelLayout {
    /// x86_64, 6.x series with the idmapped VFS signatures.
    fn default() -> Self {
        Self {
            file_f_path_dentry: 24,
            file_f_inode: 32,
            file_f_flags: 64,
            path_dentry: 8,
            dentry_d_parent: 24,
            dentry_d_name: 40,
            dentry_d_inode: 48,
            inode_i_mode: 0,
            inode_i_sb: 40,
            inode_i_ino: 64,
            super_block_s_dev: 16,
            unlink_dentry_arg: 2,
            rmdir_dentry_arg: 2,
            rename_convention: RenameConvention::RenameData as u32,
            renamedata_old_dentry: 16,
            renamedata_new_dir: 32,
            renamedata_new_dentry: 40,
        }
    }
}

impl KernelLayout {
    pub fn rename_convention(&self) -> Option<RenameConvention> {
        RenameConvention::try_from_primitive(self.rename_convention).ok()
    }
}

pub const FLAG_STRICT_DEVICE: u32 = 1 << 0;

/// Single entry of the `CONFIG` array map.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProbeConfig {
    pub layout: KernelLayout,
    pub flags: u32,
}

impl ProbeConfig {
    pub const fn new(layout: KernelLayout, flags: u32) -> Self {
        Self { layout, flags }
    }

    /// Unlink, rmdir and mkdir verify the stored device too.
    #[inline(always)]
    pub fn strict_device(&self) -> bool {
        self.flags & FLAG_STRICT_DEVICE != 0
    }
}
