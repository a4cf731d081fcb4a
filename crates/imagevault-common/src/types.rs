//! Core type definitions for image records.
//!
//! This module defines the record lifecycle status and the fixed disk and
//! container format sets. All enums serialize in lowercase, matching the
//! values stored in the database and exchanged with clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Lifecycle status of an image record.
///
/// Uploads move a record `queued -> saving -> active`; a failed upload
/// leaves it `killed`. Deletion marks `deleted` directly, or
/// `pending_delete` first when delayed byte removal is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Reserved; no content yet.
    Queued,
    /// Content transfer in progress.
    Saving,
    /// Content bound and servable.
    Active,
    /// Upload failed or could not be verified.
    Killed,
    /// Soft-deleted, byte removal deferred.
    PendingDelete,
    /// Soft-deleted.
    Deleted,
}

impl ImageStatus {
    /// Whether no further transitions are possible from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Killed | Self::Deleted)
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Saving => write!(f, "saving"),
            Self::Active => write!(f, "active"),
            Self::Killed => write!(f, "killed"),
            Self::PendingDelete => write!(f, "pending_delete"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for ImageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "saving" => Ok(Self::Saving),
            "active" => Ok(Self::Active),
            "killed" => Ok(Self::Killed),
            "pending_delete" => Ok(Self::PendingDelete),
            "deleted" => Ok(Self::Deleted),
            other => Err(Error::invalid(format!("unknown image status '{other}'"))),
        }
    }
}

/// Disk image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    /// Machine image (legacy kernel/ramdisk trio).
    Ami,
    /// Ramdisk image (legacy kernel/ramdisk trio).
    Ari,
    /// Kernel image (legacy kernel/ramdisk trio).
    Aki,
    Vhd,
    Vmdk,
    Raw,
    Qcow2,
    Vdi,
    Iso,
}

impl DiskFormat {
    /// Whether this format belongs to the legacy kernel/ramdisk/machine
    /// trio, whose disk and container formats must match.
    pub fn is_legacy_trio(self) -> bool {
        matches!(self, Self::Ami | Self::Ari | Self::Aki)
    }

    /// The container format paired with a legacy-trio disk format.
    pub fn paired_container(self) -> Option<ContainerFormat> {
        match self {
            Self::Ami => Some(ContainerFormat::Ami),
            Self::Ari => Some(ContainerFormat::Ari),
            Self::Aki => Some(ContainerFormat::Aki),
            _ => None,
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ami => "ami",
            Self::Ari => "ari",
            Self::Aki => "aki",
            Self::Vhd => "vhd",
            Self::Vmdk => "vmdk",
            Self::Raw => "raw",
            Self::Qcow2 => "qcow2",
            Self::Vdi => "vdi",
            Self::Iso => "iso",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DiskFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ami" => Ok(Self::Ami),
            "ari" => Ok(Self::Ari),
            "aki" => Ok(Self::Aki),
            "vhd" => Ok(Self::Vhd),
            "vmdk" => Ok(Self::Vmdk),
            "raw" => Ok(Self::Raw),
            "qcow2" => Ok(Self::Qcow2),
            "vdi" => Ok(Self::Vdi),
            "iso" => Ok(Self::Iso),
            other => Err(Error::invalid(format!(
                "invalid disk format '{other}' for image"
            ))),
        }
    }
}

/// Container format wrapping the disk image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// Machine image (legacy kernel/ramdisk trio).
    Ami,
    /// Ramdisk image (legacy kernel/ramdisk trio).
    Ari,
    /// Kernel image (legacy kernel/ramdisk trio).
    Aki,
    /// No container, raw contents.
    Bare,
    /// Open Virtualization Format.
    Ovf,
}

impl ContainerFormat {
    /// Whether this format belongs to the legacy kernel/ramdisk/machine
    /// trio, whose disk and container formats must match.
    pub fn is_legacy_trio(self) -> bool {
        matches!(self, Self::Ami | Self::Ari | Self::Aki)
    }

    /// The disk format paired with a legacy-trio container format.
    pub fn paired_disk(self) -> Option<DiskFormat> {
        match self {
            Self::Ami => Some(DiskFormat::Ami),
            Self::Ari => Some(DiskFormat::Ari),
            Self::Aki => Some(DiskFormat::Aki),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ami => "ami",
            Self::Ari => "ari",
            Self::Aki => "aki",
            Self::Bare => "bare",
            Self::Ovf => "ovf",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ContainerFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ami" => Ok(Self::Ami),
            "ari" => Ok(Self::Ari),
            "aki" => Ok(Self::Aki),
            "bare" => Ok(Self::Bare),
            "ovf" => Ok(Self::Ovf),
            other => Err(Error::invalid(format!(
                "invalid container format '{other}' for image"
            ))),
        }
    }
}
