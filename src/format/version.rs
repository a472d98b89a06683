use std::fmt;
use std::io::{self, Write};

use byteorder::WriteBytesExt;
use num_enum::{FromPrimitive, IntoPrimitive};
use winnow::{binary::le_u8, seq, PResult, Parser, Partial};

/// A zip version (either created by, or required when reading an archive).
///
/// Versions determine which features are supported by a tool, and
/// which features are required when reading a file.
///
/// For more information, see the [.ZIP Application Note](https://support.pkware.com/display/PKZIP/APPNOTE), section 4.4.2.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    /// The host system on which the archive was created
    pub host_system: HostSystem,

    /// Integer version, e.g. 45 for Zip version 4.5
    /// See APPNOTE, section 4.4.2.1
    pub version: u8,
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} v{}.{}",
            self.host_system,
            self.version / 10,
            self.version % 10
        )
    }
}

impl Version {
    /// Version 1.0: stored entries, no frills.
    pub const BASE: u8 = 10;
    /// Version 2.0: deflate, directories, traditional encryption.
    pub const DEFLATE: u8 = 20;
    /// Version 4.5: zip64 extensions.
    pub const ZIP64: u8 = 45;

    /// Parse a version from a byte slice
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        seq! {Self {
            version: le_u8,
            host_system: le_u8.map(HostSystem::from),
        }}
        .parse_next(i)
    }

    /// Serialize, mirroring [Version::parser]
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.version)?;
        w.write_u8(self.host_system.into())
    }

    /// A version made on this build's host system.
    pub fn host(version: u8) -> Self {
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                let host_system = HostSystem::WindowsNtfs;
            } else if #[cfg(target_os = "macos")] {
                let host_system = HostSystem::Osx;
            } else {
                let host_system = HostSystem::Unix;
            }
        }
        Self {
            host_system,
            version,
        }
    }
}

/// System on which an archive was created, as encoded into a version u16.
///
/// This follows the Info-ZIP interpretation of the "version made by" high
/// byte, which diverges from PKWARE's own table above value 9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HostSystem {
    /// MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
    MsDos = 0,

    /// Amiga
    Amiga = 1,

    /// OpenVMS
    OpenVms = 2,

    /// UNIX
    Unix = 3,

    /// VM/CMS
    VmCms = 4,

    /// Atari ST
    AtariSt = 5,

    /// OS/2 H.P.F.S
    Os2Hpfs = 6,

    /// Macintosh (pre-OSX)
    Macintosh = 7,

    /// Z-System
    ZSystem = 8,

    /// CP/M
    CpM = 9,

    /// TOPS-20
    Tops20 = 10,

    /// Windows NTFS
    WindowsNtfs = 11,

    /// QDOS
    Qdos = 12,

    /// Acorn RISC OS
    AcornRiscos = 13,

    /// VFAT
    Vfat = 14,

    /// MVS (OS/390 - Z/OS)
    Mvs = 15,

    /// BeOS
    BeOs = 16,

    /// Tandem
    Tandem = 17,

    /// THEOS
    Theos = 18,

    /// OS X (Darwin)
    Osx = 19,

    /// Unknown host system
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl HostSystem {
    /// Whether entries made on this system may carry a symlink target.
    pub fn supports_symlinks(self) -> bool {
        matches!(
            self,
            HostSystem::Unix
                | HostSystem::Osx
                | HostSystem::BeOs
                | HostSystem::OpenVms
                | HostSystem::AtariSt
        )
    }

    /// Whether this system stores a UNIX mode in the external attributes'
    /// high 16 bits.
    pub fn has_unix_attributes(self) -> bool {
        matches!(
            self,
            HostSystem::Unix | HostSystem::Osx | HostSystem::Macintosh | HostSystem::BeOs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_round_trip() {
        let v = Version {
            host_system: HostSystem::Unix,
            version: 45,
        };
        let mut out = Vec::new();
        v.write_to(&mut out).unwrap();
        assert_eq!(out, vec![45, 3]);

        let parsed = Version::parser
            .parse_peek(Partial::new(&out[..]))
            .unwrap()
            .1;
        assert_eq!(parsed, v);
    }

    #[test]
    fn unknown_host_system_survives() {
        let hs = HostSystem::from(42u8);
        assert_eq!(hs, HostSystem::Unknown(42));
        assert_eq!(u8::from(hs), 42);
    }
}
