//! The instrumented output archive.
//!
//! Instrumented modules are consensus-relevant, so the archive must be
//! byte-for-byte deterministic: entries are stored uncompressed in class-name
//! order, with zeroed DOS timestamps and no extra fields or comments.

use crate::error::Result;
use crate::instrument::InstrumentedClass;
use log::debug;
use once_cell::sync::Lazy;
use std::path::Path;

/// The set of instrumented classes of one archive.
#[derive(Debug, Clone)]
pub struct InstrumentedJar {
    classes: Vec<InstrumentedClass>,
}

impl InstrumentedJar {
    /// Collects instrumented classes into an archive, fixing the entry order.
    pub fn new(mut classes: Vec<InstrumentedClass>) -> Self {
        classes.sort_by(|a, b| a.name().cmp(b.name()));
        Self { classes }
    }

    /// The instrumented classes, in entry order.
    pub fn classes(&self) -> impl Iterator<Item = &InstrumentedClass> {
        self.classes.iter()
    }

    /// Serializes the archive into an in-memory zip byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut central = Vec::new();
        let mut entry_count = 0u16;
        for class in &self.classes {
            let name = format!("{}.class", class.name());
            let data = class.to_bytes()?;
            debug!("archiving {name} ({} bytes)", data.len());
            let offset = out.len() as u32;
            let crc = crc32(&data);
            local_header(&mut out, &name, crc, data.len() as u32);
            out.extend_from_slice(&data);
            central_header(&mut central, &name, crc, data.len() as u32, offset);
            entry_count += 1;
        }
        let central_offset = out.len() as u32;
        out.extend_from_slice(&central);
        end_of_central_directory(&mut out, entry_count, central.len() as u32, central_offset);
        Ok(out)
    }

    /// Serializes the archive to disk.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn local_header(out: &mut Vec<u8>, name: &str, crc: u32, size: u32) {
    put_u32(out, 0x04034B50);
    put_u16(out, 10); // version needed: stored entries only
    put_u16(out, 0); // flags
    put_u16(out, 0); // method: stored
    put_u16(out, 0); // modification time, fixed
    put_u16(out, 0); // modification date, fixed
    put_u32(out, crc);
    put_u32(out, size); // compressed
    put_u32(out, size); // uncompressed
    put_u16(out, name.len() as u16);
    put_u16(out, 0); // extra field length
    out.extend_from_slice(name.as_bytes());
}

fn central_header(out: &mut Vec<u8>, name: &str, crc: u32, size: u32, local_offset: u32) {
    put_u32(out, 0x02014B50);
    put_u16(out, 10); // version made by
    put_u16(out, 10); // version needed
    put_u16(out, 0); // flags
    put_u16(out, 0); // method: stored
    put_u16(out, 0); // modification time, fixed
    put_u16(out, 0); // modification date, fixed
    put_u32(out, crc);
    put_u32(out, size);
    put_u32(out, size);
    put_u16(out, name.len() as u16);
    put_u16(out, 0); // extra field length
    put_u16(out, 0); // comment length
    put_u16(out, 0); // disk number
    put_u16(out, 0); // internal attributes
    put_u32(out, 0); // external attributes
    put_u32(out, local_offset);
    out.extend_from_slice(name.as_bytes());
}

fn end_of_central_directory(out: &mut Vec<u8>, entries: u16, central_size: u32, central_offset: u32) {
    put_u32(out, 0x06054B50);
    put_u16(out, 0); // disk number
    put_u16(out, 0); // disk with the central directory
    put_u16(out, entries);
    put_u16(out, entries);
    put_u32(out, central_size);
    put_u32(out, central_offset);
    put_u16(out, 0); // comment length
}

static CRC_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = i as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { 0xEDB8_8320 ^ (crc >> 1) } else { crc >> 1 };
        }
        *entry = crc;
    }
    table
});

/// CRC-32 (IEEE) of the given bytes, as required by the zip entry headers.
fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::defs::access_flags::{ACC_PUBLIC, ACC_STATIC};
    use crate::classfile::{ClassFile, Code, Insn, MethodInfo, MethodType};
    use crate::config::GasCostModel;
    use crate::instrument::instrument_class;
    use crate::verification::{ClassTags, VerifiedClass};

    fn instrumented(name: &str) -> InstrumentedClass {
        let mut class = ClassFile::new(name, "java/lang/Object");
        let mut code = Code::new();
        code.push(Insn::Return(None));
        class.methods.push(MethodInfo::new(
            ACC_PUBLIC | ACC_STATIC,
            "run",
            MethodType::parse("()V").unwrap(),
            code,
        ));
        let gas = GasCostModel::default();
        instrument_class(VerifiedClass::new(class, ClassTags::default()), &gas).unwrap()
    }

    #[test]
    fn test_crc32_reference_vectors() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_entries_are_sorted_by_class_name() {
        let jar = InstrumentedJar::new(vec![instrumented("test/B"), instrumented("test/A")]);
        let names: Vec<_> = jar.classes().map(|c| c.name()).collect();
        assert_eq!(names, vec!["test/A", "test/B"]);
        let bytes = jar.to_bytes().unwrap();
        // the first local header names the first entry
        assert_eq!(&bytes[30..42], b"test/A.class");
    }

    #[test]
    fn test_timestamps_are_zero_and_entries_stored() {
        let jar = InstrumentedJar::new(vec![instrumented("test/A")]);
        let bytes = jar.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &0x04034B50u32.to_le_bytes());
        // method, time and date fields of the local header
        assert_eq!(&bytes[8..14], &[0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let a = InstrumentedJar::new(vec![instrumented("test/A"), instrumented("test/B")]);
        let b = InstrumentedJar::new(vec![instrumented("test/B"), instrumented("test/A")]);
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn test_dump_agrees_with_to_bytes() {
        let jar = InstrumentedJar::new(vec![instrumented("test/A")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instrumented.jar");
        jar.dump(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), jar.to_bytes().unwrap());
    }
}
