//! Minimal JVM class-file reader.
//!
//! Only the constant pool, the access flags, the class and superclass
//! indices and the interface table are decoded; the rest of the file is
//! never read.

use thiserror::Error;

/// `ACC_SYNTHETIC` access flag.
pub const ACC_SYNTHETIC: u16 = 0x1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassParseError {
    #[error("unexpected end of class file")]
    UnexpectedEof,
    #[error("invalid class file magic header")]
    InvalidMagic,
    #[error("unsupported constant pool tag {tag}")]
    UnsupportedConstant { tag: u8 },
    #[error("invalid constant pool index {index}")]
    InvalidConstantIndex { index: u16 },
}

/// The parts of a class file needed for indexing. Names are internal
/// (`/`-separated) names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    pub access_flags: u16,
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
}

impl ClassHeader {
    pub fn is_synthetic(&self) -> bool {
        self.access_flags & ACC_SYNTHETIC != 0
    }
}

pub fn parse_class_header(bytes: &[u8]) -> Result<ClassHeader, ClassParseError> {
    let mut reader = ClassReader::new(bytes);
    reader.expect_magic()?;
    let _minor_version = reader.read_u2()?;
    let _major_version = reader.read_u2()?;
    let pool = ConstantPool::parse(&mut reader)?;

    let access_flags = reader.read_u2()?;
    let this_class = pool.class_name(reader.read_u2()?)?;
    let super_index = reader.read_u2()?;
    // java/lang/Object has no superclass
    let super_class = if super_index == 0 {
        None
    } else {
        Some(pool.class_name(super_index)?)
    };

    let interfaces_count = reader.read_u2()?;
    let mut interfaces = Vec::with_capacity(interfaces_count as usize);
    for _ in 0..interfaces_count {
        interfaces.push(pool.class_name(reader.read_u2()?)?);
    }

    Ok(ClassHeader {
        access_flags,
        this_class,
        super_class,
        interfaces,
    })
}

enum Constant {
    Unusable,
    Utf8(String),
    Class { name_index: u16 },
    Other,
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn parse(reader: &mut ClassReader<'_>) -> Result<Self, ClassParseError> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable); // index 0 unused

        let mut index = 1;
        while index < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                1 => {
                    let length = reader.read_u2()? as usize;
                    let bytes = reader.read_slice(length)?;
                    // modified UTF-8; lossy is fine for class names
                    Constant::Utf8(String::from_utf8_lossy(bytes).into_owned())
                }
                7 => Constant::Class {
                    name_index: reader.read_u2()?,
                },
                3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => {
                    reader.skip(4)?;
                    Constant::Other
                }
                5 | 6 => {
                    // long and double take two slots
                    reader.skip(8)?;
                    entries.push(Constant::Other);
                    index += 1;
                    Constant::Unusable
                }
                8 | 16 | 19 | 20 => {
                    reader.skip(2)?;
                    Constant::Other
                }
                15 => {
                    reader.skip(3)?;
                    Constant::Other
                }
                other => return Err(ClassParseError::UnsupportedConstant { tag: other }),
            };
            entries.push(entry);
            index += 1;
        }

        Ok(Self { entries })
    }

    fn utf8(&self, index: u16) -> Result<&str, ClassParseError> {
        match self.entries.get(index as usize) {
            Some(Constant::Utf8(value)) => Ok(value.as_str()),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    fn class_name(&self, index: u16) -> Result<String, ClassParseError> {
        match self.entries.get(index as usize) {
            Some(Constant::Class { name_index }) => Ok(self.utf8(*name_index)?.to_string()),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }
}

struct ClassReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ClassReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn expect_magic(&mut self) -> Result<(), ClassParseError> {
        const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];
        if self.read_slice(4)? != MAGIC {
            return Err(ClassParseError::InvalidMagic);
        }
        Ok(())
    }

    fn read_u1(&mut self) -> Result<u8, ClassParseError> {
        Ok(self.read_slice(1)?[0])
    }

    fn read_u2(&mut self) -> Result<u16, ClassParseError> {
        let b = self.read_slice(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], ClassParseError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassParseError::UnexpectedEof)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), ClassParseError> {
        self.read_slice(len).map(|_| ())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ClassBuilder;
    use super::*;

    #[test]
    fn test_parse_header() {
        let bytes = ClassBuilder::new().build(
            0x0021,
            "javax/activation/CommandInfo$Beans",
            Some("java/lang/Object"),
            &["java/io/Serializable"],
        );
        let header = parse_class_header(&bytes).unwrap();
        assert_eq!(header.this_class, "javax/activation/CommandInfo$Beans");
        assert_eq!(header.super_class.as_deref(), Some("java/lang/Object"));
        assert_eq!(header.interfaces, vec!["java/io/Serializable"]);
        assert!(!header.is_synthetic());
    }

    #[test]
    fn test_synthetic_flag() {
        let bytes = ClassBuilder::new().build(0x1000, "a/B$1", Some("java/lang/Object"), &[]);
        assert!(parse_class_header(&bytes).unwrap().is_synthetic());
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        assert_eq!(
            parse_class_header(&[0, 1, 2, 3, 0, 0, 0, 0]),
            Err(ClassParseError::InvalidMagic)
        );
        let bytes = ClassBuilder::new().build(0, "a/B", None, &[]);
        assert_eq!(
            parse_class_header(&bytes[..bytes.len() - 12]),
            Err(ClassParseError::UnexpectedEof)
        );
    }
}
