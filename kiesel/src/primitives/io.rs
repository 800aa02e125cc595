//! File primitives, addressed by name through the external-call index.
//! Handles 0/1/2 are the stdio descriptors; everything above them lives
//! in the per-machine file registry.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

use crate::interpreter::{Machine, Unwind};
use crate::primitives::{
    expect_index, expect_small, fail, NamedPrimitive, PrimitiveDesc,
    PrimitiveSet,
};
use crate::value::Object;

const STDIN_HANDLE: i64 = 0;
const STDOUT_HANDLE: i64 = 1;
const STDERR_HANDLE: i64 = 2;

/// Open files keyed by the small-integer handles handed to the image.
/// Handles are never reused within one machine.
pub struct FileRegistry {
    next_handle: i64,
    files: HashMap<i64, File>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self {
            next_handle: STDERR_HANDLE + 1,
            files: HashMap::new(),
        }
    }

    pub fn insert(&mut self, file: File) -> i64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.files.insert(handle, file);
        handle
    }

    pub fn get_mut(&mut self, handle: i64) -> Option<&mut File> {
        self.files.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: i64) -> Option<File> {
        self.files.remove(&handle)
    }
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn set() -> PrimitiveSet {
    PrimitiveSet {
        name: "io",
        indexed: Vec::new(),
        named: vec![
            NamedPrimitive::new(
                "FilePlugin",
                "primitiveFileOpen",
                PrimitiveDesc::new("file_open", 2, file_open),
            ),
            NamedPrimitive::new(
                "FilePlugin",
                "primitiveFileClose",
                PrimitiveDesc::new("file_close", 1, file_close),
            ),
            NamedPrimitive::new(
                "FilePlugin",
                "primitiveFileRead",
                PrimitiveDesc::new("file_read", 4, file_read),
            ),
            NamedPrimitive::new(
                "FilePlugin",
                "primitiveFileWrite",
                PrimitiveDesc::new("file_write", 4, file_write),
            ),
            NamedPrimitive::new(
                "FilePlugin",
                "primitiveFileSize",
                PrimitiveDesc::new("file_size", 1, file_size),
            ),
            NamedPrimitive::new(
                "FilePlugin",
                "primitiveFileStdioHandles",
                PrimitiveDesc::new("file_stdio_handles", 0, stdio_handles),
            ),
        ],
        ranged: None,
    }
}

/// Open the named file and answer a fresh handle. A true second argument
/// opens for writing, creating the file when absent.
pub fn file_open(
    machine: &mut Machine,
    _receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let [name, writable] = args else {
        return Err(fail());
    };
    let name = name.as_byte_string().ok_or_else(fail)?;
    let writable = writable.as_bool().ok_or_else(fail)?;
    let mut options = OpenOptions::new();
    options.read(true);
    if writable {
        options.write(true).create(true);
    }
    match options.open(&name) {
        Ok(file) => Ok(Object::SmallInt(machine.files.insert(file))),
        Err(_) => Err(fail()),
    }
}

pub fn file_close(
    machine: &mut Machine,
    receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let [handle] = args else {
        return Err(fail());
    };
    match machine.files.remove(expect_small(handle)?) {
        Some(_) => Ok(receiver),
        None => Err(fail()),
    }
}

/// Read up to `count` bytes into `buffer` starting at the 1-based `start`
/// index. Answers the number of bytes read, which may be short at end of
/// input.
pub fn file_read(
    machine: &mut Machine,
    _receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let [handle, buffer, start, count] = args else {
        return Err(fail());
    };
    let handle = expect_small(handle)?;
    let Object::Bytes(buffer) = buffer else {
        return Err(fail());
    };
    let start = expect_index(start)? - 1;
    let count = expect_small(count)?;
    if count < 0 {
        return Err(fail());
    }
    let mut buffer = buffer.borrow_mut();
    let end = start.checked_add(count as usize).ok_or_else(fail)?;
    let slice = buffer.bytes.get_mut(start..end).ok_or_else(fail)?;
    let read = match handle {
        STDIN_HANDLE => std::io::stdin().read(slice),
        STDOUT_HANDLE | STDERR_HANDLE => return Err(fail()),
        _ => match machine.files.get_mut(handle) {
            Some(file) => file.read(slice),
            None => return Err(fail()),
        },
    };
    match read {
        Ok(read) => Ok(Object::SmallInt(read as i64)),
        Err(_) => Err(fail()),
    }
}

/// Write `count` bytes from `buffer` starting at the 1-based `start`
/// index. Answers the number of bytes written.
pub fn file_write(
    machine: &mut Machine,
    _receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let [handle, buffer, start, count] = args else {
        return Err(fail());
    };
    let handle = expect_small(handle)?;
    let Object::Bytes(buffer) = buffer else {
        return Err(fail());
    };
    let start = expect_index(start)? - 1;
    let count = expect_small(count)?;
    if count < 0 {
        return Err(fail());
    }
    let buffer = buffer.borrow();
    let end = start.checked_add(count as usize).ok_or_else(fail)?;
    let slice = buffer.bytes.get(start..end).ok_or_else(fail)?;
    let written = match handle {
        STDIN_HANDLE => return Err(fail()),
        STDOUT_HANDLE => {
            let mut out = std::io::stdout();
            out.write_all(slice).and_then(|()| out.flush())
        }
        STDERR_HANDLE => std::io::stderr().write_all(slice),
        _ => match machine.files.get_mut(handle) {
            Some(file) => file.write_all(slice),
            None => return Err(fail()),
        },
    };
    match written {
        Ok(()) => Ok(Object::SmallInt(count)),
        Err(_) => Err(fail()),
    }
}

/// The stdio streams have no measurable size; registry files report their
/// on-disk length.
pub fn file_size(
    machine: &mut Machine,
    _receiver: Object,
    args: &[Object],
) -> Result<Object, Unwind> {
    let [handle] = args else {
        return Err(fail());
    };
    match expect_small(handle)? {
        0..=STDERR_HANDLE => Ok(Object::SmallInt(0)),
        handle => match machine.files.get_mut(handle) {
            Some(file) => match file.metadata() {
                Ok(meta) => {
                    let size =
                        i64::try_from(meta.len()).map_err(|_| fail())?;
                    Ok(Object::SmallInt(size))
                }
                Err(_) => Err(fail()),
            },
            None => Err(fail()),
        },
    }
}

pub fn stdio_handles(
    machine: &mut Machine,
    _receiver: Object,
    _args: &[Object],
) -> Result<Object, Unwind> {
    Ok(machine.image.new_array(vec![
        Object::SmallInt(0),
        Object::SmallInt(STDOUT_HANDLE),
        Object::SmallInt(STDERR_HANDLE),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    #[test]
    fn writes_to_unknown_handles_fail() {
        let mut m = Machine::new(Image::bootstrap());
        let buffer = m.image.new_string("hello");
        let args = [
            Object::SmallInt(7),
            buffer,
            Object::SmallInt(1),
            Object::SmallInt(5),
        ];
        assert!(file_write(&mut m, Object::Nil, &args).is_err());
    }

    #[test]
    fn out_of_range_slices_fail() {
        let mut m = Machine::new(Image::bootstrap());
        let buffer = m.image.new_string("hi");
        let args = [
            Object::SmallInt(STDOUT_HANDLE),
            buffer,
            Object::SmallInt(2),
            Object::SmallInt(5),
        ];
        assert!(file_write(&mut m, Object::Nil, &args).is_err());
    }

    #[test]
    fn reads_from_non_stdin_handles_fail() {
        let mut m = Machine::new(Image::bootstrap());
        let buffer = m.image.new_string("....");
        let args = [
            Object::SmallInt(STDOUT_HANDLE),
            buffer,
            Object::SmallInt(1),
            Object::SmallInt(4),
        ];
        assert!(file_read(&mut m, Object::Nil, &args).is_err());
    }

    #[test]
    fn stdio_sizes_are_zero() {
        let mut m = Machine::new(Image::bootstrap());
        assert!(matches!(
            file_size(&mut m, Object::Nil, &[Object::SmallInt(1)]),
            Ok(Object::SmallInt(0))
        ));
        assert!(
            file_size(&mut m, Object::Nil, &[Object::SmallInt(9)]).is_err()
        );
    }

    #[test]
    fn registry_files_roundtrip() {
        let mut m = Machine::new(Image::bootstrap());
        let path = std::env::temp_dir().join("kiesel-io-roundtrip.txt");
        let _ = std::fs::remove_file(&path);
        let name = m.image.new_string(path.to_str().unwrap());

        let Ok(Object::SmallInt(handle)) =
            file_open(&mut m, Object::Nil, &[name.clone(), Object::True])
        else {
            panic!("open for writing failed");
        };
        let data = m.image.new_string("hello");
        let args = [
            Object::SmallInt(handle),
            data,
            Object::SmallInt(1),
            Object::SmallInt(5),
        ];
        assert!(matches!(
            file_write(&mut m, Object::Nil, &args),
            Ok(Object::SmallInt(5))
        ));
        assert!(matches!(
            file_size(&mut m, Object::Nil, &[Object::SmallInt(handle)]),
            Ok(Object::SmallInt(5))
        ));
        file_close(&mut m, Object::Nil, &[Object::SmallInt(handle)])
            .unwrap();
        assert!(file_close(
            &mut m,
            Object::Nil,
            &[Object::SmallInt(handle)]
        )
        .is_err());

        let Ok(Object::SmallInt(handle)) =
            file_open(&mut m, Object::Nil, &[name, Object::False])
        else {
            panic!("reopen for reading failed");
        };
        let buffer = m.image.new_string(".....");
        let args = [
            Object::SmallInt(handle),
            buffer.clone(),
            Object::SmallInt(1),
            Object::SmallInt(5),
        ];
        assert!(matches!(
            file_read(&mut m, Object::Nil, &args),
            Ok(Object::SmallInt(5))
        ));
        assert_eq!(buffer.as_byte_string().unwrap(), "hello");
        file_close(&mut m, Object::Nil, &[Object::SmallInt(handle)])
            .unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
