use crate::Result;
use memmap::{MmapMut, MmapOptions};
use std::{
    fs::{File, OpenOptions},
    path::Path,
};
use tempfile::tempfile;

/// A file that is memory mapped in full and can grow
pub struct MappedFile {
    file: File,
    map: MmapMut,
}

impl MappedFile {
    /// Creates (or truncates) the file at `path` with `initial_len` zeroed bytes
    pub fn create<P>(path: P, initial_len: usize) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::with_file(file, initial_len)
    }

    /// Maps the existing file at `path`
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = Self::map(&file)?;
        Ok(MappedFile { file, map })
    }

    /// An anonymous file that is removed once dropped
    pub fn temporary(initial_len: usize) -> Result<Self> {
        Self::with_file(tempfile()?, initial_len)
    }

    fn with_file(file: File, initial_len: usize) -> Result<Self> {
        // zero-length files can't be mapped
        file.set_len(initial_len.max(1) as u64)?;
        let map = Self::map(&file)?;
        Ok(MappedFile { file, map })
    }

    fn map(file: &File) -> Result<MmapMut> {
        let map = unsafe { MmapOptions::new().map_mut(file)? };
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Grows the file by doubling until it holds at least `required` bytes
    pub fn ensure_len(&mut self, required: usize) -> Result<()> {
        if required <= self.map.len() {
            return Ok(());
        }
        let mut new_len = self.map.len().max(1);
        while new_len < required {
            new_len *= 2;
        }
        self.map.flush()?;
        self.file.set_len(new_len as u64)?;
        self.map = Self::map(&self.file)?;
        log::debug!("Grew mapped file to {} bytes", new_len);
        Ok(())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Writes all changes back to the file
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grow_keeps_contents() {
        let mut file = MappedFile::temporary(16).expect("temp file");
        assert_eq!(16, file.len());
        file.bytes_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        file.ensure_len(100).expect("grow");
        assert_eq!(128, file.len());
        assert_eq!(&[1, 2, 3, 4], &file.bytes()[..4]);
        assert!(file.bytes()[4..].iter().all(|b| *b == 0));
        file.ensure_len(50).expect("no-op");
        assert_eq!(128, file.len());
    }

    #[test]
    fn test_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("mapped.dat");
        {
            let mut file = MappedFile::create(&path, 8).expect("create");
            file.bytes_mut()[7] = 42;
            file.flush().expect("flush");
        }
        let file = MappedFile::open(&path).expect("open");
        assert_eq!(8, file.len());
        assert_eq!(42, file.bytes()[7]);
    }
}
