use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;

use crate::common::{BlockNum, Oid, Result, StrataError, PAGE_SIZE};

/// Caches one open file per table object and performs block I/O on them.
///
/// Table `oid` lives in `<data_dir>/<oid>`; block `n` starts at byte
/// `n * PAGE_SIZE`. Reading a block past the end of the file yields zeros.
pub struct FileDescCache {
    data_dir: PathBuf,
    files: Mutex<HashMap<Oid, Arc<Mutex<File>>>>,
    /// Number of block reads performed
    num_reads: AtomicU64,
    /// Number of block writes performed
    num_writes: AtomicU64,
}

impl FileDescCache {
    /// Creates the cache, creating `data_dir` if it does not exist.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            files: Mutex::new(HashMap::new()),
            num_reads: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn table_file_path(&self, oid: Oid) -> PathBuf {
        self.data_dir.join(oid.to_string())
    }

    pub fn table_file_exists(&self, oid: Oid) -> bool {
        self.table_file_path(oid).is_file()
    }

    /// Returns the cached handle of `oid`, opening the file on first use.
    pub fn get_file_desc(&self, oid: Oid) -> Result<Arc<Mutex<File>>> {
        let mut files = self.files.lock();
        if let Some(file) = files.get(&oid) {
            return Ok(Arc::clone(file));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.table_file_path(oid))
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StrataError::TableNotFound(oid),
                _ => StrataError::Io(e),
            })?;
        debug!("opened table file for oid {}", oid);
        let file = Arc::new(Mutex::new(file));
        files.insert(oid, Arc::clone(&file));
        Ok(file)
    }

    /// Forgets the cached handle of `oid`; the file closes once unused.
    pub fn unregister(&self, oid: Oid) {
        self.files.lock().remove(&oid);
    }

    /// Creates the file of `oid` holding a zeroed root block 0.
    pub fn create_table_file(&self, oid: Oid) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(self.table_file_path(oid))
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StrataError::TableAlreadyExists(oid),
                _ => StrataError::Io(e),
            })?;
        file.write_all(&[0u8; PAGE_SIZE])?;
        file.sync_all()?;
        info!("created table file for oid {}", oid);
        Ok(())
    }

    pub fn remove_table_file(&self, oid: Oid) -> Result<()> {
        self.unregister(oid);
        match fs::remove_file(self.table_file_path(oid)) {
            Ok(()) => {
                info!("removed table file for oid {}", oid);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StrataError::TableNotFound(oid)),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads block `block_num` of `oid` into `data`, zero-filling past EOF.
    pub fn read_block(&self, oid: Oid, block_num: BlockNum, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");
        let offset = block_offset(block_num)?;
        let file = self.get_file_desc(oid)?;
        let mut file = file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            match file.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        data[filled..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes `data` as block `block_num` of `oid` and syncs it to disk.
    pub fn write_block(&self, oid: Oid, block_num: BlockNum, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "buffer must be PAGE_SIZE bytes");
        let offset = block_offset(block_num)?;
        let file = self.get_file_desc(oid)?;
        let mut file = file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_data()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }
}

fn block_offset(block_num: BlockNum) -> Result<u64> {
    if block_num < 0 {
        return Err(StrataError::InvalidBlock(block_num));
    }
    Ok(block_num as u64 * PAGE_SIZE as u64)
}
