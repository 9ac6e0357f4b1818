use crate::common::config::{PageId, DB_PAGE_SIZE};
use log::trace;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Result as IoResult;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

/// The `DiskManager` trait defines the page-granular operations the buffer
/// pool needs from disk storage.
pub trait DiskManager: Send + Sync {
    fn write_page(&self, page_id: PageId, page_data: &[u8; DB_PAGE_SIZE]) -> IoResult<()>;
    fn read_page(&self, page_id: PageId, page_data: &mut [u8; DB_PAGE_SIZE]) -> IoResult<()>;
}

/// Single-file disk manager. Pages live at `page_id * DB_PAGE_SIZE` within
/// the database file.
pub struct FileDiskManager {
    file_name: String,
    db_io: Mutex<File>,
    num_writes: AtomicU32,
}

impl FileDiskManager {
    /// Opens (or creates) the database file at `db_file`.
    pub fn new(db_file: impl AsRef<Path>) -> IoResult<Self> {
        let file_name = db_file.as_ref().to_string_lossy().into_owned();
        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_file)?;

        Ok(Self {
            file_name,
            db_io: Mutex::new(db_io),
            num_writes: AtomicU32::new(0),
        })
    }

    /// Flushes buffered data to disk.
    pub fn shut_down(&self) -> IoResult<()> {
        self.db_io.lock().sync_all()
    }

    /// Returns the number of page writes performed so far.
    pub fn get_num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::SeqCst)
    }

    pub fn get_file_name(&self) -> &str {
        &self.file_name
    }
}

impl DiskManager for FileDiskManager {
    fn write_page(&self, page_id: PageId, page_data: &[u8; DB_PAGE_SIZE]) -> IoResult<()> {
        let offset = page_id as u64 * DB_PAGE_SIZE as u64;
        trace!("Writing page {} at offset {}", page_id, offset);

        let mut db_io = self.db_io.lock();
        db_io.seek(SeekFrom::Start(offset))?;
        db_io.write_all(page_data)?;
        self.num_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_page(&self, page_id: PageId, page_data: &mut [u8; DB_PAGE_SIZE]) -> IoResult<()> {
        let offset = page_id as u64 * DB_PAGE_SIZE as u64;
        trace!("Reading page {} at offset {}", page_id, offset);

        let mut db_io = self.db_io.lock();
        db_io.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < page_data.len() {
            let n = db_io.read(&mut page_data[filled..])?;
            if n == 0 {
                // Reading past EOF yields a zeroed tail; the page has simply
                // never been written.
                page_data[filled..].fill(0);
                break;
            }
            filled += n;
        }
        Ok(())
    }
}
