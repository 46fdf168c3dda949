use super::{Config, Error};
use crate::record::Record;
use bytes::{Buf, BufMut};
use commonware_codec::{FixedSize, Read, ReadExt, Write as CodecWrite};
use commonware_runtime::{Blob, Metrics, Storage};
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use tracing::{debug, trace, warn};

const INDEX_BLOB_NAME: &[u8] = b"index";

/// Size of one page, the unit of file I/O.
const PAGE_SIZE: usize = 4096;

/// Size of the page header (overflow pointer + record count).
const PAGE_HEADER_SIZE: usize = 8;

/// Largest record encoding that still fits an empty page.
const MAX_RECORD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Number of low hash bits available for addressing.
const HASH_BITS: u32 = 16;

/// On-disk overflow pointer marking the end of a chain.
const NO_OVERFLOW: i32 = -1;

/// Fill byte written over drained pages after a split.
const TOMBSTONE: u8 = b'*';

/// A bucket may hold this fraction of a page, on average, before the next
/// insert triggers a split.
const SPLIT_LOAD_FACTOR: f64 = 0.7;

/// Header stored at the start of every page.
#[derive(Debug, Clone, PartialEq)]
struct PageHeader {
    overflow: i32,
    records: i32,
}

impl PageHeader {
    fn new(overflow: Option<u32>, records: u32) -> Self {
        Self {
            overflow: overflow.map(|page| page as i32).unwrap_or(NO_OVERFLOW),
            records: records as i32,
        }
    }

    /// The page index of the next page in the chain, if any.
    fn overflow(&self) -> Option<u32> {
        (self.overflow != NO_OVERFLOW).then(|| self.overflow as u32)
    }

    fn is_valid(&self) -> bool {
        self.overflow >= NO_OVERFLOW && self.records >= 0
    }
}

impl FixedSize for PageHeader {
    const SIZE: usize = PAGE_HEADER_SIZE;
}

impl CodecWrite for PageHeader {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.overflow.to_le_bytes());
        buf.put_slice(&self.records.to_le_bytes());
    }
}

impl Read for PageHeader {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, commonware_codec::Error> {
        let mut overflow_bytes = [0u8; 4];
        buf.copy_to_slice(&mut overflow_bytes);
        let overflow = i32::from_le_bytes(overflow_bytes);

        let mut records_bytes = [0u8; 4];
        buf.copy_to_slice(&mut records_bytes);
        let records = i32::from_le_bytes(records_bytes);

        Ok(Self { overflow, records })
    }
}

/// In-memory image of one page.
struct Page {
    index: u32,
    overflow: Option<u32>,
    records: Vec<Record>,
    occupied: usize,
}

impl Page {
    fn empty(index: u32) -> Self {
        Self {
            index,
            overflow: None,
            records: Vec::new(),
            occupied: PAGE_HEADER_SIZE,
        }
    }

    /// Whether a record of `size` bytes still fits this page.
    fn fits(&self, size: usize) -> bool {
        self.occupied + size <= PAGE_SIZE
    }
}

/// 16-bit hash of a record key.
///
/// Keys that collide beyond the hash space are resolved by overflow
/// chaining, not rejected.
fn hash(key: u64) -> u64 {
    key & ((1 << HASH_BITS) - 1)
}

/// The low `bits` bits of a hash value.
fn low_bits(hash: u64, bits: u32) -> u64 {
    hash & ((1u64 << bits) - 1)
}

/// Number of address bits needed to reach `buckets` buckets.
fn address_bits(buckets: u32) -> u32 {
    u32::BITS - (buckets - 1).leading_zeros()
}

/// Map a key to an existing bucket: take the low address bits of its hash
/// and, when they address a bucket the split cursor has not created yet,
/// fold down to the bucket's pre-split image by clearing the highest
/// address bit.
fn resolve_bucket(key: u64, bits: u32, buckets: u32) -> u32 {
    let mut bucket = low_bits(hash(key), bits) as u32;
    if bucket >= buckets {
        bucket &= !(1 << (bits - 1));
    }
    bucket
}

/// Implementation of a disk-resident linear hashing index.
pub struct Index<E: Storage + Metrics> {
    // Context for storage operations
    context: E,

    // Configuration
    config: Config,

    // Blob holding every page
    blob: E::Blob,

    // Bucket -> first page of its chain
    directory: Vec<u32>,

    // Number of buckets currently addressable
    buckets: u32,

    // Number of low hash bits used to pick a bucket
    bits: u32,

    // Number of records stored
    records: u64,

    // Allocation cursor (pages are never reused)
    next_page: u32,

    // Stored record bytes, across all buckets (drives the split trigger)
    occupied: u64,

    // Metrics
    puts: Counter,
    gets: Counter,
    splits: Counter,
    overflows: Counter,
    skipped: Counter,
    stored: Gauge,
}

impl<E: Storage + Metrics> Index<E> {
    /// Initialize a new [Index] instance.
    ///
    /// Any bytes left in the partition by a previous run are discarded: the
    /// index persists no directory or state and is rebuilt from source data
    /// each run.
    pub async fn init(context: E, config: Config) -> Result<Self, Error> {
        // Open the index blob
        let (blob, len) = context.open(&config.partition, INDEX_BLOB_NAME).await?;
        if len > 0 {
            debug!(len, "resetting existing index blob");
            blob.resize(0).await?;
            blob.sync().await?;
        }

        // Create metrics
        let puts = Counter::default();
        let gets = Counter::default();
        let splits = Counter::default();
        let overflows = Counter::default();
        let skipped = Counter::default();
        let stored = Gauge::default();
        context.register("puts", "Number of puts performed", puts.clone());
        context.register("gets", "Number of gets performed", gets.clone());
        context.register("splits", "Number of bucket splits performed", splits.clone());
        context.register(
            "overflows",
            "Number of overflow pages allocated",
            overflows.clone(),
        );
        context.register(
            "skipped",
            "Number of bulk-load lines skipped",
            skipped.clone(),
        );
        context.register("stored", "Number of records stored", stored.clone());

        Ok(Self {
            context,
            config,
            blob,
            directory: Vec::new(),
            buckets: 0,
            bits: 0,
            records: 0,
            next_page: 0,
            occupied: 0,
            puts,
            gets,
            splits,
            overflows,
            skipped,
            stored,
        })
    }

    /// Store a record in the index.
    pub async fn put(&mut self, record: Record) -> Result<(), Error> {
        self.puts.inc();

        // Reject records that could never fit a page before touching any state.
        let size = record.size();
        if size > MAX_RECORD_SIZE {
            return Err(Error::RecordTooLarge(size));
        }

        // Allocate the first two buckets on the first insert.
        if self.buckets == 0 {
            self.bootstrap().await?;
        }

        // Resolve the record's bucket and append along its chain.
        let bucket = resolve_bucket(record.id(), self.bits, self.buckets);
        let head = self.directory[bucket as usize];
        trace!(id = record.id(), bucket, "inserting record");
        self.append_to_chain(head, &record).await?;

        // Account for the insert, then grow if the structure is overloaded.
        self.records += 1;
        self.occupied += size as u64;
        self.stored.set(self.records as i64);
        self.maybe_split().await
    }

    /// Retrieve a record by key.
    ///
    /// A miss returns `Ok(None)`; only page access failures are errors.
    pub async fn get(&self, key: u64) -> Result<Option<Record>, Error> {
        self.gets.inc();
        if self.buckets == 0 {
            return Ok(None);
        }

        let bucket = resolve_bucket(key, self.bits, self.buckets);
        let mut cursor = Some(self.directory[bucket as usize]);
        while let Some(current) = cursor {
            let page = self.read_page(current).await?;
            if let Some(record) = page.records.iter().find(|record| record.id() == key) {
                trace!(id = key, bucket, page = current, "found record");
                return Ok(Some(record.clone()));
            }
            cursor = page.overflow;
        }
        Ok(None)
    }

    /// Bulk-load records from a delimited text blob, one record per line.
    ///
    /// Lines that cannot be decoded (or whose record cannot fit a page) are
    /// skipped with a warning and the load continues. Returns the number of
    /// records loaded.
    pub async fn load(&mut self, partition: &str, name: &[u8]) -> Result<u64, Error> {
        let (blob, len) = self.context.open(partition, name).await?;
        let data = blob.read_at(vec![0u8; len as usize], 0).await?;

        let mut loaded = 0u64;
        for (number, raw) in data.as_ref().split(|&b| b == b'\n').enumerate() {
            if raw.is_empty() {
                continue;
            }
            let line = match std::str::from_utf8(raw) {
                Ok(line) => line,
                Err(err) => {
                    self.skipped.inc();
                    warn!(line = number + 1, ?err, "skipping undecodable line");
                    continue;
                }
            };
            let record = match Record::decode(line) {
                Ok(record) => record,
                Err(err) => {
                    self.skipped.inc();
                    warn!(line = number + 1, ?err, "skipping malformed record");
                    continue;
                }
            };
            match self.put(record).await {
                Ok(()) => loaded += 1,
                Err(Error::RecordTooLarge(size)) => {
                    self.skipped.inc();
                    warn!(line = number + 1, size, "skipping oversized record");
                }
                Err(err) => return Err(err),
            }
        }
        debug!(loaded, "loaded records");
        Ok(loaded)
    }

    /// Number of records stored.
    pub fn len(&self) -> u64 {
        self.records
    }

    /// Whether the index holds no records.
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Number of buckets currently addressable.
    pub fn buckets(&self) -> u32 {
        self.buckets
    }

    /// Ensure all written pages are durably persisted.
    pub async fn sync(&self) -> Result<(), Error> {
        self.blob.sync().await?;
        Ok(())
    }

    /// Close the index.
    ///
    /// Any pending writes are synced prior to closing.
    pub async fn close(self) -> Result<(), Error> {
        self.blob.sync().await?;
        Ok(())
    }

    /// Remove all on-disk data created by this index.
    pub async fn destroy(self) -> Result<(), Error> {
        self.context
            .remove(&self.config.partition, Some(INDEX_BLOB_NAME))
            .await?;
        self.context.remove(&self.config.partition, None).await?;
        Ok(())
    }

    /// Allocate the first two buckets and start addressing with one bit.
    async fn bootstrap(&mut self) -> Result<(), Error> {
        for _ in 0..2 {
            let page = self.allocate_page().await?;
            self.directory.push(page);
        }
        self.buckets = 2;
        self.bits = 1;
        debug!("bootstrapped index with two buckets");
        Ok(())
    }

    /// Claim the next page index and write a zero-filled page there.
    ///
    /// Full-page writes keep the blob page-aligned, so a read of any
    /// allocated page always fills its buffer. The zero fill reads back as
    /// an empty body; only the header bytes carry the chain-end marker.
    async fn allocate_page(&mut self) -> Result<u32, Error> {
        let page = self.next_page;
        self.next_page += 1;

        let mut frame = vec![0u8; PAGE_SIZE];
        let mut header = &mut frame[..PAGE_HEADER_SIZE];
        PageHeader::new(None, 0).write(&mut header);
        self.blob
            .write_at(frame, page as u64 * PAGE_SIZE as u64)
            .await?;
        Ok(page)
    }

    /// Read one page: a single positioned read of the full page, then the
    /// header and exactly `records` record lines.
    ///
    /// Pages at or past the allocation cursor have never been written and
    /// read as empty.
    async fn read_page(&self, index: u32) -> Result<Page, Error> {
        if index >= self.next_page {
            return Ok(Page::empty(index));
        }

        let frame = self
            .blob
            .read_at(vec![0u8; PAGE_SIZE], index as u64 * PAGE_SIZE as u64)
            .await?;
        let frame = frame.as_ref();
        let mut header_slice = &frame[..PAGE_HEADER_SIZE];
        let header =
            PageHeader::read(&mut header_slice).map_err(|_| Error::PageCorrupted(index))?;
        if !header.is_valid() {
            return Err(Error::PageCorrupted(index));
        }

        let mut page = Page::empty(index);
        page.overflow = header.overflow();
        let body = &frame[PAGE_HEADER_SIZE..];
        let mut at = 0;
        for _ in 0..header.records as usize {
            let len = body[at..]
                .iter()
                .position(|&b| b == b'\n')
                .ok_or(Error::PageCorrupted(index))?;
            let line = std::str::from_utf8(&body[at..at + len])
                .map_err(|_| Error::PageCorrupted(index))?;
            let record = Record::decode(line).map_err(|_| Error::PageCorrupted(index))?;
            page.occupied += record.size();
            page.records.push(record);
            at += len + 1;
        }
        Ok(page)
    }

    /// Overwrite only the header bytes of a page, leaving its body untouched.
    async fn write_header(
        &self,
        page: u32,
        overflow: Option<u32>,
        records: u32,
    ) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(PageHeader::SIZE);
        PageHeader::new(overflow, records).write(&mut buf);
        self.blob.write_at(buf, page as u64 * PAGE_SIZE as u64).await?;
        Ok(())
    }

    /// Write a record at a page's occupied offset and bump its header count.
    ///
    /// Caller guarantees the record fits the page.
    async fn append_record(&self, page: &Page, record: &Record) -> Result<(), Error> {
        let offset = page.index as u64 * PAGE_SIZE as u64 + page.occupied as u64;
        self.blob.write_at(record.encode(), offset).await?;
        self.write_header(page.index, page.overflow, page.records.len() as u32 + 1)
            .await
    }

    /// Walk a bucket's chain from `head` and write `record` into the first
    /// page with room, linking a fresh overflow page when every page is
    /// full. Global counters are untouched; callers account for the insert.
    async fn append_to_chain(&mut self, head: u32, record: &Record) -> Result<(), Error> {
        let size = record.size();
        let mut cursor = head;
        loop {
            let page = self.read_page(cursor).await?;
            if page.fits(size) {
                return self.append_record(&page, record).await;
            }
            if let Some(next) = page.overflow {
                cursor = next;
                continue;
            }

            // Chain exhausted: allocate an overflow page, link it from the
            // current tail, then write the record there.
            let overflow = self.allocate_page().await?;
            self.write_header(page.index, Some(overflow), page.records.len() as u32)
                .await?;
            self.overflows.inc();
            return self.append_record(&Page::empty(overflow), record).await;
        }
    }

    /// Grow by exactly one bucket when the average stored bytes per bucket
    /// exceed the split threshold.
    ///
    /// Evaluated once per insert, so a single insert triggers at most one
    /// split. Re-insertions bypass the global counters, which conserves the
    /// record count and occupied bytes across the split.
    async fn maybe_split(&mut self) -> Result<(), Error> {
        let average = self.occupied as f64 / self.buckets as f64;
        if average <= SPLIT_LOAD_FACTOR * PAGE_SIZE as f64 {
            return Ok(());
        }

        // Append the new bucket and recompute the address width.
        let created = self.buckets;
        let page = self.allocate_page().await?;
        self.directory.push(page);
        self.buckets += 1;
        let bits = address_bits(self.buckets);

        // The bucket being divided is the new bucket's pre-split image. Its
        // old chain is drained in full: records whose widened address is the
        // new bucket move there, the rest land on a fresh replacement chain.
        let source = created & !(1 << (bits - 1));
        let replacement = self.allocate_page().await?;
        debug!(source, created, bits, "splitting bucket");

        let mut cursor = Some(self.directory[source as usize]);
        while let Some(current) = cursor {
            let drained = self.read_page(current).await?;
            for record in &drained.records {
                let target = if low_bits(hash(record.id()), bits) == created as u64 {
                    self.directory[created as usize]
                } else {
                    replacement
                };
                self.append_to_chain(target, record).await?;
            }

            // The drained page is dead: blank it out and never reuse its index.
            self.blob
                .write_at(vec![TOMBSTONE; PAGE_SIZE], current as u64 * PAGE_SIZE as u64)
                .await?;
            cursor = drained.overflow;
        }

        self.directory[source as usize] = replacement;
        self.bits = bits;
        self.splits.inc();
        Ok(())
    }
}
