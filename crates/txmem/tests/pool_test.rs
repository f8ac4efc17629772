//! Byte pool allocation tests.

use txmem::{BytePool, PoolError, Region, ALIGNMENT};

fn overlaps(a: &Region, b: &Region) -> bool {
    a.range().start < b.range().end && b.range().start < a.range().end
}

#[test]
fn create_rejects_short_storage() {
    let err = BytePool::create("short", vec![0u8; 512], 1024).unwrap_err();
    assert!(matches!(err, PoolError::Resource(_)));
}

#[test]
fn create_rejects_tiny_pool() {
    let err = BytePool::with_capacity("tiny", 16).unwrap_err();
    assert!(matches!(err, PoolError::Resource(_)));
}

#[test]
fn create_uses_only_requested_capacity() {
    let pool = BytePool::create("larger storage", vec![0u8; 4096], 1024).unwrap();
    assert_eq!(pool.capacity(), 1024);
    assert_eq!(pool.info().available, 1024);
}

#[test]
fn allocations_never_overlap() {
    let pool = BytePool::with_capacity("byte pool 0", 9120).unwrap();
    let sizes = [1024, 1, 7, 300, 1024, 64, 999];
    let regions: Vec<Region> = sizes
        .iter()
        .map(|size| pool.allocate(*size).expect("pool has room"))
        .collect();

    for (i, a) in regions.iter().enumerate() {
        for b in &regions[i + 1..] {
            assert!(!overlaps(a, b), "{a:?} overlaps {b:?}");
        }
    }

    let allocated: usize = regions.iter().map(Region::len).sum();
    assert!(allocated <= pool.capacity());
    assert_eq!(pool.info().available, pool.capacity() - allocated);
}

#[test]
fn region_is_at_least_requested_and_aligned() {
    let pool = BytePool::with_capacity("align", 256).unwrap();
    let region = pool.allocate(13).unwrap();
    assert!(region.len() >= 13);
    assert_eq!(region.len() % ALIGNMENT, 0);
    assert_eq!(region.offset() % ALIGNMENT, 0);
}

#[test]
fn zero_sized_request_is_invalid() {
    let pool = BytePool::with_capacity("zero", 128).unwrap();
    assert_eq!(pool.allocate(0).unwrap_err(), PoolError::InvalidSize(0));
}

#[test]
fn request_beyond_remaining_capacity_is_out_of_memory() {
    let pool = BytePool::with_capacity("oom", 2048).unwrap();
    let _first = pool.allocate(1024).unwrap();
    let _second = pool.allocate(1000).unwrap();

    let err = pool.allocate(1024).unwrap_err();
    assert_eq!(
        err,
        PoolError::OutOfMemory {
            requested: 1024,
            available: 24,
        }
    );
    assert_eq!(pool.info().allocations, 2);
}

#[test]
fn fragmented_pool_cannot_serve_large_block() {
    let pool = BytePool::with_capacity("fragmented", 384).unwrap();
    let a = pool.allocate(128).unwrap();
    let _b = pool.allocate(128).unwrap();
    let c = pool.allocate(128).unwrap();
    drop(a);
    drop(c);

    let info = pool.info();
    assert_eq!(info.available, 256);
    assert_eq!(info.fragments, 2);
    assert!(matches!(
        pool.allocate(256),
        Err(PoolError::OutOfMemory { .. })
    ));
}

#[test]
fn freed_space_is_reused_first_fit() {
    let pool = BytePool::with_capacity("reuse", 512).unwrap();
    let a = pool.allocate(64).unwrap();
    let _b = pool.allocate(64).unwrap();
    let a_range = a.range();
    drop(a);

    let again = pool.allocate(32).unwrap();
    assert_eq!(again.offset(), a_range.start);
    assert_eq!(pool.info().min_available, 512 - 128);
}

#[test]
fn region_reports_its_pool() {
    let pool = BytePool::with_capacity("named", 128).unwrap();
    let region = pool.allocate(8).unwrap();
    assert_eq!(region.pool_name(), "named");
    assert_eq!(pool.name(), "named");
}
