//! Black-box scenarios exercising the public `Database`/`Transaction`
//! facade end to end, without reaching into any internal module.

use stratum::{CodecKind, Database, DatabaseId, IndexNumber, IndexType, PageKey, ResourceId, Slot, StorageConfig, VersioningStrategy};

fn open(config: StorageConfig) -> (tempfile::TempDir, std::sync::Arc<Database>) {
    let dir = tempfile::tempdir().unwrap();
    let database = Database::open(dir.path(), DatabaseId(1), config).unwrap();
    (dir, database)
}

#[test]
fn round_trip_with_incremental_strategy() {
    let config = StorageConfig::new()
        .with_codec(CodecKind::Identity)
        .with_versioning_strategy(VersioningStrategy::Incremental { restore_window: 3 });
    let (_dir, database) = open(config);
    let resource_id = ResourceId(1);
    let page_key = PageKey::of_record(7);
    let slot = Slot::of_record(7);

    for generation in 0..5u8 {
        let mut writer = database.begin_write(resource_id).unwrap();
        writer.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
        writer.write_record(IndexType::DOCUMENT, page_key, slot, vec![generation]).unwrap();
        writer.commit(u64::from(generation)).unwrap();
    }

    let mut reader = database.begin_read(resource_id).unwrap();
    reader.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    let payload = reader.read_record(IndexType::DOCUMENT, page_key, slot).unwrap();
    assert_eq!(payload, vec![4u8]);
}

#[test]
fn divergent_slots_across_revisions_combine_correctly() {
    let config = StorageConfig::new()
        .with_codec(CodecKind::Identity)
        .with_versioning_strategy(VersioningStrategy::Incremental { restore_window: 3 });
    let (_dir, database) = open(config);
    let resource_id = ResourceId(1);
    let page_key = PageKey::of_record(0);
    let slot_x = Slot::of_record(0);
    let slot_y = Slot::of_record(1);

    // revision 1 touches only slot_x, on a page nothing has ever
    // written before: the very first write against a fresh resource
    // must not be rejected as "not found".
    let mut writer = database.begin_write(resource_id).unwrap();
    writer.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    writer.write_record(IndexType::DOCUMENT, page_key, slot_x, b"x".to_vec()).unwrap();
    writer.commit(0).unwrap();

    // revision 2 touches only slot_y. Its persisted fragment holds
    // nothing about slot_x, so reconstructing the page requires both
    // fragments still being reachable in the chain.
    let mut writer = database.begin_write(resource_id).unwrap();
    writer.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    writer.write_record(IndexType::DOCUMENT, page_key, slot_y, b"y".to_vec()).unwrap();
    writer.commit(1).unwrap();

    let mut reader = database.begin_read(resource_id).unwrap();
    reader.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    assert_eq!(reader.read_record(IndexType::DOCUMENT, page_key, slot_x).unwrap(), b"x");
    assert_eq!(reader.read_record(IndexType::DOCUMENT, page_key, slot_y).unwrap(), b"y");
}

#[test]
fn sliding_snapshot_collapse_preserves_the_last_surviving_slot() {
    let config = StorageConfig::new()
        .with_codec(CodecKind::Identity)
        .with_versioning_strategy(VersioningStrategy::SlidingSnapshot { restore_window: 1 });
    let (_dir, database) = open(config);
    let resource_id = ResourceId(1);
    let page_key = PageKey::of_record(0);
    let slot_a = Slot::of_record(0);
    let slot_b = Slot::of_record(1);

    // revision 1: populate both slots.
    let mut writer = database.begin_write(resource_id).unwrap();
    writer.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    writer.write_record(IndexType::DOCUMENT, page_key, slot_a, b"a1".to_vec()).unwrap();
    writer.write_record(IndexType::DOCUMENT, page_key, slot_b, b"b1".to_vec()).unwrap();
    writer.commit(0).unwrap();

    // revision 2: touch only slot_a. With only one fragment in the
    // chain so far there is nothing yet falling out of the
    // restore_window=1 view, so no carry-forward happens here.
    let mut writer = database.begin_write(resource_id).unwrap();
    writer.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    writer.write_record(IndexType::DOCUMENT, page_key, slot_a, b"a2".to_vec()).unwrap();
    writer.commit(1).unwrap();

    // revision 3: touching the page again pushes revision 1's fragment
    // out of the window. slot_b's only surviving copy lives there and
    // is not covered by revision 2's delta, so combine_for_modification
    // must carry it forward into revision 3's delta or it would vanish.
    let mut writer = database.begin_write(resource_id).unwrap();
    writer.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    writer.write_record(IndexType::DOCUMENT, page_key, slot_a, b"a3".to_vec()).unwrap();
    writer.commit(2).unwrap();

    let mut reader = database.begin_read(resource_id).unwrap();
    reader.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    assert_eq!(reader.read_record(IndexType::DOCUMENT, page_key, slot_a).unwrap(), b"a3");
    assert_eq!(reader.read_record(IndexType::DOCUMENT, page_key, slot_b).unwrap(), b"b1");
}

#[test_log::test]
fn guard_protects_a_page_from_eviction_under_pressure() {
    let config = StorageConfig::new()
        .with_codec(CodecKind::Identity)
        .with_cache_budget_bytes(1)
        .with_shard_count(1);
    let (_dir, database) = open(config);
    let resource_id = ResourceId(1);
    let guarded_key = PageKey::of_record(0);
    let guarded_slot = Slot::of_record(0);

    let mut writer = database.begin_write(resource_id).unwrap();
    writer.fetch_page(IndexType::DOCUMENT, IndexNumber(0), guarded_key).unwrap();
    writer.write_record(IndexType::DOCUMENT, guarded_key, guarded_slot, b"keep".to_vec()).unwrap();
    writer.commit(0).unwrap();

    for record in 1..50u64 {
        let page_key = PageKey::of_record(record * 1024);
        let slot = Slot::of_record(record * 1024);
        let mut writer = database.begin_write(resource_id).unwrap();
        writer.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
        writer.write_record(IndexType::DOCUMENT, page_key, slot, vec![0u8; 64]).unwrap();
        writer.commit(record).unwrap();
    }

    // Holding this transaction's guard on `guarded_key` across the
    // loop below is the point of the test: every other page gets a
    // throwaway reader whose guard is released the moment it drops, so
    // the cache genuinely has somewhere to evict from.
    let mut reader = database.begin_read(resource_id).unwrap();
    reader.fetch_page(IndexType::DOCUMENT, IndexNumber(0), guarded_key).unwrap();

    for record in 1..50u64 {
        let page_key = PageKey::of_record(record * 1024);
        let mut scratch = database.begin_read(resource_id).unwrap();
        scratch.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    }
    database.cache().sweep_now();

    let payload = reader.read_record(IndexType::DOCUMENT, guarded_key, guarded_slot).unwrap();
    assert_eq!(payload, b"keep");
}

#[test]
fn writer_intent_log_is_isolated_from_concurrent_readers() {
    let config = StorageConfig::new().with_codec(CodecKind::Identity);
    let (_dir, database) = open(config);
    let resource_id = ResourceId(1);
    let page_key = PageKey::of_record(0);
    let slot = Slot::of_record(0);

    let mut reader_before = database.begin_read(resource_id).unwrap();

    let mut writer = database.begin_write(resource_id).unwrap();
    writer.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    writer.write_record(IndexType::DOCUMENT, page_key, slot, b"uncommitted".to_vec()).unwrap();

    // A snapshot taken before the write started must never observe it,
    // committed or not.
    reader_before.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    assert!(reader_before.read_record(IndexType::DOCUMENT, page_key, slot).is_err());

    writer.commit(0).unwrap();

    let mut reader_after = database.begin_read(resource_id).unwrap();
    reader_after.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key).unwrap();
    assert_eq!(reader_after.read_record(IndexType::DOCUMENT, page_key, slot).unwrap(), b"uncommitted");
}

#[test]
fn allocator_physical_memory_accounting_round_trips() {
    use stratum::allocator::SegmentAllocator;
    use stratum::error::StratumError;

    let allocator = SegmentAllocator::new();
    let a = allocator.allocate(8 * 1024).unwrap();
    let b = allocator.allocate(4 * 1024).unwrap();
    assert_eq!(allocator.physical_bytes(), 16 * 1024 + 4 * 1024);

    allocator.release(a);
    assert_eq!(allocator.physical_bytes(), 4 * 1024);
    allocator.release(b);
    assert_eq!(allocator.physical_bytes(), 0);

    let err = allocator.allocate(16 * 1024 * 1024).unwrap_err();
    assert!(matches!(err, StratumError::PoolExhausted(_)));
}
