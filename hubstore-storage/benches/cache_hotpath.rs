use criterion::{criterion_group, criterion_main, Criterion};
use hubstore_core::{HubEvent, UserPostfix};
use hubstore_storage::{put_message, put_on_chain_event, MemoryStore, StorageCache};
use hubstore_test_utils::fixtures;
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

const FIDS: u64 = 200;

fn warm_cache(rt: &Runtime) -> (StorageCache<MemoryStore>, Vec<hubstore_core::Fid>) {
    rt.block_on(async {
        let store = MemoryStore::new();
        let now = chrono::Utc::now().timestamp() as u64;
        let mut fids = Vec::new();
        for _ in 0..FIDS {
            let fid = fixtures::new_fid();
            for _ in 0..10 {
                put_message(&store, &fixtures::cast_add(fid)).await.expect("put cast");
                put_message(&store, &fixtures::reaction_add(fid)).await.expect("put reaction");
            }
            put_on_chain_event(&store, &fixtures::storage_rent_event(fid, now, 2))
                .await
                .expect("put rent");
            fids.push(fid);
        }
        let cache = StorageCache::with_defaults(Arc::new(store));
        cache.sync_from_db().await.expect("sync");
        (cache, fids)
    })
}

fn bench_cache_hotpath(c: &mut Criterion) {
    let rt = Runtime::new().expect("build runtime");
    let (cache, fids) = warm_cache(&rt);

    c.bench_function("cache/get_message_count_warm", |b| {
        let mut i = 0usize;
        b.to_async(&rt).iter(|| {
            i = (i + 1) % fids.len();
            let fid = fids[i];
            let cache = &cache;
            async move {
                black_box(
                    cache
                        .get_message_count(fid, UserPostfix::CastMessage)
                        .await
                        .expect("count"),
                );
            }
        });
    });

    c.bench_function("cache/get_storage_slot_warm", |b| {
        let mut i = 0usize;
        b.to_async(&rt).iter(|| {
            i = (i + 1) % fids.len();
            let fid = fids[i];
            let cache = &cache;
            async move {
                black_box(cache.get_current_storage_slot_for_fid(fid).await.expect("slot"));
            }
        });
    });

    c.bench_function("cache/process_merge_event", |b| {
        let fid = fids[0];
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            let event = HubEvent::merge_message(id, fixtures::reaction_add(fid), vec![]);
            cache.process_event(black_box(&event)).expect("process");
        });
    });

    c.bench_function("cache/sync_from_db", |b| {
        b.to_async(&rt).iter(|| async {
            cache.sync_from_db().await.expect("sync");
        });
    });
}

criterion_group!(benches, bench_cache_hotpath);
criterion_main!(benches);
