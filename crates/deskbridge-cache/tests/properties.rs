// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Property tests for the TTL cache.

use std::time::Duration;

use deskbridge_cache::TtlCache;
use proptest::prelude::*;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("runtime")
}

proptest! {
    #[test]
    fn second_acquire_without_release_fails(keys in prop::collection::hash_set("[a-z0-9:@.]{1,24}", 1..32)) {
        let cache = TtlCache::new("prop", Duration::from_secs(30));
        for key in &keys {
            prop_assert!(cache.try_acquire(key));
            prop_assert!(!cache.try_acquire(key));
        }
        prop_assert_eq!(cache.len(), keys.len());
        for key in &keys {
            cache.release(key);
            prop_assert!(cache.try_acquire(key));
        }
    }

    #[test]
    fn mark_then_exists_until_ttl(ttl_secs in 1u64..600, before in 0u64..600) {
        let rt = paused_runtime();
        rt.block_on(async {
            let ttl = Duration::from_secs(ttl_secs);
            let cache = TtlCache::new("prop", ttl);
            cache.mark("k");
            assert!(cache.exists("k"));

            let elapsed = Duration::from_secs(before.min(ttl_secs - 1));
            tokio::time::advance(elapsed).await;
            assert!(cache.exists("k"));

            tokio::time::advance(ttl - elapsed).await;
            assert!(!cache.exists("k"));
        });
    }
}
