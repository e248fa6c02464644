//! Generated workloads through the cache layer agree with a plain map.

use dstore_cache::{decode_entity, encode_entity, CacheConfig, CachedEntity};
use dstore_core::Config;
use dstore_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn cached_workloads_match_the_model(ops in operation_sequence_strategy(4, 1, 40)) {
        let store = TestStore::new();
        let mut harness = ModelHarness::new(&store.ds);
        for op in &ops {
            harness.apply(op);
        }
        harness.verify_all();
    }

    #[test]
    fn sharded_workloads_match_the_model(ops in operation_sequence_strategy(3, 1, 40)) {
        let store = TestStore::with_configs(Config::default(), CacheConfig::new().default_shards(4));
        let mut harness = ModelHarness::new(&store.ds);
        for op in &ops {
            harness.apply(op);
        }
        harness.verify_all();
    }

    #[test]
    fn payloads_round_trip(pm in property_map_strategy()) {
        let payload = encode_entity(&pm).unwrap();
        prop_assert_eq!(decode_entity(&payload).unwrap(), CachedEntity::Found(pm));
    }
}
