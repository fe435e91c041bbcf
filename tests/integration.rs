#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

mod integration {
    mod agent_lifecycle_tests;
    mod ipc_round_trip_tests;
    mod test_helpers;
}
