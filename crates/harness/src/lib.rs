mod device;
mod fleet;
mod memory_remote;

pub use device::{TestDevice, START_MS, catch_row, project_row};
pub use fleet::TestFleet;
pub use memory_remote::{MemoryRemote, RemoteCall};

/// Route engine logs to the test writer. Safe to call from every test.
pub fn init_test_logging() {
    ringsync_engine::logging::init_for_tests();
}
