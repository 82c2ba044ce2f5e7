use ringsync_engine::EngineError;

use crate::{MemoryRemote, TestDevice};

/// Several devices syncing against one shared remote store.
pub struct TestFleet {
    remote: MemoryRemote,
    devices: Vec<TestDevice>,
}

impl Default for TestFleet {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFleet {
    pub fn new() -> Self {
        Self {
            remote: MemoryRemote::new(),
            devices: Vec::new(),
        }
    }

    pub fn remote(&self) -> &MemoryRemote {
        &self.remote
    }

    pub fn add_device(&mut self) -> Result<usize, EngineError> {
        let device = TestDevice::new(self.remote.clone())?;
        let index = self.devices.len();
        self.devices.push(device);
        Ok(index)
    }

    pub fn device(&self, index: usize) -> &TestDevice {
        &self.devices[index]
    }

    pub fn device_mut(&mut self, index: usize) -> &mut TestDevice {
        &mut self.devices[index]
    }
}
