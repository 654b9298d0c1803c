use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_BUS_ID;
use crate::Error;
use crate::Result;

/// Refresh bus settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusConfig {
    /// Origin service id stamped on every refresh event
    #[serde(default = "default_bus_id")]
    pub bus_id: String,

    /// Buffered refresh events per subscriber before the slowest one lags
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_id: default_bus_id(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bus_id.trim().is_empty() {
            return Err(Error::InvalidConfig("bus.bus_id cannot be blank".into()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig("bus.channel_capacity must be > 0".into()));
        }
        Ok(())
    }
}

fn default_bus_id() -> String {
    DEFAULT_BUS_ID.to_string()
}
fn default_channel_capacity() -> usize {
    1024
}
