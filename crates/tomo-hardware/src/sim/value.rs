//! Passive simulated endpoint: a named cell with no behavior.

use async_trait::async_trait;
use tokio::sync::RwLock;

use tomo_core::{ControlPoint, PointValue, TomoResult};

pub struct SimValue {
    name: String,
    value: RwLock<PointValue>,
}

impl SimValue {
    pub fn new(name: &str, initial: impl Into<PointValue>) -> Self {
        Self {
            name: name.to_string(),
            value: RwLock::new(initial.into()),
        }
    }
}

#[async_trait]
impl ControlPoint for SimValue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self) -> TomoResult<PointValue> {
        Ok(self.value.read().await.clone())
    }

    async fn put(&self, value: PointValue) -> TomoResult<()> {
        *self.value.write().await = value;
        Ok(())
    }
}
