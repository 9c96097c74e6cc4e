//! Simulated beam shutter with separate open and close command endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tomo_core::{ControlPoint, PointValue, TomoResult};

#[derive(Clone)]
pub struct SimShutter {
    open: Arc<Mutex<bool>>,
}

impl SimShutter {
    pub fn new() -> Self {
        Self {
            open: Arc::new(Mutex::new(false)),
        }
    }

    pub async fn is_open(&self) -> bool {
        *self.open.lock().await
    }

    pub fn open_point(&self, name: &str) -> ShutterCommand {
        ShutterCommand {
            name: name.to_string(),
            open: Arc::clone(&self.open),
            opens: true,
        }
    }

    pub fn close_point(&self, name: &str) -> ShutterCommand {
        ShutterCommand {
            name: name.to_string(),
            open: Arc::clone(&self.open),
            opens: false,
        }
    }
}

impl Default for SimShutter {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing any value drives the shutter to this endpoint's state; reading
/// returns 1 once the shutter is in that state.
pub struct ShutterCommand {
    name: String,
    open: Arc<Mutex<bool>>,
    opens: bool,
}

#[async_trait]
impl ControlPoint for ShutterCommand {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self) -> TomoResult<PointValue> {
        let open = *self.open.lock().await;
        Ok(PointValue::Int(i64::from(open == self.opens)))
    }

    async fn put(&self, _value: PointValue) -> TomoResult<()> {
        *self.open.lock().await = self.opens;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_then_close() {
        let shutter = SimShutter::new();
        assert!(!shutter.is_open().await);

        let open = shutter.open_point("open_shutter");
        let close = shutter.close_point("close_shutter");

        open.put(PointValue::Int(1)).await.unwrap();
        assert!(shutter.is_open().await);
        assert_eq!(open.get().await.unwrap(), PointValue::Int(1));
        assert_eq!(close.get().await.unwrap(), PointValue::Int(0));

        close.put(PointValue::Int(1)).await.unwrap();
        assert!(!shutter.is_open().await);
    }
}
