//! Request seam between the session layer and the secure channel

use async_trait::async_trait;
use opcua_channel::SecureChannel;
use opcua_core::UaResult;
use opcua_service::{ServiceRequest, ServiceResponse};
use std::time::Duration;

/// Sends one service request and waits for its response
///
/// Implemented by [`SecureChannel`] and by [`crate::Session`], which stamps
/// the session's authentication token into every request first.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceInvoker: Send + Sync {
    async fn invoke(&self, request: ServiceRequest, timeout: Duration) -> UaResult<ServiceResponse>;
}

#[async_trait]
impl ServiceInvoker for SecureChannel {
    async fn invoke(&self, request: ServiceRequest, timeout: Duration) -> UaResult<ServiceResponse> {
        SecureChannel::invoke(self, request, timeout).await
    }
}
