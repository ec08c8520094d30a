//! Interceptor chain wrapped around request execution
//!
//! A request passes through an ordered list of interceptors. Each one may
//! observe or rewrite the request, short-circuit with its own result, or
//! call [`Chain::proceed`] to hand off to the next. The loader always places
//! [`DefaultsInterceptor`] first and [`EngineInterceptor`] last.

pub mod chain;
pub mod defaults;
pub mod engine;

pub use chain::Chain;
pub use defaults::DefaultsInterceptor;
pub use engine::{EngineInterceptor, ExecuteResult};

use crate::error::Result;
use crate::result::ImageResult;
use async_trait::async_trait;

#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Name used in contract violation errors
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or_default()
    }

    async fn intercept(&self, chain: Chain) -> Result<ImageResult>;
}
