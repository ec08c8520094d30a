use super::{Chain, Interceptor};
use crate::error::Result;
use crate::request::DefaultRequestOptions;
use crate::result::ImageResult;
use async_trait::async_trait;

/// Fills every option the request leaves unset from the loader's defaults
pub struct DefaultsInterceptor {
    defaults: DefaultRequestOptions,
}

impl DefaultsInterceptor {
    pub fn new(defaults: DefaultRequestOptions) -> Self {
        Self { defaults }
    }
}

#[async_trait]
impl Interceptor for DefaultsInterceptor {
    async fn intercept(&self, chain: Chain) -> Result<ImageResult> {
        let request = chain.request().clone().with_defaults(&self.defaults);
        chain.proceed(request).await
    }
}
