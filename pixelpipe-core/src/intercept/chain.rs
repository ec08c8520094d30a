use super::Interceptor;
use crate::error::{PipelineError, Result};
use crate::event::EventListener;
use crate::request::{ImageRequest, Scale, Size};
use crate::result::ImageResult;
use std::sync::Arc;

/// Position of a request in the interceptor list
///
/// Consumed by [`proceed`](Chain::proceed), so every interceptor continues
/// the chain at most once.
pub struct Chain {
    initial_request: ImageRequest,
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    /// Index of the next interceptor to run
    index: usize,
    request: ImageRequest,
    size: Size,
    scale: Scale,
    events: Arc<dyn EventListener>,
}

impl Chain {
    pub fn new(
        request: ImageRequest,
        interceptors: Arc<[Arc<dyn Interceptor>]>,
        size: Size,
        scale: Scale,
        events: Arc<dyn EventListener>,
    ) -> Self {
        Self {
            initial_request: request.clone(),
            interceptors,
            index: 0,
            request,
            size,
            scale,
            events,
        }
    }

    /// The request as handed to the current interceptor
    pub fn request(&self) -> &ImageRequest {
        &self.request
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn events(&self) -> &Arc<dyn EventListener> {
        &self.events
    }

    /// Continue with a different target size
    pub fn with_size(mut self, size: Size) -> Self {
        self.size = size;
        self
    }

    /// Run the rest of the chain with `request`
    ///
    /// `request` must keep the target, scope and size resolver of the
    /// original request.
    pub async fn proceed(self, request: ImageRequest) -> Result<ImageResult> {
        if self.index > 0 {
            self.check_identity(&request)?;
        }

        let Some(interceptor) = self.interceptors.get(self.index).cloned() else {
            return Err(PipelineError::Other(
                "interceptor chain ended without producing a result".to_string(),
            ));
        };

        let next = Chain {
            initial_request: self.initial_request,
            interceptors: self.interceptors,
            index: self.index + 1,
            request,
            size: self.size,
            scale: self.scale,
            events: self.events,
        };
        interceptor.intercept(next).await
    }

    fn check_identity(&self, request: &ImageRequest) -> Result<()> {
        let initial = &self.initial_request;
        let field = if !same_optional(&initial.target, &request.target) {
            "target"
        } else if !same_optional(&initial.scope, &request.scope) {
            "scope"
        } else if !same(&initial.size_resolver, &request.size_resolver) {
            "size resolver"
        } else {
            return Ok(());
        };

        let interceptor = self.interceptors[self.index - 1].name().to_string();
        Err(PipelineError::InterceptorContract { interceptor, field })
    }
}

fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn same_optional<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => same(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{Bitmap, PixelConfig};
    use crate::event::NoopEventListener;
    use crate::request::{FixedSizeResolver, RequestScope, Target};
    use crate::result::{DataSource, SuccessResult};
    use async_trait::async_trait;

    struct Respond;

    #[async_trait]
    impl Interceptor for Respond {
        async fn intercept(&self, chain: Chain) -> Result<ImageResult> {
            Ok(ImageResult::Success(SuccessResult {
                image: Arc::new(Bitmap::new(chain.size().width.px_or(1), 1, PixelConfig::Alpha8)),
                request: chain.request().clone(),
                data_source: DataSource::Memory,
                memory_cache_key: None,
                disk_cache_key: None,
                is_sampled: false,
            }))
        }
    }

    struct PassThrough;

    #[async_trait]
    impl Interceptor for PassThrough {
        async fn intercept(&self, chain: Chain) -> Result<ImageResult> {
            let request = chain.request().clone();
            chain.with_size(Size::new(8, 8)).proceed(request).await
        }
    }

    struct SwapScope;

    #[async_trait]
    impl Interceptor for SwapScope {
        async fn intercept(&self, chain: Chain) -> Result<ImageResult> {
            let mut request = chain.request().clone();
            request.scope = Some(RequestScope::new("other"));
            chain.proceed(request).await
        }
    }

    struct SwapResolver;

    #[async_trait]
    impl Interceptor for SwapResolver {
        fn name(&self) -> &str {
            "resolver-swapper"
        }

        async fn intercept(&self, chain: Chain) -> Result<ImageResult> {
            let mut request = chain.request().clone();
            request.size_resolver = Arc::new(FixedSizeResolver(Size::ORIGINAL));
            chain.proceed(request).await
        }
    }

    struct NullTarget;

    impl Target for NullTarget {}

    fn chain(interceptors: Vec<Arc<dyn Interceptor>>, request: ImageRequest) -> Chain {
        Chain::new(
            request,
            interceptors.into(),
            Size::ORIGINAL,
            Scale::Fit,
            Arc::new(NoopEventListener),
        )
    }

    #[tokio::test]
    async fn test_proceed_reaches_last_interceptor() {
        let request = ImageRequest::new("a");
        let result = chain(vec![Arc::new(PassThrough), Arc::new(Respond)], request.clone())
            .proceed(request)
            .await
            .unwrap();
        assert_eq!(result.image().unwrap().width(), 8);
    }

    #[tokio::test]
    async fn test_changed_scope_names_interceptor() {
        let request = ImageRequest::builder("a")
            .scope(RequestScope::new("screen"))
            .target(Arc::new(NullTarget))
            .build();
        let error = chain(vec![Arc::new(SwapScope), Arc::new(Respond)], request.clone())
            .proceed(request)
            .await
            .unwrap_err();

        match error {
            PipelineError::InterceptorContract { interceptor, field } => {
                assert_eq!(interceptor, "SwapScope");
                assert_eq!(field, "scope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_changed_size_resolver_is_rejected() {
        let request = ImageRequest::new("a");
        let error = chain(vec![Arc::new(SwapResolver), Arc::new(Respond)], request.clone())
            .proceed(request)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("resolver-swapper"));
        assert!(error.to_string().contains("size resolver"));
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_an_error() {
        let request = ImageRequest::new("a");
        let result = chain(vec![Arc::new(PassThrough)], request.clone())
            .proceed(request)
            .await;
        assert!(matches!(result, Err(PipelineError::Other(_))));
    }
}
