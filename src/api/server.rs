use crate::api::routes;
use crate::config::SharedConfig;
use crate::records::Lifecycle;
use std::future::Future;
use std::sync::Arc;

#[derive(Clone)]
pub(super) struct AppState {
    pub config: SharedConfig,
    pub lifecycle: Arc<Lifecycle>,
}

pub fn new(
    config: SharedConfig,
    lifecycle: Arc<Lifecycle>,
) -> impl Future<Output = hyper::Result<()>> {
    let bind_addr = config.api_bind_addr;
    axum::Server::bind(&bind_addr)
        .serve(routes::new(AppState { config, lifecycle }).into_make_service())
}
