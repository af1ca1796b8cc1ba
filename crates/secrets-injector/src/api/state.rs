use crate::review::ReviewHandler;

pub(crate) struct ApiServerState {
    pub(crate) review_handler: ReviewHandler,
}
