use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::core::config::{Feature, FeatureFlags};
use crate::core::error::ApiError;

/// Rejects the whole route group with `FEATURE_DISABLED` when `feature` is off.
pub async fn require_feature(
    State((flags, feature)): State<(FeatureFlags, Feature)>,
    request: Request,
    next: Next,
) -> Response {
    if !flags.is_enabled(feature) {
        tracing::debug!(feature = feature.as_str(), "request to disabled feature");
        return ApiError::FeatureDisabled(feature.as_str().to_string()).into_response();
    }
    next.run(request).await
}
