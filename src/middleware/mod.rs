/*
 * Responsibility
 * - middleware の公開インターフェース
 * - app 全体: http (trace / request-id / timeout), monitoring, cors, logging, security headers
 * - API route: auth (authentication → authorization), validation
 */
pub mod auth;
pub mod cors;
pub mod http;
pub mod logging;
pub mod monitoring;
pub mod security_headers;
pub mod validation;

/// Look a per-route entry up by its matched template.
///
/// The matched path may or may not carry the context prefix depending on how
/// the router was nested, so both forms are tried.
pub(crate) fn lookup_template<T>(
    matched: &str,
    context_path: &str,
    get: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    get(matched).or_else(|| {
        if context_path.is_empty() {
            return None;
        }
        matched
            .strip_prefix(context_path)
            .filter(|rest| rest.starts_with('/'))
            .and_then(&get)
    })
}
